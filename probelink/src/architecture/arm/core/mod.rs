//! Debug registers of the Cortex-M system control space.
//!
//! The layout follows the armv7-M Architecture Reference Manual; armv6-M and
//! armv8-M implement the same subset.
use crate::core::{HaltReason, MemoryMappedRegister};
use bitfield::bitfield;

/// Implements the `u32` conversions of a register newtype.
macro_rules! register_conversions {
    ($($register:ident),* $(,)?) => {
        $(
            impl From<u32> for $register {
                fn from(value: u32) -> Self {
                    Self(value)
                }
            }

            impl From<$register> for u32 {
                fn from(register: $register) -> Self {
                    register.0
                }
            }
        )*
    };
}

bitfield! {
    /// Debug Halting Control and Status Register, DHCSR (see armv7-M Architecture Reference Manual C1.6.2)
    ///
    /// To write this register successfully, you need to set the debug key via [`Dhcsr::enable_write`] first!
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Dhcsr(u32);
    impl Debug;
    /// The processor has been reset since the last read of DHCSR. Clears on read.
    pub s_reset_st, _: 25;
    /// An instruction completed since the last read of DHCSR. Clears on read.
    pub s_retire_st, _: 24;
    /// The processor is locked up because of an unrecoverable exception.
    pub s_lockup, _: 19;
    /// The processor is sleeping.
    pub s_sleep, _: 18;
    /// The processor is in Debug state.
    pub s_halt, _: 17;
    /// The transfer to or from DCRDR is complete.
    pub s_regrdy, _: 16;
    /// Mask PendSV, SysTick and external interrupts while stepping.
    pub c_maskints, set_c_maskints: 3;
    /// Single step the processor.
    pub c_step, set_c_step: 2;
    /// Halt the processor.
    pub c_halt, set_c_halt: 1;
    /// Enable halting debug.
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// The value of DBGKEY, which has to accompany every write.
    const DBGKEY: u32 = 0xA05F;

    /// Must be called before writing the register.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xFFFF << 16);
        self.0 |= Self::DBGKEY << 16;
    }
}

impl MemoryMappedRegister for Dhcsr {
    const ADDRESS: u64 = 0xE000_EDF0;
    const NAME: &'static str = "DHCSR";
}

bitfield! {
    /// Debug Core Register Selector Register, DCRSR (see armv7-M Architecture Reference Manual C1.6.3)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Dcrsr(u32);
    impl Debug;
    /// `1` for a write to the selected register, `0` for a read.
    pub _, set_regwnr: 16;
    /// The register to transfer.
    pub _, set_regsel: 6, 0;
}

impl MemoryMappedRegister for Dcrsr {
    const ADDRESS: u64 = 0xE000_EDF4;
    const NAME: &'static str = "DCRSR";
}

/// Debug Core Register Data Register, DCRDR (see armv7-M Architecture Reference Manual C1.6.4)
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Dcrdr(pub u32);

impl MemoryMappedRegister for Dcrdr {
    const ADDRESS: u64 = 0xE000_EDF8;
    const NAME: &'static str = "DCRDR";
}

bitfield! {
    /// Debug Exception and Monitor Control Register, DEMCR (see armv7-M Architecture Reference Manual C1.6.5)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global enable for the DWT and ITM.
    pub trcena, set_trcena: 24;
    /// Halt on a hard fault.
    pub vc_harderr, set_vc_harderr: 10;
    /// Halt on the reset vector.
    pub vc_corereset, set_vc_corereset: 0;
}

impl MemoryMappedRegister for Demcr {
    const ADDRESS: u64 = 0xE000_EDFC;
    const NAME: &'static str = "DEMCR";
}

bitfield! {
    /// Application Interrupt and Reset Control Register, AIRCR (see armv7-M Architecture Reference Manual B3.2.6)
    ///
    /// [`Aircr::vectkey`] must be called before this register can effectively be written!
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Aircr(u32);
    impl Debug;
    /// Vector Key. The value 0x05FA must be written to this register, otherwise
    /// the register write is UNPREDICTABLE.
    get_vectkeystat, set_vectkey: 31,16;
    /// The memory system is big endian.
    pub endianness, _: 15;
    /// Request a reset of the whole system.
    pub sysresetreq, set_sysresetreq: 2;
    /// Clear the active state of all exceptions.
    pub vectclractive, set_vectclractive: 1;
    /// Reset the core only. Not available on armv6-M and armv8-M.
    pub vectreset, set_vectreset: 0;
}

impl Aircr {
    /// Must be called before writing the register.
    pub fn vectkey(&mut self) {
        self.set_vectkey(0x05FA);
    }

    /// Verifies that the vector key is correct (see [`Aircr::vectkey`])
    pub fn vectkeystat(&self) -> bool {
        self.get_vectkeystat() == 0xFA05
    }
}

impl MemoryMappedRegister for Aircr {
    const ADDRESS: u64 = 0xE000_ED0C;
    const NAME: &'static str = "AIRCR";
}

bitfield! {
    /// Debug Fault Status Register, DFSR (see armv7-M Architecture Reference Manual C1.6.1)
    ///
    /// The bits are cleared by writing `1` to them.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Dfsr(u32);
    impl Debug;
    /// An external halt request was asserted.
    pub external, set_external: 4;
    /// A vector catch triggered.
    pub vcatch, set_vcatch: 3;
    /// A DWT match triggered.
    pub dwttrap, set_dwttrap: 2;
    /// A BKPT instruction or a FPB match halted the core.
    pub bkpt, set_bkpt: 1;
    /// A halt request or a single step halted the core.
    pub halted, set_halted: 0;
}

impl Dfsr {
    /// A value which clears all halt reasons.
    pub fn clear_all() -> Self {
        Dfsr(0b11111)
    }

    /// The reason for the last halt.
    pub fn halt_reason(&self) -> HaltReason {
        let reasons = self.0 & 0b11111;

        if reasons.count_ones() > 1 {
            // The core halted for several reasons at once, e.g. a step onto a breakpoint.
            HaltReason::Multiple
        } else if self.bkpt() {
            HaltReason::Breakpoint
        } else if self.external() {
            HaltReason::External
        } else if self.dwttrap() {
            HaltReason::Watchpoint
        } else if self.halted() {
            HaltReason::Request
        } else if self.vcatch() {
            HaltReason::VectorCatch
        } else {
            HaltReason::Unknown
        }
    }
}

impl MemoryMappedRegister for Dfsr {
    const ADDRESS: u64 = 0xE000_ED30;
    const NAME: &'static str = "DFSR";
}

bitfield! {
    /// CPUID Base Register (see armv7-M Architecture Reference Manual B3.2.3)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Cpuid(u32);
    impl Debug;
    /// The implementer code, `0x41` for ARM.
    pub u8, implementer, _: 31, 24;
    /// The major revision of the core.
    pub u8, variant, _: 23, 20;
    /// Reads as `0xF` for all ARMv6-M, ARMv7-M and ARMv8-M cores.
    pub u8, architecture, _: 19, 16;
    /// The part number of the core.
    pub u16, partno, _: 15, 4;
    /// The minor revision of the core.
    pub u8, revision, _: 3, 0;
}

impl MemoryMappedRegister for Cpuid {
    const ADDRESS: u64 = 0xE000_ED00;
    const NAME: &'static str = "CPUID";
}

bitfield! {
    /// Flash Patch Control Register, FP_CTRL (see armv7-M Architecture Reference Manual C1.11.3)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FpCtrl(u32);
    impl Debug;
    /// Flash Patch breakpoint architecture revision, `0` for version 1.
    pub rev, _: 31, 28;
    num_code_1, _: 14, 12;
    /// The number of literal address comparators supported.
    pub num_lit, _: 11, 8;
    num_code_0, _: 7, 4;
    /// On any write to FP_CTRL, this bit must be `1`.
    pub _, set_key: 1;
    /// Enable bit for the FPB.
    pub enable, set_enable: 0;
}

impl FpCtrl {
    /// The number of instruction address comparators.
    pub fn num_code(&self) -> u32 {
        (self.num_code_1() << 4) | self.num_code_0()
    }
}

impl MemoryMappedRegister for FpCtrl {
    const ADDRESS: u64 = 0xE000_2000;
    const NAME: &'static str = "FP_CTRL";
}

bitfield! {
    /// Flash Patch Comparator register, FP_COMPn of FPB version 1 (see armv7-M Architecture Reference Manual C1.11.5)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FpRev1CompX(u32);
    impl Debug;
    /// `01` breaks on the lower halfword, `10` on the upper halfword of the word at COMP.
    pub replace, set_replace: 31, 30;
    /// Bits[28:2] of the address to compare with.
    pub comp, set_comp: 28, 2;
    /// Enable bit for this comparator.
    pub enable, set_enable: 0;
}

impl FpRev1CompX {
    /// A comparator which breaks on the instruction at `address`.
    ///
    /// Returns `None` if the address is outside of the code region the FPB can match.
    pub fn breakpoint_configuration(address: u32) -> Option<Self> {
        if address >= 0x2000_0000 {
            return None;
        }

        let mut comp = FpRev1CompX(0);
        comp.set_comp((address >> 2) & 0x07FF_FFFF);
        comp.set_replace(if address % 4 < 2 { 0b01 } else { 0b10 });
        comp.set_enable(true);
        Some(comp)
    }
}

impl MemoryMappedRegister for FpRev1CompX {
    const ADDRESS: u64 = 0xE000_2008;
    const NAME: &'static str = "FP_COMP";
}

register_conversions!(Dhcsr, Dcrsr, Dcrdr, Demcr, Aircr, Dfsr, Cpuid, FpCtrl, FpRev1CompX);

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn dhcsr_halt_request() {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_halt(true);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();

        assert_eq!(u32::from(dhcsr), 0xA05F_0003);
    }

    #[test]
    fn aircr_system_reset() {
        let mut aircr = Aircr(0);
        aircr.vectkey();
        aircr.set_sysresetreq(true);

        assert_eq!(u32::from(aircr), 0x05FA_0004);
        assert!(Aircr(0xFA05_0000).vectkeystat());
    }

    #[test]
    fn cortex_m4_cpuid() {
        let cpuid = Cpuid(0x410F_C241);

        assert_eq!(cpuid.implementer(), 0x41);
        assert_eq!(cpuid.variant(), 0);
        assert_eq!(cpuid.architecture(), 0xF);
        assert_eq!(cpuid.partno(), 0xC24);
        assert_eq!(cpuid.revision(), 1);
    }

    #[test_case(0b00010, HaltReason::Breakpoint)]
    #[test_case(0b00001, HaltReason::Request)]
    #[test_case(0b01000, HaltReason::VectorCatch)]
    #[test_case(0b00011, HaltReason::Multiple)]
    #[test_case(0b00000, HaltReason::Unknown)]
    fn dfsr_halt_reason(dfsr: u32, reason: HaltReason) {
        assert_eq!(Dfsr(dfsr).halt_reason(), reason);
    }

    #[test]
    fn breakpoint_on_upper_halfword() {
        let comp = FpRev1CompX::breakpoint_configuration(0x0800_0102).unwrap();

        assert_eq!(u32::from(comp), 0x8800_0101);
        assert!(FpRev1CompX::breakpoint_configuration(0x2000_0000).is_none());
    }
}
