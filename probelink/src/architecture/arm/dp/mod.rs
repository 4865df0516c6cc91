//! Debug port registers of the ARM Debug Interface v5.

use super::Register;
use bitfield::bitfield;
use jep106::JEP106Code;
use std::fmt;

/// A register of the debug port.
pub trait DpRegister: Register {
    /// The DPBANKSEL value required to access the register. Registers at
    /// address 0x0, 0x8 and 0xC ignore the bank.
    const DP_BANK: DpBankSel;
}

/// Bank selection of a debug port register.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DpBankSel {
    /// The register is reachable regardless of SELECT.DPBANKSEL.
    DontCare,
    /// The register is only reachable with this SELECT.DPBANKSEL.
    Bank(u8),
}

/// Implements the conversions every register needs for a `u32` newtype.
macro_rules! raw_register_conversions {
    ($($register:ident),* $(,)?) => {
        $(
            impl From<u32> for $register {
                fn from(raw: u32) -> Self {
                    Self(raw)
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

pub(crate) use raw_register_conversions;

bitfield! {
    /// ABORT, write only. Clears the sticky flags and aborts stalled transactions.
    #[derive(Clone, Copy, Default)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 5;
    pub _, set_wderrclr: 4;
    pub _, set_stkerrclr: 3;
    pub _, set_stkcmpclr: 2;
    pub _, set_dapabort: 1;
}

impl Abort {
    /// An ABORT value which clears every sticky flag, but does not abort a transaction.
    pub fn clear_sticky_flags() -> Self {
        let mut abort = Abort(0);
        abort.set_orunerrclr(true);
        abort.set_wderrclr(true);
        abort.set_stkerrclr(true);
        abort.set_stkcmpclr(true);
        abort
    }

    /// An ABORT value which cancels the transaction that keeps answering WAIT.
    pub fn dap_abort() -> Self {
        let mut abort = Abort(0);
        abort.set_dapabort(true);
        abort
    }
}

impl DpRegister for Abort {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    /// CTRL/STAT, the control and status register of the debug port.
    #[derive(Clone, Copy, Default)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub c_dbg_rst_req, set_c_dbg_rst_req: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub u8, mask_lane, set_mask_lane: 11, 8;
    pub w_data_err, _ : 7;
    pub read_ok, _ : 6;
    pub sticky_err, _: 5;
    pub stick_cmp, _: 4;
    pub u8, trn_mode, _: 3, 2;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl Ctrl {
    /// Returns true if any of the sticky error flags is set.
    pub fn has_sticky_error(&self) -> bool {
        self.sticky_err() || self.sticky_orun() || self.w_data_err()
    }

    /// Returns true if both power domains acknowledged the power-up request.
    pub fn powered_up(&self) -> bool {
        self.csyspwrupack() && self.cdbgpwrupack()
    }
}

impl DpRegister for Ctrl {
    const DP_BANK: DpBankSel = DpBankSel::Bank(0);
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    /// SELECT, picks the access port and register banks used by following transfers.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl DpRegister for Select {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

/// RDBUFF, holds the result of the last posted AP read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdBuff(pub u32);

impl DpRegister for RdBuff {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

impl Register for RdBuff {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "RDBUFF";
}

bitfield! {
    /// DPIDR, read only identification register of the debug port.
    #[derive(Clone, Copy)]
    pub struct DPIDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub designer, _: 11, 1;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

impl DpRegister for DPIDR {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

impl Register for DPIDR {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

raw_register_conversions!(Abort, Ctrl, Select, DPIDR);

impl From<u32> for RdBuff {
    fn from(raw: u32) -> Self {
        RdBuff(raw)
    }
}

impl From<RdBuff> for u32 {
    fn from(register: RdBuff) -> Self {
        register.0
    }
}

/// The decoded contents of [`DPIDR`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugPortId {
    /// Revision of the debug port implementation.
    pub revision: u8,
    /// Part number of the debug port, defined by the designer.
    pub part_no: u8,
    /// Architecture version of the debug port.
    pub version: DebugPortVersion,
    /// True if the minimal debug port (no pushed compares) is implemented.
    pub min_dp_support: bool,
    /// The JEP106 code of the designer of the debug port.
    pub designer: JEP106Code,
}

impl From<DPIDR> for DebugPortId {
    fn from(dpidr: DPIDR) -> DebugPortId {
        DebugPortId {
            revision: dpidr.revision(),
            part_no: dpidr.part_no(),
            version: dpidr.version().into(),
            min_dp_support: dpidr.min(),
            designer: JEP106Code::new(dpidr.jep_cc(), dpidr.jep_id()),
        }
    }
}

/// The version of the debug port.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DebugPortVersion {
    /// JTAG-DP only, no DPIDR.
    DPv0,
    /// ADIv5.0 and later.
    DPv1,
    /// ADIv5.2, adds multidrop and banked registers.
    DPv2,
    /// DPv3, part of ADIv6.
    DPv3,
    /// Any version not defined by the architecture.
    Unsupported(u8),
}

impl From<u8> for DebugPortVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => DebugPortVersion::DPv0,
            1 => DebugPortVersion::DPv1,
            2 => DebugPortVersion::DPv2,
            3 => DebugPortVersion::DPv3,
            value => DebugPortVersion::Unsupported(value),
        }
    }
}

impl fmt::Display for DebugPortVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugPortVersion::DPv0 => write!(f, "DPv0"),
            DebugPortVersion::DPv1 => write!(f, "DPv1"),
            DebugPortVersion::DPv2 => write!(f, "DPv2"),
            DebugPortVersion::DPv3 => write!(f, "DPv3"),
            DebugPortVersion::Unsupported(version) => write!(f, "<unsupported DP version {version}>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_cortex_m4_dpidr() {
        // SW-DP of a Cortex-M4, designed by ARM
        let id = DebugPortId::from(DPIDR(0x2BA0_1477));

        assert_eq!(id.version, DebugPortVersion::DPv1);
        assert_eq!(id.revision, 0x2);
        assert_eq!(id.part_no, 0xBA);
        assert_eq!(id.designer, JEP106Code::new(4, 0x3b));
        assert_eq!(id.designer.get(), Some("ARM Ltd"));
    }

    #[test]
    fn clear_sticky_flags_sets_all_clear_bits() {
        assert_eq!(u32::from(Abort::clear_sticky_flags()), 0b11_1100);
        assert_eq!(u32::from(Abort::dap_abort()), 0b10);
    }

    #[test]
    fn select_fields() {
        let mut select = Select(0);
        select.set_ap_sel(1);
        select.set_ap_bank_sel(0xF);

        assert_eq!(u32::from(select), 0x0100_00F0);
    }
}
