use std::fmt;

/// The number of a core register, as selected through DCRSR.REGSEL.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(pub u16);

impl RegisterId {
    /// The stack pointer in use.
    pub const SP: RegisterId = RegisterId(13);
    /// The link register.
    pub const LR: RegisterId = RegisterId(14);
    /// The program counter.
    pub const PC: RegisterId = RegisterId(15);
    /// The combined program status register.
    pub const XPSR: RegisterId = RegisterId(16);
    /// The main stack pointer.
    pub const MSP: RegisterId = RegisterId(17);
    /// The process stack pointer.
    pub const PSP: RegisterId = RegisterId(18);

    /// General purpose register `R<index>`, for `index` in `0..=12`.
    pub fn general_purpose(index: u16) -> Option<RegisterId> {
        (index <= 12).then_some(RegisterId(index))
    }

    /// The usual name of the register, if it is one of the basic registers.
    pub fn name(&self) -> Option<&'static str> {
        const NAMES: [&str; 19] = [
            "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "SP",
            "LR", "PC", "XPSR", "MSP", "PSP",
        ];

        NAMES.get(self.0 as usize).copied()
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "REGSEL {:#04x}", self.0),
        }
    }
}

impl From<RegisterId> for u32 {
    fn from(id: RegisterId) -> Self {
        u32::from(id.0)
    }
}

/// The CPUID register decoded into its fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CpuInfo {
    /// The implementer code, `0x41` for ARM.
    pub implementer: u8,
    /// The major revision, the `r` in `rNpM`.
    pub variant: u8,
    /// The part number of the core.
    pub part_number: u16,
    /// The minor revision, the `p` in `rNpM`.
    pub revision: u8,
}

impl CpuInfo {
    /// Decode a raw CPUID value.
    pub fn from_cpuid(cpuid: u32) -> Self {
        let cpuid = crate::architecture::arm::core::Cpuid::from(cpuid);

        Self {
            implementer: cpuid.implementer(),
            variant: cpuid.variant(),
            part_number: cpuid.partno(),
            revision: cpuid.revision(),
        }
    }

    /// The name of the core, for the ARM designed Cortex-M cores.
    pub fn core_name(&self) -> Option<&'static str> {
        if self.implementer != 0x41 {
            return None;
        }

        let name = match self.part_number {
            0xC20 => "Cortex-M0",
            0xC21 => "Cortex-M1",
            0xC23 => "Cortex-M3",
            0xC24 => "Cortex-M4",
            0xC27 => "Cortex-M7",
            0xC60 => "Cortex-M0+",
            0xD20 => "Cortex-M23",
            0xD21 => "Cortex-M33",
            0xD22 => "Cortex-M55",
            _ => return None,
        };

        Some(name)
    }
}

impl fmt::Display for CpuInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core_name() {
            Some(name) => write!(f, "{} r{}p{}", name, self.variant, self.revision),
            None => write!(
                f,
                "part {:#05x} by {:#04x} r{}p{}",
                self.part_number, self.implementer, self.variant, self.revision
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_cortex_m4() {
        let info = CpuInfo::from_cpuid(0x410F_C241);

        assert_eq!(
            info,
            CpuInfo {
                implementer: 0x41,
                variant: 0,
                part_number: 0xC24,
                revision: 1,
            }
        );
        assert_eq!(info.to_string(), "Cortex-M4 r0p1");
    }

    #[test]
    fn unknown_part() {
        let info = CpuInfo::from_cpuid(0x4E0F_0010);

        assert_eq!(info.core_name(), None);
        assert_eq!(info.to_string(), "part 0x001 by 0x4e r0p0");
    }

    #[test]
    fn register_names() {
        assert_eq!(RegisterId::PC.to_string(), "PC");
        assert_eq!(RegisterId::general_purpose(12), Some(RegisterId(12)));
        assert_eq!(RegisterId::general_purpose(13), None);
        assert_eq!(RegisterId(0x14).to_string(), "REGSEL 0x14");
    }
}
