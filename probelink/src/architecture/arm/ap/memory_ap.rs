//! Memory access port
//!
//! The memory AP can be used to access a memory-mapped
//! set of debug resources of the attached system.
use super::{define_ap, AccessPort, ApRegister, GenericAp};
use crate::architecture::arm::{dp::raw_register_conversions, Register};
use bitfield::bitfield;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

define_ap!(
    /// A MEM-AP, giving access to the memory-mapped resources of the target.
    MemoryAp
);

impl From<GenericAp> for MemoryAp {
    fn from(other: GenericAp) -> Self {
        MemoryAp::new(other.port_number())
    }
}

/// The unit of a single memory transfer, CSW.Size.
#[derive(Debug, Default, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    /// 1 byte transfers are supported.
    U8 = 0b000,
    /// 2 byte transfers are supported.
    U16 = 0b001,
    /// 4 byte transfers are supported.
    #[default]
    U32 = 0b010,
}

impl DataSize {
    /// The size in bytes.
    pub fn to_byte_count(self) -> u32 {
        match self {
            DataSize::U8 => 1,
            DataSize::U16 => 2,
            DataSize::U32 => 4,
        }
    }
}

/// The increment to the TAR that is performed after each DRW read or write, CSW.AddrInc.
#[derive(Debug, Default, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum AddressIncrement {
    /// No increments are happening after the DRW access. TAR always stays the same.
    Off = 0b00,
    /// Increments the TAR by the size of the access after each DRW access.
    #[default]
    Single = 0b01,
    /// Enables packed access to the DRW (see C2.2.7).
    Packed = 0b10,
}

/// The format of the BASE register.
#[derive(Debug, Default, PartialEq, Eq, Primitive, Clone, Copy)]
pub enum BaseaddrFormat {
    /// The legacy format of very old cores. Very little cores use this.
    #[default]
    Legacy = 0,
    /// The format all newer MCUs use.
    ADIv5 = 1,
}

bitfield! {
    /// CSW, the control and status word of a MEM-AP.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct CSW(u32);
    impl Debug;
    /// Allow debug software access.
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    /// Bus access protection, HPROT for AHB-APs.
    pub u8, prot, set_prot: 30, 24;
    /// Secure privileged debug is enabled.
    pub spiden, _: 23;
    /// Barrier and access mode.
    pub u8, mode, set_mode: 11, 8;
    /// A transfer is in progress.
    pub tr_in_prog, _: 7;
    /// The MEM-AP is able to issue transactions.
    pub device_en, _: 6;
    u8, raw_addr_inc, set_raw_addr_inc: 5, 4;
    u8, raw_size, set_raw_size: 2, 0;
}

impl CSW {
    /// HPROT: data access, privileged, bufferable.
    const DEFAULT_PROT: u8 = 0b010_0011;

    /// A CSW for accesses of `data_size` with single auto increment.
    pub fn new(data_size: DataSize) -> Self {
        let mut csw = CSW(0);
        csw.set_dbg_sw_enable(true);
        csw.set_prot(Self::DEFAULT_PROT);
        csw.set_addr_inc(AddressIncrement::Single);
        csw.set_size(data_size);
        csw
    }

    /// The configured transfer size. Reserved encodings are read as 32 bit.
    pub fn size(&self) -> DataSize {
        DataSize::from_u8(self.raw_size()).unwrap_or_default()
    }

    /// Set the transfer size.
    pub fn set_size(&mut self, size: DataSize) {
        self.set_raw_size(size as u8);
    }

    /// The configured address increment mode.
    pub fn addr_inc(&self) -> AddressIncrement {
        AddressIncrement::from_u8(self.raw_addr_inc()).unwrap_or(AddressIncrement::Off)
    }

    /// Set the address increment mode.
    pub fn set_addr_inc(&mut self, increment: AddressIncrement) {
        self.set_raw_addr_inc(increment as u8);
    }
}

impl Register for CSW {
    const ADDRESS: u8 = 0x00;
    const NAME: &'static str = "CSW";
}

/// TAR, the transfer address register of a MEM-AP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TAR {
    /// The address of the next DRW access.
    pub address: u32,
}

impl From<u32> for TAR {
    fn from(address: u32) -> Self {
        TAR { address }
    }
}

impl From<TAR> for u32 {
    fn from(register: TAR) -> Self {
        register.address
    }
}

impl Register for TAR {
    const ADDRESS: u8 = 0x04;
    const NAME: &'static str = "TAR";
}

/// DRW, the data read/write register of a MEM-AP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DRW {
    /// The data, as it appears on the byte lanes of the bus.
    pub data: u32,
}

impl From<u32> for DRW {
    fn from(data: u32) -> Self {
        DRW { data }
    }
}

impl From<DRW> for u32 {
    fn from(register: DRW) -> Self {
        register.data
    }
}

impl Register for DRW {
    const ADDRESS: u8 = 0x0C;
    const NAME: &'static str = "DRW";
}

bitfield! {
    /// BASE, the debug base address of a MEM-AP.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct BASE(u32);
    impl Debug;
    /// Bits 31:12 of the debug base address.
    pub u32, baseaddr, _: 31, 12;
    u8, raw_format, _: 1, 1;
    /// A debug entry is present.
    pub present, _: 0;
}

impl BASE {
    /// The format of this register.
    pub fn format(&self) -> BaseaddrFormat {
        BaseaddrFormat::from_u8(self.raw_format()).unwrap_or_default()
    }

    /// The debug base address, usually the address of the top level ROM table.
    ///
    /// Returns `None` if the access port does not declare a debug base.
    pub fn base_address(&self) -> Option<u64> {
        // All ones is the legacy encoding of "no debug entry".
        let legacy_absent = self.0 == 0xFFFF_FFFF;
        let absent = self.format() == BaseaddrFormat::ADIv5 && !self.present();

        if legacy_absent || absent {
            None
        } else {
            Some(u64::from(self.baseaddr()) << 12)
        }
    }
}

impl Register for BASE {
    const ADDRESS: u8 = 0xF8;
    const NAME: &'static str = "BASE";
}

raw_register_conversions!(CSW, BASE);

impl ApRegister<MemoryAp> for CSW {}
impl ApRegister<MemoryAp> for TAR {}
impl ApRegister<MemoryAp> for DRW {}
impl ApRegister<MemoryAp> for BASE {}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn csw_for_word_access() {
        let csw = CSW::new(DataSize::U32);

        assert_eq!(u32::from(csw), 0xA300_0012);
        assert_eq!(csw.size(), DataSize::U32);
        assert_eq!(csw.addr_inc(), AddressIncrement::Single);
    }

    #[test]
    fn csw_for_byte_access() {
        assert_eq!(u32::from(CSW::new(DataSize::U8)), 0xA300_0010);
    }

    #[test]
    fn base_with_rom_table() {
        let base = BASE(0xE00F_F003);

        assert_eq!(base.format(), BaseaddrFormat::ADIv5);
        assert_eq!(base.base_address(), Some(0xE00F_F000));
    }

    #[test]
    fn base_without_debug_entry() {
        assert_eq!(BASE(0xFFFF_FFFF).base_address(), None);
        assert_eq!(BASE(0xE00F_F002).base_address(), None);
    }
}
