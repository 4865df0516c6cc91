//! Generic access port
use super::{define_ap, AccessPort, ApRegister, MemoryAp};
use crate::architecture::arm::{dp::raw_register_conversions, Register};
use bitfield::bitfield;
use enum_primitive_derive::Primitive;
use jep106::JEP106Code;
use num_traits::FromPrimitive;

define_ap!(
    /// A generic access port which implements just the register every access port has to implement
    /// to be compliant with the ADI 5.2 specification.
    GenericAp
);

impl From<MemoryAp> for GenericAp {
    fn from(other: MemoryAp) -> Self {
        GenericAp::new(other.port_number())
    }
}

/// Defines the different access port classes.
#[derive(Debug, Default, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum ApClass {
    /// This describes a custom AP that is vendor defined and not defined by ARM
    #[default]
    Undefined = 0b0000,
    /// The standard ARM COM-AP defined in the [ARM Debug Interface v5 Architecture Specification](https://developer.arm.com/documentation/ihi0031/d/).
    ComAp = 0b0001,
    /// The standard ARM MEM-AP defined in the [ARM Debug Interface v5 Architecture Specification](https://developer.arm.com/documentation/ihi0031/d/)
    MemAp = 0b1000,
}

/// The type of AP defined in the [ARM Debug Interface v5 Architecture Specification](https://developer.arm.com/documentation/ihi0031/d/).
#[derive(Debug, Default, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum ApType {
    /// This is the most basic AP that is included in the spec.
    #[default]
    JtagComAp = 0x0,
    /// A AMBA based AHB3 AP (see E1.5).
    AmbaAhb3 = 0x1,
    /// A AMBA based APB2 and APB3 AP (see E1.8).
    AmbaApb2Apb3 = 0x2,
    /// A AMBA based AXI3 and AXI4 AP (see E1.2).
    AmbaAxi3Axi4 = 0x4,
    /// A AMBA based AHB5 AP (see E1.6).
    AmbaAhb5 = 0x5,
    /// A AMBA based APB4 and APB5 AP (see E1.9).
    AmbaApb4Apb5 = 0x6,
    /// A AMBA based AXI5 AP (see E1.4).
    AmbaAxi5 = 0x7,
    /// A AMBA based AHB5 AP with enhanced HPROT (see E1.7).
    AmbaAhb5Hprot = 0x8,
}

bitfield! {
    /// IDR, the identification register every access port implements.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct IDR(u32);
    impl Debug;
    /// Revision of the access port design.
    pub u8, revision, _: 31, 28;
    u8, jep_cc, _: 27, 24;
    u8, jep_id, _: 23, 17;
    u8, raw_class, _: 16, 13;
    /// Variant of the access port type.
    pub u8, variant, _: 7, 4;
    u8, raw_type, _: 3, 0;
}

impl IDR {
    /// The designer of the access port.
    pub fn designer(&self) -> JEP106Code {
        JEP106Code::new(self.jep_cc(), self.jep_id())
    }

    /// The class of the access port, [`ApClass::Undefined`] for unknown values.
    pub fn class(&self) -> ApClass {
        ApClass::from_u8(self.raw_class()).unwrap_or_default()
    }

    /// The bus type of the access port, [`ApType::JtagComAp`] for unknown values.
    pub fn ap_type(&self) -> ApType {
        ApType::from_u8(self.raw_type()).unwrap_or_default()
    }

    /// An IDR of zero means there is no access port at this index.
    pub fn is_present(&self) -> bool {
        self.0 != 0
    }
}

impl Register for IDR {
    const ADDRESS: u8 = 0xFC;
    const NAME: &'static str = "IDR";
}

raw_register_conversions!(IDR);

impl ApRegister<GenericAp> for IDR {}
impl ApRegister<MemoryAp> for IDR {}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_ahb_ap_idr() {
        // AHB-AP of a Cortex-M4
        let idr = IDR(0x2477_0011);

        assert_eq!(idr.revision(), 2);
        assert_eq!(idr.designer(), JEP106Code::new(4, 0x3b));
        assert_eq!(idr.class(), ApClass::MemAp);
        assert_eq!(idr.ap_type(), ApType::AmbaAhb3);
        assert_eq!(idr.variant(), 1);
    }

    #[test]
    fn zero_idr_is_absent() {
        assert!(!IDR(0).is_present());
    }
}
