//! Access ports and their registers.
mod generic_ap;
mod memory_ap;

pub use generic_ap::{ApClass, ApType, GenericAp, IDR};
pub use memory_ap::{AddressIncrement, BaseaddrFormat, DataSize, MemoryAp, BASE, CSW, DRW, TAR};

use super::Register;

/// The index of an access port, as selected by `SELECT.APSEL`.
pub trait AccessPort {
    /// Zero-based number of the access port.
    fn port_number(&self) -> u8;
}

/// A register of the access port `PORT`.
pub trait ApRegister<PORT: AccessPort>: Register + Sized {}

/// Defines a plain access port type, which only carries its port number.
macro_rules! define_ap {
    ($(#[$outer:meta])* $name:ident) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        pub struct $name {
            port_number: u8,
        }

        impl $name {
            #[doc = concat!("Creates a new ", stringify!($name), " with port number `port_number`.")]
            pub const fn new(port_number: u8) -> Self {
                Self { port_number }
            }
        }

        impl $crate::architecture::arm::ap::AccessPort for $name {
            fn port_number(&self) -> u8 {
                self.port_number
            }
        }

        impl From<u8> for $name {
            fn from(port_number: u8) -> Self {
                Self::new(port_number)
            }
        }
    };
}

pub(crate) use define_ap;
