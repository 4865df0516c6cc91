//! Types and functions for interacting with target memory.

mod adi_memory_interface;
pub mod romtable;

pub use adi_memory_interface::ADIMemoryInterface;
pub use romtable::{
    ComponentClass, PeripheralId, RomTableEntry, RomTableError, RomTableWalker,
};
