//! Target description schema
//!
//! To program and debug a microcontroller, probelink needs to know a few things
//! about it: the core it carries, the layout of its memory, and the flash
//! algorithm that is able to erase and program its non-volatile memory.
//!
//! This crate contains the schema structs for the YAML target description files.
//! It performs no hardware access.
#![warn(missing_docs)]

mod chip;
mod chip_family;
mod flash_algorithm;
mod flash_properties;
mod memory;
pub(crate) mod serialize;

pub use chip::{Chip, RegisterDescription};
pub use chip_family::{ChipFamily, CoreType, TargetDescriptionSource};
pub use flash_algorithm::RawFlashAlgorithm;
pub use flash_properties::FlashProperties;
pub use memory::{
    GenericRegion, MemoryAccess, MemoryRange, MemoryRegion, NvmRegion, PageInfo, RamRegion,
    SectorDescription, SectorInfo,
};
