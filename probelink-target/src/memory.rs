use crate::serialize::{deserialize_hex_range, deserialize_hex_u_int, hex_range, hex_u_int};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Flash or other non-volatile memory, programmed with a flash algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NvmRegion {
    /// Name of the region in diagnostics, like `FLASH` or `BANK1`.
    #[serde(default)]
    pub name: Option<String>,
    /// The addresses the region occupies.
    #[serde(serialize_with = "hex_range", deserialize_with = "deserialize_hex_range")]
    pub range: Range<u64>,
    /// The region mirrors another one and is never programmed itself.
    #[serde(default)]
    pub is_alias: bool,
    /// Permissions of the region, see [`NvmRegion::access`].
    #[serde(default)]
    pub access: Option<MemoryAccess>,
}

impl NvmRegion {
    /// The permissions of the region, everything is allowed if none are given.
    pub fn access(&self) -> MemoryAccess {
        self.access.unwrap_or_default()
    }
}

fn default_true() -> bool {
    true
}

/// What the core may do with a region. Omitted flags default to allowed, except `boot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryAccess {
    /// The debugger may read the region.
    #[serde(default = "default_true")]
    pub read: bool,
    /// The debugger may write the region directly.
    #[serde(default = "default_true")]
    pub write: bool,
    /// Code, like a flash algorithm, can run from the region.
    #[serde(default = "default_true")]
    pub execute: bool,
    /// The chip boots from this region.
    #[serde(default)]
    pub boot: bool,
}

impl Default for MemoryAccess {
    fn default() -> Self {
        MemoryAccess {
            read: true,
            write: true,
            execute: true,
            boot: false,
        }
    }
}

/// RAM, which also hosts flash algorithms while they run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RamRegion {
    /// Name of the region in diagnostics, like `SRAM1`.
    #[serde(default)]
    pub name: Option<String>,
    /// The addresses the region occupies.
    #[serde(serialize_with = "hex_range", deserialize_with = "deserialize_hex_range")]
    pub range: Range<u64>,
    /// Permissions of the region, see [`RamRegion::access`].
    #[serde(default)]
    pub access: Option<MemoryAccess>,
}

impl RamRegion {
    /// The permissions of the region, everything is allowed if none are given.
    pub fn access(&self) -> MemoryAccess {
        self.access.unwrap_or_default()
    }

    /// Flash algorithms are only loaded into executable RAM.
    pub fn is_executable(&self) -> bool {
        self.access().execute
    }
}

/// A memory mapped region which is neither RAM nor flash, e.g. a peripheral block.
///
/// The flash loader rejects data for these regions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericRegion {
    /// Name of the peripheral block.
    #[serde(default)]
    pub name: Option<String>,
    /// The addresses the block occupies.
    #[serde(serialize_with = "hex_range", deserialize_with = "deserialize_hex_range")]
    pub range: Range<u64>,
    /// Permissions of the block.
    #[serde(default)]
    pub access: Option<MemoryAccess>,
}

/// The smallest unit the flash can be erased in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SectorInfo {
    /// First address of the sector.
    pub base_address: u64,
    /// Sector size in bytes.
    pub size: u64,
}

impl SectorInfo {
    /// The addresses the sector covers.
    pub fn address_range(&self) -> Range<u64> {
        self.base_address..self.base_address + self.size
    }
}

/// A run of equally sized sectors in [`FlashProperties::sectors`](crate::FlashProperties::sectors).
///
/// The run starts `address` bytes into the flash and lasts until the next
/// description, or the end of the flash.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorDescription {
    /// The size of every sector of the run.
    #[serde(serialize_with = "hex_u_int", deserialize_with = "deserialize_hex_u_int")]
    pub size: u64,
    /// Offset of the run from the start of the flash.
    #[serde(serialize_with = "hex_u_int", deserialize_with = "deserialize_hex_u_int")]
    pub address: u64,
}

/// The unit the flash algorithm programs at once, through the page buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// First address of the page.
    pub base_address: u64,
    /// Page size in bytes.
    pub size: u32,
}

impl PageInfo {
    /// The addresses the page covers.
    pub fn address_range(&self) -> Range<u64> {
        self.base_address..self.base_address + self.size as u64
    }
}

/// Containment and overlap checks between address ranges.
pub trait MemoryRange {
    /// `range` is not empty and lies completely inside `self`.
    fn contains_range(&self, range: &Range<u64>) -> bool;

    /// `self` and `range` share at least one address.
    fn intersects_range(&self, range: &Range<u64>) -> bool;
}

impl MemoryRange for Range<u64> {
    fn contains_range(&self, range: &Range<u64>) -> bool {
        !range.is_empty() && self.contains(&range.start) && self.contains(&(range.end - 1))
    }

    fn intersects_range(&self, range: &Range<u64>) -> bool {
        !range.is_empty() && !self.is_empty() && self.start < range.end && range.start < self.end
    }
}

/// One entry of the memory map of a chip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryRegion {
    /// Random access memory.
    Ram(RamRegion),
    /// Anything else, mostly peripherals.
    Generic(GenericRegion),
    /// Flash, EEPROM and the like.
    #[serde(alias = "Flash")]
    Nvm(NvmRegion),
}

impl MemoryRegion {
    /// The region, if it is RAM.
    pub fn as_ram_region(&self) -> Option<&RamRegion> {
        match self {
            MemoryRegion::Ram(region) => Some(region),
            _ => None,
        }
    }

    /// The region, if it is non-volatile memory.
    pub fn as_nvm_region(&self) -> Option<&NvmRegion> {
        match self {
            MemoryRegion::Nvm(region) => Some(region),
            _ => None,
        }
    }

    /// The addresses the region occupies.
    pub fn address_range(&self) -> Range<u64> {
        match self {
            MemoryRegion::Ram(region) => region.range.clone(),
            MemoryRegion::Generic(region) => region.range.clone(),
            MemoryRegion::Nvm(region) => region.range.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn contains_range() {
        let range = 0..4;
        assert!(range.contains_range(&(0..1)));
        assert!(range.contains_range(&(0..4)));
        assert!(!range.contains_range(&(0..5)));
        assert!(!range.contains_range(&(4..5)));
    }

    #[test]
    fn empty_range_is_never_contained() {
        assert!(!(0..4).contains_range(&(0..0)));
    }

    #[test]
    fn intersects_range() {
        let range = 4..8;
        assert!(range.intersects_range(&(3..5)));
        assert!(range.intersects_range(&(7..9)));
        assert!(range.intersects_range(&(0..16)));
        assert!(range.intersects_range(&(5..6)));
        assert!(!range.intersects_range(&(0..4)));
        assert!(!range.intersects_range(&(8..9)));
        assert!(!range.intersects_range(&(5..5)));
    }

    #[test]
    fn region_from_yaml() {
        let yaml = r#"
- !Nvm
  name: Flash
  range:
    start: 0x08000000
    end: 0x08010000
  access:
    boot: true
- !Ram
  range:
    start: "0x20000000"
    end: 0x20004000
"#;
        let regions: Vec<MemoryRegion> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].address_range(), 0x0800_0000..0x0801_0000);
        assert!(regions[0].as_nvm_region().unwrap().access().boot);
        assert_eq!(regions[1].address_range(), 0x2000_0000..0x2000_4000);
        assert!(regions[1].as_ram_region().unwrap().is_executable());
    }
}
