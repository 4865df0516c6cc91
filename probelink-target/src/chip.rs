use crate::serialize::{deserialize_hex_option, deserialize_hex_u_int, hex_option, hex_u_int};
use crate::{CoreType, MemoryRegion};
use serde::{Deserialize, Serialize};

/// A single chip variant.
///
/// This describes an exact chip variant, including the cores, flash and memory size. For example,
/// the `nRF52832` chip has two variants, `nRF52832_xxAA` and `nRF52832_xxBB`. For this case,
/// the struct will correspond to one of the variants, e.g. `nRF52832_xxAA`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Chip {
    /// This is the name of the chip in base form, which doubles as its part number.
    pub name: String,
    /// The core type of the chip.
    pub core_type: CoreType,
    /// The JEP106 part number read from the ROM table, if known.
    #[serde(
        default,
        serialize_with = "hex_option",
        deserialize_with = "deserialize_hex_option"
    )]
    pub part: Option<u16>,
    /// Base address of the CoreSight ROM table. Read from the MEM-AP BASE register if omitted.
    #[serde(
        default,
        serialize_with = "hex_option",
        deserialize_with = "deserialize_hex_option"
    )]
    pub rom_table_base: Option<u64>,
    /// The memory regions available on the chip.
    pub memory_map: Vec<MemoryRegion>,
    /// Names of all flash algorithms available for this chip.
    #[serde(default)]
    pub flash_algorithms: Vec<String>,
    /// Named registers which are worth checking during bring-up.
    #[serde(default)]
    pub registers: Vec<RegisterDescription>,
}

/// A named, memory mapped register of a chip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegisterDescription {
    /// Name of the register, e.g. `SYSCON_STAT`.
    pub name: String,
    /// Absolute address of the register.
    #[serde(serialize_with = "hex_u_int", deserialize_with = "deserialize_hex_u_int")]
    pub address: u64,
    /// A short description of what the register holds.
    #[serde(default)]
    pub description: Option<String>,
}

impl Chip {
    /// Create a chip description without memory map or flash algorithms.
    pub fn generic_arm(name: &str, core_type: CoreType) -> Self {
        Chip {
            name: name.to_string(),
            core_type,
            part: None,
            rom_table_base: None,
            memory_map: vec![],
            flash_algorithms: vec![],
            registers: vec![],
        }
    }
}
