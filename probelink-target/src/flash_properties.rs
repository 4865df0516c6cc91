use super::memory::SectorDescription;
use crate::serialize::{deserialize_hex_range, deserialize_hex_u_int, hex_range, hex_u_int};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Geometry and timing of the flash a flash algorithm programs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct FlashProperties {
    /// The addresses the algorithm can program.
    #[serde(serialize_with = "hex_range", deserialize_with = "deserialize_hex_range")]
    pub address_range: Range<u64>,
    /// Bytes written by one `ProgramPage` call.
    #[serde(serialize_with = "hex_u_int", deserialize_with = "deserialize_hex_u_int")]
    pub page_size: u32,
    /// Content of an erased byte, usually `0xFF`.
    #[serde(serialize_with = "hex_u_int", deserialize_with = "deserialize_hex_u_int")]
    pub erased_byte_value: u8,
    /// Upper bound for one `ProgramPage` call, in milliseconds.
    pub program_page_timeout: u32,
    /// Upper bound for one `EraseSector` call, in milliseconds.
    pub erase_sector_timeout: u32,
    /// Runs of equally sized sectors, ordered by address.
    #[serde(default)]
    pub sectors: Vec<SectorDescription>,
}
