use super::flash_properties::FlashProperties;
use crate::serialize::{deserialize_hex_option, hex_option};

use base64::{engine::general_purpose as base64_engine, Engine as _};
use serde::{Deserialize, Serialize};

/// The raw flash algorithm is the description of a flash algorithm,
/// and is usually read from a target description file.
///
/// The entry points are offsets into `instructions`. Before the algorithm
/// can be executed it has to be assembled for a RAM region of the target,
/// which fixes all absolute addresses.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawFlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// The description of the algorithm.
    #[serde(default)]
    pub description: String,
    /// Whether this flash algorithm is the default one or not.
    #[serde(default)]
    pub default: bool,
    /// The position independent code of the algorithm, base64 encoded in the description file.
    #[serde(deserialize_with = "deserialize", serialize_with = "serialize")]
    pub instructions: Vec<u8>,
    /// Address in RAM to load the algorithm to. The start of the RAM region is used if omitted.
    #[serde(
        default,
        serialize_with = "hex_option",
        deserialize_with = "deserialize_hex_option"
    )]
    pub load_address: Option<u64>,
    /// Offset of the `Init()` entry point. Optional.
    #[serde(default)]
    pub pc_init: Option<u32>,
    /// Offset of the `UnInit()` entry point. Optional.
    #[serde(default)]
    pub pc_uninit: Option<u32>,
    /// Offset of the `ProgramPage()` entry point.
    pub pc_program_page: u32,
    /// Offset of the `EraseSector()` entry point.
    pub pc_erase_sector: u32,
    /// Offset of the `EraseAll()` entry point. Optional.
    #[serde(default)]
    pub pc_erase_all: Option<u32>,
    /// The offset from the start of the instructions to the data section.
    pub data_section_offset: u32,
    /// Size of the stack the algorithm needs. A default of 512 bytes is used if omitted.
    #[serde(default)]
    pub stack_size: Option<u32>,
    /// The properties of the flash on the device.
    pub flash_properties: FlashProperties,
}

fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&base64_engine::STANDARD.encode(bytes))
}

fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Base64Visitor;

    impl serde::de::Visitor<'_> for Base64Visitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "base64 ASCII text")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            // Long blobs are usually wrapped over several lines.
            let compact: String = v.split_whitespace().collect();
            base64_engine::STANDARD
                .decode(compact)
                .map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_str(Base64Visitor)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn instructions_are_base64() {
        let yaml = r#"
name: test-algo
instructions: AQIDBAUGBwg=
pc_init: 0x0
pc_program_page: 0x10
pc_erase_sector: 0x20
data_section_offset: 0x40
flash_properties:
  address_range:
    start: 0x0
    end: 0x1000
  page_size: 0x100
  erased_byte_value: 0xff
  program_page_timeout: 100
  erase_sector_timeout: 500
  sectors:
    - size: 0x400
      address: 0x0
"#;
        let algorithm: RawFlashAlgorithm = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(algorithm.instructions, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(algorithm.pc_init, Some(0));
        assert_eq!(algorithm.pc_uninit, None);
        assert_eq!(algorithm.load_address, None);
        assert_eq!(algorithm.flash_properties.page_size, 0x100);
        assert_eq!(algorithm.flash_properties.sectors[0].size, 0x400);
    }

    #[test]
    fn round_trips_through_yaml() {
        let algorithm = RawFlashAlgorithm {
            name: "roundtrip".into(),
            instructions: vec![0xde, 0xad, 0xbe, 0xef],
            load_address: Some(0x2000_0000),
            pc_program_page: 4,
            pc_erase_sector: 8,
            data_section_offset: 12,
            flash_properties: FlashProperties {
                address_range: 0x0800_0000..0x0801_0000,
                page_size: 256,
                erased_byte_value: 0xff,
                program_page_timeout: 10,
                erase_sector_timeout: 20,
                sectors: vec![],
            },
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&algorithm).unwrap();
        let parsed: RawFlashAlgorithm = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed, algorithm);
    }
}
