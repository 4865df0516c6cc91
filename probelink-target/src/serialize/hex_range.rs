use serde::{ser::SerializeStruct, Deserialize, Deserializer, Serializer};
use std::ops::Range;

pub fn serialize<S>(memory_range: &Range<u64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let human_readable = serializer.is_human_readable();
    let mut state = serializer.serialize_struct("Range", 2)?;
    if human_readable {
        state.serialize_field("start", &format!("{:#x}", memory_range.start))?;
        state.serialize_field("end", &format!("{:#x}", memory_range.end))?;
    } else {
        state.serialize_field("start", &memory_range.start)?;
        state.serialize_field("end", &memory_range.end)?;
    }
    state.end()
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Range<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct HexRange {
        #[serde(deserialize_with = "super::hex_u_int::deserialize_u64")]
        start: u64,
        #[serde(deserialize_with = "super::hex_u_int::deserialize_u64")]
        end: u64,
    }

    let range = HexRange::deserialize(deserializer)?;
    if range.end < range.start {
        return Err(serde::de::Error::custom(format!(
            "range end {:#x} lies before its start {:#x}",
            range.end, range.start
        )));
    }
    Ok(range.start..range.end)
}
