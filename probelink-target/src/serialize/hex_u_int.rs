use super::SerializeUnsignedInt;
use serde::{de, Deserializer, Serializer};
use std::fmt;

pub(crate) fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: SerializeUnsignedInt,
{
    // Addresses are much easier to read as hex in YAML, binary formats keep the number.
    if serializer.is_human_readable() {
        serializer.serialize_str(&format!("{value:#x}"))
    } else {
        value.serialize_int(serializer)
    }
}

pub(crate) fn serialize_option<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: SerializeUnsignedInt,
{
    match value {
        Some(value) if serializer.is_human_readable() => {
            serializer.serialize_some(&format!("{value:#x}"))
        }
        Some(value) => serializer.serialize_some(&Unsigned(value)),
        None => serializer.serialize_none(),
    }
}

struct Unsigned<'a, T>(&'a T);

impl<T: SerializeUnsignedInt> serde::Serialize for Unsigned<'_, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize_int(serializer)
    }
}

/// Accepts plain integers as well as `"0x"` prefixed hex strings.
pub(crate) fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value = deserializer.deserialize_any(UnsignedVisitor)?;
    T::try_from(value).map_err(|_| de::Error::custom(format!("{value:#x} is out of range")))
}

pub(crate) fn deserialize_option<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    #[derive(serde::Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_u64")] u64);

    let value: Option<Wrapper> = serde::Deserialize::deserialize(deserializer)?;
    value
        .map(|Wrapper(value)| {
            T::try_from(value)
                .map_err(|_| de::Error::custom(format!("{value:#x} is out of range")))
        })
        .transpose()
}

struct UnsignedVisitor;

impl<'de> de::Visitor<'de> for UnsignedVisitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "an unsigned integer or a hex string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative value {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let v = v.trim();
        let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
            None => v.replace('_', "").parse(),
        };
        parsed.map_err(|e| E::custom(format!("invalid number '{v}': {e}")))
    }
}

pub(crate) fn deserialize_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(UnsignedVisitor)
}
