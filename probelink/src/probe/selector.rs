//! Selecting a probe by its USB IDs and serial number.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::probe::DebugProbeInfo;

/// Describes which probe should be opened when more than one is attached.
///
/// The string form is `VID:PID[:SERIAL]`, with VID and PID given as hexadecimal numbers.
///
/// ```
/// let selector: probelink::probe::DebugProbeSelector = "c251:f002:0815".parse().unwrap();
///
/// assert_eq!(selector.vendor_id, 0xc251);
/// assert_eq!(selector.product_id, 0xf002);
/// assert_eq!(selector.serial_number.as_deref(), Some("0815"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugProbeSelector {
    /// The USB vendor id of the debug probe to be used.
    pub vendor_id: u16,
    /// The USB product id of the debug probe to be used.
    pub product_id: u16,
    /// The serial number of the debug probe to be used.
    pub serial_number: Option<String>,
}

impl DebugProbeSelector {
    /// Check if the given probe info matches this selector.
    pub fn matches_probe(&self, info: &DebugProbeInfo) -> bool {
        self.matches(
            info.vendor_id,
            info.product_id,
            info.serial_number.as_deref(),
        )
    }

    pub(crate) fn matches(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
    ) -> bool {
        vendor_id == self.vendor_id
            && product_id == self.product_id
            && self
                .serial_number
                .as_deref()
                .map(|wanted| match serial_number {
                    Some(serial_number) => serial_number == wanted,
                    // "VID:PID:" selects probes without a serial number
                    None => wanted.is_empty(),
                })
                .unwrap_or(true)
    }
}

impl std::str::FromStr for DebugProbeSelector {
    type Err = DebugProbeSelectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Serial numbers may contain colons themselves.
        let mut split = s.splitn(3, ':');

        let vendor_id = split.next().ok_or(DebugProbeSelectorParseError::Format)?;
        let product_id = split.next().ok_or(DebugProbeSelectorParseError::Format)?;
        let serial_number = split.next().map(|s| s.to_string());

        Ok(DebugProbeSelector {
            vendor_id: u16::from_str_radix(vendor_id, 16)?,
            product_id: u16::from_str_radix(product_id, 16)?,
            serial_number,
        })
    }
}

impl From<&DebugProbeInfo> for DebugProbeSelector {
    fn from(info: &DebugProbeInfo) -> Self {
        DebugProbeSelector {
            vendor_id: info.vendor_id,
            product_id: info.product_id,
            serial_number: info.serial_number.clone(),
        }
    }
}

impl From<DebugProbeInfo> for DebugProbeSelector {
    fn from(info: DebugProbeInfo) -> Self {
        DebugProbeSelector::from(&info)
    }
}

impl fmt::Display for DebugProbeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(ref sn) = self.serial_number {
            write!(f, ":{sn}")?;
        }
        Ok(())
    }
}

impl Serialize for DebugProbeSelector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'a> Deserialize<'a> for DebugProbeSelector {
    fn deserialize<D>(deserializer: D) -> Result<DebugProbeSelector, D::Error>
    where
        D: Deserializer<'a>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An error which can occur while parsing a [`DebugProbeSelector`].
#[derive(thiserror::Error, Debug)]
pub enum DebugProbeSelectorParseError {
    /// The VID or PID is not a hexadecimal number.
    #[error("Could not parse VID or PID: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    /// The selector does not have the `VID:PID` form.
    #[error("The format of the selector is invalid. Please use a string in the form `VID:PID:<Serial>`, where Serial is optional.")]
    Format,
}
