//! Session settings and target descriptions.
//!
//! [`SessionConfig`] holds everything that influences how a session talks to the
//! target. Target descriptions are loaded into a [`Registry`], which hands out
//! [`Target`]s.

mod registry;
mod target;

pub use registry::{Registry, RegistryError};
pub use target::Target;

pub use probelink_target::{
    Chip, ChipFamily, CoreType, FlashProperties, MemoryRange, MemoryRegion, NvmRegion, PageInfo,
    RamRegion, RawFlashAlgorithm, RegisterDescription, SectorDescription, SectorInfo,
    TargetDescriptionSource,
};

use crate::core::ResetStrategy;
use crate::probe::{DebugProbeSelector, WireProtocol};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// The probe to open. If not set, exactly one probe must be connected.
    pub probe: Option<DebugProbeSelector>,
    /// The wire protocol to use. If not set, the probe default is used.
    pub protocol: Option<WireProtocol>,
    /// The protocol speed in kHz. If not set, the probe default is used.
    pub speed_khz: Option<u32>,
    /// Settings for the individual DP/AP transfers.
    pub access: AccessConfig,
    /// How long to wait for the core to halt.
    #[serde(rename = "halt_timeout_ms", with = "duration_ms")]
    pub halt_timeout: Duration,
    /// How the core is reset.
    pub reset_strategy: ResetStrategy,
    /// Resume a halted core when the session is closed.
    pub resume_on_close: bool,
    /// Read back flashed data and compare it.
    pub verify_after_flash: bool,
    /// Nesting limit of the ROM table walk.
    pub rom_table_depth_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe: None,
            protocol: None,
            speed_khz: None,
            access: AccessConfig::default(),
            halt_timeout: Duration::from_millis(500),
            reset_strategy: ResetStrategy::default(),
            resume_on_close: true,
            verify_after_flash: true,
            rom_table_depth_limit: 8,
        }
    }
}

/// Settings for DP and AP register transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessConfig {
    /// How transfers answered with WAIT are retried.
    pub retry: RetryPolicy,
    /// How long to wait for an answer. This bounds every USB round trip to the
    /// probe as well as polls like the debug power-up.
    #[serde(rename = "transfer_timeout_ms", with = "duration_ms")]
    pub transfer_timeout: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            transfer_timeout: Duration::from_millis(100),
        }
    }
}

/// Bounded exponential backoff for transfers answered with WAIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// How often a transfer is repeated after a WAIT.
    pub max_retries: u32,
    /// The delay before the first retry.
    #[serde(rename = "initial_backoff_us", with = "duration_us")]
    pub initial_backoff: Duration,
    /// The delay doubles after every retry, up to this value.
    #[serde(rename = "max_backoff_us", with = "duration_us")]
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// The delay following `current`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff: Duration::from_micros(100),
            max_backoff: Duration::from_millis(50),
        }
    }
}

/// (De)serializes a [`Duration`] as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// (De)serializes a [`Duration`] as whole microseconds.
mod duration_us {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_config_uses_defaults() {
        let config: SessionConfig = serde_yaml::from_str(
            r#"
probe: "1366:0101:000123456"
protocol: swd
speed_khz: 4000
access:
  retry:
    max_retries: 3
"#,
        )
        .unwrap();

        let selector = config.probe.unwrap();
        assert_eq!(selector.vendor_id, 0x1366);
        assert_eq!(selector.serial_number.as_deref(), Some("000123456"));
        assert_eq!(config.protocol, Some(WireProtocol::Swd));
        assert_eq!(config.access.retry.max_retries, 3);
        assert_eq!(
            config.access.retry.initial_backoff,
            Duration::from_micros(100)
        );
        assert_eq!(config.halt_timeout, Duration::from_millis(500));
        assert_eq!(config.rom_table_depth_limit, 8);
    }

    #[test]
    fn durations_are_plain_numbers() {
        let config: AccessConfig = serde_yaml::from_str(
            r#"
transfer_timeout_ms: 250
retry:
  initial_backoff_us: 10
  max_backoff_us: 80
"#,
        )
        .unwrap();

        assert_eq!(config.transfer_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_backoff, Duration::from_micros(80));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<SessionConfig>("speed: 100").is_err());
    }

    #[test]
    fn serialized_durations_keep_their_units() {
        let value = serde_json::to_value(SessionConfig::default()).unwrap();

        assert_eq!(value["halt_timeout_ms"], 500);
        assert_eq!(value["access"]["transfer_timeout_ms"], 100);
        assert_eq!(value["access"]["retry"]["initial_backoff_us"], 100);
        assert_eq!(value["access"]["retry"]["max_backoff_us"], 50_000);
    }

    #[test]
    fn backoff_doubles_up_to_the_limit() {
        let policy = RetryPolicy {
            max_retries: 8,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(50),
        };

        let second = policy.next_backoff(policy.initial_backoff);
        assert_eq!(second, Duration::from_millis(40));
        assert_eq!(policy.next_backoff(second), Duration::from_millis(50));
    }
}
