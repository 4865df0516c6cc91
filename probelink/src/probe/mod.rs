//! Debug probes and their discovery.

pub mod cmsisdap;
#[cfg(any(test, feature = "test"))]
pub mod fake_probe;
pub mod list;
pub mod selector;

use crate::architecture::arm::{DapError, PortType, RawDapAccess};
use std::fmt;
use std::time::Duration;

pub use list::{Lister, ProbeLister};
pub use selector::{DebugProbeSelector, DebugProbeSelectorParseError};

use self::cmsisdap::CmsisDapError;

/// The wire protocol used between the probe and the target.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    /// Serial Wire Debug, ARM's two wire debug protocol.
    Swd,
    /// JTAG, IEEE 1149.1.
    Jtag,
}

impl fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WireProtocol::Swd => f.write_str("SWD"),
            WireProtocol::Jtag => f.write_str("JTAG"),
        }
    }
}

impl std::str::FromStr for WireProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_ascii_lowercase()[..] {
            "swd" => Ok(WireProtocol::Swd),
            "jtag" => Ok(WireProtocol::Jtag),
            _ => Err(format!(
                "'{s}' is not a valid protocol. Choose from [swd, jtag]."
            )),
        }
    }
}

/// This error occurs whenever the debug probe logic encounters an error while operating the relevant debug probe.
#[derive(thiserror::Error, Debug)]
pub enum DebugProbeError {
    /// Something went wrong while talking to the USB or HID device.
    #[error("USB Communication Error")]
    Usb(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The probe did not answer in time.
    #[error("Operation timed out")]
    Timeout,

    /// The probe could not be opened.
    #[error("Probe could not be created")]
    ProbeCouldNotBeCreated(#[from] ProbeCreationError),

    /// The selected wire protocol is not supported by the probe.
    #[error("Probe does not support protocol {0}")]
    UnsupportedProtocol(WireProtocol),

    /// The requested speed is not supported by the probe.
    #[error("The requested speed setting ({0} kHz) is not supported by the probe")]
    UnsupportedSpeed(u32),

    /// The operation requires an attached probe.
    #[error("You need to be attached to the target to perform this action")]
    NotAttached,

    /// The operation requires a detached probe.
    #[error("You need to be detached from the target to perform this action")]
    Attached,

    /// An error specific to CMSIS-DAP probes.
    #[error("An error specific to CMSIS-DAP probes occurred")]
    CmsisDap(#[from] CmsisDapError),

    /// The probe does not implement the requested command.
    #[error("Command not supported by probe")]
    CommandNotSupportedByProbe,

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An error which can occur while opening a probe.
#[derive(thiserror::Error, Debug)]
pub enum ProbeCreationError {
    /// No probe matching the selector was found.
    #[error("Probe was not found.")]
    NotFound,
    /// The device exists, but could not be opened.
    #[error("USB device could not be opened. Please check the permissions.")]
    CouldNotOpen,
    /// Error from the HID library.
    #[error("{0}")]
    HidApi(#[from] hidapi::HidError),
    /// Error from the USB library.
    #[error("{0}")]
    Rusb(#[from] rusb::Error),
    /// A probe specific error.
    #[error("An error specific to a probe type occurred: {0}")]
    ProbeSpecific(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The capability set every probe family implements.
///
/// A probe only moves bits. It does not retry, and it does not interpret
/// the register values it transfers.
pub trait DebugProbe: RawDapAccess + Send + fmt::Debug {
    /// Get human readable name for the probe.
    fn get_name(&self) -> &str;

    /// Get the currently used maximum speed for the debug protocol in kHz.
    fn speed_khz(&self) -> u32;

    /// Set the speed in kHz used for communication with the target device.
    ///
    /// Returns the speed which is actually used, which can be lower than requested.
    fn set_speed(&mut self, speed_khz: u32) -> Result<u32, DebugProbeError>;

    /// Connect to the target, using the selected protocol.
    fn attach(&mut self) -> Result<(), DebugProbeError>;

    /// Disconnect from the target.
    fn detach(&mut self) -> Result<(), DebugProbeError>;

    /// Hard-resets the target device through the reset pin.
    fn target_reset(&mut self) -> Result<(), DebugProbeError>;

    /// Selects the transport protocol to be used by the debug probe.
    fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), DebugProbeError>;

    /// The protocol in use, if one was selected.
    fn active_protocol(&self) -> Option<WireProtocol>;

    /// Puts the debug port state machine of the target into its reset state.
    ///
    /// For SWD this is the JTAG-to-SWD switch sequence surrounded by line resets,
    /// for JTAG the SWD-to-JTAG switch followed by a TAP reset.
    fn reset_line_state(&mut self) -> Result<(), DebugProbeError>;

    /// The firmware version reported by the probe, if known.
    fn firmware_version(&self) -> Option<&str> {
        None
    }

    /// How long to wait for the probe to answer a single command.
    fn set_transfer_timeout(&mut self, _timeout: Duration) {}
}

/// Information about a probe found on the bus, sufficient to open it.
#[derive(Clone)]
pub struct DebugProbeInfo {
    /// The name of the debug probe.
    pub identifier: String,
    /// The USB vendor ID of the debug probe.
    pub vendor_id: u16,
    /// The USB product ID of the debug probe.
    pub product_id: u16,
    /// The serial number of the debug probe.
    pub serial_number: Option<String>,
    /// A reference to the [`ProbeFactory`] that created this info object.
    pub probe_factory: &'static dyn ProbeFactory,
}

impl fmt::Debug for DebugProbeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (VID: {:04x}, PID: {:04x}, {}{})",
            self.identifier,
            self.vendor_id,
            self.product_id,
            self.serial_number
                .as_deref()
                .map_or(String::new(), |sn| format!("Serial: {sn}, ")),
            self.probe_factory
        )
    }
}

impl PartialEq for DebugProbeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.serial_number == other.serial_number
    }
}

impl DebugProbeInfo {
    /// Creates a new info struct that uniquely identifies a probe.
    pub fn new(
        identifier: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<String>,
        probe_factory: &'static dyn ProbeFactory,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            vendor_id,
            product_id,
            serial_number,
            probe_factory,
        }
    }

    /// Open the probe described by this `DebugProbeInfo`.
    pub fn open(&self) -> Result<Probe, DebugProbeError> {
        let probe = self.probe_factory.open(&DebugProbeSelector::from(self))?;
        Ok(Probe::from_specific_probe(probe))
    }
}

/// Opens and lists the probes of one probe family.
pub trait ProbeFactory: fmt::Debug + fmt::Display + Send + Sync {
    /// Open the probe matching the selector.
    ///
    /// Returns [`ProbeCreationError::NotFound`] if this family has no such probe.
    fn open(&self, selector: &DebugProbeSelector) -> Result<Box<dyn DebugProbe>, DebugProbeError>;

    /// List all probes of this family.
    fn list_probes(&self) -> Vec<DebugProbeInfo>;

    /// List the probes of this family which match the selector.
    fn list_probes_filtered(&self, selector: Option<&DebugProbeSelector>) -> Vec<DebugProbeInfo> {
        self.list_probes()
            .into_iter()
            .filter(|probe| selector.map_or(true, |s| s.matches_probe(probe)))
            .collect()
    }
}

/// An opened debug probe.
///
/// `Probe` wraps the probe specific implementation and tracks whether the
/// probe is attached to a target.
#[derive(Debug)]
pub struct Probe {
    inner: Box<dyn DebugProbe>,
    attached: bool,
}

impl Probe {
    /// Create a new probe from a probe specific implementation.
    pub fn new(probe: impl DebugProbe + 'static) -> Self {
        Self::from_specific_probe(Box::new(probe))
    }

    /// Create a new probe from an already boxed probe specific implementation.
    pub fn from_specific_probe(probe: Box<dyn DebugProbe>) -> Self {
        Probe {
            inner: probe,
            attached: false,
        }
    }

    /// Get human readable name for the probe.
    pub fn get_name(&self) -> String {
        self.inner.get_name().to_string()
    }

    /// The firmware version reported by the probe, if known.
    pub fn firmware_version(&self) -> Option<&str> {
        self.inner.firmware_version()
    }

    /// Connect to the target.
    #[tracing::instrument(skip(self))]
    pub fn attach(&mut self) -> Result<(), DebugProbeError> {
        self.inner.attach()?;
        self.attached = true;
        Ok(())
    }

    /// Disconnect from the target.
    ///
    /// Detaching a probe which is not attached does nothing.
    #[tracing::instrument(skip(self))]
    pub fn detach(&mut self) -> Result<(), DebugProbeError> {
        if !self.attached {
            return Ok(());
        }

        self.attached = false;
        self.inner.detach()
    }

    /// Returns true if the probe is attached to a target.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Selects the transport protocol to be used by the debug probe.
    pub fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), DebugProbeError> {
        if self.attached {
            return Err(DebugProbeError::Attached);
        }
        self.inner.select_protocol(protocol)
    }

    /// The protocol in use, if one was selected.
    pub fn protocol(&self) -> Option<WireProtocol> {
        self.inner.active_protocol()
    }

    /// Configure protocol speed to use in kHz.
    pub fn set_speed(&mut self, speed_khz: u32) -> Result<u32, DebugProbeError> {
        if self.attached {
            return Err(DebugProbeError::Attached);
        }
        self.inner.set_speed(speed_khz)
    }

    /// Configured protocol speed in kHz.
    pub fn speed_khz(&self) -> u32 {
        self.inner.speed_khz()
    }

    /// Limit the time the probe may take to answer a single command.
    pub fn set_transfer_timeout(&mut self, timeout: Duration) {
        self.inner.set_transfer_timeout(timeout)
    }

    /// Resets the target device through the reset pin.
    pub fn target_reset(&mut self) -> Result<(), DebugProbeError> {
        self.inner.target_reset()
    }

    /// Resets the line state of the active wire protocol.
    pub fn reset_line_state(&mut self) -> Result<(), DebugProbeError> {
        if !self.attached {
            return Err(DebugProbeError::NotAttached);
        }
        self.inner.reset_line_state()
    }
}

impl RawDapAccess for Probe {
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DapError> {
        self.inner.raw_read_register(port, addr)
    }

    fn raw_read_block(
        &mut self,
        port: PortType,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DapError> {
        self.inner.raw_read_block(port, addr, values)
    }

    fn raw_write_register(&mut self, port: PortType, addr: u8, value: u32) -> Result<(), DapError> {
        self.inner.raw_write_register(port, addr, value)
    }

    fn raw_write_block(&mut self, port: PortType, addr: u8, values: &[u32]) -> Result<(), DapError> {
        self.inner.raw_write_block(port, addr, values)
    }
}

#[cfg(test)]
mod test {
    use super::WireProtocol;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("swd", WireProtocol::Swd)]
    #[test_case("SWD", WireProtocol::Swd)]
    #[test_case("Jtag", WireProtocol::Jtag)]
    fn parse_wire_protocol(input: &str, expected: WireProtocol) {
        assert_eq!(input.parse::<WireProtocol>().unwrap(), expected);
    }

    #[test]
    fn unknown_wire_protocol() {
        assert!("spi".parse::<WireProtocol>().is_err());
    }
}
