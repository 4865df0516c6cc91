//! Finding and opening the connected probes.

use crate::probe::{
    cmsisdap, DebugProbeError, DebugProbeInfo, DebugProbeSelector, Probe, ProbeCreationError,
    ProbeFactory,
};

/// Lists and opens probes through a [`ProbeLister`].
///
/// [`Lister::new`] searches the USB bus for CMSIS-DAP probes. Tests hand in
/// their own lister with [`Lister::with_lister`].
#[derive(Debug)]
pub struct Lister {
    lister: Box<dyn ProbeLister>,
}

impl Lister {
    /// A lister for all probes the built-in drivers support.
    pub fn new() -> Self {
        Self::with_lister(Box::new(UsbProbeLister))
    }

    /// A lister which delegates to `lister`.
    pub fn with_lister(lister: Box<dyn ProbeLister>) -> Self {
        Self { lister }
    }

    /// Open the first probe matching `selector`.
    pub fn open(&self, selector: impl Into<DebugProbeSelector>) -> Result<Probe, DebugProbeError> {
        self.lister.open(&selector.into())
    }

    /// Every probe which is connected.
    pub fn list_all(&self) -> Vec<DebugProbeInfo> {
        self.lister.list_all()
    }

    /// The connected probes matching `selector`, or all of them without one.
    pub fn list(&self, selector: Option<&DebugProbeSelector>) -> Vec<DebugProbeInfo> {
        self.lister.list(selector)
    }
}

impl Default for Lister {
    fn default() -> Self {
        Self::new()
    }
}

/// A source of probes.
pub trait ProbeLister: std::fmt::Debug + Send + Sync {
    /// Open the first probe matching `selector`.
    fn open(&self, selector: &DebugProbeSelector) -> Result<Probe, DebugProbeError>;

    /// Every probe this lister knows about.
    fn list_all(&self) -> Vec<DebugProbeInfo> {
        self.list(None)
    }

    /// The probes matching `selector`, or all of them without one.
    fn list(&self, selector: Option<&DebugProbeSelector>) -> Vec<DebugProbeInfo>;
}

/// Searches the USB bus with every built-in driver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UsbProbeLister;

impl UsbProbeLister {
    const DRIVERS: &'static [&'static dyn ProbeFactory] = &[&cmsisdap::CmsisDapFactory];
}

impl ProbeLister for UsbProbeLister {
    fn open(&self, selector: &DebugProbeSelector) -> Result<Probe, DebugProbeError> {
        let mut last_error = None;

        for driver in Self::DRIVERS {
            match driver.open(selector) {
                Ok(probe) => return Ok(Probe::from_specific_probe(probe)),
                // Not this driver's probe, ask the next one.
                Err(DebugProbeError::ProbeCouldNotBeCreated(ProbeCreationError::NotFound)) => {}
                Err(error) => {
                    tracing::debug!("{} could not open {}: {}", driver, selector, error);
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(DebugProbeError::ProbeCouldNotBeCreated(
            ProbeCreationError::NotFound,
        )))
    }

    fn list(&self, selector: Option<&DebugProbeSelector>) -> Vec<DebugProbeInfo> {
        Self::DRIVERS
            .iter()
            .flat_map(|driver| driver.list_probes_filtered(selector))
            .collect()
    }
}
