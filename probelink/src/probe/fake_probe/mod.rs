//! A simulated probe and target, for tests and dry runs.
#![allow(missing_docs)] // Don't require docs for test code

mod flash;
mod target;

pub use flash::{fake_chip_family, fake_flash_algorithm, FakeRoutine, RoutineCall};
pub use target::FakeTarget;

use crate::architecture::arm::{DapError, PortType, RawDapAccess};
use crate::probe::{
    DebugProbe, DebugProbeError, DebugProbeInfo, DebugProbeSelector, Probe, ProbeCreationError,
    ProbeFactory, ProbeLister, WireProtocol,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A probe connected to a [`FakeTarget`].
///
/// The target is shared, so tests can inspect and manipulate it while
/// the probe is owned by a session.
#[derive(Debug)]
pub struct FakeProbe {
    protocol: Option<WireProtocol>,
    speed: u32,
    target: Arc<Mutex<FakeTarget>>,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProbe {
    /// A probe connected to a [`FakeTarget::cortex_m4`].
    pub fn new() -> Self {
        Self::with_target(FakeTarget::cortex_m4())
    }

    pub fn with_target(target: FakeTarget) -> Self {
        Self::with_shared_target(Arc::new(Mutex::new(target)))
    }

    pub fn with_shared_target(target: Arc<Mutex<FakeTarget>>) -> Self {
        Self {
            protocol: None,
            speed: 1000,
            target,
        }
    }

    /// The simulated target behind this probe.
    pub fn target(&self) -> Arc<Mutex<FakeTarget>> {
        self.target.clone()
    }
}

impl DebugProbe for FakeProbe {
    fn get_name(&self) -> &str {
        "Fake probe for testing"
    }

    fn speed_khz(&self) -> u32 {
        self.speed
    }

    fn set_speed(&mut self, speed_khz: u32) -> Result<u32, DebugProbeError> {
        if speed_khz == 0 {
            return Err(DebugProbeError::UnsupportedSpeed(speed_khz));
        }
        self.speed = speed_khz;
        Ok(speed_khz)
    }

    fn attach(&mut self) -> Result<(), DebugProbeError> {
        self.target.lock().attach_count += 1;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), DebugProbeError> {
        self.target.lock().detach_count += 1;
        Ok(())
    }

    fn target_reset(&mut self) -> Result<(), DebugProbeError> {
        Err(DebugProbeError::CommandNotSupportedByProbe)
    }

    fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), DebugProbeError> {
        self.protocol = Some(protocol);
        Ok(())
    }

    fn active_protocol(&self) -> Option<WireProtocol> {
        self.protocol
    }

    fn reset_line_state(&mut self) -> Result<(), DebugProbeError> {
        Ok(())
    }

    fn set_transfer_timeout(&mut self, timeout: Duration) {
        self.target.lock().transfer_timeout = Some(timeout);
    }
}

impl RawDapAccess for FakeProbe {
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DapError> {
        self.target.lock().read_register(port, addr)
    }

    fn raw_read_block(
        &mut self,
        port: PortType,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DapError> {
        self.target.lock().read_block(port, addr, values)
    }

    fn raw_write_register(&mut self, port: PortType, addr: u8, value: u32) -> Result<(), DapError> {
        self.target.lock().write_register(port, addr, value)
    }

    fn raw_write_block(&mut self, port: PortType, addr: u8, values: &[u32]) -> Result<(), DapError> {
        self.target.lock().write_block(port, addr, values)
    }
}

/// The factory referenced by the [`DebugProbeInfo`]s of [`FakeLister`].
#[derive(Debug)]
pub struct FakeProbeFactory;

impl fmt::Display for FakeProbeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fake")
    }
}

impl ProbeFactory for FakeProbeFactory {
    fn open(&self, _selector: &DebugProbeSelector) -> Result<Box<dyn DebugProbe>, DebugProbeError> {
        // Fake probes can only be opened through a `FakeLister`, which owns the targets.
        Err(DebugProbeError::ProbeCouldNotBeCreated(
            ProbeCreationError::NotFound,
        ))
    }

    fn list_probes(&self) -> Vec<DebugProbeInfo> {
        vec![]
    }
}

/// A lister for a fixed set of fake probes.
#[derive(Debug)]
pub struct FakeLister {
    probes: Vec<(DebugProbeInfo, Arc<Mutex<FakeTarget>>)>,
}

impl FakeLister {
    pub const VENDOR_ID: u16 = 0x1209;
    pub const PRODUCT_ID: u16 = 0xFA4E;

    /// `count` fake probes with the serial numbers `FAKE0`, `FAKE1`, ...
    pub fn new(count: usize) -> Self {
        let probes = (0..count)
            .map(|index| {
                let info = DebugProbeInfo::new(
                    "Fake probe",
                    Self::VENDOR_ID,
                    Self::PRODUCT_ID,
                    Some(format!("FAKE{index}")),
                    &FakeProbeFactory,
                );
                (info, Arc::new(Mutex::new(FakeTarget::cortex_m4())))
            })
            .collect();

        Self { probes }
    }

    /// The target behind the probe with the given index.
    pub fn target(&self, index: usize) -> Option<Arc<Mutex<FakeTarget>>> {
        self.probes.get(index).map(|(_, target)| target.clone())
    }
}

impl ProbeLister for FakeLister {
    fn open(&self, selector: &DebugProbeSelector) -> Result<Probe, DebugProbeError> {
        self.probes
            .iter()
            .find(|(info, _)| selector.matches_probe(info))
            .map(|(_, target)| Probe::new(FakeProbe::with_shared_target(target.clone())))
            .ok_or(DebugProbeError::ProbeCouldNotBeCreated(
                ProbeCreationError::NotFound,
            ))
    }

    fn list(&self, selector: Option<&DebugProbeSelector>) -> Vec<DebugProbeInfo> {
        self.probes
            .iter()
            .map(|(info, _)| info)
            .filter(|info| selector.map_or(true, |selector| selector.matches_probe(info)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lister_filters_by_serial() {
        let lister = FakeLister::new(2);
        let selector: DebugProbeSelector = "1209:fa4e:FAKE1".parse().unwrap();

        let probes = lister.list(Some(&selector));
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].serial_number.as_deref(), Some("FAKE1"));
        assert_eq!(lister.list_all().len(), 2);
    }

    #[test]
    fn routines_run_until_the_breakpoint() {
        let mut target = FakeTarget::cortex_m4();
        target.write_bytes(0x2000_0000, &fake_flash_algorithm().instructions);
        target.write_bytes(0x2000_1000, &[0x12, 0x34, 0x56, 0x78]);

        let probe = FakeProbe::with_target(target);
        let target = probe.target();
        let mut target = target.lock();

        target.core.registers[0] = 0x0800_0010;
        target.core.registers[1] = 4;
        target.core.registers[2] = 0x2000_1000;
        target.core.registers[14] = 0x2000_0101;
        target.core.registers[15] = 0x2000_0009;
        target.run();

        assert!(target.is_halted());
        assert_eq!(target.core_register(0), 0);
        assert_eq!(target.core_register(15), 0x2000_0100);
        assert_eq!(target.read_word(0x0800_0010), 0x7856_3412);
        assert_eq!(target.programmed_pages(), &[0x0800_0010]);
    }
}
