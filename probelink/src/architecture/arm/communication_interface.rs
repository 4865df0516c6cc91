use super::ap::{
    AccessPort, ApClass, ApRegister, GenericAp, MemoryAp, BASE, CSW, DRW, IDR, TAR,
};
use super::dp::{
    Abort, Ctrl, DebugPortId, DebugPortVersion, DpBankSel, DpRegister, Select, DPIDR,
};
use super::memory::ADIMemoryInterface;
use super::{ArmError, DapError, PortType, RawDapAccess};
use crate::config::{AccessConfig, RetryPolicy};
use crate::probe::Probe;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// A 32 bit register of a debug port or an access port.
pub trait Register: Clone + From<u32> + Into<u32> + Sized + Debug {
    /// The address of the register, in bytes. Bits 7:4 select the bank.
    const ADDRESS: u8;
    /// The name of the register.
    const NAME: &'static str;
}

/// Information about a MEM-AP found during the access port scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryApInformation {
    /// The access port.
    pub address: MemoryAp,
    /// The identification register of the access port.
    pub idr: IDR,
    /// The debug base address, usually pointing to the top level ROM table.
    pub base_address: Option<u64>,
}

/// Information about an access port found during the access port scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApInformation {
    /// A memory access port.
    MemoryAp(MemoryApInformation),
    /// Any other kind of access port, e.g. a vendor specific control port.
    Other {
        /// The access port.
        port: GenericAp,
        /// The identification register of the access port.
        idr: IDR,
    },
}

/// Owns the probe and drives the debug port and the access ports behind it.
///
/// All transfers go through here, which is where WAIT responses are retried and
/// FAULT responses are turned into cleared sticky flags plus an error. SELECT is
/// cached, so the bank and the access port are only switched when needed.
#[derive(Debug)]
pub struct ArmCommunicationInterface {
    probe: Probe,
    select_cache: Option<u32>,
    retry: RetryPolicy,
    transfer_timeout: Duration,
    dp_id: Option<DebugPortId>,
    access_ports: Vec<ApInformation>,
    csw_cache: HashMap<u8, CSW>,
}

impl ArmCommunicationInterface {
    /// Create the interface. No transfer is made until [`connect`](Self::connect) is called.
    pub fn new(probe: Probe, config: &AccessConfig) -> Self {
        Self {
            probe,
            select_cache: None,
            retry: config.retry,
            transfer_timeout: config.transfer_timeout,
            dp_id: None,
            access_ports: Vec::new(),
            csw_cache: HashMap::new(),
        }
    }

    /// Initialize the debug port and scan for access ports.
    ///
    /// The line is reset, DPIDR is read, leftover sticky errors are cleared and the
    /// debug and system power domains are powered up.
    #[tracing::instrument(skip(self))]
    pub fn connect(&mut self) -> Result<(), ArmError> {
        self.invalidate_cache();
        self.access_ports.clear();

        self.probe.reset_line_state()?;

        let dpidr: DPIDR = self.read_dp_register()?;
        let dp_id = DebugPortId::from(dpidr);
        tracing::debug!(
            "Debug port {} revision {} designed by {}",
            dp_id.version,
            dp_id.revision,
            dp_id.designer.get().unwrap_or("<unknown>")
        );

        if let DebugPortVersion::DPv0 | DebugPortVersion::Unsupported(_) = dp_id.version {
            return Err(ArmError::UnsupportedDebugPort(dp_id.version));
        }
        self.dp_id = Some(dp_id);

        self.write_dp_register(Abort::clear_sticky_flags())?;
        self.write_select(Select::from(0))?;

        self.power_up_debug_domains()?;

        self.access_ports = self.scan_access_ports()?;
        tracing::debug!("Found {} access ports", self.access_ports.len());

        Ok(())
    }

    fn power_up_debug_domains(&mut self) -> Result<(), ArmError> {
        let mut ctrl = Ctrl::from(0);
        ctrl.set_cdbgpwrupreq(true);
        ctrl.set_csyspwrupreq(true);
        ctrl.set_mask_lane(0b1111);
        self.write_dp_register(ctrl)?;

        let start = Instant::now();
        loop {
            let ctrl: Ctrl = self.read_dp_register()?;
            if ctrl.powered_up() {
                tracing::debug!("Debug and system domains are powered up");
                return Ok(());
            }
            if start.elapsed() > self.transfer_timeout {
                tracing::warn!("Debug power-up was not acknowledged: {:?}", ctrl);
                return Err(ArmError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Read the IDR of access port 0, 1, 2, ... until one is absent or unreadable.
    fn scan_access_ports(&mut self) -> Result<Vec<ApInformation>, ArmError> {
        let mut access_ports = Vec::new();

        for port in 0..=u8::MAX {
            let idr: IDR = match self.read_ap_register(GenericAp::new(port)) {
                Ok(idr) => idr,
                Err(error) => {
                    tracing::debug!("Stopping access port scan at {}: {}", port, error);
                    break;
                }
            };

            if !idr.is_present() {
                break;
            }
            tracing::debug!("AP {}: {:?}", port, idr);

            let information = if idr.class() == ApClass::MemAp {
                let address = MemoryAp::new(port);
                let base: BASE = self.read_ap_register(address)?;

                ApInformation::MemoryAp(MemoryApInformation {
                    address,
                    idr,
                    base_address: base.base_address(),
                })
            } else {
                ApInformation::Other {
                    port: GenericAp::new(port),
                    idr,
                }
            };
            access_ports.push(information);
        }

        Ok(access_ports)
    }

    /// The identification of the debug port, available after [`connect`](Self::connect).
    pub fn debug_port_id(&self) -> Option<&DebugPortId> {
        self.dp_id.as_ref()
    }

    /// The access ports found by [`connect`](Self::connect).
    pub fn access_ports(&self) -> &[ApInformation] {
        &self.access_ports
    }

    /// Information about the MEM-AP `ap`, if the scan found one at that index.
    pub fn memory_ap_information(&self, ap: MemoryAp) -> Option<&MemoryApInformation> {
        self.access_ports.iter().find_map(|info| match info {
            ApInformation::MemoryAp(info) if info.address == ap => Some(info),
            _ => None,
        })
    }

    /// The first MEM-AP found during the scan.
    pub fn default_memory_ap(&self) -> Result<MemoryAp, ArmError> {
        self.access_ports
            .iter()
            .find_map(|info| match info {
                ApInformation::MemoryAp(info) => Some(info.address),
                _ => None,
            })
            .ok_or(ArmError::NoMemoryAccessPort)
    }

    /// Memory access through the MEM-AP `ap`.
    pub fn memory_interface(&mut self, ap: MemoryAp) -> Result<ADIMemoryInterface<'_>, ArmError> {
        if !self.access_ports.is_empty() && self.memory_ap_information(ap).is_none() {
            return Err(ArmError::WrongApType(ap.port_number()));
        }

        Ok(ADIMemoryInterface::new(self, ap))
    }

    /// Access to the underlying probe.
    pub fn probe_mut(&mut self) -> &mut Probe {
        &mut self.probe
    }

    /// Give up the interface and return the probe.
    pub fn into_probe(self) -> Probe {
        self.probe
    }

    /// Forget the cached SELECT and CSW values, so the next accesses write them again.
    pub fn invalidate_cache(&mut self) {
        self.select_cache = None;
        self.csw_cache.clear();
    }

    pub(crate) fn cached_csw(&self, ap: MemoryAp) -> Option<CSW> {
        self.csw_cache.get(&ap.port_number()).copied()
    }

    pub(crate) fn set_cached_csw(&mut self, ap: MemoryAp, csw: CSW) {
        self.csw_cache.insert(ap.port_number(), csw);
    }

    /// Read a debug port register.
    pub fn read_dp_register<R: DpRegister>(&mut self) -> Result<R, ArmError> {
        self.select_dp_bank(R::DP_BANK)?;

        let value = self.with_retry(|probe| probe.raw_read_register(PortType::DebugPort, R::ADDRESS))?;
        tracing::trace!("Read DP register {}, value={:#010x}", R::NAME, value);

        Ok(R::from(value))
    }

    /// Write a debug port register.
    pub fn write_dp_register<R: DpRegister>(&mut self, register: R) -> Result<(), ArmError> {
        if R::ADDRESS == Select::ADDRESS {
            return self.write_select(Select::from(register.into()));
        }

        self.select_dp_bank(R::DP_BANK)?;

        let value: u32 = register.into();
        tracing::trace!("Write DP register {}, value={:#010x}", R::NAME, value);
        self.with_retry(|probe| probe.raw_write_register(PortType::DebugPort, R::ADDRESS, value))
    }

    /// Read an access port register.
    pub fn read_ap_register<PORT, R>(&mut self, port: PORT) -> Result<R, ArmError>
    where
        PORT: AccessPort,
        R: ApRegister<PORT>,
    {
        let value = self.read_raw_ap_register(port.port_number(), R::ADDRESS)?;
        tracing::trace!("Read AP register {}, value={:#010x}", R::NAME, value);

        Ok(R::from(value))
    }

    /// Write an access port register.
    pub fn write_ap_register<PORT, R>(&mut self, port: PORT, register: R) -> Result<(), ArmError>
    where
        PORT: AccessPort,
        R: ApRegister<PORT>,
    {
        let value: u32 = register.into();
        tracing::trace!("Write AP register {}, value={:#010x}", R::NAME, value);

        self.write_raw_ap_register(port.port_number(), R::ADDRESS, value)
    }

    /// Read `values.len()` DRW values of `ap`, starting at `address`.
    ///
    /// TAR is written as part of every attempt. The words which made it before
    /// a WAIT already advanced TAR, so a retry starts over at `address`. The
    /// caller keeps the block within the auto increment range.
    pub(crate) fn read_memory_block(
        &mut self,
        ap: MemoryAp,
        address: u32,
        values: &mut [u32],
    ) -> Result<(), ArmError> {
        tracing::trace!("Reading {} values at {:#010x}", values.len(), address);
        // TAR and DRW share bank 0.
        self.select_ap_and_bank(ap.port_number(), DRW::ADDRESS)?;

        self.with_retry(|probe| {
            probe.raw_write_register(PortType::AccessPort, TAR::ADDRESS, address)?;
            probe.raw_read_block(PortType::AccessPort, DRW::ADDRESS, values)
        })
    }

    /// Write all of `values` to DRW of `ap`, starting at `address`.
    ///
    /// Retried like [`read_memory_block`](Self::read_memory_block).
    pub(crate) fn write_memory_block(
        &mut self,
        ap: MemoryAp,
        address: u32,
        values: &[u32],
    ) -> Result<(), ArmError> {
        tracing::trace!("Writing {} values at {:#010x}", values.len(), address);
        self.select_ap_and_bank(ap.port_number(), DRW::ADDRESS)?;

        self.with_retry(|probe| {
            probe.raw_write_register(PortType::AccessPort, TAR::ADDRESS, address)?;
            probe.raw_write_block(PortType::AccessPort, DRW::ADDRESS, values)
        })
    }

    /// Read the register at `address` of access port `ap`.
    pub fn read_raw_ap_register(&mut self, ap: u8, address: u8) -> Result<u32, ArmError> {
        self.select_ap_and_bank(ap, address)?;

        self.with_retry(|probe| probe.raw_read_register(PortType::AccessPort, address & 0xC))
    }

    /// Write the register at `address` of access port `ap`.
    pub fn write_raw_ap_register(&mut self, ap: u8, address: u8, value: u32) -> Result<(), ArmError> {
        self.select_ap_and_bank(ap, address)?;

        self.with_retry(|probe| {
            probe.raw_write_register(PortType::AccessPort, address & 0xC, value)
        })
    }

    fn select_ap_and_bank(&mut self, ap: u8, address: u8) -> Result<(), ArmError> {
        let mut select = Select::from(self.select_cache.unwrap_or(0));
        select.set_ap_sel(ap);
        select.set_ap_bank_sel(address >> 4);

        self.write_select(select)
    }

    fn select_dp_bank(&mut self, bank: DpBankSel) -> Result<(), ArmError> {
        let DpBankSel::Bank(bank) = bank else {
            return Ok(());
        };

        let mut select = Select::from(self.select_cache.unwrap_or(0));
        select.set_dp_bank_sel(bank);

        self.write_select(select)
    }

    /// Point DP address 0x4 at CTRL/STAT, writing SELECT without retries.
    fn select_ctrl_stat_bank(&mut self) -> Result<(), DapError> {
        let current = self.select_cache.map(Select::from);
        if current.is_some_and(|select| select.dp_bank_sel() == 0) {
            return Ok(());
        }

        let mut select = current.unwrap_or_default();
        select.set_dp_bank_sel(0);
        let value: u32 = select.into();

        let result = self
            .probe
            .raw_write_register(PortType::DebugPort, Select::ADDRESS, value);
        self.select_cache = result.as_ref().ok().map(|_| value);
        result
    }

    fn write_select(&mut self, select: Select) -> Result<(), ArmError> {
        let value: u32 = select.into();
        if self.select_cache == Some(value) {
            return Ok(());
        }

        tracing::debug!("Writing SELECT={:#010x}", value);
        let result =
            self.with_retry(|probe| probe.raw_write_register(PortType::DebugPort, Select::ADDRESS, value));

        self.select_cache = match result {
            Ok(()) => Some(value),
            Err(_) => None,
        };

        result
    }

    /// Run a single transfer, retrying it while the target answers WAIT.
    ///
    /// The delay between attempts starts at the initial backoff and doubles up to the
    /// maximum backoff. A FAULT clears the sticky flags before the error is returned.
    fn with_retry<T>(
        &mut self,
        mut transfer: impl FnMut(&mut Probe) -> Result<T, DapError>,
    ) -> Result<T, ArmError> {
        let mut waits = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            match transfer(&mut self.probe) {
                Ok(value) => return Ok(value),
                Err(DapError::WaitResponse) => {
                    waits += 1;

                    if waits > self.retry.max_retries {
                        tracing::warn!("Transfer still answered with WAIT after {} attempts, aborting", waits);
                        self.abort_transaction();
                        return Err(ArmError::AccessTimeout { attempts: waits });
                    }

                    tracing::debug!("WAIT response, retrying in {:?}", backoff);
                    std::thread::sleep(backoff);
                    backoff = self.retry.next_backoff(backoff);
                }
                Err(DapError::FaultResponse) => return Err(self.recover_from_fault()),
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Cancel a stalled transaction with ABORT.DAPABORT.
    fn abort_transaction(&mut self) {
        if let Err(error) = self.probe.raw_write_register(
            PortType::DebugPort,
            Abort::ADDRESS,
            Abort::dap_abort().into(),
        ) {
            tracing::warn!("Failed to abort the stalled transaction: {}", error);
        }
    }

    /// Clear the sticky error flags after a FAULT response.
    ///
    /// Returns the error describing the fault.
    fn recover_from_fault(&mut self) -> ArmError {
        if let Err(error) = self.select_ctrl_stat_bank() {
            tracing::warn!("Failed to select the DP bank of CTRL/STAT after a FAULT: {}", error);
            return ArmError::StickyFaultUnrecoverable { ctrl_stat: None };
        }

        let ctrl = match self.probe.raw_read_register(PortType::DebugPort, Ctrl::ADDRESS) {
            Ok(value) => Ctrl::from(value),
            Err(error) => {
                tracing::warn!("Failed to read CTRL/STAT after a FAULT: {}", error);
                return ArmError::StickyFaultUnrecoverable { ctrl_stat: None };
            }
        };
        let ctrl_stat: u32 = ctrl.into();
        tracing::warn!("FAULT response, CTRL/STAT={:#010x}", ctrl_stat);

        if let Err(error) = self.probe.raw_write_register(
            PortType::DebugPort,
            Abort::ADDRESS,
            Abort::clear_sticky_flags().into(),
        ) {
            tracing::warn!("Failed to clear the sticky flags: {}", error);
            return ArmError::StickyFaultUnrecoverable {
                ctrl_stat: Some(ctrl_stat),
            };
        }

        match self.probe.raw_read_register(PortType::DebugPort, Ctrl::ADDRESS) {
            Ok(value) if !Ctrl::from(value).has_sticky_error() => {
                ArmError::AccessPortFault { ctrl_stat }
            }
            Ok(value) => {
                tracing::warn!("Sticky flags are still set, CTRL/STAT={:#010x}", value);
                ArmError::StickyFaultUnrecoverable {
                    ctrl_stat: Some(value),
                }
            }
            Err(error) => {
                tracing::warn!("Failed to read CTRL/STAT after clearing the sticky flags: {}", error);
                ArmError::StickyFaultUnrecoverable {
                    ctrl_stat: Some(ctrl_stat),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryInterface;
    use crate::probe::fake_probe::FakeProbe;
    use crate::probe::{DebugProbeError, Probe};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn fast_retries(max_retries: u32) -> AccessConfig {
        AccessConfig {
            retry: RetryPolicy {
                max_retries,
                initial_backoff: Duration::from_micros(1),
                max_backoff: Duration::from_micros(4),
            },
            ..Default::default()
        }
    }

    fn connected(
        config: &AccessConfig,
    ) -> (
        ArmCommunicationInterface,
        Arc<parking_lot::Mutex<crate::probe::fake_probe::FakeTarget>>,
    ) {
        let fake = FakeProbe::new();
        let target = fake.target();

        let mut probe = Probe::new(fake);
        probe.attach().unwrap();

        let mut interface = ArmCommunicationInterface::new(probe, config);
        interface.connect().unwrap();

        (interface, target)
    }

    #[test]
    fn connect_finds_memory_ap() {
        let (interface, _) = connected(&AccessConfig::default());

        assert_eq!(interface.debug_port_id().unwrap().version, DebugPortVersion::DPv1);
        assert_eq!(interface.access_ports().len(), 1);

        let ap = interface.default_memory_ap().unwrap();
        let info = interface.memory_ap_information(ap).unwrap();
        assert_eq!(info.base_address, Some(0xE00F_F000));
    }

    #[test]
    fn connect_requires_attached_probe() {
        let probe = Probe::new(FakeProbe::new());
        let mut interface = ArmCommunicationInterface::new(probe, &AccessConfig::default());

        assert!(matches!(
            interface.connect(),
            Err(ArmError::Probe(DebugProbeError::NotAttached))
        ));
    }

    #[test]
    fn select_is_cached() {
        let (mut interface, target) = connected(&AccessConfig::default());
        let ap = MemoryAp::new(0);

        let _: CSW = interface.read_ap_register(ap).unwrap();
        let writes = target.lock().select_write_count();

        let _: CSW = interface.read_ap_register(ap).unwrap();
        let _: DRW = interface.read_ap_register(ap).unwrap();
        assert_eq!(target.lock().select_write_count(), writes);

        let _: BASE = interface.read_ap_register(ap).unwrap();
        assert_eq!(target.lock().select_write_count(), writes + 1);
    }

    #[test]
    fn waits_within_the_limit_are_retried() {
        let (mut interface, target) = connected(&fast_retries(4));

        target.lock().inject_waits(4);

        let idr: IDR = interface.read_ap_register(GenericAp::new(0)).unwrap();
        assert_eq!(u32::from(idr), 0x2477_0011);
        assert_eq!(target.lock().dap_abort_count(), 0);
    }

    #[test]
    fn too_many_waits_abort_the_transfer() {
        let (mut interface, target) = connected(&fast_retries(4));

        target.lock().inject_waits(5);

        let result: Result<IDR, _> = interface.read_ap_register(GenericAp::new(0));
        assert!(matches!(result, Err(ArmError::AccessTimeout { attempts: 5 })));
        assert_eq!(target.lock().dap_abort_count(), 1);
    }

    #[test]
    fn fault_clears_sticky_flags() {
        let (mut interface, target) = connected(&AccessConfig::default());
        target.lock().add_fault_range(0x4000_0000..0x4000_1000);

        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        let result = memory.read_word_32(0x4000_0000);
        assert!(matches!(result, Err(ArmError::AccessPortFault { ctrl_stat }) if ctrl_stat & (1 << 5) != 0));

        // The next access works without further recovery.
        memory.write_word_32(0x2000_0000, 0x1234_5678).unwrap();
        assert_eq!(memory.read_word_32(0x2000_0000).unwrap(), 0x1234_5678);
    }

    #[test]
    fn fault_with_stuck_sticky_flags_is_unrecoverable() {
        let (mut interface, target) = connected(&AccessConfig::default());
        {
            let mut target = target.lock();
            target.add_fault_range(0x4000_0000..0x4000_1000);
            target.break_sticky_clear();
        }

        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        assert!(matches!(
            memory.read_word_32(0x4000_0000),
            Err(ArmError::StickyFaultUnrecoverable { ctrl_stat: Some(_) })
        ));
    }

    #[test]
    fn fault_recovery_reads_ctrl_stat_from_bank_0() {
        let (mut interface, target) = connected(&AccessConfig::default());
        {
            let mut target = target.lock();
            target.add_fault_range(0x4000_0000..0x4000_1000);
            target.break_sticky_clear();
        }
        // Behind DP address 0x4 is now DLCR, which reads as zero.
        interface.select_dp_bank(DpBankSel::Bank(1)).unwrap();

        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        assert!(matches!(
            memory.read_word_32(0x4000_0000),
            Err(ArmError::StickyFaultUnrecoverable { ctrl_stat: Some(value) }) if value & (1 << 5) != 0
        ));
    }

    #[test]
    fn unacknowledged_power_up_is_polled_with_pauses() {
        let fake = FakeProbe::new();
        let target = fake.target();
        target.lock().hold_power_up();

        let mut probe = Probe::new(fake);
        probe.attach().unwrap();

        let config = AccessConfig {
            transfer_timeout: Duration::from_millis(20),
            ..AccessConfig::default()
        };
        let mut interface = ArmCommunicationInterface::new(probe, &config);

        assert!(matches!(interface.connect(), Err(ArmError::Timeout)));
        assert!(target.lock().ctrl_stat_read_count() <= 25);
    }
}
