//! The entry point of the library: a [`Session`] owns a probe connected to one target.

use std::fs::File;
use std::path::Path;

use crate::architecture::arm::memory::{RomTableEntry, RomTableError, RomTableWalker};
use crate::architecture::arm::ArmCommunicationInterface;
use crate::config::{SessionConfig, Target};
use crate::core::{Core, CoreInformation, CoreState, CoreStatus};
use crate::error::{Error, MemoryVerifyError};
use crate::flashing::{BinOptions, DownloadOptions, FileDownloadError, FlashError, FlashLoader};
use crate::memory::MemoryInterface;
use crate::probe::{Lister, Probe};

/// What the session holds on to.
#[derive(Debug)]
enum Link {
    /// The probe is open, but the debug port has not been initialized.
    Probe(Probe),
    /// The debug port is up and the access ports are known.
    Connected(ArmCommunicationInterface),
    /// The probe has been released.
    Closed,
}

fn interface(link: &mut Link) -> Result<&mut ArmCommunicationInterface, Error> {
    match link {
        Link::Connected(interface) => Ok(interface),
        Link::Probe(_) => Err(Error::NotConnected),
        Link::Closed => Err(Error::SessionClosed),
    }
}

/// The `Session` struct represents an active debug session.
///
/// It owns the probe, the description of the target and the state of its core.
/// All accesses to the target go through `&mut self`, so they are serialized.
///
/// A session has to be [connected](Session::connect) before the target can be accessed.
/// Dropping the session [closes](Session::close) it.
#[derive(Debug)]
pub struct Session {
    link: Link,
    target: Target,
    config: SessionConfig,
    core_state: CoreState,
    pending: FlashLoader,
}

impl Session {
    /// Open the probe selected by `config` with all built-in drivers.
    ///
    /// The session is not connected to the target yet.
    pub fn open(config: &SessionConfig, target: Target) -> Result<Self, Error> {
        Self::open_with_lister(&Lister::new(), config, target)
    }

    /// Open the probe selected by `config`, searching with `lister`.
    ///
    /// Without a probe selector, exactly one probe must be connected.
    #[tracing::instrument(skip(lister, config, target))]
    pub fn open_with_lister(
        lister: &Lister,
        config: &SessionConfig,
        target: Target,
    ) -> Result<Self, Error> {
        let candidates = lister.list(config.probe.as_ref());

        if candidates.is_empty() {
            return Err(Error::NoProbeFound);
        }
        if candidates.len() > 1 {
            match &config.probe {
                None => return Err(Error::AmbiguousProbeSelection { candidates }),
                Some(selector) => tracing::warn!(
                    "{} probes match {}, using the first one",
                    candidates.len(),
                    selector
                ),
            }
        }

        let info = &candidates[0];
        tracing::info!("Opening probe {:?}", info);
        let probe = lister.open(info)?;

        Ok(Self::new(probe, target, config))
    }

    /// Create a session for an already opened probe and connect it to the target.
    pub fn attach(probe: Probe, target: Target, config: &SessionConfig) -> Result<Self, Error> {
        let mut session = Self::new(probe, target, config);
        session.connect()?;
        Ok(session)
    }

    fn new(probe: Probe, target: Target, config: &SessionConfig) -> Self {
        let core_state = CoreState::new(
            target.core_type,
            config.reset_strategy,
            config.halt_timeout,
        );
        let pending = FlashLoader::new(target.memory_map.clone(), target.source.clone());

        Self {
            link: Link::Probe(probe),
            target,
            config: config.clone(),
            core_state,
            pending,
        }
    }

    /// Select the wire protocol, set the speed, attach the probe and bring up the debug port.
    ///
    /// Connecting a session which is already connected does nothing.
    #[tracing::instrument(skip(self))]
    pub fn connect(&mut self) -> Result<(), Error> {
        let probe = match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Probe(probe) => probe,
            Link::Connected(interface) => {
                self.link = Link::Connected(interface);
                return Ok(());
            }
            Link::Closed => return Err(Error::SessionClosed),
        };

        let mut interface = ArmCommunicationInterface::new(probe, &self.config.access);

        match Self::bring_up(&mut interface, &self.config) {
            Ok(()) => {
                tracing::info!("Connected to {}", self.target.name);
                self.link = Link::Connected(interface);
                Ok(())
            }
            Err(error) => {
                // The probe stays open, so the session can still be closed properly.
                self.link = Link::Probe(interface.into_probe());
                Err(error)
            }
        }
    }

    fn bring_up(interface: &mut ArmCommunicationInterface, config: &SessionConfig) -> Result<(), Error> {
        let probe = interface.probe_mut();
        probe.set_transfer_timeout(config.access.transfer_timeout);

        if let Some(protocol) = config.protocol {
            probe.select_protocol(protocol)?;
        }
        if let Some(speed_khz) = config.speed_khz {
            let actual = probe.set_speed(speed_khz)?;
            tracing::debug!("Requested {} kHz, the probe runs at {} kHz", speed_khz, actual);
        }

        probe.attach()?;
        interface.connect()?;

        Ok(())
    }

    /// Returns `true` after a successful [`connect`](Self::connect), until the session is closed.
    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    /// The description of the target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The settings the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Direct access to the debug port and the access ports.
    pub fn arm_interface(&mut self) -> Result<&mut ArmCommunicationInterface, Error> {
        interface(&mut self.link)
    }

    /// The core of the target, accessed through the first MEM-AP.
    pub fn core(&mut self) -> Result<Core<'_>, Error> {
        let interface = interface(&mut self.link)?;
        let ap = interface.default_memory_ap()?;
        let memory = interface.memory_interface(ap)?;

        Ok(Core::new(memory, &mut self.core_state))
    }

    /// Halt the core. Does nothing if it is already halted.
    pub fn halt(&mut self) -> Result<CoreInformation, Error> {
        self.core()?.halt()
    }

    /// Let the core run. Does nothing if it is not halted.
    pub fn resume(&mut self) -> Result<(), Error> {
        self.core()?.resume()
    }

    /// Execute a single instruction. The core has to be halted.
    pub fn step(&mut self) -> Result<CoreInformation, Error> {
        self.core()?.step()
    }

    /// Reset the target and let it run.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.core()?.reset()
    }

    /// Reset the target and halt the core before it executes the first instruction.
    pub fn reset_and_halt(&mut self) -> Result<CoreInformation, Error> {
        self.core()?.reset_and_halt()
    }

    /// Read the status of the core from the target.
    pub fn status(&mut self) -> Result<CoreStatus, Error> {
        self.core()?.status()
    }

    /// Read the 32-bit word at `address`, which must be 4-byte aligned.
    ///
    /// Memory can be read whether the core is running or halted.
    pub fn read32(&mut self, address: u64) -> Result<u32, Error> {
        self.core()?.read_word_32(address)
    }

    /// Write the 32-bit word at `address`, which must be 4-byte aligned.
    pub fn write32(&mut self, address: u64, value: u32) -> Result<(), Error> {
        self.core()?.write_word_32(address, value)
    }

    /// The raw value of the CPUID register at `0xE000_ED00`.
    pub fn get_cpuid(&mut self) -> Result<u32, Error> {
        self.core()?.get_cpuid()
    }

    /// The part number of the target, as given by its description.
    pub fn part_number(&self) -> &str {
        &self.target.name
    }

    /// Write `pattern` to `address`, read it back and compare.
    ///
    /// This is a quick check that the RAM at `address` is accessible.
    pub fn verify_memory(&mut self, address: u64, pattern: u32) -> Result<(), Error> {
        let mut core = self.core()?;
        core.write_word_32(address, pattern)?;
        let actual = core.read_word_32(address)?;

        if actual != pattern {
            return Err(MemoryVerifyError {
                address,
                expected: pattern,
                actual,
            }
            .into());
        }

        tracing::debug!("Memory at {:#010x} verified with {:#010x}", address, pattern);
        Ok(())
    }

    /// Read every named register of the target.
    ///
    /// A register which can't be read doesn't stop the others from being read, its
    /// error is returned in place of the value.
    pub fn read_register_map(&mut self) -> Result<Vec<(String, u64, Result<u32, Error>)>, Error> {
        let registers = self.target.registers.clone();
        let mut core = self.core()?;

        let values = registers
            .into_iter()
            .map(|register| {
                let value = core.read_word_32(register.address);
                if let Err(error) = &value {
                    tracing::warn!("Reading {} failed: {}", register.name, error);
                }
                (register.name, register.address, value)
            })
            .collect();

        Ok(values)
    }

    /// Walk the ROM table of the first MEM-AP.
    ///
    /// The table base is taken from the target description, or from the BASE register of
    /// the MEM-AP. Entries which could not be read are returned as errors.
    pub fn rom_table(&mut self) -> Result<Vec<Result<RomTableEntry, RomTableError>>, Error> {
        let depth_limit = self.config.rom_table_depth_limit;
        let configured_base = self.target.rom_table_base;

        let interface = interface(&mut self.link)?;
        let ap = interface.default_memory_ap()?;

        let base = match configured_base {
            Some(base) => base,
            None => interface
                .memory_ap_information(ap)
                .and_then(|information| information.base_address)
                .ok_or_else(|| anyhow::anyhow!("The MEM-AP does not point to a ROM table"))?,
        };

        let memory = interface.memory_interface(ap)?;
        Ok(RomTableWalker::with_depth_limit(memory, base, depth_limit).collect())
    }

    /// A new, empty flash loader for the memory map of the target.
    pub fn flash_loader(&self) -> FlashLoader {
        FlashLoader::new(self.target.memory_map.clone(), self.target.source.clone())
    }

    /// Queue `data` to be written to the flash at `address` with the next [`commit`](Self::commit).
    pub fn add_data(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        self.pending.add_data(address, data)
    }

    /// Queue the contents of the binary file at `path` to be written to the flash at `address`.
    pub fn add_bin_data(
        &mut self,
        path: impl AsRef<Path>,
        address: u64,
    ) -> Result<(), FileDownloadError> {
        let mut file = File::open(path.as_ref())?;
        self.pending.load_bin_data(
            &mut file,
            BinOptions {
                base_address: Some(address),
                skip: 0,
            },
        )
    }

    /// Queue the contents of the Intel HEX file at `path` to be written to the flash.
    pub fn add_hex_data(&mut self, path: impl AsRef<Path>) -> Result<(), FileDownloadError> {
        let mut file = File::open(path.as_ref())?;
        self.pending.load_hex_data(&mut file)
    }

    /// Write all queued data to the flash, verifying it if the session is configured to.
    pub fn commit(&mut self) -> Result<(), FlashError> {
        let options = DownloadOptions {
            verify: self.config.verify_after_flash,
            ..Default::default()
        };
        self.commit_with_options(options)
    }

    /// Write all queued data to the flash.
    ///
    /// The queue is empty afterwards, whether the write succeeded or not.
    pub fn commit_with_options(&mut self, options: DownloadOptions) -> Result<(), FlashError> {
        let empty = self.flash_loader();
        let loader = std::mem::replace(&mut self.pending, empty);

        if loader.is_empty() {
            tracing::debug!("Nothing to commit");
            return Ok(());
        }

        loader.commit(self, options)
    }

    /// Release the probe.
    ///
    /// If the session is configured to, a halted core is resumed first. Errors are
    /// logged and otherwise ignored. Closing a closed session does nothing.
    pub fn close(&mut self) {
        let mut probe = match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Closed => return,
            Link::Probe(probe) => probe,
            Link::Connected(mut interface) => {
                if self.config.resume_on_close {
                    if let Err(error) = Self::resume_if_halted(&mut interface, &mut self.core_state) {
                        tracing::warn!("Could not resume the core: {}", error);
                    }
                }
                interface.into_probe()
            }
        };

        if probe.is_attached() {
            if let Err(error) = probe.detach() {
                tracing::warn!("Could not detach from the probe: {}", error);
            }
        }

        tracing::info!("Session closed");
    }

    fn resume_if_halted(
        interface: &mut ArmCommunicationInterface,
        core_state: &mut CoreState,
    ) -> Result<(), Error> {
        let ap = interface.default_memory_ap()?;
        let mut core = Core::new(interface.memory_interface(ap)?, core_state);

        if core.status()?.is_halted() {
            tracing::debug!("Resuming the core before closing");
            core.resume()?;
        }

        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CoreType;
    use crate::probe::fake_probe::FakeProbe;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn not_connected_before_connect() {
        let probe = Probe::new(FakeProbe::new());
        let mut session = Session::new(
            probe,
            Target::generic(CoreType::Armv7em),
            &SessionConfig::default(),
        );

        assert!(!session.is_connected());
        assert!(matches!(session.read32(0x2000_0000), Err(Error::NotConnected)));
    }

    #[test]
    fn closed_session_rejects_accesses() {
        let fake = FakeProbe::new();
        let target = fake.target();
        let mut session = Session::attach(
            Probe::new(fake),
            Target::generic(CoreType::Armv7em),
            &SessionConfig::default(),
        )
        .unwrap();

        session.close();

        assert!(matches!(session.halt(), Err(Error::SessionClosed)));
        assert!(matches!(session.connect(), Err(Error::SessionClosed)));
        assert_eq!(target.lock().detach_count(), 1);
    }

    #[test]
    fn empty_commit_does_not_touch_the_target() {
        let fake = FakeProbe::new();
        let target = fake.target();
        let mut session = Session::attach(
            Probe::new(fake),
            Target::generic(CoreType::Armv7em),
            &SessionConfig::default(),
        )
        .unwrap();

        session.commit().unwrap();
        assert_eq!(target.lock().reset_count(), 0);
    }

    #[test]
    fn connect_applies_the_transfer_timeout() {
        let fake = FakeProbe::new();
        let target = fake.target();
        let mut config = SessionConfig::default();
        config.access.transfer_timeout = Duration::from_millis(250);

        let _session = Session::attach(
            Probe::new(fake),
            Target::generic(CoreType::Armv7em),
            &config,
        )
        .unwrap();

        assert_eq!(target.lock().transfer_timeout(), Some(Duration::from_millis(250)));
    }
}
