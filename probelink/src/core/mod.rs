//! Run control of a Cortex-M core.
mod core_status;
mod registers;

pub use core_status::{CoreInformation, CoreStatus, HaltReason};
pub use registers::{CpuInfo, RegisterId};

use crate::architecture::arm::core::{
    Aircr, Cpuid, Dcrdr, Dcrsr, Demcr, Dfsr, Dhcsr, FpCtrl, FpRev1CompX,
};
use crate::architecture::arm::memory::ADIMemoryInterface;
use crate::architecture::arm::ArmError;
use crate::config::CoreType;
use crate::error::Error;
use crate::memory::{CoreMemoryInterface, MemoryInterface};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A memory mapped register, for instance ARM debug registers (DHCSR, etc).
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's address in the target memory.
    const ADDRESS: u64;
    /// The register's name.
    const NAME: &'static str;
}

/// How [`Core::reset`] resets the target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStrategy {
    /// Reset the whole system through AIRCR.SYSRESETREQ.
    #[default]
    SysResetReq,
    /// Reset only the core through AIRCR.VECTRESET.
    ///
    /// Only ARMv7-M implements this. Other cores fall back to [`ResetStrategy::SysResetReq`].
    VectReset,
}

/// The state of a core which is kept between two [`Core`] borrows.
#[derive(Debug)]
pub struct CoreState {
    core_type: CoreType,
    status: CoreStatus,
    reset_strategy: ResetStrategy,
    halt_timeout: Duration,
    /// The address each FPB comparator is set to, once the unit has been initialized.
    hw_breakpoints: Option<Vec<Option<u32>>>,
}

impl CoreState {
    /// The state of a core which has not been accessed yet.
    pub fn new(core_type: CoreType, reset_strategy: ResetStrategy, halt_timeout: Duration) -> Self {
        Self {
            core_type,
            status: CoreStatus::Unknown,
            reset_strategy,
            halt_timeout,
            hw_breakpoints: None,
        }
    }

    /// The last known status of the core, without accessing the target.
    pub fn status(&self) -> CoreStatus {
        self.status
    }

    /// The type of the core.
    pub fn core_type(&self) -> CoreType {
        self.core_type
    }
}

/// A Cortex-M core, accessed through a MEM-AP.
///
/// Memory can be accessed in every state through [`MemoryInterface`]. Core
/// registers can only be accessed while the core is halted.
#[derive(Debug)]
pub struct Core<'probe> {
    memory: ADIMemoryInterface<'probe>,
    state: &'probe mut CoreState,
}

impl<'probe> Core<'probe> {
    /// Create a core from the memory interface of its MEM-AP and its saved state.
    pub fn new(memory: ADIMemoryInterface<'probe>, state: &'probe mut CoreState) -> Self {
        Self { memory, state }
    }

    fn read_register<R: MemoryMappedRegister>(&mut self) -> Result<R, ArmError> {
        let value = self.memory.read_word_32(R::ADDRESS)?;
        tracing::trace!("Read {} = {:#010x}", R::NAME, value);
        Ok(R::from(value))
    }

    fn write_register<R: MemoryMappedRegister>(&mut self, register: R) -> Result<(), ArmError> {
        let value: u32 = register.into();
        tracing::trace!("Write {} = {:#010x}", R::NAME, value);
        self.memory.write_word_32(R::ADDRESS, value)
    }

    fn set_status(&mut self, status: CoreStatus) {
        if self.state.status != status {
            tracing::debug!("Core status changed from {:?} to {:?}", self.state.status, status);
        }
        self.state.status = status;
    }

    /// The last known status, without accessing the target.
    pub fn cached_status(&self) -> CoreStatus {
        self.state.status
    }

    /// Read the status of the core from DHCSR.
    ///
    /// The halt reason is taken from DFSR, which is cleared afterwards.
    #[tracing::instrument(skip(self))]
    pub fn status(&mut self) -> Result<CoreStatus, Error> {
        let dhcsr: Dhcsr = self.read_register()?;

        if dhcsr.s_halt() {
            let dfsr: Dfsr = self.read_register()?;
            let reason = dfsr.halt_reason();
            self.write_register(Dfsr::clear_all())?;

            // DFSR has been cleared when the halt was first seen, keep the reason from then.
            if self.state.status.is_halted() && reason == HaltReason::Unknown {
                return Ok(self.state.status);
            }

            let status = CoreStatus::Halted(reason);
            self.set_status(status);
            return Ok(status);
        }

        if dhcsr.s_lockup() {
            tracing::warn!("The core is locked up as a result of an unrecoverable exception");
        }
        if self.state.status.is_halted() {
            tracing::warn!("Core is running, but we expected it to be halted");
        }

        self.set_status(CoreStatus::Running);
        Ok(CoreStatus::Running)
    }

    /// Poll the status until the core halts.
    pub fn wait_for_core_halted(&mut self, timeout: Duration) -> Result<(), Error> {
        let start = Instant::now();

        while !self.status()?.is_halted() {
            if start.elapsed() >= timeout {
                return Err(Error::Arm(ArmError::Timeout));
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        Ok(())
    }

    /// Halt the core.
    ///
    /// Halting a core which is already halted does not touch the target.
    #[tracing::instrument(skip(self))]
    pub fn halt(&mut self) -> Result<CoreInformation, Error> {
        if self.status()?.is_halted() {
            tracing::debug!("Core is already halted");
            return self.core_information();
        }

        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_halt(true);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();
        self.write_register(dhcsr)?;

        let timeout = self.state.halt_timeout;
        self.wait_for_core_halted(timeout)?;

        self.core_information()
    }

    /// Let the core run.
    ///
    /// Resuming a core which is not halted does not touch the target.
    #[tracing::instrument(skip(self))]
    pub fn resume(&mut self) -> Result<(), Error> {
        if !self.status()?.is_halted() {
            tracing::debug!("Core is not halted, nothing to resume");
            return Ok(());
        }

        // Clears C_HALT, C_STEP and C_MASKINTS in one write.
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();
        self.write_register(dhcsr)?;

        self.set_status(CoreStatus::Running);
        Ok(())
    }

    /// Execute a single instruction.
    ///
    /// Interrupts are masked while stepping, until the core is resumed.
    #[tracing::instrument(skip(self))]
    pub fn step(&mut self) -> Result<CoreInformation, Error> {
        self.ensure_halted()?;

        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_maskints(true);
        dhcsr.set_c_step(true);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();
        self.write_register(dhcsr)?;

        let timeout = self.state.halt_timeout;
        self.wait_for_core_halted(timeout)?;
        self.set_status(CoreStatus::Halted(HaltReason::Step));

        self.core_information()
    }

    /// Reset the target with the configured [`ResetStrategy`] and let it run.
    #[tracing::instrument(skip(self))]
    pub fn reset(&mut self) -> Result<(), Error> {
        self.request_reset()?;

        self.set_status(CoreStatus::Running);
        tracing::info!("Core reset");
        Ok(())
    }

    /// Reset the target and halt the core before it executes the first instruction.
    #[tracing::instrument(skip(self))]
    pub fn reset_and_halt(&mut self) -> Result<CoreInformation, Error> {
        let mut demcr: Demcr = self.read_register()?;
        demcr.set_vc_corereset(true);
        self.write_register(demcr)?;

        let timeout = self.state.halt_timeout;
        let halted = self
            .request_reset()
            .and_then(|_| self.wait_for_core_halted(timeout));

        // Clear the catch even if the core did not halt, so the next reset runs.
        demcr.set_vc_corereset(false);
        self.write_register(demcr)?;
        halted?;

        tracing::info!("Core reset and halted");
        self.core_information()
    }

    /// Write AIRCR and wait for the reset to happen.
    ///
    /// The status is [`CoreStatus::Reset`] afterwards.
    fn request_reset(&mut self) -> Result<(), Error> {
        let strategy = match self.state.reset_strategy {
            ResetStrategy::VectReset if !self.state.core_type.supports_vect_reset() => {
                tracing::warn!(
                    "{:?} cores do not support VECTRESET, using SYSRESETREQ instead",
                    self.state.core_type
                );
                ResetStrategy::SysResetReq
            }
            strategy => strategy,
        };

        // Leave debug state, otherwise the core stays halted after the reset.
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();
        self.write_register(dhcsr)?;

        let mut aircr = Aircr(0);
        aircr.vectkey();
        match strategy {
            ResetStrategy::SysResetReq => aircr.set_sysresetreq(true),
            ResetStrategy::VectReset => aircr.set_vectreset(true),
        }
        self.write_register(aircr)?;
        self.set_status(CoreStatus::Reset);

        self.wait_for_reset();
        Ok(())
    }

    /// Wait until DHCSR.S_RESET_ST reports the reset, or the reset had time to settle.
    ///
    /// Accesses can fail while the reset is in progress, so errors are only logged.
    fn wait_for_reset(&mut self) {
        let start = Instant::now();

        while start.elapsed() < self.state.halt_timeout {
            match self.read_register::<Dhcsr>() {
                Ok(dhcsr) if dhcsr.s_reset_st() => {
                    tracing::debug!("Reset observed after {:?}", start.elapsed());
                    return;
                }
                Ok(_) => {}
                Err(error) => tracing::debug!("DHCSR not readable during reset: {}", error),
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        tracing::debug!("S_RESET_ST was not observed, assuming the reset has settled");
    }

    fn ensure_halted(&mut self) -> Result<(), Error> {
        let status = if self.state.status.is_halted() {
            self.state.status
        } else {
            self.status()?
        };

        if status.is_halted() {
            Ok(())
        } else {
            Err(Error::InvalidAccessInCurrentState { status })
        }
    }

    fn core_information(&mut self) -> Result<CoreInformation, Error> {
        let pc = self.read_core_reg(RegisterId::PC)?;
        Ok(CoreInformation { pc })
    }

    fn wait_for_core_register_transfer(&mut self) -> Result<(), Error> {
        let timeout = Duration::from_millis(100);
        let start = Instant::now();

        while start.elapsed() < timeout {
            let dhcsr: Dhcsr = self.read_register()?;
            if dhcsr.s_regrdy() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        Err(Error::Arm(ArmError::Timeout))
    }

    /// Read a core register. The core has to be halted.
    pub fn read_core_reg(&mut self, id: RegisterId) -> Result<u32, Error> {
        self.ensure_halted()?;

        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regwnr(false);
        dcrsr.set_regsel(id.into());
        self.write_register(dcrsr)?;

        self.wait_for_core_register_transfer()?;

        let value: Dcrdr = self.read_register()?;
        tracing::debug!("Read core register {} = {:#010x}", id, value.0);
        Ok(value.0)
    }

    /// Write a core register. The core has to be halted.
    pub fn write_core_reg(&mut self, id: RegisterId, value: u32) -> Result<(), Error> {
        self.ensure_halted()?;

        self.write_register(Dcrdr(value))?;

        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regwnr(true);
        dcrsr.set_regsel(id.into());
        self.write_register(dcrsr)?;

        self.wait_for_core_register_transfer()
    }

    /// The raw value of the CPUID register.
    pub fn get_cpuid(&mut self) -> Result<u32, Error> {
        let cpuid: Cpuid = self.read_register()?;
        Ok(cpuid.into())
    }

    /// Clear all comparators and enable the FPB, once per session.
    fn init_breakpoint_units(&mut self) -> Result<(), Error> {
        if self.state.hw_breakpoints.is_some() {
            return Ok(());
        }

        let ctrl: FpCtrl = self.read_register()?;
        if ctrl.rev() != 0 {
            return Err(anyhow::anyhow!(
                "Flash patch and breakpoint unit revision {} is not supported",
                ctrl.rev() + 1
            )
            .into());
        }

        let units = ctrl.num_code() as usize;
        tracing::debug!("FPB has {} instruction comparators", units);

        for index in 0..units {
            self.memory
                .write_word_32(FpRev1CompX::ADDRESS + 4 * index as u64, 0)?;
        }

        let mut ctrl = FpCtrl(0);
        ctrl.set_key(true);
        ctrl.set_enable(true);
        self.write_register(ctrl)?;

        self.state.hw_breakpoints = Some(vec![None; units]);
        Ok(())
    }

    /// The number of hardware breakpoints the core supports.
    pub fn available_breakpoint_units(&mut self) -> Result<usize, Error> {
        self.init_breakpoint_units()?;
        Ok(self.state.hw_breakpoints.as_ref().map_or(0, Vec::len))
    }

    /// Set a hardware breakpoint on the instruction at `address`.
    pub fn set_hw_breakpoint(&mut self, address: u32) -> Result<(), Error> {
        if address % 2 != 0 {
            return Err(anyhow::anyhow!(
                "The breakpoint address {:#010x} is not on a half-word boundary",
                address
            )
            .into());
        }
        let comparator = FpRev1CompX::breakpoint_configuration(address).ok_or_else(|| {
            anyhow::anyhow!("The breakpoint address {:#010x} is outside of the code region", address)
        })?;

        self.init_breakpoint_units()?;

        let slots = self.state.hw_breakpoints.as_deref().unwrap_or_default();
        if slots.contains(&Some(address)) {
            return Ok(());
        }
        let Some(index) = slots.iter().position(Option::is_none) else {
            return Err(Error::BreakpointUnitsExhausted(slots.len()));
        };

        self.memory
            .write_word_32(FpRev1CompX::ADDRESS + 4 * index as u64, comparator.into())?;
        if let Some(slots) = self.state.hw_breakpoints.as_mut() {
            slots[index] = Some(address);
        }

        tracing::debug!("Set breakpoint at {:#010x} in comparator {}", address, index);
        Ok(())
    }

    /// Remove the hardware breakpoint at `address`. Does nothing if there is none.
    pub fn clear_hw_breakpoint(&mut self, address: u32) -> Result<(), Error> {
        let Some(index) = self
            .state
            .hw_breakpoints
            .as_deref()
            .and_then(|slots| slots.iter().position(|slot| *slot == Some(address)))
        else {
            return Ok(());
        };

        self.memory
            .write_word_32(FpRev1CompX::ADDRESS + 4 * index as u64, 0)?;
        if let Some(slots) = self.state.hw_breakpoints.as_mut() {
            slots[index] = None;
        }

        Ok(())
    }
}

impl CoreMemoryInterface for Core<'_> {
    type ErrorType = ArmError;

    fn memory_mut(&mut self) -> &mut dyn MemoryInterface<ArmError> {
        &mut self.memory
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::architecture::arm::ArmCommunicationInterface;
    use crate::config::AccessConfig;
    use crate::probe::fake_probe::{FakeProbe, FakeTarget};
    use crate::probe::Probe;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn interface() -> (ArmCommunicationInterface, Arc<Mutex<FakeTarget>>) {
        let fake = FakeProbe::new();
        let target = fake.target();
        let mut probe = Probe::new(fake);
        probe.attach().unwrap();

        let mut interface = ArmCommunicationInterface::new(probe, &AccessConfig::default());
        interface.connect().unwrap();
        (interface, target)
    }

    fn state() -> CoreState {
        CoreState::new(
            CoreType::Armv7em,
            ResetStrategy::SysResetReq,
            Duration::from_millis(100),
        )
    }

    fn core<'a>(interface: &'a mut ArmCommunicationInterface, state: &'a mut CoreState) -> Core<'a> {
        let ap = interface.default_memory_ap().unwrap();
        Core::new(interface.memory_interface(ap).unwrap(), state)
    }

    #[test]
    fn halt_and_resume() {
        let (mut interface, target) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        assert_eq!(core.status().unwrap(), CoreStatus::Running);

        core.halt().unwrap();
        assert_eq!(core.cached_status(), CoreStatus::Halted(HaltReason::Request));
        assert!(target.lock().is_halted());

        core.resume().unwrap();
        assert_eq!(core.cached_status(), CoreStatus::Running);
        assert!(!target.lock().is_halted());
    }

    #[test]
    fn halt_and_resume_are_idempotent() {
        let (mut interface, target) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        core.halt().unwrap();
        let writes = target.lock().dhcsr_write_count();
        core.halt().unwrap();
        assert_eq!(target.lock().dhcsr_write_count(), writes);

        core.resume().unwrap();
        let writes = target.lock().dhcsr_write_count();
        core.resume().unwrap();
        assert_eq!(target.lock().dhcsr_write_count(), writes);
    }

    #[test]
    fn stuck_register_transfer_is_polled_with_pauses() {
        let (mut interface, target) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        core.halt().unwrap();
        target.lock().hold_register_transfers();
        let reads = target.lock().dhcsr_read_count();

        assert!(matches!(
            core.read_core_reg(RegisterId::PC),
            Err(Error::Arm(ArmError::Timeout))
        ));
        // One poll per millisecond over the 100 ms timeout, plus the status check.
        assert!(target.lock().dhcsr_read_count() - reads <= 110);
    }

    #[test]
    fn core_registers_need_a_halted_core() {
        let (mut interface, _) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        assert!(matches!(
            core.read_core_reg(RegisterId::PC),
            Err(Error::InvalidAccessInCurrentState {
                status: CoreStatus::Running
            })
        ));
        assert!(matches!(
            core.write_core_reg(RegisterId(0), 1),
            Err(Error::InvalidAccessInCurrentState { .. })
        ));
    }

    #[test]
    fn core_register_round_trip() {
        let (mut interface, _) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        core.halt().unwrap();
        core.write_core_reg(RegisterId(4), 0xDEAD_BEEF).unwrap();
        core.write_core_reg(RegisterId::SP, 0x2000_1000).unwrap();

        assert_eq!(core.read_core_reg(RegisterId(4)).unwrap(), 0xDEAD_BEEF);
        assert_eq!(core.read_core_reg(RegisterId::SP).unwrap(), 0x2000_1000);
    }

    #[test]
    fn memory_is_accessible_while_running() {
        let (mut interface, _) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        core.write_word_32(0x2000_0000, 0xCAFE_BABE).unwrap();
        assert_eq!(core.read_word_32(0x2000_0000).unwrap(), 0xCAFE_BABE);
        assert_eq!(core.status().unwrap(), CoreStatus::Running);
    }

    #[test]
    fn cpuid_is_returned_raw() {
        let (mut interface, _) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        assert_eq!(core.get_cpuid().unwrap(), 0x410F_C241);
    }

    #[test]
    fn step_advances_the_program_counter() {
        let (mut interface, _) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        core.halt().unwrap();
        core.write_core_reg(RegisterId::PC, 0x0800_0100).unwrap();

        let info = core.step().unwrap();
        assert_eq!(info.pc, 0x0800_0102);
        assert_eq!(core.cached_status(), CoreStatus::Halted(HaltReason::Step));
    }

    #[test]
    fn reset_leaves_the_core_running() {
        let (mut interface, target) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        core.halt().unwrap();
        core.reset().unwrap();

        assert_eq!(core.cached_status(), CoreStatus::Running);
        assert!(!target.lock().is_halted());
        assert_eq!(target.lock().reset_count(), 1);
    }

    #[test]
    fn reset_and_halt_stops_at_the_reset_vector() {
        let (mut interface, target) = interface();
        target.lock().write_word(0x0000_0004, 0x0800_0101);
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        let info = core.reset_and_halt().unwrap();

        assert_eq!(info.pc, 0x0800_0100);
        assert_eq!(core.cached_status(), CoreStatus::Halted(HaltReason::VectorCatch));
        assert_eq!(target.lock().read_word(Demcr::ADDRESS) & 1, 0);
    }

    #[test]
    fn hardware_breakpoints_use_free_comparators() {
        let (mut interface, target) = interface();
        let mut state = state();
        let mut core = core(&mut interface, &mut state);

        assert_eq!(core.available_breakpoint_units().unwrap(), 6);

        core.set_hw_breakpoint(0x0800_0100).unwrap();
        core.set_hw_breakpoint(0x0800_0202).unwrap();
        assert_eq!(target.lock().read_word(FpRev1CompX::ADDRESS), 0x4800_0101);
        assert_eq!(target.lock().read_word(FpRev1CompX::ADDRESS + 4), 0x8800_0201);

        core.clear_hw_breakpoint(0x0800_0100).unwrap();
        assert_eq!(target.lock().read_word(FpRev1CompX::ADDRESS), 0);

        for address in (0x0800_0000..).step_by(4).take(5) {
            core.set_hw_breakpoint(address).unwrap();
        }
        assert!(matches!(
            core.set_hw_breakpoint(0x0800_1000),
            Err(Error::BreakpointUnitsExhausted(6))
        ));
    }
}
