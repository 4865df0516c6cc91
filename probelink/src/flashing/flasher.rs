use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::Range;
use std::time::{Duration, Instant};

use super::{
    CancellationToken, FlashAlgorithm, FlashBuilder, FlashError, FlashLayout, FlashProgress,
};
use crate::config::RawFlashAlgorithm;
use crate::core::{Core, RegisterId};
use crate::memory::MemoryInterface;
use crate::session::Session;

pub(super) trait Operation {
    fn operation() -> u32;
    fn operation_name() -> &'static str {
        match Self::operation() {
            1 => "Erase",
            2 => "Program",
            3 => "Verify",
            _ => "Unknown Operation",
        }
    }
}

pub(super) struct Erase;

impl Operation for Erase {
    fn operation() -> u32 {
        1
    }
}

pub(super) struct Program;

impl Operation for Program {
    fn operation() -> u32 {
        2
    }
}

pub(super) struct Verify;

impl Operation for Verify {
    fn operation() -> u32 {
        3
    }
}

/// The stage a [`Flasher`] is in.
///
/// A successful run goes through `Idle`, `AlgorithmLoaded`, `Erasing`, `Programming`,
/// optionally `Verifying`, and back to `Idle`. Any error moves the flasher to `Failed`,
/// which it does not leave.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlashState {
    /// Nothing has been done yet, or the last run finished.
    Idle,
    /// The flash algorithm is in RAM.
    AlgorithmLoaded,
    /// Sectors are being erased.
    Erasing,
    /// Pages are being programmed.
    Programming,
    /// The flash is read back and compared.
    Verifying,
    /// An operation failed. The contents of the flash are undefined.
    Failed,
}

/// A structure to control the flash of an attached microchip.
///
/// Once constructed it can be used to program data to the flash.
pub struct Flasher<'session> {
    session: &'session mut Session,
    flash_algorithm: FlashAlgorithm,
    progress: FlashProgress,
    cancel: Option<CancellationToken>,
    state: FlashState,
}

impl<'session> Flasher<'session> {
    /// Prepare `raw_flash_algorithm` to run from the RAM of the target.
    ///
    /// The algorithm is not loaded yet, see [`Flasher::load`].
    pub fn new(
        session: &'session mut Session,
        raw_flash_algorithm: &RawFlashAlgorithm,
        progress: FlashProgress,
    ) -> Result<Self, FlashError> {
        let target = session.target();

        // Find a RAM region from which we can run the algo.
        let ram = target
            .algorithm_ram(raw_flash_algorithm.load_address)
            .ok_or_else(|| FlashError::NoRamDefined {
                name: target.name.clone(),
            })?;

        tracing::info!("Chosen RAM to run the algo: {:x?}", ram);

        let flash_algorithm = FlashAlgorithm::assemble_from_raw(raw_flash_algorithm, ram)?;

        Ok(Self {
            session,
            flash_algorithm,
            progress,
            cancel: None,
            state: FlashState::Idle,
        })
    }

    /// Check `token` between two sector or page operations.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The stage the flasher is in.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// The assembled flash algorithm.
    pub fn flash_algorithm(&self) -> &FlashAlgorithm {
        &self.flash_algorithm
    }

    /// Reset and halt the core, download the algorithm to RAM and read it back.
    pub fn load(&mut self) -> Result<(), FlashError> {
        let result = self.load_algorithm();
        self.track(result)?;

        self.state = FlashState::AlgorithmLoaded;
        Ok(())
    }

    fn load_algorithm(&mut self) -> Result<(), FlashError> {
        tracing::debug!("Initializing the flash algorithm.");
        let algo = &self.flash_algorithm;

        let mut core = self.session.core().map_err(FlashError::Core)?;

        tracing::debug!("Reset and halt");
        core.reset_and_halt().map_err(FlashError::Core)?;

        // Load flash algorithm code into target RAM.
        let span = tracing::debug_span!("Loading algorithm into RAM", address = algo.load_address)
            .entered();

        core.write_32(algo.load_address, algo.instructions.as_slice())
            .map_err(FlashError::Memory)?;

        drop(span);

        let mut data = vec![0; algo.instructions.len()];
        core.read_32(algo.load_address, &mut data)
            .map_err(FlashError::Memory)?;

        for (offset, (original, read_back)) in algo.instructions.iter().zip(data.iter()).enumerate()
        {
            if original != read_back {
                tracing::error!(
                    "Failed to verify flash algorithm. Data mismatch at address {:#010x}",
                    algo.load_address + (4 * offset) as u64
                );
                tracing::error!("Original instruction: {:#010x}", original);
                tracing::error!("Readback instruction: {:#010x}", read_back);

                return Err(FlashError::FlashAlgorithmNotLoaded);
            }
        }

        tracing::debug!("RAM contents match flashing algo blob.");

        Ok(())
    }

    /// Moves to `Failed` and reports the stage the error happened in.
    fn track<T>(&mut self, result: Result<T, FlashError>) -> Result<T, FlashError> {
        if let Err(error) = &result {
            if self.state != FlashState::Failed {
                tracing::warn!("Flashing failed while {:?}: {}", self.state, error);
                self.progress.failed(self.state);
                self.state = FlashState::Failed;
            }
        }
        result
    }

    fn ensure_loaded(&self) -> Result<(), FlashError> {
        match self.state {
            FlashState::AlgorithmLoaded => Ok(()),
            _ => Err(FlashError::FlashAlgorithmNotLoaded),
        }
    }

    fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<(), FlashError> {
        match cancel {
            Some(token) if token.is_cancelled() => {
                tracing::info!("Flashing was cancelled");
                Err(FlashError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    fn init<O: Operation>(&mut self) -> Result<ActiveFlasher<'_, O>, FlashError> {
        let core = self.session.core().map_err(FlashError::Core)?;

        tracing::debug!("Preparing Flasher for operation {}", O::operation_name());
        let mut flasher = ActiveFlasher::<O> {
            core,
            progress: &self.progress,
            cancel: self.cancel.as_ref(),
            flash_algorithm: &self.flash_algorithm,
            _operation: PhantomData,
        };

        flasher.init()?;

        Ok(flasher)
    }

    /// Runs `f` between the Init and UnInit routines of the algorithm.
    ///
    /// If `f` fails while the core is halted, UnInit is still attempted. A core which
    /// is still running an algorithm routine is left alone.
    fn run<O, T, F>(&mut self, f: F) -> Result<T, FlashError>
    where
        O: Operation,
        F: FnOnce(&mut ActiveFlasher<'_, O>) -> Result<T, FlashError>,
    {
        let mut active = self.init::<O>()?;

        match f(&mut active) {
            Ok(result) => {
                active.uninit()?;
                Ok(result)
            }
            Err(error) => {
                if active.core.cached_status().is_halted() {
                    if let Err(uninit_error) = active.uninit() {
                        tracing::warn!("UnInit after a failure failed as well: {}", uninit_error);
                    }
                }
                Err(error)
            }
        }
    }

    /// Program the data of `flash_builder` inside `region`.
    ///
    /// If `restore_unwritten_bytes` is `true`, all bytes of a sector,
    /// that are not to be written during flashing will be read from the flash first
    /// and written again once the sector is erased.
    ///
    /// The flasher is `Idle` afterwards, and has to be loaded again for another run.
    pub(super) fn program(
        &mut self,
        region: &Range<u64>,
        flash_builder: &FlashBuilder,
        restore_unwritten_bytes: bool,
        verify: bool,
        skip_erasing: bool,
    ) -> Result<(), FlashError> {
        self.ensure_loaded()?;
        tracing::debug!("Starting program procedure.");

        let result = self.program_layout(
            region,
            flash_builder,
            restore_unwritten_bytes,
            verify,
            skip_erasing,
        );
        self.track(result)?;

        self.state = FlashState::Idle;
        self.progress.finished();
        Ok(())
    }

    fn program_layout(
        &mut self,
        region: &Range<u64>,
        flash_builder: &FlashBuilder,
        restore_unwritten_bytes: bool,
        verify: bool,
        skip_erasing: bool,
    ) -> Result<(), FlashError> {
        // Convert the list of flash operations into flash sectors and pages.
        let mut flash_layout = flash_builder.build_sectors_and_pages(
            region,
            &self.flash_algorithm,
            restore_unwritten_bytes,
        )?;
        self.progress.initialized(flash_layout.clone());

        tracing::debug!(
            "Restoring unwritten bytes enabled: {:?}",
            restore_unwritten_bytes
        );

        if restore_unwritten_bytes {
            self.fill_pages(&mut flash_layout)?;
        }

        // Skip erase if the whole chip was erased before.
        if !skip_erasing {
            self.sector_erase(&flash_layout)?;
        }
        self.program_pages(&flash_layout)?;

        if verify {
            self.verify(&flash_layout)?;
        }

        Ok(())
    }

    /// Read the bytes of the fills from the flash, before the sectors are erased.
    fn fill_pages(&mut self, flash_layout: &mut FlashLayout) -> Result<(), FlashError> {
        let fills = flash_layout.fills().to_vec();

        self.run::<Verify, _, _>(|active| {
            for fill in &fills {
                let page = &mut flash_layout.pages_mut()[fill.page_index()];
                let page_offset = (fill.address() - page.address()) as usize;
                let page_slice =
                    &mut page.data_mut()[page_offset..page_offset + fill.size() as usize];

                active
                    .core
                    .read(fill.address(), page_slice)
                    .map_err(FlashError::Memory)?;
            }
            Ok(())
        })
    }

    /// Perform an erase of all sectors given in `flash_layout`.
    fn sector_erase(&mut self, flash_layout: &FlashLayout) -> Result<(), FlashError> {
        self.state = FlashState::Erasing;
        self.progress.started_erasing();

        self.run::<Erase, _, _>(|active| {
            for sector in flash_layout.sectors() {
                Self::check_cancelled(active.cancel)?;

                let t = Instant::now();
                active.erase_sector(sector.address())?;
                active
                    .progress
                    .sector_erased(sector.address(), sector.size(), t.elapsed());
            }
            Ok(())
        })
    }

    /// Programs the pages given in `flash_layout` into the flash.
    fn program_pages(&mut self, flash_layout: &FlashLayout) -> Result<(), FlashError> {
        self.state = FlashState::Programming;
        self.progress.started_programming();

        self.run::<Program, _, _>(|active| {
            for page in flash_layout.pages() {
                Self::check_cancelled(active.cancel)?;

                let t = Instant::now();
                active.program_page(page.address(), page.data())?;
                active
                    .progress
                    .page_programmed(page.address(), page.size(), t.elapsed());
            }
            Ok(())
        })
    }

    /// Compare the contents of the flash with the pages of `flash_layout`.
    fn verify(&mut self, flash_layout: &FlashLayout) -> Result<(), FlashError> {
        self.state = FlashState::Verifying;
        self.progress.started_verifying();

        self.run::<Verify, _, _>(|active| {
            for page in flash_layout.pages() {
                let mut actual = vec![0; page.data().len()];
                active
                    .core
                    .read(page.address(), &mut actual)
                    .map_err(FlashError::Memory)?;

                if let Some(offset) = page
                    .data()
                    .iter()
                    .zip(actual.iter())
                    .position(|(expected, actual)| expected != actual)
                {
                    let address = page.address() + offset as u64;
                    tracing::error!("Verification failed at {:#010x}", address);
                    return Err(FlashError::VerifyFailed { address });
                }
            }
            Ok(())
        })
    }

    /// Erase the whole flash with the EraseAll routine of the algorithm.
    pub fn erase_all(&mut self) -> Result<(), FlashError> {
        self.ensure_loaded()?;

        if self.flash_algorithm.pc_erase_all.is_none() {
            return Err(FlashError::RoutineNotSupported("erase_all"));
        }

        self.state = FlashState::Erasing;
        self.progress.started_erasing();

        let result = self.run::<Erase, _, _>(|active| active.erase_all());
        self.track(result)?;

        self.state = FlashState::AlgorithmLoaded;
        Ok(())
    }
}

struct Registers {
    pc: u32,
    r0: Option<u32>,
    r1: Option<u32>,
    r2: Option<u32>,
}

impl Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}({:?}, {:?}, {:?})",
            self.pc, self.r0, self.r1, self.r2
        )
    }
}

fn into_reg(val: u64) -> Result<u32, FlashError> {
    let reg_value: u32 = val
        .try_into()
        .map_err(|_| FlashError::RegisterValueNotSupported(val))?;

    Ok(reg_value)
}

pub(super) struct ActiveFlasher<'probe, O: Operation> {
    core: Core<'probe>,
    progress: &'probe FlashProgress,
    cancel: Option<&'probe CancellationToken>,
    flash_algorithm: &'probe FlashAlgorithm,
    _operation: PhantomData<O>,
}

impl<'probe, O: Operation> ActiveFlasher<'probe, O> {
    #[tracing::instrument(name = "Call to flash algorithm init", skip(self))]
    fn init(&mut self) -> Result<(), FlashError> {
        let algo = self.flash_algorithm;

        let address = algo.flash_properties.address_range.start;

        // Execute init routine if one is present.
        if let Some(pc_init) = algo.pc_init {
            let result = self.call_function_and_wait(
                &Registers {
                    pc: into_reg(pc_init)?,
                    r0: Some(into_reg(address)?),
                    r1: Some(0),
                    r2: Some(O::operation()),
                },
                "init",
                Duration::from_secs(2),
            )?;

            if result != 0 {
                return Err(FlashError::RoutineCallFailed {
                    name: "init",
                    error_code: result,
                });
            }
        }

        Ok(())
    }

    fn uninit(&mut self) -> Result<(), FlashError> {
        tracing::debug!("Running uninit routine.");
        let algo = self.flash_algorithm;

        if let Some(pc_uninit) = algo.pc_uninit {
            let result = self.call_function_and_wait(
                &Registers {
                    pc: into_reg(pc_uninit)?,
                    r0: Some(O::operation()),
                    r1: None,
                    r2: None,
                },
                "uninit",
                Duration::from_secs(2),
            )?;

            if result != 0 {
                return Err(FlashError::RoutineCallFailed {
                    name: "uninit",
                    error_code: result,
                });
            }
        }
        Ok(())
    }

    fn call_function_and_wait(
        &mut self,
        registers: &Registers,
        routine: &'static str,
        timeout: Duration,
    ) -> Result<u32, FlashError> {
        self.call_function(registers)?;
        self.wait_for_completion(routine, timeout)
    }

    /// Set up the registers for the routine and let the core run.
    ///
    /// The routine returns to the `BKPT` at the start of the algorithm, which halts the core.
    fn call_function(&mut self, registers: &Registers) -> Result<(), FlashError> {
        tracing::debug!("Calling routine {:?}", &registers);

        let algo = self.flash_algorithm;

        let registers = [
            (RegisterId::PC, Some(registers.pc)),
            (RegisterId(0), registers.r0),
            (RegisterId(1), registers.r1),
            (RegisterId(2), registers.r2),
            (RegisterId(9), Some(into_reg(algo.static_base)?)),
            (RegisterId::SP, Some(into_reg(algo.begin_stack)?)),
            // The return address has the Thumb bit set.
            (RegisterId::LR, Some(into_reg(algo.load_address + 1)?)),
        ];

        for (id, value) in registers {
            if let Some(value) = value {
                self.core
                    .write_core_reg(id, value)
                    .map_err(FlashError::Core)?;
            }
        }

        self.core.resume().map_err(FlashError::Core)?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn wait_for_completion(
        &mut self,
        routine: &'static str,
        timeout: Duration,
    ) -> Result<u32, FlashError> {
        tracing::debug!("Waiting for routine call completion.");

        // Wait until halted state is active again.
        let start = Instant::now();

        while !self.core.status().map_err(FlashError::Core)?.is_halted() {
            if start.elapsed() >= timeout {
                tracing::error!("'{}' did not return within {:?}", routine, timeout);
                return Err(FlashError::AlgorithmExecutionTimeout { routine, timeout });
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let r = self
            .core
            .read_core_reg(RegisterId(0))
            .map_err(FlashError::Core)?;
        Ok(r)
    }
}

impl ActiveFlasher<'_, Erase> {
    fn erase_all(&mut self) -> Result<(), FlashError> {
        tracing::debug!("Erasing entire chip.");
        let algo = self.flash_algorithm;

        let Some(pc_erase_all) = algo.pc_erase_all else {
            return Err(FlashError::RoutineNotSupported("erase_all"));
        };

        let result = self.call_function_and_wait(
            &Registers {
                pc: into_reg(pc_erase_all)?,
                r0: None,
                r1: None,
                r2: None,
            },
            "erase_all",
            Duration::from_secs(30),
        )?;

        if result != 0 {
            return Err(FlashError::RoutineCallFailed {
                name: "erase_all",
                error_code: result,
            });
        }

        Ok(())
    }

    fn erase_sector(&mut self, address: u64) -> Result<(), FlashError> {
        tracing::info!("Erasing sector at address {:#010x}", address);
        let t1 = Instant::now();

        let result = self.call_function_and_wait(
            &Registers {
                pc: into_reg(self.flash_algorithm.pc_erase_sector)?,
                r0: Some(into_reg(address)?),
                r1: None,
                r2: None,
            },
            "erase_sector",
            Duration::from_millis(
                self.flash_algorithm.flash_properties.erase_sector_timeout as u64,
            ),
        )?;
        tracing::info!(
            "Done erasing sector. Result is {}. This took {:?}",
            result,
            t1.elapsed()
        );

        if result != 0 {
            Err(FlashError::RoutineCallFailed {
                name: "erase_sector",
                error_code: result,
            })
        } else {
            Ok(())
        }
    }
}

impl ActiveFlasher<'_, Program> {
    fn program_page(&mut self, address: u64, bytes: &[u8]) -> Result<(), FlashError> {
        let t1 = Instant::now();

        tracing::info!(
            "Flashing page at address {:#010x} with size: {}",
            address,
            bytes.len()
        );

        // Transfer the bytes to RAM.
        self.core
            .write(self.flash_algorithm.page_buffer, bytes)
            .map_err(FlashError::Memory)?;

        let result = self.call_function_and_wait(
            &Registers {
                pc: into_reg(self.flash_algorithm.pc_program_page)?,
                r0: Some(into_reg(address)?),
                r1: Some(bytes.len() as u32),
                r2: Some(into_reg(self.flash_algorithm.page_buffer)?),
            },
            "program_page",
            Duration::from_millis(
                self.flash_algorithm.flash_properties.program_page_timeout as u64,
            ),
        )?;
        tracing::info!("Flashing took: {:?}", t1.elapsed());

        if result != 0 {
            Err(FlashError::RoutineCallFailed {
                name: "program_page",
                error_code: result,
            })
        } else {
            Ok(())
        }
    }
}
