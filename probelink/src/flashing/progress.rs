use super::{FlashLayout, FlashState};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Forwards the [`ProgressEvent`]s of a download to a closure.
///
/// The closure runs on the thread that flashes, so it should return quickly.
///
/// # Example
///
/// ```
/// use probelink::flashing::FlashProgress;
///
/// // Print events
/// let progress = FlashProgress::new(|event| println!("Event: {:#?}", event));
/// ```
#[derive(Clone)]
pub struct FlashProgress {
    handler: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl fmt::Debug for FlashProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FlashProgress")
    }
}

impl Default for FlashProgress {
    fn default() -> Self {
        Self::new(|_| {})
    }
}

impl FlashProgress {
    /// Calls `handler` for every event.
    pub fn new(handler: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(super) fn initialized(&self, flash_layout: FlashLayout) {
        self.emit(ProgressEvent::Initialized { flash_layout });
    }

    pub(super) fn started_erasing(&self) {
        self.emit(ProgressEvent::StartedErasing);
    }

    pub(super) fn sector_erased(&self, address: u64, size: u64, time: Duration) {
        self.emit(ProgressEvent::SectorErased {
            address,
            size,
            time,
        });
    }

    pub(super) fn started_programming(&self) {
        self.emit(ProgressEvent::StartedProgramming);
    }

    pub(super) fn page_programmed(&self, address: u64, size: u32, time: Duration) {
        self.emit(ProgressEvent::PageProgrammed {
            address,
            size,
            time,
        });
    }

    pub(super) fn started_verifying(&self) {
        self.emit(ProgressEvent::StartedVerifying);
    }

    pub(super) fn finished(&self) {
        self.emit(ProgressEvent::Finished);
    }

    pub(super) fn failed(&self, state: FlashState) {
        self.emit(ProgressEvent::Failed { state });
    }
}

/// A step of a download.
///
/// A successful download emits:
///
/// * `Initialized`
/// * `StartedErasing`
/// * `SectorErased` for every sector
/// * `StartedProgramming`
/// * `PageProgrammed` for every page
/// * `StartedVerifying`, if verification was requested
/// * `Finished`
///
/// An error in any step emits `Failed` as the last event.
#[derive(Debug)]
pub enum ProgressEvent {
    /// The sectors and pages to write are known.
    Initialized {
        /// What will be erased and programmed.
        flash_layout: FlashLayout,
    },
    /// The flash algorithm is loaded, erasing begins.
    StartedErasing,
    /// One sector is erased.
    SectorErased {
        /// First address of the sector.
        address: u64,
        /// Sector size in bytes.
        size: u64,
        /// Duration of the `EraseSector` call.
        time: Duration,
    },
    /// All sectors are erased, programming begins.
    StartedProgramming,
    /// One page is written.
    PageProgrammed {
        /// First address of the page.
        address: u64,
        /// Page size in bytes.
        size: u32,
        /// Duration of the `ProgramPage` call.
        time: Duration,
    },
    /// The flash is read back and compared.
    StartedVerifying,
    /// Everything was written.
    Finished,
    /// The download stopped with an error or was cancelled.
    Failed {
        /// The step that failed.
        state: FlashState,
    },
}
