use super::{FlashError, FlashProgress, Flasher};
use crate::config::RawFlashAlgorithm;
use crate::Session;

/// Mass-erase all nonvolatile memory.
///
/// Every flash algorithm which covers one of the non-volatile regions of the target
/// runs its EraseAll routine once.
pub fn erase_all(session: &mut Session, progress: FlashProgress) -> Result<(), FlashError> {
    tracing::debug!("Erasing all...");

    let target = session.target();
    let mut algorithms = Vec::<RawFlashAlgorithm>::new();

    for region in target.nvm_regions() {
        tracing::debug!(
            "    region: {:#010x?} ({} bytes)",
            region.range,
            region.range.end - region.range.start
        );

        let algorithm = target.flash_algorithm_for_region(region).ok_or_else(|| {
            FlashError::NoFlashLoaderAlgorithmAttached {
                name: target.name.clone(),
                start: region.range.start,
                end: region.range.end,
            }
        })?;

        tracing::debug!("     -- using algorithm: {}", algorithm.name);
        if !algorithms.iter().any(|known| known.name == algorithm.name) {
            algorithms.push(algorithm.clone());
        }
    }

    for algorithm in algorithms {
        let mut flasher = Flasher::new(session, &algorithm, progress.clone())?;
        flasher.load()?;
        flasher.erase_all()?;
    }

    progress.finished();

    Ok(())
}
