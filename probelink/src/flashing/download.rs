use serde::{Deserialize, Serialize};

use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{FlashError, FlashProgress};
use crate::session::Session;

/// Where the content of a raw binary file goes.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinOptions {
    /// Address of the first byte after `skip`. Defaults to the start of the
    /// first non-volatile region of the target.
    pub base_address: Option<u64>,
    /// Bytes at the start of the file which are not flashed.
    pub skip: u32,
}

/// The firmware file formats the loader reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Format {
    /// A raw image of the flash, placed according to the [`BinOptions`].
    Bin(BinOptions),
    /// [Intel HEX](https://en.wikipedia.org/wiki/Intel_HEX), which carries its own addresses.
    Hex,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase()[..] {
            "bin" | "binary" => Ok(Format::Bin(BinOptions::default())),
            "hex" | "ihex" | "intelhex" => Ok(Format::Hex),
            _ => Err(format!("Format '{s}' is unknown.")),
        }
    }
}

/// Reading or flashing a firmware file failed.
#[derive(Debug, thiserror::Error)]
pub enum FileDownloadError {
    /// The file was read, writing it to the flash failed.
    #[error("Flashing the file failed")]
    Flash(#[from] FlashError),
    /// The file is not valid Intel HEX.
    #[error("The file is not valid Intel HEX")]
    IhexRead(#[from] ihex::ReaderError),
    /// The file could not be opened or read.
    #[error("Reading the file failed")]
    IO(#[from] std::io::Error),
}

/// A flag to stop a running flash operation.
///
/// The flag is checked between two sector erases and between two page
/// programs. A routine which is already running on the target is always
/// waited for.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token which is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the operation to stop. All clones of the token observe the request.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for downloading a file onto a target chip.
#[derive(Debug, Default, Clone)]
pub struct DownloadOptions {
    /// Receives the [`ProgressEvent`](super::ProgressEvent)s of the download.
    pub progress: Option<FlashProgress>,
    /// Bytes of an erased sector which the data doesn't cover are read before
    /// the erase and written back, instead of being left erased.
    pub keep_unwritten_bytes: bool,
    /// Read the flash back after programming and compare it to the data.
    pub verify: bool,
    /// Do everything up to, but not including, loading the flash algorithm.
    pub dry_run: bool,
    /// Erase the whole chip with the EraseAll routine of the flash algorithm instead of erasing
    /// single sectors. Fails if the algorithm has no such routine.
    pub do_chip_erase: bool,
    /// A token to stop the operation between two sector or page operations.
    pub cancel: Option<CancellationToken>,
}

/// Flashes the file at `path` with the default [`DownloadOptions`].
pub fn download_file(
    session: &mut Session,
    path: impl AsRef<Path>,
    format: Format,
) -> Result<(), FileDownloadError> {
    download_file_with_options(session, path, format, DownloadOptions::default())
}

/// Flashes the file at `path`, which is read as `format`.
///
/// All data must lie in non-volatile regions of the target.
pub fn download_file_with_options(
    session: &mut Session,
    path: impl AsRef<Path>,
    format: Format,
    options: DownloadOptions,
) -> Result<(), FileDownloadError> {
    let mut file = File::open(path.as_ref())?;
    let mut loader = session.flash_loader();

    match format {
        Format::Bin(bin_options) => loader.load_bin_data(&mut file, bin_options)?,
        Format::Hex => loader.load_hex_data(&mut file)?,
    }

    loader
        .commit(session, options)
        .map_err(FileDownloadError::Flash)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("bin", Format::Bin(BinOptions::default()); "bin")]
    #[test_case("BINARY", Format::Bin(BinOptions::default()); "binary upper case")]
    #[test_case("ihex", Format::Hex; "ihex")]
    #[test_case("hex", Format::Hex; "hex")]
    fn parse_format(input: &str, expected: Format) {
        assert_eq!(input.parse::<Format>(), Ok(expected));
    }

    #[test]
    fn unknown_format() {
        assert!("elf".parse::<Format>().is_err());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }
}
