use ihex::Record;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;

use super::builder::FlashBuilder;
use super::{BinOptions, DownloadOptions, FileDownloadError, FlashError, Flasher};
use crate::config::{MemoryRegion, NvmRegion, TargetDescriptionSource};
use crate::session::Session;

/// `FlashLoader` is a struct which manages the flashing of any chunks of data onto any sections of flash.
///
/// Use [add_data()](FlashLoader::add_data) to add a chunk of data.
/// Once you are done adding all your data, use `commit()` to flash the data.
/// The flash loader will make sure to select the appropriate flash region for the right data chunks.
/// Region crossing data chunks are allowed as long as the regions are contiguous.
#[derive(Debug)]
pub struct FlashLoader {
    memory_map: Vec<MemoryRegion>,
    builder: FlashBuilder,

    /// Source of the flash description,
    /// used for diagnostics.
    source: TargetDescriptionSource,
}

impl FlashLoader {
    /// Create a new flash loader.
    pub fn new(memory_map: Vec<MemoryRegion>, source: TargetDescriptionSource) -> Self {
        Self {
            memory_map,
            builder: FlashBuilder::new(),
            source,
        }
    }

    fn nvm_regions(&self) -> impl Iterator<Item = &NvmRegion> {
        self.memory_map
            .iter()
            .filter_map(MemoryRegion::as_nvm_region)
            .filter(|region| !region.is_alias)
    }

    /// Check the given address range is completely covered by the non-volatile memory,
    /// possibly by multiple regions.
    fn check_data_in_memory_map(&self, range: Range<u64>) -> Result<(), FlashError> {
        let mut address = range.start;
        while address < range.end {
            match self
                .nvm_regions()
                .find(|region| region.range.contains(&address))
            {
                Some(region) => address = region.range.end,
                None => {
                    return Err(FlashError::AddressOutOfRange {
                        address: range.start,
                        size: (range.end - range.start) as usize,
                        description_source: self.source.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Stages a chunk of data to be programmed.
    ///
    /// The chunk can cross flash boundaries as long as one flash region connects to another flash region.
    pub fn add_data(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        tracing::debug!(
            "Adding data at address {:#010x} with size {} bytes",
            address,
            data.len()
        );

        if data.is_empty() {
            return Ok(());
        }

        let end = address
            .checked_add(data.len() as u64)
            .ok_or_else(|| FlashError::AddressOutOfRange {
                address,
                size: data.len(),
                description_source: self.source.clone(),
            })?;

        self.check_data_in_memory_map(address..end)?;
        self.builder.add_data(address, data)
    }

    /// Returns `true` if no data was added.
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Reads the data from the binary file and adds it to the loader without splitting it into flash instructions yet.
    pub fn load_bin_data<T: Read + Seek>(
        &mut self,
        file: &mut T,
        options: BinOptions,
    ) -> Result<(), FileDownloadError> {
        // Skip the specified bytes.
        file.seek(SeekFrom::Start(u64::from(options.skip)))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        // Without a base address, the data goes to the start of the flash.
        let address = match options.base_address {
            Some(address) => address,
            None => self
                .nvm_regions()
                .map(|region| region.range.start)
                .next()
                .ok_or(FlashError::AddressOutOfRange {
                    address: 0,
                    size: buf.len(),
                    description_source: self.source.clone(),
                })?,
        };

        self.add_data(address, &buf)?;

        Ok(())
    }

    /// Reads the HEX data segments and adds them as loadable data blocks to the loader.
    /// This does not create and flash loader instructions yet.
    pub fn load_hex_data<T: Read>(&mut self, file: &mut T) -> Result<(), FileDownloadError> {
        let mut base_address = 0;

        let mut data = String::new();
        file.read_to_string(&mut data)?;

        for record in ihex::Reader::new(&data) {
            match record? {
                Record::Data { offset, value } => {
                    let offset = base_address + offset as u64;
                    self.add_data(offset, &value)?;
                }
                Record::EndOfFile => (),
                Record::ExtendedSegmentAddress(address) => {
                    base_address = (address as u64) * 16;
                }
                Record::StartSegmentAddress { .. } => (),
                Record::ExtendedLinearAddress(address) => {
                    base_address = (address as u64) << 16;
                }
                Record::StartLinearAddress(_) => (),
            };
        }
        Ok(())
    }

    /// Writes all the stored data chunks to flash.
    ///
    /// Each non-volatile region that contains data is programmed with the flash algorithm
    /// covering it. Sectors and pages which were already erased or programmed when an
    /// error occurs stay that way.
    pub fn commit(
        &self,
        session: &mut Session,
        options: DownloadOptions,
    ) -> Result<(), FlashError> {
        tracing::debug!("Committing FlashLoader!");

        let progress = options.progress.clone().unwrap_or_default();
        let mut chip_erased = false;

        for region in self.nvm_regions() {
            if self.builder.data_in_range(&region.range).next().is_none() {
                continue;
            }

            tracing::debug!(
                "Flashing region {:?} {:#010x?}",
                region.name,
                region.range
            );

            let target = session.target();
            let algorithm = target
                .flash_algorithm_for_region(region)
                .cloned()
                .ok_or_else(|| FlashError::NoFlashLoaderAlgorithmAttached {
                    name: target.name.clone(),
                    start: region.range.start,
                    end: region.range.end,
                })?;

            tracing::debug!("Using flash algorithm '{}'", algorithm.name);

            if options.dry_run {
                tracing::info!(
                    "Skipping programming of {:#010x?}, DRY RUN!",
                    region.range
                );
                continue;
            }

            let mut flasher = Flasher::new(session, &algorithm, progress.clone())?;
            if let Some(cancel) = &options.cancel {
                flasher = flasher.with_cancellation(cancel.clone());
            }

            flasher.load()?;

            if options.do_chip_erase && !chip_erased {
                tracing::debug!("Erasing the whole chip before programming");
                flasher.erase_all()?;
                chip_erased = true;
            }

            flasher.program(
                &region.range,
                &self.builder,
                options.keep_unwritten_bytes,
                options.verify,
                chip_erased,
            )?;
        }

        tracing::debug!("Committing FlashLoader finished");

        Ok(())
    }
}
