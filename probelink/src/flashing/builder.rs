use std::collections::BTreeMap;
use std::ops::Range;

use crate::config::{MemoryRange, PageInfo, SectorInfo};

use super::{FlashAlgorithm, FlashError};

/// The description of a page in flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPage {
    address: u64,
    data: Vec<u8>,
}

impl FlashPage {
    /// Creates a new flash page from a `PageInfo`, filled with `erased_byte_value`.
    fn new(page_info: &PageInfo, erased_byte_value: u8) -> Self {
        Self {
            address: page_info.base_address,
            data: vec![erased_byte_value; page_info.size as usize],
        }
    }

    /// Returns the start address of the page.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the page in bytes.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Returns the data slice of the page.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the mut data slice of the page.
    pub(super) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn end(&self) -> u64 {
        self.address + self.data.len() as u64
    }
}

/// The description of a sector in flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSector {
    address: u64,
    size: u64,
}

impl FlashSector {
    /// Creates a new empty flash sector form a `SectorInfo`.
    fn new(sector_info: &SectorInfo) -> Self {
        Self {
            address: sector_info.base_address,
            size: sector_info.size,
        }
    }

    /// Returns the start address of the sector.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the sector in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A struct to hold all the information about one region
/// in the flash that is erased during flashing and has to be restored to its original value afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashFill {
    address: u64,
    size: u64,
    page_index: usize,
}

impl FlashFill {
    /// Returns the start address of the fill.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the fill in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the corresponding page index of the fill.
    pub fn page_index(&self) -> usize {
        self.page_index
    }
}

/// The built layout of the data in flash.
///
/// Sectors and pages are sorted by address, and every sector is listed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    sectors: Vec<FlashSector>,
    pages: Vec<FlashPage>,
    fills: Vec<FlashFill>,
}

impl FlashLayout {
    /// Get the sectors of the flash layout.
    pub fn sectors(&self) -> &[FlashSector] {
        &self.sectors
    }

    /// Get the pages of the flash layout.
    pub fn pages(&self) -> &[FlashPage] {
        &self.pages
    }

    /// Get the pages of the flash layout as mut.
    pub(super) fn pages_mut(&mut self) -> &mut [FlashPage] {
        &mut self.pages
    }

    /// Get the fills of the flash layout.
    pub fn fills(&self) -> &[FlashFill] {
        &self.fills
    }
}

/// A block of data that is to be written to flash.
#[derive(Debug, Clone)]
struct FlashDataBlock {
    address: u64,
    data: Vec<u8>,
}

impl FlashDataBlock {
    fn range(&self) -> Range<u64> {
        self.address..self.address + self.data.len() as u64
    }
}

/// A helper structure to build a flash layout from a set of data blocks.
#[derive(Debug, Default)]
pub(super) struct FlashBuilder {
    data_blocks: Vec<FlashDataBlock>,
}

impl FlashBuilder {
    /// Creates a new `FlashBuilder` with empty data.
    pub(super) fn new() -> Self {
        Self {
            data_blocks: vec![],
        }
    }

    /// Add a block of data to be programmed.
    ///
    /// The blocks are kept sorted by address. A block which overlaps an already added
    /// block is rejected.
    pub(super) fn add_data(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        let end = address
            .checked_add(data.len() as u64)
            .ok_or(FlashError::InvalidFlashAddress(address))?;
        let range = address..end;

        let position = match self
            .data_blocks
            .binary_search_by_key(&address, |block| block.address)
        {
            Ok(_) => return Err(FlashError::DataOverlap(address)),
            Err(position) => position,
        };

        // Only the direct neighbours can overlap, as the blocks are sorted.
        let previous = position.checked_sub(1).and_then(|p| self.data_blocks.get(p));
        let next = self.data_blocks.get(position);
        if previous
            .into_iter()
            .chain(next)
            .any(|block| block.range().intersects_range(&range))
        {
            return Err(FlashError::DataOverlap(address));
        }

        self.data_blocks.insert(
            position,
            FlashDataBlock {
                address,
                data: data.to_vec(),
            },
        );

        Ok(())
    }

    /// Returns true if no data was added.
    pub(super) fn is_empty(&self) -> bool {
        self.data_blocks.is_empty()
    }

    /// The data which lies inside `range`, cut to the range.
    pub(super) fn data_in_range<'a>(
        &'a self,
        range: &'a Range<u64>,
    ) -> impl Iterator<Item = (u64, &'a [u8])> + 'a {
        self.data_blocks
            .iter()
            .filter(move |block| block.range().intersects_range(range))
            .map(move |block| {
                let start = block.address.max(range.start);
                let end = block.range().end.min(range.end);
                let offset = (start - block.address) as usize;

                (start, &block.data[offset..offset + (end - start) as usize])
            })
    }

    /// Lays out the data inside `region` into the sectors and pages of the flash.
    ///
    /// Every sector touched by the data is listed exactly once. Pages which are only
    /// partially written are padded with the erased byte value, and the padding is
    /// reported as fills. If `restore_unwritten_bytes` is `true`, the untouched pages
    /// of all erased sectors are added as well, so their contents can be restored.
    pub(super) fn build_sectors_and_pages(
        &self,
        region: &Range<u64>,
        flash_algorithm: &FlashAlgorithm,
        restore_unwritten_bytes: bool,
    ) -> Result<FlashLayout, FlashError> {
        let erased_byte_value = flash_algorithm.flash_properties.erased_byte_value;

        // Pages with the address ranges that are written in them.
        let mut pages: BTreeMap<u64, (FlashPage, Vec<Range<u64>>)> = BTreeMap::new();

        for (address, data) in self.data_in_range(region) {
            let mut offset = 0;

            while offset < data.len() {
                let current = address + offset as u64;
                let page_info = flash_algorithm
                    .page_info(current)
                    .ok_or(FlashError::InvalidFlashAddress(current))?;

                let (page, written) = pages.entry(page_info.base_address).or_insert_with(|| {
                    tracing::trace!("Added page {:#010x?}", page_info.address_range());
                    (FlashPage::new(&page_info, erased_byte_value), vec![])
                });

                let end = page.end().min(address + data.len() as u64);
                let size = (end - current) as usize;
                let page_offset = (current - page.address) as usize;

                page.data[page_offset..page_offset + size]
                    .copy_from_slice(&data[offset..offset + size]);
                written.push(current..end);

                offset += size;
            }
        }

        let mut sectors: BTreeMap<u64, FlashSector> = BTreeMap::new();
        for (page, _) in pages.values() {
            // A page can span several sectors, if the sectors are smaller than the page.
            let mut address = page.address;
            while address < page.end() {
                let sector_info = flash_algorithm
                    .sector_info(address)
                    .ok_or(FlashError::InvalidFlashAddress(address))?;

                sectors
                    .entry(sector_info.base_address)
                    .or_insert_with(|| FlashSector::new(&sector_info));
                address = sector_info.base_address + sector_info.size;
            }
        }

        if restore_unwritten_bytes {
            let page_size = flash_algorithm.flash_properties.page_size as u64;

            for sector in sectors.values() {
                let sector_end = sector.address + sector.size;
                let mut address = sector.address;

                while address < sector_end {
                    let page_info = flash_algorithm
                        .page_info(address)
                        .ok_or(FlashError::InvalidFlashAddress(address))?;

                    pages
                        .entry(page_info.base_address)
                        .or_insert_with(|| (FlashPage::new(&page_info, erased_byte_value), vec![]));
                    address = page_info.base_address + page_size;
                }
            }
        }

        let mut fills = Vec::new();
        for (page_index, (page, written)) in pages.values().enumerate() {
            let mut cursor = page.address;

            for range in written {
                if range.start > cursor {
                    fills.push(FlashFill {
                        address: cursor,
                        size: range.start - cursor,
                        page_index,
                    });
                }
                cursor = range.end;
            }

            if cursor < page.end() {
                fills.push(FlashFill {
                    address: cursor,
                    size: page.end() - cursor,
                    page_index,
                });
            }
        }

        let layout = FlashLayout {
            sectors: sectors.into_values().collect(),
            pages: pages.into_values().map(|(page, _)| page).collect(),
            fills,
        };

        tracing::debug!(
            "Flash layout: {} sectors, {} pages, {} fills",
            layout.sectors.len(),
            layout.pages.len(),
            layout.fills.len()
        );

        Ok(layout)
    }
}

#[cfg(test)]
mod test {
    use insta::assert_debug_snapshot;
    use pretty_assertions::assert_eq;

    use super::{FlashBuilder, FlashError};
    use crate::config::{FlashProperties, SectorDescription};
    use crate::flashing::FlashAlgorithm;

    /// 32 bytes of flash with 4 byte pages and 8 byte sectors.
    fn tiny_flash() -> FlashAlgorithm {
        FlashAlgorithm {
            flash_properties: FlashProperties {
                address_range: 0..32,
                page_size: 4,
                erased_byte_value: 0xFF,
                program_page_timeout: 200,
                erase_sector_timeout: 200,
                sectors: vec![SectorDescription {
                    size: 8,
                    address: 0,
                }],
            },
            ..Default::default()
        }
    }

    #[test]
    fn add_overlapping_data() {
        let mut flash_builder = FlashBuilder::new();
        assert!(flash_builder.add_data(0, &[42]).is_ok());
        assert!(matches!(
            flash_builder.add_data(0, &[42]),
            Err(FlashError::DataOverlap(0))
        ));
        assert!(flash_builder.add_data(4, &[1, 2]).is_ok());
        assert!(flash_builder.add_data(3, &[1, 2]).is_err());
        assert!(flash_builder.add_data(5, &[1]).is_err());
    }

    #[test]
    fn data_ending_past_the_address_space_is_rejected() {
        let mut flash_builder = FlashBuilder::new();

        assert!(matches!(
            flash_builder.add_data(u64::MAX, &[1, 2]),
            Err(FlashError::InvalidFlashAddress(u64::MAX))
        ));
        assert!(flash_builder.is_empty());
    }

    #[test]
    fn add_non_overlapping_data() {
        let mut flash_builder = FlashBuilder::new();
        assert!(flash_builder.add_data(1, &[42]).is_ok());
        assert!(flash_builder.add_data(0, &[42]).is_ok());
        assert!(flash_builder.add_data(2, &[42]).is_ok());
    }

    #[test]
    fn data_is_cut_to_the_range() {
        let mut flash_builder = FlashBuilder::new();
        flash_builder.add_data(6, &[1, 2, 3, 4]).unwrap();

        let data: Vec<_> = flash_builder.data_in_range(&(8..16)).collect();
        assert_eq!(data, vec![(8, &[3u8, 4][..])]);
    }

    #[test]
    fn single_byte_in_single_page() {
        let mut flash_builder = FlashBuilder::new();
        flash_builder.add_data(1, &[42]).unwrap();

        let layout = flash_builder
            .build_sectors_and_pages(&(0..32), &tiny_flash(), false)
            .unwrap();
        assert_debug_snapshot!(layout);
    }

    #[test]
    fn block_across_sectors_keeps_unwritten_bytes() {
        let mut flash_builder = FlashBuilder::new();
        flash_builder.add_data(6, &[1, 2, 3, 4]).unwrap();

        let layout = flash_builder
            .build_sectors_and_pages(&(0..32), &tiny_flash(), true)
            .unwrap();
        assert_debug_snapshot!(layout);
    }

    #[test]
    fn two_blocks_in_one_sector_erase_it_once() {
        let mut flash_builder = FlashBuilder::new();
        flash_builder.add_data(16, &[1, 2]).unwrap();
        flash_builder.add_data(20, &[3, 4, 5, 6]).unwrap();

        let layout = flash_builder
            .build_sectors_and_pages(&(0..32), &tiny_flash(), false)
            .unwrap();

        assert_eq!(layout.sectors().len(), 1);
        assert_eq!(layout.sectors()[0].address(), 16);
        assert_eq!(
            layout
                .pages()
                .iter()
                .map(|page| page.address())
                .collect::<Vec<_>>(),
            vec![16, 20]
        );
        assert_eq!(layout.pages()[0].data(), &[1, 2, 0xFF, 0xFF]);
        assert_eq!(layout.fills().len(), 1);
    }

    #[test]
    fn data_outside_the_flash_is_rejected() {
        let mut flash_builder = FlashBuilder::new();
        flash_builder.add_data(30, &[0; 4]).unwrap();

        assert!(matches!(
            flash_builder.build_sectors_and_pages(&(0..64), &tiny_flash(), false),
            Err(FlashError::InvalidFlashAddress(32))
        ));
    }
}
