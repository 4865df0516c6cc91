use super::FlashError;
use crate::config::{FlashProperties, PageInfo, RamRegion, RawFlashAlgorithm, SectorInfo};
use std::mem::size_of_val;

/// A [`RawFlashAlgorithm`] placed into the RAM of a chip.
///
/// All addresses are absolute target addresses. Built by
/// [`FlashAlgorithm::assemble_from_raw`].
#[derive(Debug, Default, Clone)]
pub struct FlashAlgorithm {
    /// Name from the target description.
    pub name: String,
    /// Picked when a region has more than one algorithm.
    pub default: bool,
    /// Where the header is written, the code follows it.
    pub load_address: u64,
    /// The return header followed by the code of the algorithm.
    pub instructions: Vec<u32>,
    /// Entry of `Init(address, clock, function)`.
    pub pc_init: Option<u64>,
    /// Entry of `UnInit(function)`.
    pub pc_uninit: Option<u64>,
    /// Entry of `ProgramPage(address, size, buffer)`.
    pub pc_program_page: u64,
    /// Entry of `EraseSector(address)`.
    pub pc_erase_sector: u64,
    /// Entry of `EraseAll()`, which not every algorithm has.
    pub pc_erase_all: Option<u64>,
    /// Loaded into R9 before every routine, the position independent code
    /// finds its data through it.
    pub static_base: u64,
    /// Loaded into SP before every routine.
    pub begin_stack: u64,
    /// Base address of the page buffer, which holds one page of data for `ProgramPage()`.
    pub page_buffer: u64,
    /// Geometry and timeouts of the flash the algorithm programs.
    pub flash_properties: FlashProperties,
}

impl FlashAlgorithm {
    /// The sector `address` lies in, or `None` outside of the flash.
    pub fn sector_info(&self, address: u64) -> Option<SectorInfo> {
        let flash = &self.flash_properties.address_range;
        if !flash.contains(&address) {
            tracing::trace!("{:#010x} is outside of {:#x?}", address, flash);
            return None;
        }

        let offset = address - flash.start;
        let run = self
            .flash_properties
            .sectors
            .iter()
            .rfind(|run| run.address <= offset)?;
        let index_in_run = (offset - run.address) / run.size;

        Some(SectorInfo {
            base_address: flash.start + run.address + index_in_run * run.size,
            size: run.size,
        })
    }

    /// The page `address` lies in, or `None` outside of the flash.
    pub fn page_info(&self, address: u64) -> Option<PageInfo> {
        let flash = &self.flash_properties.address_range;
        if !flash.contains(&address) {
            return None;
        }

        let page_size = self.flash_properties.page_size;
        let offset_in_page = (address - flash.start) % u64::from(page_size);

        Some(PageInfo {
            base_address: address - offset_in_page,
            size: page_size,
        })
    }

    /// All sectors of the flash, by address.
    pub fn iter_sectors(&self) -> impl Iterator<Item = SectorInfo> + '_ {
        let flash = &self.flash_properties.address_range;
        let first = self.sector_info(flash.start);

        std::iter::successors(first, move |sector| {
            let next = sector.base_address + sector.size;
            if next < flash.end {
                self.sector_info(next)
            } else {
                None
            }
        })
    }

    /// Every byte of `data` has the erased value.
    pub fn is_erased(&self, data: &[u8]) -> bool {
        data.iter()
            .all(|b| *b == self.flash_properties.erased_byte_value)
    }

    const FLASH_ALGO_MIN_STACK_SIZE: u32 = 512;

    /// `BKPT #0` as the first instruction, followed by a generic return sequence.
    ///
    /// The routines return to the start of the header, so the core halts
    /// once a routine has finished.
    const ARM_FLASH_BLOB_HEADER: [u32; 8] = [
        0xE00A_BE00,
        0x062D_780D,
        0x2408_4068,
        0xD300_0040,
        0x1E64_4058,
        0x1C49_D1FA,
        0x2A00_1E52,
        0x0477_0D1F,
    ];

    /// Places `raw` into `ram_region`.
    ///
    /// The RAM is laid out as header, code, page buffer and stack, starting at
    /// the load address of `raw`, or at the start of `ram_region` if it has none.
    pub fn assemble_from_raw(
        raw: &RawFlashAlgorithm,
        ram_region: &RamRegion,
    ) -> Result<Self, FlashError> {
        if raw.flash_properties.page_size % 4 != 0 {
            return Err(FlashError::InvalidPageSize {
                size: raw.flash_properties.page_size,
            });
        }

        let code = raw.instructions.chunks(4).map(|bytes| {
            // The last word is zero padded.
            let mut word = [0u8; 4];
            word[..bytes.len()].copy_from_slice(bytes);
            u32::from_le_bytes(word)
        });
        let instructions: Vec<u32> = Self::ARM_FLASH_BLOB_HEADER
            .into_iter()
            .chain(code)
            .collect();

        let header_size = size_of_val(&Self::ARM_FLASH_BLOB_HEADER) as u64;

        let load_address = match raw.load_address {
            // The load address refers to the code, the header goes in front of it.
            Some(address) => address
                .checked_sub(header_size)
                .ok_or(FlashError::InvalidFlashAlgorithmLoadAddress { address })?,
            None => ram_region.range.start,
        };

        if !ram_region.range.contains(&load_address) || load_address % 4 != 0 {
            return Err(FlashError::InvalidFlashAlgorithmLoadAddress {
                address: load_address,
            });
        }

        let code_start = load_address + header_size;
        let page_buffer = load_address + 4 * instructions.len() as u64;
        let stack_size = raw.stack_size.unwrap_or(Self::FLASH_ALGO_MIN_STACK_SIZE);
        let begin_stack =
            page_buffer + u64::from(raw.flash_properties.page_size) + u64::from(stack_size);

        if begin_stack > ram_region.range.end {
            return Err(FlashError::InvalidFlashAlgorithmStackSize);
        }
        tracing::debug!(
            "Flash algorithm '{}' at {:#010x}, page buffer at {:#010x}, stack top at {:#010x}",
            raw.name,
            load_address,
            page_buffer,
            begin_stack
        );

        Ok(FlashAlgorithm {
            name: raw.name.clone(),
            default: raw.default,
            load_address,
            instructions,
            pc_init: raw.pc_init.map(|pc| code_start + pc as u64),
            pc_uninit: raw.pc_uninit.map(|pc| code_start + pc as u64),
            pc_program_page: code_start + raw.pc_program_page as u64,
            pc_erase_sector: code_start + raw.pc_erase_sector as u64,
            pc_erase_all: raw.pc_erase_all.map(|pc| code_start + pc as u64),
            static_base: code_start + raw.data_section_offset as u64,
            begin_stack,
            page_buffer,
            flash_properties: raw.flash_properties.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SectorDescription;
    use pretty_assertions::assert_eq;

    fn raw_algorithm() -> RawFlashAlgorithm {
        RawFlashAlgorithm {
            name: "test".into(),
            instructions: vec![1, 2, 3, 4, 5, 6],
            pc_init: Some(0x1),
            pc_program_page: 0x5,
            pc_erase_sector: 0x9,
            data_section_offset: 0x4,
            flash_properties: FlashProperties {
                address_range: 0x0800_0000..0x0802_0000,
                page_size: 0x100,
                erased_byte_value: 0xFF,
                program_page_timeout: 100,
                erase_sector_timeout: 500,
                sectors: vec![
                    SectorDescription {
                        size: 0x4000,
                        address: 0x0,
                    },
                    SectorDescription {
                        size: 0x10000,
                        address: 0x10000,
                    },
                ],
            },
            ..Default::default()
        }
    }

    fn ram() -> RamRegion {
        RamRegion {
            name: None,
            range: 0x2000_0000..0x2000_1000,
            access: None,
        }
    }

    #[test]
    fn layout_in_ram() {
        let algorithm = FlashAlgorithm::assemble_from_raw(&raw_algorithm(), &ram()).unwrap();

        assert_eq!(algorithm.load_address, 0x2000_0000);
        assert_eq!(algorithm.instructions.len(), 10);
        assert_eq!(algorithm.instructions[0], 0xE00A_BE00);
        assert_eq!(algorithm.instructions[8], 0x0403_0201);
        assert_eq!(algorithm.instructions[9], 0x0000_0605);

        assert_eq!(algorithm.pc_init, Some(0x2000_0021));
        assert_eq!(algorithm.pc_program_page, 0x2000_0025);
        assert_eq!(algorithm.pc_uninit, None);
        assert_eq!(algorithm.static_base, 0x2000_0024);
        assert_eq!(algorithm.page_buffer, 0x2000_0028);
        assert_eq!(algorithm.begin_stack, 0x2000_0328);
    }

    #[test]
    fn load_address_points_at_the_code() {
        let mut raw = raw_algorithm();
        raw.load_address = Some(0x2000_0100);

        let algorithm = FlashAlgorithm::assemble_from_raw(&raw, &ram()).unwrap();

        assert_eq!(algorithm.load_address, 0x2000_00E0);
        assert_eq!(algorithm.pc_init, Some(0x2000_0101));
    }

    #[test]
    fn stack_must_fit_into_ram() {
        let mut raw = raw_algorithm();
        raw.stack_size = Some(0x1000);

        assert!(matches!(
            FlashAlgorithm::assemble_from_raw(&raw, &ram()),
            Err(FlashError::InvalidFlashAlgorithmStackSize)
        ));
    }

    #[test]
    fn sectors_of_mixed_size() {
        let algorithm = FlashAlgorithm::assemble_from_raw(&raw_algorithm(), &ram()).unwrap();

        assert_eq!(
            algorithm.sector_info(0x0800_4100),
            Some(SectorInfo {
                base_address: 0x0800_4000,
                size: 0x4000
            })
        );
        assert_eq!(
            algorithm.sector_info(0x0801_8000),
            Some(SectorInfo {
                base_address: 0x0801_0000,
                size: 0x10000
            })
        );
        assert_eq!(algorithm.sector_info(0x0802_0000), None);
        assert_eq!(algorithm.iter_sectors().count(), 5);
        assert_eq!(
            algorithm.page_info(0x0800_01FF).map(|page| page.base_address),
            Some(0x0800_0100)
        );
    }
}
