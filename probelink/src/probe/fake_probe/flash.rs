use super::target::{FakeTarget, DFSR_BKPT, PC};
use crate::config::{
    ChipFamily, CoreType, FlashProperties, MemoryRegion, NvmRegion, RamRegion, RawFlashAlgorithm,
    RegisterDescription,
};
use probelink_target::{Chip, SectorDescription, TargetDescriptionSource};
use std::ops::Range;

const MARKER: u32 = 0xF1A5_0000;

/// The entry points of the simulated flash algorithm.
///
/// The code of [`fake_flash_algorithm`] consists of one marker word per
/// routine. When the core starts running at a marker, the fake target
/// executes the routine and returns to the address in LR with a breakpoint,
/// like a real flash algorithm does.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FakeRoutine {
    /// `Init(address, clock, function)`
    Init,
    /// `UnInit(function)`
    UnInit,
    /// `EraseSector(address)`
    EraseSector,
    /// `ProgramPage(address, size, buffer)`
    ProgramPage,
    /// `EraseAll()`
    EraseAll,
}

impl FakeRoutine {
    const ALL: [FakeRoutine; 5] = [
        FakeRoutine::Init,
        FakeRoutine::UnInit,
        FakeRoutine::ProgramPage,
        FakeRoutine::EraseSector,
        FakeRoutine::EraseAll,
    ];

    fn marker(self) -> u32 {
        let index = Self::ALL
            .iter()
            .position(|routine| *routine == self)
            .unwrap_or_default();
        MARKER | index as u32
    }

    fn from_marker(word: u32) -> Option<Self> {
        if word & 0xFFFF_0000 != MARKER {
            return None;
        }
        Self::ALL.get((word & 0xFFFF) as usize).copied()
    }

    /// Offset of the routine in the instructions of [`fake_flash_algorithm`], with the thumb bit.
    fn entry(self) -> u32 {
        (self.marker() & 0xFFFF) * 4 + 1
    }
}

/// A routine call seen by the fake target, with its arguments.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RoutineCall {
    /// The routine which was called.
    pub routine: FakeRoutine,
    /// Argument in R0.
    pub r0: u32,
    /// Argument in R1.
    pub r1: u32,
    /// Argument in R2.
    pub r2: u32,
}

/// The geometry of the simulated flash.
#[derive(Debug, Clone)]
pub(super) struct FakeFlash {
    pub(super) range: Range<u64>,
    pub(super) sector_size: u64,
    pub(super) page_size: u32,
    pub(super) erased_byte_value: u8,
}

impl Default for FakeFlash {
    fn default() -> Self {
        Self {
            range: 0x0800_0000..0x0810_0000,
            sector_size: 0x1000,
            page_size: 0x100,
            erased_byte_value: 0xFF,
        }
    }
}

impl FakeFlash {
    pub(super) fn erased_word(&self) -> u32 {
        u32::from_ne_bytes([self.erased_byte_value; 4])
    }
}

impl FakeTarget {
    /// Let `routine` run forever, so the host runs into its timeout.
    pub fn hang_routine(&mut self, routine: FakeRoutine) {
        self.hanging_routine = Some(routine);
    }

    /// Let `routine` return `code` without doing anything.
    pub fn fail_routine(&mut self, routine: FakeRoutine, code: u32) {
        self.failing_routines.insert(routine, code);
    }

    /// All routine calls, in order.
    pub fn routine_calls(&self) -> &[RoutineCall] {
        &self.routine_calls
    }

    /// Base addresses of all erased sectors, in order.
    pub fn erased_sectors(&self) -> &[u64] {
        &self.erased_sectors
    }

    /// Base addresses of all programmed pages, in order.
    pub fn programmed_pages(&self) -> &[u64] {
        &self.programmed_pages
    }

    /// Resume execution at the current program counter.
    pub(super) fn run(&mut self) {
        let pc = u64::from(self.core.registers[PC] & !1);
        let Some(routine) = FakeRoutine::from_marker(self.read_word(pc)) else {
            return;
        };

        let [r0, r1, r2] = [0, 1, 2].map(|index| self.core.registers[index]);
        self.routine_calls.push(RoutineCall {
            routine,
            r0,
            r1,
            r2,
        });

        if self.hanging_routine == Some(routine) {
            return;
        }

        let result = match self.failing_routines.get(&routine) {
            Some(code) => *code,
            None => self.execute(routine, r0, r1, r2),
        };

        self.core.registers[0] = result;
        self.core.registers[PC] = self.core.registers[14] & !1;
        self.core.enter_debug_state(DFSR_BKPT);
    }

    fn execute(&mut self, routine: FakeRoutine, r0: u32, r1: u32, r2: u32) -> u32 {
        let Some(flash) = self.flash.clone() else {
            return 1;
        };
        let address = u64::from(r0);

        match routine {
            FakeRoutine::Init | FakeRoutine::UnInit => 0,
            FakeRoutine::EraseAll => {
                self.erase_range(flash.range.clone());
                0
            }
            FakeRoutine::EraseSector => {
                if !flash.range.contains(&address) {
                    return 1;
                }

                let base = address - (address - flash.range.start) % flash.sector_size;
                self.erase_range(base..base + flash.sector_size);
                self.erased_sectors.push(base);
                0
            }
            FakeRoutine::ProgramPage => {
                let size = u64::from(r1);
                if !flash.range.contains(&address) || address + size > flash.range.end {
                    return 1;
                }

                let mut data = vec![0u8; size as usize];
                self.read_bytes(u64::from(r2), &mut data);

                // Programming can only clear bits.
                for (offset, byte) in data.into_iter().enumerate() {
                    let target = address + offset as u64;
                    let old = self.read_byte(target);
                    self.write_byte(target, old & byte);
                }
                self.programmed_pages.push(address);
                0
            }
        }
    }
}

/// A flash algorithm which drives the simulated flash of [`FakeTarget::cortex_m4`].
pub fn fake_flash_algorithm() -> RawFlashAlgorithm {
    let flash = FakeFlash::default();

    let mut instructions: Vec<u8> = FakeRoutine::ALL
        .iter()
        .flat_map(|routine| routine.marker().to_le_bytes())
        .collect();
    let data_section_offset = instructions.len() as u32;
    instructions.extend_from_slice(&[0; 4]);

    RawFlashAlgorithm {
        name: "fake_flash".into(),
        description: "Simulated flash of the fake target".into(),
        default: true,
        instructions,
        load_address: None,
        pc_init: Some(FakeRoutine::Init.entry()),
        pc_uninit: Some(FakeRoutine::UnInit.entry()),
        pc_program_page: FakeRoutine::ProgramPage.entry(),
        pc_erase_sector: FakeRoutine::EraseSector.entry(),
        pc_erase_all: Some(FakeRoutine::EraseAll.entry()),
        data_section_offset,
        stack_size: Some(0x200),
        flash_properties: FlashProperties {
            address_range: flash.range,
            page_size: flash.page_size,
            erased_byte_value: flash.erased_byte_value,
            program_page_timeout: 100,
            erase_sector_timeout: 200,
            sectors: vec![SectorDescription {
                size: flash.sector_size,
                address: 0,
            }],
        },
    }
}

/// A chip family with the single variant `FAKE_M4`, matching [`FakeTarget::cortex_m4`].
pub fn fake_chip_family() -> ChipFamily {
    let flash = FakeFlash::default();

    let mut chip = Chip::generic_arm("FAKE_M4", CoreType::Armv7em);
    chip.memory_map = vec![
        MemoryRegion::Ram(RamRegion {
            name: Some("SRAM".into()),
            range: 0x2000_0000..0x2001_0000,
            access: None,
        }),
        MemoryRegion::Nvm(NvmRegion {
            name: Some("FLASH".into()),
            range: flash.range,
            is_alias: false,
            access: None,
        }),
    ];
    chip.flash_algorithms = vec!["fake_flash".into()];
    chip.registers = vec![
        RegisterDescription {
            name: "SYSCON_STAT".into(),
            address: 0x4000_0000,
            description: Some("System status".into()),
        },
        RegisterDescription {
            name: "CLOCK_CTRL".into(),
            address: 0x4000_0004,
            description: None,
        },
    ];

    ChipFamily {
        name: "FAKE".into(),
        manufacturer: None,
        variants: vec![chip],
        flash_algorithms: vec![fake_flash_algorithm()],
        source: TargetDescriptionSource::External,
    }
}
