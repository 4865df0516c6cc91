use super::RegistryError;
use probelink_target::{
    Chip, ChipFamily, CoreType, MemoryRange, MemoryRegion, NvmRegion, RamRegion,
    RawFlashAlgorithm, RegisterDescription, TargetDescriptionSource,
};

/// This describes a complete target with a fixed chip model and variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The name of the target, which doubles as its part number.
    pub name: String,
    /// The profile of the Cortex-M core.
    pub core_type: CoreType,
    /// The JEP106 part number of the chip, if known.
    pub part: Option<u16>,
    /// The address of the top level ROM table, if it should not be read from the MEM-AP.
    pub rom_table_base: Option<u64>,
    /// The memory map of the target.
    pub memory_map: Vec<MemoryRegion>,
    /// The flash algorithms available for this target.
    pub flash_algorithms: Vec<RawFlashAlgorithm>,
    /// Named registers of the chip.
    pub registers: Vec<RegisterDescription>,
    /// Where the description of this target came from.
    pub source: TargetDescriptionSource,
}

impl Target {
    /// Create a [`Target`] for `chip`, resolving its flash algorithms in `family`.
    pub fn new(family: &ChipFamily, chip: &Chip) -> Result<Target, RegistryError> {
        let flash_algorithms = chip
            .flash_algorithms
            .iter()
            .map(|name| {
                family
                    .get_algorithm(name)
                    .cloned()
                    .ok_or_else(|| RegistryError::AlgorithmNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Target {
            name: chip.name.clone(),
            core_type: chip.core_type,
            part: chip.part,
            rom_table_base: chip.rom_table_base,
            memory_map: chip.memory_map.clone(),
            flash_algorithms,
            registers: chip.registers.clone(),
            source: family.source.clone(),
        })
    }

    /// A target which only knows its core, without memory map or flash algorithms.
    ///
    /// Memory access, core control and the ROM table walk work with such a target,
    /// flashing does not.
    pub fn generic(core_type: CoreType) -> Target {
        let name = match core_type {
            CoreType::Armv6m => "armv6m",
            CoreType::Armv7m => "armv7m",
            CoreType::Armv7em => "armv7em",
            CoreType::Armv8m => "armv8m",
        };
        let chip = Chip::generic_arm(name, core_type);

        Target {
            name: chip.name,
            core_type,
            part: None,
            rom_table_base: None,
            memory_map: vec![],
            flash_algorithms: vec![],
            registers: vec![],
            source: TargetDescriptionSource::Generic,
        }
    }

    /// All RAM regions of the target.
    pub fn ram_regions(&self) -> impl Iterator<Item = &RamRegion> {
        self.memory_map
            .iter()
            .filter_map(MemoryRegion::as_ram_region)
    }

    /// All non-volatile regions of the target, aliases excluded.
    pub fn nvm_regions(&self) -> impl Iterator<Item = &NvmRegion> {
        self.memory_map
            .iter()
            .filter_map(MemoryRegion::as_nvm_region)
            .filter(|region| !region.is_alias)
    }

    /// The RAM region flash algorithms are run from.
    ///
    /// This is the first executable region which contains `load_address`, or the first
    /// executable region at all if no address is given.
    pub fn algorithm_ram(&self, load_address: Option<u64>) -> Option<&RamRegion> {
        let mut executable = self.ram_regions().filter(|region| region.is_executable());

        match load_address {
            Some(address) => executable.find(|region| region.range.contains(&address)),
            None => executable.next(),
        }
    }

    /// Find the flash algorithm which is able to program `region`.
    ///
    /// Algorithms covering the whole region are preferred, and among them the one
    /// marked as default.
    pub fn flash_algorithm_for_region(&self, region: &NvmRegion) -> Option<&RawFlashAlgorithm> {
        let mut candidates = self.flash_algorithms.iter().filter(|algorithm| {
            algorithm
                .flash_properties
                .address_range
                .contains_range(&region.range)
        });

        let first = candidates.next()?;
        if first.default {
            return Some(first);
        }

        Some(
            candidates
                .find(|algorithm| algorithm.default)
                .unwrap_or(first),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use probelink_target::{FlashProperties, SectorDescription};

    fn algorithm(name: &str, default: bool, range: std::ops::Range<u64>) -> RawFlashAlgorithm {
        RawFlashAlgorithm {
            name: name.into(),
            default,
            flash_properties: FlashProperties {
                address_range: range,
                page_size: 0x100,
                erased_byte_value: 0xFF,
                program_page_timeout: 100,
                erase_sector_timeout: 500,
                sectors: vec![SectorDescription {
                    size: 0x400,
                    address: 0,
                }],
            },
            ..Default::default()
        }
    }

    fn nvm(range: std::ops::Range<u64>) -> NvmRegion {
        NvmRegion {
            name: None,
            range,
            is_alias: false,
            access: None,
        }
    }

    #[test]
    fn default_algorithm_is_preferred() {
        let mut target = Target::generic(CoreType::Armv7em);
        target.flash_algorithms = vec![
            algorithm("plain", false, 0x0800_0000..0x0810_0000),
            algorithm("default", true, 0x0800_0000..0x0810_0000),
        ];

        let selected = target
            .flash_algorithm_for_region(&nvm(0x0800_0000..0x0801_0000))
            .unwrap();

        assert_eq!(selected.name, "default");
    }

    #[test]
    fn algorithm_has_to_cover_the_region() {
        let mut target = Target::generic(CoreType::Armv7em);
        target.flash_algorithms = vec![algorithm("small", true, 0x0800_0000..0x0800_1000)];

        assert!(target
            .flash_algorithm_for_region(&nvm(0x0800_0000..0x0801_0000))
            .is_none());
    }

    #[test]
    fn generic_target_has_no_memory() {
        let target = Target::generic(CoreType::Armv6m);

        assert_eq!(target.name, "armv6m");
        assert_eq!(target.source, TargetDescriptionSource::Generic);
        assert!(target.algorithm_ram(None).is_none());
    }
}
