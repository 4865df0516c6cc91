use super::chip::Chip;
use super::flash_algorithm::RawFlashAlgorithm;
use jep106::JEP106Code;
use serde::{Deserialize, Serialize};

/// Source of a target description.
///
/// This is used for diagnostics, when
/// an error related to a target description occurs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TargetDescriptionSource {
    /// The target description is a generic target description,
    /// which just describes a core type (e.g. Cortex-M4), and no
    /// flash algorithms or memory regions.
    Generic,
    /// The target description was loaded from an external source
    /// at runtime, e.g. a YAML file.
    External,
}

/// The ARM Cortex-M profile of a core.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CoreType {
    /// ARMv6-M: Cortex M0, M0+, M1
    Armv6m,
    /// ARMv7-M: Cortex M3
    Armv7m,
    /// ARMv7-M with DSP extension: Cortex M4, M7
    Armv7em,
    /// ARMv8-M: Cortex M23, M33
    Armv8m,
}

impl CoreType {
    /// Returns true if AIRCR.VECTRESET can be used to reset the core.
    ///
    /// The bit is reserved on ARMv6-M and ARMv8-M.
    pub fn supports_vect_reset(&self) -> bool {
        matches!(self, CoreType::Armv7m | CoreType::Armv7em)
    }
}

/// This describes a chip family with all its variants.
///
/// This struct is usually read from a target description
/// file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChipFamily {
    /// This is the name of the chip family in base form.
    /// E.g. `nRF52832`.
    pub name: String,
    /// The JEP106 code of the manufacturer.
    #[serde(default)]
    pub manufacturer: Option<JEP106Code>,
    /// This vector holds all the variants of the family.
    pub variants: Vec<Chip>,
    /// This vector holds all available algorithms.
    #[serde(default)]
    pub flash_algorithms: Vec<RawFlashAlgorithm>,
    #[serde(skip, default = "default_source")]
    /// Source of the target description, used for diagnostics
    pub source: TargetDescriptionSource,
}

fn default_source() -> TargetDescriptionSource {
    TargetDescriptionSource::External
}

impl ChipFamily {
    /// Validates the [`ChipFamily`] such that probelink can make assumptions about the correctness without validating thereafter.
    ///
    /// This method should be called right after the [`ChipFamily`] is created!
    pub fn validate(&self) -> Result<(), String> {
        if self.variants.is_empty() {
            return Err(format!("family '{}' does not contain any variants", self.name));
        }

        for variant in &self.variants {
            for algorithm_name in &variant.flash_algorithms {
                if !self
                    .flash_algorithms
                    .iter()
                    .any(|algorithm| &algorithm.name == algorithm_name)
                {
                    return Err(format!(
                        "unknown flash algorithm `{}` for variant `{}`",
                        algorithm_name, variant.name
                    ));
                }
            }

            let ram_regions = variant
                .memory_map
                .iter()
                .filter(|region| region.as_ram_region().is_some())
                .count();
            if ram_regions == 0 && !variant.flash_algorithms.is_empty() {
                return Err(format!(
                    "variant `{}` has flash algorithms but no RAM to run them from",
                    variant.name
                ));
            }
        }

        for algorithm in &self.flash_algorithms {
            let properties = &algorithm.flash_properties;
            if properties.page_size == 0 {
                return Err(format!(
                    "flash algorithm `{}` has a page size of zero",
                    algorithm.name
                ));
            }
            if properties.sectors.is_empty() {
                return Err(format!(
                    "flash algorithm `{}` does not describe any sectors",
                    algorithm.name
                ));
            }
            if let Some(sector) = properties
                .sectors
                .iter()
                .find(|sector| sector.size == 0 || sector.size % properties.page_size as u64 != 0)
            {
                tracing::warn!(
                    "Sector size {:#x} of algorithm `{}` is not a multiple of the page size {:#x}",
                    sector.size,
                    algorithm.name,
                    properties.page_size
                );
            }
        }

        Ok(())
    }

    /// Get the different [Chip]s which are part of this
    /// family.
    pub fn variants(&self) -> &[Chip] {
        &self.variants
    }

    /// Get all flash algorithms for this family of chips.
    pub fn algorithms(&self) -> &[RawFlashAlgorithm] {
        &self.flash_algorithms
    }

    /// Try to find a [RawFlashAlgorithm] with a given name.
    pub fn get_algorithm(&self, name: impl AsRef<str>) -> Option<&RawFlashAlgorithm> {
        let name = name.as_ref();
        self.flash_algorithms.iter().find(|elem| elem.name == name)
    }
}
