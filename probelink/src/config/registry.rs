use super::Target;
use probelink_target::ChipFamily;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Error while loading or looking up a target description.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No chip with a matching name was found.
    #[error("The requested chip '{0}' was not found in the list of known targets.")]
    ChipNotFound(String),
    /// A chip references a flash algorithm its family does not contain.
    #[error("The flash algorithm '{0}' was not found.")]
    AlgorithmNotFound(String),
    /// The target description is inconsistent.
    #[error("The target description is invalid: {0}")]
    InvalidChipFamilyDefinition(String),
    /// The target description could not be read.
    #[error("An IO error was encountered")]
    Io(#[from] std::io::Error),
    /// The target description is not valid YAML, or does not match the schema.
    #[error("Deserializing the yaml encountered an error")]
    Yaml(#[from] serde_yaml::Error),
}

/// Registry of all known chip families.
#[derive(Debug, Default)]
pub struct Registry {
    /// All the available chips.
    families: Vec<ChipFamily>,
}

impl Registry {
    /// An empty registry. Targets are added from their YAML descriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// All families known to the registry.
    pub fn families(&self) -> &[ChipFamily] {
        &self.families
    }

    /// Get a target by the name of the chip.
    ///
    /// The name is matched case insensitively. If no chip has exactly that name, a chip
    /// whose name starts with it is used, as long as there is only one.
    pub fn get_target_by_name(&self, name: impl AsRef<str>) -> Result<Target, RegistryError> {
        let name = name.as_ref();
        tracing::debug!("Searching registry for chip with name {}", name);

        let wanted = name.to_ascii_lowercase();
        let mut partial_matches = Vec::new();

        for family in &self.families {
            for variant in family.variants() {
                let variant_name = variant.name.to_ascii_lowercase();

                if variant_name == wanted {
                    return Target::new(family, variant);
                }
                if variant_name.starts_with(&wanted) {
                    partial_matches.push((family, variant));
                }
            }
        }

        match partial_matches.as_slice() {
            [(family, variant)] => {
                tracing::warn!(
                    "Found chip {} which matches given partial name {}. Consider specifying its full name.",
                    variant.name,
                    name,
                );
                Target::new(family, variant)
            }
            [] => Err(RegistryError::ChipNotFound(name.to_string())),
            _ => {
                tracing::warn!(
                    "Chip name {} is ambiguous, it matches {} chips",
                    name,
                    partial_matches.len()
                );
                Err(RegistryError::ChipNotFound(name.to_string()))
            }
        }
    }

    /// Add a chip family to the registry, replacing a family with the same name.
    pub fn add_target_family(&mut self, family: ChipFamily) -> Result<(), RegistryError> {
        family
            .validate()
            .map_err(RegistryError::InvalidChipFamilyDefinition)?;

        if let Some(index) = self.families.iter().position(|old| old.name == family.name) {
            tracing::debug!("Replacing chip family {}", family.name);
            self.families.remove(index);
        }
        self.families.push(family);

        Ok(())
    }

    /// Add a chip family from its YAML description.
    pub fn add_target_from_yaml<R: Read>(&mut self, yaml_reader: R) -> Result<(), RegistryError> {
        let family: ChipFamily = serde_yaml::from_reader(yaml_reader)?;

        self.add_target_family(family)
    }

    /// Add a chip family from a YAML file.
    pub fn add_target_from_yaml_file(&mut self, path: impl AsRef<Path>) -> Result<(), RegistryError> {
        let file = File::open(path.as_ref())?;

        self.add_target_from_yaml(file)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const FAMILY: &str = r#"
name: LPC55
variants:
  - name: LPC55S69JBD100
    core_type: armv8m
    memory_map:
      - !Ram
        range:
          start: 0x20000000
          end: 0x20044000
      - !Nvm
        range:
          start: 0x0
          end: 0x98000
    flash_algorithms:
      - lpc55_flash
    registers:
      - name: SYSCON_STAT
        address: 0x40000000
  - name: LPC55S66JBD64
    core_type: armv8m
    memory_map: []
flash_algorithms:
  - name: lpc55_flash
    default: true
    instructions: AAAAAA==
    pc_program_page: 0x1
    pc_erase_sector: 0x3
    data_section_offset: 0x4
    flash_properties:
      address_range:
        start: 0x0
        end: 0x98000
      page_size: 0x200
      erased_byte_value: 0xff
      program_page_timeout: 100
      erase_sector_timeout: 1000
      sectors:
        - size: 0x8000
          address: 0x0
"#;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.add_target_from_yaml(FAMILY.as_bytes()).unwrap();
        registry
    }

    #[test]
    fn exact_name_is_case_insensitive() {
        let target = registry().get_target_by_name("lpc55s69jbd100").unwrap();

        assert_eq!(target.name, "LPC55S69JBD100");
        assert_eq!(target.flash_algorithms.len(), 1);
        assert_eq!(target.registers[0].name, "SYSCON_STAT");
    }

    #[test]
    fn unique_prefix_is_accepted() {
        let target = registry().get_target_by_name("LPC55S66").unwrap();

        assert_eq!(target.name, "LPC55S66JBD64");
    }

    #[test]
    fn ambiguous_prefix_is_rejected() {
        assert!(matches!(
            registry().get_target_by_name("LPC55S6"),
            Err(RegistryError::ChipNotFound(_))
        ));
    }

    #[test]
    fn family_is_replaced() {
        let mut registry = registry();
        registry.add_target_from_yaml(FAMILY.as_bytes()).unwrap();

        assert_eq!(registry.families().len(), 1);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FAMILY.as_bytes()).unwrap();

        let mut registry = Registry::new();
        registry.add_target_from_yaml_file(file.path()).unwrap();

        assert!(registry.get_target_by_name("LPC55S69JBD100").is_ok());
    }

    #[test]
    fn invalid_family_is_rejected() {
        let mut registry = Registry::new();
        let result = registry.add_target_from_yaml("name: EMPTY\nvariants: []\n".as_bytes());

        assert!(matches!(
            result,
            Err(RegistryError::InvalidChipFamilyDefinition(_))
        ));
    }
}
