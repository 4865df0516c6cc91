//! Walking the CoreSight ROM tables of a target.
use crate::architecture::arm::ArmError;
use crate::memory::MemoryInterface;
use jep106::JEP106Code;

/// A ROM table holds at most this many entries, the rest of the 4K block holds the IDs.
const MAX_ROM_TABLE_ENTRIES: usize = 960;

/// An error to report any errors that are romtable discovery specific.
#[derive(thiserror::Error, Debug)]
pub enum RomTableError {
    /// An entry or the identification of a component could not be read.
    #[error("Malformed ROM table: reading {address:#010x} failed")]
    MalformedRomTable {
        /// The address that could not be read.
        address: u64,
        /// The error of the failed access.
        #[source]
        source: ArmError,
    },
    /// The component identification does not carry the CoreSight preamble.
    #[error("Component at {address:#010x} has an invalid preamble")]
    InvalidComponentId {
        /// The base address of the component.
        address: u64,
    },
    /// The walk was started at a component which is not a ROM table.
    #[error("Component at {0:#010x} is not a ROM table")]
    NotARomTable(u64),
    /// A nested ROM table was not entered because it encloses the table
    /// which refers to it.
    #[error("ROM table at {address:#010x} refers back to an enclosing table, skipping it")]
    CyclicRomTable {
        /// The address of the skipped ROM table.
        address: u64,
    },
    /// A nested ROM table was not entered because it is nested too deep.
    #[error("ROM table at {address:#010x} is nested deeper than {limit} levels, skipping it")]
    DepthLimitExceeded {
        /// The address of the skipped ROM table.
        address: u64,
        /// The configured nesting limit.
        limit: usize,
    },
}

/// This enum describes the class of a CoreSight component.
///
/// This does not describe the exact component type which is determined via the `PeripheralId`.
///
/// Described in table D1-2 in the ADIv5.2 spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClass {
    /// Generic verification component.
    GenericVerificationComponent,
    /// A class 1 ROM table.
    RomTable,
    /// A CoreSight component, which may be a class 9 ROM table.
    CoreSightComponent,
    /// Peripheral test block.
    PeripheralTestBlock,
    /// Generic IP component.
    GenericIPComponent,
    /// CoreLink, PrimeCell or system component without standard registers.
    CoreLinkOrPrimeCellOrSystemComponent,
    /// A class value the architecture reserves.
    Reserved(u8),
}

impl From<u8> for ComponentClass {
    fn from(class: u8) -> Self {
        match class {
            0x0 => ComponentClass::GenericVerificationComponent,
            0x1 => ComponentClass::RomTable,
            0x9 => ComponentClass::CoreSightComponent,
            0xB => ComponentClass::PeripheralTestBlock,
            0xE => ComponentClass::GenericIPComponent,
            0xF => ComponentClass::CoreLinkOrPrimeCellOrSystemComponent,
            other => ComponentClass::Reserved(other),
        }
    }
}

/// The peripheral ID of a CoreSight component.
///
/// Described in section D1.2.2 of the ADIv5.2 spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralId {
    /// Indicates minor errata fixes by the component designer.
    pub revand: u8,
    /// Indicates component modifications by the implementer, zero if unmodified.
    pub cmod: u8,
    /// Indicates major component revisions by the component designer.
    pub revision: u8,
    /// Indicates the component designer, `None` for legacy components.
    pub jep106: Option<JEP106Code>,
    /// Identifies the component, unique for the designer.
    pub part: u16,
    /// The number of 4K blocks the component occupies.
    pub size: u32,
}

impl PeripheralId {
    /// Extracts the peripheral ID from PIDR0..PIDR7.
    fn from_raw(data: &[u32; 8]) -> Self {
        let jep106id = (((data[2] & 0x07) << 4) | ((data[1] >> 4) & 0x0F)) as u8;
        let jep106 = JEP106Code::new((data[4] & 0x0F) as u8, jep106id);
        let uses_jep106 = data[2] & 0x8 != 0;

        PeripheralId {
            revand: ((data[3] >> 4) & 0x0F) as u8,
            cmod: (data[3] & 0x0F) as u8,
            revision: ((data[2] >> 4) & 0x0F) as u8,
            jep106: uses_jep106.then_some(jep106),
            part: (((data[1] & 0x0F) << 8) | (data[0] & 0xFF)) as u16,
            size: 1 << ((data[4] >> 4) & 0x0F),
        }
    }
}

/// A component found in a ROM table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomTableEntry {
    /// The base address of the component.
    pub address: u64,
    /// The class of the component.
    pub class: ComponentClass,
    /// The identification of the component.
    pub peripheral_id: PeripheralId,
    /// How deep the ROM table listing the component is nested, 0 for the top level table.
    pub depth: usize,
}

fn malformed(address: u64, source: ArmError) -> RomTableError {
    RomTableError::MalformedRomTable { address, source }
}

/// A table which is currently being walked.
#[derive(Debug, Clone, Copy)]
struct TableCursor {
    base: u64,
    index: usize,
    depth: usize,
}

/// Lazily walks a ROM table and all ROM tables nested in it.
///
/// Nested tables are visited depth first, in the order of their entries. The walk
/// keeps its own stack, so a table which refers back to one of its parents only
/// repeats until the depth limit is reached. Entries which can't be read are
/// reported as errors, and the walk continues with the next entry.
pub struct RomTableWalker<M> {
    memory: M,
    base_address: u64,
    depth_limit: usize,
    stack: Vec<TableCursor>,
    started: bool,
    pending: Option<RomTableError>,
}

impl<M> RomTableWalker<M>
where
    M: MemoryInterface<ArmError>,
{
    /// The default nesting limit.
    pub const DEFAULT_DEPTH_LIMIT: usize = 8;

    /// Walk the ROM table at `base_address` with the default depth limit.
    pub fn new(memory: M, base_address: u64) -> Self {
        Self::with_depth_limit(memory, base_address, Self::DEFAULT_DEPTH_LIMIT)
    }

    /// Walk the ROM table at `base_address`, entering nested tables up to `depth_limit` levels deep.
    pub fn with_depth_limit(memory: M, base_address: u64, depth_limit: usize) -> Self {
        let mut walker = Self {
            memory,
            base_address,
            depth_limit: depth_limit.max(1),
            stack: Vec::new(),
            started: false,
            pending: None,
        };
        walker.restart();
        walker
    }

    /// Start over at the top level table.
    pub fn restart(&mut self) {
        self.stack.clear();
        self.stack.push(TableCursor {
            base: self.base_address,
            index: 0,
            depth: 0,
        });
        self.started = false;
        self.pending = None;
    }

    /// Give up the walker and return the memory interface.
    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Reads the class and the peripheral ID of the component at `address`.
    fn read_component(&mut self, address: u64) -> Result<(ComponentClass, PeripheralId), RomTableError> {
        let mut cidr = [0u32; 4];
        self.memory
            .read_32(address + 0xFF0, &mut cidr)
            .map_err(|source| malformed(address + 0xFF0, source))?;
        tracing::trace!("CIDR at {:#010x}: {:x?}", address, cidr);

        let preamble = [cidr[0] & 0xFF, cidr[1] & 0x0F, cidr[2] & 0xFF, cidr[3] & 0xFF];
        if preamble != [0x0D, 0x0, 0x05, 0xB1] {
            tracing::warn!("Component at {:#010x} has an invalid preamble: {:x?}", address, preamble);
            return Err(RomTableError::InvalidComponentId { address });
        }
        let class = ComponentClass::from(((cidr[1] >> 4) & 0x0F) as u8);

        let mut pidr = [0u32; 8];
        self.memory
            .read_32(address + 0xFD0, &mut pidr[4..])
            .map_err(|source| malformed(address + 0xFD0, source))?;
        self.memory
            .read_32(address + 0xFE0, &mut pidr[..4])
            .map_err(|source| malformed(address + 0xFE0, source))?;

        Ok((class, PeripheralId::from_raw(&pidr)))
    }

    /// Checks that the walk starts at a ROM table.
    fn check_top_level_table(&mut self) -> Result<(), RomTableError> {
        tracing::debug!("Walking ROM table at {:#010x}", self.base_address);

        match self.read_component(self.base_address)? {
            (ComponentClass::RomTable, _) => Ok(()),
            _ => Err(RomTableError::NotARomTable(self.base_address)),
        }
    }
}

impl<M> Iterator for RomTableWalker<M>
where
    M: MemoryInterface<ArmError>,
{
    type Item = Result<RomTableEntry, RomTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending.take() {
            return Some(Err(error));
        }

        if !self.started {
            self.started = true;
            if let Err(error) = self.check_top_level_table() {
                self.stack.clear();
                return Some(Err(error));
            }
        }

        loop {
            let cursor = self.stack.last_mut()?;

            if cursor.index >= MAX_ROM_TABLE_ENTRIES {
                self.stack.pop();
                continue;
            }

            let TableCursor { base, index, depth } = *cursor;
            cursor.index += 1;

            let entry_address = base + index as u64 * 4;
            let raw = match self.memory.read_word_32(entry_address) {
                Ok(raw) => raw,
                Err(source) => {
                    // Without the entry the end of the table is unknown.
                    self.stack.pop();
                    return Some(Err(RomTableError::MalformedRomTable {
                        address: entry_address,
                        source,
                    }));
                }
            };

            // End of entries is marked by an all zero entry
            if raw == 0 {
                self.stack.pop();
                continue;
            }

            if raw & 1 == 0 {
                tracing::trace!("Entry {} of {:#010x} is not present", index, base);
                continue;
            }

            // The offset is a signed, 4K aligned value.
            let offset = (raw & 0xFFFF_F000) as i32;
            let address = base.wrapping_add_signed(i64::from(offset)) & 0xFFFF_FFFF;
            tracing::debug!("Entry {} of {:#010x} points to {:#010x}", index, base, address);

            let (class, peripheral_id) = match self.read_component(address) {
                Ok(component) => component,
                Err(error) => return Some(Err(error)),
            };

            if class == ComponentClass::RomTable {
                if self.stack.iter().any(|table| table.base == address) {
                    tracing::warn!("Not entering ROM table at {:#010x}, it encloses itself", address);
                    self.pending = Some(RomTableError::CyclicRomTable { address });
                } else if depth + 1 < self.depth_limit {
                    self.stack.push(TableCursor {
                        base: address,
                        index: 0,
                        depth: depth + 1,
                    });
                } else {
                    tracing::warn!("Not entering ROM table at {:#010x}, depth limit reached", address);
                    self.pending = Some(RomTableError::DepthLimitExceeded {
                        address,
                        limit: self.depth_limit,
                    });
                }
            }

            return Some(Ok(RomTableEntry {
                address,
                class,
                peripheral_id,
                depth,
            }));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// Word addressed memory with an optional unreadable range.
    #[derive(Default)]
    struct TableMemory {
        words: HashMap<u64, u32>,
        unreadable: Option<std::ops::Range<u64>>,
        reads: usize,
    }

    impl TableMemory {
        fn component(&mut self, address: u64, class: u8, part: u16) {
            let cidr = [0x0D, u32::from(class) << 4, 0x05, 0xB1];
            for (i, value) in cidr.into_iter().enumerate() {
                self.words.insert(address + 0xFF0 + i as u64 * 4, value);
            }
            // PIDR0..3 at 0xFE0, ARM as designer
            let pidr = [
                u32::from(part & 0xFF),
                u32::from(part >> 8) | 0xB0,
                0x0B,
                0x00,
            ];
            for (i, value) in pidr.into_iter().enumerate() {
                self.words.insert(address + 0xFE0 + i as u64 * 4, value);
            }
            self.words.insert(address + 0xFD0, 0x04);
        }

        fn entries(&mut self, table: u64, entries: &[u32]) {
            for (i, entry) in entries.iter().enumerate() {
                self.words.insert(table + i as u64 * 4, *entry);
            }
        }
    }

    impl MemoryInterface<ArmError> for &mut TableMemory {
        fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
            self.reads += 1;
            for (i, word) in data.iter_mut().enumerate() {
                let address = address + i as u64 * 4;
                if self.unreadable.as_ref().is_some_and(|range| range.contains(&address)) {
                    return Err(ArmError::AccessPortFault { ctrl_stat: 0x20 });
                }
                *word = self.words.get(&address).copied().unwrap_or(0);
            }
            Ok(())
        }

        fn read_8(&mut self, _address: u64, _data: &mut [u8]) -> Result<(), ArmError> {
            unimplemented!()
        }

        fn write_32(&mut self, _address: u64, _data: &[u32]) -> Result<(), ArmError> {
            unimplemented!()
        }

        fn write_8(&mut self, _address: u64, _data: &[u8]) -> Result<(), ArmError> {
            unimplemented!()
        }

        fn flush(&mut self) -> Result<(), ArmError> {
            Ok(())
        }
    }

    const ROOT: u64 = 0xE00F_F000;

    /// A Cortex-M4 like ROM table: SCS, DWT, FPB, ITM, then a not present entry.
    fn cortex_m4_table() -> TableMemory {
        let mut memory = TableMemory::default();
        memory.component(ROOT, 1, 0x4C4);
        memory.entries(ROOT, &[0xFFF0_F003, 0xFFF0_2003, 0xFFF0_3003, 0xFFF0_1003, 0xFFF4_1002]);
        memory.component(0xE000_E000, 9, 0x00C);
        memory.component(0xE000_1000, 9, 0x002);
        memory.component(0xE000_2000, 9, 0x003);
        memory.component(0xE000_0000, 9, 0x001);
        memory
    }

    #[test]
    fn walks_flat_table() {
        let mut memory = cortex_m4_table();

        let entries: Vec<_> = RomTableWalker::new(&mut memory, ROOT)
            .collect::<Result<_, _>>()
            .unwrap();

        let addresses: Vec<u64> = entries.iter().map(|entry| entry.address).collect();
        assert_eq!(addresses, vec![0xE000_E000, 0xE000_1000, 0xE000_2000, 0xE000_0000]);
        assert_eq!(entries[0].class, ComponentClass::CoreSightComponent);
        assert_eq!(entries[1].peripheral_id.part, 0x002);
        assert_eq!(entries[1].peripheral_id.jep106, Some(JEP106Code::new(4, 0x3B)));
        assert!(entries.iter().all(|entry| entry.depth == 0));
    }

    #[test]
    fn walk_is_lazy() {
        let mut memory = cortex_m4_table();

        let first = RomTableWalker::new(&mut memory, ROOT).next();

        assert!(matches!(first, Some(Ok(RomTableEntry { address: 0xE000_E000, .. }))));
        assert!(memory.reads < 12);
    }

    #[test]
    fn restart_yields_the_same_entries() {
        let mut memory = cortex_m4_table();
        let mut walker = RomTableWalker::new(&mut memory, ROOT);

        let first: Vec<_> = walker.by_ref().map(|entry| entry.unwrap().address).collect();
        walker.restart();
        let second: Vec<_> = walker.map(|entry| entry.unwrap().address).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn nested_tables_are_entered() {
        let mut memory = cortex_m4_table();
        // Replace the not present entry with a nested table at 0xE0040000.
        memory.entries(ROOT, &[0xFFF0_F003, 0xFFF4_1003]);
        memory.component(0xE004_0000, 1, 0x4C5);
        memory.entries(0xE004_0000, &[0xFFFC_1003]);

        let entries: Vec<_> = RomTableWalker::new(&mut memory, ROOT)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let found: Vec<(u64, usize)> = entries.iter().map(|e| (e.address, e.depth)).collect();
        assert_eq!(
            found,
            vec![(0xE000_E000, 0), (0xE004_0000, 0), (0xE000_1000, 1), (0xE000_2000, 0), (0xE000_0000, 0)]
        );
    }

    #[test]
    fn back_references_are_not_entered() {
        let mut memory = TableMemory::default();
        memory.component(ROOT, 1, 0x4C4);
        // Four entries pointing back to the table itself.
        memory.entries(ROOT, &[0x0000_0003; 4]);

        let results: Vec<_> = RomTableWalker::with_depth_limit(&mut memory, ROOT, 8).collect();

        assert_eq!(results.len(), 8);
        for pair in results.chunks(2) {
            assert!(matches!(pair[0], Ok(RomTableEntry { address: ROOT, depth: 0, .. })));
            assert!(matches!(pair[1], Err(RomTableError::CyclicRomTable { address: ROOT })));
        }
        // Top level check, four entries with their component and the terminator.
        assert!(memory.reads <= 3 + 4 * 4 + 1);
    }

    #[test]
    fn back_reference_from_a_nested_table() {
        let mut memory = TableMemory::default();
        memory.component(ROOT, 1, 0x4C4);
        memory.entries(ROOT, &[0x0000_1003]);
        memory.component(ROOT + 0x1000, 1, 0x4C5);
        memory.entries(ROOT + 0x1000, &[0xFFFF_F003]);

        let results: Vec<_> = RomTableWalker::new(&mut memory, ROOT).collect();

        assert_eq!(results.len(), 3);
        assert!(matches!(results[1], Ok(RomTableEntry { address: ROOT, depth: 1, .. })));
        assert!(matches!(results[2], Err(RomTableError::CyclicRomTable { address: ROOT })));
    }

    #[test]
    fn nesting_stops_at_the_depth_limit() {
        let mut memory = TableMemory::default();
        // ROOT, then three tables, each 4K above the previous one.
        for level in 0..4 {
            let table = ROOT + level * 0x1000;
            memory.component(table, 1, 0x4C4);
            memory.entries(table, &[0x0000_1003]);
        }
        memory.component(ROOT + 0x4000, 9, 0x00C);

        let results: Vec<_> = RomTableWalker::with_depth_limit(&mut memory, ROOT, 3).collect();

        assert_eq!(results.len(), 4);
        assert!(matches!(results[2], Ok(RomTableEntry { address: 0xE010_2000, depth: 2, .. })));
        assert!(matches!(
            results[3],
            Err(RomTableError::DepthLimitExceeded { address: 0xE010_2000, limit: 3 })
        ));
    }

    #[test]
    fn unreadable_component_is_reported_and_skipped() {
        let mut memory = cortex_m4_table();
        memory.unreadable = Some(0xE000_1000..0xE000_2000);

        let results: Vec<_> = RomTableWalker::new(&mut memory, ROOT).collect();

        assert_eq!(results.len(), 4);
        assert!(matches!(
            results[1],
            Err(RomTableError::MalformedRomTable { address: 0xE000_1FF0, .. })
        ));
        assert!(matches!(results[3], Ok(RomTableEntry { address: 0xE000_0000, .. })));
    }

    #[test]
    fn walk_has_to_start_at_a_rom_table() {
        let mut memory = cortex_m4_table();

        let results: Vec<_> = RomTableWalker::new(&mut memory, 0xE000_E000).collect();

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(RomTableError::NotARomTable(0xE000_E000))));
    }
}
