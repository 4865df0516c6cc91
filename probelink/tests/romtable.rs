mod common;

use common::connected_session;
use pretty_assertions::assert_eq;
use probelink::architecture::arm::memory::{ComponentClass, RomTableError};
use probelink::config::SessionConfig;

const ROM_TABLE: u64 = 0xE00F_F000;

#[test_log::test]
fn cortex_m4_components() {
    let (mut session, _target) = connected_session(&SessionConfig::default());

    let entries: Vec<_> = session
        .rom_table()
        .unwrap()
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            (entry.address, entry.class, entry.peripheral_id.part)
        })
        .collect();

    assert_eq!(
        entries,
        vec![
            (0xE000_E000, ComponentClass::CoreSightComponent, 0x00C),
            (0xE000_1000, ComponentClass::GenericIPComponent, 0x002),
            (0xE000_2000, ComponentClass::GenericIPComponent, 0x003),
            (0xE000_0000, ComponentClass::GenericIPComponent, 0x001),
            (0xE004_0000, ComponentClass::CoreSightComponent, 0x9A1),
        ]
    );
}

#[test_log::test]
fn unreadable_component_does_not_stop_the_walk() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().add_fault_range(0xE000_1000..0xE000_2000);

    let results = session.rom_table().unwrap();

    assert_eq!(results.len(), 5);
    assert!(matches!(
        results[1],
        Err(RomTableError::MalformedRomTable { .. })
    ));
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 4);
}

#[test_log::test]
fn table_referring_to_itself_is_not_entered() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    // The SCS, then the table itself twice.
    target
        .lock()
        .add_rom_table(ROM_TABLE, &[0xFFF0_F003, 0x0000_0003, 0x0000_0003]);

    let results = session.rom_table().unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 3);
    let errors: Vec<_> = results.iter().filter_map(|result| result.as_ref().err()).collect();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|error| matches!(error, RomTableError::CyclicRomTable { address: ROM_TABLE })));
}
