mod common;

use common::{connected_session, fast_retries};
use pretty_assertions::assert_eq;
use probelink::architecture::arm::ArmError;
use probelink::config::SessionConfig;
use probelink::Error;

#[test_log::test]
fn waits_within_the_retry_limit_are_invisible() {
    let (mut session, target) = connected_session(&fast_retries(3));
    target.lock().write_word(0x2000_0000, 0x1234_5678);

    target.lock().inject_waits(3);

    assert_eq!(session.read32(0x2000_0000).unwrap(), 0x1234_5678);
    assert_eq!(target.lock().dap_abort_count(), 0);
}

#[test_log::test]
fn too_many_waits_abort_the_transfer() {
    let (mut session, target) = connected_session(&fast_retries(3));

    target.lock().inject_waits(4);

    let result = session.read32(0x2000_0000);
    assert!(matches!(
        result,
        Err(Error::Arm(ArmError::AccessTimeout { attempts: 4 }))
    ));
    assert_eq!(target.lock().dap_abort_count(), 1);

    // The abort leaves the debug port usable.
    session.write32(0x2000_0000, 0xCAFE_BABE).unwrap();
    assert_eq!(session.read32(0x2000_0000).unwrap(), 0xCAFE_BABE);
}

#[test_log::test]
fn a_fault_is_reported_and_cleared() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().add_fault_range(0x6000_0000..0x6000_1000);

    let result = session.read32(0x6000_0000);
    assert!(matches!(
        result,
        Err(Error::Arm(ArmError::AccessPortFault { .. }))
    ));

    session.write32(0x2000_0000, 0xCAFE_BABE).unwrap();
    assert_eq!(session.read32(0x2000_0000).unwrap(), 0xCAFE_BABE);
}

#[test_log::test]
fn stuck_sticky_flags_are_unrecoverable() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    {
        let mut target = target.lock();
        target.add_fault_range(0x6000_0000..0x6000_1000);
        target.break_sticky_clear();
    }

    let result = session.read32(0x6000_0000);
    assert!(matches!(
        result,
        Err(Error::Arm(ArmError::StickyFaultUnrecoverable { ctrl_stat: Some(_) }))
    ));
}
