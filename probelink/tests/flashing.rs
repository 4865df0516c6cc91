mod common;

use std::io::Write;
use std::sync::Arc;

use common::connected_session;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use probelink::config::{SessionConfig, TargetDescriptionSource};
use probelink::flashing::{
    self, BinOptions, CancellationToken, DownloadOptions, FlashError, FlashProgress, FlashState,
    Format, ProgressEvent,
};
use probelink::probe::fake_probe::FakeRoutine;

const FLASH: u64 = 0x0800_0000;

/// Records the kind of every progress event.
fn recorder() -> (FlashProgress, Arc<Mutex<Vec<String>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let progress = FlashProgress::new(move |event| {
        let name = match event {
            ProgressEvent::Initialized { .. } => "Initialized".to_string(),
            ProgressEvent::StartedErasing => "StartedErasing".to_string(),
            ProgressEvent::SectorErased { address, .. } => format!("SectorErased({address:#x})"),
            ProgressEvent::StartedProgramming => "StartedProgramming".to_string(),
            ProgressEvent::PageProgrammed { address, .. } => {
                format!("PageProgrammed({address:#x})")
            }
            ProgressEvent::StartedVerifying => "StartedVerifying".to_string(),
            ProgressEvent::Finished => "Finished".to_string(),
            ProgressEvent::Failed { state } => format!("Failed({state:?})"),
        };
        sink.lock().push(name);
    });

    (progress, events)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|index| index as u8).collect()
}

#[test_log::test]
fn program_a_single_page() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    let data = pattern(256);

    session.add_data(FLASH, &data).unwrap();
    session.commit().unwrap();

    let target = target.lock();
    assert_eq!(target.erased_sectors(), &[FLASH]);
    assert_eq!(target.programmed_pages(), &[FLASH]);

    let program_calls: Vec<_> = target
        .routine_calls()
        .iter()
        .filter(|call| call.routine == FakeRoutine::ProgramPage)
        .collect();
    assert_eq!(program_calls.len(), 1);
    assert_eq!((program_calls[0].r0, program_calls[0].r1), (FLASH as u32, 256));

    let mut flash = vec![0; 256];
    target.read_bytes(FLASH, &mut flash);
    assert_eq!(flash, data);
}

#[test_log::test]
fn blocks_in_one_sector_erase_it_once() {
    let (mut session, target) = connected_session(&SessionConfig::default());

    session.add_data(FLASH, &[1; 16]).unwrap();
    session.add_data(FLASH + 0x800, &[2; 16]).unwrap();
    session.commit().unwrap();

    let target = target.lock();
    assert_eq!(target.erased_sectors(), &[FLASH]);
    assert_eq!(target.programmed_pages(), &[FLASH, FLASH + 0x800]);
    assert_eq!(target.read_word(FLASH + 0x800), 0x0202_0202);
}

#[test_log::test]
fn unwritten_bytes_can_be_kept() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().write_bytes(FLASH + 0x400, &[0xAB; 4]);

    let mut loader = session.flash_loader();
    loader.add_data(FLASH, &[1, 2, 3, 4]).unwrap();
    let options = DownloadOptions {
        keep_unwritten_bytes: true,
        verify: true,
        ..Default::default()
    };
    loader.commit(&mut session, options).unwrap();

    let target = target.lock();
    assert_eq!(target.read_word(FLASH), 0x0403_0201);
    assert_eq!(target.read_word(FLASH + 0x400), 0xABAB_ABAB);
    assert_eq!(target.programmed_pages().len(), 16);
}

#[test_log::test]
fn unwritten_bytes_are_erased_by_default() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().write_bytes(FLASH + 0x400, &[0xAB; 4]);

    session.add_data(FLASH, &[1, 2, 3, 4]).unwrap();
    session.commit().unwrap();

    assert_eq!(target.lock().read_word(FLASH + 0x400), 0xFFFF_FFFF);
}

#[test_log::test]
fn progress_events_arrive_in_order() {
    let (mut session, _target) = connected_session(&SessionConfig::default());
    let (progress, events) = recorder();

    let mut loader = session.flash_loader();
    loader.add_data(FLASH + 0x1000, &pattern(0x200)).unwrap();
    let options = DownloadOptions {
        progress: Some(progress),
        verify: true,
        ..Default::default()
    };
    loader.commit(&mut session, options).unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "Initialized",
            "StartedErasing",
            "SectorErased(0x8001000)",
            "StartedProgramming",
            "PageProgrammed(0x8001000)",
            "PageProgrammed(0x8001100)",
            "StartedVerifying",
            "Finished",
        ]
    );
}

#[test_log::test]
fn data_outside_of_the_flash_is_rejected() {
    let (mut session, target) = connected_session(&SessionConfig::default());

    let error = session.add_data(0x2000_0000, &[1, 2, 3, 4]).unwrap_err();

    assert!(matches!(
        error,
        FlashError::AddressOutOfRange {
            address: 0x2000_0000,
            size: 4,
            description_source: TargetDescriptionSource::External,
        }
    ));
    session.commit().unwrap();
    assert!(target.lock().routine_calls().is_empty());
}

#[test_log::test]
fn hanging_routine_times_out() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().hang_routine(FakeRoutine::EraseSector);

    session.add_data(FLASH, &[1, 2, 3, 4]).unwrap();
    let error = session.commit().unwrap_err();

    assert!(matches!(
        error,
        FlashError::AlgorithmExecutionTimeout { .. }
    ));
    // The core is still busy with the routine, UnInit is not called.
    let target = target.lock();
    assert!(!target.is_halted());
    assert_eq!(
        target.routine_calls().last().map(|call| call.routine),
        Some(FakeRoutine::EraseSector)
    );
}

#[test_log::test]
fn failing_routine_reports_its_code() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().fail_routine(FakeRoutine::ProgramPage, 3);

    session.add_data(FLASH, &[1, 2, 3, 4]).unwrap();
    let error = session.commit().unwrap_err();

    assert!(matches!(
        error,
        FlashError::RoutineCallFailed { error_code: 3, .. }
    ));
    // The core is halted again, so the algorithm is still uninitialized.
    assert_eq!(
        target.lock().routine_calls().last().map(|call| call.routine),
        Some(FakeRoutine::UnInit)
    );
}

#[test_log::test]
fn cancelled_before_the_first_sector() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    let (progress, events) = recorder();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut loader = session.flash_loader();
    loader.add_data(FLASH, &pattern(64)).unwrap();
    let options = DownloadOptions {
        progress: Some(progress),
        cancel: Some(cancel),
        ..Default::default()
    };
    let error = loader.commit(&mut session, options).unwrap_err();

    assert!(matches!(error, FlashError::Cancelled));
    assert!(target.lock().erased_sectors().is_empty());
    assert_eq!(
        events.lock().last().map(String::as_str),
        Some(format!("Failed({:?})", FlashState::Erasing).as_str())
    );
}

#[test_log::test]
fn chip_erase_replaces_sector_erases() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().write_bytes(FLASH + 0x8000, &[0x55; 4]);

    let mut loader = session.flash_loader();
    loader.add_data(FLASH, &[1, 2, 3, 4]).unwrap();
    let options = DownloadOptions {
        do_chip_erase: true,
        ..Default::default()
    };
    loader.commit(&mut session, options).unwrap();

    let target = target.lock();
    assert!(target.erased_sectors().is_empty());
    let erase_all_calls = target
        .routine_calls()
        .iter()
        .filter(|call| call.routine == FakeRoutine::EraseAll)
        .count();
    assert_eq!(erase_all_calls, 1);
    assert_eq!(target.read_word(FLASH), 0x0403_0201);
    assert_eq!(target.read_word(FLASH + 0x8000), 0xFFFF_FFFF);
}

#[test_log::test]
fn erase_all_clears_the_flash() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    target.lock().write_bytes(FLASH + 0x2_0000, &[0x55; 4]);

    flashing::erase_all(&mut session, FlashProgress::default()).unwrap();

    assert_eq!(target.lock().read_word(FLASH + 0x2_0000), 0xFFFF_FFFF);
}

#[test_log::test]
fn dry_run_does_not_touch_the_target() {
    let (mut session, target) = connected_session(&SessionConfig::default());

    session.add_data(FLASH, &[1, 2, 3, 4]).unwrap();
    let options = DownloadOptions {
        dry_run: true,
        ..Default::default()
    };
    session.commit_with_options(options).unwrap();

    let target = target.lock();
    assert!(target.routine_calls().is_empty());
    assert_eq!(target.reset_count(), 0);
    assert_eq!(target.read_word(FLASH), 0xFFFF_FFFF);
}

#[test_log::test]
fn bin_file_at_an_address() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

    session.add_bin_data(file.path(), FLASH + 0x3000).unwrap();
    session.commit().unwrap();

    assert_eq!(target.lock().read_word(FLASH + 0x3000), 0xEFBE_ADDE);
}

#[test_log::test]
fn download_hex_file() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b":020000040800F2\n:0400100001020304E2\n:00000001FF\n")
        .unwrap();

    flashing::download_file(&mut session, file.path(), Format::Hex).unwrap();

    assert_eq!(target.lock().read_word(FLASH + 0x10), 0x0403_0201);
}

#[test_log::test]
fn download_bin_file_with_skip() {
    let (mut session, target) = connected_session(&SessionConfig::default());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0, 0, 0, 0, 0x11, 0x22, 0x33, 0x44]).unwrap();

    let format = Format::Bin(BinOptions {
        base_address: None,
        skip: 4,
    });
    flashing::download_file(&mut session, file.path(), format).unwrap();

    assert_eq!(target.lock().read_word(FLASH), 0x4433_2211);
}
