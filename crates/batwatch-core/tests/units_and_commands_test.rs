//! Integration test: unit registry and remote commands.
//!
//! Verifies that:
//! 1. Adding a server writes a new unit; duplicate ids conflict.
//! 2. Clients need an existing server and are removed with it.
//! 3. Busy units refuse commands and removal; fleet exclusivity blocks other units.
//! 4. Scheduled records are validated, keyed by start, and follow their lifecycle.

use batwatch_core::{
    ActiveStatus, BatwatchError, Command, CommandDispatcher, DashboardStore, DispatchPolicy,
    GeoLocation, Mode, RecordStatus, UnitInfo, UnitKind,
};
use chrono::{Duration, TimeZone, Utc};

fn unit(id: &str, kind: UnitKind, server_id: Option<&str>) -> UnitInfo {
    UnitInfo {
        id: id.to_string(),
        kind,
        name: id.to_uppercase(),
        location: GeoLocation {
            latitude: 50.85,
            longitude: 4.35,
        },
        server_id: server_id.map(str::to_string),
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap(),
    }
}

fn open_store() -> (tempfile::TempDir, DashboardStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = DashboardStore::open(dir.path()).unwrap();
    (dir, store)
}

#[test]
fn add_server_writes_unit_documents() {
    let (_dir, store) = open_store();
    store.add_unit(&unit("srv-1", UnitKind::Server, None)).unwrap();

    let got = store.get_unit("srv-1").unwrap().expect("unit stored");
    assert_eq!(got.info.kind, UnitKind::Server);
    assert_eq!(got.mode, Mode::Idle);
    assert_eq!(got.active_status.status, ActiveStatus::Idle);
    assert!(!got.connection.connected);

    let err = store
        .add_unit(&unit("srv-1", UnitKind::Server, None))
        .unwrap_err();
    assert!(matches!(err, BatwatchError::Conflict(_)));
}

#[test]
fn clients_follow_their_server() {
    let (_dir, store) = open_store();
    let orphan = store
        .add_unit(&unit("cli-1", UnitKind::Client, Some("srv-1")))
        .unwrap_err();
    assert!(matches!(orphan, BatwatchError::NotFound(_)));

    store.add_unit(&unit("srv-1", UnitKind::Server, None)).unwrap();
    store.add_unit(&unit("cli-1", UnitKind::Client, Some("srv-1"))).unwrap();
    store.add_unit(&unit("cli-2", UnitKind::Client, Some("srv-1"))).unwrap();
    store.add_unit(&unit("solo", UnitKind::Standalone, None)).unwrap();
    assert_eq!(store.list_clients("srv-1").unwrap().len(), 2);

    store.remove_unit("srv-1").unwrap();
    let left: Vec<String> = store
        .list_units()
        .unwrap()
        .into_iter()
        .map(|u| u.info.id)
        .collect();
    assert_eq!(left, vec!["solo".to_string()]);
}

#[test]
fn busy_unit_refuses_commands_and_removal() {
    let (_dir, store) = open_store();
    store.add_unit(&unit("srv-1", UnitKind::Server, None)).unwrap();
    let dispatcher = CommandDispatcher::new(store.clone(), DispatchPolicy::default());
    let now = Utc::now();

    let state = dispatcher.dispatch("srv-1", &Command::Locate, now).unwrap();
    assert_eq!(state.mode, Mode::Locate);
    assert_eq!(state.active_status.status, ActiveStatus::Pending);

    let again = dispatcher.dispatch("srv-1", &Command::Connect, now).unwrap_err();
    assert!(matches!(again, BatwatchError::Busy(_)));
    assert!(matches!(store.remove_unit("srv-1").unwrap_err(), BatwatchError::Busy(_)));

    let done = dispatcher
        .report_status("srv-1", ActiveStatus::Success, None, now)
        .unwrap();
    assert_eq!(done.mode, Mode::Idle);
    assert!(!done.is_busy());
    dispatcher.dispatch("srv-1", &Command::Connect, now).unwrap();
}

#[test]
fn fleet_exclusivity_blocks_other_units() {
    let (_dir, store) = open_store();
    store.add_unit(&unit("srv-1", UnitKind::Server, None)).unwrap();
    store.add_unit(&unit("solo", UnitKind::Standalone, None)).unwrap();
    let now = Utc::now();

    let exclusive = CommandDispatcher::new(store.clone(), DispatchPolicy::default());
    exclusive
        .dispatch("srv-1", &Command::InstantRecord { duration_secs: 30 }, now)
        .unwrap();
    match exclusive.dispatch("solo", &Command::Locate, now) {
        Err(BatwatchError::Busy(id)) => assert_eq!(id, "srv-1"),
        other => panic!("expected busy, got {:?}", other.map(|u| u.info.id)),
    }

    let relaxed = CommandDispatcher::new(
        store,
        DispatchPolicy {
            fleet_exclusive: false,
            ..Default::default()
        },
    );
    relaxed.dispatch("solo", &Command::Locate, now).unwrap();
}

#[test]
fn clients_and_bad_durations_are_rejected() {
    let (_dir, store) = open_store();
    store.add_unit(&unit("srv-1", UnitKind::Server, None)).unwrap();
    store.add_unit(&unit("cli-1", UnitKind::Client, Some("srv-1"))).unwrap();
    let dispatcher = CommandDispatcher::new(store, DispatchPolicy::default());
    let now = Utc::now();

    assert!(matches!(
        dispatcher.dispatch("cli-1", &Command::Locate, now).unwrap_err(),
        BatwatchError::Invalid(_)
    ));
    assert!(matches!(
        dispatcher
            .dispatch("srv-1", &Command::InstantRecord { duration_secs: 0 }, now)
            .unwrap_err(),
        BatwatchError::Invalid(_)
    ));
    assert!(matches!(
        dispatcher.dispatch("ghost", &Command::Locate, now).unwrap_err(),
        BatwatchError::NotFound(_)
    ));
}

#[test]
fn schedule_record_lifecycle_for_server() {
    let (_dir, store) = open_store();
    store.add_unit(&unit("srv-1", UnitKind::Server, None)).unwrap();
    let dispatcher = CommandDispatcher::new(store.clone(), DispatchPolicy::default());
    let now = Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap();
    let start = now + Duration::hours(3);

    let past = dispatcher
        .dispatch(
            "srv-1",
            &Command::ScheduleRecord {
                start: now - Duration::minutes(1),
                duration_secs: 60,
            },
            now,
        )
        .unwrap_err();
    assert!(matches!(past, BatwatchError::Invalid(_)));

    dispatcher
        .dispatch(
            "srv-1",
            &Command::ScheduleRecord {
                start,
                duration_secs: 900,
            },
            now,
        )
        .unwrap();
    dispatcher
        .report_status("srv-1", ActiveStatus::Success, None, now)
        .unwrap();

    let overlapping = dispatcher
        .dispatch(
            "srv-1",
            &Command::ScheduleRecord {
                start: start + Duration::minutes(5),
                duration_secs: 60,
            },
            now,
        )
        .unwrap_err();
    assert!(matches!(overlapping, BatwatchError::Conflict(_)));

    let records = store.list_scheduled_records("srv-1").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key(), "2026-05-01T21:00:00Z");
    assert_eq!(records[0].status, RecordStatus::Scheduled);

    let nothing_ready = dispatcher.dispatch("srv-1", &Command::Transmit, now).unwrap_err();
    assert!(matches!(nothing_ready, BatwatchError::Invalid(_)));

    dispatcher
        .advance_record("srv-1", &start, RecordStatus::Recording, now)
        .unwrap();
    let skip = dispatcher
        .advance_record("srv-1", &start, RecordStatus::Completed, now)
        .unwrap_err();
    assert!(matches!(skip, BatwatchError::Transition { .. }));
    dispatcher
        .advance_record("srv-1", &start, RecordStatus::ReadyToTransmit, now)
        .unwrap();

    let state = dispatcher.dispatch("srv-1", &Command::Transmit, now).unwrap();
    assert_eq!(state.mode, Mode::TransmitScheduled);
}

#[test]
fn standalone_records_upload() {
    let (_dir, store) = open_store();
    store.add_unit(&unit("solo", UnitKind::Standalone, None)).unwrap();
    let dispatcher = CommandDispatcher::new(store.clone(), DispatchPolicy::default());
    let now = Utc::now();
    let start = now + Duration::minutes(10);
    dispatcher
        .dispatch(
            "solo",
            &Command::ScheduleRecord {
                start,
                duration_secs: 120,
            },
            now,
        )
        .unwrap();

    dispatcher
        .advance_record("solo", &start, RecordStatus::Recording, now)
        .unwrap();
    let wrong_branch = dispatcher
        .advance_record("solo", &start, RecordStatus::ReadyToTransmit, now)
        .unwrap_err();
    assert!(matches!(wrong_branch, BatwatchError::Transition { .. }));
    dispatcher
        .advance_record("solo", &start, RecordStatus::ReadyToUpload, now)
        .unwrap();
    dispatcher
        .advance_record("solo", &start, RecordStatus::Uploading, now)
        .unwrap();
    let done = dispatcher
        .advance_record("solo", &start, RecordStatus::Completed, now)
        .unwrap();
    assert_eq!(done.status, RecordStatus::Completed);
}
