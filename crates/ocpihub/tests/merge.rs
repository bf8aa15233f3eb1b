use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ocpihub_testing::MemoryStore;

use ocpihub::error::HubError;
use ocpihub::merge::MergeCoordinator;
use ocpihub::model::{
    ChargingPeriod, Connector, ConnectorFormat, ConnectorStandard, Evse, EvseStatus, Location,
    PowerType, Session, SessionStatus,
};
use ocpihub::store::HubStore;
use ocpihub::sync::{ExtId, SyncHeader};

fn at(secs: i64) -> Option<DateTime<Utc>> {
    Some(Utc.timestamp_opt(secs, 0).unwrap())
}

fn setup() -> (MemoryStore, MergeCoordinator) {
    let store = MemoryStore::new();
    let coordinator = MergeCoordinator::new(Arc::new(store.clone()));
    (store, coordinator)
}

fn header(secs: i64) -> SyncHeader {
    SyncHeader {
        ext_id: Some(ExtId::new("DE", "ABC")),
        last_updated: at(secs),
        ..Default::default()
    }
}

fn location(id: &str, secs: i64) -> Location {
    Location {
        id: id.into(),
        sync: header(secs),
        name: Some("Main".into()),
        address: "Street 1".into(),
        city: "Berlin".into(),
        country: "DEU".into(),
        ..Default::default()
    }
}

fn connector(id: &str) -> Connector {
    Connector {
        id: id.into(),
        standard: Some(ConnectorStandard::IecT2),
        format: Some(ConnectorFormat::Socket),
        power_type: Some(PowerType::Ac3Phase),
        ..Default::default()
    }
}

fn evse(uid: &str) -> Evse {
    Evse {
        uid: uid.into(),
        status: Some(EvseStatus::Available),
        connectors: vec![connector("1")],
        ..Default::default()
    }
}

fn session(id: &str, secs: i64) -> Session {
    Session {
        id: id.into(),
        sync: header(secs),
        kwh: Some(5.5),
        status: Some(SessionStatus::Active),
        ..Default::default()
    }
}

fn period(secs: i64) -> ChargingPeriod {
    ChargingPeriod {
        session_id: String::new(),
        start_date_time: Utc.timestamp_opt(secs, 0).unwrap(),
        dimensions: Vec::new(),
    }
}

#[tokio::test]
async fn stale_put_is_a_silent_noop() {
    let (store, coordinator) = setup();
    coordinator.put_location(location("loc-1", 100)).await.unwrap();

    let mut older = location("loc-1", 99);
    older.city = "Hamburg".into();
    let result = coordinator.put_location(older).await.unwrap();

    assert!(result.is_none());
    let stored = store.get_location("loc-1").await.unwrap().unwrap();
    assert_eq!(stored.city, "Berlin");
    assert_eq!(stored.sync.last_updated, at(100));
}

#[tokio::test]
async fn equal_clock_put_reapplies() {
    let (store, coordinator) = setup();
    coordinator.put_location(location("loc-1", 100)).await.unwrap();

    let mut retry = location("loc-1", 100);
    retry.city = "Hamburg".into();
    let result = coordinator.put_location(retry).await.unwrap();

    assert!(result.is_some());
    let stored = store.get_location("loc-1").await.unwrap().unwrap();
    assert_eq!(stored.city, "Hamburg");
}

#[tokio::test]
async fn put_backfills_header_from_stored() {
    let (store, coordinator) = setup();
    let mut first = location("loc-1", 100);
    first.sync.ref_id = Some("ref-1".into());
    first.sync.last_sent = at(50);
    coordinator.put_location(first).await.unwrap();

    // Replacement restates nothing but the clock and the payload.
    let mut replace = location("loc-1", 200);
    replace.sync = SyncHeader {
        last_updated: at(200),
        ..Default::default()
    };
    coordinator.put_location(replace).await.unwrap();

    let stored = store.get_location("loc-1").await.unwrap().unwrap();
    assert_eq!(stored.sync.ref_id.as_deref(), Some("ref-1"));
    assert_eq!(stored.sync.last_sent, at(50));
    assert_eq!(stored.sync.ext_id, Some(ExtId::new("DE", "ABC")));
    assert_eq!(stored.sync.last_updated, at(200));
}

#[tokio::test]
async fn put_stamps_children_with_parent_identity() {
    let (store, coordinator) = setup();
    let mut incoming = location("loc-1", 100);
    incoming.evses = vec![evse("e-1")];
    coordinator.put_location(incoming).await.unwrap();

    let stored_evse = store.get_evse("loc-1", "e-1").await.unwrap().unwrap();
    assert_eq!(stored_evse.location_id, "loc-1");
    assert_eq!(stored_evse.sync.ext_id, Some(ExtId::new("DE", "ABC")));
    assert_eq!(stored_evse.sync.last_updated, at(100));

    let stored_connector = store
        .get_connector("loc-1", "e-1", "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_connector.evse_uid, "e-1");
    assert_eq!(stored_connector.location_id, "loc-1");
    assert_eq!(stored_connector.sync.last_updated, at(100));
}

#[tokio::test]
async fn failed_child_write_leaves_nothing_behind() {
    let (store, coordinator) = setup();
    store.fail_on("connector.upsert");

    let mut incoming = location("loc-1", 100);
    incoming.evses = vec![evse("e-1")];
    let err = coordinator.put_location(incoming).await.unwrap_err();

    assert!(matches!(err, HubError::Storage { .. }));
    assert!(store.get_location("loc-1").await.unwrap().is_none());
    assert!(store.get_evse("loc-1", "e-1").await.unwrap().is_none());
}

#[tokio::test]
async fn merge_patch_requires_a_clock() {
    let (_, coordinator) = setup();
    let mut patch = location("loc-1", 0);
    patch.sync.last_updated = None;
    let err = coordinator.merge_location(patch).await.unwrap_err();
    assert!(matches!(
        err,
        HubError::Validation {
            field: "last_updated",
            ..
        }
    ));
}

#[tokio::test]
async fn merge_never_creates() {
    let (_, coordinator) = setup();
    let err = coordinator
        .merge_location(location("missing", 100))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::NotFound { .. }));
}

#[tokio::test]
async fn location_merge_rejects_nested_evses() {
    let (_, coordinator) = setup();
    let mut patch = location("loc-1", 100);
    patch.evses = vec![evse("e-1")];
    let err = coordinator.merge_location(patch).await.unwrap_err();
    assert!(matches!(err, HubError::ChildMergeRejected { entity: "location" }));
}

#[tokio::test]
async fn evse_merge_rejects_nested_connectors() {
    let (_, coordinator) = setup();
    let mut patch = evse("e-1");
    patch.location_id = "loc-1".into();
    patch.sync.last_updated = at(100);
    let err = coordinator.merge_evse(patch).await.unwrap_err();
    assert!(matches!(err, HubError::ChildMergeRejected { entity: "evse" }));
}

#[tokio::test]
async fn merge_copies_only_set_fields() {
    let (store, coordinator) = setup();
    coordinator.put_location(location("loc-1", 100)).await.unwrap();

    let patch = Location {
        id: "loc-1".into(),
        sync: SyncHeader {
            last_updated: at(110),
            ..Default::default()
        },
        time_zone: Some("Europe/Berlin".into()),
        ..Default::default()
    };
    let merged = coordinator.merge_location(patch).await.unwrap().unwrap();

    assert_eq!(merged.name.as_deref(), Some("Main"));
    assert_eq!(merged.city, "Berlin");
    assert_eq!(merged.time_zone.as_deref(), Some("Europe/Berlin"));
    assert_eq!(merged.sync.last_updated, at(110));
    let stored = store.get_location("loc-1").await.unwrap().unwrap();
    assert_eq!(stored.time_zone.as_deref(), Some("Europe/Berlin"));
}

#[tokio::test]
async fn merge_cannot_reassign_owning_party() {
    let (store, coordinator) = setup();
    coordinator.put_location(location("loc-1", 100)).await.unwrap();

    let patch = Location {
        id: "loc-1".into(),
        sync: SyncHeader {
            ext_id: Some(ExtId::new("FR", "XYZ")),
            last_updated: at(110),
            ..Default::default()
        },
        ..Default::default()
    };
    coordinator.merge_location(patch).await.unwrap();

    let stored = store.get_location("loc-1").await.unwrap().unwrap();
    assert_eq!(stored.sync.ext_id, Some(ExtId::new("DE", "ABC")));
    assert_eq!(stored.sync.last_updated, at(110));
}

#[tokio::test]
async fn stale_merge_is_a_silent_noop() {
    let (store, coordinator) = setup();
    coordinator.put_location(location("loc-1", 100)).await.unwrap();

    let mut patch = Location {
        id: "loc-1".into(),
        sync: SyncHeader {
            last_updated: at(90),
            ..Default::default()
        },
        ..Default::default()
    };
    patch.name = Some("Renamed".into());
    let result = coordinator.merge_location(patch).await.unwrap();

    assert!(result.is_none());
    let stored = store.get_location("loc-1").await.unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("Main"));
    assert_eq!(stored.sync.last_updated, at(100));
}

#[tokio::test]
async fn session_merge_keeps_unset_fields() {
    let (store, coordinator) = setup();
    coordinator.put_session(session("s-1", 100)).await.unwrap();

    let patch = Session {
        id: "s-1".into(),
        sync: SyncHeader {
            last_updated: at(110),
            ..Default::default()
        },
        status: Some(SessionStatus::Completed),
        ..Default::default()
    };
    coordinator.merge_session(patch).await.unwrap();

    let stored = store.get_session("s-1").await.unwrap().unwrap();
    assert_eq!(stored.kwh, Some(5.5));
    assert_eq!(stored.status, Some(SessionStatus::Completed));
}

#[tokio::test]
async fn session_merge_replaces_period_set_wholesale() {
    let (store, coordinator) = setup();
    let mut incoming = session("s-1", 100);
    incoming.charging_periods = vec![period(10)];
    coordinator.put_session(incoming).await.unwrap();

    let patch = Session {
        id: "s-1".into(),
        sync: SyncHeader {
            last_updated: at(110),
            ..Default::default()
        },
        charging_periods: vec![period(20), period(30)],
        ..Default::default()
    };
    coordinator.merge_session(patch).await.unwrap();

    let stored = store.get_session("s-1").await.unwrap().unwrap();
    assert_eq!(stored.charging_periods.len(), 2);
    assert!(stored
        .charging_periods
        .iter()
        .all(|p| p.session_id == "s-1"));
}

#[tokio::test]
async fn session_merge_without_periods_keeps_stored_set() {
    let (store, coordinator) = setup();
    let mut incoming = session("s-1", 100);
    incoming.charging_periods = vec![period(10)];
    coordinator.put_session(incoming).await.unwrap();

    let patch = Session {
        id: "s-1".into(),
        sync: SyncHeader {
            last_updated: at(110),
            ..Default::default()
        },
        kwh: Some(7.0),
        ..Default::default()
    };
    coordinator.merge_session(patch).await.unwrap();

    let stored = store.get_session("s-1").await.unwrap().unwrap();
    assert_eq!(stored.charging_periods.len(), 1);
    assert_eq!(stored.kwh, Some(7.0));
}

#[tokio::test]
async fn session_put_failure_rolls_back_row_and_periods() {
    let (store, coordinator) = setup();
    store.fail_on("session.replace_periods");

    let mut incoming = session("s-1", 100);
    incoming.charging_periods = vec![period(10)];
    let err = coordinator.put_session(incoming).await.unwrap_err();

    assert!(matches!(err, HubError::Storage { .. }));
    assert!(store.get_session("s-1").await.unwrap().is_none());
}

#[tokio::test]
async fn put_with_empty_id_is_rejected() {
    let (_, coordinator) = setup();
    let err = coordinator
        .put_location(location("", 100))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Validation { field: "id", .. }));
}
