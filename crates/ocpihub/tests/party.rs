use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ocpihub_testing::MemoryStore;

use ocpihub::error::HubError;
use ocpihub::merge::MergeCoordinator;
use ocpihub::model::{Party, PartyStatus, Role};
use ocpihub::party::{PartyFanoutMerger, MAX_FANOUT_WORKERS};
use ocpihub::store::HubStore;
use ocpihub::sync::SyncHeader;

fn at(secs: i64) -> Option<DateTime<Utc>> {
    Some(Utc.timestamp_opt(secs, 0).unwrap())
}

fn party(id: &str, secs: i64) -> Party {
    Party {
        id: id.into(),
        sync: SyncHeader {
            last_updated: at(secs),
            ..Default::default()
        },
        name: Some(format!("Operator {id}")),
        website: None,
        roles: vec![Role::Cpo],
        status: Some(PartyStatus::Active),
    }
}

fn setup() -> (MemoryStore, PartyFanoutMerger) {
    let store = MemoryStore::new();
    let coordinator = Arc::new(MergeCoordinator::new(Arc::new(store.clone())));
    (store.clone(), PartyFanoutMerger::new(coordinator))
}

#[tokio::test]
async fn empty_batch_is_a_noop() {
    let (_, merger) = setup();
    merger.merge_many(Vec::new()).await.unwrap();
}

#[tokio::test]
async fn batch_larger_than_the_worker_pool_merges_every_party() {
    let (store, merger) = setup();
    let count = MAX_FANOUT_WORKERS * 2 + 5;
    for i in 0..count {
        store.upsert_party(&party(&format!("p-{i}"), 100)).await.unwrap();
    }

    let mut patches: Vec<Party> = (0..count)
        .map(|i| {
            let mut patch = party(&format!("p-{i}"), 200);
            patch.name = Some(format!("Renamed {i}"));
            patch
        })
        .collect();
    fastrand::shuffle(&mut patches);

    merger.merge_many(patches).await.unwrap();

    for i in 0..count {
        let stored = store.get_party(&format!("p-{i}")).await.unwrap().unwrap();
        assert_eq!(stored.name, Some(format!("Renamed {i}")));
        assert_eq!(stored.sync.last_updated, at(200));
    }
}

#[tokio::test]
async fn stale_patches_merge_as_noops() {
    let (store, merger) = setup();
    store.upsert_party(&party("p-1", 100)).await.unwrap();

    let mut stale = party("p-1", 50);
    stale.name = Some("Renamed".into());
    merger.merge_many(vec![stale]).await.unwrap();

    let stored = store.get_party("p-1").await.unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("Operator p-1"));
    assert_eq!(stored.sync.last_updated, at(100));
}

#[tokio::test]
async fn first_error_aborts_the_batch_and_retry_converges() {
    let (store, merger) = setup();
    for i in 0..5 {
        if i != 2 {
            store.upsert_party(&party(&format!("p-{i}"), 100)).await.unwrap();
        }
    }
    let patches: Vec<Party> = (0..5)
        .map(|i| {
            let mut patch = party(&format!("p-{i}"), 200);
            patch.name = Some(format!("Renamed {i}"));
            patch
        })
        .collect();

    // p-2 was never registered; merges never create.
    let err = merger.merge_many(patches.clone()).await.unwrap_err();
    assert!(matches!(err, HubError::NotFound { entity: "party", .. }));

    // Parties merged before the abort stay merged; re-sending the batch
    // after fixing the gap is idempotent and completes it.
    store.upsert_party(&party("p-2", 100)).await.unwrap();
    merger.merge_many(patches).await.unwrap();
    for i in 0..5 {
        let stored = store.get_party(&format!("p-{i}")).await.unwrap().unwrap();
        assert_eq!(stored.name, Some(format!("Renamed {i}")));
    }
}

#[tokio::test]
async fn storage_failure_surfaces_as_the_batch_error() {
    let (store, merger) = setup();
    store.upsert_party(&party("p-1", 100)).await.unwrap();
    store.fail_on("party.upsert");

    let err = merger.merge_many(vec![party("p-1", 200)]).await.unwrap_err();
    assert!(matches!(err, HubError::Storage { .. }));
}
