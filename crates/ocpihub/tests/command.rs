use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ocpihub_testing::{ManualScheduler, MemoryStore};

use ocpihub::command::{
    register_sweeps, CommandConfig, CommandLifecycle, ExpiryHandler,
};
use ocpihub::error::HubError;
use ocpihub::model::{
    Command, CommandDetails, CommandKind, CommandOrigin, CommandStatus, Processing,
    ProcessingResult,
};
use ocpihub::store::HubStore;
use ocpihub::sync::SyncHeader;

fn at(secs: i64) -> Option<DateTime<Utc>> {
    Some(Utc.timestamp_opt(secs, 0).unwrap())
}

fn setup() -> (MemoryStore, CommandLifecycle) {
    let store = MemoryStore::new();
    let lifecycle = CommandLifecycle::new(Arc::new(store.clone()));
    (store, lifecycle)
}

fn stop_session(id: &str) -> Command {
    Command {
        id: id.into(),
        sync: Default::default(),
        cmd: CommandKind::StopSession,
        status: Default::default(),
        origin: Default::default(),
        deadline: None,
        auth_ref: None,
        details: CommandDetails::StopSession {
            session_id: "s-1".into(),
        },
        processing: None,
    }
}

fn reserve(id: &str, reservation_id: &str) -> Command {
    Command {
        id: id.into(),
        sync: Default::default(),
        cmd: CommandKind::ReserveNow,
        status: Default::default(),
        origin: Default::default(),
        deadline: None,
        auth_ref: None,
        details: CommandDetails::ReserveNow {
            reservation_id: reservation_id.into(),
            location_id: "loc-1".into(),
            evse_uid: None,
            token_uid: "tok-1".into(),
            expiry_date: None,
        },
        processing: None,
    }
}

fn result_patch(id: &str, secs: i64, result: ProcessingResult) -> Command {
    let mut patch = stop_session(id);
    patch.sync = SyncHeader {
        last_updated: at(secs),
        ..Default::default()
    };
    patch.processing = Some(Processing {
        status: Some(result),
        message: None,
    });
    patch
}

#[tokio::test]
async fn create_assigns_id_when_absent() {
    let (store, lifecycle) = setup();
    let created = lifecycle.create(stop_session("")).await.unwrap();
    assert!(!created.id.is_empty());
    assert!(store.get_command(&created.id).await.unwrap().is_some());
}

#[tokio::test]
async fn reservation_id_is_unique_across_commands() {
    let (_, lifecycle) = setup();
    lifecycle.create(reserve("c-1", "r-1")).await.unwrap();

    let err = lifecycle.create(reserve("c-2", "r-1")).await.unwrap_err();
    match err {
        HubError::ReservationInUse {
            reservation_id,
            command_id,
        } => {
            assert_eq!(reservation_id, "r-1");
            assert_eq!(command_id, "c-1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn reservation_retry_with_same_command_id_is_allowed() {
    let (_, lifecycle) = setup();
    lifecycle.create(reserve("c-1", "r-1")).await.unwrap();
    lifecycle.create(reserve("c-1", "r-1")).await.unwrap();
}

#[tokio::test]
async fn accepted_result_derives_processed_ok() {
    let (_, lifecycle) = setup();
    lifecycle.create(stop_session("c-1")).await.unwrap();

    let updated = lifecycle
        .update(result_patch("c-1", 100, ProcessingResult::Accepted))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, CommandStatus::ProcessedOk);
}

#[tokio::test]
async fn rejected_result_derives_processed_rejected() {
    let (_, lifecycle) = setup();
    lifecycle.create(stop_session("c-1")).await.unwrap();

    let updated = lifecycle
        .update(result_patch("c-1", 100, ProcessingResult::Rejected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, CommandStatus::ProcessedRejected);
}

#[tokio::test]
async fn failure_results_derive_processed_failed() {
    let (_, lifecycle) = setup();
    lifecycle.create(stop_session("c-1")).await.unwrap();

    let updated = lifecycle
        .update(result_patch("c-1", 100, ProcessingResult::EvseOccupied))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, CommandStatus::ProcessedFailed);
}

#[tokio::test]
async fn stale_callback_is_dropped() {
    let (store, lifecycle) = setup();
    lifecycle.create(stop_session("c-1")).await.unwrap();
    lifecycle
        .update(result_patch("c-1", 100, ProcessingResult::Accepted))
        .await
        .unwrap();

    let result = lifecycle
        .update(result_patch("c-1", 90, ProcessingResult::Rejected))
        .await
        .unwrap();
    assert!(result.is_none());
    let stored = store.get_command("c-1").await.unwrap().unwrap();
    assert_eq!(stored.status, CommandStatus::ProcessedOk);
}

#[tokio::test]
async fn callback_for_unknown_command_is_not_found() {
    let (_, lifecycle) = setup();
    let err = lifecycle
        .update(result_patch("missing", 100, ProcessingResult::Accepted))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::NotFound { entity: "command", .. }));
}

#[tokio::test]
async fn callback_requires_a_clock() {
    let (_, lifecycle) = setup();
    lifecycle.create(stop_session("c-1")).await.unwrap();

    let mut patch = stop_session("c-1");
    patch.processing = Some(Processing {
        status: Some(ProcessingResult::Accepted),
        message: None,
    });
    let err = lifecycle.update(patch).await.unwrap_err();
    assert!(matches!(
        err,
        HubError::Validation {
            field: "last_updated",
            ..
        }
    ));
}

#[derive(Default)]
struct Collecting {
    seen: Mutex<Vec<(CommandOrigin, String)>>,
}

#[async_trait]
impl ExpiryHandler for Collecting {
    async fn handle(&self, expired: Vec<Command>) {
        let mut seen = self.seen.lock().unwrap();
        for command in expired {
            seen.push((command.origin, command.id));
        }
    }
}

#[tokio::test]
async fn sweeps_report_overdue_pending_commands_per_origin() {
    let (_, lifecycle) = setup();
    let lifecycle = Arc::new(lifecycle);
    let past = Utc::now() - ChronoDuration::hours(1);
    let future = Utc::now() + ChronoDuration::hours(1);

    let mut overdue_local = stop_session("c-local");
    overdue_local.deadline = Some(past);
    lifecycle.create(overdue_local).await.unwrap();

    let mut overdue_remote = stop_session("c-remote");
    overdue_remote.origin = CommandOrigin::Remote;
    overdue_remote.deadline = Some(past);
    lifecycle.create(overdue_remote).await.unwrap();

    let mut on_time = stop_session("c-on-time");
    on_time.deadline = Some(future);
    lifecycle.create(on_time).await.unwrap();

    let scheduler = ManualScheduler::new();
    let handler = Arc::new(Collecting::default());
    register_sweeps(
        &scheduler,
        Arc::clone(&lifecycle),
        Arc::clone(&handler) as Arc<dyn ExpiryHandler>,
        &CommandConfig::default(),
    );
    assert_eq!(
        scheduler.job_names(),
        vec![
            "command-deadline-sweep-local".to_string(),
            "command-deadline-sweep-remote".to_string(),
        ]
    );

    scheduler.tick().await;

    let seen = handler.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (CommandOrigin::Local, "c-local".to_string()),
            (CommandOrigin::Remote, "c-remote".to_string()),
        ]
    );
}

#[tokio::test]
async fn terminal_commands_are_not_swept() {
    let (_, lifecycle) = setup();
    let mut overdue = stop_session("c-1");
    overdue.deadline = Some(Utc::now() - ChronoDuration::hours(1));
    lifecycle.create(overdue).await.unwrap();
    lifecycle
        .update(result_patch("c-1", 100, ProcessingResult::Accepted))
        .await
        .unwrap();

    let expired = lifecycle.expired(CommandOrigin::Local).await.unwrap();
    assert!(expired.is_empty());
}
