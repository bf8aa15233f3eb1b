use std::sync::Arc;
use std::time::Duration;

use ocpihub_testing::MemoryStore;
use tokio::time::sleep;

use ocpihub::audit::{AuditConfig, AuditLogWriter};
use ocpihub::model::LogMessage;

fn config(window_ms: u64, max_batch: usize) -> AuditConfig {
    AuditConfig {
        flush_window: Duration::from_millis(window_ms),
        max_batch,
    }
}

#[tokio::test(start_paused = true)]
async fn window_elapsing_flushes_the_batch() {
    let store = MemoryStore::new();
    let writer = AuditLogWriter::spawn(Arc::new(store.clone()), config(200, 100));

    for _ in 0..3 {
        writer.save(LogMessage::new("request"));
    }
    sleep(Duration::from_millis(300)).await;

    let batches = store.log_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);

    writer.shutdown().await;
    assert_eq!(store.log_batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaching_max_batch_flushes_immediately() {
    let store = MemoryStore::new();
    let writer = AuditLogWriter::spawn(Arc::new(store.clone()), config(60_000, 3));

    for _ in 0..5 {
        writer.save(LogMessage::new("request"));
    }
    sleep(Duration::from_millis(1)).await;

    let batches = store.log_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);

    // The two leftovers flush on shutdown, long before their window.
    writer.shutdown().await;
    let batches = store.log_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn each_window_is_measured_from_its_first_item() {
    let store = MemoryStore::new();
    let writer = AuditLogWriter::spawn(Arc::new(store.clone()), config(200, 100));

    writer.save(LogMessage::new("first"));
    sleep(Duration::from_millis(250)).await;
    writer.save(LogMessage::new("second"));
    sleep(Duration::from_millis(250)).await;

    let batches = store.log_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0][0].event, "first");
    assert_eq!(batches[1][0].event, "second");

    writer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_and_flushes_the_remainder() {
    let store = MemoryStore::new();
    let writer = AuditLogWriter::spawn(Arc::new(store.clone()), config(60_000, 100));

    writer.save(LogMessage::new("request"));
    writer.save(LogMessage::new("request"));
    writer.shutdown().await;

    let batches = store.log_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn flush_failure_is_absorbed() {
    let store = MemoryStore::new();
    store.fail_on("log.insert_batch");
    let writer = AuditLogWriter::spawn(Arc::new(store.clone()), config(200, 100));

    writer.save(LogMessage::new("request"));
    sleep(Duration::from_millis(300)).await;
    assert!(store.log_batches().is_empty());

    // The writer keeps accepting entries after a failed flush.
    store.clear_failures();
    writer.save(LogMessage::new("request"));
    writer.shutdown().await;
    assert_eq!(store.log_batches().len(), 1);
}
