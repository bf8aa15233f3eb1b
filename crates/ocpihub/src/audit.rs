//! Asynchronous, dual-triggered batching audit-log writer.
//!
//! One background task owns the buffer. Producers only enqueue — `save`
//! never blocks on persistence and a flush failure is never surfaced to
//! the request that produced the entry. A batch flushes on whichever comes
//! first: the flush window elapsing (measured from the batch's first item)
//! or the batch reaching its max size. On shutdown the worker drains the
//! channel and performs one final flush.

use std::sync::Arc;
use std::time::Duration;

use futures::future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use crate::model::LogMessage;
use crate::store::HubStore;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Max time a batch may collect before flushing.
    pub flush_window: Duration,
    /// Item count that triggers an immediate flush.
    pub max_batch: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_secs(5),
            max_batch: 100,
        }
    }
}

pub struct AuditLogWriter {
    tx: mpsc::UnboundedSender<LogMessage>,
    worker: JoinHandle<()>,
}

impl AuditLogWriter {
    /// Spawn the background worker on the current runtime.
    pub fn spawn(store: Arc<dyn HubStore>, config: AuditConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(store, config, rx));
        Self { tx, worker }
    }

    /// Enqueue a log entry. Fire-and-forget: entries offered after shutdown
    /// are dropped.
    pub fn save(&self, message: LogMessage) {
        if self.tx.send(message).is_err() {
            debug!("audit writer stopped; dropping log entry");
        }
    }

    /// Close the input channel and wait for the final flush.
    pub async fn shutdown(self) {
        let AuditLogWriter { tx, worker } = self;
        drop(tx);
        if let Err(err) = worker.await {
            error!(error = %err, "audit writer task failed");
        }
    }
}

async fn run(
    store: Arc<dyn HubStore>,
    config: AuditConfig,
    mut rx: mpsc::UnboundedReceiver<LogMessage>,
) {
    let mut batch: Vec<LogMessage> = Vec::with_capacity(config.max_batch);
    // Set when the current batch started collecting; None while empty.
    let mut deadline: Option<Instant> = None;

    loop {
        let window = deadline;
        let window_elapsed = async move {
            match window {
                Some(at) => sleep_until(at).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            received = rx.recv() => match received {
                Some(message) => {
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + config.flush_window);
                    }
                    batch.push(message);
                    if batch.len() >= config.max_batch {
                        flush(store.as_ref(), &mut batch).await;
                        deadline = None;
                    }
                }
                // Channel closed: drain happened implicitly (recv returned
                // everything buffered before None), final flush below.
                None => break,
            },
            _ = window_elapsed => {
                flush(store.as_ref(), &mut batch).await;
                deadline = None;
            }
        }
    }

    flush(store.as_ref(), &mut batch).await;
}

async fn flush(store: &dyn HubStore, batch: &mut Vec<LogMessage>) {
    if batch.is_empty() {
        return;
    }
    match store.insert_log_batch(batch).await {
        Ok(()) => debug!(items = batch.len(), "audit batch flushed"),
        Err(err) => error!(items = batch.len(), error = %err, "audit batch flush failed"),
    }
    batch.clear();
}
