//! Bulk party ingestion through a bounded worker pool.
//!
//! Used when a batch of parties arrives from a remote pull. One producer
//! streams the batch into a handoff channel; up to [`MAX_FANOUT_WORKERS`]
//! workers pull from it and merge one party at a time. The first worker
//! error aborts the rest of the batch and is returned to the caller;
//! parties already merged stay merged. Re-sending the batch is safe: the
//! staleness rule makes every merge idempotent.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::error::HubError;
use crate::merge::MergeCoordinator;
use crate::model::Party;

pub const MAX_FANOUT_WORKERS: usize = 10;

pub struct PartyFanoutMerger {
    coordinator: Arc<MergeCoordinator>,
}

impl PartyFanoutMerger {
    pub fn new(coordinator: Arc<MergeCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn merge_many(&self, parties: Vec<Party>) -> Result<(), HubError> {
        if parties.is_empty() {
            return Ok(());
        }
        let workers = parties.len().min(MAX_FANOUT_WORKERS).max(1);

        // Handoff channel: the producer blocks until a worker is ready.
        let (tx, rx) = mpsc::channel::<Party>(1);
        let rx = Arc::new(Mutex::new(rx));

        let mut set: JoinSet<Result<(), HubError>> = JoinSet::new();
        for _ in 0..workers {
            let rx = Arc::clone(&rx);
            let coordinator = Arc::clone(&self.coordinator);
            set.spawn(async move {
                loop {
                    let party = rx.lock().await.recv().await;
                    match party {
                        Some(party) => {
                            coordinator.merge_party(party).await?;
                        }
                        None => return Ok(()),
                    }
                }
            });
        }

        let producer = tokio::spawn(async move {
            for party in parties {
                // Workers dropping the channel means the batch was aborted.
                if tx.send(party).await.is_err() {
                    break;
                }
            }
        });

        let mut first_err: Option<HubError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                        set.abort_all();
                    }
                }
                Err(join_err) => {
                    if !join_err.is_cancelled() && first_err.is_none() {
                        first_err = Some(HubError::WorkerPanic(join_err.to_string()));
                        set.abort_all();
                    }
                }
            }
        }

        if first_err.is_some() {
            producer.abort();
        }
        let _ = producer.await;

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
