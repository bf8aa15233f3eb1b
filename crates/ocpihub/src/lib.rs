//! # ocpihub
//!
//! Core of an OCPI roaming hub: keeps EV-charging domain data consistent
//! across independently operated CPO/eMSP/HUB platforms, relays
//! asynchronous commands between them and notifies webhook subscribers of
//! domain changes.
//!
//! ## Architecture
//!
//! ```text
//! Transport layer (out of scope)
//!     │
//!     ├─► MergeCoordinator ──► HubStore (HubTx for composite writes)
//!     │        ▲
//!     │        └── PartyFanoutMerger (bulk remote pulls)
//!     │
//!     ├─► CommandLifecycle ──► HubStore
//!     │        ▲
//!     │        └── DeadlineSweep (cron, local + remote schedules)
//!     │
//!     ├─► WebhookDispatcher ──► WebhookTransport (detached per endpoint)
//!     │
//!     └─► AuditLogWriter ──► HubStore::insert_log_batch (background task)
//! ```
//!
//! ## Key invariants
//!
//! 1. **Monotone clocks** — per entity id, accepted `last_updated` values
//!    form a non-decreasing sequence; stale updates are silent no-ops
//!    (`Ok(None)`), never errors.
//! 2. **No partial composites** — a location tree or a session with its
//!    charging periods commits through one transaction or not at all.
//! 3. **Merges never create** — a PATCH on a missing id is `NotFound`;
//!    only PUT creates.
//! 4. **Eventing is best-effort** — webhook and audit failures are logged
//!    and absorbed, never surfaced to the triggering request.

pub mod audit;
pub mod command;
pub mod cron;
pub mod error;
pub mod merge;
pub mod model;
pub mod party;
pub mod store;
pub mod sync;
pub mod validate;
pub mod webhook;

pub use audit::{AuditConfig, AuditLogWriter};
pub use command::{
    register_sweeps, CommandConfig, CommandLifecycle, DeadlineSweep, ExpiryHandler,
};
pub use cron::{CronJob, Scheduler};
pub use error::{HubError, StorageOp};
pub use merge::MergeCoordinator;
pub use party::{PartyFanoutMerger, MAX_FANOUT_WORKERS};
pub use store::{CommandCriteria, HubStore, HubTx, SearchCriteria};
pub use sync::{ExtId, SyncHeader, Syncable};
pub use validate::Validate;
pub use webhook::{WebhookDispatcher, WebhookTransport};

// Re-export commonly used external types
pub use async_trait::async_trait;
