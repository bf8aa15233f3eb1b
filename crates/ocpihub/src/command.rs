//! Time-boxed command lifecycle.
//!
//! A command moves `created → accepted | rejected` at request level, then
//! optionally to one of the terminal result states. The outer status is
//! never set directly by a response callback: when the callback carries a
//! processing result, the lifecycle derives the status from the fixed
//! result table in [`crate::model::ProcessingResult::derived_status`].
//!
//! Deadline enforcement is cron-driven: two independently scheduled sweeps
//! (local- and remote-originated commands) query still-pending commands
//! past their deadline and hand them to the caller's expiry handler.
//! Marking `processed_expired` and emitting side-effects is the handler's
//! responsibility.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cron::{CronJob, Scheduler};
use crate::error::HubError;
use crate::model::{Command, CommandOrigin};
use crate::store::{CommandCriteria, HubStore};
use crate::sync::Syncable;
use crate::validate::Validate;

/// Sweep intervals for the two command origins.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub local_sweep_every: Duration,
    pub remote_sweep_every: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            local_sweep_every: Duration::from_secs(30),
            remote_sweep_every: Duration::from_secs(60),
        }
    }
}

pub struct CommandLifecycle {
    store: Arc<dyn HubStore>,
}

impl CommandLifecycle {
    pub fn new(store: Arc<dyn HubStore>) -> Self {
        Self { store }
    }

    /// Create a new command request.
    ///
    /// Assigns an id when absent, validates the typed payload against the
    /// declared kind, and enforces reservation-id uniqueness across *other*
    /// commands. The uniqueness check is check-then-insert and therefore
    /// race-prone; the window is accepted.
    pub async fn create(&self, mut command: Command) -> Result<Command, HubError> {
        if command.id.is_empty() {
            command.id = Uuid::new_v4().to_string();
        }
        command.validate()?;

        if let Some(reservation_id) = command.reservation_id() {
            let criteria =
                CommandCriteria::by_reservation(reservation_id).excluding(&command.id);
            if let Some(existing) = self.store.search_commands(&criteria).await?.into_iter().next()
            {
                return Err(HubError::ReservationInUse {
                    reservation_id: reservation_id.to_string(),
                    command_id: existing.id,
                });
            }
        }

        self.store.upsert_command(&command).await?;
        debug!(id = %command.id, cmd = %command.cmd, "command created");
        Ok(command)
    }

    /// Apply a response callback under the usual staleness rule.
    ///
    /// Returns `Ok(None)` when the callback is stale; `NotFound` when the
    /// command does not exist.
    pub async fn update(&self, patch: Command) -> Result<Option<Command>, HubError> {
        if patch.id.is_empty() {
            return Err(HubError::validation(
                Command::ENTITY,
                "id",
                "must not be empty",
            ));
        }
        if patch.sync.last_updated.is_none() {
            return Err(HubError::validation(
                Command::ENTITY,
                "last_updated",
                "is required on merge",
            ));
        }
        let mut stored = self
            .store
            .get_command(&patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Command::ENTITY, &patch.id))?;
        if patch.sync.is_stale_against(&stored.sync) {
            debug!(id = %patch.id, "stale command update dropped");
            return Ok(None);
        }

        stored.merge_from(&patch);
        if let Some(result) = stored.processing.as_ref().and_then(|p| p.status) {
            stored.status = result.derived_status();
        }
        stored.validate()?;
        self.store.upsert_command(&stored).await?;
        Ok(Some(stored))
    }

    /// Pending commands of one origin whose deadline has passed.
    pub async fn expired(&self, origin: CommandOrigin) -> Result<Vec<Command>, HubError> {
        self.store
            .search_commands(&CommandCriteria::expired(origin, Utc::now()))
            .await
    }
}

/// Receives the commands a sweep found past their deadline.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    async fn handle(&self, expired: Vec<Command>);
}

/// Cron action that reports overdue commands of one origin.
pub struct DeadlineSweep {
    name: String,
    origin: CommandOrigin,
    lifecycle: Arc<CommandLifecycle>,
    handler: Arc<dyn ExpiryHandler>,
}

impl DeadlineSweep {
    pub fn new(
        origin: CommandOrigin,
        lifecycle: Arc<CommandLifecycle>,
        handler: Arc<dyn ExpiryHandler>,
    ) -> Self {
        Self {
            name: format!("command-deadline-sweep-{origin}"),
            origin,
            lifecycle,
            handler,
        }
    }
}

#[async_trait]
impl CronJob for DeadlineSweep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        match self.lifecycle.expired(self.origin).await {
            Ok(expired) if expired.is_empty() => {}
            Ok(expired) => {
                info!(
                    origin = %self.origin,
                    count = expired.len(),
                    "commands past deadline"
                );
                self.handler.handle(expired).await;
            }
            Err(err) => {
                error!(origin = %self.origin, error = %err, "deadline sweep failed");
            }
        }
    }
}

/// Register the two deadline sweeps on the host scheduler.
pub fn register_sweeps(
    scheduler: &dyn Scheduler,
    lifecycle: Arc<CommandLifecycle>,
    handler: Arc<dyn ExpiryHandler>,
    config: &CommandConfig,
) {
    scheduler.register(
        config.local_sweep_every,
        Arc::new(DeadlineSweep::new(
            CommandOrigin::Local,
            Arc::clone(&lifecycle),
            Arc::clone(&handler),
        )),
    );
    scheduler.register(
        config.remote_sweep_every,
        Arc::new(DeadlineSweep::new(
            CommandOrigin::Remote,
            lifecycle,
            handler,
        )),
    );
}
