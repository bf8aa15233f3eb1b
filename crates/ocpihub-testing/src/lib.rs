//! Testing utilities for the ocpihub core.
//!
//! [`MemoryStore`] implements [`HubStore`] over dashmaps with a staged
//! transaction: nothing a [`ocpihub::HubTx`] writes is visible until
//! `commit`, which is what makes the atomicity properties observable in
//! tests. Failures can be injected per operation key (e.g.
//! `"connector.upsert"`) to exercise rollback paths.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use ocpihub::model::{
    Cdr, ChargingPeriod, Command, Connector, Evse, Location, LogMessage, Party, Session, Tariff,
    Token, Webhook,
};
use ocpihub::store::{CommandCriteria, SearchCriteria};
use ocpihub::sync::SyncHeader;
use ocpihub::{CronJob, HubError, HubStore, HubTx, Scheduler, StorageOp, WebhookTransport};

#[derive(Default)]
struct Tables {
    // Hierarchical entities are stored as rows, children keyed by their
    // parent scope, mirroring a normalized schema.
    locations: DashMap<String, Location>,
    evses: DashMap<(String, String), Evse>,
    connectors: DashMap<(String, String, String), Connector>,
    sessions: DashMap<String, Session>,
    periods: DashMap<String, Vec<ChargingPeriod>>,
    tariffs: DashMap<String, Tariff>,
    tokens: DashMap<String, Token>,
    cdrs: DashMap<String, Cdr>,
    parties: DashMap<String, Party>,
    commands: DashMap<String, Command>,
    webhooks: DashMap<String, Webhook>,
    log_batches: Mutex<Vec<Vec<LogMessage>>>,
    fail_ops: DashMap<String, ()>,
}

impl Tables {
    fn check_fail(
        &self,
        key: &str,
        op: StorageOp,
        entity: &'static str,
    ) -> Result<(), HubError> {
        if self.fail_ops.contains_key(key) {
            return Err(HubError::storage(op, entity, anyhow!("injected failure: {key}")));
        }
        Ok(())
    }

    fn assemble_location(&self, mut row: Location) -> Location {
        let mut evses: Vec<Evse> = self
            .evses
            .iter()
            .filter(|entry| entry.key().0 == row.id)
            .map(|entry| self.assemble_evse(entry.value().clone()))
            .collect();
        evses.sort_by(|a, b| a.uid.cmp(&b.uid));
        row.evses = evses;
        row
    }

    fn assemble_evse(&self, mut row: Evse) -> Evse {
        let mut connectors: Vec<Connector> = self
            .connectors
            .iter()
            .filter(|entry| entry.key().0 == row.location_id && entry.key().1 == row.uid)
            .map(|entry| entry.value().clone())
            .collect();
        connectors.sort_by(|a, b| a.id.cmp(&b.id));
        row.connectors = connectors;
        row
    }

    fn assemble_session(&self, mut row: Session) -> Session {
        row.charging_periods = self
            .periods
            .get(&row.id)
            .map(|p| p.value().clone())
            .unwrap_or_default();
        row
    }
}

fn header_matches(sync: &SyncHeader, criteria: &SearchCriteria) -> bool {
    if let Some(ext_id) = &criteria.ext_id {
        if sync.ext_id.as_ref() != Some(ext_id) {
            return false;
        }
    }
    if let Some(from) = criteria.updated_from {
        match sync.last_updated {
            Some(at) if at >= from => {}
            _ => return false,
        }
    }
    if let Some(to) = criteria.updated_to {
        match sync.last_updated {
            Some(at) if at <= to => {}
            _ => return false,
        }
    }
    if !criteria.platform_in.is_empty() {
        match sync.platform_id {
            Some(id) if criteria.platform_in.contains(&id) => {}
            _ => return false,
        }
    }
    if let Some(id) = sync.platform_id {
        if criteria.platform_not_in.contains(&id) {
            return false;
        }
    }
    true
}

fn page<T>(mut items: Vec<T>, criteria: &SearchCriteria) -> Vec<T> {
    if let Some(offset) = criteria.offset {
        let offset = offset.max(0) as usize;
        items = items.into_iter().skip(offset).collect();
    }
    if let Some(limit) = criteria.limit {
        items.truncate(limit.max(0) as usize);
    }
    items
}

/// In-memory [`HubStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given operation key fail until [`clear_failures`] is called.
    ///
    /// Keys are `"<entity>.<op>"`, e.g. `"connector.upsert"` or
    /// `"log.insert_batch"`.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.tables.fail_ops.insert(key.into(), ());
    }

    pub fn clear_failures(&self) {
        self.tables.fail_ops.clear();
    }

    /// Batches flushed through `insert_log_batch`, in flush order.
    pub fn log_batches(&self) -> Vec<Vec<LogMessage>> {
        self.tables.log_batches.lock().unwrap().clone()
    }
}

enum Staged {
    Location(Location),
    Evse(Evse),
    Connector(Connector),
    Session(Session),
    Periods(String, Vec<ChargingPeriod>),
}

struct MemoryTx {
    tables: Arc<Tables>,
    staged: Vec<Staged>,
}

#[async_trait]
impl HubTx for MemoryTx {
    async fn upsert_location(&mut self, location: &Location) -> Result<(), HubError> {
        self.tables
            .check_fail("location.upsert", StorageOp::Merge, "location")?;
        let mut row = location.clone();
        row.evses = Vec::new();
        self.staged.push(Staged::Location(row));
        Ok(())
    }

    async fn upsert_evse(&mut self, evse: &Evse) -> Result<(), HubError> {
        self.tables.check_fail("evse.upsert", StorageOp::Merge, "evse")?;
        let mut row = evse.clone();
        row.connectors = Vec::new();
        self.staged.push(Staged::Evse(row));
        Ok(())
    }

    async fn upsert_connector(&mut self, connector: &Connector) -> Result<(), HubError> {
        self.tables
            .check_fail("connector.upsert", StorageOp::Merge, "connector")?;
        self.staged.push(Staged::Connector(connector.clone()));
        Ok(())
    }

    async fn upsert_session(&mut self, session: &Session) -> Result<(), HubError> {
        self.tables
            .check_fail("session.upsert", StorageOp::Merge, "session")?;
        let mut row = session.clone();
        row.charging_periods = Vec::new();
        self.staged.push(Staged::Session(row));
        Ok(())
    }

    async fn replace_charging_periods(
        &mut self,
        session_id: &str,
        periods: &[ChargingPeriod],
    ) -> Result<(), HubError> {
        self.tables
            .check_fail("session.replace_periods", StorageOp::Merge, "session")?;
        self.staged
            .push(Staged::Periods(session_id.to_string(), periods.to_vec()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), HubError> {
        self.tables
            .check_fail("tx.commit", StorageOp::Transaction, "transaction")?;
        for write in self.staged {
            match write {
                Staged::Location(row) => {
                    self.tables.locations.insert(row.id.clone(), row);
                }
                Staged::Evse(row) => {
                    self.tables
                        .evses
                        .insert((row.location_id.clone(), row.uid.clone()), row);
                }
                Staged::Connector(row) => {
                    self.tables.connectors.insert(
                        (row.location_id.clone(), row.evse_uid.clone(), row.id.clone()),
                        row,
                    );
                }
                Staged::Session(row) => {
                    self.tables.sessions.insert(row.id.clone(), row);
                }
                Staged::Periods(session_id, periods) => {
                    self.tables.periods.insert(session_id, periods);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), HubError> {
        Ok(())
    }
}

#[async_trait]
impl HubStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn HubTx>, HubError> {
        self.tables
            .check_fail("tx.begin", StorageOp::Transaction, "transaction")?;
        Ok(Box::new(MemoryTx {
            tables: Arc::clone(&self.tables),
            staged: Vec::new(),
        }))
    }

    async fn get_location(&self, id: &str) -> Result<Option<Location>, HubError> {
        self.tables.check_fail("location.get", StorageOp::Get, "location")?;
        Ok(self
            .tables
            .locations
            .get(id)
            .map(|row| self.tables.assemble_location(row.clone())))
    }

    async fn delete_location(&self, id: &str) -> Result<(), HubError> {
        self.tables.locations.remove(id);
        self.tables.evses.retain(|key, _| key.0 != id);
        self.tables.connectors.retain(|key, _| key.0 != id);
        Ok(())
    }

    async fn search_locations(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<Location>, HubError> {
        let mut found: Vec<Location> = self
            .tables
            .locations
            .iter()
            .filter(|entry| criteria.ids.is_empty() || criteria.ids.contains(entry.key()))
            .filter(|entry| header_matches(&entry.value().sync, criteria))
            .map(|entry| self.tables.assemble_location(entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(page(found, criteria))
    }

    async fn get_evse(&self, location_id: &str, uid: &str) -> Result<Option<Evse>, HubError> {
        self.tables.check_fail("evse.get", StorageOp::Get, "evse")?;
        Ok(self
            .tables
            .evses
            .get(&(location_id.to_string(), uid.to_string()))
            .map(|row| self.tables.assemble_evse(row.clone())))
    }

    async fn get_connector(
        &self,
        location_id: &str,
        evse_uid: &str,
        id: &str,
    ) -> Result<Option<Connector>, HubError> {
        Ok(self
            .tables
            .connectors
            .get(&(location_id.to_string(), evse_uid.to_string(), id.to_string()))
            .map(|row| row.value().clone()))
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, HubError> {
        self.tables.check_fail("session.get", StorageOp::Get, "session")?;
        Ok(self
            .tables
            .sessions
            .get(id)
            .map(|row| self.tables.assemble_session(row.clone())))
    }

    async fn delete_session(&self, id: &str) -> Result<(), HubError> {
        self.tables.sessions.remove(id);
        self.tables.periods.remove(id);
        Ok(())
    }

    async fn search_sessions(&self, criteria: &SearchCriteria) -> Result<Vec<Session>, HubError> {
        let mut found: Vec<Session> = self
            .tables
            .sessions
            .iter()
            .filter(|entry| criteria.ids.is_empty() || criteria.ids.contains(entry.key()))
            .filter(|entry| header_matches(&entry.value().sync, criteria))
            .map(|entry| self.tables.assemble_session(entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(page(found, criteria))
    }

    async fn get_tariff(&self, id: &str) -> Result<Option<Tariff>, HubError> {
        Ok(self.tables.tariffs.get(id).map(|row| row.value().clone()))
    }

    async fn upsert_tariff(&self, tariff: &Tariff) -> Result<(), HubError> {
        self.tables.check_fail("tariff.upsert", StorageOp::Merge, "tariff")?;
        self.tables
            .tariffs
            .insert(tariff.id.clone(), tariff.clone());
        Ok(())
    }

    async fn delete_tariff(&self, id: &str) -> Result<(), HubError> {
        self.tables.tariffs.remove(id);
        Ok(())
    }

    async fn get_token(&self, uid: &str) -> Result<Option<Token>, HubError> {
        Ok(self.tables.tokens.get(uid).map(|row| row.value().clone()))
    }

    async fn upsert_token(&self, token: &Token) -> Result<(), HubError> {
        self.tables.check_fail("token.upsert", StorageOp::Merge, "token")?;
        self.tables.tokens.insert(token.uid.clone(), token.clone());
        Ok(())
    }

    async fn delete_token(&self, uid: &str) -> Result<(), HubError> {
        self.tables.tokens.remove(uid);
        Ok(())
    }

    async fn get_cdr(&self, id: &str) -> Result<Option<Cdr>, HubError> {
        Ok(self.tables.cdrs.get(id).map(|row| row.value().clone()))
    }

    async fn upsert_cdr(&self, cdr: &Cdr) -> Result<(), HubError> {
        self.tables.check_fail("cdr.upsert", StorageOp::Merge, "cdr")?;
        self.tables.cdrs.insert(cdr.id.clone(), cdr.clone());
        Ok(())
    }

    async fn get_party(&self, id: &str) -> Result<Option<Party>, HubError> {
        self.tables.check_fail("party.get", StorageOp::Get, "party")?;
        Ok(self.tables.parties.get(id).map(|row| row.value().clone()))
    }

    async fn upsert_party(&self, party: &Party) -> Result<(), HubError> {
        self.tables.check_fail("party.upsert", StorageOp::Merge, "party")?;
        self.tables
            .parties
            .insert(party.id.clone(), party.clone());
        Ok(())
    }

    async fn search_parties(&self, criteria: &SearchCriteria) -> Result<Vec<Party>, HubError> {
        let mut found: Vec<Party> = self
            .tables
            .parties
            .iter()
            .filter(|entry| criteria.ids.is_empty() || criteria.ids.contains(entry.key()))
            .filter(|entry| header_matches(&entry.value().sync, criteria))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(page(found, criteria))
    }

    async fn get_command(&self, id: &str) -> Result<Option<Command>, HubError> {
        Ok(self.tables.commands.get(id).map(|row| row.value().clone()))
    }

    async fn upsert_command(&self, command: &Command) -> Result<(), HubError> {
        self.tables
            .check_fail("command.upsert", StorageOp::Merge, "command")?;
        self.tables
            .commands
            .insert(command.id.clone(), command.clone());
        Ok(())
    }

    async fn search_commands(
        &self,
        criteria: &CommandCriteria,
    ) -> Result<Vec<Command>, HubError> {
        let mut found: Vec<Command> = self
            .tables
            .commands
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|command| {
                if let Some(reservation_id) = &criteria.reservation_id {
                    if command.reservation_id() != Some(reservation_id.as_str()) {
                        return false;
                    }
                }
                if let Some(exclude) = &criteria.exclude_id {
                    if &command.id == exclude {
                        return false;
                    }
                }
                if let Some(origin) = criteria.origin {
                    if command.origin != origin {
                        return false;
                    }
                }
                if criteria.pending_only && !command.status.is_pending() {
                    return false;
                }
                if let Some(before) = criteria.deadline_before {
                    match command.deadline {
                        Some(deadline) if deadline < before => {}
                        _ => return false,
                    }
                }
                true
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = criteria.limit {
            found.truncate(limit.max(0) as usize);
        }
        Ok(found)
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, HubError> {
        Ok(self.tables.webhooks.get(id).map(|row| row.value().clone()))
    }

    async fn upsert_webhook(&self, webhook: &Webhook) -> Result<(), HubError> {
        self.tables
            .webhooks
            .insert(webhook.id.clone(), webhook.clone());
        Ok(())
    }

    async fn delete_webhook(&self, id: &str) -> Result<(), HubError> {
        self.tables.webhooks.remove(id);
        Ok(())
    }

    async fn webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>, HubError> {
        self.tables
            .check_fail("webhook.search", StorageOp::Search, "webhook")?;
        let mut found: Vec<Webhook> = self
            .tables
            .webhooks
            .iter()
            .filter(|entry| entry.value().subscribes_to(event))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn insert_log_batch(&self, batch: &[LogMessage]) -> Result<(), HubError> {
        self.tables
            .check_fail("log.insert_batch", StorageOp::Create, "log_message")?;
        self.tables
            .log_batches
            .lock()
            .unwrap()
            .push(batch.to_vec());
        Ok(())
    }
}

/// A webhook call observed by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub api_key: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Webhook transport that records calls instead of making them.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<RecordedCall>>,
    signal: Notify,
    fail_urls: DashMap<String, ()>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to this url fail after being recorded.
    pub fn fail_url(&self, url: impl Into<String>) {
        self.fail_urls.insert(url.into(), ());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` calls have been recorded.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.signal.notified();
            if self.calls.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn call(
        &self,
        url: &str,
        api_key: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            api_key: api_key.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        self.signal.notify_waiters();
        if self.fail_urls.contains_key(url) {
            anyhow::bail!("delivery to {url} failed");
        }
        Ok(())
    }
}

/// Scheduler that runs registered jobs only when the test asks it to.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<(Duration, Arc<dyn CronJob>)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, job)| job.name().to_string())
            .collect()
    }

    /// Run every registered job once, in registration order.
    pub async fn tick(&self) {
        let jobs: Vec<Arc<dyn CronJob>> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, job)| Arc::clone(job))
            .collect();
        for job in jobs {
            job.run().await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn register(&self, every: Duration, job: Arc<dyn CronJob>) {
        self.jobs.lock().unwrap().push((every, job));
    }
}
