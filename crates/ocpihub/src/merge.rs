//! Optimistic, timestamp-based merge protocol.
//!
//! Two entry points per entity type:
//!
//! - **put** — replace or create. A stale PUT (incoming clock strictly older
//!   than stored) is silently dropped: the call returns `Ok(None)` and
//!   storage is untouched. Equal clocks re-apply, which makes retries
//!   idempotent.
//! - **merge** — partial update of an existing record. Requires an explicit
//!   clock, never creates, and copies only the non-empty fields of the
//!   patch onto the stored record.
//!
//! Composite entities (location trees, sessions with charging periods) are
//! persisted through a single [`HubTx`]: every row write succeeds or the
//! whole write rolls back.
//!
//! Two calls racing on the same id can both pass the staleness check
//! against the same stored snapshot; the outcome is then decided by storage
//! commit order. That weak-consistency window is accepted: the store seam
//! carries no in-process locks.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::HubError;
use crate::model::{Cdr, Connector, Evse, Location, Party, Session, Tariff, Token};
use crate::store::{HubStore, HubTx};
use crate::sync::Syncable;
use crate::validate::Validate;

pub struct MergeCoordinator {
    store: Arc<dyn HubStore>,
}

impl MergeCoordinator {
    pub fn new(store: Arc<dyn HubStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn HubStore> {
        &self.store
    }

    fn check_id<T: Syncable>(entity: &T) -> Result<(), HubError> {
        if entity.primary_id().is_empty() {
            return Err(HubError::validation(T::ENTITY, "id", "must not be empty"));
        }
        Ok(())
    }

    /// A PATCH must carry an explicit clock; the hub never invents one.
    fn check_patch_header<T: Syncable>(patch: &T) -> Result<(), HubError> {
        Self::check_id(patch)?;
        if patch.sync().last_updated.is_none() {
            return Err(HubError::validation(
                T::ENTITY,
                "last_updated",
                "is required on merge",
            ));
        }
        Ok(())
    }

    /// Returns true when the incoming update is stale and must be dropped.
    fn drop_if_stale<T: Syncable>(incoming: &T, stored: &T) -> bool {
        if incoming.sync().is_stale_against(stored.sync()) {
            debug!(
                entity = T::ENTITY,
                id = incoming.primary_id(),
                "stale update dropped"
            );
            return true;
        }
        false
    }

    async fn commit_or_rollback(
        mut tx: Box<dyn HubTx>,
        entity: &'static str,
        write: Result<(), HubError>,
    ) -> Result<(), HubError> {
        match write {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(entity, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Locations
    // ------------------------------------------------------------------

    pub async fn put_location(
        &self,
        mut incoming: Location,
    ) -> Result<Option<Location>, HubError> {
        Self::check_id(&incoming)?;
        let stored = self.store.get_location(&incoming.id).await?;
        if let Some(stored) = &stored {
            if Self::drop_if_stale(&incoming, stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        // Wholesale replace: children take the parent's identity and clock,
        // so the parent staleness check covers the whole tree.
        incoming.propagate_to_children();
        incoming.validate()?;

        let mut tx = self.store.begin().await?;
        let write = Self::write_location_tree(tx.as_mut(), &incoming).await;
        Self::commit_or_rollback(tx, Location::ENTITY, write).await?;
        Ok(Some(incoming))
    }

    async fn write_location_tree(
        tx: &mut (dyn HubTx + '_),
        location: &Location,
    ) -> Result<(), HubError> {
        tx.upsert_location(location).await?;
        for evse in &location.evses {
            tx.upsert_evse(evse).await?;
            for connector in &evse.connectors {
                tx.upsert_connector(connector).await?;
            }
        }
        Ok(())
    }

    pub async fn merge_location(
        &self,
        patch: Location,
    ) -> Result<Option<Location>, HubError> {
        Self::check_patch_header(&patch)?;
        if !patch.evses.is_empty() {
            return Err(HubError::ChildMergeRejected {
                entity: Location::ENTITY,
            });
        }
        let mut stored = self
            .store
            .get_location(&patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Location::ENTITY, &patch.id))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;

        let mut tx = self.store.begin().await?;
        let write = tx.upsert_location(&stored).await;
        Self::commit_or_rollback(tx, Location::ENTITY, write).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // EVSEs
    // ------------------------------------------------------------------

    pub async fn put_evse(&self, mut incoming: Evse) -> Result<Option<Evse>, HubError> {
        Self::check_id(&incoming)?;
        if incoming.location_id.is_empty() {
            return Err(HubError::validation(
                Evse::ENTITY,
                "location_id",
                "must not be empty",
            ));
        }
        let stored = self
            .store
            .get_evse(&incoming.location_id, &incoming.uid)
            .await?;
        if let Some(stored) = &stored {
            if Self::drop_if_stale(&incoming, stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.propagate_to_children();
        incoming.validate()?;

        let mut tx = self.store.begin().await?;
        let write = Self::write_evse_tree(tx.as_mut(), &incoming).await;
        Self::commit_or_rollback(tx, Evse::ENTITY, write).await?;
        Ok(Some(incoming))
    }

    async fn write_evse_tree(tx: &mut (dyn HubTx + '_), evse: &Evse) -> Result<(), HubError> {
        tx.upsert_evse(evse).await?;
        for connector in &evse.connectors {
            tx.upsert_connector(connector).await?;
        }
        Ok(())
    }

    pub async fn merge_evse(&self, patch: Evse) -> Result<Option<Evse>, HubError> {
        Self::check_patch_header(&patch)?;
        if !patch.connectors.is_empty() {
            return Err(HubError::ChildMergeRejected {
                entity: Evse::ENTITY,
            });
        }
        if patch.location_id.is_empty() {
            return Err(HubError::validation(
                Evse::ENTITY,
                "location_id",
                "must not be empty",
            ));
        }
        let mut stored = self
            .store
            .get_evse(&patch.location_id, &patch.uid)
            .await?
            .ok_or_else(|| HubError::not_found(Evse::ENTITY, &patch.uid))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;

        let mut tx = self.store.begin().await?;
        let write = tx.upsert_evse(&stored).await;
        Self::commit_or_rollback(tx, Evse::ENTITY, write).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // Connectors
    // ------------------------------------------------------------------

    pub async fn put_connector(
        &self,
        mut incoming: Connector,
    ) -> Result<Option<Connector>, HubError> {
        Self::check_id(&incoming)?;
        if incoming.location_id.is_empty() || incoming.evse_uid.is_empty() {
            return Err(HubError::validation(
                Connector::ENTITY,
                "evse_uid",
                "connector scope requires location_id and evse_uid",
            ));
        }
        let stored = self
            .store
            .get_connector(&incoming.location_id, &incoming.evse_uid, &incoming.id)
            .await?;
        if let Some(stored) = &stored {
            if Self::drop_if_stale(&incoming, stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.validate()?;

        let mut tx = self.store.begin().await?;
        let write = tx.upsert_connector(&incoming).await;
        Self::commit_or_rollback(tx, Connector::ENTITY, write).await?;
        Ok(Some(incoming))
    }

    pub async fn merge_connector(
        &self,
        patch: Connector,
    ) -> Result<Option<Connector>, HubError> {
        Self::check_patch_header(&patch)?;
        if patch.location_id.is_empty() || patch.evse_uid.is_empty() {
            return Err(HubError::validation(
                Connector::ENTITY,
                "evse_uid",
                "connector scope requires location_id and evse_uid",
            ));
        }
        let mut stored = self
            .store
            .get_connector(&patch.location_id, &patch.evse_uid, &patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Connector::ENTITY, &patch.id))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;

        let mut tx = self.store.begin().await?;
        let write = tx.upsert_connector(&stored).await;
        Self::commit_or_rollback(tx, Connector::ENTITY, write).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn put_session(&self, mut incoming: Session) -> Result<Option<Session>, HubError> {
        Self::check_id(&incoming)?;
        let stored = self.store.get_session(&incoming.id).await?;
        if let Some(stored) = &stored {
            if Self::drop_if_stale(&incoming, stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.propagate_to_children();
        incoming.validate()?;

        let mut tx = self.store.begin().await?;
        let write = async {
            tx.upsert_session(&incoming).await?;
            tx.replace_charging_periods(&incoming.id, &incoming.charging_periods)
                .await
        }
        .await;
        Self::commit_or_rollback(tx, Session::ENTITY, write).await?;
        Ok(Some(incoming))
    }

    /// A non-empty incoming period set replaces the stored set; the parent
    /// row and the replacement commit in the same transaction.
    pub async fn merge_session(&self, patch: Session) -> Result<Option<Session>, HubError> {
        Self::check_patch_header(&patch)?;
        let mut stored = self
            .store
            .get_session(&patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Session::ENTITY, &patch.id))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        let replaces_periods = !patch.charging_periods.is_empty();
        stored.merge_from(&patch);
        stored.validate()?;

        let mut tx = self.store.begin().await?;
        let write = async {
            tx.upsert_session(&stored).await?;
            if replaces_periods {
                tx.replace_charging_periods(&stored.id, &stored.charging_periods)
                    .await?;
            }
            Ok(())
        }
        .await;
        Self::commit_or_rollback(tx, Session::ENTITY, write).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // Tariffs
    // ------------------------------------------------------------------

    pub async fn put_tariff(&self, mut incoming: Tariff) -> Result<Option<Tariff>, HubError> {
        Self::check_id(&incoming)?;
        if let Some(stored) = self.store.get_tariff(&incoming.id).await? {
            if Self::drop_if_stale(&incoming, &stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.validate()?;
        self.store.upsert_tariff(&incoming).await?;
        Ok(Some(incoming))
    }

    pub async fn merge_tariff(&self, patch: Tariff) -> Result<Option<Tariff>, HubError> {
        Self::check_patch_header(&patch)?;
        let mut stored = self
            .store
            .get_tariff(&patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Tariff::ENTITY, &patch.id))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;
        self.store.upsert_tariff(&stored).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    pub async fn put_token(&self, mut incoming: Token) -> Result<Option<Token>, HubError> {
        Self::check_id(&incoming)?;
        if let Some(stored) = self.store.get_token(&incoming.uid).await? {
            if Self::drop_if_stale(&incoming, &stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.validate()?;
        self.store.upsert_token(&incoming).await?;
        Ok(Some(incoming))
    }

    pub async fn merge_token(&self, patch: Token) -> Result<Option<Token>, HubError> {
        Self::check_patch_header(&patch)?;
        let mut stored = self
            .store
            .get_token(&patch.uid)
            .await?
            .ok_or_else(|| HubError::not_found(Token::ENTITY, &patch.uid))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;
        self.store.upsert_token(&stored).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // CDRs
    // ------------------------------------------------------------------

    pub async fn put_cdr(&self, mut incoming: Cdr) -> Result<Option<Cdr>, HubError> {
        Self::check_id(&incoming)?;
        if let Some(stored) = self.store.get_cdr(&incoming.id).await? {
            if Self::drop_if_stale(&incoming, &stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.validate()?;
        self.store.upsert_cdr(&incoming).await?;
        Ok(Some(incoming))
    }

    pub async fn merge_cdr(&self, patch: Cdr) -> Result<Option<Cdr>, HubError> {
        Self::check_patch_header(&patch)?;
        let mut stored = self
            .store
            .get_cdr(&patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Cdr::ENTITY, &patch.id))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;
        self.store.upsert_cdr(&stored).await?;
        Ok(Some(stored))
    }

    // ------------------------------------------------------------------
    // Parties
    // ------------------------------------------------------------------

    pub async fn put_party(&self, mut incoming: Party) -> Result<Option<Party>, HubError> {
        Self::check_id(&incoming)?;
        if let Some(stored) = self.store.get_party(&incoming.id).await? {
            if Self::drop_if_stale(&incoming, &stored) {
                return Ok(None);
            }
            incoming.sync.backfill_from(&stored.sync);
        }
        incoming.validate()?;
        self.store.upsert_party(&incoming).await?;
        Ok(Some(incoming))
    }

    pub async fn merge_party(&self, patch: Party) -> Result<Option<Party>, HubError> {
        Self::check_patch_header(&patch)?;
        let mut stored = self
            .store
            .get_party(&patch.id)
            .await?
            .ok_or_else(|| HubError::not_found(Party::ENTITY, &patch.id))?;
        if Self::drop_if_stale(&patch, &stored) {
            return Ok(None);
        }
        stored.merge_from(&patch);
        stored.validate()?;
        self.store.upsert_party(&stored).await?;
        Ok(Some(stored))
    }
}
