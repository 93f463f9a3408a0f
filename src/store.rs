//! Entity stores.
//!
//! An [`EntityStore`] owns one in-memory collection of a single entity type,
//! fetched from the gateway, and exposes create/update/delete with remote
//! persistence followed by local mutation. Every entity that enters the
//! collection is reconciled first, and stats are recomputed after every
//! change.
//!
//! Stores do not share memory. Several instances of the same type may be
//! alive at once; they converge through the [`EventBus`] once mounted.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::{ActivityAction, ActivityLogEntry, ActivityLogger};
use crate::config::{Config, SyncConfig};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::events::{BusEvent, Change, ChangeNotice, Delivery, EventBus, StoreId};
use crate::gateway::{Gateway, ListFilters};
use crate::permissions::Operation;
use crate::project::Project;
use crate::reconcile::{reconcile, sync_patch, ProgressStatus, ReconcileMode};
use crate::session::SessionContext;
use crate::stats::{compute_stats, DerivedStats};

pub type ProjectStore = EntityStore<Project>;

/// How many recent event ids a store remembers for duplicate detection.
const SEEN_EVENTS_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub reconcile_mode: ReconcileMode,
    pub offline_fallback: bool,
}

impl From<&SyncConfig> for StoreOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            reconcile_mode: config.reconcile_mode,
            offline_fallback: config.offline_fallback,
        }
    }
}

/// Collaborators injected into every store.
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub gateway: Gateway,
    pub bus: EventBus,
    pub activity: ActivityLogger,
    pub session: Arc<SessionContext>,
    pub options: StoreOptions,
}

impl StoreContext {
    pub fn new(gateway: Gateway, bus: EventBus, session: SessionContext) -> Self {
        Self {
            activity: ActivityLogger::new(gateway.clone()),
            gateway,
            bus,
            session: Arc::new(session),
            options: StoreOptions::default(),
        }
    }

    /// Wire a context from configuration. The session token, when present,
    /// authenticates every gateway call.
    pub fn from_config(config: &Config, session: SessionContext) -> Result<Self> {
        let gateway = Gateway::new(&config.gateway)?.with_token(session.token.clone());
        let activity = if config.sync.activity_log {
            ActivityLogger::new(gateway.clone())
        } else {
            ActivityLogger::disabled()
        };
        Ok(Self {
            gateway,
            bus: EventBus::with_capacity(config.events.capacity),
            activity,
            session: Arc::new(session),
            options: StoreOptions::from(&config.sync),
        })
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_activity(mut self, activity: ActivityLogger) -> Self {
        self.activity = activity;
        self
    }
}

/// Consumer-facing view of a store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot<E: Entity> {
    pub collection: Vec<E>,
    pub loading: bool,
    pub error: Option<String>,
    pub stats: Option<DerivedStats<E::Status>>,
}

/// A provisional id promoted to a server id by [`EntityStore::flush_provisional`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub provisional_id: i64,
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub flushed: Vec<Promotion>,
    pub remaining: Vec<i64>,
}

#[derive(Debug, Clone)]
struct Provisional<E: Entity> {
    id: i64,
    draft: E::Draft,
}

struct StoreState<E: Entity> {
    collection: Vec<E>,
    loading: bool,
    error: Option<String>,
    stats: Option<DerivedStats<E::Status>>,
    last_filters: ListFilters,
    provisional: Vec<Provisional<E>>,
    seen_events: VecDeque<String>,
}

impl<E: Entity> StoreState<E> {
    fn new() -> Self {
        Self {
            collection: Vec::new(),
            loading: false,
            error: None,
            stats: None,
            last_filters: ListFilters::default(),
            provisional: Vec::new(),
            seen_events: VecDeque::new(),
        }
    }

    fn recompute_stats(&mut self) {
        self.stats = Some(compute_stats(&self.collection, Utc::now()));
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.collection.iter().position(|entity| entity.id() == id)
    }

    fn is_provisional(&self, id: i64) -> bool {
        self.provisional.iter().any(|item| item.id == id)
    }

    fn provisional_entities(&self) -> Vec<E> {
        self.collection
            .iter()
            .filter(|entity| self.is_provisional(entity.id()))
            .cloned()
            .collect()
    }

    /// Negative, timestamp-derived, unique within the collection.
    fn next_provisional_id(&self) -> i64 {
        let mut candidate = -Utc::now().timestamp_millis().max(1);
        while self.position(candidate).is_some() {
            candidate -= 1;
        }
        candidate
    }

    fn drop_provisional(&mut self, id: i64) -> Option<E> {
        self.provisional.retain(|item| item.id != id);
        let index = self.position(id)?;
        Some(self.collection.remove(index))
    }

    /// Returns false when the event id was already seen.
    fn remember(&mut self, event_id: &str) -> bool {
        if self.seen_events.iter().any(|seen| seen == event_id) {
            return false;
        }
        self.seen_events.push_back(event_id.to_string());
        if self.seen_events.len() > SEEN_EVENTS_CAPACITY {
            self.seen_events.pop_front();
        }
        true
    }
}

pub struct EntityStore<E: Entity> {
    id: StoreId,
    ctx: StoreContext,
    lifecycle: CancellationToken,
    state: RwLock<StoreState<E>>,
}

impl<E: Entity> EntityStore<E> {
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            id: StoreId::next(),
            ctx,
            lifecycle: CancellationToken::new(),
            state: RwLock::new(StoreState::new()),
        }
    }

    pub fn shared(ctx: StoreContext) -> Arc<Self> {
        Arc::new(Self::new(ctx))
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    /// Token cancelled when the store is unmounted.
    pub fn lifecycle(&self) -> &CancellationToken {
        &self.lifecycle
    }

    pub fn snapshot(&self) -> StoreSnapshot<E> {
        let state = self.state.read();
        StoreSnapshot {
            collection: state.collection.clone(),
            loading: state.loading,
            error: state.error.clone(),
            stats: state.stats.clone(),
        }
    }

    pub fn collection(&self) -> Vec<E> {
        self.state.read().collection.clone()
    }

    pub fn stats(&self) -> Option<DerivedStats<E::Status>> {
        self.state.read().stats.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Local lookup; never touches the network.
    pub fn get_by_id(&self, id: i64) -> Option<E> {
        let state = self.state.read();
        state
            .position(id)
            .map(|index| state.collection[index].clone())
    }

    pub fn provisional_ids(&self) -> Vec<i64> {
        self.state
            .read()
            .provisional
            .iter()
            .map(|item| item.id)
            .collect()
    }

    pub fn is_provisional(&self, id: i64) -> bool {
        self.state.read().is_provisional(id)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.lifecycle.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Replace the collection with the gateway's.
    ///
    /// Failures are captured into the store's error state and the
    /// collection is cleared (provisional entities excepted) rather than
    /// left stale. A response that arrives after the store was unmounted is
    /// dropped.
    pub async fn fetch(&self, filters: ListFilters) {
        if self.lifecycle.is_cancelled() {
            debug!(store = %self.id, kind = %E::KIND, "skipping fetch on unmounted store");
            return;
        }
        {
            let mut state = self.state.write();
            state.loading = true;
            state.last_filters = filters.clone();
        }

        let result = self.ctx.gateway.list::<E>(&filters, &self.lifecycle).await;
        if self.lifecycle.is_cancelled() {
            debug!(store = %self.id, kind = %E::KIND, "dropping late fetch response");
            return;
        }

        let mode = self.ctx.options.reconcile_mode;
        let mut state = self.state.write();
        state.loading = false;
        let mut collection = state.provisional_entities();
        match result {
            Ok(entities) => {
                debug!(store = %self.id, kind = %E::KIND, count = entities.len(), "fetched collection");
                collection.extend(entities.into_iter().map(|entity| reconcile(entity, mode)));
                state.error = None;
            }
            Err(err) => {
                warn!(store = %self.id, kind = %E::KIND, error = %err, "fetch failed; clearing collection");
                state.error = Some(err.to_string());
            }
        }
        state.collection = collection;
        state.recompute_stats();
    }

    /// Fetch again with the filters of the last fetch.
    pub async fn refetch(&self) {
        let filters = self.state.read().last_filters.clone();
        self.fetch(filters).await;
    }

    /// Validate, authorize, then `POST`. The new entity is prepended.
    pub async fn create(&self, draft: E::Draft) -> Result<E> {
        E::validate_draft(&draft)?;
        E::authorize(&self.ctx.session, Operation::Create, None)?;
        self.ensure_live()?;

        match self.ctx.gateway.create::<E>(&draft, &self.lifecycle).await {
            Ok(created) => Ok(self.commit_created(created, None).await),
            Err(err) if self.ctx.options.offline_fallback && err.is_offline() => {
                Ok(self.create_provisional(draft, &err))
            }
            Err(err) => Err(err),
        }
    }

    async fn commit_created(&self, created: E, replacing: Option<i64>) -> E {
        let entity = reconcile(created, self.ctx.options.reconcile_mode);
        {
            let mut state = self.state.write();
            if let Some(provisional_id) = replacing {
                state.drop_provisional(provisional_id);
            }
            if let Some(index) = state.position(entity.id()) {
                state.collection.remove(index);
            }
            state.collection.insert(0, entity.clone());
            state.recompute_stats();
        }
        info!(store = %self.id, kind = %E::KIND, id = entity.id(), "created");

        let entry = ActivityLogEntry::for_change(ActivityAction::Created, E::KIND, entity.label())
            .with_project(entity.activity_project())
            .with_metadata(serde_json::json!({ "id": entity.id() }));
        self.ctx.activity.log(entry, &self.lifecycle);
        self.broadcast(Change::Created(entity.clone()));
        entity
    }

    fn create_provisional(&self, draft: E::Draft, cause: &Error) -> E {
        let mut state = self.state.write();
        let id = state.next_provisional_id();
        let entity = reconcile(E::from_draft(id, &draft), self.ctx.options.reconcile_mode);
        state.collection.insert(0, entity.clone());
        state.provisional.push(Provisional { id, draft });
        state.recompute_stats();
        warn!(
            store = %self.id,
            kind = %E::KIND,
            id,
            error = %cause,
            "gateway unreachable; keeping provisional entity"
        );
        entity
    }

    /// Validate, authorize, then `PUT` the patch with its status/progress
    /// pair synchronized.
    pub async fn update(&self, id: i64, patch: E::Patch) -> Result<E> {
        E::validate_patch(&patch)?;
        if self.is_provisional(id) {
            return Err(Error::Provisional {
                kind: E::KIND.as_str(),
                id,
            });
        }
        let current = self.get_by_id(id);
        E::authorize(&self.ctx.session, Operation::Update, current.as_ref())?;
        self.apply_update(id, patch).await
    }

    /// Update without a permission check. Used by task-driven aggregation,
    /// which is authorized by the task mutation that triggered it.
    pub(crate) async fn apply_update(&self, id: i64, mut patch: E::Patch) -> Result<E> {
        self.ensure_live()?;
        let mode = self.ctx.options.reconcile_mode;
        let caller_set_status = E::patch_status_progress(&mut patch).0.is_some();
        sync_patch::<E>(&mut patch);
        // The derived status may only replace a status known to follow
        // progress. An entity that is not loaded could hold an override.
        if mode == ReconcileMode::RespectOverrides && !caller_set_status {
            let progress_driven = self
                .get_by_id(id)
                .is_some_and(|current| current.status().is_progress_driven());
            if !progress_driven {
                *E::patch_status_progress(&mut patch).0 = None;
            }
        }
        let details = E::describe_patch(&patch);

        let updated = self
            .ctx
            .gateway
            .update::<E>(id, &patch, &self.lifecycle)
            .await?;
        let entity = reconcile(updated, mode);
        {
            let mut state = self.state.write();
            if let Some(index) = state.position(id) {
                state.collection[index] = entity.clone();
            }
            state.recompute_stats();
        }
        info!(store = %self.id, kind = %E::KIND, id, "updated");

        let entry = ActivityLogEntry::for_change(ActivityAction::Updated, E::KIND, entity.label())
            .with_project(entity.activity_project())
            .with_details(details)
            .with_metadata(serde_json::json!({ "id": id }));
        self.ctx.activity.log(entry, &self.lifecycle);
        self.broadcast(Change::Updated(entity.clone()));
        Ok(entity)
    }

    /// Authorize, then `DELETE`. Deleting an id the store does not hold
    /// still reaches the gateway and leaves the collection untouched.
    /// Provisional entities are dropped locally.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let current = self.get_by_id(id);
        E::authorize(&self.ctx.session, Operation::Delete, current.as_ref())?;

        if self.is_provisional(id) {
            let mut state = self.state.write();
            state.drop_provisional(id);
            state.recompute_stats();
            debug!(store = %self.id, kind = %E::KIND, id, "dropped provisional entity");
            return Ok(());
        }

        self.ensure_live()?;
        self.ctx.gateway.delete::<E>(id, &self.lifecycle).await?;
        let removed = {
            let mut state = self.state.write();
            let removed = state.position(id).map(|index| state.collection.remove(index));
            state.recompute_stats();
            removed
        };
        info!(store = %self.id, kind = %E::KIND, id, "deleted");

        // Audit message uses the pre-deletion snapshot when there is one.
        let target = match removed.as_ref() {
            Some(entity) => entity.label().to_string(),
            None => format!("{} #{id}", E::KIND),
        };
        let entry = ActivityLogEntry::for_change(ActivityAction::Deleted, E::KIND, &target)
            .with_project(removed.as_ref().and_then(E::activity_project))
            .with_metadata(serde_json::json!({ "id": id }));
        self.ctx.activity.log(entry, &self.lifecycle);
        self.broadcast(Change::Deleted { id });
        Ok(())
    }

    /// Replay every provisional create against the gateway.
    pub async fn flush_provisional(&self) -> Result<FlushReport> {
        let pending: Vec<Provisional<E>> = self.state.read().provisional.clone();
        let mut report = FlushReport::default();
        for item in pending {
            self.ensure_live()?;
            match self.ctx.gateway.create::<E>(&item.draft, &self.lifecycle).await {
                Ok(created) => {
                    let entity = self.commit_created(created, Some(item.id)).await;
                    report.flushed.push(Promotion {
                        provisional_id: item.id,
                        id: entity.id(),
                    });
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(store = %self.id, kind = %E::KIND, id = item.id, error = %err, "provisional entity still unsynced");
                    report.remaining.push(item.id);
                }
            }
        }
        Ok(report)
    }

    fn broadcast(&self, change: Change<E>) {
        let notice = ChangeNotice::new(self.id, change);
        let delivered = self.ctx.bus.publish(E::wrap_notice(notice));
        debug!(store = %self.id, topic = %E::change_topic(), delivered, "broadcast change");
    }

    /// Subscribe to the bus and listen until the returned handle is dropped.
    ///
    /// Unmounting cancels the store's lifecycle token: in-flight calls
    /// return [`Error::Cancelled`] and late fetch responses are dropped. A
    /// store is mounted at most once.
    pub fn mount(self: &Arc<Self>) -> StoreMount {
        let mut subscription = self.ctx.bus.subscribe(&E::watched_topics());
        let token = self.lifecycle.clone();
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    delivery = subscription.recv() => delivery,
                };
                match delivery {
                    Some(delivery) => store.handle_delivery(delivery).await,
                    None => break,
                }
            }
            debug!(store = %store.id, kind = %E::KIND, "store listener stopped");
        });
        StoreMount {
            token: self.lifecycle.clone(),
            handle: Some(handle),
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        match delivery {
            Delivery::Event(event) => self.handle_event(&event).await,
            Delivery::Lagged(missed) => {
                warn!(store = %self.id, kind = %E::KIND, missed, "missed bus notices; refetching");
                self.refetch().await;
            }
        }
    }

    /// React to one bus event. Idempotent: a repeated event id is ignored,
    /// as are the store's own notices.
    pub async fn handle_event(&self, event: &BusEvent) {
        if let Some(event_id) = event.event_id() {
            let fresh = self.state.write().remember(event_id);
            if !fresh {
                debug!(store = %self.id, event_id, "skipping duplicate notice");
                return;
            }
        }
        if event.origin() == Some(self.id) {
            return;
        }
        if E::needs_refetch(event) {
            self.refetch().await;
            return;
        }
        let Some(notice) = E::notice(event) else {
            return;
        };

        // The server applies filters; a filtered store cannot tell whether
        // the changed entity belongs in it.
        let filtered = !self.state.read().last_filters.is_empty();
        if filtered {
            self.refetch().await;
            return;
        }

        let mode = self.ctx.options.reconcile_mode;
        let mut state = self.state.write();
        match &notice.change {
            Change::Created(entity) => {
                if state.position(entity.id()).is_none() {
                    state.collection.insert(0, reconcile(entity.clone(), mode));
                }
            }
            Change::Updated(entity) => {
                if let Some(index) = state.position(entity.id()) {
                    state.collection[index] = reconcile(entity.clone(), mode);
                }
            }
            Change::Deleted { id } => {
                if let Some(index) = state.position(*id) {
                    state.collection.remove(index);
                }
            }
        }
        state.recompute_stats();
        debug!(store = %self.id, kind = %E::KIND, id = notice.entity_id(), "applied notice from another store");
    }
}

/// Keeps a store subscribed to the bus. Dropping it unmounts the store.
#[derive(Debug)]
pub struct StoreMount {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl StoreMount {
    /// Unmount and wait for the listener to finish.
    pub async fn unmount(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StoreMount {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Priority;
    use crate::permissions::PermissionPolicy;
    use crate::project::{ProjectDraft, ProjectStatus};
    use crate::session::SessionUser;

    fn store() -> ProjectStore {
        let gateway = Gateway::with_client("http://127.0.0.1:9", reqwest::Client::new());
        let session = SessionContext::new(
            SessionUser {
                id: 1,
                name: "Admin".to_string(),
                role: "admin".to_string(),
            },
            PermissionPolicy::fallback(),
        );
        EntityStore::new(
            StoreContext::new(gateway, EventBus::new(), session)
                .with_activity(ActivityLogger::disabled()),
        )
    }

    fn project(id: i64, name: &str) -> Project {
        Project::from_draft(id, &ProjectDraft::new(name))
    }

    fn notice(change: Change<Project>) -> BusEvent {
        BusEvent::ProjectUpdated(ChangeNotice::new(StoreId::next(), change))
    }

    #[test]
    fn fresh_store_is_empty() {
        let store = store();
        let snapshot = store.snapshot();
        assert!(snapshot.collection.is_empty());
        assert!(!snapshot.loading);
        assert!(snapshot.error.is_none());
        assert!(snapshot.stats.is_none());
        assert!(store.get_by_id(1).is_none());
    }

    #[tokio::test]
    async fn foreign_notices_are_patched_in_place() {
        let store = store();
        let mut created = project(5, "Apollo");
        created.progress = 40;
        store.handle_event(&notice(Change::Created(created))).await;
        let loaded = store.get_by_id(5).expect("created");
        assert_eq!(loaded.status, ProjectStatus::InProgress);

        let mut renamed = project(5, "Apollo II");
        renamed.priority = Priority::High;
        store.handle_event(&notice(Change::Updated(renamed))).await;
        assert_eq!(store.get_by_id(5).expect("updated").name, "Apollo II");
        assert_eq!(
            store.stats().expect("stats").priority_count(Priority::High),
            1
        );

        store.handle_event(&notice(Change::Deleted { id: 5 })).await;
        assert!(store.collection().is_empty());
        assert_eq!(store.stats().expect("stats").total, 0);
    }

    #[tokio::test]
    async fn duplicate_and_own_notices_are_ignored() {
        let store = store();
        let event = notice(Change::Created(project(1, "A")));
        store.handle_event(&event).await;
        store.handle_event(&notice(Change::Deleted { id: 1 })).await;
        store.handle_event(&event).await;
        assert!(store.collection().is_empty());

        let own = BusEvent::ProjectUpdated(ChangeNotice::new(
            store.id(),
            Change::Created(project(2, "B")),
        ));
        store.handle_event(&own).await;
        assert!(store.get_by_id(2).is_none());
    }

    #[tokio::test]
    async fn unmounted_store_rejects_mutations() {
        let store = Arc::new(store());
        let mount = store.mount();
        mount.unmount().await;
        assert!(store.lifecycle().is_cancelled());
        let err = store
            .create(ProjectDraft::new("Late"))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));

        store.fetch(ListFilters::default()).await;
        assert!(store.snapshot().stats.is_none());
    }

    #[test]
    fn provisional_ids_are_negative_and_unique() {
        let mut state = StoreState::<Project>::new();
        let first = state.next_provisional_id();
        assert!(first < 0);
        state.collection.push(project(first, "A"));
        let second = state.next_provisional_id();
        assert_ne!(first, second);
        assert!(second < 0);
    }
}
