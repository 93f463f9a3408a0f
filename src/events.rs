//! Cross-view event bus and JSONL event output.
//!
//! The bus is an explicit, cloneable handle over a tokio broadcast channel.
//! Publishing never awaits; slow subscribers lag instead of blocking the
//! publisher and are told how many notices they missed.
//!
//! Bus notices can also be mirrored as JSON lines to stdout or a file for
//! external integrations (`--events`).

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::project::Project;
use crate::task::Task;

pub const EVENT_SCHEMA_VERSION: &str = "nexapro.event.v1";

/// Default broadcast channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Topic {
    ProjectUpdated,
    TaskUpdated,
    ProjectsNeedRefresh,
    TasksNeedRefresh,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ProjectUpdated => "projectUpdated",
            Topic::TaskUpdated => "taskUpdated",
            Topic::ProjectsNeedRefresh => "projectsNeedRefresh",
            Topic::TasksNeedRefresh => "tasksNeedRefresh",
        }
    }

    /// The refresh topic for an entity kind.
    pub fn refresh_for(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Project => Topic::ProjectsNeedRefresh,
            EntityKind::Task => Topic::TasksNeedRefresh,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one store instance, used to skip a store's own notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StoreId(u64);

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

impl StoreId {
    pub fn next() -> Self {
        StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", content = "entity", rename_all = "snake_case")]
pub enum Change<E> {
    Created(E),
    Updated(E),
    Deleted { id: i64 },
}

/// A change to one entity, as broadcast by the store that made it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotice<E> {
    /// Unique per notice; subscribers use it to drop duplicates.
    pub event_id: String,
    pub origin: StoreId,
    #[serde(flatten)]
    pub change: Change<E>,
    pub timestamp: DateTime<Utc>,
}

impl<E: Entity> ChangeNotice<E> {
    pub fn new(origin: StoreId, change: Change<E>) -> Self {
        Self {
            event_id: ulid::Ulid::new().to_string(),
            origin,
            change,
            timestamp: Utc::now(),
        }
    }

    pub fn entity_id(&self) -> i64 {
        match &self.change {
            Change::Created(entity) | Change::Updated(entity) => entity.id(),
            Change::Deleted { id } => *id,
        }
    }

    pub fn entity(&self) -> Option<&E> {
        match &self.change {
            Change::Created(entity) | Change::Updated(entity) => Some(entity),
            Change::Deleted { .. } => None,
        }
    }
}

/// Everything that travels over the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "notice", rename_all = "camelCase")]
pub enum BusEvent {
    ProjectUpdated(ChangeNotice<Project>),
    TaskUpdated(ChangeNotice<Task>),
    ProjectsNeedRefresh,
    TasksNeedRefresh,
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::ProjectUpdated(_) => Topic::ProjectUpdated,
            BusEvent::TaskUpdated(_) => Topic::TaskUpdated,
            BusEvent::ProjectsNeedRefresh => Topic::ProjectsNeedRefresh,
            BusEvent::TasksNeedRefresh => Topic::TasksNeedRefresh,
        }
    }

    /// Event id of a change notice; refresh requests carry none.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            BusEvent::ProjectUpdated(notice) => Some(&notice.event_id),
            BusEvent::TaskUpdated(notice) => Some(&notice.event_id),
            BusEvent::ProjectsNeedRefresh | BusEvent::TasksNeedRefresh => None,
        }
    }

    pub fn origin(&self) -> Option<StoreId> {
        match self {
            BusEvent::ProjectUpdated(notice) => Some(notice.origin),
            BusEvent::TaskUpdated(notice) => Some(notice.origin),
            BusEvent::ProjectsNeedRefresh | BusEvent::TasksNeedRefresh => None,
        }
    }

    pub fn refresh(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Project => BusEvent::ProjectsNeedRefresh,
            EntityKind::Task => BusEvent::TasksNeedRefresh,
        }
    }
}

/// Process-wide publish/subscribe handle. Clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<BusEvent>>,
    publish_count: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            publish_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish to every current subscriber. Non-blocking.
    ///
    /// Returns the number of subscriptions the event was delivered to, 0
    /// when nobody is listening.
    pub fn publish(&self, event: BusEvent) -> usize {
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Ask every mounted store of `kind` to re-fetch.
    pub fn request_refresh(&self, kind: EntityKind) -> usize {
        self.publish(BusEvent::refresh(kind))
    }

    /// Subscribe to the given topics; an empty list means every topic.
    /// Only events published after this call are delivered. Dropping the
    /// subscription unsubscribes.
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            topics: topics.to_vec(),
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&[])
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Arc<BusEvent>),
    /// The subscription fell behind and this many notices were dropped.
    Lagged(u64),
}

#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Arc<BusEvent>>,
    topics: Vec<Topic>,
}

impl Subscription {
    fn accepts(&self, event: &BusEvent) -> bool {
        self.topics.is_empty() || self.topics.contains(&event.topic())
    }

    /// Wait for the next matching delivery. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => return Some(Delivery::Lagged(missed)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching delivery that is already queued, if any.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(missed)) => return Some(Delivery::Lagged(missed)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// One JSONL record mirroring a bus notice.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub event: Topic,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event: Topic) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// Attach a serializable payload to the event.
    pub fn with_data<T: Serialize>(mut self, data: T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn from_bus(event: &BusEvent) -> Result<Self> {
        let record = Self::new(event.topic());
        match event {
            BusEvent::ProjectUpdated(notice) => {
                let mut record = record.with_data(notice)?;
                record.timestamp = notice.timestamp;
                Ok(record)
            }
            BusEvent::TaskUpdated(notice) => {
                let mut record = record.with_data(notice)?;
                record.timestamp = notice.timestamp;
                Ok(record)
            }
            BusEvent::ProjectsNeedRefresh | BusEvent::TasksNeedRefresh => Ok(record),
        }
    }
}

/// Event sink that writes JSONL output to a destination.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    /// Emit events to stdout.
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Emit events to a file, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    /// Write a single event as JSONL.
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }

    /// Write every delivery already queued on the subscription.
    pub fn drain(&mut self, subscription: &mut Subscription) -> Result<usize> {
        let mut written = 0;
        while let Some(delivery) = subscription.try_recv() {
            if let Delivery::Event(event) = delivery {
                self.emit(&Event::from_bus(&event)?)?;
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectDraft;
    use crate::task::TaskDraft;

    fn task_notice(id: i64) -> BusEvent {
        let task = Task::from_draft(id, &TaskDraft::new("Write docs", 1));
        BusEvent::TaskUpdated(ChangeNotice::new(StoreId::next(), Change::Updated(task)))
    }

    #[test]
    fn publish_with_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(BusEvent::TasksNeedRefresh), 0);
        assert_eq!(bus.publish_count(), 1);
    }

    #[tokio::test]
    async fn subscription_filters_by_topic() {
        let bus = EventBus::new();
        let mut tasks = bus.subscribe(&[Topic::TaskUpdated]);
        let mut everything = bus.subscribe_all();

        assert_eq!(bus.publish(BusEvent::ProjectsNeedRefresh), 2);
        assert_eq!(bus.publish(task_notice(4)), 2);

        match tasks.recv().await {
            Some(Delivery::Event(event)) => assert_eq!(event.topic(), Topic::TaskUpdated),
            other => panic!("unexpected delivery: {other:?}"),
        }
        assert!(tasks.try_recv().is_none());

        match everything.recv().await {
            Some(Delivery::Event(event)) => assert_eq!(event.topic(), Topic::ProjectsNeedRefresh),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscription_reports_lag() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe_all();
        for _ in 0..3 {
            let _ = bus.request_refresh(EntityKind::Task);
        }
        assert_eq!(sub.recv().await, Some(Delivery::Lagged(1)));
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let bus = EventBus::new();
        let first = bus.subscribe_all();
        let second = bus.clone().subscribe(&[Topic::ProjectUpdated]);
        assert_eq!(bus.subscriber_count(), 2);
        drop(first);
        assert_eq!(bus.subscriber_count(), 1);
        drop(second);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn notices_have_unique_ids() {
        let a = task_notice(1);
        let b = task_notice(1);
        assert_ne!(a.event_id(), b.event_id());
        assert_ne!(StoreId::next(), StoreId::next());
    }

    #[test]
    fn bus_event_serializes_with_topic_tag() {
        let project = Project::from_draft(9, &ProjectDraft::new("Apollo"));
        let notice = ChangeNotice::new(StoreId::next(), Change::Created(project));
        let value = serde_json::to_value(BusEvent::ProjectUpdated(notice)).expect("json");
        assert_eq!(value["topic"], "projectUpdated");
        assert_eq!(value["notice"]["change"], "created");
        assert_eq!(value["notice"]["entity"]["name"], "Apollo");

        let value = serde_json::to_value(BusEvent::TasksNeedRefresh).expect("json");
        assert_eq!(value, serde_json::json!({"topic": "tasksNeedRefresh"}));
    }

    #[test]
    fn destination_parse() {
        assert!(matches!(
            EventDestination::parse(Some("-")),
            Some(EventDestination::Stdout)
        ));
        assert!(matches!(
            EventDestination::parse(Some(" events.jsonl ")),
            Some(EventDestination::File(_))
        ));
        assert!(EventDestination::parse(Some("  ")).is_none());
        assert!(EventDestination::parse(None).is_none());
    }

    #[test]
    fn sink_drains_queued_notices_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::new();
        let mut sub = bus.subscribe_all();
        let _ = bus.publish(task_notice(2));
        let _ = bus.request_refresh(EntityKind::Project);

        let mut sink = EventSink::file(&path).expect("sink");
        assert_eq!(sink.drain(&mut sub).expect("drain"), 2);

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["schema_version"], EVENT_SCHEMA_VERSION);
        assert_eq!(first["event"], "taskUpdated");
        assert_eq!(first["data"]["entity"]["id"], 2);
    }
}
