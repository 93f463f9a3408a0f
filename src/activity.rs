//! Activity logger.
//!
//! A best-effort audit side channel: every create, update and delete posts a
//! human-readable entry to the gateway. Posts run in the background and the
//! mutation that caused them never waits on them. Failures are logged at
//! `warn` and never reach the caller. No retry, no queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entity::EntityKind;
use crate::error::Error;
use crate::gateway::Gateway;

/// Upper bound on a single activity post.
pub const POST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Task,
    Project,
    Comment,
    File,
    Team,
    System,
}

impl From<EntityKind> for ActivityType {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Project => ActivityType::Project,
            EntityKind::Task => ActivityType::Task,
        }
    }
}

/// What happened to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Updated => "updated",
            ActivityAction::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /activity-logs`. Write-only; never read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub action: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ActivityLogEntry {
    pub fn new(action: impl Into<String>, target: impl Into<String>, kind: ActivityType) -> Self {
        Self {
            action: action.into(),
            target: target.into(),
            kind,
            project: None,
            details: None,
            metadata: None,
        }
    }

    /// Entry for a store mutation, e.g. `created` / `Apollo` / `project`.
    pub fn for_change(action: ActivityAction, kind: EntityKind, target: &str) -> Self {
        Self::new(action.as_str(), target, kind.into())
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ActivityLogger {
    gateway: Option<Gateway>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl ActivityLogger {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Some(gateway),
            pending: Arc::default(),
        }
    }

    /// A logger that drops every entry.
    pub fn disabled() -> Self {
        Self {
            gateway: None,
            pending: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    /// Post an entry in the background and return immediately. The post is
    /// abandoned when `cancel` fires or after [`POST_TIMEOUT`].
    pub fn log(&self, entry: ActivityLogEntry, cancel: &CancellationToken) {
        let Some(gateway) = self.gateway.clone() else {
            debug!(action = %entry.action, target = %entry.target, "activity log disabled");
            return;
        };
        let cancel = cancel.clone();
        let mut pending = self.pending.lock();
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            let post = gateway.post_activity(&entry, &cancel);
            match tokio::time::timeout(POST_TIMEOUT, post).await {
                Ok(Ok(())) => debug!(action = %entry.action, target = %entry.target, "recorded activity"),
                Ok(Err(Error::Cancelled)) => {
                    debug!(action = %entry.action, target = %entry.target, "activity post cancelled")
                }
                Ok(Err(err)) => warn!(
                    action = %entry.action,
                    target = %entry.target,
                    error = %err,
                    "failed to record activity"
                ),
                Err(_) => warn!(
                    action = %entry.action,
                    target = %entry.target,
                    timeout_secs = POST_TIMEOUT.as_secs(),
                    "activity post timed out"
                ),
            }
        });
    }

    /// Posts spawned and not yet collected by [`ActivityLogger::drain`].
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait for every background post spawned so far.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        while let Some(joined) = pending.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "activity post task failed");
            }
        }
    }

    /// [`ActivityLogger::drain`] with a deadline. False when it expired;
    /// posts still running then are aborted.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain()).await.is_ok()
    }
}
