//! Shared entity plumbing.
//!
//! Projects and tasks are both served by the same generic store; the
//! [`Entity`] trait is the seam that tells the store how to validate,
//! reconcile, authorize and broadcast one entity type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{BusEvent, ChangeNotice, Topic};
use crate::permissions::{Operation, Permission};
use crate::reconcile::ProgressStatus;
use crate::session::SessionContext;

/// Entity families the core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Task,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Task => "task",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    #[serde(alias = "low")]
    Low,
    #[default]
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

impl Priority {
    pub const ALL: &'static [Priority] = &[Priority::Low, Priority::Medium, Priority::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Priority::ALL
            .iter()
            .copied()
            .find(|priority| normalize_label(priority.as_str()) == normalize_label(s))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "invalid priority '{}': must be Low, Medium, or High",
                    s.trim()
                ))
            })
    }
}

/// Lowercases and collapses `_`/`-`/spaces so `in_progress`, `In Progress`
/// and `in-progress` compare equal.
pub(crate) fn normalize_label(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Denormalized task counters cached on a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
}

/// A team member reference; the gateway sends either a bare user id or an
/// embedded member object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberRef {
    Id(i64),
    Member {
        id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
}

impl MemberRef {
    pub fn id(&self) -> i64 {
        match self {
            MemberRef::Id(id) => *id,
            MemberRef::Member { id, .. } => *id,
        }
    }
}

/// Clamp a raw progress value into `0..=100`.
pub fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// Serde adapter for progress fields: accepts any JSON number (or null) and
/// clamps it, always writes a plain integer.
pub mod progress_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u8, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<f64>::deserialize(deserializer)?;
        Ok(super::clamp_progress(raw.unwrap_or(0.0)))
    }
}

/// Parse a due date sent either as `YYYY-MM-DD` or as an RFC 3339 timestamp.
/// Date-only values are taken as midnight UTC.
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// Trim an optional text field, dropping it when blank.
pub(crate) fn normalize_text(value: Option<String>) -> Option<String> {
    let value = value?;
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// An entity type served by [`crate::store::EntityStore`].
pub trait Entity:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Status: ProgressStatus;
    /// Create input.
    type Draft: Clone + fmt::Debug + Serialize + Send + Sync + 'static;
    /// Partial update; absent fields are omitted from the request body.
    type Patch: Clone + fmt::Debug + Default + Serialize + Send + Sync + 'static;

    const KIND: EntityKind;
    /// Collection path under the gateway base URL.
    const PATH: &'static str;
    /// Whether derived stats count overdue entities.
    const TRACKS_OVERDUE: bool;
    /// Permission guarding create, update and delete.
    const MANAGE_PERMISSION: Permission;

    fn id(&self) -> i64;
    fn label(&self) -> &str;
    fn status(&self) -> Self::Status;
    fn priority(&self) -> Priority;
    fn progress(&self) -> u8;
    fn due_date(&self) -> Option<&str>;
    fn set_status_progress(&mut self, status: Self::Status, progress: u8);

    /// Project an activity entry about this entity belongs to.
    fn activity_project(&self) -> Option<String> {
        None
    }

    fn validate_draft(draft: &Self::Draft) -> Result<()>;
    fn validate_patch(patch: &Self::Patch) -> Result<()>;

    /// Build a local entity from a draft (offline fallback only).
    fn from_draft(id: i64, draft: &Self::Draft) -> Self;

    fn patch_status_progress(
        patch: &mut Self::Patch,
    ) -> (&mut Option<Self::Status>, &mut Option<u8>);

    /// Short human description of what a patch touches, for activity details.
    fn describe_patch(patch: &Self::Patch) -> Option<String>;

    fn wrap_notice(notice: ChangeNotice<Self>) -> BusEvent;
    fn notice(event: &BusEvent) -> Option<&ChangeNotice<Self>>;

    /// Topic on which this entity's change notices travel.
    fn change_topic() -> Topic;

    /// Events that make a mounted store of this type re-fetch.
    fn needs_refetch(event: &BusEvent) -> bool;

    /// Topics a mounted store of this type listens on.
    fn watched_topics() -> Vec<Topic> {
        vec![Self::change_topic(), Topic::refresh_for(Self::KIND)]
    }

    /// Authorize a mutation for the session. `current` is the store's copy
    /// of the entity when one is loaded.
    fn authorize(session: &SessionContext, op: Operation, current: Option<&Self>) -> Result<()> {
        let _ = (op, current);
        session.require(Self::MANAGE_PERMISSION)
    }
}
