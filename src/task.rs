//! Task entities.
//!
//! Only Todo / In Progress / Completed are driven by progress; Review,
//! On hold and Cancelled are user-chosen and survive reconciliation only
//! under [`crate::reconcile::ReconcileMode::RespectOverrides`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{
    normalize_label, normalize_text, progress_serde, Entity, EntityKind, Priority,
};
use crate::error::{Error, Result};
use crate::events::{BusEvent, ChangeNotice, Topic};
use crate::permissions::{Operation, Permission};
use crate::project::is_project_deletion;
use crate::reconcile::ProgressStatus;
use crate::session::SessionContext;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "todo", alias = "To Do", alias = "to_do")]
    Todo,
    #[serde(
        rename = "In Progress",
        alias = "in_progress",
        alias = "in-progress",
        alias = "in progress"
    )]
    InProgress,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "review")]
    Review,
    #[serde(
        rename = "On hold",
        alias = "On Hold",
        alias = "on_hold",
        alias = "on-hold",
        alias = "on hold"
    )]
    OnHold,
    #[serde(alias = "cancelled", alias = "Canceled", alias = "canceled")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "Todo",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Review => "Review",
            TaskStatus::OnHold => "On hold",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}

impl ProgressStatus for TaskStatus {
    const INITIAL: Self = TaskStatus::Todo;
    const IN_PROGRESS: Self = TaskStatus::InProgress;
    const COMPLETED: Self = TaskStatus::Completed;
    const ALL: &'static [Self] = &[
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Review,
        TaskStatus::OnHold,
        TaskStatus::Cancelled,
    ];
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = normalize_label(s);
        if needle == "canceled" {
            return Ok(TaskStatus::Cancelled);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|status| normalize_label(status.as_str()) == needle)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "invalid task status '{}': must be Todo, In Progress, Completed, Review, On hold, or Cancelled",
                    s.trim()
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub project_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, with = "progress_serde")]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Task {
    /// Counts toward a project's completed total.
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Completed || self.progress >= 100
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, project_id: i64) -> Self {
        Self {
            title: title.into(),
            project_id: Some(project_id),
            ..Self::default()
        }
    }
}

/// Body of `PUT /tasks/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

fn normalize_tags(tags: &BTreeSet<String>) -> BTreeSet<String> {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

impl Entity for Task {
    type Status = TaskStatus;
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    const KIND: EntityKind = EntityKind::Task;
    const PATH: &'static str = "tasks";
    const TRACKS_OVERDUE: bool = true;
    const MANAGE_PERMISSION: Permission = Permission::ManageTasks;

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn status(&self) -> TaskStatus {
        self.status
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn progress(&self) -> u8 {
        self.progress
    }

    fn due_date(&self) -> Option<&str> {
        self.due_date.as_deref()
    }

    fn set_status_progress(&mut self, status: TaskStatus, progress: u8) {
        self.status = status;
        self.progress = progress;
    }

    fn validate_draft(draft: &TaskDraft) -> Result<()> {
        if draft.title.trim().is_empty() {
            return Err(Error::Validation("task title cannot be empty".to_string()));
        }
        match draft.project_id {
            None => {
                return Err(Error::Validation(
                    "task must reference a project".to_string(),
                ))
            }
            Some(id) if id <= 0 => {
                return Err(Error::Validation(format!(
                    "task must reference a saved project (got id {id})"
                )))
            }
            Some(_) => {}
        }
        if draft.progress.is_some_and(|progress| progress > 100) {
            return Err(Error::Validation(
                "task progress must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_patch(patch: &TaskPatch) -> Result<()> {
        if patch.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
            return Err(Error::Validation("task title cannot be empty".to_string()));
        }
        if patch.project_id.is_some_and(|id| id <= 0) {
            return Err(Error::Validation(
                "task must reference a saved project".to_string(),
            ));
        }
        if patch.progress.is_some_and(|progress| progress > 100) {
            return Err(Error::Validation(
                "task progress must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }

    fn activity_project(&self) -> Option<String> {
        Some(format!("project #{}", self.project_id))
    }

    fn from_draft(id: i64, draft: &TaskDraft) -> Self {
        Task {
            id,
            title: draft.title.trim().to_string(),
            description: normalize_text(draft.description.clone()),
            project_id: draft.project_id.unwrap_or_default(),
            assignee_id: draft.assignee_id,
            status: draft.status.unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            progress: draft.progress.unwrap_or(0),
            due_date: normalize_text(draft.due_date.clone()),
            tags: normalize_tags(&draft.tags),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            updated_at: None,
        }
    }

    fn patch_status_progress(patch: &mut TaskPatch) -> (&mut Option<TaskStatus>, &mut Option<u8>) {
        (&mut patch.status, &mut patch.progress)
    }

    fn describe_patch(patch: &TaskPatch) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(title) = patch.title.as_ref() {
            parts.push(format!("title: {title}"));
        }
        if let Some(status) = patch.status {
            parts.push(format!("status: {status}"));
        }
        if let Some(progress) = patch.progress {
            parts.push(format!("progress: {progress}%"));
        }
        if let Some(priority) = patch.priority {
            parts.push(format!("priority: {priority}"));
        }
        if let Some(project_id) = patch.project_id {
            parts.push(format!("project: #{project_id}"));
        }
        if let Some(assignee_id) = patch.assignee_id {
            parts.push(format!("assignee: #{assignee_id}"));
        }
        if patch.due_date.is_some() {
            parts.push("due date".to_string());
        }
        if patch.tags.is_some() {
            parts.push("tags".to_string());
        }
        if patch.description.is_some() {
            parts.push("description".to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    fn wrap_notice(notice: ChangeNotice<Self>) -> BusEvent {
        BusEvent::TaskUpdated(notice)
    }

    fn notice(event: &BusEvent) -> Option<&ChangeNotice<Self>> {
        match event {
            BusEvent::TaskUpdated(notice) => Some(notice),
            _ => None,
        }
    }

    fn change_topic() -> Topic {
        Topic::TaskUpdated
    }

    fn needs_refetch(event: &BusEvent) -> bool {
        matches!(event, BusEvent::TasksNeedRefresh) || is_project_deletion(event)
    }

    fn watched_topics() -> Vec<Topic> {
        vec![
            Topic::TaskUpdated,
            Topic::TasksNeedRefresh,
            Topic::ProjectUpdated,
        ]
    }

    fn authorize(session: &SessionContext, op: Operation, current: Option<&Self>) -> Result<()> {
        if op == Operation::Update
            && !session.can(Permission::ManageTasks)
            && session.can(Permission::ManageOwnTasks)
        {
            let own = current
                .and_then(|task| task.assignee_id)
                .is_some_and(|assignee| assignee == session.user.id);
            if own {
                return Ok(());
            }
        }
        session.require(Permission::ManageTasks)
    }
}
