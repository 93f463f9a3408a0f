//! Project entities.
//!
//! A project carries its own status/progress pair plus a `tasks` counter
//! cache that is recomputed from the task collection whenever a task
//! changes (see [`crate::aggregate`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{
    normalize_label, normalize_text, progress_serde, Entity, EntityKind, MemberRef, Priority,
    TaskCounts,
};
use crate::error::{Error, Result};
use crate::events::{BusEvent, ChangeNotice, Change, Topic};
use crate::permissions::Permission;
use crate::reconcile::ProgressStatus;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ProjectStatus {
    #[default]
    #[serde(alias = "planning")]
    Planning,
    #[serde(
        rename = "In Progress",
        alias = "in_progress",
        alias = "in-progress",
        alias = "in progress"
    )]
    InProgress,
    #[serde(alias = "completed")]
    Completed,
    #[serde(
        rename = "On Hold",
        alias = "On hold",
        alias = "on_hold",
        alias = "on-hold",
        alias = "on hold"
    )]
    OnHold,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Planning => "Planning",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::OnHold => "On Hold",
        }
    }
}

impl ProgressStatus for ProjectStatus {
    const INITIAL: Self = ProjectStatus::Planning;
    const IN_PROGRESS: Self = ProjectStatus::InProgress;
    const COMPLETED: Self = ProjectStatus::Completed;
    const ALL: &'static [Self] = &[
        ProjectStatus::Planning,
        ProjectStatus::InProgress,
        ProjectStatus::Completed,
        ProjectStatus::OnHold,
    ];
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| normalize_label(status.as_str()) == normalize_label(s))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "invalid project status '{}': must be Planning, In Progress, Completed, or On Hold",
                    s.trim()
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, with = "progress_serde")]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub team: Vec<MemberRef>,
    #[serde(default)]
    pub tasks: TaskCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Body of `POST /projects`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub team: Vec<MemberRef>,
}

impl ProjectDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Body of `PUT /projects/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<Vec<MemberRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskCounts>,
}

impl Entity for Project {
    type Status = ProjectStatus;
    type Draft = ProjectDraft;
    type Patch = ProjectPatch;

    const KIND: EntityKind = EntityKind::Project;
    const PATH: &'static str = "projects";
    const TRACKS_OVERDUE: bool = false;
    const MANAGE_PERMISSION: Permission = Permission::ManageProjects;

    fn id(&self) -> i64 {
        self.id
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ProjectStatus {
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

    fn set_status_progress(&mut self, status: ProjectStatus, progress: u8) {
        self.status = status;
        self.progress = progress;
    }

    fn validate_draft(draft: &ProjectDraft) -> Result<()> {
        if draft.name.trim().is_empty() {
            return Err(Error::Validation("project name cannot be empty".to_string()));
        }
        if draft.progress.is_some_and(|progress| progress > 100) {
            return Err(Error::Validation(
                "project progress must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_patch(patch: &ProjectPatch) -> Result<()> {
        if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(Error::Validation("project name cannot be empty".to_string()));
        }
        if patch.progress.is_some_and(|progress| progress > 100) {
            return Err(Error::Validation(
                "project progress must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }

    fn from_draft(id: i64, draft: &ProjectDraft) -> Self {
        Project {
            id,
            name: draft.name.trim().to_string(),
            description: normalize_text(draft.description.clone()),
            status: draft.status.unwrap_or_default(),
            priority: draft.priority.unwrap_or_default(),
            progress: draft.progress.unwrap_or(0),
            due_date: normalize_text(draft.due_date.clone()),
            team: draft.team.clone(),
            tasks: TaskCounts::default(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            updated_at: None,
        }
    }

    fn patch_status_progress(
        patch: &mut ProjectPatch,
    ) -> (&mut Option<ProjectStatus>, &mut Option<u8>) {
        (&mut patch.status, &mut patch.progress)
    }

    fn describe_patch(patch: &ProjectPatch) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(name) = patch.name.as_ref() {
            parts.push(format!("name: {name}"));
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
        if let Some(counts) = patch.tasks {
            parts.push(format!("tasks: {}/{}", counts.completed, counts.total));
        }
        if patch.description.is_some() {
            parts.push("description".to_string());
        }
        if patch.due_date.is_some() {
            parts.push("due date".to_string());
        }
        if patch.team.is_some() {
            parts.push("team".to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    fn wrap_notice(notice: ChangeNotice<Self>) -> BusEvent {
        BusEvent::ProjectUpdated(notice)
    }

    fn notice(event: &BusEvent) -> Option<&ChangeNotice<Self>> {
        match event {
            BusEvent::ProjectUpdated(notice) => Some(notice),
            _ => None,
        }
    }

    fn change_topic() -> Topic {
        Topic::ProjectUpdated
    }

    fn needs_refetch(event: &BusEvent) -> bool {
        matches!(event, BusEvent::ProjectsNeedRefresh)
    }
}

/// True when a project change notice reports a deletion.
pub(crate) fn is_project_deletion(event: &BusEvent) -> bool {
    matches!(
        event,
        BusEvent::ProjectUpdated(ChangeNotice {
            change: Change::Deleted { .. },
            ..
        })
    )
}
