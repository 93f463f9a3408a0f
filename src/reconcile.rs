//! Status/progress reconciliation.
//!
//! Every entity read from the gateway, and every entity returned by a
//! mutation, passes through [`reconcile`]. Outgoing partial updates pass
//! through [`sync_patch`] so a single request carries both halves of the
//! status/progress pair.
//!
//! Rules, in evaluation order:
//! 1. `status == Completed` forces `progress = 100`.
//! 2. `status` is re-derived from `progress`: 100 is Completed, 1..=99 is In
//!    Progress, 0 is the initial status (Planning / Todo).
//!
//! Rule 2 is applied to every status under [`ReconcileMode::Always`], which
//! means a user-chosen On Hold / Review / Cancelled is overwritten on the
//! next normalization pass. [`ReconcileMode::RespectOverrides`] leaves those
//! statuses alone.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// A status enum with the three progress-driven states.
pub trait ProgressStatus:
    Copy + Eq + Ord + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const INITIAL: Self;
    const IN_PROGRESS: Self;
    const COMPLETED: Self;
    /// Every variant, in display order.
    const ALL: &'static [Self];

    fn is_progress_driven(self) -> bool {
        self == Self::INITIAL || self == Self::IN_PROGRESS || self == Self::COMPLETED
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Re-derive status from progress on every pass.
    #[default]
    Always,
    /// Only re-derive progress-driven statuses.
    RespectOverrides,
}

/// Status implied by a progress value.
pub fn status_for_progress<S: ProgressStatus>(progress: u8) -> S {
    if progress >= 100 {
        S::COMPLETED
    } else if progress > 0 {
        S::IN_PROGRESS
    } else {
        S::INITIAL
    }
}

/// Reconcile a raw status/progress pair.
pub fn reconcile_parts<S: ProgressStatus>(status: S, progress: u8, mode: ReconcileMode) -> (S, u8) {
    let mut progress = progress.min(100);
    if status == S::COMPLETED {
        progress = 100;
    }
    if mode == ReconcileMode::RespectOverrides && !status.is_progress_driven() {
        return (status, progress);
    }
    (status_for_progress(progress), progress)
}

/// Normalize an entity. `reconcile(reconcile(e)) == reconcile(e)`.
pub fn reconcile<E: Entity>(mut entity: E, mode: ReconcileMode) -> E {
    let (status, progress) = reconcile_parts(entity.status(), entity.progress(), mode);
    entity.set_status_progress(status, progress);
    entity
}

/// Fold the derived half of the status/progress pair into an outgoing patch.
///
/// - status Completed: progress 100 is added.
/// - progress without status: the derived status is added.
/// - progress with a progress-driven status: the status is re-derived.
/// - progress with an override status (On Hold, Review, ...): sent as given.
pub fn sync_patch<E: Entity>(patch: &mut E::Patch) {
    let (status, progress) = E::patch_status_progress(patch);
    if let Some(value) = progress.as_mut() {
        *value = (*value).min(100);
    }
    match (*status, *progress) {
        (Some(current), _) if current == E::Status::COMPLETED => *progress = Some(100),
        (Some(current), Some(value)) if current.is_progress_driven() => {
            *status = Some(status_for_progress(value));
        }
        (None, Some(value)) => *status = Some(status_for_progress(value)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ProjectPatch, ProjectStatus};
    use crate::task::{TaskPatch, TaskStatus};

    #[test]
    fn completed_forces_full_progress() {
        let (status, progress) =
            reconcile_parts(ProjectStatus::Completed, 40, ReconcileMode::Always);
        assert_eq!(status, ProjectStatus::Completed);
        assert_eq!(progress, 100);
    }

    #[test]
    fn progress_drives_status() {
        assert_eq!(
            reconcile_parts(ProjectStatus::Planning, 55, ReconcileMode::Always),
            (ProjectStatus::InProgress, 55)
        );
        assert_eq!(
            reconcile_parts(TaskStatus::InProgress, 0, ReconcileMode::Always),
            (TaskStatus::Todo, 0)
        );
        assert_eq!(
            reconcile_parts(TaskStatus::Todo, 100, ReconcileMode::Always),
            (TaskStatus::Completed, 100)
        );
    }

    #[test]
    fn always_mode_overrides_on_hold() {
        assert_eq!(
            reconcile_parts(ProjectStatus::OnHold, 30, ReconcileMode::Always),
            (ProjectStatus::InProgress, 30)
        );
        assert_eq!(
            reconcile_parts(TaskStatus::Cancelled, 0, ReconcileMode::Always),
            (TaskStatus::Todo, 0)
        );
    }

    #[test]
    fn respect_mode_keeps_overrides() {
        assert_eq!(
            reconcile_parts(ProjectStatus::OnHold, 30, ReconcileMode::RespectOverrides),
            (ProjectStatus::OnHold, 30)
        );
        assert_eq!(
            reconcile_parts(TaskStatus::Review, 100, ReconcileMode::RespectOverrides),
            (TaskStatus::Review, 100)
        );
        assert_eq!(
            reconcile_parts(TaskStatus::Todo, 20, ReconcileMode::RespectOverrides),
            (TaskStatus::InProgress, 20)
        );
    }

    #[test]
    fn sync_patch_adds_derived_status() {
        let mut patch = TaskPatch {
            progress: Some(60),
            ..TaskPatch::default()
        };
        sync_patch::<crate::task::Task>(&mut patch);
        assert_eq!(patch.status, Some(TaskStatus::InProgress));
        assert_eq!(patch.progress, Some(60));
    }

    #[test]
    fn sync_patch_completed_adds_full_progress() {
        let mut patch = ProjectPatch {
            status: Some(ProjectStatus::Completed),
            ..ProjectPatch::default()
        };
        sync_patch::<crate::project::Project>(&mut patch);
        assert_eq!(patch.progress, Some(100));
    }

    #[test]
    fn sync_patch_keeps_explicit_override() {
        let mut patch = TaskPatch {
            status: Some(TaskStatus::OnHold),
            progress: Some(45),
            ..TaskPatch::default()
        };
        sync_patch::<crate::task::Task>(&mut patch);
        assert_eq!(patch.status, Some(TaskStatus::OnHold));
        assert_eq!(patch.progress, Some(45));
    }

    #[test]
    fn sync_patch_status_only_leaves_progress_absent() {
        let mut patch = TaskPatch {
            status: Some(TaskStatus::Review),
            ..TaskPatch::default()
        };
        sync_patch::<crate::task::Task>(&mut patch);
        assert_eq!(patch.status, Some(TaskStatus::Review));
        assert_eq!(patch.progress, None);
    }
}
