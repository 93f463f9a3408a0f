//! Task → project aggregation.
//!
//! A project's `tasks` counter cache and its progress are derived from the
//! tasks that reference it: a task counts as done when it is Completed or
//! at 100% progress.

use serde::Serialize;

use crate::entity::TaskCounts;
use crate::project::ProjectPatch;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectAggregate {
    pub project_id: i64,
    pub tasks: TaskCounts,
    pub progress: u8,
}

impl ProjectAggregate {
    /// The partial update that writes this aggregate back to the project.
    pub fn to_patch(&self) -> ProjectPatch {
        ProjectPatch {
            progress: Some(self.progress),
            tasks: Some(self.tasks),
            ..ProjectPatch::default()
        }
    }
}

/// Aggregate the tasks of one project.
pub fn aggregate_project<'a, I>(tasks: I, project_id: i64) -> ProjectAggregate
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut total: u32 = 0;
    let mut completed: u32 = 0;
    for task in tasks.into_iter().filter(|task| task.project_id == project_id) {
        total += 1;
        if task.is_done() {
            completed += 1;
        }
    }
    ProjectAggregate {
        project_id,
        tasks: TaskCounts { total, completed },
        progress: completion_percent(completed, total),
    }
}

/// `round(100 * completed / total)`, 0 for an empty project.
pub fn completion_percent(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = f64::from(completed.min(total)) / f64::from(total);
    (ratio * 100.0).round() as u8
}
