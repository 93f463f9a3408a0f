//! Task store.
//!
//! Wraps the generic store for tasks and keeps the owning projects'
//! aggregates current: every successful create, update or delete is
//! followed by [`TaskStore::sync_project_from_tasks`] for each project the
//! mutation touched. A task moved between projects refreshes both.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::aggregate::{aggregate_project, ProjectAggregate};
use crate::error::Result;
use crate::events::BusEvent;
use crate::gateway::ListFilters;
use crate::stats::DerivedStats;
use crate::store::{EntityStore, FlushReport, ProjectStore, StoreContext, StoreMount, StoreSnapshot};
use crate::task::{Task, TaskDraft, TaskPatch, TaskStatus};

pub struct TaskStore {
    tasks: Arc<EntityStore<Task>>,
    projects: Arc<ProjectStore>,
}

impl TaskStore {
    /// A task store that writes aggregates through `projects`.
    pub fn new(ctx: StoreContext, projects: Arc<ProjectStore>) -> Self {
        Self {
            tasks: EntityStore::shared(ctx),
            projects,
        }
    }

    pub fn inner(&self) -> &Arc<EntityStore<Task>> {
        &self.tasks
    }

    pub fn projects(&self) -> &Arc<ProjectStore> {
        &self.projects
    }

    pub fn snapshot(&self) -> StoreSnapshot<Task> {
        self.tasks.snapshot()
    }

    pub fn collection(&self) -> Vec<Task> {
        self.tasks.collection()
    }

    pub fn stats(&self) -> Option<DerivedStats<TaskStatus>> {
        self.tasks.stats()
    }

    pub fn get_by_id(&self, id: i64) -> Option<Task> {
        self.tasks.get_by_id(id)
    }

    pub fn provisional_ids(&self) -> Vec<i64> {
        self.tasks.provisional_ids()
    }

    pub async fn fetch(&self, filters: ListFilters) {
        self.tasks.fetch(filters).await;
    }

    pub async fn refetch(&self) {
        self.tasks.refetch().await;
    }

    pub fn mount(&self) -> StoreMount {
        self.tasks.mount()
    }

    pub async fn handle_event(&self, event: &BusEvent) {
        self.tasks.handle_event(event).await;
    }

    pub async fn create(&self, draft: TaskDraft) -> Result<Task> {
        let task = self.tasks.create(draft).await?;
        if !self.tasks.is_provisional(task.id) {
            self.sync_projects([task.project_id]).await;
        }
        Ok(task)
    }

    pub async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task> {
        let previous_project = self.tasks.get_by_id(id).map(|task| task.project_id);
        let task = self.tasks.update(id, patch).await?;
        self.sync_projects(previous_project.into_iter().chain([task.project_id]))
            .await;
        Ok(task)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let previous = self.tasks.get_by_id(id);
        let was_provisional = self.tasks.is_provisional(id);
        self.tasks.delete(id).await?;
        match previous {
            Some(task) if !was_provisional => self.sync_projects([task.project_id]).await,
            Some(_) => {}
            None => debug!(id, "deleted task was not loaded; no project to aggregate"),
        }
        Ok(())
    }

    pub async fn flush_provisional(&self) -> Result<FlushReport> {
        let report = self.tasks.flush_provisional().await?;
        let touched: Vec<i64> = report
            .flushed
            .iter()
            .filter_map(|promotion| self.tasks.get_by_id(promotion.id))
            .map(|task| task.project_id)
            .collect();
        self.sync_projects(touched).await;
        Ok(report)
    }

    /// Recompute a project's task counters and progress from the loaded
    /// tasks and write them through the project store. Provisional tasks
    /// are not counted.
    pub async fn sync_project_from_tasks(&self, project_id: i64) -> Result<ProjectAggregate> {
        let provisional = self.tasks.provisional_ids();
        let tasks: Vec<Task> = self
            .tasks
            .collection()
            .into_iter()
            .filter(|task| !provisional.contains(&task.id))
            .collect();
        let aggregate = aggregate_project(&tasks, project_id);
        debug!(
            project_id,
            total = aggregate.tasks.total,
            completed = aggregate.tasks.completed,
            progress = aggregate.progress,
            "syncing project from tasks"
        );
        self.projects
            .apply_update(project_id, aggregate.to_patch())
            .await?;
        Ok(aggregate)
    }

    /// Aggregation failures do not fail the task mutation that caused them.
    async fn sync_projects(&self, project_ids: impl IntoIterator<Item = i64>) {
        let unique: BTreeSet<i64> = project_ids.into_iter().collect();
        for project_id in unique {
            if let Err(err) = self.sync_project_from_tasks(project_id).await {
                warn!(project_id, error = %err, "failed to sync project from tasks");
            }
        }
    }
}
