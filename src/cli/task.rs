//! nexapro task command implementations.
//!
//! Every mutation loads the full task collection first: project aggregates
//! are computed from it, and `manage_own_tasks` needs the task's current
//! assignee. `task new` may proceed without it when offline fallback is on.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use crate::aggregate::{aggregate_project, ProjectAggregate};
use crate::cli::{require_loaded, App};
use crate::entity::{normalize_text, Priority};
use crate::error::{Error, Result};
use crate::gateway::ListFilters;
use crate::output::{emit_success, HumanOutput};
use crate::stats::DerivedStats;
use crate::task::{Task, TaskDraft, TaskPatch, TaskStatus};
use crate::task_store::TaskStore;

pub struct ListOptions {
    pub project: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
}

pub struct NewOptions {
    pub title: String,
    pub project: i64,
    pub description: Option<String>,
    pub assignee: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub due: Option<String>,
    pub tags: Vec<String>,
}

pub struct EditOptions {
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub project: Option<i64>,
    pub assignee: Option<i64>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub due: Option<String>,
    pub tags: Vec<String>,
    pub clear_tags: bool,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<Task>,
    stats: Option<DerivedStats<TaskStatus>>,
}

#[derive(Serialize)]
struct TaskOutput {
    task: Task,
    provisional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<ProjectAggregate>,
}

#[derive(Serialize)]
struct TaskDeleteOutput {
    id: i64,
    deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<ProjectAggregate>,
}

pub async fn run_list(app: &App, options: ListOptions) -> Result<()> {
    let filters = ListFilters {
        status: options
            .status
            .map(|raw| raw.parse::<TaskStatus>().map(|status| status.to_string()))
            .transpose()?,
        priority: options
            .priority
            .map(|raw| raw.parse::<Priority>().map(|priority| priority.to_string()))
            .transpose()?,
        search: normalize_text(options.search),
        project_id: options.project,
    };
    let store = app.task_store();
    store.fetch(filters).await;
    let snapshot = store.snapshot();
    require_loaded(&snapshot)?;

    let mut human = HumanOutput::new(format!("{} task(s)", snapshot.collection.len()));
    for task in &snapshot.collection {
        human.push_detail(task_line(task));
    }
    if let Some(overdue) = snapshot.stats.as_ref().and_then(|stats| stats.overdue) {
        if overdue > 0 {
            human.push_warning(format!("{overdue} task(s) overdue"));
        }
    }
    let output = TaskListOutput {
        total: snapshot.collection.len(),
        tasks: snapshot.collection,
        stats: snapshot.stats,
    };
    emit_success(app.output, "task list", &output, Some(&human))
}

pub async fn run_show(app: &App, id: i64) -> Result<()> {
    let store = app.task_store();
    load_all(&store).await?;
    let task = store
        .get_by_id(id)
        .ok_or(Error::NotFound { kind: "task", id })?;

    let human = task_human(format!("Task #{id}"), &task);
    let output = TaskOutput {
        task,
        provisional: false,
        project: None,
    };
    emit_success(app.output, "task show", &output, Some(&human))
}

pub async fn run_new(app: &mut App, options: NewOptions) -> Result<()> {
    let draft = TaskDraft {
        title: options.title.trim().to_string(),
        description: normalize_text(options.description),
        project_id: Some(options.project),
        assignee_id: options.assignee,
        status: options.status.as_deref().map(str::parse).transpose()?,
        priority: options.priority.as_deref().map(str::parse).transpose()?,
        progress: options.progress,
        due_date: normalize_text(options.due),
        tags: options.tags.into_iter().collect(),
    };
    app.load_permissions().await;
    let store = app.task_store();
    let partial = match load_all(&store).await {
        Ok(()) => false,
        Err(err) if app.ctx.options.offline_fallback => {
            warn!(error = %err, "task list unavailable; creating with offline fallback");
            true
        }
        Err(err) => return Err(err),
    };
    let task = store.create(draft).await?;
    let provisional = store.provisional_ids().contains(&task.id);
    if partial && !provisional {
        // The aggregate written on create saw an incomplete collection.
        load_all(&store).await?;
        store.sync_project_from_tasks(task.project_id).await?;
    }

    let mut human = task_human("Task created".to_string(), &task);
    let project = (!provisional).then(|| aggregate_project(&store.collection(), task.project_id));
    if provisional {
        human.push_warning("gateway unreachable: task kept locally and not saved");
    }
    push_aggregate(&mut human, project.as_ref());
    let output = TaskOutput {
        task,
        provisional,
        project,
    };
    emit_success(app.output, "task new", &output, Some(&human))
}

pub async fn run_edit(app: &mut App, options: EditOptions) -> Result<()> {
    let tags = if options.clear_tags {
        Some(BTreeSet::new())
    } else if options.tags.is_empty() {
        None
    } else {
        Some(options.tags.into_iter().collect())
    };
    let patch = TaskPatch {
        title: options.title.map(|title| title.trim().to_string()),
        description: options.description,
        project_id: options.project,
        assignee_id: options.assignee,
        status: options.status.as_deref().map(str::parse).transpose()?,
        priority: options.priority.as_deref().map(str::parse).transpose()?,
        progress: options.progress,
        due_date: options.due,
        tags,
    };
    if patch == TaskPatch::default() {
        return Err(Error::InvalidArgument(
            "nothing to change: pass at least one field".to_string(),
        ));
    }
    app.load_permissions().await;
    let store = app.task_store();
    load_all(&store).await?;
    let task = store.update(options.id, patch).await?;

    let mut human = task_human("Task updated".to_string(), &task);
    let project = aggregate_project(&store.collection(), task.project_id);
    push_aggregate(&mut human, Some(&project));
    let output = TaskOutput {
        task,
        provisional: false,
        project: Some(project),
    };
    emit_success(app.output, "task edit", &output, Some(&human))
}

pub async fn run_rm(app: &mut App, id: i64) -> Result<()> {
    app.load_permissions().await;
    let store = app.task_store();
    load_all(&store).await?;
    let project_id = store.get_by_id(id).map(|task| task.project_id);
    store.delete(id).await?;

    let mut human = HumanOutput::new("Task deleted");
    human.push_summary("ID", id.to_string());
    let project = project_id.map(|project_id| aggregate_project(&store.collection(), project_id));
    match project.as_ref() {
        Some(aggregate) => push_aggregate(&mut human, Some(aggregate)),
        None => human.push_warning("task was not in the loaded collection"),
    }
    let output = TaskDeleteOutput {
        id,
        deleted: true,
        project,
    };
    emit_success(app.output, "task rm", &output, Some(&human))
}

async fn load_all(store: &TaskStore) -> Result<()> {
    store.fetch(ListFilters::default()).await;
    require_loaded(&store.snapshot())
}

fn push_aggregate(human: &mut HumanOutput, aggregate: Option<&ProjectAggregate>) {
    if let Some(aggregate) = aggregate {
        human.push_summary(
            "Project progress",
            format!(
                "#{} {}% ({}/{} tasks)",
                aggregate.project_id,
                aggregate.progress,
                aggregate.tasks.completed,
                aggregate.tasks.total
            ),
        );
    }
}

fn task_line(task: &Task) -> String {
    format!(
        "#{} {} [{}] {}% (project #{}, {})",
        task.id, task.title, task.status, task.progress, task.project_id, task.priority
    )
}

fn task_human(header: String, task: &Task) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", task.id.to_string());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Project", format!("#{}", task.project_id));
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Progress", format!("{}%", task.progress));
    human.push_summary("Priority", task.priority.to_string());
    if let Some(assignee) = task.assignee_id {
        human.push_summary("Assignee", format!("#{assignee}"));
    }
    if let Some(due) = task.due_date.as_ref() {
        human.push_summary("Due", due.clone());
    }
    if !task.tags.is_empty() {
        let tags: Vec<&str> = task.tags.iter().map(String::as_str).collect();
        human.push_summary("Tags", tags.join(", "));
    }
    if let Some(description) = task.description.as_ref() {
        human.push_detail(description.clone());
    }
    human
}
