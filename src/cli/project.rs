//! nexapro project command implementations.

use serde::Serialize;

use crate::cli::{require_loaded, App};
use crate::entity::{normalize_text, Priority};
use crate::error::{Error, Result};
use crate::gateway::ListFilters;
use crate::output::{emit_success, HumanOutput};
use crate::project::{Project, ProjectDraft, ProjectPatch, ProjectStatus};
use crate::stats::DerivedStats;

pub struct ListOptions {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
}

pub struct NewOptions {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub due: Option<String>,
}

pub struct EditOptions {
    pub id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub due: Option<String>,
}

#[derive(Serialize)]
struct ProjectListOutput {
    total: usize,
    projects: Vec<Project>,
    stats: Option<DerivedStats<ProjectStatus>>,
}

#[derive(Serialize)]
struct ProjectOutput {
    project: Project,
    provisional: bool,
}

#[derive(Serialize)]
struct ProjectDeleteOutput {
    id: i64,
    deleted: bool,
}

pub async fn run_list(app: &App, options: ListOptions) -> Result<()> {
    let filters = ListFilters {
        status: options
            .status
            .map(|raw| raw.parse::<ProjectStatus>().map(|status| status.to_string()))
            .transpose()?,
        priority: options
            .priority
            .map(|raw| raw.parse::<Priority>().map(|priority| priority.to_string()))
            .transpose()?,
        search: normalize_text(options.search),
        project_id: None,
    };
    let store = app.project_store();
    store.fetch(filters).await;
    let snapshot = store.snapshot();
    require_loaded(&snapshot)?;

    let mut human = HumanOutput::new(format!("{} project(s)", snapshot.collection.len()));
    for project in &snapshot.collection {
        human.push_detail(project_line(project));
    }
    if snapshot.collection.is_empty() {
        human.push_next_step("nexapro project new <name>");
    }
    let output = ProjectListOutput {
        total: snapshot.collection.len(),
        projects: snapshot.collection,
        stats: snapshot.stats,
    };
    emit_success(app.output, "project list", &output, Some(&human))
}

pub async fn run_show(app: &App, id: i64) -> Result<()> {
    let store = app.project_store();
    store.fetch(ListFilters::default()).await;
    require_loaded(&store.snapshot())?;
    let project = store
        .get_by_id(id)
        .ok_or(Error::NotFound { kind: "project", id })?;

    let human = project_human(format!("Project #{id}"), &project);
    let output = ProjectOutput {
        project,
        provisional: false,
    };
    emit_success(app.output, "project show", &output, Some(&human))
}

pub async fn run_new(app: &mut App, options: NewOptions) -> Result<()> {
    let draft = ProjectDraft {
        name: options.name.trim().to_string(),
        description: normalize_text(options.description),
        status: options.status.as_deref().map(str::parse).transpose()?,
        priority: options.priority.as_deref().map(str::parse).transpose()?,
        due_date: normalize_text(options.due),
        progress: options.progress,
        team: Vec::new(),
    };
    app.load_permissions().await;
    let store = app.project_store();
    let project = store.create(draft).await?;
    let provisional = store.is_provisional(project.id);

    let mut human = project_human("Project created".to_string(), &project);
    if provisional {
        human.push_warning("gateway unreachable: project kept locally and not saved");
    }
    let output = ProjectOutput {
        project,
        provisional,
    };
    emit_success(app.output, "project new", &output, Some(&human))
}

pub async fn run_edit(app: &mut App, options: EditOptions) -> Result<()> {
    let patch = ProjectPatch {
        name: options.name.map(|name| name.trim().to_string()),
        description: options.description,
        status: options.status.as_deref().map(str::parse).transpose()?,
        priority: options.priority.as_deref().map(str::parse).transpose()?,
        progress: options.progress,
        due_date: options.due,
        team: None,
        tasks: None,
    };
    if patch == ProjectPatch::default() {
        return Err(Error::InvalidArgument(
            "nothing to change: pass at least one field".to_string(),
        ));
    }
    app.load_permissions().await;
    let store = app.project_store();
    store.fetch(ListFilters::default()).await;
    require_loaded(&store.snapshot())?;
    let project = store.update(options.id, patch).await?;

    let human = project_human("Project updated".to_string(), &project);
    let output = ProjectOutput {
        project,
        provisional: false,
    };
    emit_success(app.output, "project edit", &output, Some(&human))
}

pub async fn run_rm(app: &mut App, id: i64) -> Result<()> {
    app.load_permissions().await;
    let store = app.project_store();
    store.fetch(ListFilters::default()).await;
    let known = store.get_by_id(id).is_some();
    store.delete(id).await?;

    let mut human = HumanOutput::new("Project deleted");
    human.push_summary("ID", id.to_string());
    if !known {
        human.push_warning("project was not in the loaded collection");
    }
    human.push_next_step("nexapro task list --project <id> to check for remaining tasks");
    let output = ProjectDeleteOutput { id, deleted: true };
    emit_success(app.output, "project rm", &output, Some(&human))
}

fn project_line(project: &Project) -> String {
    format!(
        "#{} {} [{}] {}% ({}/{} tasks, {})",
        project.id,
        project.name,
        project.status,
        project.progress,
        project.tasks.completed,
        project.tasks.total,
        project.priority
    )
}

fn project_human(header: String, project: &Project) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", project.id.to_string());
    human.push_summary("Name", project.name.clone());
    human.push_summary("Status", project.status.to_string());
    human.push_summary("Progress", format!("{}%", project.progress));
    human.push_summary("Priority", project.priority.to_string());
    human.push_summary(
        "Tasks",
        format!("{}/{} completed", project.tasks.completed, project.tasks.total),
    );
    if let Some(due) = project.due_date.as_ref() {
        human.push_summary("Due", due.clone());
    }
    if let Some(description) = project.description.as_ref() {
        human.push_detail(description.clone());
    }
    human
}
