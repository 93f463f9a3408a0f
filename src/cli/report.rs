//! nexapro stats and users commands.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::{require_loaded, App};
use crate::entity::Priority;
use crate::error::Result;
use crate::gateway::ListFilters;
use crate::output::{emit_success, HumanOutput};
use crate::project::ProjectStatus;
use crate::reconcile::ProgressStatus;
use crate::stats::DerivedStats;
use crate::task::TaskStatus;
use crate::user::User;

#[derive(Serialize)]
struct StatsOutput {
    projects: Option<DerivedStats<ProjectStatus>>,
    tasks: Option<DerivedStats<TaskStatus>>,
}

#[derive(Serialize)]
struct UsersOutput {
    total: usize,
    users: Vec<User>,
}

pub async fn run_stats(app: &App) -> Result<()> {
    let tasks = app.task_store();
    let projects = tasks.projects().clone();
    tokio::join!(
        projects.fetch(ListFilters::default()),
        tasks.fetch(ListFilters::default())
    );
    require_loaded(&projects.snapshot())?;
    require_loaded(&tasks.snapshot())?;

    let output = StatsOutput {
        projects: projects.stats(),
        tasks: tasks.stats(),
    };

    let mut human = HumanOutput::new("Dashboard stats");
    if let Some(stats) = output.projects.as_ref() {
        push_stats(&mut human, "Projects", stats);
    }
    if let Some(stats) = output.tasks.as_ref() {
        push_stats(&mut human, "Tasks", stats);
        if let Some(overdue) = stats.overdue.filter(|count| *count > 0) {
            human.push_warning(format!("{overdue} task(s) overdue"));
        }
    }
    emit_success(app.output, "stats", &output, Some(&human))
}

pub async fn run_users(app: &App) -> Result<()> {
    let users = app.ctx.gateway.list_users(&CancellationToken::new()).await?;
    let mut human = HumanOutput::new(format!("{} user(s)", users.len()));
    for user in &users {
        let role = user.role.as_deref().unwrap_or("-");
        match user.email.as_deref() {
            Some(email) => human.push_detail(format!("#{} {} <{email}> ({role})", user.id, user.name)),
            None => human.push_detail(format!("#{} {} ({role})", user.id, user.name)),
        }
    }
    let output = UsersOutput {
        total: users.len(),
        users,
    };
    emit_success(app.output, "users", &output, Some(&human))
}

fn push_stats<S: ProgressStatus>(human: &mut HumanOutput, label: &str, stats: &DerivedStats<S>) {
    let by_status: Vec<String> = stats
        .by_status
        .iter()
        .map(|(status, count)| format!("{status} {count}"))
        .collect();
    let by_priority: Vec<String> = Priority::ALL
        .iter()
        .map(|priority| format!("{priority} {}", stats.priority_count(*priority)))
        .collect();
    human.push_summary(label, stats.total.to_string());
    human.push_detail(format!("{label} by status: {}", by_status.join(", ")));
    human.push_detail(format!("{label} by priority: {}", by_priority.join(", ")));
}
