use chrono::{TimeZone, Utc};
use nexapro::aggregate::aggregate_project;
use nexapro::entity::{Entity, Priority};
use nexapro::project::{Project, ProjectDraft, ProjectPatch, ProjectStatus};
use nexapro::reconcile::{reconcile, sync_patch, ProgressStatus, ReconcileMode};
use nexapro::stats::compute_stats;
use nexapro::task::{Task, TaskDraft, TaskStatus};
use proptest::prelude::*;

fn project(id: i64, status: ProjectStatus, priority: Priority, progress: u8) -> Project {
    let mut project = Project::from_draft(id, &ProjectDraft::new(format!("p{id}")));
    project.status = status;
    project.priority = priority;
    project.progress = progress;
    project
}

fn task(id: i64, project_id: i64, status: TaskStatus, progress: u8) -> Task {
    let mut task = Task::from_draft(id, &TaskDraft::new(format!("t{id}"), project_id));
    task.status = status;
    task.progress = progress;
    task
}

fn project_status() -> impl Strategy<Value = ProjectStatus> {
    prop::sample::select(ProjectStatus::ALL.to_vec())
}

fn task_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

fn mode() -> impl Strategy<Value = ReconcileMode> {
    prop::sample::select(vec![ReconcileMode::Always, ReconcileMode::RespectOverrides])
}

proptest! {
    #[test]
    fn reconcile_is_idempotent(status in task_status(), progress in 0u8..=100, mode in mode()) {
        let once = reconcile(task(1, 1, status, progress), mode);
        let twice = reconcile(once.clone(), mode);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn reconciled_pair_is_coupled(status in project_status(), progress in 0u8..=100) {
        let project = reconcile(project(1, status, Priority::Medium, progress), ReconcileMode::Always);
        prop_assert_eq!(project.status == ProjectStatus::Completed, project.progress == 100);
        prop_assert_eq!(project.status == ProjectStatus::Planning, project.progress == 0);
        if status == ProjectStatus::Completed {
            prop_assert_eq!(project.progress, 100);
        }
    }

    #[test]
    fn synced_patch_carries_both_halves(progress in 0u8..=100) {
        let mut patch = ProjectPatch { progress: Some(progress), ..ProjectPatch::default() };
        sync_patch::<Project>(&mut patch);
        let status = patch.status.expect("derived status");
        prop_assert_eq!(status == ProjectStatus::Completed, progress == 100);
    }

    #[test]
    fn stats_partition_the_collection(
        rows in prop::collection::vec((project_status(), priority(), 0u8..=100), 0..40)
    ) {
        let collection: Vec<Project> = rows
            .iter()
            .enumerate()
            .map(|(index, (status, priority, progress))| {
                project(index as i64 + 1, *status, *priority, *progress)
            })
            .collect();
        let stats = compute_stats(&collection, Utc::now());

        prop_assert_eq!(stats.total, collection.len());
        prop_assert_eq!(stats.by_status.values().sum::<usize>(), collection.len());
        prop_assert_eq!(stats.by_priority.values().sum::<usize>(), collection.len());
        for status in ProjectStatus::ALL {
            let expected = collection.iter().filter(|p| p.status == *status).count();
            prop_assert_eq!(stats.status_count(*status), expected);
        }
    }

    #[test]
    fn aggregate_matches_done_tasks(
        rows in prop::collection::vec((1i64..=3, task_status(), 0u8..=100), 0..30)
    ) {
        let tasks: Vec<Task> = rows
            .iter()
            .enumerate()
            .map(|(index, (project_id, status, progress))| {
                task(index as i64 + 1, *project_id, *status, *progress)
            })
            .collect();
        let aggregate = aggregate_project(&tasks, 2);
        let mine: Vec<&Task> = tasks.iter().filter(|t| t.project_id == 2).collect();
        let done = mine.iter().filter(|t| t.is_done()).count() as u32;

        prop_assert_eq!(aggregate.tasks.total, mine.len() as u32);
        prop_assert_eq!(aggregate.tasks.completed, done);
        prop_assert!(aggregate.progress <= 100);
        if mine.is_empty() {
            prop_assert_eq!(aggregate.progress, 0);
        } else if done as usize == mine.len() {
            prop_assert_eq!(aggregate.progress, 100);
        }
    }
}

#[test]
fn overdue_counts_open_tasks_past_due() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("time");
    let mut late = task(1, 1, TaskStatus::InProgress, 40);
    late.due_date = Some("2024-05-30".to_string());
    let mut late_but_done = task(2, 1, TaskStatus::Completed, 100);
    late_but_done.due_date = Some("2024-05-30".to_string());
    let mut future = task(3, 1, TaskStatus::Todo, 0);
    future.due_date = Some("2024-07-01T00:00:00Z".to_string());
    let undated = task(4, 1, TaskStatus::Todo, 0);

    let stats = compute_stats(&[late, late_but_done, future, undated], now);
    assert_eq!(stats.overdue, Some(1));
    assert_eq!(stats.completed(), 1);
}
