mod support;

use std::net::{SocketAddr, TcpListener};

use nexapro::error::Error;
use nexapro::gateway::ListFilters;
use nexapro::project::{ProjectDraft, ProjectPatch, ProjectStatus};
use nexapro::store::{ProjectStore, StoreOptions};
use nexapro::task::TaskDraft;
use nexapro::task_store::TaskStore;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{ok, project_json, quiet_context, task_json};

const FALLBACK: StoreOptions = StoreOptions {
    reconcile_mode: nexapro::reconcile::ReconcileMode::Always,
    offline_fallback: true,
};

/// An address nothing is listening on.
fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr")
}

fn offline_projects(addr: SocketAddr, options: StoreOptions) -> ProjectStore {
    ProjectStore::new(quiet_context(&format!("http://{addr}"), "admin", options))
}

#[tokio::test]
async fn unreachable_gateway_fails_without_fallback() {
    let store = offline_projects(closed_addr(), StoreOptions::default());
    let err = store
        .create(ProjectDraft::new("Apollo"))
        .await
        .expect_err("offline");
    assert!(err.is_offline());
    assert!(store.collection().is_empty());
}

#[tokio::test]
async fn fallback_keeps_a_provisional_entity() {
    let store = offline_projects(closed_addr(), FALLBACK);
    let mut subscription = store.context().bus.subscribe_all();

    let draft = ProjectDraft {
        progress: Some(30),
        ..ProjectDraft::new("Apollo")
    };
    let project = store.create(draft).await.expect("provisional");

    assert!(project.id < 0);
    assert_eq!(project.status, ProjectStatus::InProgress);
    assert!(store.is_provisional(project.id));
    assert_eq!(store.provisional_ids(), vec![project.id]);
    assert_eq!(store.stats().expect("stats").total, 1);
    assert!(subscription.try_recv().is_none());

    let err = store
        .update(project.id, ProjectPatch::default())
        .await
        .expect_err("not synced");
    assert!(matches!(err, Error::Provisional { .. }));

    // Failed fetches keep provisional entities.
    store.fetch(ListFilters::default()).await;
    assert!(store.error().is_some());
    assert_eq!(store.collection().len(), 1);

    store.delete(project.id).await.expect("dropped locally");
    assert!(store.collection().is_empty());
    assert!(store.provisional_ids().is_empty());
}

#[tokio::test]
async fn http_errors_are_not_offline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = ProjectStore::new(quiet_context(&server.uri(), "admin", FALLBACK));
    let err = store
        .create(ProjectDraft::new("Apollo"))
        .await
        .expect_err("server error");
    assert!(matches!(err, Error::Http { status: 500, .. }));
    assert!(store.provisional_ids().is_empty());
}

#[tokio::test]
async fn flush_promotes_provisional_tasks_and_aggregates() {
    let addr = closed_addr();
    let base_url = format!("http://{addr}");
    let ctx = quiet_context(&base_url, "admin", FALLBACK);
    let tasks = TaskStore::new(ctx.clone(), ProjectStore::shared(ctx));

    let provisional = tasks
        .create(TaskDraft::new("Write docs", 4))
        .await
        .expect("provisional");
    assert!(provisional.id < 0);

    // Bring the gateway up on the same address.
    let listener = TcpListener::bind(addr).expect("rebind");
    let server = MockServer::builder().listener(listener).start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(body_partial_json(json!({ "title": "Write docs", "project_id": 4 })))
        .respond_with(ok(task_json(10, "Write docs", 4, "Todo", 0)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/projects/4"))
        .and(body_partial_json(json!({ "tasks": { "total": 1, "completed": 0 } })))
        .respond_with(ok(project_json(4, "Apollo", "Planning", 0)))
        .expect(1)
        .mount(&server)
        .await;

    let report = tasks.flush_provisional().await.expect("flush");
    assert_eq!(report.flushed.len(), 1);
    assert_eq!(report.flushed[0].provisional_id, provisional.id);
    assert_eq!(report.flushed[0].id, 10);
    assert!(report.remaining.is_empty());
    assert!(tasks.provisional_ids().is_empty());
    assert!(tasks.get_by_id(provisional.id).is_none());
    assert!(tasks.get_by_id(10).is_some());
}
