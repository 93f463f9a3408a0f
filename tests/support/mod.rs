#![allow(dead_code)]

use std::time::Duration;

use nexapro::activity::ActivityLogger;
use nexapro::events::EventBus;
use nexapro::gateway::Gateway;
use nexapro::permissions::PermissionPolicy;
use nexapro::session::{SessionContext, SessionUser};
use nexapro::store::{StoreContext, StoreOptions};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn session(role: &str, user_id: i64) -> SessionContext {
    SessionContext::new(
        SessionUser {
            id: user_id,
            name: format!("{role}-{user_id}"),
            role: role.to_string(),
        },
        PermissionPolicy::fallback(),
    )
}

pub fn gateway(base_url: &str) -> Gateway {
    Gateway::with_client(base_url, reqwest::Client::new())
}

/// Store context against a mock gateway, activity logging enabled.
pub fn context(server: &MockServer, role: &str) -> StoreContext {
    context_for(&server.uri(), role, EventBus::new())
}

pub fn context_for(base_url: &str, role: &str, bus: EventBus) -> StoreContext {
    StoreContext::new(gateway(base_url), bus, session(role, 1))
}

/// Options that keep override statuses away from progress.
pub const RESPECT_OVERRIDES: StoreOptions = StoreOptions {
    reconcile_mode: nexapro::reconcile::ReconcileMode::RespectOverrides,
    offline_fallback: false,
};

pub fn quiet_context(base_url: &str, role: &str, options: StoreOptions) -> StoreContext {
    context_for(base_url, role, EventBus::new())
        .with_activity(ActivityLogger::disabled())
        .with_options(options)
}

pub fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

pub fn project_json(id: i64, name: &str, status: &str, progress: u8) -> Value {
    json!({
        "id": id,
        "name": name,
        "status": status,
        "priority": "Medium",
        "progress": progress,
        "team": [],
        "tasks": { "total": 0, "completed": 0 }
    })
}

pub fn task_json(id: i64, title: &str, project_id: i64, status: &str, progress: u8) -> Value {
    json!({
        "id": id,
        "title": title,
        "project_id": project_id,
        "status": status,
        "priority": "Medium",
        "progress": progress,
        "tags": []
    })
}

/// Accept every activity log entry.
pub async fn accept_activity(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/activity-logs"))
        .respond_with(ok(json!({ "id": 1 })))
        .mount(server)
        .await;
}

/// JSON bodies the server received for `verb route`, oldest first.
pub async fn received_bodies(server: &MockServer, verb: &str, route: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.method.as_str() == verb && request.url.path() == route)
        .filter_map(|request| request.body_json::<Value>().ok())
        .collect()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
