use assert_cmd::Command;
use predicates::str::contains;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A command isolated from any config file on the host.
fn nexapro(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nexapro").expect("binary");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("NEXAPRO_CONFIG")
        .env_remove("NEXAPRO_GATEWAY")
        .env_remove("NEXAPRO_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn nexapro_help_works() {
    Command::cargo_bin("nexapro")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("project and task dashboard client"));
}

#[test]
fn subcommand_help_works() {
    let subcommands: [&[&str]; 8] = [
        &["project"],
        &["project", "list"],
        &["project", "edit"],
        &["task"],
        &["task", "new"],
        &["task", "edit"],
        &["stats"],
        &["users"],
    ];

    for cmd in subcommands {
        Command::cargo_bin("nexapro")
            .expect("binary")
            .args(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn empty_edit_is_a_user_error() {
    let home = tempfile::tempdir().expect("tempdir");
    nexapro(&home)
        .args(["--gateway", "http://127.0.0.1:9", "task", "edit", "3"])
        .assert()
        .code(2)
        .stderr(contains("nothing to change"));
}

#[test]
fn invalid_gateway_url_is_a_config_error() {
    let home = tempfile::tempdir().expect("tempdir");
    nexapro(&home)
        .args(["--gateway", "ftp://files.example.com", "project", "list"])
        .assert()
        .code(2)
        .stderr(contains("Invalid configuration"));
}

#[test]
fn unreachable_gateway_reports_json_error() {
    let home = tempfile::tempdir().expect("tempdir");
    nexapro(&home)
        .args(["--json", "--gateway", "http://127.0.0.1:9", "project", "list"])
        .assert()
        .code(4)
        .stdout(contains("\"status\": \"error\""))
        .stdout(contains("\"command\": \"project list\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn project_list_prints_reconciled_projects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [
                { "id": 1, "name": "Apollo", "status": "Planning", "progress": 40 },
                { "id": 2, "name": "Gemini", "status": "Completed", "progress": 10 }
            ]
        })))
        .mount(&server)
        .await;

    let home = tempfile::tempdir().expect("tempdir");
    nexapro(&home)
        .args(["--json", "--gateway", &server.uri(), "project", "list"])
        .assert()
        .success()
        .stdout(contains("\"status\": \"success\""))
        .stdout(contains("\"status\": \"In Progress\""))
        .stdout(contains("\"progress\": 100"))
        .stdout(contains("\"total\": 2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn member_cannot_create_tasks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let home = tempfile::tempdir().expect("tempdir");
    nexapro(&home)
        .args(["--gateway", &server.uri(), "task", "new", "Write docs", "--project", "1"])
        .assert()
        .code(3)
        .stderr(contains("Permission denied"));
}

#[test]
fn task_new_falls_back_offline_when_enabled() {
    let home = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        home.path().join(".nexapro.toml"),
        r#"
[gateway]
base_url = "http://127.0.0.1:9"

[session]
role = "admin"

[sync]
offline_fallback = true
"#,
    )
    .expect("write config");

    nexapro(&home)
        .args(["--json", "task", "new", "Write docs", "--project", "4"])
        .assert()
        .success()
        .stdout(contains("\"provisional\": true"))
        .stdout(contains("gateway unreachable"));
}
