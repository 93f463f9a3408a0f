use nexapro::error::{exit_codes, Error, JsonError};

#[test]
fn exit_codes_map_correctly() {
    let user = Error::Validation("project name cannot be empty".to_string());
    assert_eq!(user.exit_code(), exit_codes::USER_ERROR);

    let policy = Error::PermissionDenied {
        role: "member".to_string(),
        permission: "manage_projects".to_string(),
    };
    assert_eq!(policy.exit_code(), exit_codes::POLICY_BLOCKED);

    let op = Error::Http {
        status: 500,
        message: "Internal Server Error".to_string(),
    };
    assert_eq!(op.exit_code(), exit_codes::OPERATION_FAILED);
    assert_eq!(Error::Cancelled.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn json_error_includes_code_and_details() {
    let err = Error::NotFound {
        kind: "task",
        id: 42,
    };
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert!(json.error.contains("task not found: 42"));
    assert_eq!(
        json.details,
        Some(serde_json::json!({ "kind": "task", "id": 42 }))
    );
}

#[test]
fn transport_classification() {
    let http = Error::Http {
        status: 404,
        message: "Not Found".to_string(),
    };
    assert!(http.is_transport());
    assert!(!http.is_offline());
    assert!(Error::Rejected("nope".to_string()).is_transport());
    assert!(!Error::Validation("bad".to_string()).is_transport());
    assert!(!Error::Cancelled.is_offline());
}
