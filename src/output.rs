//! CLI output: a versioned JSON envelope for `--json`, plain sectioned text
//! otherwise.

use std::fmt;

use serde::Serialize;

use crate::error::{exit_codes, Error, Result};

pub const SCHEMA_VERSION: &str = "nexapro.v1";

/// Global flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &["--config", "--gateway", "--token", "--events"];

/// Commands whose first positional argument is a subcommand.
const COMMAND_GROUPS: &[&str] = &["project", "task"];

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human rendering of a command result: a header line followed by optional
/// `Summary`, `Details`, `Warnings` and `Next steps` sections.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    /// An empty value renders as a bare key.
    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

impl fmt::Display for HumanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header)?;
        if !self.summary.is_empty() {
            f.write_str("\n\nSummary:")?;
            for (key, value) in &self.summary {
                if value.is_empty() {
                    write!(f, "\n- {key}")?;
                } else {
                    write!(f, "\n- {key}: {value}")?;
                }
            }
        }
        for (title, items) in [
            ("Details", &self.details),
            ("Warnings", &self.warnings),
            ("Next steps", &self.next_steps),
        ] {
            if items.is_empty() {
                continue;
            }
            write!(f, "\n\n{title}:")?;
            for item in items {
                write!(f, "\n- {item}")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Success,
    Error,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    warnings: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    next_steps: &'a [String],
}

impl<T: Serialize> Envelope<'_, T> {
    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(self)?);
        Ok(())
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        return Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Success,
            data: Some(data),
            error: None,
            warnings: human.map_or(&[][..], |h| h.warnings.as_slice()),
            next_steps: human.map_or(&[][..], |h| h.next_steps.as_slice()),
        }
        .print();
    }
    if let Some(human) = human.filter(|_| !options.quiet) {
        println!("{human}");
    }
    Ok(())
}

/// Report a failed command. JSON goes to stdout so scripts read one stream.
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let hints = error_hints(err);
    if json {
        return Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Error,
            data: None,
            error: Some(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: error_kind(err),
                details: err.details(),
            }),
            warnings: &[],
            next_steps: &hints,
        }
        .print();
    }
    eprintln!("error: {err}");
    if let Some(hint) = hints.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

/// Best-effort command name for error envelopes, read from raw arguments
/// because clap may have rejected them.
pub fn infer_command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut args = args.into_iter();
    let mut words: Vec<String> = Vec::new();
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
        } else if !arg.starts_with('-') {
            let grouped = words.is_empty() && COMMAND_GROUPS.contains(&arg.as_str());
            words.push(arg);
            if !grouped {
                break;
            }
        }
    }
    if words.is_empty() {
        "nexapro".to_string()
    } else {
        words.join(" ")
    }
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::POLICY_BLOCKED => "policy_blocked",
        _ => "operation_failed",
    }
}

fn error_hints(err: &Error) -> Vec<String> {
    let hint = match err {
        Error::InvalidConfig(_) => "fix .nexapro.toml then retry".to_string(),
        Error::NotFound { kind, .. } => format!("nexapro {kind} list"),
        Error::Provisional { kind, .. } => {
            format!("retry once the gateway is reachable, then nexapro {kind} list")
        }
        Error::PermissionDenied { permission, .. } => format!("ask an admin to grant {permission}"),
        Error::Transport(_) => "check gateway.base_url or pass --gateway <url>".to_string(),
        Error::Http {
            status: 401 | 403, ..
        } => "pass a valid token with --token or NEXAPRO_TOKEN".to_string(),
        _ => return Vec::new(),
    };
    vec![hint]
}
