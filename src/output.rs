//! Command output.
//!
//! A command builds one [`Report`] for people and hands its serializable
//! result alongside. `--json` prints only the result, wrapped with the
//! command name; the report is never part of the JSON.

use serde::Serialize;

use crate::error::{exit_codes, Error, Result};

pub const SCHEMA_VERSION: &str = "wipman.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Field(String, String),
    Line(String),
    Problem(String),
    Hint(String),
}

/// Human-readable result of a command, rendered in the order entries were added.
#[derive(Debug, Clone)]
pub struct Report {
    title: String,
    entries: Vec<Entry>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: Vec::new(),
        }
    }

    /// A `key  value` pair; keys are aligned when rendered.
    pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Entry::Field(key.into(), value.into()));
    }

    /// One listed item, such as a task or a view.
    pub fn line(&mut self, text: impl Into<String>) {
        self.entries.push(Entry::Line(text.into()));
    }

    pub fn problem(&mut self, text: impl Into<String>) {
        self.entries.push(Entry::Problem(text.into()));
    }

    /// A command worth running next.
    pub fn hint(&mut self, command: impl Into<String>) {
        self.entries.push(Entry::Hint(command.into()));
    }

    pub fn render(&self) -> String {
        let width = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Field(key, _) => Some(key.chars().count()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        let mut out = self.title.clone();
        for entry in &self.entries {
            out.push('\n');
            match entry {
                Entry::Field(key, value) if value.is_empty() => out.push_str(&format!("  {key}")),
                Entry::Field(key, value) => out.push_str(&format!("  {key:<width$}  {value}")),
                Entry::Line(text) => out.push_str(&format!("  - {text}")),
                Entry::Problem(text) => out.push_str(&format!("  ! {text}")),
                Entry::Hint(command) => out.push_str(&format!("  try: {command}")),
            }
        }
        out
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    report: &Report,
) -> Result<()> {
    if options.json {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "ok",
            data: Some(data),
            error: None,
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else if !options.quiet {
        println!("{}", report.render());
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let hint = hint_for(err);
    if json {
        let envelope: Envelope<'_, ()> = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(ErrorBody {
                kind: error_kind(err),
                code: err.exit_code(),
                message: err.to_string(),
                details: err.details(),
                hint,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = hint {
        eprintln!("  try: {hint}");
    }
    Ok(())
}

/// Command name for error output, read from argv since clap may have failed.
pub fn infer_command_name_from_args() -> String {
    let mut args = std::env::args()
        .skip(1)
        .filter(|arg| !arg.starts_with('-'));

    let Some(command) = args.next() else {
        return "wipman".to_string();
    };
    match (command.as_str(), args.next()) {
        ("task" | "view", Some(sub)) => format!("{command} {sub}"),
        _ => command,
    }
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::MALFORMED_FILE => "malformed_file",
        exit_codes::INVARIANT_VIOLATED => "invariant_violated",
        _ => "operation_failed",
    }
}

fn hint_for(err: &Error) -> Option<String> {
    let hint = match err {
        Error::NotAWipmanDir(_) => "wipman init".to_string(),
        Error::InvalidConfig(_) => "fix .wipman.toml and run again".to_string(),
        Error::Parse { path, .. } => format!("fix {} then run wipman verify", path.display()),
        Error::TaskNotFound(_) => "wipman task ls".to_string(),
        Error::ViewNotFound(_) => "wipman view ls".to_string(),
        Error::LockFailed(_) => "wait for the other wipman process to finish".to_string(),
        Error::InvalidSyncSequence { .. } => {
            "inspect the sync buffer (.changes_to_sync by default)".to_string()
        }
        Error::Invariant(_) => "wipman verify".to_string(),
        _ => return None,
    };
    Some(hint)
}
