//! wipman save command implementation
//!
//! Editor integrations call this after the user saves a file.

use std::path::Path;

use serde::Serialize;

use crate::cli::{resolve_path, CommonOptions, Session};
use crate::error::Result;
use crate::events::Change;
use crate::output::{emit_success, Report};
use crate::workspace::SaveOutcome;

#[derive(Serialize)]
struct SaveReport {
    #[serde(flatten)]
    outcome: SaveOutcome,
    changes: usize,
}

pub fn run(options: &CommonOptions, path: &Path) -> Result<()> {
    let path = resolve_path(path)?;
    let mut session = Session::open(options, true)?;
    let outcome = session.workspace.on_save(&path)?;
    let journal = session.workspace.take_journal();

    let mut human = Report::new(describe(&outcome));
    human.field("path", path.display().to_string());
    for change in &journal {
        if let Change::File(file_change) = change {
            human.line(format!(
                "{} {}",
                file_change.name(),
                session
                    .workspace
                    .storage()
                    .relative(file_change.path())
                    .display()
            ));
        }
    }

    emit_success(
        options.output(),
        "save",
        &SaveReport {
            outcome,
            changes: journal.len(),
        },
        &human,
    )
}

pub(crate) fn describe(outcome: &SaveOutcome) -> String {
    match outcome {
        SaveOutcome::Ignored { .. } => "Ignored".to_string(),
        SaveOutcome::TaskAdded { id } => format!("Task {id} added"),
        SaveOutcome::TaskUpdated { id, changed: true } => format!("Task {id} updated"),
        SaveOutcome::TaskUpdated { id, changed: false } => format!("Task {id} unchanged"),
        SaveOutcome::TaskRemoved { id } => format!("Task {id} removed"),
        SaveOutcome::ViewAdded { id } => format!("View {id} added"),
        SaveOutcome::ViewUpdated { id } => format!("View {id} updated"),
        SaveOutcome::ViewRemoved { id } => format!("View {id} removed"),
    }
}
