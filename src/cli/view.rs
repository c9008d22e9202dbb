//! wipman view subcommands

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::{CommonOptions, Session};
use crate::error::{Error, Result};
use crate::model::View;
use crate::output::{emit_success, Report};

#[derive(Serialize)]
struct ViewSummary {
    id: String,
    title: String,
    tags: Vec<String>,
    tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

fn summarize(session: &Session, view: &View) -> ViewSummary {
    ViewSummary {
        id: view.id.clone(),
        title: view.title.clone(),
        tags: view.tags.iter().cloned().collect(),
        tasks: view.task_ids().len(),
        path: session
            .workspace
            .files()
            .view_path(&view.id)
            .map(|path| session.workspace.storage().relative(path).to_path_buf()),
    }
}

pub fn run_new(options: &CommonOptions, title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidArgument("title cannot be empty".to_string()));
    }

    let mut session = Session::open(options, true)?;
    let view = session.workspace.create_view(title)?;
    let summary = summarize(&session, &view);

    let mut human = Report::new("View created");
    human.field("ID", view.id.clone());
    human.field("Title", view.title.clone());
    if let Some(path) = &summary.path {
        human.field("File", path.display().to_string());
    }
    human.field("Tasks", summary.tasks.to_string());
    human.hint("set `tags=` in the view file to filter it");

    emit_success(options.output(), "view new", &summary, &human)
}

pub fn run_rm(options: &CommonOptions, id: &str) -> Result<()> {
    let mut session = Session::open(options, true)?;
    let view = session.workspace.delete_view(id)?;

    let mut human = Report::new("View deleted");
    human.field("ID", view.id.clone());
    human.field("Title", view.title.clone());

    #[derive(Serialize)]
    struct Removed {
        id: String,
        title: String,
    }
    emit_success(
        options.output(),
        "view rm",
        &Removed {
            id: view.id,
            title: view.title,
        },
        &human,
    )
}

pub fn run_list(options: &CommonOptions) -> Result<()> {
    let session = Session::open(options, false)?;
    let views: Vec<ViewSummary> = session
        .workspace
        .views()
        .all()
        .map(|view| summarize(&session, view))
        .collect();

    let mut human = Report::new(format!("{} view(s)", views.len()));
    for view in &views {
        let tags = if view.tags.is_empty() {
            "all tasks".to_string()
        } else {
            format!("tags={}", view.tags.join(","))
        };
        human.line(format!(
            "{} {} ({tags}, {} task(s))",
            view.id, view.title, view.tasks
        ));
    }

    emit_success(options.output(), "view ls", &views, &human)
}
