//! wipman task subcommands

use serde::Serialize;

use crate::cli::{CommonOptions, Session};
use crate::error::{Error, Result};
use crate::model::{self, Task};
use crate::output::{emit_success, Report};
use crate::task::NewTask;

#[derive(Serialize)]
struct TaskSummary {
    id: String,
    title: String,
    tags: Vec<String>,
    completed: bool,
    views: Vec<String>,
}

fn summarize(session: &Session, task: &Task) -> TaskSummary {
    TaskSummary {
        id: task.id.clone(),
        title: task.title.clone(),
        tags: task.tags.iter().cloned().collect(),
        completed: task.completed,
        views: session
            .workspace
            .views()
            .views_by_task(&task.id)
            .into_iter()
            .map(|view| view.title.clone())
            .collect(),
    }
}

fn checkbox(completed: bool) -> &'static str {
    if completed {
        "[x]"
    } else {
        "[ ]"
    }
}

pub fn run_new(options: &CommonOptions, title: String, tags: Vec<String>) -> Result<()> {
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(Error::InvalidArgument("title cannot be empty".to_string()));
    }

    let mut session = Session::open(options, true)?;
    let new = NewTask::titled(title).with_tags(model::tags(
        tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()),
    ));
    let task = session.workspace.create_task(new)?;
    let summary = summarize(&session, &task);

    let mut human = Report::new("Task created");
    human.field("ID", task.id.clone());
    human.field("Title", task.title.clone());
    if !summary.tags.is_empty() {
        human.field("Tags", summary.tags.join(","));
    }
    human.field("Views", summary.views.join(", "));

    emit_success(options.output(), "task new", &summary, &human)
}

pub fn run_rm(options: &CommonOptions, id: &str) -> Result<()> {
    let mut session = Session::open(options, true)?;
    let shown_in: Vec<String> = session
        .workspace
        .views()
        .views_by_task(id)
        .into_iter()
        .map(|view| view.title.clone())
        .collect();
    let task = session.workspace.delete_task(id)?;

    let mut human = Report::new("Task deleted");
    human.field("ID", task.id.clone());
    human.field("Title", task.title.clone());
    for title in &shown_in {
        human.line(format!("removed from view {title}"));
    }

    #[derive(Serialize)]
    struct Removed {
        id: String,
        views: Vec<String>,
    }
    emit_success(
        options.output(),
        "task rm",
        &Removed {
            id: task.id,
            views: shown_in,
        },
        &human,
    )
}

pub fn run_list(options: &CommonOptions, tags: Vec<String>) -> Result<()> {
    let session = Session::open(options, false)?;
    let filter = model::tags(tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()));
    let tasks: Vec<TaskSummary> = session
        .workspace
        .tasks()
        .get_by_tags(&filter)
        .into_iter()
        .map(|task| summarize(&session, task))
        .collect();

    let mut human = Report::new(format!("{} task(s)", tasks.len()));
    for task in &tasks {
        let tags = if task.tags.is_empty() {
            String::new()
        } else {
            format!(" #{}", task.tags.join(" #"))
        };
        human.line(format!(
            "{} {} {}{}",
            checkbox(task.completed),
            task.id,
            task.title,
            tags
        ));
    }

    emit_success(options.output(), "task ls", &tasks, &human)
}
