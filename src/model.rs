//! Core data model: tasks, views and the lines a view renders.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;
pub type ViewId = String;
pub type Tag = String;
pub type Tags = BTreeSet<Tag>;

/// Reserved id of the Backlog view. Its tag set is always empty.
pub const BACKLOG_ID: &str = "0000000000";

/// Title given to tasks and views created without one.
pub const UNTITLED: &str = "untitled";

/// An atomic work item backed by one task file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub tags: Tags,
    /// Tasks that must be done before this one.
    pub blocked_by: BTreeSet<TaskId>,
    /// Tasks waiting on this one.
    pub blocks: BTreeSet<TaskId>,
    pub completed: bool,
}

/// One checkbox entry inside a view.
///
/// `title` caches the task title as of the last sync. A line without an id is
/// a task the user typed inline that has not been promoted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLine {
    pub completed: bool,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
}

impl ViewLine {
    pub fn for_task(task: &Task) -> Self {
        Self {
            completed: task.completed,
            title: task.title.clone(),
            id: Some(task.id.clone()),
        }
    }

    pub fn unlinked(title: impl Into<String>, completed: bool) -> Self {
        Self {
            completed,
            title: title.into(),
            id: None,
        }
    }
}

/// A named, tag-filtered, ordered listing of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub title: String,
    pub tags: Tags,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub content: Vec<ViewLine>,
}

impl View {
    pub fn is_backlog(&self) -> bool {
        self.id == BACKLOG_ID
    }

    /// The line that shows `task_id`, if any.
    pub fn line(&self, task_id: &str) -> Option<&ViewLine> {
        self.content
            .iter()
            .find(|line| line.id.as_deref() == Some(task_id))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.line(task_id).is_some()
    }

    /// Ids of every linked line, in content order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.content
            .iter()
            .filter_map(|line| line.id.clone())
            .collect()
    }

    /// Ids linked by more than one line, each reported once.
    pub fn duplicate_task_ids(&self) -> Vec<TaskId> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for task_id in self.content.iter().filter_map(|line| line.id.as_ref()) {
            if !seen.insert(task_id) && !duplicates.contains(task_id) {
                duplicates.push(task_id.clone());
            }
        }
        duplicates
    }
}

/// Membership predicate: an empty view tag set matches every task, otherwise
/// the tag sets must be equal.
pub fn should_include(view_tags: &Tags, task_tags: &Tags) -> bool {
    view_tags.is_empty() || view_tags == task_tags
}

/// Current time at the precision files store it.
pub fn now() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Build a tag set from anything iterable.
pub fn tags<I, S>(items: I) -> Tags
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_view_tags_match_everything() {
        assert!(should_include(&Tags::new(), &tags(["a", "b"])));
        assert!(should_include(&Tags::new(), &Tags::new()));
    }

    #[test]
    fn tagged_views_require_exact_tag_equality() {
        let view = tags(["a", "b"]);
        assert!(should_include(&view, &tags(["b", "a"])));
        assert!(!should_include(&view, &tags(["a"])));
        assert!(!should_include(&view, &tags(["a", "b", "c"])));
        assert!(!should_include(&tags(["a"]), &Tags::new()));
    }

    #[test]
    fn duplicate_task_ids_are_reported_once() {
        let linked = |id: &str| ViewLine {
            completed: false,
            title: "t".to_string(),
            id: Some(id.to_string()),
        };
        let view = View {
            id: BACKLOG_ID.to_string(),
            title: "Backlog".to_string(),
            tags: Tags::new(),
            created: now(),
            updated: now(),
            content: vec![
                linked("aaaaaaaaaa"),
                ViewLine::unlinked("t", false),
                linked("aaaaaaaaaa"),
                ViewLine::unlinked("t", false),
                linked("aaaaaaaaaa"),
                linked("bbbbbbbbbb"),
            ],
        };
        assert_eq!(view.duplicate_task_ids(), vec!["aaaaaaaaaa".to_string()]);
    }

    #[test]
    fn now_has_millisecond_precision() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
