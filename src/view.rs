//! View store.
//!
//! Owns every view plus the `task id -> view ids` membership index, and keeps
//! view content consistent with the task store by reacting to its changes.
//! Edits made to a view (a saved view file) never touch the task store
//! directly: [`ViewStore::update`] returns the [`TaskCommand`]s to run, and
//! the workspace runs them so the task store's own change feed fans the
//! result back out to every view.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::ChangeFeed;
use crate::id;
use crate::model::{
    self, should_include, Tags, Task, TaskId, View, ViewId, ViewLine, BACKLOG_ID, UNTITLED,
};
use crate::task::{NewTask, TaskChange, TaskStore, TaskUpdate};

pub const BACKLOG_TITLE: &str = "Backlog";

/// A fresh Backlog view, as written by `init`.
pub fn new_backlog() -> View {
    let now = model::now();
    View {
        id: BACKLOG_ID.to_string(),
        title: BACKLOG_TITLE.to_string(),
        tags: Tags::new(),
        created: now,
        updated: now,
        content: Vec::new(),
    }
}

/// Change records published by the view store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewChange {
    ViewAdded {
        view_id: ViewId,
    },
    TaskAddedToView {
        view_id: ViewId,
        task_id: TaskId,
    },
    TaskRemovedFromView {
        view_id: ViewId,
        task_id: TaskId,
    },
    /// The line for `task_id` was patched in place.
    TaskUpdatedInlineInView {
        view_id: ViewId,
        task_id: TaskId,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<bool>,
    },
    ViewTagsUpdated {
        view_id: ViewId,
    },
    ViewDeleted {
        view_id: ViewId,
    },
}

impl ViewChange {
    pub fn name(&self) -> &'static str {
        match self {
            ViewChange::ViewAdded { .. } => "view_added",
            ViewChange::TaskAddedToView { .. } => "task_added_to_view",
            ViewChange::TaskRemovedFromView { .. } => "task_removed_from_view",
            ViewChange::TaskUpdatedInlineInView { .. } => "task_updated_inline_in_view",
            ViewChange::ViewTagsUpdated { .. } => "view_tags_updated",
            ViewChange::ViewDeleted { .. } => "view_deleted",
        }
    }

    pub fn view_id(&self) -> &str {
        match self {
            ViewChange::ViewAdded { view_id }
            | ViewChange::TaskAddedToView { view_id, .. }
            | ViewChange::TaskRemovedFromView { view_id, .. }
            | ViewChange::TaskUpdatedInlineInView { view_id, .. }
            | ViewChange::ViewTagsUpdated { view_id }
            | ViewChange::ViewDeleted { view_id } => view_id,
        }
    }
}

/// A task-store call requested by a view edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    /// A line typed without an id becomes a task carrying the view's tags.
    Create(NewTask),
    /// Title or status edited inline.
    Patch {
        id: TaskId,
        title: String,
        completed: bool,
    },
    /// The line was deleted from the view: the task goes away everywhere.
    Remove(TaskId),
}

/// What changed between two versions of a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewDiff {
    pub new_tags: Option<Tags>,
    pub create_without_id: Vec<ViewLine>,
    /// Lines carrying an id the view never showed.
    pub create_with_id: Vec<ViewLine>,
    pub update: Vec<ViewLine>,
    pub delete: Vec<ViewLine>,
}

impl ViewDiff {
    pub fn has_changes(&self) -> bool {
        self.new_tags.is_some()
            || !self.create_without_id.is_empty()
            || !self.create_with_id.is_empty()
            || !self.update.is_empty()
            || !self.delete.is_empty()
    }
}

/// Classify every line of `after` against `before`.
///
/// A task id listed twice in `after` is rejected.
pub fn diff_views(before: &View, after: &View) -> Result<ViewDiff> {
    let previous: HashMap<&str, &ViewLine> = before
        .content
        .iter()
        .filter_map(|line| line.id.as_deref().map(|id| (id, line)))
        .collect();

    let mut diff = ViewDiff::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for line in &after.content {
        let Some(task_id) = line.id.as_deref() else {
            diff.create_without_id.push(line.clone());
            continue;
        };
        if !seen.insert(task_id) {
            return Err(Error::invariant(format!(
                "a task id should never appear more than once in a view, but {task_id} is listed twice in view {}",
                after.id
            )));
        }
        match previous.get(task_id) {
            None => diff.create_with_id.push(line.clone()),
            Some(old) if old.title != line.title || old.completed != line.completed => {
                diff.update.push(line.clone())
            }
            Some(_) => {}
        }
    }

    for line in &before.content {
        if let Some(task_id) = line.id.as_deref() {
            if !seen.contains(task_id) {
                diff.delete.push(line.clone());
            }
        }
    }

    if before.tags != after.tags {
        diff.new_tags = Some(after.tags.clone());
    }

    Ok(diff)
}

/// Content a view with `tags` must show: matching listed lines in their
/// current order, then matching tasks not listed yet, oldest first.
fn reconcile_content(lines: &[ViewLine], tags: &Tags, tasks: &TaskStore) -> Vec<ViewLine> {
    let mut listed: HashSet<TaskId> = HashSet::new();
    let mut content = Vec::new();
    for line in lines {
        let Some(task_id) = &line.id else { continue };
        let Some(task) = tasks.get(task_id) else { continue };
        if should_include(tags, &task.tags) && listed.insert(task_id.clone()) {
            content.push(line.clone());
        }
    }
    for task in tasks.get_by_tags(tags) {
        if should_include(tags, &task.tags) && !listed.contains(&task.id) {
            content.push(ViewLine::for_task(task));
        }
    }
    content
}

#[derive(Debug, Default)]
pub struct ViewStore {
    views: BTreeMap<ViewId, View>,
    views_by_task: HashMap<TaskId, BTreeSet<ViewId>>,
    changes: ChangeFeed<ViewChange>,
}

impl ViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a view with empty tags. It matches every task, so its content
    /// is every task that exists right now.
    pub fn add(&mut self, title: &str, tasks: &TaskStore) -> View {
        let id = id::generate_unique_id(|candidate| {
            candidate == BACKLOG_ID || self.views.contains_key(candidate)
        });
        let title = if title == UNTITLED {
            format!("{UNTITLED}-{id}")
        } else {
            title.to_string()
        };
        let now = model::now();
        let view = View {
            id: id.clone(),
            title,
            tags: Tags::new(),
            created: now,
            updated: now,
            content: tasks.all().into_iter().map(ViewLine::for_task).collect(),
        };

        for task_id in view.task_ids() {
            self.index(&task_id, &id);
        }
        self.views.insert(id.clone(), view.clone());
        tracing::info!(view_id = %id, title = %view.title, "view added");
        self.changes.publish(ViewChange::ViewAdded { view_id: id });
        view
    }

    /// Apply a user edit of a whole view and return the task commands it implies.
    ///
    /// Metadata and tag changes are applied here; content edits are not. Each
    /// line without an id becomes a [`TaskCommand::Create`], each edited line
    /// a [`TaskCommand::Patch`], and each deleted line a
    /// [`TaskCommand::Remove`]. Deleting a line deletes the task globally,
    /// from every view, even when the edit happened in a view other than the
    /// Backlog.
    pub fn update(&mut self, view: View, tasks: &TaskStore) -> Result<Vec<TaskCommand>> {
        let previous = self
            .views
            .get(&view.id)
            .ok_or_else(|| Error::ViewNotFound(view.id.clone()))?;

        let diff = diff_views(previous, &view)?;
        if !diff.has_changes() {
            tracing::debug!(view_id = %view.id, "view unchanged, nothing to do");
            return Ok(Vec::new());
        }
        tracing::debug!(view_id = %view.id, diff = ?diff, "view diff");

        if diff.new_tags.is_some() && previous.is_backlog() {
            return Err(Error::invariant("the Backlog view must never have tags"));
        }

        let mut updated = View {
            content: previous.content.clone(),
            ..view
        };

        if diff.new_tags.is_some() {
            updated.content = reconcile_content(&updated.content, &updated.tags, tasks);
            self.unindex_view(&updated.id);
            for task_id in updated.task_ids() {
                self.index(&task_id, &updated.id);
            }
            tracing::info!(view_id = %updated.id, tags = ?updated.tags, "view tags updated");
            let view_id = updated.id.clone();
            self.views.insert(view_id.clone(), updated.clone());
            self.changes.publish(ViewChange::ViewTagsUpdated { view_id });
        } else {
            self.views.insert(updated.id.clone(), updated.clone());
        }

        let mut commands = Vec::new();
        for line in diff.create_without_id {
            commands.push(TaskCommand::Create(
                NewTask::titled(line.title)
                    .with_tags(updated.tags.clone())
                    .completed(line.completed),
            ));
        }
        for line in diff.create_with_id.into_iter().chain(diff.update) {
            let Some(id) = line.id else { continue };
            if !tasks.contains(&id) {
                tracing::warn!(view_id = %updated.id, task_id = %id, "view lists an unknown task, ignoring line");
                continue;
            }
            commands.push(TaskCommand::Patch {
                id,
                title: line.title,
                completed: line.completed,
            });
        }
        for line in diff.delete {
            if let Some(id) = line.id {
                commands.push(TaskCommand::Remove(id));
            }
        }
        Ok(commands)
    }

    /// Delete a view. The Backlog cannot be deleted.
    pub fn remove(&mut self, id: &str) -> Result<Option<View>> {
        if id == BACKLOG_ID {
            return Err(Error::InvalidArgument(
                "the Backlog view cannot be deleted".to_string(),
            ));
        }
        let Some(view) = self.views.remove(id) else {
            return Ok(None);
        };
        self.unindex_view(id);
        tracing::info!(view_id = %id, "view removed");
        self.changes.publish(ViewChange::ViewDeleted {
            view_id: id.to_string(),
        });
        Ok(Some(view))
    }

    pub fn get(&self, id: &str) -> Option<&View> {
        self.views.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.views.contains_key(id)
    }

    /// Every view, by id. The Backlog sorts first.
    pub fn all(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Views currently showing `task_id`.
    pub fn views_by_task(&self, task_id: &str) -> Vec<&View> {
        self.views_by_task
            .get(task_id)
            .map(|ids| ids.iter().filter_map(|id| self.views.get(id)).collect())
            .unwrap_or_default()
    }

    /// Load views, replacing any with the same id, and rebuild membership.
    ///
    /// Content is kept exactly as read, so a later edit of the file is diffed
    /// against what the file said. Membership comes from the tag predicate:
    /// a view is indexed for every task it should show, listed or not. With
    /// `publish`, a [`ViewChange::ViewAdded`] is announced per view.
    pub fn bulk_load(&mut self, views: Vec<View>, publish: bool, tasks: &TaskStore) {
        let count = views.len();
        for view in views {
            let view_id = view.id.clone();
            self.unindex_view(&view_id);
            for task in tasks.all() {
                if should_include(&view.tags, &task.tags) {
                    self.index(&task.id, &view_id);
                }
            }
            self.views.insert(view_id.clone(), view);
            if publish {
                self.changes.publish(ViewChange::ViewAdded { view_id });
            }
        }
        tracing::debug!(count, publish, "bulk loaded views");
    }

    /// Rewrite a view's content to exactly what its tags select: listed
    /// lines of matching tasks keep their order and text, missing matching
    /// tasks are appended, everything else is dropped. Nothing is announced;
    /// the caller brings the file in line.
    pub fn normalize(&mut self, view_id: &str, tasks: &TaskStore) -> Option<View> {
        let view = self.views.get_mut(view_id)?;
        let content = reconcile_content(&view.content, &view.tags, tasks);
        if content != view.content {
            tracing::debug!(view_id = %view_id, "normalized view content");
            view.content = content;
        }
        let view = view.clone();
        self.unindex_view(view_id);
        for task_id in view.task_ids() {
            self.index(&task_id, view_id);
        }
        Some(view)
    }

    /// Views that index `task_id` or still list it in their content.
    fn showing(&self, task_id: &str) -> Vec<ViewId> {
        let indexed = self.views_by_task.get(task_id);
        self.views
            .values()
            .filter(|view| {
                indexed.is_some_and(|ids| ids.contains(&view.id)) || view.contains(task_id)
            })
            .map(|view| view.id.clone())
            .collect()
    }

    /// React to a task store change, keeping every view's content in line
    /// with its tag predicate.
    pub fn handle_task_change(&mut self, change: &TaskChange, tasks: &TaskStore) -> Result<()> {
        match change {
            TaskChange::TaskAdded { id } => {
                let task = tasks.get(id).ok_or_else(|| {
                    Error::invariant(format!("task {id} was added but is not in the task store"))
                })?;
                self.handle_task_added(task);
                Ok(())
            }
            TaskChange::TaskUpdated { id, changes } => {
                let task = tasks.get(id).ok_or_else(|| {
                    Error::invariant(format!("task {id} was updated but is not in the task store"))
                })?;
                self.handle_task_updated(task, changes);
                Ok(())
            }
            TaskChange::TaskDeleted { id } => {
                self.handle_task_deleted(id);
                Ok(())
            }
        }
    }

    fn handle_task_added(&mut self, task: &Task) {
        let matching: Vec<ViewId> = self
            .views
            .values()
            .filter(|view| should_include(&view.tags, &task.tags))
            .map(|view| view.id.clone())
            .collect();
        for view_id in matching {
            self.append_line(&view_id, task);
        }
    }

    fn handle_task_updated(&mut self, task: &Task, changes: &TaskUpdate) {
        let shown = self.showing(&task.id);

        // Views that already showed the task: drop it or patch it in place.
        for view_id in &shown {
            let Some(view) = self.views.get_mut(view_id) else {
                continue;
            };

            if !should_include(&view.tags, &task.tags) {
                view.content.retain(|line| line.id.as_deref() != Some(task.id.as_str()));
                self.unindex(&task.id, view_id);
                tracing::debug!(view_id = %view_id, task_id = %task.id, "task no longer matches view");
                self.changes.publish(ViewChange::TaskRemovedFromView {
                    view_id: view_id.clone(),
                    task_id: task.id.clone(),
                });
                continue;
            }

            let Some(line) = view
                .content
                .iter_mut()
                .find(|line| line.id.as_deref() == Some(task.id.as_str()))
            else {
                tracing::warn!(view_id = %view_id, task_id = %task.id, "indexed task missing from view content, appending");
                self.append_line(view_id, task);
                continue;
            };

            let title = changes
                .title
                .as_ref()
                .filter(|title| **title != line.title)
                .cloned();
            let completed = changes
                .completed
                .filter(|completed| *completed != line.completed);
            if title.is_none() && completed.is_none() {
                continue;
            }
            if let Some(title) = &title {
                line.title = title.clone();
            }
            if let Some(completed) = completed {
                line.completed = completed;
            }
            tracing::debug!(view_id = %view_id, task_id = %task.id, "task patched inline");
            self.changes.publish(ViewChange::TaskUpdatedInlineInView {
                view_id: view_id.clone(),
                task_id: task.id.clone(),
                title,
                completed,
            });
        }

        // Views that did not show the task may have to start showing it.
        let shown: HashSet<&ViewId> = shown.iter().collect();
        let entering: Vec<ViewId> = self
            .views
            .values()
            .filter(|view| !shown.contains(&view.id))
            .filter(|view| should_include(&view.tags, &task.tags))
            .map(|view| view.id.clone())
            .collect();
        for view_id in entering {
            self.append_line(&view_id, task);
        }
    }

    fn handle_task_deleted(&mut self, task_id: &str) {
        let shown = self.showing(task_id);
        self.views_by_task.remove(task_id);
        for view_id in shown {
            if let Some(view) = self.views.get_mut(&view_id) {
                view.content.retain(|line| line.id.as_deref() != Some(task_id));
            }
            tracing::debug!(view_id = %view_id, task_id = %task_id, "deleted task removed from view");
            self.changes.publish(ViewChange::TaskRemovedFromView {
                view_id,
                task_id: task_id.to_string(),
            });
        }
    }

    fn append_line(&mut self, view_id: &str, task: &Task) {
        let Some(view) = self.views.get_mut(view_id) else {
            return;
        };
        if !view.contains(&task.id) {
            view.content.push(ViewLine::for_task(task));
        }
        self.index(&task.id, view_id);
        tracing::debug!(view_id = %view_id, task_id = %task.id, "task appended to view");
        self.changes.publish(ViewChange::TaskAddedToView {
            view_id: view_id.to_string(),
            task_id: task.id.clone(),
        });
    }

    /// `task id -> view ids`, sorted, for snapshots.
    pub fn membership_index(&self) -> BTreeMap<TaskId, Vec<ViewId>> {
        self.views_by_task
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(task_id, ids)| (task_id.clone(), ids.iter().cloned().collect()))
            .collect()
    }

    /// Task ids listed by each view, in content order.
    pub fn tasks_per_view(&self) -> BTreeMap<ViewId, Vec<TaskId>> {
        self.views
            .values()
            .map(|view| (view.id.clone(), view.task_ids()))
            .collect()
    }

    pub fn changes(&mut self) -> &mut ChangeFeed<ViewChange> {
        &mut self.changes
    }

    fn index(&mut self, task_id: &str, view_id: &str) {
        self.views_by_task
            .entry(task_id.to_string())
            .or_default()
            .insert(view_id.to_string());
    }

    fn unindex(&mut self, task_id: &str, view_id: &str) {
        if let Some(ids) = self.views_by_task.get_mut(task_id) {
            ids.remove(view_id);
            if ids.is_empty() {
                self.views_by_task.remove(task_id);
            }
        }
    }

    fn unindex_view(&mut self, view_id: &str) {
        self.views_by_task.retain(|_, ids| {
            ids.remove(view_id);
            !ids.is_empty()
        });
    }
}
