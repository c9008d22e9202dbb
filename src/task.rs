//! Task store.
//!
//! Owns every task in memory plus the `tag -> task ids` index. Mutations are
//! diff-gated: an update that changes nothing publishes nothing, which is
//! what lets the sync cascade settle instead of looping.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::ChangeFeed;
use crate::id;
use crate::model::{self, Tag, Tags, Task, TaskId, UNTITLED};

/// Arguments for [`TaskStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub tags: Tags,
    pub completed: bool,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tags: Tags::new(),
            completed: false,
        }
    }

    pub fn untitled() -> Self {
        Self::titled(UNTITLED)
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

/// Fields that differ between two versions of a task. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<BTreeSet<TaskId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<BTreeSet<TaskId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.blocked_by.is_none()
            && self.blocks.is_none()
            && self.completed.is_none()
    }
}

/// Field-level diff of two versions of the same task.
///
/// `updated` is bookkeeping and never part of the diff. A different `created`
/// means the caller corrupted the task.
pub fn diff_tasks(before: &Task, after: &Task) -> Result<TaskUpdate> {
    if before.id != after.id {
        return Err(Error::invariant(format!(
            "cannot diff task {} against task {}",
            before.id, after.id
        )));
    }
    if before.created != after.created {
        return Err(Error::invariant(format!(
            "task {} 'created' must never change ({} -> {})",
            before.id, before.created, after.created
        )));
    }

    fn changed<T: PartialEq + Clone>(before: &T, after: &T) -> Option<T> {
        (before != after).then(|| after.clone())
    }

    Ok(TaskUpdate {
        title: changed(&before.title, &after.title),
        content: changed(&before.content, &after.content),
        tags: changed(&before.tags, &after.tags),
        blocked_by: changed(&before.blocked_by, &after.blocked_by),
        blocks: changed(&before.blocks, &after.blocks),
        completed: changed(&before.completed, &after.completed),
    })
}

/// Change records published by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskChange {
    TaskAdded { id: TaskId },
    TaskUpdated { id: TaskId, changes: TaskUpdate },
    TaskDeleted { id: TaskId },
}

impl TaskChange {
    pub fn name(&self) -> &'static str {
        match self {
            TaskChange::TaskAdded { .. } => "task_added",
            TaskChange::TaskUpdated { .. } => "task_updated",
            TaskChange::TaskDeleted { .. } => "task_deleted",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            TaskChange::TaskAdded { id }
            | TaskChange::TaskUpdated { id, .. }
            | TaskChange::TaskDeleted { id } => id,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    by_tag: HashMap<Tag, BTreeSet<TaskId>>,
    changes: ChangeFeed<TaskChange>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task with a fresh id and `created = updated = now`.
    pub fn add(&mut self, new: NewTask) -> Task {
        let id = id::generate_unique_id(|candidate| self.tasks.contains_key(candidate));
        let now = model::now();
        let task = Task {
            id: id.clone(),
            title: new.title,
            content: String::new(),
            created: now,
            updated: now,
            tags: new.tags,
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            completed: new.completed,
        };

        self.index(&task);
        self.tasks.insert(id.clone(), task.clone());
        tracing::info!(task_id = %id, title = %task.title, "task added");
        self.changes.publish(TaskChange::TaskAdded { id });
        task
    }

    /// Replace a stored task, publishing only the fields that changed.
    ///
    /// Returns whether anything changed. Updating an unknown task is a bug in
    /// the caller.
    pub fn update(&mut self, task: Task) -> Result<bool> {
        let previous = self.tasks.get(&task.id).ok_or_else(|| {
            Error::invariant(format!("cannot update task {}: not in the store", task.id))
        })?;

        let changes = diff_tasks(previous, &task)?;
        if changes.is_empty() {
            tracing::debug!(task_id = %task.id, "task unchanged, nothing to publish");
            return Ok(false);
        }

        if changes.tags.is_some() {
            let previous = previous.clone();
            self.unindex(&previous);
            self.index(&task);
        }

        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        tracing::info!(task_id = %id, changes = ?changes, "task updated");
        self.changes.publish(TaskChange::TaskUpdated { id, changes });
        Ok(true)
    }

    /// Remove a task. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let task = self.tasks.remove(id)?;
        self.unindex(&task);
        tracing::info!(task_id = %id, "task removed");
        self.changes.publish(TaskChange::TaskDeleted { id: id.to_string() });
        Some(task)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every task, oldest first.
    pub fn all(&self) -> Vec<&Task> {
        sorted(self.tasks.values())
    }

    /// Tasks carrying `tag`; unknown tags yield nothing.
    pub fn get_by_tag(&self, tag: &str) -> Vec<&Task> {
        match self.by_tag.get(tag) {
            Some(ids) => sorted(ids.iter().filter_map(|id| self.tasks.get(id))),
            None => Vec::new(),
        }
    }

    /// Tasks carrying every tag in `tags`. An empty `tags` selects all tasks.
    pub fn get_by_tags(&self, tags: &Tags) -> Vec<&Task> {
        let mut sets = tags.iter().map(|tag| self.by_tag.get(tag));
        let Some(first) = sets.next() else {
            return self.all();
        };
        let Some(first) = first else {
            return Vec::new();
        };

        let mut ids: BTreeSet<&TaskId> = first.iter().collect();
        for set in sets {
            match set {
                Some(set) => ids.retain(|id| set.contains(*id)),
                None => return Vec::new(),
            }
        }
        sorted(ids.into_iter().filter_map(|id| self.tasks.get(id)))
    }

    /// Insert many tasks at once, replacing any with the same id.
    ///
    /// With `publish == false` nothing is announced; this is the bootstrap
    /// path, where announcing every pre-existing file would rewrite them all.
    pub fn bulk_load(&mut self, tasks: Vec<Task>, publish: bool) {
        let count = tasks.len();
        for task in tasks {
            if let Some(previous) = self.tasks.remove(&task.id) {
                self.unindex(&previous);
            }
            self.index(&task);
            let id = task.id.clone();
            self.tasks.insert(id.clone(), task);
            if publish {
                self.changes.publish(TaskChange::TaskAdded { id });
            }
        }
        tracing::debug!(count, publish, "bulk loaded tasks");
    }

    /// `tag -> task ids`, sorted, for snapshots.
    pub fn tag_index(&self) -> BTreeMap<Tag, Vec<TaskId>> {
        self.by_tag
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(tag, ids)| (tag.clone(), ids.iter().cloned().collect()))
            .collect()
    }

    pub fn changes(&mut self) -> &mut ChangeFeed<TaskChange> {
        &mut self.changes
    }

    fn index(&mut self, task: &Task) {
        for tag in &task.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(task.id.clone());
        }
    }

    fn unindex(&mut self, task: &Task) {
        for tag in &task.tags {
            if let Some(ids) = self.by_tag.get_mut(tag) {
                ids.remove(&task.id);
                if ids.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }
}

fn sorted<'a>(tasks: impl Iterator<Item = &'a Task>) -> Vec<&'a Task> {
    let mut tasks: Vec<&Task> = tasks.collect();
    tasks.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tags;

    fn ids(tasks: Vec<&Task>) -> Vec<String> {
        tasks.into_iter().map(|task| task.id.clone()).collect()
    }

    #[test]
    fn add_stamps_defaults_and_publishes() {
        let mut store = TaskStore::new();
        let task = store.add(NewTask::untitled());

        assert_eq!(task.title, "untitled");
        assert!(!task.completed);
        assert!(task.tags.is_empty() && task.blocked_by.is_empty() && task.blocks.is_empty());
        assert_eq!(task.created, task.updated);
        assert!(id::is_valid_id(&task.id));
        assert_eq!(
            store.changes().drain(),
            vec![TaskChange::TaskAdded { id: task.id.clone() }]
        );
    }

    #[test]
    fn tag_index_follows_updates() {
        let mut store = TaskStore::new();
        let task = store.add(NewTask::titled("t").with_tags(tags(["a", "b"])));
        assert_eq!(ids(store.get_by_tag("a")), vec![task.id.clone()]);

        let mut edited = task.clone();
        edited.tags = tags(["b", "c"]);
        assert!(store.update(edited).expect("update"));

        assert!(store.get_by_tag("a").is_empty());
        assert_eq!(ids(store.get_by_tag("b")), vec![task.id.clone()]);
        assert_eq!(ids(store.get_by_tag("c")), vec![task.id.clone()]);
        assert!(store.get_by_tag("unknown").is_empty());

        store.remove(&task.id);
        assert!(store.get_by_tag("b").is_empty());
        assert!(store.tag_index().is_empty());
    }

    #[test]
    fn update_publishes_only_changed_fields() {
        let mut store = TaskStore::new();
        let task = store.add(NewTask::titled("before"));
        store.changes().drain();

        let mut edited = task.clone();
        edited.title = "after".to_string();
        edited.completed = true;
        store.update(edited).expect("update");

        let published = store.changes().drain();
        assert_eq!(
            published,
            vec![TaskChange::TaskUpdated {
                id: task.id.clone(),
                changes: TaskUpdate {
                    title: Some("after".to_string()),
                    completed: Some(true),
                    ..TaskUpdate::default()
                },
            }]
        );
    }

    #[test]
    fn identical_update_is_silent() {
        let mut store = TaskStore::new();
        let task = store.add(NewTask::titled("same").with_tags(tags(["x"])));
        store.changes().drain();

        assert!(!store.update(task.clone()).expect("update"));
        assert!(store.changes().is_empty());
        assert_eq!(ids(store.get_by_tag("x")), vec![task.id]);
    }

    #[test]
    fn updated_timestamp_alone_is_not_a_change() {
        let mut store = TaskStore::new();
        let task = store.add(NewTask::titled("t"));
        store.changes().drain();

        let mut touched = task.clone();
        touched.updated = touched.updated + chrono::Duration::seconds(5);
        assert!(!store.update(touched).expect("update"));
        assert!(store.changes().is_empty());
    }

    #[test]
    fn changing_created_is_an_invariant_violation() {
        let mut store = TaskStore::new();
        let task = store.add(NewTask::titled("t"));

        let mut corrupted = task.clone();
        corrupted.created = corrupted.created - chrono::Duration::days(1);
        let err = store.update(corrupted).expect_err("created changed");
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn updating_unknown_task_is_an_invariant_violation() {
        let mut store = TaskStore::new();
        let mut other = TaskStore::new();
        let task = other.add(NewTask::titled("elsewhere"));

        assert!(matches!(store.update(task), Err(Error::Invariant(_))));
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut store = TaskStore::new();
        assert!(store.remove("aaaaaaaaaa").is_none());
        assert!(store.changes().is_empty());
    }

    #[test]
    fn get_by_tags_intersects_and_empty_means_all() {
        let mut store = TaskStore::new();
        let ab = store.add(NewTask::titled("ab").with_tags(tags(["a", "b"])));
        let a = store.add(NewTask::titled("a").with_tags(tags(["a"])));
        let none = store.add(NewTask::titled("none"));

        assert_eq!(ids(store.get_by_tags(&tags(["a", "b"]))), vec![ab.id.clone()]);
        let mut only_a = ids(store.get_by_tags(&tags(["a"])));
        only_a.sort();
        let mut expected = vec![ab.id.clone(), a.id.clone()];
        expected.sort();
        assert_eq!(only_a, expected);
        assert!(store.get_by_tags(&tags(["a", "missing"])).is_empty());
        assert_eq!(store.get_by_tags(&Tags::new()).len(), 3);
        assert!(store.get(&none.id).is_some());
    }

    #[test]
    fn bulk_load_replaces_index_entries_and_respects_publish() {
        let mut source = TaskStore::new();
        let task = source.add(NewTask::titled("t").with_tags(tags(["old"])));

        let mut store = TaskStore::new();
        store.bulk_load(vec![task.clone()], false);
        assert!(store.changes().is_empty());

        let mut retagged = task.clone();
        retagged.tags = tags(["new"]);
        store.bulk_load(vec![retagged], true);

        assert!(store.get_by_tag("old").is_empty());
        assert_eq!(ids(store.get_by_tag("new")), vec![task.id.clone()]);
        assert_eq!(
            store.changes().drain(),
            vec![TaskChange::TaskAdded { id: task.id }]
        );
    }
}
