//! File synchronizer.
//!
//! Keeps the `id -> path` maps for tasks and views and turns store changes
//! into file writes. View files are patched line by line so that anything
//! the user typed that the engine does not own (blank lines, lines not yet
//! promoted to tasks) survives untouched; only a view tag change rewrites a
//! view file wholesale. Every write is skipped when the bytes on disk already
//! match, which is what lets an edit round-trip without touching the file the
//! user just saved.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::ChangeFeed;
use crate::format::{self, METADATA_DELIMITER};
use crate::id;
use crate::indexer::{self, Scan};
use crate::model::{self, Task, TaskId, View, ViewId};
use crate::storage::{self, Storage, VIEWS_DIR};
use crate::task::{TaskChange, TaskStore};
use crate::view::{ViewChange, ViewStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Task,
    View,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Task => "task",
            FileKind::View => "view",
        }
    }
}

/// Change records published by the file synchronizer. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileChange {
    FileAdded {
        kind: FileKind,
        id: String,
        path: PathBuf,
    },
    FileUpdated {
        kind: FileKind,
        id: String,
        path: PathBuf,
    },
    FileDeleted {
        kind: FileKind,
        id: String,
        path: PathBuf,
    },
}

impl FileChange {
    pub fn name(&self) -> &'static str {
        match self {
            FileChange::FileAdded { .. } => "file_added",
            FileChange::FileUpdated { .. } => "file_updated",
            FileChange::FileDeleted { .. } => "file_deleted",
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            FileChange::FileAdded { kind, .. }
            | FileChange::FileUpdated { kind, .. }
            | FileChange::FileDeleted { kind, .. } => *kind,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            FileChange::FileAdded { path, .. }
            | FileChange::FileUpdated { path, .. }
            | FileChange::FileDeleted { path, .. } => path,
        }
    }
}

/// What a changed path means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Task,
    View,
    Ignored,
}

/// Classify a path observed by the editor or the watcher.
///
/// Paths outside the root, top-level files, anything under a hidden
/// directory and `ignore` glob matches are [`PathKind::Ignored`]. Anything
/// else that is neither `views/<name>.<ext>` nor `xx/yyyyyyyy` is an error.
pub fn classify(storage: &Storage, config: &Config, path: &Path) -> Result<PathKind> {
    let Ok(relative) = path.strip_prefix(storage.root()) else {
        return Ok(PathKind::Ignored);
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(Error::UnrecognizedFile(path.to_path_buf())),
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Ok(PathKind::Ignored)
            }
        }
    }

    if parts.len() <= 1 || parts.iter().any(|part| part.starts_with('.')) {
        return Ok(PathKind::Ignored);
    }
    if config.is_ignored(relative) {
        return Ok(PathKind::Ignored);
    }

    match parts.as_slice() {
        [dir, name] if *dir == VIEWS_DIR => {
            let expected = format!(".{}", storage.view_extension());
            if name.ends_with(&expected) {
                Ok(PathKind::View)
            } else {
                Ok(PathKind::Ignored)
            }
        }
        [dir, file] if id::is_valid_id(&format!("{dir}{file}")) && dir.len() == id::DIR_LEN => {
            Ok(PathKind::Task)
        }
        _ => Err(Error::UnrecognizedFile(path.to_path_buf())),
    }
}

pub fn read_task_file(path: &Path) -> Result<Task> {
    let raw = storage::read_text(path)?;
    format::parse_task(path, &raw)
}

pub fn read_view_file(path: &Path) -> Result<View> {
    let raw = storage::read_text(path)?;
    format::parse_view(path, &raw)
}

/// Last modification time of a file, at the precision files store.
pub fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(model::truncate_to_millis(DateTime::<Utc>::from(modified)))
}

/// URL-ish file stem for a view title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for ch in title.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// A view file split into lines, with the index of its first content line.
struct ViewFileLines {
    lines: Vec<String>,
    content_start: usize,
}

impl ViewFileLines {
    fn load(path: &Path) -> Result<Self> {
        let raw = storage::read_text(path)?;
        let lines: Vec<String> = raw.split('\n').map(str::to_string).collect();
        let delimiter = lines
            .iter()
            .position(|line| line == METADATA_DELIMITER)
            .ok_or_else(|| {
                Error::parse(path, format!("no '{METADATA_DELIMITER}' line in view file"))
            })?;
        Ok(Self {
            lines,
            content_start: delimiter + 1,
        })
    }

    fn linked_id(line: &str) -> Option<TaskId> {
        format::parse_view_line(line).ok().and_then(|line| line.id)
    }

    fn position_of(&self, task_id: &str) -> Option<usize> {
        (self.content_start..self.lines.len())
            .find(|&index| Self::linked_id(&self.lines[index]).as_deref() == Some(task_id))
    }

    /// First line without an id showing `title` with the given status.
    fn position_of_unlinked(&self, title: &str, completed: bool) -> Option<usize> {
        (self.content_start..self.lines.len()).find(|&index| {
            matches!(
                format::parse_view_line(&self.lines[index]),
                Ok(line) if line.id.is_none() && line.title == title && line.completed == completed
            )
        })
    }

    /// Insert before the trailing empty element so the file keeps ending in a newline.
    fn push(&mut self, line: String) {
        let ends_with_newline = matches!(self.lines.last(), Some(last) if last.is_empty());
        if ends_with_newline && self.lines.len() > self.content_start {
            let at = self.lines.len() - 1;
            self.lines.insert(at, line);
        } else {
            self.lines.push(line);
        }
    }

    fn remove_linked(&mut self, task_id: &str) -> bool {
        let before = self.lines.len();
        let content_start = self.content_start;
        let mut index = 0;
        self.lines.retain(|line| {
            let keep = index < content_start || Self::linked_id(line).as_deref() != Some(task_id);
            index += 1;
            keep
        });
        self.lines.len() != before
    }

    fn render(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug)]
pub struct FileSync {
    storage: Storage,
    task_paths: HashMap<TaskId, PathBuf>,
    view_paths: HashMap<ViewId, PathBuf>,
    changes: ChangeFeed<FileChange>,
}

impl FileSync {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            task_paths: HashMap::new(),
            view_paths: HashMap::new(),
            changes: ChangeFeed::new(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Rescan the root and rebuild both path maps.
    ///
    /// The maps are only replaced once every file has parsed; on error the
    /// previous maps stay in place.
    pub fn index(&mut self) -> Result<Scan> {
        let scan = indexer::scan_root(&self.storage)?;
        let task_paths = scan
            .tasks
            .iter()
            .map(|(path, task)| (task.id.clone(), path.clone()))
            .collect();
        let view_paths = scan
            .views
            .iter()
            .map(|(path, view)| (view.id.clone(), path.clone()))
            .collect();
        self.task_paths = task_paths;
        self.view_paths = view_paths;
        tracing::debug!(
            tasks = self.task_paths.len(),
            views = self.view_paths.len(),
            "indexed root"
        );
        Ok(scan)
    }

    pub fn task_path(&self, task_id: &str) -> Option<&Path> {
        self.task_paths.get(task_id).map(PathBuf::as_path)
    }

    pub fn view_path(&self, view_id: &str) -> Option<&Path> {
        self.view_paths.get(view_id).map(PathBuf::as_path)
    }

    /// The view registered at `path`, if any.
    pub fn view_id_at(&self, path: &Path) -> Option<&str> {
        self.view_paths
            .iter()
            .find(|(_, registered)| registered.as_path() == path)
            .map(|(id, _)| id.as_str())
    }

    pub fn register_view(&mut self, view_id: &str, path: &Path) {
        self.view_paths
            .insert(view_id.to_string(), path.to_path_buf());
    }

    /// Read a task file the user just saved.
    ///
    /// When the file's modification time disagrees with its `updated`
    /// metadata, the modification time wins.
    pub fn read_saved_task(&self, path: &Path) -> Result<Task> {
        let mut task = read_task_file(path)?;
        let modified = modified_at(path)?;
        if modified != task.updated {
            tracing::debug!(
                task_id = %task.id,
                metadata = %task.updated,
                mtime = %modified,
                "task file mtime differs from metadata, using mtime"
            );
            task.updated = modified;
        }
        Ok(task)
    }

    pub fn handle_task_change(&mut self, change: &TaskChange, tasks: &TaskStore) -> Result<()> {
        match change {
            TaskChange::TaskAdded { id } => {
                let task = tasks.get(id).ok_or_else(|| {
                    Error::invariant(format!("task {id} was added but is not in the task store"))
                })?;
                let path = self.storage.task_file(id);
                storage::write_if_changed(&path, &format::serialize_task(task))?;
                self.task_paths.insert(id.clone(), path.clone());
                tracing::info!(task_id = %id, path = %path.display(), "task file added");
                self.changes.publish(FileChange::FileAdded {
                    kind: FileKind::Task,
                    id: id.clone(),
                    path,
                });
                Ok(())
            }
            TaskChange::TaskUpdated { id, .. } => {
                let task = tasks.get(id).ok_or_else(|| {
                    Error::invariant(format!("task {id} was updated but is not in the task store"))
                })?;
                let path = self
                    .task_paths
                    .entry(id.clone())
                    .or_insert_with(|| self.storage.task_file(id))
                    .clone();
                if storage::write_if_changed(&path, &format::serialize_task(task))? {
                    tracing::info!(task_id = %id, path = %path.display(), "task file updated");
                    self.changes.publish(FileChange::FileUpdated {
                        kind: FileKind::Task,
                        id: id.clone(),
                        path,
                    });
                }
                Ok(())
            }
            TaskChange::TaskDeleted { id } => {
                let path = self
                    .task_paths
                    .remove(id)
                    .unwrap_or_else(|| self.storage.task_file(id));
                storage::remove_file_and_empty_parent(&path)?;
                tracing::info!(task_id = %id, path = %path.display(), "task file deleted");
                self.changes.publish(FileChange::FileDeleted {
                    kind: FileKind::Task,
                    id: id.clone(),
                    path,
                });
                Ok(())
            }
        }
    }

    pub fn handle_view_change(&mut self, change: &ViewChange, views: &ViewStore) -> Result<()> {
        match change {
            ViewChange::ViewAdded { view_id } => {
                let view = Self::view(views, view_id)?;
                let path = match self.view_paths.get(view_id) {
                    Some(path) => path.clone(),
                    None => self.allocate_view_path(view),
                };
                if path.exists() {
                    self.reconcile_file(&path, view)?;
                } else {
                    storage::write_if_changed(&path, &format::serialize_view(view))?;
                }
                self.view_paths.insert(view_id.clone(), path.clone());
                tracing::info!(view_id = %view_id, path = %path.display(), "view file added");
                self.changes.publish(FileChange::FileAdded {
                    kind: FileKind::View,
                    id: view_id.clone(),
                    path,
                });
                Ok(())
            }
            ViewChange::TaskAddedToView { view_id, task_id } => {
                let view = Self::view(views, view_id)?;
                let Some(line) = view.line(task_id) else {
                    tracing::debug!(view_id = %view_id, task_id = %task_id, "task already gone from view, skipping");
                    return Ok(());
                };
                let rendered = format::serialize_view_line(line);
                self.patch_view_file(view_id, |file| {
                    if let Some(index) = file.position_of(task_id) {
                        file.lines[index] = rendered;
                    } else if let Some(index) = file.position_of_unlinked(&line.title, line.completed) {
                        file.lines[index] = rendered;
                    } else {
                        file.push(rendered);
                    }
                })
            }
            ViewChange::TaskRemovedFromView { view_id, task_id } => {
                self.patch_view_file(view_id, |file| {
                    file.remove_linked(task_id);
                })
            }
            ViewChange::TaskUpdatedInlineInView {
                view_id, task_id, ..
            } => {
                let view = Self::view(views, view_id)?;
                let Some(line) = view.line(task_id) else {
                    return Err(Error::invariant(format!(
                        "view {view_id} patched task {task_id} but does not list it"
                    )));
                };
                let rendered = format::serialize_view_line(line);
                self.patch_view_file(view_id, |file| match file.position_of(task_id) {
                    Some(index) => file.lines[index] = rendered,
                    None => file.push(rendered),
                })
            }
            ViewChange::ViewTagsUpdated { view_id } => {
                let view = Self::view(views, view_id)?;
                let path = self.registered_view_path(view_id)?;
                tracing::debug!(view_id = %view_id, "rewriting view after tag change");
                if storage::write_if_changed(&path, &format::serialize_view(view))? {
                    self.changes.publish(FileChange::FileUpdated {
                        kind: FileKind::View,
                        id: view_id.clone(),
                        path,
                    });
                }
                Ok(())
            }
            ViewChange::ViewDeleted { view_id } => {
                let Some(path) = self.view_paths.remove(view_id) else {
                    return Ok(());
                };
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                tracing::info!(view_id = %view_id, path = %path.display(), "view file deleted");
                self.changes.publish(FileChange::FileDeleted {
                    kind: FileKind::View,
                    id: view_id.clone(),
                    path,
                });
                Ok(())
            }
        }
    }

    /// Make a view file list exactly the view's tasks: drop linked lines the
    /// view does not show (and repeated ones), append lines it is missing.
    /// Lines without an id are left alone.
    pub fn reconcile_view_file(&mut self, view: &View) -> Result<()> {
        let path = self.registered_view_path(&view.id)?;
        if self.reconcile_file(&path, view)? {
            self.changes.publish(FileChange::FileUpdated {
                kind: FileKind::View,
                id: view.id.clone(),
                path,
            });
        }
        Ok(())
    }

    pub fn changes(&mut self) -> &mut ChangeFeed<FileChange> {
        &mut self.changes
    }

    fn reconcile_file(&self, path: &Path, view: &View) -> Result<bool> {
        let mut file = ViewFileLines::load(path)?;
        let mut listed: Vec<TaskId> = Vec::new();
        let mut index = 0;
        let content_start = file.content_start;
        file.lines.retain(|line| {
            let current = index;
            index += 1;
            if current < content_start {
                return true;
            }
            match ViewFileLines::linked_id(line) {
                Some(task_id) if view.contains(&task_id) && !listed.contains(&task_id) => {
                    listed.push(task_id);
                    true
                }
                Some(task_id) => {
                    tracing::debug!(view_id = %view.id, task_id = %task_id, "pruning line the view does not show");
                    false
                }
                None => true,
            }
        });
        for line in &view.content {
            if let Some(task_id) = &line.id {
                if !listed.contains(task_id) {
                    file.push(format::serialize_view_line(line));
                }
            }
        }
        storage::write_if_changed(path, &file.render())
    }

    fn patch_view_file(
        &mut self,
        view_id: &str,
        patch: impl FnOnce(&mut ViewFileLines),
    ) -> Result<()> {
        let path = self.registered_view_path(view_id)?;
        let mut file = ViewFileLines::load(&path)?;
        patch(&mut file);
        if storage::write_if_changed(&path, &file.render())? {
            tracing::debug!(view_id = %view_id, path = %path.display(), "view file patched");
            self.changes.publish(FileChange::FileUpdated {
                kind: FileKind::View,
                id: view_id.to_string(),
                path,
            });
        }
        Ok(())
    }

    fn registered_view_path(&self, view_id: &str) -> Result<PathBuf> {
        self.view_paths
            .get(view_id)
            .cloned()
            .ok_or_else(|| Error::invariant(format!("view {view_id} has no registered file")))
    }

    fn view<'a>(views: &'a ViewStore, view_id: &str) -> Result<&'a View> {
        views
            .get(view_id)
            .ok_or_else(|| Error::invariant(format!("view {view_id} is not in the view store")))
    }

    /// `views/<slug>.<ext>`, or `views/<slug>-<id>.<ext>` when that is taken.
    fn allocate_view_path(&self, view: &View) -> PathBuf {
        let slug = slugify(&view.title);
        let stem = if slug.is_empty() { view.id.clone() } else { slug };
        let preferred = self.storage.view_file(&stem);
        let taken = preferred.exists() || self.view_paths.values().any(|path| *path == preferred);
        if taken {
            self.storage.view_file(&format!("{stem}-{}", view.id))
        } else {
            preferred
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(temp: &TempDir) -> Storage {
        Storage::new(temp.path(), "view")
    }

    #[test]
    fn classify_recognizes_layout() {
        let temp = TempDir::new().expect("tempdir");
        let storage = storage(&temp);
        let config = Config::default();
        let root = temp.path();

        let kind = |path: PathBuf| classify(&storage, &config, &path);
        assert_eq!(kind(root.join("views/backlog.view")).expect("view"), PathKind::View);
        assert_eq!(kind(root.join("ab/cdefghij")).expect("task"), PathKind::Task);
        assert_eq!(kind(root.join("views/notes.txt")).expect("other"), PathKind::Ignored);
        assert_eq!(kind(root.join("README")).expect("top"), PathKind::Ignored);
        assert_eq!(kind(root.join(".git/HEAD")).expect("hidden"), PathKind::Ignored);
        assert_eq!(kind(root.join(".vscode/settings")).expect("vscode"), PathKind::Ignored);
        assert_eq!(kind(root.join("ab/data.json")).expect("glob"), PathKind::Ignored);
        assert_eq!(
            kind(PathBuf::from("/somewhere/else/ab/cdefghij")).expect("outside"),
            PathKind::Ignored
        );
        assert!(matches!(
            kind(root.join("notes/today")),
            Err(Error::UnrecognizedFile(_))
        ));
    }

    #[test]
    fn slugify_makes_file_stems() {
        assert_eq!(slugify("Work Stuff!"), "work-stuff");
        assert_eq!(slugify("  HIRU  "), "hiru");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn saved_task_takes_mtime_when_it_disagrees() {
        let temp = TempDir::new().expect("tempdir");
        let sync = FileSync::new(storage(&temp));
        let path = temp.path().join("aa/aaaaaaaa");
        storage::write_atomic(
            &path,
            b"id=aaaaaaaaaa\ntitle=t\ncreated=2022-10-01T18:00:00.000Z\nupdated=2022-10-04T16:41:23.858Z\ntags=\nblockedBy=\nblocks=\ncompleted=false\n---\n",
        )
        .expect("write");

        let parsed = read_task_file(&path).expect("parse");
        let saved = sync.read_saved_task(&path).expect("read");
        assert_eq!(saved.updated, modified_at(&path).expect("mtime"));
        assert_ne!(saved.updated, parsed.updated);
        assert_eq!(saved.created, parsed.created);
    }

    #[test]
    fn view_file_lines_keep_trailing_newline() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("views/x.view");
        storage::write_atomic(&path, b"id=x\n---\n- [ ] one\n\n- [ ] two\n").expect("write");

        let mut file = ViewFileLines::load(&path).expect("load");
        assert_eq!(file.position_of_unlinked("two", false), Some(4));
        file.push("- [ ] three".to_string());
        assert_eq!(file.render(), "id=x\n---\n- [ ] one\n\n- [ ] two\n- [ ] three\n");
    }
}
