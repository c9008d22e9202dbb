//! Workspace: one task store, one view store and one file synchronizer for a
//! root, plus the loop that settles their change feeds.
//!
//! A cascade is settled depth first: a task change is handed to the view
//! store, each view change it caused is written to disk, and only then is the
//! task file itself written. The next task change is taken after the previous
//! one has fully settled.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Change, ChangeListener};
use crate::files::{self, FileSync, PathKind};
use crate::format;
use crate::indexer::{self, RootStatus};
use crate::model::{self, Tag, Task, TaskId, View, ViewId};
use crate::storage::{self, Storage, CONFIG_FILE};
use crate::sync::{ChangeRecord, SyncBuffer};
use crate::task::{NewTask, TaskChange, TaskStore};
use crate::view::{TaskCommand, ViewChange, ViewStore};

/// What handling a saved path did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    Ignored { path: PathBuf },
    TaskAdded { id: TaskId },
    TaskUpdated { id: TaskId, changed: bool },
    TaskRemoved { id: TaskId },
    ViewAdded { id: ViewId },
    ViewUpdated { id: ViewId },
    ViewRemoved { id: ViewId },
}

/// Serializable dump of every in-memory index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSnapshot {
    pub taken_at: DateTime<Utc>,
    pub tag_index: BTreeMap<Tag, Vec<TaskId>>,
    pub views_by_task: BTreeMap<TaskId, Vec<ViewId>>,
    pub tasks_per_view: BTreeMap<ViewId, Vec<TaskId>>,
}

pub struct Workspace {
    config: Config,
    tasks: TaskStore,
    views: ViewStore,
    files: FileSync,
    sync_buffer: Option<SyncBuffer>,
    listeners: Vec<Box<dyn ChangeListener>>,
    journal: Vec<Change>,
}

/// Read `.wipman.toml` at `root` if there is one. A broken file is an error.
pub fn load_config(root: &Path) -> Result<Config> {
    let path = root.join(CONFIG_FILE);
    if path.exists() {
        Config::load(&path)
    } else {
        Ok(Config::default())
    }
}

impl Workspace {
    /// Open an initialized root and load every file into memory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = load_config(&root)?;
        let storage = Storage::new(&root, config.view_extension.clone());
        match indexer::detect_root(&storage) {
            RootStatus::Wipman => {}
            status => {
                tracing::debug!(root = %root.display(), status = ?status, "not a wipman root");
                return Err(Error::NotAWipmanDir(root));
            }
        }

        let root = root.canonicalize()?;
        let storage = Storage::new(root, config.view_extension.clone());
        let sync_buffer = config
            .sync
            .enabled
            .then(|| SyncBuffer::new(&storage, &config.sync));

        let mut files = FileSync::new(storage);
        let mut tasks = TaskStore::new();
        let mut views = ViewStore::new();
        indexer::bootstrap(&mut files, &mut tasks, &mut views)?;

        Ok(Self {
            config,
            tasks,
            views,
            files,
            sync_buffer,
            listeners: Vec::new(),
            journal: Vec::new(),
        })
    }

    /// Initialize `root` if needed, then open it.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = load_config(&root)?;
        indexer::init_root(&Storage::new(&root, config.view_extension))?;
        Self::open(root)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        self.files.storage()
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn views(&self) -> &ViewStore {
        &self.views
    }

    pub fn files(&self) -> &FileSync {
        &self.files
    }

    /// Register a listener that sees every settled change.
    pub fn subscribe(&mut self, listener: Box<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    /// Every change settled since the last call, oldest first.
    pub fn take_journal(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.journal)
    }

    pub fn create_task(&mut self, new: NewTask) -> Result<Task> {
        let task = self.tasks.add(new);
        self.settle()?;
        Ok(task)
    }

    pub fn create_view(&mut self, title: &str) -> Result<View> {
        let view = self.views.add(title, &self.tasks);
        self.settle()?;
        Ok(view)
    }

    /// Replace a task. Returns whether anything changed.
    pub fn update_task(&mut self, task: Task) -> Result<bool> {
        if !self.tasks.contains(&task.id) {
            return Err(Error::TaskNotFound(task.id));
        }
        let changed = self.tasks.update(task)?;
        self.settle()?;
        Ok(changed)
    }

    /// Apply an edited view. Deleting a line deletes the task everywhere.
    pub fn update_view(&mut self, view: View) -> Result<()> {
        let commands = self.views.update(view, &self.tasks)?;
        self.settle()?;
        self.run_commands(commands)
    }

    pub fn delete_task(&mut self, id: &str) -> Result<Task> {
        let task = self
            .tasks
            .remove(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        self.settle()?;
        Ok(task)
    }

    pub fn delete_view(&mut self, id: &str) -> Result<View> {
        let view = self
            .views
            .remove(id)?
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))?;
        self.settle()?;
        Ok(view)
    }

    /// Handle a path the user saved (or deleted) in their editor.
    pub fn on_save(&mut self, path: &Path) -> Result<SaveOutcome> {
        let outcome = match files::classify(self.storage(), &self.config, path)? {
            PathKind::Ignored => {
                tracing::debug!(path = %path.display(), "ignoring saved path");
                return Ok(SaveOutcome::Ignored {
                    path: path.to_path_buf(),
                });
            }
            PathKind::Task if !path.exists() => self.task_file_removed(path)?,
            PathKind::Task => self.task_file_saved(path)?,
            PathKind::View if !path.exists() => self.view_file_removed(path)?,
            PathKind::View => self.view_file_saved(path)?,
        };
        tracing::info!(path = %path.display(), outcome = ?outcome, "handled saved file");

        if self.config.debug {
            self.write_snapshot()?;
        }
        Ok(outcome)
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            taken_at: model::now(),
            tag_index: self.tasks.tag_index(),
            views_by_task: self.views.membership_index(),
            tasks_per_view: self.views.tasks_per_view(),
        }
    }

    /// Write a snapshot to `.snapshots/<ulid>.json` and return its path.
    pub fn write_snapshot(&self) -> Result<PathBuf> {
        let path = self
            .storage()
            .snapshots_dir()
            .join(format!("{}.json", ulid::Ulid::new()));
        storage::write_json(&path, &self.snapshot())?;
        tracing::debug!(path = %path.display(), "wrote index snapshot");
        Ok(path)
    }

    fn task_file_saved(&mut self, path: &Path) -> Result<SaveOutcome> {
        let task = self.files.read_saved_task(path)?;
        let id = task.id.clone();
        if self.tasks.contains(&id) {
            let changed = self.tasks.update(task)?;
            self.settle()?;
            return Ok(SaveOutcome::TaskUpdated { id, changed });
        }
        self.tasks.bulk_load(vec![task], true);
        self.settle()?;
        Ok(SaveOutcome::TaskAdded { id })
    }

    fn task_file_removed(&mut self, path: &Path) -> Result<SaveOutcome> {
        let id = format::task_id_from_path(path)
            .ok_or_else(|| Error::UnrecognizedFile(path.to_path_buf()))?;
        if !self.tasks.contains(&id) {
            return Ok(SaveOutcome::Ignored {
                path: path.to_path_buf(),
            });
        }
        self.delete_task(&id)?;
        Ok(SaveOutcome::TaskRemoved { id })
    }

    fn view_file_saved(&mut self, path: &Path) -> Result<SaveOutcome> {
        let view = files::read_view_file(path)?;
        indexer::ensure_unique_lines(path, &view)?;
        let id = view.id.clone();

        if !self.views.contains(&id) {
            self.files.register_view(&id, path);
            self.views.bulk_load(vec![view], true, &self.tasks);
            self.views.normalize(&id, &self.tasks);
            self.settle()?;
            return Ok(SaveOutcome::ViewAdded { id });
        }

        if let Some(registered) = self.files.view_path(&id) {
            if registered != path {
                return Err(Error::parse(
                    path,
                    format!("view id {id} is already used by {}", registered.display()),
                ));
            }
        }

        self.update_view(view)?;
        // The saved file is brought back to the membership rule: missing
        // matching tasks are appended, lines it should not show are dropped.
        if let Some(view) = self.views.normalize(&id, &self.tasks) {
            self.files.reconcile_view_file(&view)?;
            self.flush_files()?;
        }
        Ok(SaveOutcome::ViewUpdated { id })
    }

    fn view_file_removed(&mut self, path: &Path) -> Result<SaveOutcome> {
        let Some(id) = self.files.view_id_at(path).map(str::to_string) else {
            return Ok(SaveOutcome::Ignored {
                path: path.to_path_buf(),
            });
        };
        self.delete_view(&id)?;
        Ok(SaveOutcome::ViewRemoved { id })
    }

    /// Run view-requested task commands one at a time, settling after each.
    fn run_commands(&mut self, commands: Vec<TaskCommand>) -> Result<()> {
        for command in commands {
            tracing::debug!(command = ?command, "running task command");
            match command {
                TaskCommand::Create(new) => {
                    self.tasks.add(new);
                }
                TaskCommand::Patch {
                    id,
                    title,
                    completed,
                } => {
                    let Some(task) = self.tasks.get(&id) else {
                        tracing::warn!(task_id = %id, "task vanished before patch, skipping");
                        continue;
                    };
                    let mut task = task.clone();
                    task.title = title;
                    task.completed = completed;
                    self.tasks.update(task)?;
                }
                TaskCommand::Remove(id) => {
                    if self.tasks.remove(&id).is_none() {
                        tracing::debug!(task_id = %id, "task already removed");
                    }
                }
            }
            self.settle()?;
        }
        Ok(())
    }

    fn settle(&mut self) -> Result<()> {
        while let Some(change) = self.tasks.changes().next() {
            self.dispatch_task_change(change)?;
        }
        self.flush_views()?;
        self.flush_files()
    }

    fn dispatch_task_change(&mut self, change: TaskChange) -> Result<()> {
        self.record(Change::Task(change.clone()))?;
        self.views.handle_task_change(&change, &self.tasks)?;
        self.flush_views()?;
        self.files.handle_task_change(&change, &self.tasks)?;
        self.flush_files()
    }

    fn flush_views(&mut self) -> Result<()> {
        while let Some(change) = self.views.changes().next() {
            self.dispatch_view_change(change)?;
        }
        Ok(())
    }

    fn dispatch_view_change(&mut self, change: ViewChange) -> Result<()> {
        self.record(Change::View(change.clone()))?;
        self.files.handle_view_change(&change, &self.views)?;
        self.flush_files()
    }

    fn flush_files(&mut self) -> Result<()> {
        while let Some(change) = self.files.changes().next() {
            if let Some(buffer) = &self.sync_buffer {
                buffer.record(&ChangeRecord::from_change(&change, self.files.storage()))?;
            }
            self.record(Change::File(change))?;
        }
        Ok(())
    }

    fn record(&mut self, change: Change) -> Result<()> {
        for listener in &mut self.listeners {
            listener.on_change(&change)?;
        }
        self.journal.push(change);
        Ok(())
    }
}
