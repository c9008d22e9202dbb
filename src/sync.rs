//! Remote-sync boundary.
//!
//! File changes are appended to a buffer file as `kind::op::path` records
//! (path relative to the root). `wipman sync` squashes the buffer to the
//! last operation per path, reads the surviving files into a [`SyncBatch`]
//! and hands it to a [`RemoteStore`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::files::{self, FileChange, FileKind};
use crate::format;
use crate::model::{Task, TaskId, View};
use crate::storage::{self, Storage};

const SEPARATOR: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOp {
    Add,
    Update,
    Delete,
}

impl SyncOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOp::Add => "add",
            SyncOp::Update => "upd",
            SyncOp::Delete => "del",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "add" => Some(SyncOp::Add),
            "upd" => Some(SyncOp::Update),
            "del" => Some(SyncOp::Delete),
            _ => None,
        }
    }
}

/// One buffered file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub kind: FileKind,
    pub op: SyncOp,
    pub path: PathBuf,
}

impl ChangeRecord {
    pub fn from_change(change: &FileChange, storage: &Storage) -> Self {
        let op = match change {
            FileChange::FileAdded { .. } => SyncOp::Add,
            FileChange::FileUpdated { .. } => SyncOp::Update,
            FileChange::FileDeleted { .. } => SyncOp::Delete,
        };
        Self {
            kind: change.kind(),
            op,
            path: storage.relative(change.path()).to_path_buf(),
        }
    }

    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let mut parts = line.splitn(3, SEPARATOR);
        let (Some(kind), Some(op), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected kind::op::path, found '{line}'"));
        };
        let kind = match kind {
            "task" => FileKind::Task,
            "view" => FileKind::View,
            other => return Err(format!("unknown file kind '{other}'")),
        };
        let op = SyncOp::parse(op).ok_or_else(|| format!("unknown operation '{op}'"))?;
        if path.is_empty() {
            return Err(format!("missing path in '{line}'"));
        }
        Ok(Self {
            kind,
            op,
            path: PathBuf::from(path),
        })
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.kind.as_str(),
            self.op.as_str(),
            self.path.display()
        )
    }
}

/// Keep only the last record per path, in the order those last records were
/// made. Sequences that cannot happen to a real file are rejected.
pub fn squash(records: Vec<ChangeRecord>) -> Result<Vec<ChangeRecord>> {
    let mut last: HashMap<PathBuf, usize> = HashMap::new();
    let mut sequence: Vec<Option<ChangeRecord>> = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        if let Some(previous_index) = last.get(&record.path).copied() {
            let previous = sequence[previous_index]
                .as_ref()
                .map(|previous| previous.op)
                .ok_or_else(|| Error::invariant("squashed record was dropped twice"))?;
            let reason = match (previous, record.op) {
                (SyncOp::Delete, SyncOp::Update) => Some("file previously deleted, cannot be updated"),
                (SyncOp::Add, SyncOp::Add) => Some("file previously added, cannot be added again"),
                (SyncOp::Update, SyncOp::Add) => Some("file previously updated, cannot be added again"),
                (SyncOp::Add, SyncOp::Update)
                | (SyncOp::Add, SyncOp::Delete)
                | (SyncOp::Update, SyncOp::Update)
                | (SyncOp::Update, SyncOp::Delete)
                | (SyncOp::Delete, SyncOp::Add)
                | (SyncOp::Delete, SyncOp::Delete) => None,
            };
            if let Some(reason) = reason {
                return Err(Error::InvalidSyncSequence {
                    path: record.path,
                    reason: reason.to_string(),
                });
            }
            sequence[previous_index] = None;
        }
        last.insert(record.path.clone(), index);
        sequence.push(Some(record));
    }

    Ok(sequence.into_iter().flatten().collect())
}

/// Append-only buffer of file changes awaiting sync.
#[derive(Debug, Clone)]
pub struct SyncBuffer {
    path: PathBuf,
}

impl SyncBuffer {
    pub fn new(storage: &Storage, config: &SyncConfig) -> Self {
        Self {
            path: storage.sync_buffer(&config.buffer_file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, record: &ChangeRecord) -> Result<()> {
        storage::append_line(&self.path, &record.to_string())
    }

    pub fn read(&self) -> Result<Vec<ChangeRecord>> {
        storage::read_lines(&self.path)?
            .iter()
            .map(|line| ChangeRecord::parse(line).map_err(|reason| Error::parse(&self.path, reason)))
            .collect()
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Everything the remote must set or delete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncBatch {
    pub set_tasks: Vec<Task>,
    pub set_views: Vec<View>,
    pub delete_tasks: Vec<TaskId>,
    /// Deleted view files, relative to the root. A deleted file has no id left to read.
    pub delete_views: Vec<PathBuf>,
}

impl SyncBatch {
    /// Read the surviving files of a squashed record list.
    pub fn build(storage: &Storage, records: &[ChangeRecord]) -> Result<Self> {
        let mut batch = SyncBatch::default();
        for record in records {
            let path = storage.root().join(&record.path);
            match (record.op, record.kind) {
                (SyncOp::Add | SyncOp::Update, kind) if !path.exists() => {
                    tracing::warn!(path = %record.path.display(), kind = kind.as_str(), "changed file is gone, skipping");
                }
                (SyncOp::Add | SyncOp::Update, FileKind::Task) => {
                    batch.set_tasks.push(files::read_task_file(&path)?);
                }
                (SyncOp::Add | SyncOp::Update, FileKind::View) => {
                    batch.set_views.push(files::read_view_file(&path)?);
                }
                (SyncOp::Delete, FileKind::Task) => {
                    let id = format::task_id_from_path(&record.path)
                        .ok_or_else(|| Error::parse(&path, "path does not encode a task id"))?;
                    batch.delete_tasks.push(id);
                }
                (SyncOp::Delete, FileKind::View) => {
                    batch.delete_views.push(record.path.clone());
                }
            }
        }
        Ok(batch)
    }

    pub fn is_empty(&self) -> bool {
        self.set_tasks.is_empty()
            && self.set_views.is_empty()
            && self.delete_tasks.is_empty()
            && self.delete_views.is_empty()
    }

    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            set_tasks: self.set_tasks.len(),
            set_views: self.set_views.len(),
            delete_tasks: self.delete_tasks.len(),
            delete_views: self.delete_views.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub set_tasks: usize,
    pub set_views: usize,
    pub delete_tasks: usize,
    pub delete_views: usize,
}

/// Destination of a sync.
pub trait RemoteStore {
    fn apply(&mut self, batch: &SyncBatch) -> Result<()>;
}

/// Accepts batches without sending them anywhere.
#[derive(Debug, Default)]
pub struct DryRunRemote {
    pub batches: Vec<SyncSummary>,
}

impl RemoteStore for DryRunRemote {
    fn apply(&mut self, batch: &SyncBatch) -> Result<()> {
        self.batches.push(batch.summary());
        Ok(())
    }
}

/// Mirrors tasks and views as JSON documents in a backup directory:
/// `tasks/<id>.json` and `views/<file stem>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryRemote {
    dir: PathBuf,
}

impl DirectoryRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn view_document(&self, view_path: &Path) -> PathBuf {
        let stem = view_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.dir.join("views").join(format!("{stem}.json"))
    }
}

impl RemoteStore for DirectoryRemote {
    fn apply(&mut self, batch: &SyncBatch) -> Result<()> {
        for task in &batch.set_tasks {
            storage::write_json(&self.dir.join("tasks").join(format!("{}.json", task.id)), task)?;
        }
        for view in &batch.set_views {
            storage::write_json(&self.dir.join("views").join(format!("{}.json", view.id)), view)?;
        }
        for id in &batch.delete_tasks {
            remove_if_exists(&self.dir.join("tasks").join(format!("{id}.json")))?;
        }
        for path in &batch.delete_views {
            remove_if_exists(&self.view_document(path))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Outcome of [`sync`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub records: usize,
    pub squashed: usize,
    pub summary: SyncSummary,
    pub dry_run: bool,
}

/// Drain the buffer into `remote`. The buffer is only cleared when the
/// remote accepted the batch and this is not a dry run.
pub fn sync(
    storage: &Storage,
    config: &SyncConfig,
    remote: &mut dyn RemoteStore,
    dry_run: bool,
) -> Result<SyncReport> {
    let buffer = SyncBuffer::new(storage, config);
    let records = buffer.read()?;
    let record_count = records.len();
    let squashed = squash(records)?;
    let batch = SyncBatch::build(storage, &squashed)?;

    if !batch.is_empty() {
        remote.apply(&batch)?;
    }
    if !dry_run {
        buffer.clear()?;
    }
    tracing::info!(records = record_count, squashed = squashed.len(), dry_run, "sync finished");

    Ok(SyncReport {
        records: record_count,
        squashed: squashed.len(),
        summary: batch.summary(),
        dry_run,
    })
}
