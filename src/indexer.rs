//! Directory indexer: root detection, `init`, and the startup scan that
//! bootstraps the stores from existing files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::files::{self, FileSync};
use crate::format;
use crate::model::{Task, View, BACKLOG_ID};
use crate::storage::{self, Storage};
use crate::task::TaskStore;
use crate::view::{self, ViewStore};

/// Parsed contents of a root.
#[derive(Debug, Default)]
pub struct Scan {
    pub tasks: Vec<(PathBuf, Task)>,
    pub views: Vec<(PathBuf, View)>,
}

/// A file that could not be read as the kind its location implies.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootStatus {
    DoesNotExist,
    IsFile,
    EmptyDirectory,
    NotWipman,
    Wipman,
}

/// A root is a wipman root iff its Backlog view file exists and parses.
pub fn detect_root(storage: &Storage) -> RootStatus {
    let root = storage.root();
    if !root.exists() {
        return RootStatus::DoesNotExist;
    }
    if root.is_file() {
        return RootStatus::IsFile;
    }
    let is_empty = fs::read_dir(root)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty {
        return RootStatus::EmptyDirectory;
    }
    match files::read_view_file(&storage.backlog_file()) {
        Ok(backlog) if backlog.id == BACKLOG_ID => RootStatus::Wipman,
        Ok(_) | Err(_) => RootStatus::NotWipman,
    }
}

/// Create the `views/` directory and the Backlog file.
///
/// Returns `false` when the root was already initialized.
pub fn init_root(storage: &Storage) -> Result<bool> {
    match detect_root(storage) {
        RootStatus::Wipman => return Ok(false),
        RootStatus::IsFile => {
            return Err(Error::InvalidArgument(format!(
                "{} is a file, expected a directory",
                storage.root().display()
            )))
        }
        RootStatus::DoesNotExist | RootStatus::EmptyDirectory | RootStatus::NotWipman => {}
    }

    let backlog_path = storage.backlog_file();
    if backlog_path.exists() {
        return Err(Error::parse(
            &backlog_path,
            "existing Backlog file is not a valid Backlog view; fix or remove it first",
        ));
    }
    fs::create_dir_all(storage.views_dir())?;
    storage::write_atomic(
        &backlog_path,
        format::serialize_view(&view::new_backlog()).as_bytes(),
    )?;
    tracing::info!(root = %storage.root().display(), "initialized wipman root");
    Ok(true)
}

fn glob_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|err| {
        Error::InvalidArgument(format!("cannot scan with pattern '{pattern}': {err}"))
    })?;
    let mut found = Vec::new();
    for entry in paths {
        let path = entry.map_err(glob::GlobError::into_error)?;
        if path.is_file() {
            found.push(path);
        }
    }
    Ok(found)
}

fn escaped_root(storage: &Storage) -> Result<String> {
    let root = storage.root().to_str().ok_or_else(|| {
        Error::InvalidArgument(format!(
            "root path is not valid UTF-8: {}",
            storage.root().display()
        ))
    })?;
    Ok(glob::Pattern::escape(root))
}

/// Paths shaped like task files: `<root>/xx/yyyyyyyy`, lowercase letters.
pub fn task_candidates(storage: &Storage) -> Result<Vec<PathBuf>> {
    let letter = "[a-z]";
    let pattern = format!(
        "{}/{}/{}",
        escaped_root(storage)?,
        letter.repeat(2),
        letter.repeat(8)
    );
    glob_files(&pattern)
}

/// Files in `views/` with the configured extension.
pub fn view_candidates(storage: &Storage) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}/*.{}",
        escaped_root(storage)?,
        storage::VIEWS_DIR,
        glob::Pattern::escape(storage.view_extension())
    );
    glob_files(&pattern)
}

fn check_unique_view(seen: &mut HashMap<String, PathBuf>, path: &Path, view: &View) -> Result<()> {
    if let Some(first) = seen.insert(view.id.clone(), path.to_path_buf()) {
        return Err(Error::parse(
            path,
            format!("view id {} is already used by {}", view.id, first.display()),
        ));
    }
    Ok(())
}

/// A view file must not link the same task on two lines.
pub fn ensure_unique_lines(path: &Path, view: &View) -> Result<()> {
    match view.duplicate_task_ids().first() {
        Some(task_id) => Err(Error::parse(
            path,
            format!("task {task_id} is listed more than once"),
        )),
        None => Ok(()),
    }
}

/// Parse every task and view file under the root.
///
/// All or nothing: the first file that fails to parse aborts the scan.
pub fn scan_root(storage: &Storage) -> Result<Scan> {
    let mut scan = Scan::default();
    for path in task_candidates(storage)? {
        let task = files::read_task_file(&path)?;
        scan.tasks.push((path, task));
    }
    let mut seen = HashMap::new();
    for path in view_candidates(storage)? {
        let view = files::read_view_file(&path)?;
        ensure_unique_lines(&path, &view)?;
        check_unique_view(&mut seen, &path, &view)?;
        scan.views.push((path, view));
    }
    Ok(scan)
}

/// Like [`scan_root`], but files that fail to parse are collected instead of
/// aborting the scan. Views listing a task twice are kept so the health
/// report can name the pair.
pub fn scan_root_lenient(storage: &Storage) -> Result<(Scan, Vec<InvalidFile>)> {
    let mut scan = Scan::default();
    let mut invalid = Vec::new();
    for path in task_candidates(storage)? {
        match files::read_task_file(&path) {
            Ok(task) => scan.tasks.push((path, task)),
            Err(err) => invalid.push(InvalidFile {
                path,
                reason: err.to_string(),
            }),
        }
    }
    let mut seen = HashMap::new();
    for path in view_candidates(storage)? {
        let parsed = files::read_view_file(&path)
            .and_then(|view| check_unique_view(&mut seen, &path, &view).map(|()| view));
        match parsed {
            Ok(view) => scan.views.push((path, view)),
            Err(err) => invalid.push(InvalidFile {
                path,
                reason: err.to_string(),
            }),
        }
    }
    Ok((scan, invalid))
}

/// Load every file under the root into empty stores without announcing
/// anything.
///
/// Nothing is installed unless the whole scan succeeds.
pub fn bootstrap(files: &mut FileSync, tasks: &mut TaskStore, views: &mut ViewStore) -> Result<()> {
    let scan = files.index()?;
    if !scan.views.iter().any(|(_, view)| view.id == BACKLOG_ID) {
        return Err(Error::NotAWipmanDir(files.storage().root().to_path_buf()));
    }

    let task_count = scan.tasks.len();
    let view_count = scan.views.len();
    tasks.bulk_load(scan.tasks.into_iter().map(|(_, task)| task).collect(), false);
    views.bulk_load(
        scan.views.into_iter().map(|(_, view)| view).collect(),
        false,
        tasks,
    );
    tracing::info!(tasks = task_count, views = view_count, "bootstrapped stores");
    Ok(())
}
