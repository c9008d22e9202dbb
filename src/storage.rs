//! Storage layer for wipman
//!
//! Everything lives under a single root directory:
//!
//! ```text
//! <root>/
//!   .wipman.toml                # Optional configuration
//!   .wipman.lock                # Cross-process lock for mutating commands
//!   .changes_to_sync            # Remote-sync buffer (kind::op::path per line)
//!   .snapshots/                 # Index snapshots (debug only)
//!   views/
//!     backlog.view              # The Backlog, always present
//!     <slug>.view               # One file per view
//!   ab/
//!     cdefghij                  # Task `abcdefghij`
//! ```

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::id;

pub const VIEWS_DIR: &str = "views";
pub const BACKLOG_FILE_STEM: &str = "backlog";
pub const CONFIG_FILE: &str = ".wipman.toml";
pub const LOCK_FILE: &str = ".wipman.lock";
pub const SNAPSHOTS_DIR: &str = ".snapshots";

/// Path scheme of one wipman root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    root: PathBuf,
    view_extension: String,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, view_extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            view_extension: view_extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn view_extension(&self) -> &str {
        &self.view_extension
    }

    // =========================================================================
    // Layout
    // =========================================================================

    pub fn views_dir(&self) -> PathBuf {
        self.root.join(VIEWS_DIR)
    }

    pub fn backlog_file(&self) -> PathBuf {
        self.view_file(BACKLOG_FILE_STEM)
    }

    /// `views/<stem>.<ext>`
    pub fn view_file(&self, stem: &str) -> PathBuf {
        self.views_dir()
            .join(format!("{stem}.{}", self.view_extension))
    }

    /// Deterministic task path: first two id characters name the directory.
    pub fn task_file(&self, task_id: &str) -> PathBuf {
        match id::split_task_id(task_id) {
            Some((dir, file)) => self.root.join(dir).join(file),
            None => self.root.join(task_id),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    pub fn sync_buffer(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// `path` relative to the root, or `path` itself when it lies elsewhere.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

// =============================================================================
// File I/O helpers (atomic writes for safety)
// =============================================================================

/// Write data atomically using temp file + rename.
///
/// The temp file lives in the destination directory so the rename never
/// crosses a filesystem.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Write `data` unless the file already holds exactly these bytes.
///
/// Returns whether anything was written.
pub fn write_if_changed(path: &Path, data: &str) -> Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == data.as_bytes() => {
            tracing::debug!(path = %path.display(), "content unchanged, skipping write");
            return Ok(false);
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    write_atomic(path, data.as_bytes())?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(true)
}

pub fn read_text(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}

/// Delete a file, then its parent directory if that left it empty.
///
/// A file that is already gone is not an error.
pub fn remove_file_and_empty_parent(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    if let Some(parent) = path.parent() {
        let is_empty = match fs::read_dir(parent) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if is_empty {
            fs::remove_dir(parent)?;
            tracing::debug!(dir = %parent.display(), "removed empty directory");
        }
    }
    Ok(())
}

/// Append a line of text, creating the file if needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    file.sync_all()?;
    Ok(())
}

/// Non-empty lines of a file; a missing file has none.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines.push(line);
    }
    Ok(lines)
}

/// Read all records from a JSONL file
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    read_lines(path)?
        .iter()
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

/// Write JSON data atomically
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    write_atomic(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_paths() {
        let temp = TempDir::new().expect("tempdir");
        let storage = Storage::new(temp.path(), "view");

        assert_eq!(storage.views_dir(), temp.path().join("views"));
        assert_eq!(
            storage.backlog_file(),
            temp.path().join("views/backlog.view")
        );
        assert_eq!(
            storage.task_file("abcdefghij"),
            temp.path().join("ab/cdefghij")
        );
        assert_eq!(storage.lock_file(), temp.path().join(".wipman.lock"));
        let task = storage.task_file("abcdefghij");
        assert_eq!(storage.relative(&task), Path::new("ab/cdefghij"));
    }

    #[test]
    fn write_if_changed_skips_identical_bytes() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("ab/cdefghij");

        assert!(write_if_changed(&path, "one").expect("first write"));
        assert!(!write_if_changed(&path, "one").expect("same bytes"));
        assert!(write_if_changed(&path, "two").expect("new bytes"));
        assert_eq!(read_text(&path).expect("read"), "two");
    }

    #[test]
    fn removing_last_file_removes_its_directory() {
        let temp = TempDir::new().expect("tempdir");
        let first = temp.path().join("ab/cdefghij");
        let second = temp.path().join("ab/klmnopqr");
        write_atomic(&first, b"x").expect("write");
        write_atomic(&second, b"y").expect("write");

        remove_file_and_empty_parent(&first).expect("remove first");
        assert!(temp.path().join("ab").exists());

        remove_file_and_empty_parent(&second).expect("remove second");
        assert!(!temp.path().join("ab").exists());

        remove_file_and_empty_parent(&second).expect("missing file is fine");
    }

    #[test]
    fn jsonl_round_trip() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Record {
            id: u32,
            message: String,
        }

        let temp = TempDir::new().expect("tempdir");
        let file = temp.path().join("records.jsonl");
        assert!(read_jsonl::<Record>(&file).expect("missing file").is_empty());

        for (id, message) in [(1, "first"), (2, "second")] {
            let record = Record {
                id,
                message: message.to_string(),
            };
            let json = serde_json::to_string(&record).expect("serialize");
            append_line(&file, &json).expect("append");
        }

        let records: Vec<Record> = read_jsonl(&file).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, "second");
    }
}
