//! wipman sync command implementation

use std::path::PathBuf;

use crate::cli::CommonOptions;
use crate::error::{Error, Result};
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::output::{emit_success, Report};
use crate::storage::Storage;
use crate::sync::{self, DirectoryRemote, DryRunRemote, RemoteStore};
use crate::workspace::load_config;

pub fn run(options: &CommonOptions, to: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let root = options.resolve_root()?;
    let config = load_config(&root)?;
    let storage = Storage::new(&root, config.view_extension.clone());
    if !config.sync.enabled {
        return Err(Error::InvalidArgument(
            "sync is disabled in .wipman.toml".to_string(),
        ));
    }

    let _lock = FileLock::acquire(storage.lock_file(), DEFAULT_LOCK_TIMEOUT_MS)?;
    let mut remote: Box<dyn RemoteStore> = match (&to, dry_run) {
        (_, true) => Box::new(DryRunRemote::default()),
        (Some(dir), false) => Box::new(DirectoryRemote::new(dir)),
        (None, false) => {
            return Err(Error::InvalidArgument(
                "--to <dir> is required unless --dry-run is given".to_string(),
            ))
        }
    };
    let report = sync::sync(&storage, &config.sync, remote.as_mut(), dry_run)?;

    let header = if dry_run {
        "wipman sync: dry run"
    } else {
        "wipman sync: pushed"
    };
    let mut human = Report::new(header);
    human.field("buffered records", report.records.to_string());
    human.field("after squash", report.squashed.to_string());
    human.field("set tasks", report.summary.set_tasks.to_string());
    human.field("set views", report.summary.set_views.to_string());
    human.field("delete tasks", report.summary.delete_tasks.to_string());
    human.field("delete views", report.summary.delete_views.to_string());
    if let Some(dir) = &to {
        if !dry_run {
            human.field("remote", dir.display().to_string());
        }
    }

    emit_success(options.output(), "sync", &report, &human)
}
