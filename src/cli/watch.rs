//! wipman watch command implementation
//!
//! Watches the root recursively and feeds every changed path through
//! on-save handling once the burst of events has gone quiet. The engine's
//! own writes come back as events too; they settle because unchanged files
//! are never rewritten.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::cli::save::describe;
use crate::cli::{CommonOptions, Session};
use crate::error::Result;
use crate::lock::FileLock;
use crate::workspace::{SaveOutcome, Workspace};

/// Paths collected while events keep arriving.
#[derive(Debug, Default)]
struct PendingPaths {
    paths: BTreeSet<PathBuf>,
    deadline: Option<Instant>,
}

impl PendingPaths {
    fn push(&mut self, paths: impl IntoIterator<Item = PathBuf>, debounce: Duration, now: Instant) {
        self.paths.extend(paths);
        self.deadline = Some(now + debounce);
    }

    fn timeout(&self, now: Instant) -> Duration {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(Duration::from_secs(3600))
    }

    /// Take the batch once the quiet period has passed.
    fn take_due(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(std::mem::take(&mut self.paths).into_iter().collect())
            }
            _ => None,
        }
    }
}

/// Take the due batch together with the root lock. While another process
/// holds the lock the batch goes back to waiting for another quiet period.
fn claim_batch(
    pending: &mut PendingPaths,
    lock_path: &Path,
    debounce: Duration,
    now: Instant,
) -> Result<Option<(FileLock, Vec<PathBuf>)>> {
    let Some(paths) = pending.take_due(now) else {
        return Ok(None);
    };
    match FileLock::try_acquire(lock_path)? {
        Some(lock) => Ok(Some((lock, paths))),
        None => {
            tracing::debug!(
                paths = paths.len(),
                "root is locked by another process, retrying later"
            );
            pending.push(paths, debounce, now);
            Ok(None)
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

pub fn run(options: &CommonOptions, debounce_ms: Option<u64>) -> Result<()> {
    let mut session = Session::open(options, false)?;
    let root = session.workspace.storage().root().to_path_buf();
    let lock_path = session.workspace.storage().lock_file();
    let debounce = Duration::from_millis(
        debounce_ms.unwrap_or(session.workspace.config().watch.debounce_ms),
    );

    let (event_tx, event_rx) = mpsc::channel();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "watching");
    if !options.output().quiet && !options.output().json {
        eprintln!("watching {} (ctrl-c to stop)", root.display());
    }

    let mut pending = PendingPaths::default();
    loop {
        match event_rx.recv_timeout(pending.timeout(Instant::now())) {
            Ok(Ok(event)) if is_relevant(&event.kind) => {
                pending.push(event.paths, debounce, Instant::now());
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "watch error");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some((_lock, paths)) =
                    claim_batch(&mut pending, &lock_path, debounce, Instant::now())?
                {
                    handle_batch(&mut session.workspace, options, paths);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

/// Errors on a single path are reported and do not stop the watcher.
fn handle_batch(workspace: &mut Workspace, options: &CommonOptions, paths: Vec<PathBuf>) {
    for path in paths {
        match workspace.on_save(&path) {
            Ok(SaveOutcome::Ignored { .. }) => {}
            Ok(outcome) => {
                tracing::debug!(path = %path.display(), "propagated change");
                if !options.output().quiet {
                    eprintln!("{}", describe(&outcome));
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot handle change");
                eprintln!("error: {}: {err}", path.display());
            }
        }
    }
    workspace.take_journal();
}
