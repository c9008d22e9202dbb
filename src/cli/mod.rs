//! Command-line interface for wipman
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::error::{Error, Result};
use crate::events::EventDestination;
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::output::OutputOptions;
use crate::storage::LOCK_FILE;
use crate::workspace::Workspace;

mod init;
mod save;
mod snapshot;
mod sync;
mod task;
mod verify;
mod view;
mod watch;

/// wipman - plain-text tasks and views, kept in sync
///
/// Every task is a file, every view is a checklist file filtered by tags.
/// Edit either one and wipman propagates the change to every other file.
#[derive(Parser, Debug)]
#[command(name = "wipman")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory (defaults to current directory)
    #[arg(long, global = true, env = "WIPMAN_DIR")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write change events as JSON lines to a file, or `-` for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a wipman root
    Init,

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// View management
    #[command(subcommand)]
    View(ViewCommands),

    /// Propagate an edit made to a task or view file
    Save {
        /// The saved (or deleted) file
        path: PathBuf,
    },

    /// Watch the root and propagate every edit
    Watch {
        /// Quiet period before a burst of changes is handled (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,
    },

    /// Check every task against every view
    Verify,

    /// Push buffered file changes to a remote
    Sync {
        /// Directory that receives tasks and views as JSON documents
        #[arg(long, required_unless_present = "dry_run")]
        to: Option<PathBuf>,

        /// Show what would be pushed; keep the buffer
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the in-memory indexes
    Snapshot {
        /// Also write the snapshot under .snapshots/
        #[arg(long)]
        write: bool,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    New {
        /// Task title
        #[arg(default_value = crate::model::UNTITLED)]
        title: String,

        /// Tags (comma-separated or repeated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Delete a task from every view
    Rm {
        /// Task id
        id: String,
    },

    /// List tasks
    Ls {
        /// Only tasks carrying every one of these tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

/// View subcommands
#[derive(Subcommand, Debug)]
pub enum ViewCommands {
    /// Create a view (it starts with no tags and lists every task)
    New {
        /// View title
        #[arg(default_value = crate::model::UNTITLED)]
        title: String,
    },

    /// Delete a view file (tasks are kept)
    Rm {
        /// View id
        id: String,
    },

    /// List views
    Ls,
}

/// Flags every command shares.
#[derive(Debug, Clone)]
pub(crate) struct CommonOptions {
    pub root: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

impl CommonOptions {
    pub fn resolve_root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn event_destination(&self) -> Option<EventDestination> {
        EventDestination::parse(self.events.as_deref())
    }

    /// Output options; events on stdout silence regular output.
    pub fn output(&self) -> OutputOptions {
        let events_to_stdout = matches!(self.event_destination(), Some(EventDestination::Stdout));
        OutputOptions {
            json: self.json && !events_to_stdout,
            quiet: self.quiet || events_to_stdout,
        }
    }
}

/// An open workspace, holding the root lock when it may write.
pub(crate) struct Session {
    pub workspace: Workspace,
    _lock: Option<FileLock>,
}

impl Session {
    pub fn open(options: &CommonOptions, mutating: bool) -> Result<Self> {
        let root = options.resolve_root()?;
        let lock = if mutating && root.is_dir() {
            Some(FileLock::acquire(root.join(LOCK_FILE), DEFAULT_LOCK_TIMEOUT_MS)?)
        } else {
            None
        };
        let mut workspace = Workspace::open(&root)?;
        if let Some(destination) = options.event_destination() {
            workspace.subscribe(Box::new(destination.open()?));
        }
        Ok(Self {
            workspace,
            _lock: lock,
        })
    }
}

/// Absolute form of a user-supplied path. Deleted files are resolved through
/// their parent directory.
pub(crate) fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    if let Ok(canonical) = absolute.canonicalize() {
        return Ok(canonical);
    }
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => Ok(parent.join(name)),
            Err(_) => Ok(absolute),
        },
        _ => Err(Error::InvalidArgument(format!(
            "cannot resolve path {}",
            path.display()
        ))),
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let common = CommonOptions {
            root: self.root,
            json: self.json,
            quiet: self.quiet,
            events: self.events,
        };
        match self.command {
            Commands::Init => init::run(&common),
            Commands::Task(cmd) => match cmd {
                TaskCommands::New { title, tags } => task::run_new(&common, title, tags),
                TaskCommands::Rm { id } => task::run_rm(&common, &id),
                TaskCommands::Ls { tags } => task::run_list(&common, tags),
            },
            Commands::View(cmd) => match cmd {
                ViewCommands::New { title } => view::run_new(&common, &title),
                ViewCommands::Rm { id } => view::run_rm(&common, &id),
                ViewCommands::Ls => view::run_list(&common),
            },
            Commands::Save { path } => save::run(&common, &path),
            Commands::Watch { debounce_ms } => watch::run(&common, debounce_ms),
            Commands::Verify => verify::run(&common),
            Commands::Sync { to, dry_run } => sync::run(&common, to, dry_run),
            Commands::Snapshot { write } => snapshot::run(&common, write),
        }
    }
}
