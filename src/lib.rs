//! wipman - Plain-text Task Library
//!
//! Tasks and views live as plain-text files under a root directory. The
//! library keeps them mutually consistent: an edit to either kind of file is
//! reconciled into in-memory stores and propagated to every other file it
//! affects.
//!
//! # Core Concepts
//!
//! - **Tasks**: one file per task, `xx/yyyyyyyy` under the root
//! - **Views**: checklist files under `views/`, filtered by an exact tag set
//! - **Backlog**: the view with no tags, listing every task
//! - **Cascade**: store change, view reaction, file rewrite, settled depth first
//!
//! # Module Organization
//!
//! - `task` / `view`: the two in-memory stores and their change records
//! - `files`: file synchronizer and on-save path classification
//! - `indexer`: root detection, init and the bootstrap scan
//! - `workspace`: owns one of each store and settles cascades
//! - `format`: task and view file grammar
//! - `verify`: directory health report
//! - `sync`: buffered changes for a remote store
//! - `events`: change feeds and JSONL event output
//! - `config`, `storage`, `lock`, `error`, `output`, `cli`: ambient plumbing

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod format;
pub mod id;
pub mod indexer;
pub mod lock;
pub mod model;
pub mod output;
pub mod storage;
pub mod sync;
pub mod task;
pub mod verify;
pub mod view;
pub mod workspace;

pub use error::{Error, Result};
