//! wipman init command implementation
//!
//! Creates `views/`, the Backlog view and a default `.wipman.toml` in the root.

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::CommonOptions;
use crate::config::Config;
use crate::error::Result;
use crate::indexer::{self, RootStatus};
use crate::output::{emit_success, Report};
use crate::storage::Storage;
use crate::workspace::load_config;

#[derive(Serialize)]
struct InitReport {
    root: PathBuf,
    previous_status: RootStatus,
    created: bool,
    backlog: PathBuf,
    wrote_config: bool,
}

pub fn run(options: &CommonOptions) -> Result<()> {
    let root = options.resolve_root()?;
    let config = load_config(&root)?;
    let storage = Storage::new(&root, config.view_extension);

    let previous_status = indexer::detect_root(&storage);
    let created = indexer::init_root(&storage)?;
    let config_file = storage.config_file();
    let wrote_config = !config_file.exists();
    if wrote_config {
        Config::default().save(&config_file)?;
    }

    let report = InitReport {
        root: root.clone(),
        previous_status,
        created,
        backlog: storage.backlog_file(),
        wrote_config,
    };

    let header = if created {
        "wipman init: initialized root"
    } else {
        "wipman init: already initialized"
    };
    let mut human = Report::new(header);
    human.field("root", root.display().to_string());
    human.field("backlog", storage.backlog_file().display().to_string());
    if wrote_config {
        human.line(format!("wrote default {}", config_file.display()));
    }
    if created {
        human.hint("wipman task new <title>");
        human.hint("wipman view new <title>");
    }

    emit_success(options.output(), "init", &report, &human)
}
