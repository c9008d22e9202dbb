//! wipman verify command implementation

use crate::cli::CommonOptions;
use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, Report};
use crate::storage::Storage;
use crate::verify;

pub fn run(options: &CommonOptions) -> Result<()> {
    let root = options.resolve_root()?;
    let config = Config::load_from_root(&root);
    let report = verify::verify(&Storage::new(&root, config.view_extension))?;

    let header = if report.problems_found() {
        "wipman verify: problems found"
    } else {
        "wipman verify: all good"
    };
    let mut human = Report::new(header);
    human.field("invalid files", report.invalid_files.len().to_string());
    human.field("disconnected pairs", report.disconnected.len().to_string());
    for invalid in &report.invalid_files {
        human.problem(format!("{}: {}", invalid.path.display(), invalid.reason));
    }
    for pair in &report.disconnected {
        let problems: Vec<&str> = pair.problems.iter().map(|problem| problem.describe()).collect();
        human.line(format!(
            "{} in {}: {}",
            pair.task.display(),
            pair.view.display(),
            problems.join(", ")
        ));
    }

    emit_success(options.output(), "verify", &report, &human)
}
