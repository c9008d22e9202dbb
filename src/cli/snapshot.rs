//! wipman snapshot command implementation

use crate::cli::{CommonOptions, Session};
use crate::error::Result;
use crate::output::{emit_success, Report};

pub fn run(options: &CommonOptions, write: bool) -> Result<()> {
    let session = Session::open(options, write)?;
    let snapshot = session.workspace.snapshot();

    let mut human = Report::new("Index snapshot");
    for (tag, ids) in &snapshot.tag_index {
        human.line(format!("tag {tag}: {}", ids.join(", ")));
    }
    for (view_id, ids) in &snapshot.tasks_per_view {
        human.line(format!("view {view_id}: {} task(s)", ids.len()));
    }
    if write {
        let path = session.workspace.write_snapshot()?;
        human.field("written", path.display().to_string());
    }

    emit_success(options.output(), "snapshot", &snapshot, &human)
}
