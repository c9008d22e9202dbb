//! Directory health report.
//!
//! Reads the root afresh, independently of any live workspace, and checks
//! every (task, view) pair against the membership rule. Views are compared
//! as written on disk, not as the view store would normalize them.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::indexer::{self, InvalidFile};
use crate::model::{should_include, Task, View};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairProblem {
    ExpectedTaskInViewButNotFound,
    DidNotExpectTaskInViewButFound,
    CompletionStatusMismatch,
    TitleMismatch,
    DuplicateTaskInView,
}

impl PairProblem {
    pub fn describe(&self) -> &'static str {
        match self {
            PairProblem::ExpectedTaskInViewButNotFound => "expected task in view but not found",
            PairProblem::DidNotExpectTaskInViewButFound => "did not expect task in view but found",
            PairProblem::CompletionStatusMismatch => "task completion status mismatch",
            PairProblem::TitleMismatch => "task title mismatch",
            PairProblem::DuplicateTaskInView => "task listed more than once in view",
        }
    }
}

/// One task and one view that disagree. There is one entry per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectedPair {
    pub task: PathBuf,
    pub view: PathBuf,
    pub problems: Vec<PairProblem>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub invalid_files: Vec<InvalidFile>,
    pub disconnected: Vec<DisconnectedPair>,
}

impl HealthReport {
    pub fn problems_found(&self) -> bool {
        !self.invalid_files.is_empty() || !self.disconnected.is_empty()
    }
}

pub fn check_pair(task: &Task, view: &View) -> Vec<PairProblem> {
    let expected = should_include(&view.tags, &task.tags);
    let mut problems = match (view.line(&task.id), expected) {
        (None, true) => vec![PairProblem::ExpectedTaskInViewButNotFound],
        (None, false) => Vec::new(),
        (Some(_), false) => vec![PairProblem::DidNotExpectTaskInViewButFound],
        (Some(line), true) => {
            let mut problems = Vec::new();
            if line.title != task.title {
                problems.push(PairProblem::TitleMismatch);
            }
            if line.completed != task.completed {
                problems.push(PairProblem::CompletionStatusMismatch);
            }
            problems
        }
    };
    if view.duplicate_task_ids().contains(&task.id) {
        problems.push(PairProblem::DuplicateTaskInView);
    }
    problems
}

/// Scan the root and report every inconsistency found.
pub fn verify(storage: &Storage) -> Result<HealthReport> {
    let (scan, invalid_files) = indexer::scan_root_lenient(storage)?;

    let mut disconnected = Vec::new();
    for (task_path, task) in &scan.tasks {
        for (view_path, view) in &scan.views {
            let problems = check_pair(task, view);
            if !problems.is_empty() {
                disconnected.push(DisconnectedPair {
                    task: storage.relative(task_path).to_path_buf(),
                    view: storage.relative(view_path).to_path_buf(),
                    problems,
                });
            }
        }
    }

    tracing::info!(
        invalid = invalid_files.len(),
        disconnected = disconnected.len(),
        "verified root"
    );
    Ok(HealthReport {
        invalid_files,
        disconnected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;
    use tempfile::TempDir;

    const BACKLOG: &str = "id=0000000000\ntitle=Backlog\ncreated=2022-10-01T18:00:00.000Z\nupdated=2022-10-04T16:41:23.858Z\ntags=\n---\n";
    const TASK: &str = "id=aaaaaaaaaa\ntitle=Task foo\ncreated=2022-10-01T18:00:00.000Z\nupdated=2022-10-04T16:41:23.858Z\ntags=hiru\nblockedBy=\nblocks=\ncompleted=false\n---\n";

    fn write(temp: &TempDir, relative: &str, content: &str) {
        storage::write_atomic(&temp.path().join(relative), content.as_bytes()).expect("write");
    }

    #[test]
    fn missing_task_in_tagged_view_is_reported() {
        let temp = TempDir::new().expect("tempdir");
        write(
            &temp,
            "views/backlog.view",
            &format!("{BACKLOG}- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)\n"),
        );
        write(
            &temp,
            "views/hiru.view",
            "id=1111111111\ntitle=HIRU\ncreated=2022-10-01T18:00:00.000Z\nupdated=2022-10-04T16:41:23.858Z\ntags=hiru\n---\n",
        );
        write(&temp, "aa/aaaaaaaa", TASK);

        let report = verify(&Storage::new(temp.path(), "view")).expect("verify");
        assert!(report.problems_found());
        assert_eq!(
            report.disconnected,
            vec![DisconnectedPair {
                task: PathBuf::from("aa/aaaaaaaa"),
                view: PathBuf::from("views/hiru.view"),
                problems: vec![PairProblem::ExpectedTaskInViewButNotFound],
            }]
        );
    }

    #[test]
    fn stale_line_reports_title_and_status() {
        let temp = TempDir::new().expect("tempdir");
        write(
            &temp,
            "views/backlog.view",
            &format!("{BACKLOG}- [x] Old title  [aaaaaaaaaa](../aa/aaaaaaaa)\n"),
        );
        write(&temp, "aa/aaaaaaaa", TASK);

        let report = verify(&Storage::new(temp.path(), "view")).expect("verify");
        assert_eq!(report.disconnected.len(), 1);
        assert_eq!(
            report.disconnected[0].problems,
            vec![PairProblem::TitleMismatch, PairProblem::CompletionStatusMismatch]
        );
    }

    #[test]
    fn task_listed_twice_is_reported() {
        let temp = TempDir::new().expect("tempdir");
        let line = "- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)\n";
        write(&temp, "views/backlog.view", &format!("{BACKLOG}{line}{line}"));
        write(&temp, "aa/aaaaaaaa", TASK);

        let report = verify(&Storage::new(temp.path(), "view")).expect("verify");
        assert!(report.invalid_files.is_empty());
        assert_eq!(
            report.disconnected,
            vec![DisconnectedPair {
                task: PathBuf::from("aa/aaaaaaaa"),
                view: PathBuf::from("views/backlog.view"),
                problems: vec![PairProblem::DuplicateTaskInView],
            }]
        );
    }

    #[test]
    fn unparsable_files_are_collected() {
        let temp = TempDir::new().expect("tempdir");
        write(&temp, "views/backlog.view", BACKLOG);
        write(&temp, "bb/bbbbbbbb", "title=no delimiter\n");

        let report = verify(&Storage::new(temp.path(), "view")).expect("verify");
        assert!(report.problems_found());
        assert!(report.disconnected.is_empty());
        assert_eq!(report.invalid_files.len(), 1);
    }

    #[test]
    fn unexpected_line_is_reported() {
        let task: Task = crate::format::parse_task(
            std::path::Path::new("aa/aaaaaaaa"),
            TASK,
        )
        .expect("task");
        let view = crate::format::parse_view(
            std::path::Path::new("views/other.view"),
            "id=2222222222\ntitle=Other\ncreated=2022-10-01T18:00:00.000Z\nupdated=2022-10-04T16:41:23.858Z\ntags=other\n---\n- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)\n",
        )
        .expect("view");
        assert_eq!(
            check_pair(&task, &view),
            vec![PairProblem::DidNotExpectTaskInViewButFound]
        );
    }
}
