//! On-disk grammar for task and view files.
//!
//! Both file kinds start with a `key=value` metadata block followed by a line
//! containing exactly `---`. Task files carry the free-text body after the
//! delimiter verbatim; view files carry one checkbox line per entry:
//!
//! ```text
//! id=1111111111
//! title=HIRU
//! created=2022-10-01T18:00:00.000Z
//! updated=2022-10-04T16:41:23.858Z
//! tags=hiru
//! ---
//! - [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)
//! - [x] Typed inline, not promoted yet
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};
use crate::id;
use crate::model::{Task, View, ViewLine};

pub const METADATA_DELIMITER: &str = "---";

const OPEN_PREFIX: &str = "- [ ] ";
const DONE_PREFIX: &str = "- [x] ";
const LINK_SEPARATOR: &str = "  ";

const TASK_KEYS: [&str; 7] = [
    "title",
    "created",
    "updated",
    "tags",
    "blockedBy",
    "blocks",
    "completed",
];
const VIEW_KEYS: [&str; 5] = ["id", "title", "created", "updated", "tags"];

type Metadata = HashMap<String, String>;

/// Split a file into its metadata block and the text after the delimiter.
pub fn split_metadata_and_content<'a>(path: &Path, raw: &'a str) -> Result<(&'a str, &'a str)> {
    let delimiter = format!("\n{METADATA_DELIMITER}\n");
    if let Some((metadata, content)) = raw.split_once(&delimiter) {
        return Ok((metadata, content));
    }
    if let Some(metadata) = raw.strip_suffix(&format!("\n{METADATA_DELIMITER}")) {
        return Ok((metadata, ""));
    }
    Err(Error::parse(
        path,
        format!("no '{METADATA_DELIMITER}' line separating metadata from content"),
    ))
}

fn parse_metadata(path: &Path, raw: &str) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for line in raw.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::parse(path, format!("metadata line is not key=value: {line}")))?;
        if metadata.insert(key.to_string(), value.to_string()).is_some() {
            return Err(Error::parse(
                path,
                format!("metadata keys must be unique, but '{key}' is used multiple times"),
            ));
        }
    }
    Ok(metadata)
}

fn require_keys(path: &Path, metadata: &Metadata, keys: &[&str]) -> Result<()> {
    let missing: Vec<&str> = keys
        .iter()
        .copied()
        .filter(|key| !metadata.contains_key(*key))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let reasons: Vec<String> = missing
        .iter()
        .map(|key| format!("metadata must contain '{key}'"))
        .collect();
    Err(Error::parse(path, reasons.join("; ")))
}

fn field<'a>(metadata: &'a Metadata, key: &str) -> &'a str {
    metadata.get(key).map(String::as_str).unwrap_or_default()
}

pub fn serialize_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_date(path: &Path, key: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| Error::parse(path, format!("'{key}' is not a valid timestamp ({raw}): {err}")))
}

/// Sets are written sorted and comma-joined; an empty value is an empty set.
pub fn serialize_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(",")
}

pub fn parse_set(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(path: &Path, key: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::parse(
            path,
            format!("'{key}' must be 'true' or 'false', found '{other}'"),
        )),
    }
}

// =========================================================================
// Task files
// =========================================================================

/// Derive a task id from its `xx/yyyyyyyy` path.
pub fn task_id_from_path(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    let dir = path.parent()?.file_name()?.to_str()?;
    Some(format!("{dir}{file}"))
}

pub fn serialize_task(task: &Task) -> String {
    let metadata = [
        format!("id={}", task.id),
        format!("title={}", task.title),
        format!("created={}", serialize_date(&task.created)),
        format!("updated={}", serialize_date(&task.updated)),
        format!("tags={}", serialize_set(&task.tags)),
        format!("blockedBy={}", serialize_set(&task.blocked_by)),
        format!("blocks={}", serialize_set(&task.blocks)),
        format!("completed={}", task.completed),
    ];
    format!(
        "{}\n{METADATA_DELIMITER}\n{}",
        metadata.join("\n"),
        task.content
    )
}

/// Parse a task file. The id comes from the path; a metadata `id` that
/// disagrees with it is rejected.
pub fn parse_task(path: &Path, raw: &str) -> Result<Task> {
    let id = task_id_from_path(path)
        .filter(|id| id::is_valid_id(id))
        .ok_or_else(|| Error::parse(path, "path does not encode a task id"))?;

    let (raw_metadata, content) = split_metadata_and_content(path, raw)?;
    let metadata = parse_metadata(path, raw_metadata)?;
    require_keys(path, &metadata, &TASK_KEYS)?;

    if let Some(declared) = metadata.get("id") {
        if declared != &id {
            return Err(Error::parse(
                path,
                format!("metadata id '{declared}' does not match path id '{id}'"),
            ));
        }
    }

    Ok(Task {
        id,
        title: field(&metadata, "title").to_string(),
        content: content.to_string(),
        created: parse_date(path, "created", field(&metadata, "created"))?,
        updated: parse_date(path, "updated", field(&metadata, "updated"))?,
        tags: parse_set(field(&metadata, "tags")),
        blocked_by: parse_set(field(&metadata, "blockedBy")),
        blocks: parse_set(field(&metadata, "blocks")),
        completed: parse_bool(path, "completed", field(&metadata, "completed"))?,
    })
}

// =========================================================================
// View files
// =========================================================================

pub fn serialize_view(view: &View) -> String {
    let mut raw = [
        format!("id={}", view.id),
        format!("title={}", view.title),
        format!("created={}", serialize_date(&view.created)),
        format!("updated={}", serialize_date(&view.updated)),
        format!("tags={}", serialize_set(&view.tags)),
        METADATA_DELIMITER.to_string(),
    ]
    .join("\n");
    raw.push('\n');
    for line in &view.content {
        raw.push_str(&serialize_view_line(line));
        raw.push('\n');
    }
    raw
}

/// Parse only the metadata of a view file; `content` is left empty.
pub fn parse_view_metadata(path: &Path, raw: &str) -> Result<View> {
    if raw.is_empty() {
        return Err(Error::parse(path, "cannot parse an empty file into a view"));
    }
    let (raw_metadata, _) = split_metadata_and_content(path, raw)?;
    let metadata = parse_metadata(path, raw_metadata)?;
    require_keys(path, &metadata, &VIEW_KEYS)?;

    Ok(View {
        id: field(&metadata, "id").to_string(),
        title: field(&metadata, "title").to_string(),
        tags: parse_set(field(&metadata, "tags")),
        created: parse_date(path, "created", field(&metadata, "created"))?,
        updated: parse_date(path, "updated", field(&metadata, "updated"))?,
        content: Vec::new(),
    })
}

/// Parse a full view file. Blank content lines are skipped.
pub fn parse_view(path: &Path, raw: &str) -> Result<View> {
    let mut view = parse_view_metadata(path, raw)?;
    let (_, raw_content) = split_metadata_and_content(path, raw)?;
    for line in raw_content.split('\n') {
        if line.is_empty() {
            continue;
        }
        let parsed = parse_view_line(line).map_err(|reason| Error::parse(path, reason))?;
        view.content.push(parsed);
    }
    Ok(view)
}

/// Markdown link from a view file to a task file, e.g. `[abcdefghij](../ab/cdefghij)`.
pub fn task_link(task_id: &str) -> String {
    match id::split_task_id(task_id) {
        Some((dir, file)) => format!("[{task_id}](../{dir}/{file})"),
        None => format!("[{task_id}]({task_id})"),
    }
}

pub fn serialize_view_line(line: &ViewLine) -> String {
    let prefix = if line.completed { DONE_PREFIX } else { OPEN_PREFIX };
    match &line.id {
        Some(id) => format!("{prefix}{}{LINK_SEPARATOR}{}", line.title, task_link(id)),
        None => format!("{prefix}{}", line.title),
    }
}

/// Parse one checkbox line. Errors carry a human readable reason.
pub fn parse_view_line(line: &str) -> std::result::Result<ViewLine, String> {
    let (completed, rest) = if let Some(rest) = line.strip_prefix(OPEN_PREFIX) {
        (false, rest)
    } else if let Some(rest) = line.strip_prefix(DONE_PREFIX) {
        (true, rest)
    } else {
        return Err(format!(
            "cannot understand line, make sure that it starts with either \"{OPEN_PREFIX}\" or \"{DONE_PREFIX}\". Line: {line}"
        ));
    };

    match split_link(rest)? {
        Some((title, id)) => Ok(ViewLine {
            completed,
            title: title.trim_end().to_string(),
            id: Some(id),
        }),
        None => Ok(ViewLine::unlinked(rest.trim_end(), completed)),
    }
}

/// Split `title  [id](../dd/ffffffff)` into title and id. Text that does not
/// have the shape of a task link is left to the title.
fn split_link(rest: &str) -> std::result::Result<Option<(&str, String)>, String> {
    let trimmed = rest.trim_end();
    if !trimmed.ends_with(')') {
        return Ok(None);
    }
    let Some(start) = trimmed.rfind(" [") else {
        return Ok(None);
    };
    let link = &trimmed[start + 1..];
    let Some((link_id, dir, file)) = parse_link(link) else {
        return Ok(None);
    };

    let path_id = format!("{dir}{file}");
    if link_id != path_id {
        return Err(format!(
            "ids in the link description and path do not match:\n  link: {link}\n  id  : {link_id}\n  path: {path_id}"
        ));
    }
    Ok(Some((&trimmed[..start], path_id)))
}

fn parse_link(link: &str) -> Option<(&str, &str, &str)> {
    let inner = link.strip_prefix('[')?.strip_suffix(')')?;
    let (link_id, target) = inner.split_once("](")?;
    let target = target.strip_prefix("../")?;
    let (dir, file) = target.split_once('/')?;

    let letters = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_lowercase());
    let well_formed = letters(link_id, id::ID_LEN)
        && letters(dir, id::DIR_LEN)
        && letters(file, id::ID_LEN - id::DIR_LEN);
    well_formed.then_some((link_id, dir, file))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::model::tags;

    const TASK_FILE: &str = "id=aaaaaaaaaa\n\
title=Task foo\n\
created=2022-10-01T18:00:00.000Z\n\
updated=2022-10-04T16:41:23.858Z\n\
tags=hiru\n\
blockedBy=\n\
blocks=\n\
completed=false\n\
---\n\
This is the content of the foo task\n";

    const VIEW_FILE: &str = "id=1111111111\n\
title=HIRU\n\
created=2022-10-01T18:00:00.000Z\n\
updated=2022-10-04T16:41:23.858Z\n\
tags=hiru\n\
---\n\
- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)\n\
- [x] Task bar  [bbbbbbbbbb](../bb/bbbbbbbb)\n";

    fn task_path() -> PathBuf {
        PathBuf::from("root/aa/aaaaaaaa")
    }

    #[test]
    fn task_file_round_trips_byte_for_byte() {
        let task = parse_task(&task_path(), TASK_FILE).expect("parse");
        assert_eq!(task.id, "aaaaaaaaaa");
        assert_eq!(task.title, "Task foo");
        assert_eq!(task.tags, tags(["hiru"]));
        assert!(task.blocked_by.is_empty());
        assert!(!task.completed);
        assert_eq!(task.content, "This is the content of the foo task\n");
        assert_eq!(serialize_task(&task), TASK_FILE);
    }

    #[test]
    fn task_tags_are_written_sorted() {
        let mut task = parse_task(&task_path(), TASK_FILE).expect("parse");
        task.tags = tags(["zeta", "alpha", "mid"]);
        assert!(serialize_task(&task).contains("\ntags=alpha,mid,zeta\n"));
    }

    #[test]
    fn task_missing_keys_are_reported() {
        let raw = "title=Task foo\n---\n";
        let err = parse_task(&task_path(), raw).expect_err("missing keys");
        let message = err.to_string();
        assert!(message.contains("'created'"), "{message}");
        assert!(message.contains("'completed'"), "{message}");
    }

    #[test]
    fn task_metadata_id_must_match_path() {
        let raw = TASK_FILE.replace("id=aaaaaaaaaa", "id=bbbbbbbbbb");
        let err = parse_task(&task_path(), &raw).expect_err("mismatch");
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn duplicate_metadata_keys_are_rejected() {
        let raw = TASK_FILE.replace("blocks=\n", "blocks=\ntags=other\n");
        let err = parse_task(&task_path(), &raw).expect_err("duplicate");
        assert!(err.to_string().contains("'tags'"));
    }

    #[test]
    fn task_body_keeps_delimiter_lines_verbatim() {
        let raw = TASK_FILE.replace(
            "This is the content of the foo task\n",
            "first\n---\nsecond\n",
        );
        let task = parse_task(&task_path(), &raw).expect("parse");
        assert_eq!(task.content, "first\n---\nsecond\n");
        assert_eq!(serialize_task(&task), raw);
    }

    #[test]
    fn view_file_round_trips_byte_for_byte() {
        let path = PathBuf::from("root/views/hiru.view");
        let view = parse_view(&path, VIEW_FILE).expect("parse");
        assert_eq!(view.id, "1111111111");
        assert_eq!(view.tags, tags(["hiru"]));
        assert_eq!(view.content.len(), 2);
        assert!(view.content[1].completed);
        assert_eq!(serialize_view(&view), VIEW_FILE);
    }

    #[test]
    fn empty_view_content_serializes_without_blank_line() {
        let path = PathBuf::from("root/views/unused.view");
        let raw = "id=2222222222\ntitle=Unused view\ncreated=2022-10-01T18:00:00.000Z\nupdated=2022-10-04T16:41:23.858Z\ntags=some_unused_tag\n---\n";
        let view = parse_view(&path, raw).expect("parse");
        assert!(view.content.is_empty());
        assert_eq!(serialize_view(&view), raw);
    }

    #[test]
    fn view_metadata_only_skips_content() {
        let path = PathBuf::from("root/views/hiru.view");
        let view = parse_view_metadata(&path, VIEW_FILE).expect("parse");
        assert!(view.content.is_empty());
        assert_eq!(view.title, "HIRU");
    }

    #[test]
    fn empty_view_file_is_an_error() {
        let path = PathBuf::from("root/views/empty.view");
        assert!(parse_view(&path, "").is_err());
    }

    #[test]
    fn view_line_without_link_has_no_id() {
        let line = parse_view_line("- [ ] Buy milk  ").expect("parse");
        assert_eq!(line, ViewLine::unlinked("Buy milk", false));
    }

    #[test]
    fn view_line_with_link_has_id() {
        let line = parse_view_line("- [x] Task bazzzz  [dddddddddd](../dd/dddddddd)").expect("parse");
        assert!(line.completed);
        assert_eq!(line.title, "Task bazzzz");
        assert_eq!(line.id.as_deref(), Some("dddddddddd"));
    }

    #[test]
    fn view_line_link_mismatch_is_an_error() {
        let err = parse_view_line("- [ ] Task foo  [aaaaaaaaaa](../bb/aaaaaaaa)").expect_err("mismatch");
        assert!(err.contains("do not match"), "{err}");
    }

    #[test]
    fn view_line_with_unknown_prefix_is_an_error() {
        let err = parse_view_line("* Task foo").expect_err("prefix");
        assert!(err.contains("- [ ] "));
    }

    #[test]
    fn link_shaped_text_with_bad_id_stays_in_title() {
        let line = parse_view_line("- [ ] read [docs](../rust/book)").expect("parse");
        assert_eq!(line.title, "read [docs](../rust/book)");
        assert!(line.id.is_none());
    }

    #[test]
    fn serialize_view_line_renders_link() {
        let line = ViewLine {
            completed: false,
            title: "Task foo".to_string(),
            id: Some("aaaaaaaaaa".to_string()),
        };
        assert_eq!(
            serialize_view_line(&line),
            "- [ ] Task foo  [aaaaaaaaaa](../aa/aaaaaaaa)"
        );
    }
}
