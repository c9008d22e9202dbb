//! Change feeds and event output.
//!
//! Every store owns a [`ChangeFeed`]: mutations publish typed change records
//! into it and the workspace drains it, depth first, once the mutation has
//! fully applied. Drained records are journaled as [`Change`] values and can
//! be emitted as JSON lines to stdout or a file for external integrations.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::files::FileChange;
use crate::task::TaskChange;
use crate::view::ViewChange;

pub const EVENT_SCHEMA_VERSION: &str = "wipman.event.v1";

/// Outbox of change records owned by a single store.
#[derive(Debug)]
pub struct ChangeFeed<T> {
    pending: VecDeque<T>,
}

impl<T> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<T> ChangeFeed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, change: T) {
        self.pending.push_back(change);
    }

    /// Take the oldest unconsumed record.
    pub fn next(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// A change record from any of the three channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", content = "change", rename_all = "snake_case")]
pub enum Change {
    Task(TaskChange),
    View(ViewChange),
    File(FileChange),
}

impl Change {
    /// Stable event name, e.g. `task_added` or `file_updated`.
    pub fn name(&self) -> &'static str {
        match self {
            Change::Task(change) => change.name(),
            Change::View(change) => change.name(),
            Change::File(change) => change.name(),
        }
    }
}

/// Receives every change the workspace settles.
pub trait ChangeListener {
    fn on_change(&mut self, change: &Change) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// A structured event wrapping one change record.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub event_id: String,
    pub event: &'static str,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn from_change(change: &Change) -> Result<Self> {
        Ok(Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event_id: Ulid::new().to_string(),
            event: change.name(),
            timestamp: Utc::now(),
            data: serde_json::to_value(change)?,
        })
    }
}

/// Event sink that writes JSONL output to a destination.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    /// Emit events to stdout.
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Emit events to a file, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    /// Write a single event as JSONL.
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

impl ChangeListener for EventSink {
    fn on_change(&mut self, change: &Change) -> Result<()> {
        self.emit(&Event::from_change(change)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::read_jsonl;

    #[test]
    fn feed_yields_records_in_publish_order() {
        let mut feed = ChangeFeed::new();
        feed.publish(1);
        feed.publish(2);
        feed.publish(3);
        assert_eq!(feed.len(), 3);
        assert_eq!(feed.next(), Some(1));
        assert_eq!(feed.drain(), vec![2, 3]);
        assert!(feed.is_empty());
        assert_eq!(feed.next(), None);
    }

    #[test]
    fn destination_dash_means_stdout() {
        assert!(matches!(
            EventDestination::parse(Some("-")),
            Some(EventDestination::Stdout)
        ));
        assert!(EventDestination::parse(Some("  ")).is_none());
        assert!(matches!(
            EventDestination::parse(Some("events.jsonl")),
            Some(EventDestination::File(_))
        ));
    }

    #[test]
    fn sink_appends_one_json_object_per_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let mut sink = EventSink::file(&path).expect("open sink");

        let change = Change::Task(TaskChange::TaskDeleted {
            id: "aaaaaaaaaa".to_string(),
        });
        sink.on_change(&change).expect("emit");
        sink.on_change(&change).expect("emit");

        let events: Vec<serde_json::Value> = read_jsonl(&path).expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["schema_version"], EVENT_SCHEMA_VERSION);
        assert_eq!(events[0]["event"], "task_deleted");
        assert_eq!(events[0]["data"]["channel"], "task");
        assert_eq!(events[0]["data"]["change"]["id"], "aaaaaaaaaa");
        assert_ne!(events[0]["event_id"], events[1]["event_id"]);
    }
}
