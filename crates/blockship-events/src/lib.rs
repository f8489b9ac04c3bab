//! Event log for blockship publish runs.
//!
//! Every pipeline step records a [`PublishEvent`]. The log is kept in memory
//! for the run outcome and can be appended to a JSONL file so that several
//! runs accumulate into one audit trail.
//!
//! # Example
//!
//! ```
//! use blockship_events::EventLog;
//! use blockship_types::{EventType, PublishEvent};
//!
//! let mut log = EventLog::new();
//! log.record(PublishEvent::now(EventType::VcsTagged { tag: "v1.0.0".into() }, "acme/users"));
//! assert_eq!(log.events_for_asset("acme/users").len(), 1);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use blockship_types::{EventType, PublishEvent};

/// Asset name used for events that concern the whole push.
pub const ALL_ASSETS: &str = "all";

#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<PublishEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: PublishEvent) {
        self.events.push(event);
    }

    /// Record `event_type` for `asset` stamped with the current time.
    pub fn emit(&mut self, event_type: EventType, asset: impl Into<String>) {
        self.record(PublishEvent::now(event_type, asset));
    }

    /// Append every recorded event to `path`, one JSON object per line.
    pub fn append_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    /// Read a JSONL log back. Blank lines are skipped; a missing file is empty.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read events file {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: PublishEvent = serde_json::from_str(&line).with_context(|| {
                format!("invalid event on line {} of {}", index + 1, path.display())
            })?;
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn events_for_asset(&self, asset: &str) -> Vec<&PublishEvent> {
        self.events.iter().filter(|e| e.asset == asset).collect()
    }

    pub fn all_events(&self) -> &[PublishEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<PublishEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
