//! Appends payloads to one JSON-lines file per event kind.
//!
//! A delivery renders every kind and opens every file before writing
//! anything. If a write still fails part way, the kinds already written are
//! remembered, and a retry of the same batch only writes the rest.

use crate::events::EventCollection;
use crate::models::event::EventKind;
use crate::sink::{EventSink, SinkError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const KINDS: [EventKind; 3] = [EventKind::Log, EventKind::Catalog, EventKind::Meta];

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError {
    let path = path.to_path_buf();
    move |source| SinkError::Io { path, source }
}

#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    name: String,
    dir: PathBuf,
    /// Batch whose last delivery failed, with the kinds it already wrote
    partial: Option<(EventCollection, BTreeSet<EventKind>)>,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "jsonl".to_string(),
            dir: dir.into(),
            partial: None,
        }
    }

    pub fn path_for(&self, kind: EventKind) -> PathBuf {
        self.dir.join(format!("{}_events.jsonl", kind.as_str()))
    }

    fn render(events: &EventCollection, kind: EventKind) -> Result<Vec<u8>, SinkError> {
        let payloads: Vec<Value> = match kind {
            EventKind::Log => events.log_events().iter().map(|e| e.as_payload()).collect(),
            EventKind::Catalog => events.catalog_events().iter().map(|e| e.as_payload()).collect(),
            EventKind::Meta => events.meta_events().iter().map(|e| e.as_payload()).collect(),
        };
        let mut buffer = Vec::new();
        for payload in payloads {
            serde_json::to_writer(&mut buffer, &payload)?;
            buffer.push(b'\n');
        }
        Ok(buffer)
    }

    fn open(&self, kind: EventKind) -> Result<File, SinkError> {
        let path = self.path_for(kind);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))
    }

    /// Write every kind not yet in `written`, recording each one done.
    fn write_remaining(&self, events: &EventCollection, written: &mut BTreeSet<EventKind>) -> Result<(), SinkError> {
        let mut ready = Vec::new();
        for kind in KINDS.into_iter().filter(|kind| !written.contains(kind)) {
            let buffer = Self::render(events, kind)?;
            ready.push((kind, self.open(kind)?, buffer));
        }

        for (kind, mut file, buffer) in ready {
            let path = self.path_for(kind);
            file.write_all(&buffer).map_err(io_error(&path))?;
            file.flush().map_err(io_error(&path))?;
            written.insert(kind);
        }
        Ok(())
    }
}

impl EventSink for JsonLinesSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, events: &EventCollection) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let mut written = match self.partial.take() {
            Some((batch, written)) if batch == *events => written,
            _ => BTreeSet::new(),
        };
        let result = self.write_remaining(events, &mut written);
        if result.is_err() && !written.is_empty() {
            self.partial = Some((events.clone(), written));
        }
        result
    }
}
