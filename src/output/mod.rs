//! Output formatting module
//!
//! Handles:
//! - Human-readable event lines
//! - JSON-lines event records (one object per line, `event` tag plus attributes)
//! - Ready block-device snapshots in both formats
//! - The stdout sink used by the binary

use anyhow::Result;
use log::warn;
use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

use crate::filters::EventFilter;
use crate::models::{BlockDeviceInfo, DeviceEvent};
use crate::monitor::EventSink;

/// An event stamped with the time it was published
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: DeviceEvent,
}

/// Stamp an event with the current time.
/// This is the canonical way to build a record for output.
pub fn create_event_record(event: DeviceEvent) -> Result<EventRecord> {
    let timestamp = OffsetDateTime::now_utc().format(&Iso8601::DEFAULT)?;
    Ok(EventRecord { timestamp, event })
}

fn or_unknown(value: &Option<String>) -> &str {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v,
        _ => "(unknown)",
    }
}

/// Format an event record as human-readable text
pub fn format_event_human(record: &EventRecord) -> String {
    match &record.event {
        DeviceEvent::DiskAdded(disk) | DeviceEvent::DiskRemoved(disk) => {
            let verb = if record.event.is_removal() { "removed" } else { "added" };
            format!(
                "[{}] Disk {}: {} {}\n  Object: {}",
                record.timestamp,
                verb,
                or_unknown(&disk.vendor),
                or_unknown(&disk.model),
                disk.id
            )
        }
        DeviceEvent::BlockDeviceReady(block) | DeviceEvent::BlockDeviceRemoved(block) => {
            let verb = if record.event.is_removal() { "removed" } else { "ready" };
            format!(
                "[{}] Block device {}: {} ({})\n  Object: {}\n  Drive: {}",
                record.timestamp,
                verb,
                or_unknown(&block.device_path),
                or_unknown(&block.fs_type),
                block.id,
                or_unknown(&block.drive)
            )
        }
    }
}

/// Format an event record as a single JSON line
pub fn format_event_json(record: &EventRecord) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Format the ready block devices for display
pub fn format_snapshot_human(devices: &[BlockDeviceInfo]) -> String {
    if devices.is_empty() {
        return "No ready block devices.".to_string();
    }

    let mut out = format!("Ready block devices ({}):", devices.len());
    for device in devices {
        out.push_str(&format!(
            "\n  {} ({}) on {}",
            or_unknown(&device.device_path),
            or_unknown(&device.fs_type),
            or_unknown(&device.drive)
        ));
    }
    out
}

/// Pretty-printed array of attribute maps, one per device
pub fn format_snapshot_json(devices: &[BlockDeviceInfo]) -> Result<String> {
    let maps: Vec<_> = devices.iter().map(BlockDeviceInfo::attributes).collect();
    Ok(serde_json::to_string_pretty(&maps)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Writes every event that passes the filter, one per line (or block)
pub struct EventPrinter<W: Write + Send> {
    out: Mutex<W>,
    format: OutputFormat,
    filter: EventFilter,
}

impl<W: Write + Send> EventPrinter<W> {
    pub fn new(out: W, format: OutputFormat, filter: EventFilter) -> Self {
        Self {
            out: Mutex::new(out),
            format,
            filter,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self, event: DeviceEvent) -> Result<String> {
        let record = create_event_record(event)?;
        match self.format {
            OutputFormat::Human => Ok(format_event_human(&record)),
            OutputFormat::Json => format_event_json(&record),
        }
    }
}

impl<W: Write + Send> EventSink for EventPrinter<W> {
    fn publish(&self, event: DeviceEvent) {
        if !self.filter.matches(&event) {
            return;
        }

        let line = match self.render(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("unable to format event: {}", e);
                return;
            }
        };

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", line).and_then(|()| out.flush()) {
            warn!("unable to write event: {}", e);
        }
    }
}
