//! Parser for `udisksctl monitor` output
//!
//! Classifies each line into one of a fixed set of shapes and folds it into
//! the open disk / block-device records, producing lifecycle events.
//!
//! Shapes are tried in this order, first match wins:
//! 1. `HH:MM:SS.mmm: Added <object>`
//! 2. `HH:MM:SS.mmm: Removed <object>`
//! 3. `HH:MM:SS.mmm: <object>: <interface>: Properties Changed`
//! 4. `<interface>:` (interface context, e.g. `org.freedesktop.UDisks2.Drive:`)
//! 5. anything else, trimmed, is an attribute line

use log::{debug, error, warn};
use regex::Regex;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::LazyLock;

use crate::constants::{
    IFACE_PREFIX, OBJ_BLOCK_DEVICES, OBJ_DRIVES, PREFIX_DEVICE, PREFIX_DRIVE, PREFIX_FS_TYPE,
    PREFIX_MODEL, PREFIX_VENDOR,
};
use crate::models::{BlockDeviceInfo, DeviceEvent, DiskInfo, ParseError};

pub const ADDED_PATTERN: &str = r"^\d\d:\d\d:\d\d\.\d\d\d:\sAdded\s(.*)$";
pub const REMOVED_PATTERN: &str = r"^\d\d:\d\d:\d\d\.\d\d\d:\sRemoved\s(.*)$";
pub const PROPERTIES_CHANGED_PATTERN: &str =
    r"^\d\d:\d\d:\d\d\.\d\d\d:\s+([^:]+):\s+([^:]+):\s+Properties Changed\s*$";

static RE_ADDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ADDED_PATTERN).expect("ADDED_PATTERN is a valid regex"));
static RE_REMOVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REMOVED_PATTERN).expect("REMOVED_PATTERN is a valid regex"));
static RE_PROPERTIES_CHANGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(PROPERTIES_CHANGED_PATTERN).expect("PROPERTIES_CHANGED_PATTERN is a valid regex")
});

/// Shape of a single monitor line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorLine<'a> {
    Added(&'a str),
    Removed(&'a str),
    PropertiesChanged { object: &'a str, interface: &'a str },
    Interface(&'a str),
    Attribute(&'a str),
}

/// Classify a raw line
pub fn classify(line: &str) -> MonitorLine<'_> {
    if let Some(caps) = RE_ADDED.captures(line) {
        return MonitorLine::Added(caps.get(1).map_or("", |m| m.as_str().trim()));
    }

    if let Some(caps) = RE_REMOVED.captures(line) {
        return MonitorLine::Removed(caps.get(1).map_or("", |m| m.as_str().trim()));
    }

    if let Some(caps) = RE_PROPERTIES_CHANGED.captures(line) {
        return MonitorLine::PropertiesChanged {
            object: caps.get(1).map_or("", |m| m.as_str().trim()),
            interface: caps.get(2).map_or("", |m| m.as_str().trim()),
        };
    }

    let trimmed = line.trim();
    if let Some(name) = interface_name(trimmed) {
        return MonitorLine::Interface(name);
    }

    MonitorLine::Attribute(trimmed)
}

fn interface_name(trimmed: &str) -> Option<&str> {
    if !trimmed.starts_with(IFACE_PREFIX) {
        return None;
    }
    let name = trimmed.strip_suffix(':')?;
    (!name.contains(char::is_whitespace)).then_some(name)
}

/// Value after `prefix`, trimmed; object paths are printed single-quoted
fn attribute_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let value = line.strip_prefix(prefix)?.trim();
    Some(
        value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .unwrap_or(value),
    )
}

/// Open-record state built from monitor lines
#[derive(Debug, Default)]
pub struct DeviceEventParser {
    disks: BTreeMap<String, DiskInfo>,
    block_devices: BTreeMap<String, BlockDeviceInfo>,
    active_disk: Option<String>,
    active_block_device: Option<String>,
    active_interface: Option<String>,
}

impl DeviceEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one line, returning the events it triggers in order
    pub fn process_line(&mut self, line: &str) -> Result<Vec<DeviceEvent>, ParseError> {
        match classify(line) {
            MonitorLine::Added(object) => self.on_added(object),
            MonitorLine::Removed(object) => self.on_removed(object),
            MonitorLine::PropertiesChanged { object, interface } => {
                self.on_properties_changed(object, interface);
                Ok(Vec::new())
            }
            MonitorLine::Interface(name) => {
                self.active_interface = Some(name.to_string());
                Ok(Vec::new())
            }
            MonitorLine::Attribute(attribute) => self.on_attribute(attribute),
        }
    }

    /// Apply one line, logging and dropping it on any failure.
    ///
    /// A panic while handling the line clears the cursors so a half-applied
    /// line cannot leak into the next one.
    pub fn feed(&mut self, line: &str) -> Vec<DeviceEvent> {
        self.apply_isolated(line, Self::process_line)
    }

    fn apply_isolated<F>(&mut self, line: &str, apply: F) -> Vec<DeviceEvent>
    where
        F: FnOnce(&mut Self, &str) -> Result<Vec<DeviceEvent>, ParseError>,
    {
        match catch_unwind(AssertUnwindSafe(|| apply(self, line))) {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("unable to process a line of udisksctl output: {}: '{}'", e, line);
                Vec::new()
            }
            Err(payload) => {
                self.clear_cursors();
                let e = ParseError::Panicked(panic_message(payload.as_ref()));
                error!("unable to process a line of udisksctl output: {}: '{}'", e, line);
                Vec::new()
            }
        }
    }

    /// Drop every record and cursor without emitting anything
    pub fn reset(&mut self) {
        self.disks.clear();
        self.block_devices.clear();
        self.clear_cursors();
    }

    /// Call `f` for every block device whose attributes are complete
    pub fn enumerate_ready_block_devices<F>(&self, mut f: F)
    where
        F: FnMut(&BlockDeviceInfo),
    {
        self.block_devices
            .values()
            .filter(|b| b.is_ready())
            .for_each(|b| f(b));
    }

    pub fn disk(&self, id: &str) -> Option<&DiskInfo> {
        self.disks.get(id)
    }

    pub fn block_device(&self, id: &str) -> Option<&BlockDeviceInfo> {
        self.block_devices.get(id)
    }

    pub fn disks(&self) -> impl Iterator<Item = &DiskInfo> {
        self.disks.values()
    }

    pub fn active_disk(&self) -> Option<&str> {
        self.active_disk.as_deref()
    }

    pub fn active_block_device(&self) -> Option<&str> {
        self.active_block_device.as_deref()
    }

    pub fn active_interface(&self) -> Option<&str> {
        self.active_interface.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty() && self.block_devices.is_empty()
    }

    fn clear_cursors(&mut self) {
        self.active_disk = None;
        self.active_block_device = None;
        self.active_interface = None;
    }

    fn on_added(&mut self, object: &str) -> Result<Vec<DeviceEvent>, ParseError> {
        self.clear_cursors();
        if object.is_empty() {
            return Err(ParseError::EmptyObjectPath("Added"));
        }

        if object.starts_with(OBJ_DRIVES) {
            self.disks.insert(object.to_string(), DiskInfo::new(object));
            self.active_disk = Some(object.to_string());
            debug!("added new disk: {}", object);
        } else if object.starts_with(OBJ_BLOCK_DEVICES) {
            self.block_devices
                .insert(object.to_string(), BlockDeviceInfo::new(object));
            self.active_block_device = Some(object.to_string());
            debug!("added new block device: {}", object);
        }

        Ok(Vec::new())
    }

    fn on_removed(&mut self, object: &str) -> Result<Vec<DeviceEvent>, ParseError> {
        self.clear_cursors();
        if object.is_empty() {
            return Err(ParseError::EmptyObjectPath("Removed"));
        }

        if let Some(disk) = self.disks.remove(object) {
            debug!("removed disk: {}", object);
            return Ok(vec![DeviceEvent::DiskRemoved(disk)]);
        }

        if let Some(block) = self.block_devices.remove(object) {
            debug!("removed block device: {}", object);
            return Ok(vec![DeviceEvent::BlockDeviceRemoved(block)]);
        }

        Ok(Vec::new())
    }

    fn on_properties_changed(&mut self, object: &str, interface: &str) {
        self.clear_cursors();
        if self.disks.contains_key(object) {
            self.active_disk = Some(object.to_string());
        } else if self.block_devices.contains_key(object) {
            self.active_block_device = Some(object.to_string());
        } else {
            return;
        }
        self.active_interface = Some(interface.to_string());
    }

    fn on_attribute(&mut self, line: &str) -> Result<Vec<DeviceEvent>, ParseError> {
        let mut events = Vec::new();

        if let Some(id) = self.active_disk.clone() {
            let Some(disk) = self.disks.get_mut(&id) else {
                self.active_disk = None;
                return Err(ParseError::DanglingCursor { kind: "disk", id });
            };
            if apply_disk_attribute(disk, line) && disk.is_complete() {
                events.push(DeviceEvent::DiskAdded(disk.clone()));
            }
        }

        if let Some(id) = self.active_block_device.clone() {
            let Some(block) = self.block_devices.get_mut(&id) else {
                self.active_block_device = None;
                return Err(ParseError::DanglingCursor {
                    kind: "block device",
                    id,
                });
            };
            if apply_block_attribute(block, line) && block.is_ready() {
                events.push(DeviceEvent::BlockDeviceReady(block.clone()));
            }
        }

        Ok(events)
    }
}

/// Returns true when the line carried a recognised disk attribute
fn apply_disk_attribute(disk: &mut DiskInfo, line: &str) -> bool {
    if let Some(model) = attribute_value(line, PREFIX_MODEL) {
        disk.model = Some(model.to_string());
        true
    } else if let Some(vendor) = attribute_value(line, PREFIX_VENDOR) {
        disk.vendor = Some(vendor.to_string());
        true
    } else {
        false
    }
}

/// Returns true when the line carried a recognised block-device attribute
fn apply_block_attribute(block: &mut BlockDeviceInfo, line: &str) -> bool {
    if let Some(device) = attribute_value(line, PREFIX_DEVICE) {
        block.device_path = Some(device.to_string());
        true
    } else if let Some(drive) = attribute_value(line, PREFIX_DRIVE) {
        block.drive = Some(drive.to_string());
        true
    } else if let Some(fs_type) = attribute_value(line, PREFIX_FS_TYPE) {
        block.fs_type = Some(fs_type.to_string());
        true
    } else {
        false
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
