//! Data models module
//!
//! Defines core data structures:
//! - DiskInfo: Attributes of a UDisks2 drive object
//! - BlockDeviceInfo: Attributes of a UDisks2 block device object
//! - DeviceEvent: Lifecycle event published to the event sink
//! - ProcessError / ParseError / ConfigError: Error taxonomy

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes of a drive (`/org/freedesktop/UDisks2/drives/...`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    /// UDisks2 object path of the drive
    pub id: String,
    /// Drive model, as reported by the `Model:` attribute
    pub model: Option<String>,
    /// Drive vendor, as reported by the `Vendor:` attribute
    pub vendor: Option<String>,
}

impl DiskInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Both vendor and model are known and non-empty
    pub fn is_complete(&self) -> bool {
        is_present(&self.model) && is_present(&self.vendor)
    }
}

/// Attributes of a block device (`/org/freedesktop/UDisks2/block_devices/...`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceInfo {
    /// UDisks2 object path of the block device
    pub id: String,
    /// Device node, e.g. `/dev/sdb1`
    pub device_path: Option<String>,
    /// Object path of the owning drive
    pub drive: Option<String>,
    /// Filesystem type tag (`IdType:`), e.g. `ext4`
    pub fs_type: Option<String>,
}

impl BlockDeviceInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Device path, owning drive and filesystem type are all known and non-empty
    pub fn is_ready(&self) -> bool {
        is_present(&self.device_path) && is_present(&self.drive) && is_present(&self.fs_type)
    }

    /// Known attributes keyed by their JSON names; unknown ones are left out
    pub fn attributes(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("id", self.id.clone());
        if let Some(device_path) = &self.device_path {
            map.insert("devicePath", device_path.clone());
        }
        if let Some(drive) = &self.drive {
            map.insert("drive", drive.clone());
        }
        if let Some(fs_type) = &self.fs_type {
            map.insert("fsType", fs_type.clone());
        }
        map
    }
}

fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// Lifecycle event derived from the monitor's output.
///
/// `DiskAdded` and `BlockDeviceReady` are delivered at least once: every
/// recognised attribute line that arrives while a record is already complete
/// re-emits the record's current attributes. Removals are emitted once per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DeviceEvent {
    DiskAdded(DiskInfo),
    DiskRemoved(DiskInfo),
    BlockDeviceReady(BlockDeviceInfo),
    BlockDeviceRemoved(BlockDeviceInfo),
}

impl DeviceEvent {
    /// Event type identifier, matching the serialized `event` tag
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceEvent::DiskAdded(_) => "disk-added",
            DeviceEvent::DiskRemoved(_) => "disk-removed",
            DeviceEvent::BlockDeviceReady(_) => "block-device-ready",
            DeviceEvent::BlockDeviceRemoved(_) => "block-device-removed",
        }
    }

    /// UDisks2 object path the event refers to
    pub fn object_id(&self) -> &str {
        match self {
            DeviceEvent::DiskAdded(d) | DeviceEvent::DiskRemoved(d) => &d.id,
            DeviceEvent::BlockDeviceReady(b) | DeviceEvent::BlockDeviceRemoved(b) => &b.id,
        }
    }

    /// Device node for block-device events
    pub fn device_path(&self) -> Option<&str> {
        match self {
            DeviceEvent::BlockDeviceReady(b) | DeviceEvent::BlockDeviceRemoved(b) => {
                b.device_path.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            DeviceEvent::DiskRemoved(_) | DeviceEvent::BlockDeviceRemoved(_)
        )
    }
}

/// Errors raised by the process supervisor
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Shell process for '{0}' didn't report its pid")]
    MissingPid(String),
    #[error("'{0}' is not a valid pid")]
    InvalidPid(String),
    #[error("Interrupted while waiting for the process to finish")]
    Interrupted,
    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },
}

impl ProcessError {
    /// Spawn failures and missing/unparseable sentinel pids
    pub fn is_launch_error(&self) -> bool {
        matches!(
            self,
            ProcessError::Spawn { .. } | ProcessError::MissingPid(_) | ProcessError::InvalidPid(_)
        )
    }
}

/// A single monitor line that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("'{0}' line carries no object path")]
    EmptyObjectPath(&'static str),
    #[error("Active {kind} '{id}' is no longer tracked")]
    DanglingCursor { kind: &'static str, id: String },
    #[error("Panicked while processing line: {0}")]
    Panicked(String),
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Note: bounds must match QUEUE_CAPACITY_MAX in constants.rs
    #[error("Invalid queue capacity: {0}. Must be between 1 and 65536")]
    InvalidQueueCapacity(usize),
    /// Note: bounds must match RESTART_DELAY_MAX_MS in constants.rs
    #[error("Invalid restart delay: {0}ms. Must be at most 600000ms")]
    InvalidRestartDelay(u64),
    #[error("Monitor command must not be empty")]
    EmptyCommand,
    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },
    #[error("Invalid log level '{0}'. Expected one of: error, warn, info, debug, trace")]
    InvalidLogLevel(String),
}
