//! Global constants for udmon
//!
//! Centralized location for application-wide constants

/// Application name, used for the config directory and log targets
pub const APP_NAME: &str = "udmon";

/// Config file name inside the per-user config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The monitor invocation this crate is built to supervise
pub const DEFAULT_MONITOR_COMMAND: &str = "udisksctl monitor";

/// Shell used to wrap every supervised command
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Privilege escalation prefix for privileged launches
pub const PRIVILEGE_PREFIX: &str = "sudo";

/// Session detach prefix so an elevated child outlives its parent
pub const SESSION_DETACH_PREFIX: &str = "setsid";

/// Echoed by the shell before the real command so the first stdout line is its pid
pub const PID_SENTINEL_PREFIX: &str = "echo $$; ";

/// Exit code reported when `join` is interrupted or the status is unknown
pub const INTERRUPTED_EXIT_CODE: i32 = -1;

/// UDisks2 object namespaces
pub const OBJ_DRIVES: &str = "/org/freedesktop/UDisks2/drives/";
pub const OBJ_BLOCK_DEVICES: &str = "/org/freedesktop/UDisks2/block_devices/";

/// Interface-context lines start with this and end with ':'
pub const IFACE_PREFIX: &str = "org.freedesktop";

/// Attribute prefixes recognised on drive records
pub const PREFIX_MODEL: &str = "Model:";
pub const PREFIX_VENDOR: &str = "Vendor:";

/// Attribute prefixes recognised on block-device records
pub const PREFIX_DEVICE: &str = "Device:";
pub const PREFIX_DRIVE: &str = "Drive:";
pub const PREFIX_FS_TYPE: &str = "IdType:";

/// Default capacity of the queue between the drain worker and the event sink
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Note: bounds must match ConfigError messages in models
pub const QUEUE_CAPACITY_MAX: usize = 65_536;

/// Default delay before the binary relaunches a finished monitor
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;
pub const RESTART_DELAY_MAX_MS: u64 = 600_000;

/// How often the binary wakes from `join_timeout` to check for signals
pub const SIGNAL_POLL_INTERVAL_MS: u64 = 100;

/// Accepted values for the log level setting
pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How long a terminated monitor gets to exit before the binary gives up on it
pub const SHUTDOWN_GRACE_MS: u64 = 5_000;
