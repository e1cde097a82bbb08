//! Logging setup and structured lifecycle messages
//!
//! Diagnostics go through the `log` macros. `init` installs a
//! tracing-subscriber formatter on stderr that also captures `log` records,
//! keeping stdout free for events.
//!
//! Lifecycle milestones are logged as `"<message> | <json>"` so they stay
//! greppable and machine-readable at the same time.

use anyhow::{anyhow, Result};
use log::Level;
use serde_json::json;
use std::io::IsTerminal;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use crate::constants::LOG_LEVELS;
use crate::models::{ConfigError, DeviceEvent};

/// Install the stderr subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init(level: &str) -> Result<()> {
    validate_level(level)?;

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| anyhow!("Invalid {}: {}", EnvFilter::DEFAULT_ENV, e))?,
        _ => EnvFilter::new(level),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialise logging: {}", e))
}

/// Reject anything but the five `log` level names
pub fn validate_level(level: &str) -> Result<(), ConfigError> {
    if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLogLevel(level.to_string()))
    }
}

pub fn log_monitor_launched(pid: u32, command: &str, privileged: bool) {
    let data = json!({
        "event": "monitor_launched",
        "pid": pid,
        "command": command,
        "privileged": privileged,
        "timestamp": now(),
    });
    log_structured(Level::Info, "Monitor started", &data);
}

/// Exit code 0 is routine; anything else is an error
pub fn log_monitor_finished(exit_code: i32) {
    let data = json!({
        "event": "monitor_finished",
        "exit_code": exit_code,
        "timestamp": now(),
    });

    if exit_code == 0 {
        log_structured(Level::Debug, "Monitor finished without errors", &data);
    } else {
        log_structured(
            Level::Error,
            &format!("Monitor finished with exit code {}", exit_code),
            &data,
        );
    }
}

pub fn log_event_published(event: &DeviceEvent) {
    let data = json!({
        "event": "device_event",
        "kind": event.kind(),
        "id": event.object_id(),
        "device_path": event.device_path(),
        "timestamp": now(),
    });
    log_structured(Level::Debug, &format!("Published {}", event.kind()), &data);
}

pub fn log_shutdown(reason: &str) {
    let data = json!({
        "event": "shutdown",
        "reason": reason,
        "timestamp": now(),
    });
    log_structured(Level::Info, "Shutting down", &data);
}

fn log_structured(level: Level, message: &str, data: &serde_json::Value) {
    log::log!(level, "{} | {}", message, data);
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_level() {
        for level in ["error", "warn", "info", "debug", "trace", "DEBUG"] {
            assert!(validate_level(level).is_ok(), "{} should be accepted", level);
        }
        assert_eq!(
            validate_level("verbose"),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let stamp = now();
        assert!(OffsetDateTime::parse(&stamp, &Rfc3339).is_ok(), "{}", stamp);
    }
}
