//! Event filtering
//!
//! Filters select events by UDisks2 object path or, for block devices, by
//! device node. A filter containing glob characters ('*', '?', '[') is
//! matched as a glob pattern, anything else must match exactly.

use glob::Pattern;

use crate::models::{ConfigError, DeviceEvent};

/// Check if a filter string contains glob pattern characters
pub fn is_glob_pattern(filter: &str) -> bool {
    filter.contains('*') || filter.contains('?') || filter.contains('[')
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Glob(Pattern),
}

impl Matcher {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Matcher::Exact(s) => s == candidate,
            Matcher::Glob(p) => p.matches(candidate),
        }
    }
}

/// Compiled set of filters; an empty set lets every event through
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    matchers: Vec<Matcher>,
}

impl EventFilter {
    pub fn new(filters: &[String]) -> Result<Self, ConfigError> {
        let matchers = filters
            .iter()
            .map(|filter| {
                if is_glob_pattern(filter) {
                    Pattern::new(filter)
                        .map(Matcher::Glob)
                        .map_err(|e| ConfigError::InvalidFilter {
                            pattern: filter.clone(),
                            reason: e.to_string(),
                        })
                } else {
                    Ok(Matcher::Exact(filter.clone()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { matchers })
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// True if no filters are set, or any filter matches the object path or device path
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        if self.matchers.is_empty() {
            return true;
        }

        let object_id = event.object_id();
        let device_path = event.device_path();
        self.matchers.iter().any(|m| {
            m.matches(object_id) || device_path.is_some_and(|path| m.matches(path))
        })
    }
}

/// Validate that all filters are syntactically correct glob patterns
pub fn validate_filters(filters: &[String]) -> Result<(), ConfigError> {
    EventFilter::new(filters).map(|_| ())
}
