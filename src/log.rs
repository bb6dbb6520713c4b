//! Named log sinks.
//!
//! The dispatch pipeline reports internal errors through a named sink rather
//! than calling `tracing` directly, so an application can route them wherever
//! it wants. The default [`TracingSink`] forwards to `tracing` with the sink
//! and service names attached as fields; install a subscriber
//! (`tracing_subscriber::fmt::init()`) to see the output.
//!
//! Sinks live in a [`Logs`] registry owned by the [`Instance`](crate::Instance).
//! There is no global registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

/// Name of the sink the dispatcher reports to.
pub const ERROR_LOG: &str = "error";

/// Message severity, lowest first.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Full debug detail.
    #[default]
    Debug,
    /// Conversation with a peer or another subsystem.
    Talk,
    Info,
    Warn,
    /// A function-level exception the caller recovered from.
    Except,
    Error,
    Fatal,
}

/// A destination for log messages.
pub trait LogSink: Send + Sync {
    fn send(&self, level: Level, message: &str);

    /// Stops the sink. Messages sent afterwards are dropped.
    fn terminate(&self);
}

/// Per-sink settings from the `logs` section of the configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Messages below this level are dropped.
    pub level: Level,
}

// ── TracingSink ───────────────────────────────────────────────────────────────

/// A [`LogSink`] that forwards to `tracing`.
pub struct TracingSink {
    name: String,
    service: String,
    min_level: Level,
    closed: AtomicBool,
}

impl TracingSink {
    pub fn new(name: impl Into<String>, service: impl Into<String>, min_level: Level) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            min_level,
            closed: AtomicBool::new(false),
        }
    }
}

impl LogSink for TracingSink {
    fn send(&self, level: Level, message: &str) {
        if level < self.min_level || self.closed.load(Ordering::Acquire) {
            return;
        }
        let (sink, service) = (self.name.as_str(), self.service.as_str());
        match level {
            Level::Debug  => trace!(sink, service, "{message}"),
            Level::Talk   => debug!(sink, service, "{message}"),
            Level::Info   => info!(sink, service, "{message}"),
            Level::Warn   => warn!(sink, service, "{message}"),
            Level::Except => error!(sink, service, severity = "EXCEPT", "{message}"),
            Level::Error  => error!(sink, service, "{message}"),
            Level::Fatal  => error!(sink, service, severity = "FATAL", "{message}"),
        }
    }

    fn terminate(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ── Logs ──────────────────────────────────────────────────────────────────────

/// Registry of named sinks.
#[derive(Default)]
pub struct Logs {
    sinks: HashMap<String, Arc<dyn LogSink>>,
}

impl Logs {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`TracingSink`] per configured entry.
    pub fn from_config(service: &str, config: &HashMap<String, LogConfig>) -> Self {
        let sinks = config
            .iter()
            .map(|(name, conf)| {
                let sink: Arc<dyn LogSink> = Arc::new(TracingSink::new(name, service, conf.level));
                (name.clone(), sink)
            })
            .collect();
        Self { sinks }
    }

    /// Registers `sink` under `name`, replacing any previous sink of that name.
    pub fn insert(&mut self, name: impl Into<String>, sink: Arc<dyn LogSink>) {
        self.sinks.insert(name.into(), sink);
    }

    /// Looks up a sink. A missing sink is a misconfiguration.
    pub fn get(&self, name: &str) -> Result<Arc<dyn LogSink>> {
        self.sinks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingLogger(name.to_owned()))
    }

    pub fn terminate(&self) {
        for sink in self.sinks.values() {
            sink.terminate();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(Level::Debug < Level::Talk);
        assert!(Level::Talk < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Except);
        assert!(Level::Except < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn missing_sink_is_an_error() {
        let logs = Logs::new();
        assert!(matches!(logs.get("error"), Err(Error::MissingLogger(name)) if name == "error"));
    }

    #[test]
    fn from_config_registers_each_named_sink() {
        let mut config = HashMap::new();
        config.insert("error".to_owned(), LogConfig { level: Level::Warn });
        config.insert("access".to_owned(), LogConfig::default());

        let logs = Logs::from_config("svc", &config);
        assert!(logs.get("error").is_ok());
        assert!(logs.get("access").is_ok());
        assert!(logs.get("audit").is_err());
    }

    #[test]
    fn level_names_deserialize_uppercase() {
        let conf: LogConfig = serde_yaml::from_str("level: EXCEPT").unwrap();
        assert_eq!(conf.level, Level::Except);
    }
}
