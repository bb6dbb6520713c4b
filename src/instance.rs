//! The service instance: everything a running service owns.
//!
//! An [`Instance`] is created at startup, shared by reference with every
//! handler during route-tree initialization, and terminated once on shutdown.
//! It replaces what would otherwise be process-global state: the log
//! registry, the optional per-request environment, and the discard flag.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::{self, DEFAULT_CONFIG_FILE, InstanceConfig};
use crate::error::Result;
use crate::log::{LogSink, Logs};
use crate::request::RequestContext;

/// Per-request value an [`Environment`] hands to `begin_session`.
pub type SessionEnv = Arc<dyn Any + Send + Sync>;

/// Application-wide state that wants a say in every request (connection
/// pools, caches, feature flags).
pub trait Environment: Send + Sync {
    /// The value handlers see for this request, if any.
    fn for_request(&self, req: &RequestContext) -> Option<SessionEnv>;

    /// Called once when the instance terminates.
    fn terminate(&self) {}
}

pub struct Instance {
    config: InstanceConfig,
    work_dir: PathBuf,
    logs: Logs,
    env: Option<Box<dyn Environment>>,
    discarded: AtomicBool,
}

impl Instance {
    /// An instance rooted at the current directory.
    pub fn new(config: InstanceConfig) -> Self {
        let logs = Logs::from_config(&config.service_name, &config.logs);
        Self {
            config,
            work_dir: PathBuf::from("."),
            logs,
            env: None,
            discarded: AtomicBool::new(false),
        }
    }

    /// Loads `conf.yaml` from `dir` and roots the instance there.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let config = InstanceConfig::load(dir.join(DEFAULT_CONFIG_FILE))?;
        let mut instance = Self::new(config);
        instance.work_dir = dir.to_path_buf();
        Ok(instance)
    }

    pub fn with_environment(mut self, env: impl Environment + 'static) -> Self {
        self.env = Some(Box::new(env));
        self
    }

    /// Registers an extra log sink, replacing a configured one of the same name.
    pub fn with_log_sink(mut self, name: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        self.logs.insert(name, sink);
        self
    }

    pub fn config(&self) -> &InstanceConfig { &self.config }
    pub fn service_name(&self) -> &str { &self.config.service_name }
    pub fn is_debug(&self) -> bool { self.config.debug }

    /// The named log sink. A missing sink is a misconfiguration.
    pub fn log(&self, name: &str) -> Result<Arc<dyn LogSink>> {
        self.logs.get(name)
    }

    /// `rel` resolved against the working directory.
    pub fn work_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        let rel = rel.strip_prefix("/").unwrap_or(rel);
        self.work_dir.join(rel)
    }

    /// Deserializes the sub-configuration included under `name`.
    ///
    /// `Ok(None)` when the configuration has no such include.
    pub fn load_sub_config<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.config.includes.get(name) {
            Some(file) => config::load_file(&self.work_path(file)).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn env_for(&self, req: &RequestContext) -> Option<SessionEnv> {
        self.env.as_ref()?.for_request(req)
    }

    pub fn is_terminated(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    /// Shuts down the environment and every log sink. Later calls do nothing.
    pub fn terminate(&self) {
        if self.discarded.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(service = %self.config.service_name, "instance terminating");
        if let Some(env) = &self.env {
            env.terminate();
        }
        self.logs.terminate();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    use serde::Deserialize;

    use super::*;
    use crate::error::Error;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Upstream {
        host: String,
        port: u16,
    }

    #[test]
    fn open_reads_conf_yaml_and_sub_configs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("conf.yaml"),
            "service_name: catalog\nincludes:\n  upstream: upstream.yaml\n",
        )
        .unwrap();
        fs::write(dir.path().join("upstream.yaml"), "host: db.local\nport: 5432\n").unwrap();

        let instance = Instance::open(dir.path()).unwrap();
        assert_eq!(instance.service_name(), "catalog");
        assert_eq!(
            instance.load_sub_config::<Upstream>("upstream").unwrap(),
            Some(Upstream { host: "db.local".into(), port: 5432 })
        );
        assert_eq!(instance.load_sub_config::<Upstream>("absent").unwrap(), None);
    }

    #[test]
    fn work_path_joins_under_the_working_directory() {
        let instance = Instance::new(InstanceConfig::default());
        assert_eq!(instance.work_path("/static"), PathBuf::from("./static"));
        assert_eq!(instance.work_path("static/css"), PathBuf::from("./static/css"));
    }

    #[test]
    fn missing_logger_is_reported() {
        let mut config = InstanceConfig::default();
        config.logs.clear();
        let instance = Instance::new(config);
        assert!(matches!(instance.log("error"), Err(Error::MissingLogger(_))));
    }

    struct CountingEnv(Arc<AtomicUsize>);

    impl Environment for CountingEnv {
        fn for_request(&self, _req: &RequestContext) -> Option<SessionEnv> {
            Some(Arc::new(7_u32))
        }

        fn terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn terminate_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let instance = Instance::new(InstanceConfig::default())
            .with_environment(CountingEnv(Arc::clone(&count)));

        let req = RequestContext::new("GET", "/").unwrap();
        let env = instance.env_for(&req).unwrap();
        assert_eq!(env.downcast_ref::<u32>(), Some(&7));

        instance.terminate();
        instance.terminate();
        assert!(instance.is_terminated());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
