use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::error::{FtsError, Result};

use super::{Driver, EmbeddedDriver, IpcDriver, MmapDriver};

/// Builds a driver from an engine configuration
pub type DriverFactory = Box<dyn Fn(&EngineConfig) -> Result<Box<dyn Driver>> + Send + Sync>;

/// Environment variable naming the worker binary used by the "ipc" driver
pub const WORKER_BIN_ENV: &str = "FTS_WORKER_BIN";

/// Named driver factories
///
/// Built explicitly by the caller and passed around by reference.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the "embedded", "ipc" and "mmap" drivers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("embedded", |config: &EngineConfig| {
            Ok(Box::new(EmbeddedDriver::open(config.clone())?) as Box<dyn Driver>)
        });
        registry.register("mmap", |config: &EngineConfig| {
            Ok(Box::new(MmapDriver::with_config(config.clone())?) as Box<dyn Driver>)
        });
        registry.register("ipc", |config: &EngineConfig| {
            let program =
                std::env::var_os(WORKER_BIN_ENV).unwrap_or_else(|| "fts-worker".into());
            let socket = worker_socket_path(config);
            Ok(Box::new(IpcDriver::spawn(program, &socket, config)?) as Box<dyn Driver>)
        });
        registry
    }

    /// Add or replace a factory
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&EngineConfig) -> Result<Box<dyn Driver>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the driver registered under `name`
    pub fn open(&self, name: &str, config: &EngineConfig) -> Result<Box<dyn Driver>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            FtsError::InvalidRequest(format!(
                "unknown driver '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        factory(config)
    }
}

/// Socket inside the data directory, or a per-process temp path
fn worker_socket_path(config: &EngineConfig) -> PathBuf {
    match &config.data_dir {
        Some(dir) => dir.join("fts-worker.sock"),
        None => std::env::temp_dir().join(format!("fts-worker-{}.sock", std::process::id())),
    }
}
