//! # Worker declarations.
//!
//! A [`WorkerDeclaration`] is the normalized form of one `with_workers` call:
//! name, entry-point script, instance count, canonical environment and watch
//! patterns. Validation here is per declaration only; name uniqueness across
//! declarations is checked when the supervisor starts, since declarations may
//! come from several configuration sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::workers::{PreparedEnv, WatchPattern};

/// A named, persistent background script with its desired concurrency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDeclaration {
    name: Arc<str>,
    script: PathBuf,
    instances: u32,
    env: PreparedEnv,
    watch: Vec<WatchPattern>,
}

impl WorkerDeclaration {
    /// Normalizes raw registration input.
    ///
    /// ### Errors
    /// [`ConfigError::InvalidWorkerSpec`] when `name` or `script` is empty,
    /// `instances < 1`, an environment entry is malformed or a watch pattern is empty.
    ///
    /// ### Normalization
    /// - environment entries are stored in key order;
    /// - watch patterns keep declaration order with duplicates removed.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::WorkerDeclaration;
    ///
    /// let a = WorkerDeclaration::new("mailer", "mailer.php", 2, [("B", "2"), ("A", "1")], ["src"]).unwrap();
    /// let b = WorkerDeclaration::new("mailer", "mailer.php", 2, [("A", "1"), ("B", "2")], ["src", "src"]).unwrap();
    /// assert_eq!(a, b);
    /// ```
    pub fn new<E, K, V, W, S>(
        name: impl Into<String>,
        script: impl AsRef<Path>,
        instances: u32,
        env: E,
        watch: W,
    ) -> Result<Self, ConfigError>
    where
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        W: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::worker(name, "name is empty"));
        }
        let script = script.as_ref();
        if script.as_os_str().is_empty() {
            return Err(ConfigError::worker(name, "script path is empty"));
        }
        if instances < 1 {
            return Err(ConfigError::worker(name, "instance count must be at least 1"));
        }

        let env = PreparedEnv::prepare(&name, env)?;

        let mut patterns: Vec<WatchPattern> = Vec::new();
        for raw in watch {
            let raw = raw.as_ref();
            let pattern = WatchPattern::parse(raw)
                .ok_or_else(|| ConfigError::worker(name.as_str(), "watch pattern is empty"))?;
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }

        Ok(Self {
            name: Arc::from(name),
            script: script.to_path_buf(),
            instances,
            env,
            watch: patterns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Entry-point script run by every instance.
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Number of concurrent long-lived instances.
    pub fn instances(&self) -> u32 {
        self.instances
    }

    pub fn env(&self) -> &PreparedEnv {
        &self.env
    }

    /// Patterns whose changes restart every instance of this worker.
    pub fn watch(&self) -> &[WatchPattern] {
        &self.watch
    }
}
