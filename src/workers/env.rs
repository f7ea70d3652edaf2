//! # Canonical worker environment.
//!
//! [`PreparedEnv`] stores the name→value pairs injected into a worker script at
//! each instance start. Entries are kept in key order, so two declarations with
//! the same logical content compare equal whatever order they were written in.

use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Validated, key-ordered environment for a worker declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedEnv {
    vars: BTreeMap<String, String>,
}

impl PreparedEnv {
    /// Validates and normalizes raw entries.
    ///
    /// Keys must be non-empty and free of `=` and NUL; values must be free of NUL.
    /// A key repeated in the input keeps its last value.
    pub fn prepare<I, K, V>(worker: &str, raw: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = BTreeMap::new();
        for (k, v) in raw {
            let (k, v) = (k.into(), v.into());
            if k.is_empty() {
                return Err(ConfigError::worker(worker, "environment name is empty"));
            }
            if k.contains('=') || k.contains('\0') {
                return Err(ConfigError::worker(
                    worker,
                    format!("environment name {k:?} contains '=' or NUL"),
                ));
            }
            if v.contains('\0') {
                return Err(ConfigError::worker(
                    worker,
                    format!("environment value for {k:?} contains NUL"),
                ));
            }
            vars.insert(k, v);
        }
        Ok(Self { vars })
    }

    /// Looks up one variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
