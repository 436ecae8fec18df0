//! Environment lookup capability.

use std::collections::HashMap;
use std::sync::Arc;

/// A string-to-string lookup over environment variables.
pub trait Environment: Send + Sync {
    /// Value of `key`, `None` when unset.
    fn get(&self, key: &str) -> Option<String>;

    /// Value of `key` when set and non-empty.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

/// Shared handle passed to runner constructors.
pub type SharedEnv = Arc<dyn Environment>;

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ProcessEnv {
    pub fn shared() -> SharedEnv {
        Arc::new(ProcessEnv)
    }
}

impl Environment for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed in-memory environment.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn shared(self) -> SharedEnv {
        Arc::new(self)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Environment for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_env() {
        let env = MapEnv::new().with("A", "1").with("EMPTY", "");
        assert_eq!(env.get("A").as_deref(), Some("1"));
        assert_eq!(env.get("EMPTY").as_deref(), Some(""));
        assert_eq!(env.get_non_empty("EMPTY"), None);
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn test_from_iter() {
        let env: MapEnv = [("X", "y")].into_iter().collect();
        assert_eq!(env.get("X").as_deref(), Some("y"));
    }
}
