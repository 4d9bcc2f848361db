//! Task manager concurrency configuration.

use std::collections::HashMap;

/// Concurrency and lifecycle configuration for the task manager.
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum tasks running at once, across all keys.
    pub default_concurrency: usize,
    /// Per-provider running-task caps.
    pub provider_concurrency: HashMap<String, usize>,
    /// Per-model running-task caps.
    pub model_concurrency: HashMap<String, usize>,
    /// Age at which a running task is considered stale, in
    /// milliseconds.
    pub stale_timeout_ms: u64,
    /// Leave tasks untouched on shutdown instead of cancelling them.
    pub persist_on_exit: bool,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 3,
            provider_concurrency: HashMap::new(),
            model_concurrency: HashMap::new(),
            stale_timeout_ms: 180_000,
            persist_on_exit: false,
        }
    }
}

/// Partial configuration update; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct TaskManagerConfigPatch {
    /// New default concurrency.
    pub default_concurrency: Option<usize>,
    /// New per-provider caps (replaces the map).
    pub provider_concurrency: Option<HashMap<String, usize>>,
    /// New per-model caps (replaces the map).
    pub model_concurrency: Option<HashMap<String, usize>>,
    /// New stale timeout.
    pub stale_timeout_ms: Option<u64>,
    /// New shutdown behavior.
    pub persist_on_exit: Option<bool>,
}

impl TaskManagerConfig {
    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: TaskManagerConfigPatch) {
        if let Some(v) = patch.default_concurrency {
            self.default_concurrency = v;
        }
        if let Some(v) = patch.provider_concurrency {
            self.provider_concurrency = v;
        }
        if let Some(v) = patch.model_concurrency {
            self.model_concurrency = v;
        }
        if let Some(v) = patch.stale_timeout_ms {
            self.stale_timeout_ms = v;
        }
        if let Some(v) = patch.persist_on_exit {
            self.persist_on_exit = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TaskManagerConfig::default();
        assert_eq!(config.default_concurrency, 3);
        assert!(config.provider_concurrency.is_empty());
        assert!(config.model_concurrency.is_empty());
        assert_eq!(config.stale_timeout_ms, 180_000);
        assert!(!config.persist_on_exit);
    }

    #[test]
    fn test_patch_keeps_unset_fields() {
        let mut config = TaskManagerConfig::default();
        config.apply(TaskManagerConfigPatch {
            default_concurrency: Some(10),
            ..Default::default()
        });
        assert_eq!(config.default_concurrency, 10);
        assert_eq!(config.stale_timeout_ms, 180_000);
    }
}
