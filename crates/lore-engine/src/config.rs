use lore_store::Layout;
use serde::{Deserialize, Serialize};

/// Engine configuration. The layout is consulted on database creation and
/// verified on every subsequent open; the other knobs are per-handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storage layout for typed rows.
    #[serde(default)]
    pub layout: Layout,
    /// Whether mutations append to the changelog. Disabling it degrades
    /// push to the lossy snapshot fallback.
    #[serde(default = "default_changelog")]
    pub changelog: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_changelog() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            changelog: default_changelog(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn with_layout(layout: Layout) -> Self {
        Self {
            layout,
            ..Default::default()
        }
    }

    pub fn without_changelog(mut self) -> Self {
        self.changelog = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_per_type_with_changelog() {
        let config = EngineConfig::default();
        assert_eq!(config.layout, Layout::PerType);
        assert!(config.changelog);
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"layout": "unified"}"#).unwrap();
        assert_eq!(config.layout, Layout::Unified);
        assert!(config.changelog);
        assert_eq!(config.busy_timeout_ms, 5000);
    }
}
