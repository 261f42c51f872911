//! Engine configuration
//!
//! ```toml
//! [engine]
//! warn_on_reentrant_enqueue = true
//! max_flush_rounds = 10000
//! default_priority = "task"
//! ```

use serde::{Deserialize, Serialize};
use surge_core::{Error, Priority, Result};

/// Tunables for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log a warning when a payload schedules another update while folding
    pub warn_on_reentrant_enqueue: bool,
    /// Fold attempts one flush may start before giving up
    ///
    /// Bounds cascades where every commit schedules more work.
    pub max_flush_rounds: usize,
    /// Priority handed out by the stock arbiters
    pub default_priority: Priority,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warn_on_reentrant_enqueue: true,
            max_flush_rounds: 10_000,
            default_priority: Priority::TASK,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    /// Parse the `[engine]` table of a TOML document
    ///
    /// A missing table or missing keys fall back to the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::InvalidConfig(format!("failed to parse config: {e}")))?;
        file.engine.validate()?;
        Ok(file.engine)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_flush_rounds == 0 {
            return Err(Error::InvalidConfig("max_flush_rounds must be at least 1".into()));
        }
        Ok(())
    }
}
