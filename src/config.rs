//! Host-side filter configuration.
//!
//! Everything the remote negotiates lives in the CFG message; this is only
//! what the embedding application decides locally.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

pub const DEFAULT_TERMINAL_COLUMNS: usize = 80;
pub const DEFAULT_CLEAN_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// What to do when a received file fails its MD5 check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Send `fail` and end the whole session.
    #[default]
    AbortSession,
    /// Delete the bad file, report it in the summary and carry on.
    DiscardFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Initial terminal width, used by the progress bar.
    pub terminal_columns: usize,
    /// Quiet period that ends the drain of leftover output after an error.
    pub clean_timeout_ms: u64,
    /// Upper bound for one DATA chunk; the remote `bufsize` may lower it.
    pub max_chunk_size: u64,
    pub checksum_policy: ChecksumPolicy,
    pub show_progress: bool,
    /// Ignore triggers whose unique id was already seen.
    pub dedupe_unique_ids: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            terminal_columns: DEFAULT_TERMINAL_COLUMNS,
            clean_timeout_ms: DEFAULT_CLEAN_TIMEOUT_MS,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            checksum_policy: ChecksumPolicy::default(),
            show_progress: true,
            dedupe_unique_ids: true,
        }
    }
}

impl FilterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FilterConfig =
            toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.terminal_columns == 0 {
            return Err(TransferError::Config(
                "terminal_columns must be positive".to_string(),
            ));
        }
        if self.max_chunk_size == 0 {
            return Err(TransferError::Config(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn clean_timeout(&self) -> Duration {
        Duration::from_millis(self.clean_timeout_ms)
    }
}
