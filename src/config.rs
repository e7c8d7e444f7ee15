//! Settings loaded from TOML, with defaults for every field.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::{Backoff, ClientConfig, FetchOptions, Pacer};
use crate::hydrate::{effective_batch_size, HydrationSettings, ReplyStrategy};
use crate::types::{SkyError, SkyResult};

/// Environment variable naming a settings file.
pub const CONFIG_ENV: &str = "SKYVAULT_CONFIG";

/// Burst allowance of the request pacer.
const PACER_BURST: u32 = 10;

/// Complete settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fetch: FetchConfig,
    pub hydration: HydrationConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Base url of the public read service.
    pub service_url: String,
    /// Records per listing page.
    pub page_size: usize,
    /// Page limit per collection.
    pub max_pages: Option<usize>,
    /// Requests allowed per window.
    pub requests_per_window: u32,
    pub window_secs: u64,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Bearer token, when the account requires one.
    pub access_token: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            service_url: "https://public.api.bsky.app".to_string(),
            page_size: 100,
            max_pages: None,
            requests_per_window: 300,
            window_secs: 300,
            request_timeout_secs: 5,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Overall budget for one hydration pass.
    pub time_budget_secs: Option<u64>,
    /// "thread", "bulk" or "skip".
    pub reply_strategy: String,
    /// Thread lookups only for posts younger than this (0 = all posts).
    pub reply_cutoff_days: u32,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 5,
            max_retries: 4,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            time_budget_secs: None,
            reply_strategy: "thread".to_string(),
            reply_cutoff_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache database file; defaults under the per-user data directory.
    pub path: Option<PathBuf>,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> SkyResult<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| SkyError::Config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from `path`.
    pub fn from_file(path: &Path) -> SkyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SkyError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Load settings using priority order:
    /// 1. Explicit path (CLI arg)
    /// 2. SKYVAULT_CONFIG environment variable
    /// 3. `<config_dir>/skyvault/config.toml`, if it exists
    /// 4. Defaults
    pub fn load(explicit: Option<&Path>) -> SkyResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&env_path));
        }
        if let Some(dir) = dirs::config_dir() {
            let path = dir.join("skyvault").join("config.toml");
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn validate(&self) -> SkyResult<()> {
        self.reply_strategy()?;
        if self.fetch.window_secs == 0 {
            return Err(SkyError::Config("fetch.window_secs must be positive".into()));
        }
        if self.hydration.max_concurrency == 0 {
            return Err(SkyError::Config(
                "hydration.max_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The configured reply strategy.
    pub fn reply_strategy(&self) -> SkyResult<ReplyStrategy> {
        match self.hydration.reply_strategy.to_ascii_lowercase().as_str() {
            "thread" => Ok(ReplyStrategy::Thread {
                cutoff_days: self.hydration.reply_cutoff_days,
            }),
            "bulk" => Ok(ReplyStrategy::Bulk),
            "skip" => Ok(ReplyStrategy::Skip),
            other => Err(SkyError::Config(format!(
                "unknown reply_strategy '{other}' (expected thread, bulk or skip)"
            ))),
        }
    }

    /// Cache file path, resolved against the per-user data directory.
    pub fn cache_path(&self) -> PathBuf {
        if let Some(path) = &self.cache.path {
            return path.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skyvault")
            .join("engagement.db")
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            service_url: self.fetch.service_url.clone(),
            access_token: self.fetch.access_token.clone(),
            request_timeout: Duration::from_secs(self.fetch.request_timeout_secs.max(1)),
            default_retry_after: Duration::from_secs(self.fetch.window_secs),
        }
    }

    /// Pacer enforcing the published rate limit.
    pub fn pacer(&self) -> Arc<Pacer> {
        Arc::new(Pacer::new(
            self.fetch.requests_per_window,
            Duration::from_secs(self.fetch.window_secs),
            PACER_BURST,
        ))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.hydration.base_backoff_ms),
            max: Duration::from_millis(self.hydration.max_backoff_ms),
            max_retries: self.hydration.max_retries,
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            page_size: self.fetch.page_size,
            max_pages: self.fetch.max_pages,
            backoff: self.backoff(),
        }
    }

    pub fn hydration_settings(&self) -> SkyResult<HydrationSettings> {
        Ok(HydrationSettings {
            batch_size: effective_batch_size(self.hydration.batch_size),
            max_concurrency: self.hydration.max_concurrency.max(1),
            call_timeout: Duration::from_secs(self.fetch.request_timeout_secs.max(1)),
            backoff: self.backoff(),
            time_budget: self.hydration.time_budget_secs.map(Duration::from_secs),
            reply_strategy: self.reply_strategy()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.fetch.page_size, 100);
        assert_eq!(settings.hydration.max_concurrency, 5);
        assert_eq!(
            settings.reply_strategy().unwrap(),
            ReplyStrategy::Thread { cutoff_days: 30 }
        );
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml(
            "[hydration]\nbatch_size = 500\nreply_strategy = \"skip\"\n\n[cache]\npath = \"/tmp/x.db\"\n",
        )
        .unwrap();
        let hydration = settings.hydration_settings().unwrap();
        assert_eq!(hydration.batch_size, 100);
        assert_eq!(hydration.reply_strategy, ReplyStrategy::Skip);
        assert_eq!(settings.cache_path(), PathBuf::from("/tmp/x.db"));
        assert_eq!(settings.fetch.requests_per_window, 300);
    }

    #[test]
    fn test_bad_strategy_rejected() {
        let err = Settings::from_toml("[hydration]\nreply_strategy = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, SkyError::Config(_)));
    }
}
