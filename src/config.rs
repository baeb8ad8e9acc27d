//! Runtime configuration
//!
//! Cache directory precedence:
//!   1. explicit value (the `--cache-dir` flag)
//!   2. LIBSTUDY_CACHE_DIR env var
//!   3. platform data dir via dirs crate
//!   4. Fallback: ./.libstudy-cache

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::cache::CacheConfig;
use crate::error::{StudyError, StudyResult};

pub const CACHE_DIR_ENV: &str = "LIBSTUDY_CACHE_DIR";
pub const API_BASE_ENV: &str = "LIBSTUDY_API_BASE";
pub const MODEL_ENV: &str = "LIBSTUDY_MODEL";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DAY: u64 = 24 * 60 * 60;

/// Platform default root for all libstudy caches
pub fn default_cache_root() -> PathBuf {
    if let Some(base) = dirs::data_dir() {
        return base.join("libstudy");
    }
    PathBuf::from(".").join(".libstudy-cache")
}

/// Resolve the cache root from an explicit override, the environment, or the platform default
pub fn resolve_cache_root(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Ok(env_dir) = std::env::var(CACHE_DIR_ENV) {
        if !env_dir.trim().is_empty() {
            return PathBuf::from(env_dir);
        }
    }
    default_cache_root()
}

/// Top-level configuration handed to the study engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    pub cache_root: PathBuf,
    pub ai_tool: String,
    pub model: String,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub items_per_page: usize,
    pub request_timeout_secs: u64,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            ai_tool: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            items_per_page: 10,
            request_timeout_secs: 60,
        }
    }
}

impl StudyConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env(cache_dir: Option<PathBuf>) -> Self {
        let mut config = Self {
            cache_root: resolve_cache_root(cache_dir),
            ..Default::default()
        };
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                config.api_base = base.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                config.model = model.trim().to_string();
            }
        }
        config.api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty());
        config
    }

    pub fn validate(&self) -> StudyResult<()> {
        if self.items_per_page == 0 {
            return Err(StudyError::config("items_per_page must be at least 1"));
        }
        if self.ai_tool.trim().is_empty() {
            return Err(StudyError::config("ai_tool must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(StudyError::config("request_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Store holding library resolution results
    pub fn library_cache(&self) -> CacheConfig {
        CacheConfig::new(self.cache_root.join("libraries"))
            .with_ttl(Duration::from_secs(7 * DAY))
            .with_max_size(100 * 1024 * 1024)
    }

    /// Directory owned by the documentation response cache
    pub fn docs_cache_dir(&self) -> PathBuf {
        self.cache_root.join("docs")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_cache_dir_wins() {
        let dir = PathBuf::from("/tmp/explicit-libstudy");
        assert_eq!(resolve_cache_root(Some(dir.clone())), dir);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(StudyConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_pagination_rejected() {
        let config = StudyConfig {
            items_per_page: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is(crate::error::ErrorCode::ConfigError));
    }

    #[test]
    fn test_library_store_layout() {
        let config = StudyConfig {
            cache_root: PathBuf::from("/root-dir"),
            ..Default::default()
        };
        let lib = config.library_cache();
        assert_eq!(lib.cache_dir, PathBuf::from("/root-dir/libraries"));
        assert_eq!(lib.ttl, Duration::from_secs(7 * DAY));
        assert_eq!(config.docs_cache_dir(), PathBuf::from("/root-dir/docs"));
    }
}
