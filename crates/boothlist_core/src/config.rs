use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_CACHE_PATH: &str = "booth_item_cache.sqlite3";
pub const DEFAULT_INPUT_DIR: &str = "input";
pub const DEFAULT_OUTPUT_DIR: &str = "dist";
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_MAX_DEPTH: usize = 2;

/// On-disk configuration (`boothlist.toml`). Every value is optional;
/// resolution order is env (`BOOTHLIST_*`) > file > built-in default.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PipelineSection {
    pub cache_path: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub rate_limit_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub max_depth: Option<usize>,
    pub user_agent: Option<String>,
}

impl Config {
    /// Load from an explicit path, or from `boothlist.toml` in the current
    /// directory when it exists. A missing default file is not an error;
    /// an unparseable file is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from("boothlist.toml");
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn cache_path(&self) -> PathBuf {
        if let Some(value) = env_path("BOOTHLIST_CACHE") {
            return value;
        }
        self.pipeline
            .cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH))
    }

    pub fn input_dir(&self) -> PathBuf {
        if let Some(value) = env_path("BOOTHLIST_INPUT_DIR") {
            return value;
        }
        self.pipeline
            .input_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_DIR))
    }

    pub fn output_dir(&self) -> PathBuf {
        if let Some(value) = env_path("BOOTHLIST_OUTPUT_DIR") {
            return value;
        }
        self.pipeline
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn rate_limit_ms(&self) -> u64 {
        env_u64("BOOTHLIST_RATE_LIMIT_MS")
            .or(self.pipeline.rate_limit_ms)
            .unwrap_or(DEFAULT_RATE_LIMIT_MS)
    }

    pub fn timeout_ms(&self) -> u64 {
        env_u64("BOOTHLIST_TIMEOUT_MS")
            .or(self.pipeline.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn retries(&self) -> usize {
        env_u64("BOOTHLIST_RETRIES")
            .map(|value| value as usize)
            .or(self.pipeline.retries)
            .unwrap_or(DEFAULT_RETRIES)
    }

    pub fn max_depth(&self) -> usize {
        env_u64("BOOTHLIST_MAX_DEPTH")
            .map(|value| value as usize)
            .or(self.pipeline.max_depth)
            .unwrap_or(DEFAULT_MAX_DEPTH)
    }

    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("BOOTHLIST_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.pipeline
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    })
}
