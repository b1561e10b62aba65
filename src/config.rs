use anyhow::{ensure, Context, Result};
use facegate_vision::{EmbeddingShape, DEFAULT_GRID_SIZE};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_CONFIG_PATH").unwrap_or("/usr/local/etc/facegate/config.toml"))
});

pub static DATA_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEGATE_DATA_PREFIX").unwrap_or("/usr/local/var/lib/facegate"))
});

/// Minimum similarity for a candidate to be accepted.
pub const DEFAULT_ACCEPT_THRESHOLD: f32 = 0.92;
/// Minimum gap between best and runner-up scores.
pub const DEFAULT_AMBIGUITY_MARGIN: f32 = 0.01;
pub const DEFAULT_NORM_TOLERANCE: f32 = 1e-3;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub matcher: MatcherConfig,
    pub session: SessionConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Side of the luminance grid; embeddings have `grid_size²` values.
    pub grid_size: u32,
    pub norm_tolerance: f32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            norm_tolerance: DEFAULT_NORM_TOLERANCE,
        }
    }
}

impl EmbeddingConfig {
    pub fn shape(&self) -> EmbeddingShape {
        EmbeddingShape::for_grid(self.grid_size, self.norm_tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub accept_threshold: f32,
    pub ambiguity_margin: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    /// Hex-encoded signing key file, created on first use.
    pub key_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            key_path: None,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_path
            .clone()
            .unwrap_or_else(|| DATA_PREFIX.join("signing.key"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| DATA_PREFIX.join("identities.bin"))
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.embedding.grid_size > 0, "embedding.grid_size must be positive");
        ensure!(
            self.embedding.norm_tolerance > 0.0 && self.embedding.norm_tolerance < 1.0,
            "embedding.norm_tolerance must be in (0, 1), got {}",
            self.embedding.norm_tolerance
        );
        ensure!(
            (-1.0..=1.0).contains(&self.matcher.accept_threshold),
            "matcher.accept_threshold must be in [-1, 1], got {}",
            self.matcher.accept_threshold
        );
        ensure!(
            self.matcher.ambiguity_margin > 0.0 && self.matcher.ambiguity_margin <= 2.0,
            "matcher.ambiguity_margin must be in (0, 2], got {}",
            self.matcher.ambiguity_margin
        );
        ensure!(self.session.ttl_secs > 0, "session.ttl_secs must be positive");
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
