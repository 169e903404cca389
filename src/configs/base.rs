use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

const CONFIG_CANDIDATES: [&str; 2] = ["config.toml", "config.default.toml"];

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub niconico: NiconicoConfig,
  #[serde(default)]
  pub transcoder: TranscoderConfig,
  #[serde(default)]
  pub session: SessionConfig,
}

impl Config {
  /// Loads `config.toml`, then `config.default.toml`, and falls back to the
  /// built-in defaults when neither exists.
  pub fn load() -> AnyResult<Self> {
    let Some(config_path) = CONFIG_CANDIDATES
      .iter()
      .copied()
      .find(|p| Path::new(p).exists())
    else {
      crate::log_println!("No configuration file found, using defaults");
      return Ok(Self::default());
    };

    crate::log_println!("Loading configuration from: {}", config_path);
    Self::from_file(config_path)
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path)?;
    if config_str.trim().is_empty() {
      return Err(format!("{} is empty", path.display()).into());
    }

    let config: Config = toml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> AnyResult<()> {
    if self.session.keep_alive_interval_secs == 0 {
      return Err("session.keep_alive_interval_secs must be at least 1".into());
    }
    if self.transcoder.chunk_size == 0 {
      return Err("transcoder.chunk_size must be at least 1".into());
    }
    Ok(())
  }
}
