//! 开发用配置，从 TOML 文件读取

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::core::{DavError, Result};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// 倒计时秒数
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: u64,
    /// 完整配置（含密码）的 JSON 文件
    #[serde(default = "default_profiles_file")]
    pub profiles_file: PathBuf,
    /// 不含密码的元数据镜像，可选
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_countdown_seconds() -> u64 { 5 }
fn default_profiles_file() -> PathBuf { PathBuf::from("profiles.json") }
fn default_log_level() -> String { "info".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            countdown_seconds: default_countdown_seconds(),
            profiles_file: default_profiles_file(),
            metadata_file: None,
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)?;
        Self::parse(&config_str)
            .map_err(|err| DavError::configuration(format!("Can't load {}: {}", path.display(), err)))
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        toml::from_str(config_str).map_err(|err| DavError::Parse(err.to_string()))
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_seconds)
    }
}
