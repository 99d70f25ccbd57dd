use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

pub use crate::codec::IndexPolicy;
use crate::error::FeatureError;
use crate::source::{ByteSource, FsByteSource, HttpByteSource};

pub const DEFAULT_CONFIG_FILE: &str = "kira-sf.json";

/// What a single feature load returns when its record cannot be fetched or decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Zero-filled vector of the cell count; the error is logged.
    #[default]
    ZeroFill,
    /// The error is returned to the caller.
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default)]
    pub index_policy: IndexPolicy,
    /// Reject names missing from `metadata.json` with `UnknownFeature` before fetching.
    #[serde(default)]
    pub strict_names: bool,
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

impl StoreConfig {
    pub fn strict() -> Self {
        Self {
            fallback: FallbackPolicy::Strict,
            strict_names: true,
            ..Self::default()
        }
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    Path { path: Utf8PathBuf },
    Url { url: String },
}

impl SourceConfig {
    pub fn open(&self) -> Result<Box<dyn ByteSource>, FeatureError> {
        match self {
            SourceConfig::Path { path } => Ok(Box::new(FsByteSource::new(path.clone()))),
            SourceConfig::Url { url } => Ok(Box::new(HttpByteSource::new(url.clone())?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Config, FeatureError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(FeatureError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FeatureError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, FeatureError> {
        let config: Config = serde_json::from_str(content)
            .map_err(|err| FeatureError::ConfigParse(err.to_string()))?;
        if let Some(version) = config.schema_version {
            if version != 1 {
                return Err(FeatureError::ConfigParse(format!(
                    "unsupported schema_version {version}"
                )));
            }
        }
        Ok(config)
    }
}
