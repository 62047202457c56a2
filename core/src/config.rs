//! Settings file for a publishing setup.
//!
//! Every section and key is optional; anything left out keeps its default.

use crate::caption::CaptionConfig;
use crate::detector::DetectorConfig;
use crate::publisher::Pacing;
use dirs::data_local_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "memorialize.toml";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub publisher: PublisherConfig,
    pub caption: CaptionConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Directory albums are exported into.
    pub outbox_dir: PathBuf,
    pub pacing_min_seconds: u64,
    pub pacing_max_seconds: u64,
    /// Square-crop additional images around their face before export.
    pub frame_images: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            outbox_dir: default_outbox_dir(),
            pacing_min_seconds: 60,
            pacing_max_seconds: 180,
            frame_images: true,
        }
    }
}

impl PublisherConfig {
    pub fn pacing(&self) -> Pacing {
        Pacing::between(
            Duration::from_secs(self.pacing_min_seconds),
            Duration::from_secs(self.pacing_max_seconds),
        )
    }
}

fn default_outbox_dir() -> PathBuf {
    data_local_dir()
        .map(|mut dir| {
            dir.push("Memorialize");
            dir.push("outbox");
            dir
        })
        .unwrap_or_else(|| PathBuf::from("outbox"))
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Loads `path` when it exists and falls back to defaults otherwise. A
    /// file that exists but does not parse is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid config TOML in {}: {source}", path.display())]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.detector.hash_threshold, 10);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[detector]
cascade_dir = "/opt/cascades"
hash_threshold = 8

[publisher]
outbox_dir = "/srv/outbox"
pacing_max_seconds = 5

[caption]
hashtags = ["remember"]
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.detector.cascade_dir, PathBuf::from("/opt/cascades"));
        assert_eq!(config.detector.hash_threshold, 8);
        assert_eq!(config.detector.face_margin, 0.1);
        assert_eq!(config.publisher.outbox_dir, PathBuf::from("/srv/outbox"));
        assert_eq!(config.publisher.pacing_min_seconds, 60);
        assert_eq!(config.publisher.pacing().max, Duration::from_secs(5));
        assert_eq!(config.publisher.pacing().min, Duration::from_secs(5));
        assert!(config.publisher.frame_images);
        assert_eq!(config.caption.hashtags, vec!["remember".to_string()]);
    }

    #[test]
    fn pacing_never_waits_longer_than_configured_max() {
        let publisher = PublisherConfig {
            pacing_min_seconds: 60,
            pacing_max_seconds: 5,
            ..PublisherConfig::default()
        };
        let pacing = publisher.pacing();
        for _ in 0..20 {
            assert!(pacing.delay() <= Duration::from_secs(5));
        }

        let defaults = PublisherConfig::default().pacing();
        assert_eq!(defaults.min, Duration::from_secs(60));
        assert_eq!(defaults.max, Duration::from_secs(180));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[detector\nhash_threshold = ").unwrap();
        assert!(matches!(
            AppConfig::load_or_default(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
