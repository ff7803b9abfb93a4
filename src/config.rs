//! # Configuration Module
//!
//! Resolved settings for the training job and the server, plus the
//! platform data directory used for default artifact locations.
//!
//! ## Data Storage
//!
//! Without an explicit path the artifact lives in the platform data
//! directory:
//! - Linux: `~/.local/share/mixtape/model.json`
//! - macOS: `~/Library/Application Support/mixtape/model.json`
//! - Windows: `%APPDATA%\mixtape\model.json`
//!
//! Values normally arrive from the command line or environment (see
//! [`crate::cli`]) and are checked here with [`TrainConfig::validate`] and
//! [`ServeConfig::validate`] before any work starts.

use crate::artifact::ARTIFACT_FILE_NAME;
use crate::transactions::CsvColumns;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MIN_SUP_RATIO: f64 = 0.05;
pub const DEFAULT_MIN_CONF: f64 = 0.6;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 50028;

const TRACK_NAME_COLUMN: &str = "track_name";
const TRACK_URI_COLUMN: &str = "track_uri";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine system data directory; pass an explicit path instead")]
    NoDataDir,

    #[error("Failed to create data directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Minimum support ratio must be in (0, 1], got {0}")]
    InvalidSupportRatio(f64),

    #[error("Minimum confidence must be in [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}

/// Returns the platform-appropriate data directory for Mixtape, creating it
/// if needed.
///
/// # Errors
///
/// Fails when the platform has no data directory or it cannot be created.
pub fn get_data_dir() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;

    let mixtape_dir = data_dir.join("mixtape");
    fs::create_dir_all(&mixtape_dir).map_err(|source| ConfigError::CreateDir {
        path: mixtape_dir.clone(),
        source,
    })?;

    Ok(mixtape_dir)
}

/// Default artifact location inside [`get_data_dir`].
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn default_model_path() -> Result<PathBuf, ConfigError> {
    Ok(get_data_dir()?.join(ARTIFACT_FILE_NAME))
}

/// Pick the track column and its fallback.
///
/// `force_track_uri` always reads `track_uri`. Otherwise the configured
/// column is tried first and, when it is one of `track_name` / `track_uri`,
/// the other one is used if it is missing from the dataset.
#[must_use]
pub fn resolve_track_columns(track_column: &str, force_track_uri: bool) -> (String, Option<String>) {
    if force_track_uri {
        return (TRACK_URI_COLUMN.to_string(), None);
    }
    let fallback = match track_column {
        TRACK_NAME_COLUMN => Some(TRACK_URI_COLUMN.to_string()),
        TRACK_URI_COLUMN => Some(TRACK_NAME_COLUMN.to_string()),
        _ => None,
    };
    (track_column.to_string(), fallback)
}

/// Settings for one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub data_path: PathBuf,
    pub output_path: PathBuf,
    pub columns: CsvColumns,
    /// Stop reading after this many playlists.
    pub max_playlists: Option<usize>,
    pub min_sup_ratio: f64,
    pub min_conf: f64,
    pub max_itemset_len: Option<usize>,
}

impl TrainConfig {
    /// Configuration with default thresholds and columns.
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            output_path: output_path.into(),
            columns: CsvColumns::default(),
            max_playlists: None,
            min_sup_ratio: DEFAULT_MIN_SUP_RATIO,
            min_conf: DEFAULT_MIN_CONF,
            max_itemset_len: None,
        }
    }

    /// # Errors
    ///
    /// Rejects a support ratio outside `(0, 1]`, a confidence outside
    /// `[0, 1]`, and zero-valued caps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_sup_ratio > 0.0 && self.min_sup_ratio <= 1.0) {
            return Err(ConfigError::InvalidSupportRatio(self.min_sup_ratio));
        }
        if !(0.0..=1.0).contains(&self.min_conf) {
            return Err(ConfigError::InvalidConfidence(self.min_conf));
        }
        if self.max_playlists == Some(0) {
            return Err(ConfigError::ZeroLimit("max_playlists"));
        }
        if self.max_itemset_len == Some(0) {
            return Err(ConfigError::ZeroLimit("max_itemset_len"));
        }
        Ok(())
    }
}

/// Settings for the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    pub model_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Applied when a request does not ask for a limit.
    pub default_limit: Option<usize>,
}

impl ServeConfig {
    #[must_use]
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            default_limit: None,
        }
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// # Errors
    ///
    /// Rejects a zero default limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == Some(0) {
            return Err(ConfigError::ZeroLimit("default_limit"));
        }
        Ok(())
    }
}
