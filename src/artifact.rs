//! # Model Artifact
//!
//! The immutable output of one training run: association rules plus
//! metadata describing how they were mined. Artifacts are stored as JSON:
//!
//! ```text
//! {
//!   "rules": [[["rock"], ["metal"], 0.5, 0.667], ...],
//!   "metadata": {
//!     "created_at": "2026-01-01T12:00:00Z",
//!     "num_playlists": 4,
//!     "num_rules": 2,
//!     "min_sup_ratio": 0.5,
//!     "min_conf": 0.5
//!   }
//! }
//! ```
//!
//! ## Storage boundary
//!
//! Loading is the only place that deals with older shapes:
//!
//! - A bare rule array (legacy format) loads with empty metadata
//! - `min_sup` is read as `min_sup_ratio`
//! - `created_at` may be RFC 3339 or a naive ISO-8601 timestamp (taken as UTC)
//! - Rule records may be `[antecedent, consequent]`, `[antecedent, consequent,
//!   confidence]` or `[antecedent, consequent, support, confidence]`
//!
//! Each rule record is validated on its own. A malformed record is skipped
//! and reported in [`LoadedArtifact::skipped`]; it never fails the load.
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the target, so a reader never sees half an artifact.

use crate::rules::Rule;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// File name used inside the data directory when no path is configured.
pub const ARTIFACT_FILE_NAME: &str = "model.json";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Artifact {path} has an unexpected shape: {reason}")]
    Shape { path: PathBuf, reason: String },

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A single rule record that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rule record #{index} is malformed: {reason}")]
pub struct MalformedRuleError {
    pub index: usize,
    pub reason: String,
}

/// Describes the mining run that produced an artifact. Every field is
/// optional because legacy artifacts carry none of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_playlists: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_rules: Option<u64>,
    #[serde(default, alias = "min_sup", skip_serializing_if = "Option::is_none")]
    pub min_sup_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_conf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_itemset_len: Option<usize>,
}

impl ArtifactMetadata {
    /// Whether this came from a legacy artifact (nothing recorded).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    match NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Ok(Some(naive.and_utc())),
        Err(e) => {
            warn!("Ignoring unparseable created_at '{raw}': {e}");
            Ok(None)
        }
    }
}

/// Which on-disk shape an artifact was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// `{ "rules": [...], "metadata": {...} }`
    Versioned,
    /// A bare rule array.
    Legacy,
}

/// Result of reading an artifact from storage.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub artifact: ModelArtifact,
    pub format: ArtifactFormat,
    pub skipped: Vec<MalformedRuleError>,
}

/// Rules and metadata of one mining run. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelArtifact {
    rules: Vec<Rule>,
    metadata: ArtifactMetadata,
}

impl ModelArtifact {
    #[must_use]
    pub fn new(rules: Vec<Rule>, metadata: ArtifactMetadata) -> Self {
        Self { rules, metadata }
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// Atomically write the artifact to `path`, creating parent directories.
    /// Returns the size of the written file in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Write`] on any filesystem failure.
    pub fn save(&self, path: &Path) -> Result<u64, ArtifactError> {
        let write_err = |source| ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, self).map_err(ArtifactError::Serialize)?;
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;

        let size = fs::metadata(path).map_err(write_err)?.len();
        debug!("Wrote {} rules ({size} bytes) to {}", self.rules.len(), path.display());
        Ok(size)
    }

    /// Read and validate an artifact file.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or unreadable, is not JSON, or is
    /// neither a rule array nor an object with a `rules` array. Individual bad
    /// rule records do not fail the load.
    pub fn load(path: &Path) -> Result<LoadedArtifact, ArtifactError> {
        let bytes = fs::read(path).map_err(|source| ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes, path)
    }

    /// Parse artifact bytes. `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// See [`ModelArtifact::load`].
    pub fn parse(bytes: &[u8], origin: &Path) -> Result<LoadedArtifact, ArtifactError> {
        let shape_err = |reason: &str| ArtifactError::Shape {
            path: origin.to_path_buf(),
            reason: reason.to_string(),
        };

        let value: Value = serde_json::from_slice(bytes).map_err(|source| ArtifactError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let (records, metadata, format) = match value {
            Value::Array(records) => (records, ArtifactMetadata::default(), ArtifactFormat::Legacy),
            Value::Object(mut map) => {
                let Some(Value::Array(records)) = map.remove("rules") else {
                    return Err(shape_err("missing 'rules' array"));
                };
                let metadata = match map.remove("metadata") {
                    None | Some(Value::Null) => ArtifactMetadata::default(),
                    Some(raw) => serde_json::from_value(raw)
                        .map_err(|e| shape_err(&format!("invalid metadata: {e}")))?,
                };
                (records, metadata, ArtifactFormat::Versioned)
            }
            _ => return Err(shape_err("expected a rule array or an object")),
        };

        let mut rules = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();
        for (index, record) in records.iter().enumerate() {
            match validate_rule_record(index, record) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    warn!("{e}, skipping");
                    skipped.push(e);
                }
            }
        }

        if let Some(expected) = metadata.num_rules {
            if expected != rules.len() as u64 {
                warn!(
                    "Artifact {} declares {expected} rules but {} are usable",
                    origin.display(),
                    rules.len()
                );
            }
        }

        Ok(LoadedArtifact {
            artifact: ModelArtifact::new(rules, metadata),
            format,
            skipped,
        })
    }
}

/// Check one stored rule record and turn it into a [`Rule`].
///
/// Three record shapes are accepted:
///
/// - `[antecedent, consequent, confidence]`
/// - `[antecedent, consequent, support, confidence]`
/// - `[antecedent, consequent]`, read with confidence 1.0
///
/// Both sides must be non-empty string lists with no item in common. Support
/// and confidence must be numbers in `[0, 1]`.
///
/// # Errors
///
/// Returns a [`MalformedRuleError`] naming the first problem found.
pub fn validate_rule_record(index: usize, record: &Value) -> Result<Rule, MalformedRuleError> {
    let malformed = |reason: String| MalformedRuleError { index, reason };

    let (antecedent, consequent, support, confidence) = match record {
        Value::Array(fields) => match fields.as_slice() {
            [a, c] => (a, c, None, None),
            [a, c, confidence] => (a, c, None, Some(confidence)),
            [a, c, support, confidence] => (a, c, Some(support), Some(confidence)),
            fields => {
                return Err(malformed(format!("expected 2 to 4 fields, found {}", fields.len())))
            }
        },
        other => return Err(malformed(format!("expected an array, found {}", kind(other)))),
    };

    let antecedent = item_list(antecedent).map_err(|r| malformed(format!("antecedent {r}")))?;
    let consequent = item_list(consequent).map_err(|r| malformed(format!("consequent {r}")))?;

    let support = support
        .map(|v| unit_number("support", v))
        .transpose()
        .map_err(malformed)?;
    let confidence = confidence
        .map(|v| unit_number("confidence", v))
        .transpose()
        .map_err(malformed)?
        .unwrap_or(1.0);

    if let Some(shared) = antecedent.intersection(&consequent).next() {
        return Err(malformed(format!("'{shared}' appears on both sides")));
    }

    let rule = Rule::new(
        antecedent.into_iter().collect(),
        consequent.into_iter().collect(),
        confidence,
    );
    Ok(match support {
        Some(support) => rule.with_support(support),
        None => rule,
    })
}

fn unit_number(name: &str, value: &Value) -> Result<f64, String> {
    let number = value
        .as_f64()
        .ok_or_else(|| format!("{name} is {}, not a number", kind(value)))?;
    if !(0.0..=1.0).contains(&number) {
        return Err(format!("{name} {number} outside [0, 1]"));
    }
    Ok(number)
}

fn item_list(value: &Value) -> Result<BTreeSet<String>, String> {
    let Value::Array(items) = value else {
        return Err(format!("is {}, not a list", kind(value)));
    };
    let items = items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(format!("contains {}, not a string", kind(other))),
        })
        .collect::<Result<BTreeSet<String>, String>>()?;
    if items.is_empty() {
        return Err("is empty".to_string());
    }
    Ok(items)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
