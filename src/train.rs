//! # Training Pipeline
//!
//! Batch job behind `mixtape train`:
//!
//! 1. Read playlist rows into a [`TransactionSet`]
//! 2. Mine frequent itemsets with FP-Growth
//! 3. Derive association rules
//! 4. Write the [`ModelArtifact`] atomically
//!
//! Finding no frequent itemsets is not fatal: the run still writes a
//! zero-rule artifact so the server has something to serve. Everything else
//! (unreadable data, bad thresholds, write failures) aborts the run.

use crate::artifact::{ArtifactError, ArtifactMetadata, ModelArtifact};
use crate::config::{ConfigError, TrainConfig};
use crate::fpgrowth::{mine, FrequentItemsets, MiningError, MiningParams};
use crate::rules::generate_rules;
use crate::transactions::{load_csv, DataSourceError, TransactionSet, TransactionStats};
use chrono::Utc;
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Number of rules echoed to the log after training.
const PREVIEW_RULES: usize = 5;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Mining(#[from] MiningError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Summary of a finished training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub output_path: PathBuf,
    pub playlists: usize,
    pub records_read: usize,
    pub skipped_records: usize,
    pub truncated: bool,
    pub stats: Option<TransactionStats>,
    pub itemsets: usize,
    pub rules: usize,
    pub artifact_bytes: u64,
    pub mining_time: Duration,
}

/// Run the full pipeline described by `config`.
///
/// # Errors
///
/// Returns [`TrainError`] for invalid configuration, unreadable data,
/// invalid mining parameters or a failed artifact write.
pub fn run(config: &TrainConfig) -> Result<TrainReport, TrainError> {
    config.validate()?;
    info!(
        "Training: data={} output={} min_sup_ratio={} min_conf={} max_playlists={:?} max_itemset_len={:?}",
        config.data_path.display(),
        config.output_path.display(),
        config.min_sup_ratio,
        config.min_conf,
        config.max_playlists,
        config.max_itemset_len
    );

    let set = load_csv(&config.data_path, &config.columns, config.max_playlists)?;
    let stats = set.stats();
    if let Some(stats) = &stats {
        info!(
            "Playlists: {} (tracks per playlist mean {:.1}, min {}, max {})",
            set.len(),
            stats.mean_len,
            stats.min_len,
            stats.max_len
        );
    }

    let started = Instant::now();
    let (artifact, itemsets) = build_artifact(&set, config)?;
    let mining_time = started.elapsed();
    info!(
        "Mined {itemsets} frequent itemsets and {} rules in {:.2?}",
        artifact.rules().len(),
        mining_time
    );
    for rule in artifact.rules().iter().take(PREVIEW_RULES) {
        info!("  {rule}");
    }

    let artifact_bytes = artifact.save(&config.output_path)?;
    info!(
        "Saved model to {} ({:.1} KiB)",
        config.output_path.display(),
        artifact_bytes as f64 / 1024.0
    );

    Ok(TrainReport {
        output_path: config.output_path.clone(),
        playlists: set.len(),
        records_read: set.records_read(),
        skipped_records: set.skipped_records(),
        truncated: set.truncated(),
        stats,
        itemsets,
        rules: artifact.rules().len(),
        artifact_bytes,
        mining_time,
    })
}

/// Mine `set` and package the rules with run metadata. Also returns the
/// number of frequent itemsets found.
///
/// # Errors
///
/// Only invalid mining parameters fail; an empty mining result yields a
/// zero-rule artifact.
pub fn build_artifact(
    set: &TransactionSet,
    config: &TrainConfig,
) -> Result<(ModelArtifact, usize), TrainError> {
    let mut params = MiningParams::new(config.min_sup_ratio);
    if let Some(max_len) = config.max_itemset_len {
        params = params.with_max_itemset_len(max_len);
    }

    let itemsets = match mine(set.transactions(), &params) {
        Ok(itemsets) => itemsets,
        Err(e @ MiningError::NoFrequentItemsets { .. }) => {
            warn!("{e}; writing an artifact with no rules");
            FrequentItemsets::from_counts(Vec::new(), set.len())
        }
        Err(e) => return Err(e.into()),
    };
    let rules = generate_rules(&itemsets, config.min_conf);

    let metadata = ArtifactMetadata {
        created_at: Some(Utc::now()),
        data_path: Some(config.data_path.display().to_string()),
        num_playlists: Some(set.len() as u64),
        num_rules: Some(rules.len() as u64),
        min_sup_ratio: Some(config.min_sup_ratio),
        min_conf: Some(config.min_conf),
        max_itemset_len: config.max_itemset_len,
    };
    Ok((ModelArtifact::new(rules, metadata), itemsets.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactions::Transaction;
    use std::fs;
    use tempfile::TempDir;

    fn scenario() -> TransactionSet {
        TransactionSet::from_transactions(vec![
            ["rock", "pop"].into_iter().collect::<Transaction>(),
            ["rock", "metal"].into_iter().collect(),
            ["pop", "dance"].into_iter().collect(),
            ["metal", "rock"].into_iter().collect(),
        ])
    }

    fn config(dir: &TempDir) -> TrainConfig {
        TrainConfig {
            min_sup_ratio: 0.5,
            min_conf: 0.5,
            ..TrainConfig::new(dir.path().join("data.csv"), dir.path().join("model.json"))
        }
    }

    #[test]
    fn test_build_artifact_metadata() {
        let dir = TempDir::new().unwrap();
        let (artifact, itemsets) = build_artifact(&scenario(), &config(&dir)).unwrap();

        // {rock}, {pop}, {metal}, {rock, metal}
        assert_eq!(itemsets, 4);
        assert_eq!(artifact.rules().len(), 2);

        let metadata = artifact.metadata();
        assert_eq!(metadata.num_playlists, Some(4));
        assert_eq!(metadata.num_rules, Some(2));
        assert_eq!(metadata.min_sup_ratio, Some(0.5));
        assert!(metadata.created_at.is_some());
        assert!(metadata.data_path.as_deref().unwrap().ends_with("data.csv"));
    }

    #[test]
    fn test_no_frequent_itemsets_yields_empty_artifact() {
        let dir = TempDir::new().unwrap();
        let set = TransactionSet::from_transactions(vec![
            ["a"].into_iter().collect::<Transaction>(),
            ["b"].into_iter().collect(),
            ["c"].into_iter().collect(),
        ]);
        let config = TrainConfig { min_sup_ratio: 0.9, ..config(&dir) };

        let (artifact, itemsets) = build_artifact(&set, &config).unwrap();
        assert_eq!(itemsets, 0);
        assert!(artifact.rules().is_empty());
        assert_eq!(artifact.metadata().num_rules, Some(0));
    }

    #[test]
    fn test_run_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fs::write(
            &config.data_path,
            "pid,track_name\n1,rock\n1,pop\n2,rock\n2,metal\n3,pop\n3,dance\n4,metal\n4,rock\n",
        )
        .unwrap();

        let report = run(&config).unwrap();
        assert_eq!(report.playlists, 4);
        assert_eq!(report.rules, 2);
        assert!(report.artifact_bytes > 0);

        let loaded = ModelArtifact::load(&config.output_path).unwrap();
        assert_eq!(loaded.artifact.rules().len(), 2);
        assert_eq!(loaded.artifact.metadata().num_playlists, Some(4));
    }

    #[test]
    fn test_run_rejects_invalid_config_before_reading() {
        let dir = TempDir::new().unwrap();
        let config = TrainConfig { min_sup_ratio: 0.0, ..config(&dir) };
        assert!(matches!(run(&config), Err(TrainError::Config(_))));
        assert!(!config.output_path.exists());
    }

    #[test]
    fn test_run_missing_dataset_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        assert!(matches!(run(&config), Err(TrainError::DataSource(_))));
        assert!(!config.output_path.exists());
    }
}
