//! # Transaction Set Builder
//!
//! Turns raw `(playlist_id, track)` records into transactions: one set of
//! distinct tracks per playlist, in the order playlists are first seen.
//!
//! Track identity is case-sensitive and untouched here. Normalization only
//! happens at query time in [`crate::matcher`], so the mining corpus stays
//! identical across retrains.
//!
//! ## Sources
//!
//! - [`TransactionSetBuilder`] accepts records one at a time from any source
//! - [`load_csv`] reads a playlist dataset with the `csv` crate
//!
//! ## Example
//!
//! ```
//! use mixtape::transactions::TransactionSetBuilder;
//!
//! let mut builder = TransactionSetBuilder::new(None);
//! builder.push("1", "rock");
//! builder.push("2", "pop");
//! builder.push("1", "metal");
//! builder.push("1", "rock");
//!
//! let set = builder.build()?;
//! assert_eq!(set.len(), 2);
//! assert_eq!(set.transactions()[0].items(), ["rock", "metal"]);
//! # Ok::<(), mixtape::transactions::DataSourceError>(())
//! ```

use log::{debug, info, trace};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while extracting transactions. Fatal to a training run.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("Failed to read dataset at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse CSV dataset at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Column '{column}' not found in dataset (available: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("No valid transactions left after filtering ({records} records read)")]
    NoTransactions { records: usize },
}

/// One playlist's distinct tracks, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    items: Vec<String>,
}

impl Transaction {
    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn contains(&self, item: &str) -> bool {
        self.items.iter().any(|i| i == item)
    }
}

impl<S: Into<String>> FromIterator<S> for Transaction {
    /// Collects items, dropping duplicates while keeping first-seen order.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let items = iter
            .into_iter()
            .map(Into::into)
            .filter(|item: &String| seen.insert(item.clone()))
            .collect();
        Self { items }
    }
}

/// Size statistics over a transaction set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionStats {
    pub mean_len: f64,
    pub min_len: usize,
    pub max_len: usize,
}

/// Ordered, non-empty transactions plus bookkeeping about how they were read.
#[derive(Debug, Clone, Default)]
pub struct TransactionSet {
    transactions: Vec<Transaction>,
    records_read: usize,
    skipped_records: usize,
    truncated: bool,
}

impl TransactionSet {
    /// Wrap already-grouped transactions, discarding empty ones.
    #[must_use]
    pub fn from_transactions(transactions: impl IntoIterator<Item = Transaction>) -> Self {
        let transactions: Vec<Transaction> =
            transactions.into_iter().filter(|t| !t.is_empty()).collect();
        let records_read = transactions.iter().map(Transaction::len).sum();
        Self {
            transactions,
            records_read,
            skipped_records: 0,
            truncated: false,
        }
    }

    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Records consumed before grouping, including skipped ones.
    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Records dropped because their track was blank.
    #[must_use]
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Whether reading stopped early because of the transaction cap.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    #[must_use]
    pub fn stats(&self) -> Option<TransactionStats> {
        let lens = self.transactions.iter().map(Transaction::len);
        let min_len = lens.clone().min()?;
        let max_len = lens.clone().max()?;
        #[allow(clippy::cast_precision_loss)]
        let mean_len = lens.sum::<usize>() as f64 / self.transactions.len() as f64;
        Some(TransactionStats {
            mean_len,
            min_len,
            max_len,
        })
    }
}

/// Incremental grouping of `(playlist_id, track)` records.
///
/// With a cap of `n`, the first record that would introduce playlist `n + 1`
/// stops the builder: that record and everything after it is ignored. Input
/// order alone decides which playlists are kept, so retrains on the same
/// input and cap are reproducible.
#[derive(Debug, Default)]
pub struct TransactionSetBuilder {
    max_transactions: Option<usize>,
    index: HashMap<String, usize>,
    groups: Vec<(Vec<String>, HashSet<String>)>,
    records_read: usize,
    skipped_records: usize,
    stopped: bool,
}

impl TransactionSetBuilder {
    #[must_use]
    pub fn new(max_transactions: Option<usize>) -> Self {
        Self {
            max_transactions,
            ..Default::default()
        }
    }

    /// Feed one record. Returns `false` once the cap has been hit, after which
    /// the caller can stop reading.
    pub fn push(&mut self, playlist_id: &str, track: &str) -> bool {
        if self.stopped {
            return false;
        }
        self.records_read += 1;

        if track.trim().is_empty() {
            self.skipped_records += 1;
            trace!("Skipping blank track in playlist {playlist_id}");
            return true;
        }

        let slot = match self.index.get(playlist_id) {
            Some(&slot) => slot,
            None => {
                if self
                    .max_transactions
                    .is_some_and(|cap| self.groups.len() >= cap)
                {
                    debug!(
                        "Transaction cap of {} reached at record {}",
                        self.groups.len(),
                        self.records_read
                    );
                    self.records_read -= 1;
                    self.stopped = true;
                    return false;
                }
                self.index.insert(playlist_id.to_owned(), self.groups.len());
                self.groups.push((Vec::new(), HashSet::new()));
                self.groups.len() - 1
            }
        };

        let (items, seen) = &mut self.groups[slot];
        if seen.insert(track.to_owned()) {
            items.push(track.to_owned());
        }
        true
    }

    /// Finish grouping.
    ///
    /// # Errors
    ///
    /// Returns [`DataSourceError::NoTransactions`] if nothing usable was read.
    pub fn build(self) -> Result<TransactionSet, DataSourceError> {
        let transactions: Vec<Transaction> = self
            .groups
            .into_iter()
            .filter(|(items, _)| !items.is_empty())
            .map(|(items, _)| Transaction { items })
            .collect();

        if transactions.is_empty() {
            return Err(DataSourceError::NoTransactions {
                records: self.records_read,
            });
        }

        Ok(TransactionSet {
            transactions,
            records_read: self.records_read,
            skipped_records: self.skipped_records,
            truncated: self.stopped,
        })
    }
}

/// Column names used when reading a CSV playlist dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvColumns {
    pub playlist: String,
    /// Preferred track column, tried first.
    pub track: String,
    /// Used when `track` is absent from the header.
    pub track_fallback: Option<String>,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            playlist: "pid".to_string(),
            track: "track_name".to_string(),
            track_fallback: Some("track_uri".to_string()),
        }
    }
}

/// Read a CSV dataset of playlist rows into transactions.
///
/// # Errors
///
/// Fails when the file cannot be opened or parsed, a column is missing, or
/// no valid transaction remains.
pub fn load_csv(
    path: &Path,
    columns: &CsvColumns,
    max_transactions: Option<usize>,
) -> Result<TransactionSet, DataSourceError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let available = || headers.iter().map(str::to_string).collect::<Vec<_>>();
    let position = |name: &str| headers.iter().position(|h| h == name);

    let playlist_idx =
        position(&columns.playlist).ok_or_else(|| DataSourceError::MissingColumn {
            column: columns.playlist.clone(),
            available: available(),
        })?;

    let (track_name, track_idx) = match position(&columns.track) {
        Some(idx) => (columns.track.as_str(), idx),
        None => columns
            .track_fallback
            .as_deref()
            .and_then(|fallback| position(fallback).map(|idx| (fallback, idx)))
            .ok_or_else(|| DataSourceError::MissingColumn {
                column: columns.track.clone(),
                available: available(),
            })?,
    };
    info!(
        "Grouping column '{track_name}' by '{}' from {}",
        columns.playlist,
        path.display()
    );

    let mut builder = TransactionSetBuilder::new(max_transactions);
    let mut record = csv::StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| csv_error(path, e))?
    {
        let playlist = record.get(playlist_idx).unwrap_or_default();
        let track = record.get(track_idx).unwrap_or_default();
        if !builder.push(playlist, track) {
            break;
        }
    }

    builder.build()
}

fn csv_error(path: &Path, source: csv::Error) -> DataSourceError {
    if let csv::ErrorKind::Io(io) = source.kind() {
        return DataSourceError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(io.kind(), io.to_string()),
        };
    }
    DataSourceError::Csv {
        path: path.to_path_buf(),
        source,
    }
}
