//! # Model Store
//!
//! Holds the artifact currently being served and swaps in a newer one when
//! the file on disk changes.
//!
//! ## Lifecycle
//!
//! ```text
//! Empty --load ok--> Loaded --file touched--> Stale --load ok--> Loaded
//!                               |                  \--load failed--> Loaded (previous model kept)
//! ```
//!
//! A new artifact is fully parsed, validated and indexed before it is
//! published with a single `Arc` replacement, so a reader holds either the
//! old model or the new one, never a mix. There is no background watcher:
//! callers run [`ModelStore::refresh`] (usually through
//! [`ModelStore::current`]) before each request.
//!
//! ## Change detection
//!
//! A file counts as changed when its modification time is newer than the
//! loaded one, or equal to it with a different length. Filesystems with
//! coarse timestamps can give two quick writes the same time; the length
//! catches most of those. A rewrite within one timestamp tick that keeps the
//! exact length goes unnoticed until the file is touched again.
//!
//! ## Concurrency
//!
//! Only one caller reloads at a time. While it does, callers that already
//! have a model keep serving it instead of waiting; a caller that has
//! nothing to serve waits for the reload to finish.

use crate::artifact::{ArtifactFormat, ModelArtifact};
use crate::matcher::{Matcher, Recommendation};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, TryLockError};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing has been loaded since startup.
    #[error("No model available from {path}{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    ModelUnavailable {
        path: PathBuf,
        last_error: Option<String>,
    },
}

/// A validated, indexed artifact ready to answer queries.
#[derive(Debug)]
pub struct LoadedModel {
    matcher: Matcher,
    format: ArtifactFormat,
    skipped_rules: usize,
    source_mtime: Option<SystemTime>,
    loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    #[must_use]
    pub fn artifact(&self) -> &ModelArtifact {
        self.matcher.artifact()
    }

    #[must_use]
    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// Rule records rejected while loading.
    #[must_use]
    pub fn skipped_rules(&self) -> usize {
        self.skipped_rules
    }

    #[must_use]
    pub fn source_mtime(&self) -> Option<SystemTime> {
        self.source_mtime
    }

    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    #[must_use]
    pub fn recommend<S: AsRef<str>>(&self, query: &[S], limit: Option<usize>) -> Recommendation {
        self.matcher.recommend(query, limit)
    }
}

/// What a call to [`ModelStore::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The file has not changed since the last load or failed attempt.
    Unchanged,
    /// A new model was published.
    Loaded,
    /// Loading failed; the previous model, if any, is still active.
    Failed,
    /// Another caller is reloading; the current model is served meanwhile.
    Busy,
}

/// What the store remembers about a version of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn is_newer_than(self, loaded: Self) -> bool {
        self.modified > loaded.modified
            || (self.modified == loaded.modified && self.len != loaded.len)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    active: Option<Arc<LoadedModel>>,
    loaded: Option<FileStamp>,
    /// Stamp of the last file that failed to load (`Some(None)` when it could
    /// not be stat'ed). Not retried until the stamp changes.
    failed: Option<Option<FileStamp>>,
    last_error: Option<String>,
}

impl StoreState {
    fn needs_reload(&self, stamp: Option<FileStamp>) -> bool {
        if self.failed == Some(stamp) {
            return false;
        }
        match (&self.active, stamp, self.loaded) {
            (None, _, _) => true,
            (Some(_), None, _) => false,
            (Some(_), Some(_), None) => true,
            (Some(_), Some(stamp), Some(loaded)) => stamp.is_newer_than(loaded),
        }
    }
}

/// Serves the most recent successfully loaded artifact from one path.
#[derive(Debug)]
pub struct ModelStore {
    path: PathBuf,
    state: RwLock<StoreState>,
    reload: Mutex<()>,
}

impl ModelStore {
    /// Create an empty store. Nothing is read until the first refresh.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(StoreState::default()),
            reload: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active model without checking the file.
    #[must_use]
    pub fn active(&self) -> Option<Arc<LoadedModel>> {
        self.read_state().active.clone()
    }

    /// Refresh, then return the active model.
    ///
    /// # Errors
    ///
    /// [`StoreError::ModelUnavailable`] only when no model has ever loaded.
    /// A failed reload after a good one still returns the older model.
    pub fn current(&self) -> Result<Arc<LoadedModel>, StoreError> {
        self.refresh();
        let state = self.read_state();
        state
            .active
            .clone()
            .ok_or_else(|| StoreError::ModelUnavailable {
                path: self.path.clone(),
                last_error: state.last_error.clone(),
            })
    }

    /// Reload the artifact if the file changed since the active model was
    /// read.
    pub fn refresh(&self) -> RefreshOutcome {
        let stamp = self.file_stamp();
        let has_model = {
            let state = self.read_state();
            if !state.needs_reload(stamp) {
                return RefreshOutcome::Unchanged;
            }
            state.active.is_some()
        };

        let _guard = if has_model {
            match self.reload.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => {
                    debug!("Reload already in progress, serving current model");
                    return RefreshOutcome::Busy;
                }
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            }
        } else {
            self.reload.lock().unwrap_or_else(PoisonError::into_inner)
        };

        // Someone else may have finished the same reload while we waited.
        let stamp = self.file_stamp();
        if !self.read_state().needs_reload(stamp) {
            return RefreshOutcome::Unchanged;
        }

        match ModelArtifact::load(&self.path) {
            Ok(loaded) => {
                let skipped_rules = loaded.skipped.len();
                let model = LoadedModel {
                    matcher: Matcher::new(loaded.artifact),
                    format: loaded.format,
                    skipped_rules,
                    source_mtime: stamp.map(|s| s.modified),
                    loaded_at: Utc::now(),
                };
                info!(
                    "Loaded model from {} ({} rules, {skipped_rules} skipped, {:?} format)",
                    self.path.display(),
                    model.artifact().rules().len(),
                    model.format
                );

                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                state.active = Some(Arc::new(model));
                state.loaded = stamp;
                state.failed = None;
                state.last_error = None;
                RefreshOutcome::Loaded
            }
            Err(e) => {
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                if state.active.is_some() {
                    warn!("Reload failed, keeping previous model: {e}");
                } else {
                    warn!("No model loaded: {e}");
                }
                state.failed = Some(stamp);
                state.last_error = Some(e.to_string());
                RefreshOutcome::Failed
            }
        }
    }

    fn file_stamp(&self) -> Option<FileStamp> {
        let stamp = fs::metadata(&self.path).and_then(|m| {
            Ok(FileStamp {
                modified: m.modified()?,
                len: m.len(),
            })
        });
        match stamp {
            Ok(stamp) => Some(stamp),
            Err(e) => {
                debug!("Cannot stat {}: {e}", self.path.display());
                None
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMetadata;
    use crate::rules::Rule;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn artifact(rules: &[(&str, &str, f64)]) -> ModelArtifact {
        ModelArtifact::new(
            rules
                .iter()
                .map(|&(a, c, conf)| Rule::new(strings(&[a]), strings(&[c]), conf))
                .collect(),
            ArtifactMetadata::default(),
        )
    }

    /// Give the file a modification time `secs` seconds after a fixed base so
    /// successive writes are strictly ordered regardless of clock resolution.
    fn set_mtime(path: &Path, secs: u64) {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(base + Duration::from_secs(secs))
            .unwrap();
    }

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        (dir, path)
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let (_dir, path) = setup();
        let store = ModelStore::new(&path);

        let err = store.current().unwrap_err();
        assert!(matches!(
            err,
            StoreError::ModelUnavailable { last_error: Some(_), .. }
        ));
        assert_eq!(store.refresh(), RefreshOutcome::Unchanged, "failure remembered");

        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        let model = store.current().expect("file appeared");
        assert_eq!(model.artifact().rules().len(), 1);
    }

    #[test]
    fn test_unchanged_file_keeps_same_model() {
        let (_dir, path) = setup();
        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        set_mtime(&path, 1);

        let store = ModelStore::new(&path);
        let first = store.current().unwrap();
        assert_eq!(store.refresh(), RefreshOutcome::Unchanged);
        let second = store.current().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_newer_file_is_swapped_in() {
        let (_dir, path) = setup();
        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        set_mtime(&path, 1);
        let store = ModelStore::new(&path);
        let first = store.current().unwrap();

        artifact(&[("pop", "dance", 0.9), ("dance", "pop", 0.8)])
            .save(&path)
            .unwrap();
        set_mtime(&path, 2);

        assert_eq!(store.refresh(), RefreshOutcome::Loaded);
        let second = store.current().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.artifact().rules().len(), 2);
        assert_eq!(first.artifact().rules().len(), 1, "old readers keep their model");
    }

    #[test]
    fn test_failed_reload_keeps_previous_model() {
        let (_dir, path) = setup();
        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        set_mtime(&path, 1);
        let store = ModelStore::new(&path);
        let good = store.current().unwrap();

        fs::write(&path, "{ truncated").unwrap();
        set_mtime(&path, 2);
        assert_eq!(store.refresh(), RefreshOutcome::Failed);
        assert_eq!(store.refresh(), RefreshOutcome::Unchanged, "not re-parsed");

        let served = store.current().unwrap();
        assert!(Arc::ptr_eq(&good, &served));
        assert_eq!(served.recommend(&["rock"], None).track_ids(), vec!["metal"]);

        artifact(&[("pop", "dance", 0.9)]).save(&path).unwrap();
        set_mtime(&path, 3);
        let fixed = store.current().unwrap();
        assert_eq!(fixed.recommend(&["pop"], None).track_ids(), vec!["dance"]);
    }

    #[test]
    fn test_same_mtime_different_length_is_reloaded() {
        let (_dir, path) = setup();
        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        set_mtime(&path, 1);
        let store = ModelStore::new(&path);
        let first = store.current().unwrap();

        artifact(&[("pop", "dance", 0.9), ("dance", "pop", 0.8)])
            .save(&path)
            .unwrap();
        set_mtime(&path, 1);

        assert_eq!(store.refresh(), RefreshOutcome::Loaded);
        let second = store.current().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.artifact().rules().len(), 2);
        assert_eq!(store.refresh(), RefreshOutcome::Unchanged);
    }

    #[test]
    fn test_broken_file_fixed_within_same_mtime_is_retried() {
        let (_dir, path) = setup();
        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        set_mtime(&path, 1);
        let store = ModelStore::new(&path);
        store.current().unwrap();

        fs::write(&path, "{ truncated").unwrap();
        set_mtime(&path, 2);
        assert_eq!(store.refresh(), RefreshOutcome::Failed);

        artifact(&[("pop", "dance", 0.9)]).save(&path).unwrap();
        set_mtime(&path, 2);
        assert_eq!(store.refresh(), RefreshOutcome::Loaded);
        let fixed = store.current().unwrap();
        assert_eq!(fixed.recommend(&["pop"], None).track_ids(), vec!["dance"]);
    }

    #[test]
    fn test_zero_rule_artifact_serves_sentinel() {
        let (_dir, path) = setup();
        artifact(&[]).save(&path).unwrap();

        let store = ModelStore::new(&path);
        let model = store.current().expect("zero rules is still a model");
        assert_eq!(model.recommend(&["rock"], None), Recommendation::NoRecommendation);
    }

    #[test]
    fn test_skipped_rules_are_counted() {
        let (_dir, path) = setup();
        fs::write(
            &path,
            r#"[[["rock"], ["metal"], 0.7], [["rock"], ["rock"], 0.7], "junk"]"#,
        )
        .unwrap();

        let model = ModelStore::new(&path).current().unwrap();
        assert_eq!(model.format(), ArtifactFormat::Legacy);
        assert_eq!(model.artifact().rules().len(), 1);
        assert_eq!(model.skipped_rules(), 2);
    }

    #[test]
    fn test_concurrent_readers_always_see_a_model() {
        let (_dir, path) = setup();
        artifact(&[("rock", "metal", 0.7)]).save(&path).unwrap();
        set_mtime(&path, 1);
        let store = ModelStore::new(&path);
        store.current().unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let model = store.current().expect("model stays available");
                        assert!(!model.artifact().rules().is_empty());
                    }
                });
            }
            for secs in 2..6 {
                artifact(&[("rock", "metal", 0.7), ("pop", "dance", 0.5)])
                    .save(&path)
                    .unwrap();
                set_mtime(&path, secs);
            }
        });

        assert_eq!(store.current().unwrap().artifact().rules().len(), 2);
    }
}
