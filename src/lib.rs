//! Playlist co-occurrence mining and song recommendations.
//!
//! Mixtape learns which songs are added to playlists together and turns that
//! into association rules ("playlists with A usually also have B"). A batch
//! job mines the rules into a model file; a small HTTP service answers
//! recommendation queries from it and reloads it whenever it is retrained.
//!
//! Core modules:
//! - [`transactions`] - Group playlist rows into transactions
//! - [`fpgrowth`] - Frequent itemset mining (FP-Growth)
//! - [`rules`] - Association rule derivation
//! - [`artifact`] - Model file format, validation and atomic writes
//! - [`matcher`] - Rule matching and ranking for queries
//! - [`store`] - Hot-reloading model store
//! - [`server`] - HTTP API
//!
//! ### Supporting Modules
//!
//! - [`train`] - The end-to-end training pipeline
//! - [`config`] - Resolved settings and data directory management
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```
//! use mixtape::fpgrowth::{mine, MiningParams};
//! use mixtape::rules::generate_rules;
//! use mixtape::transactions::Transaction;
//!
//! let playlists: Vec<Transaction> = vec![
//!     ["rock", "pop"].into_iter().collect(),
//!     ["rock", "metal"].into_iter().collect(),
//!     ["pop", "dance"].into_iter().collect(),
//!     ["metal", "rock"].into_iter().collect(),
//! ];
//!
//! let itemsets = mine(&playlists, &MiningParams::new(0.5))?;
//! assert_eq!(itemsets.support_ratio(&["rock".to_string()]), Some(0.75));
//!
//! let rules = generate_rules(&itemsets, 0.5);
//! assert!(rules
//!     .iter()
//!     .any(|r| r.antecedent() == ["rock"] && r.consequent() == ["metal"]));
//! # Ok::<(), mixtape::fpgrowth::MiningError>(())
//! ```
//!
//! ## Serving
//!
//! ```no_run
//! use mixtape::store::ModelStore;
//!
//! let store = ModelStore::new("/var/lib/mixtape/model.json");
//! let model = store.current()?;
//! let recommendation = model.recommend(&["Bohemian Rhapsody"], Some(10));
//! for song in recommendation.track_ids() {
//!     println!("{song}");
//! }
//! # Ok::<(), mixtape::store::StoreError>(())
//! ```
//!
//! ## Error Handling
//!
//! Library modules return their own `thiserror` error types; the binary
//! adds context with `anyhow`. A malformed rule record in a model file is
//! skipped and counted rather than failing the load, and a model that fails
//! to reload never replaces one that is already being served.

pub mod artifact;
pub mod cli;
pub mod completion;
pub mod config;
pub mod fpgrowth;
pub mod matcher;
pub mod rules;
pub mod server;
pub mod store;
pub mod train;
pub mod transactions;
