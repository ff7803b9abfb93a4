//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Mixtape using Clap derive macros.
//! Every training and serving option can also be set through an environment
//! variable, which is how the job and server are usually configured in
//! containers.
//!
//! ## Commands
//!
//! - `train`: Mine association rules from a playlist CSV and write the model
//! - `serve`: Serve recommendations over HTTP, reloading the model when it changes
//! - `recommend`: One-shot recommendation from the command line
//! - `inspect`: Show model metadata and sample rules
//! - `completion`: Generate shell completion scripts
//!
//! ## Examples
//!
//! ```bash
//! mixtape train --data-path playlists.csv --min-sup-ratio 0.02
//! MODEL_PATH=/models/model.json mixtape serve --port 8080
//! mixtape recommend "Bohemian Rhapsody" "Imagine" --limit 10
//! ```

use crate::config::{
    default_model_path, resolve_track_columns, ConfigError, ServeConfig, TrainConfig,
    DEFAULT_HOST, DEFAULT_MIN_CONF, DEFAULT_MIN_SUP_RATIO, DEFAULT_PORT,
};
use crate::transactions::CsvColumns;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "mixtape")]
#[command(about = "Mixtape: playlist co-occurrence mining & song recommendations over HTTP")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mine association rules from a playlist dataset
    ///
    /// Reads one row per (playlist, track), mines frequent track sets with
    /// FP-Growth, derives rules above the confidence threshold and writes
    /// them atomically to the model file. A run that finds no frequent
    /// itemsets still writes a model with zero rules.
    Train(TrainArgs),

    /// Serve recommendations over HTTP
    ///
    /// The model file is checked before each request and reloaded when it
    /// is newer, so retraining does not need a restart. Stops gracefully on
    /// Ctrl+C.
    Serve(ServeArgs),

    /// Recommend songs for a set of seed songs
    ///
    /// Uses the same matching as the server: a rule fires when any of its
    /// antecedent songs is in the query, compared case-insensitively.
    Recommend {
        /// Seed songs
        #[arg(required = true, value_hint = clap::ValueHint::Other)]
        songs: Vec<String>,

        /// Model file [default: platform data directory]
        #[arg(long, env = "MODEL_PATH", value_hint = clap::ValueHint::FilePath)]
        model_path: Option<PathBuf>,

        /// Maximum number of songs to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show model metadata and a sample of its rules
    Inspect {
        /// Model file [default: platform data directory]
        #[arg(long, env = "MODEL_PATH", value_hint = clap::ValueHint::FilePath)]
        model_path: Option<PathBuf>,

        /// Number of rules to print
        #[arg(long, default_value = "10")]
        rules: usize,

        /// Print metadata as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    ///
    /// Usage: mixtape completion bash > ~/.local/share/bash-completion/completions/mixtape
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Options for `mixtape train`.
#[derive(ClapArgs, Debug, Clone)]
pub struct TrainArgs {
    /// Playlist CSV with one row per (playlist, track)
    #[arg(long, env = "DATA_PATH", value_hint = clap::ValueHint::FilePath)]
    pub data_path: PathBuf,

    /// Where to write the model [default: platform data directory]
    #[arg(long, env = "OUTPUT_PATH", value_hint = clap::ValueHint::FilePath)]
    pub output_path: Option<PathBuf>,

    /// Only read the first N playlists
    #[arg(long, env = "MAX_PLAYLISTS")]
    pub max_playlists: Option<usize>,

    /// Minimum fraction of playlists an itemset must appear in
    #[arg(long, env = "MIN_SUP_RATIO", default_value_t = DEFAULT_MIN_SUP_RATIO)]
    pub min_sup_ratio: f64,

    /// Minimum rule confidence
    #[arg(long, env = "MIN_CONF", default_value_t = DEFAULT_MIN_CONF)]
    pub min_conf: f64,

    /// Largest itemset to mine
    #[arg(long, env = "MAX_ITEMSET_LEN")]
    pub max_itemset_len: Option<usize>,

    /// Column holding the playlist identifier
    #[arg(long, env = "PLAYLIST_COLUMN", default_value = "pid")]
    pub playlist_column: String,

    /// Column holding the track identifier
    #[arg(long, env = "TRACK_COLUMN", default_value = "track_name")]
    pub track_column: String,

    /// Identify tracks by `track_uri` regardless of --track-column
    #[arg(long, env = "FORCE_TRACK_URI")]
    pub force_track_uri: bool,
}

impl TrainArgs {
    /// Resolve defaults and validate.
    ///
    /// # Errors
    ///
    /// Fails when no default output path can be determined or a threshold
    /// is out of range.
    pub fn into_config(self) -> Result<TrainConfig, ConfigError> {
        let output_path = match self.output_path {
            Some(path) => path,
            None => default_model_path()?,
        };
        let (track, track_fallback) =
            resolve_track_columns(&self.track_column, self.force_track_uri);

        let config = TrainConfig {
            data_path: self.data_path,
            output_path,
            columns: CsvColumns {
                playlist: self.playlist_column,
                track,
                track_fallback,
            },
            max_playlists: self.max_playlists,
            min_sup_ratio: self.min_sup_ratio,
            min_conf: self.min_conf,
            max_itemset_len: self.max_itemset_len,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Options for `mixtape serve`.
#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Model file to serve [default: platform data directory]
    #[arg(long, env = "MODEL_PATH", value_hint = clap::ValueHint::FilePath)]
    pub model_path: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Songs returned when a request sets no limit [default: all]
    #[arg(long, env = "RECOMMEND_LIMIT")]
    pub default_limit: Option<usize>,
}

impl ServeArgs {
    /// # Errors
    ///
    /// Fails when no default model path can be determined or the default
    /// limit is zero.
    pub fn into_config(self) -> Result<ServeConfig, ConfigError> {
        let config = ServeConfig {
            model_path: resolve_model_path(self.model_path)?,
            host: self.host,
            port: self.port,
            default_limit: self.default_limit,
        };
        config.validate()?;
        Ok(config)
    }
}

/// An explicit path, or the default one in the data directory.
///
/// # Errors
///
/// See [`default_model_path`].
pub fn resolve_model_path(path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match path {
        Some(path) => Ok(path),
        None => default_model_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_train_args() {
        let args = Args::try_parse_from([
            "mixtape",
            "train",
            "--data-path",
            "playlists.csv",
            "--output-path",
            "out/model.json",
            "--min-sup-ratio",
            "0.02",
            "--force-track-uri",
        ])
        .expect("valid train arguments");

        let Command::Train(train) = args.command else {
            panic!("expected train command");
        };
        assert!((train.min_conf - DEFAULT_MIN_CONF).abs() < f64::EPSILON);

        let config = train.into_config().unwrap();
        assert_eq!(config.output_path, PathBuf::from("out/model.json"));
        assert!((config.min_sup_ratio - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.columns.track, "track_uri");
        assert_eq!(config.columns.track_fallback, None);
    }

    #[test]
    fn test_train_args_reject_bad_threshold() {
        let args = Args::try_parse_from([
            "mixtape",
            "train",
            "--data-path",
            "playlists.csv",
            "--output-path",
            "model.json",
            "--min-conf",
            "1.5",
        ])
        .unwrap();
        let Command::Train(train) = args.command else {
            panic!("expected train command");
        };
        assert!(matches!(
            train.into_config(),
            Err(ConfigError::InvalidConfidence(_))
        ));
    }

    #[test]
    fn test_serve_defaults() {
        let args = Args::try_parse_from(["mixtape", "serve", "--model-path", "model.json"]).unwrap();
        let Command::Serve(serve) = args.command else {
            panic!("expected serve command");
        };
        let config = serve.into_config().unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:50028");
        assert_eq!(config.default_limit, None);
    }

    #[test]
    fn test_recommend_requires_songs() {
        assert!(Args::try_parse_from(["mixtape", "recommend"]).is_err());
        let args = Args::try_parse_from(["mixtape", "recommend", "a", "b", "-l", "3"]).unwrap();
        match args.command {
            Command::Recommend { songs, limit, .. } => {
                assert_eq!(songs, vec!["a", "b"]);
                assert_eq!(limit, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
