//! # Mixtape
//!
//! Entry point: parses the command line and dispatches to the library.
//! Logging is controlled with `RUST_LOG`:
//! - `RUST_LOG=info mixtape train ...` - Training progress and statistics
//! - `RUST_LOG=mixtape::store=debug mixtape serve` - Model reload decisions

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::info;
use mixtape::artifact::{ArtifactFormat, ModelArtifact};
use mixtape::cli::{self, resolve_model_path};
use mixtape::completion;
use mixtape::matcher::Recommendation;
use mixtape::server;
use mixtape::store::ModelStore;
use mixtape::train;
use std::path::Path;

/// Main entry point for the Mixtape application.
///
/// Initializes logging, parses command-line arguments, and routes commands
/// to the appropriate module functions. Library errors are wrapped with
/// `anyhow` context so the operator sees what was being attempted.
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Train(train_args) => {
            let config = train_args
                .into_config()
                .context("Invalid training configuration")?;
            let report = train::run(&config).with_context(|| {
                format!("Training failed for {}", config.data_path.display())
            })?;
            println!(
                "Wrote {} rules from {} playlists to {}",
                report.rules,
                report.playlists,
                report.output_path.display()
            );
        }
        cli::Command::Serve(serve_args) => {
            let config = serve_args
                .into_config()
                .context("Invalid server configuration")?;
            info!("Serving model from {}", config.model_path.display());
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(server::run_server(config))?;
        }
        cli::Command::Recommend {
            songs,
            model_path,
            limit,
        } => {
            let path = resolve_model_path(model_path)?;
            recommend(&path, &songs, limit)?;
        }
        cli::Command::Inspect {
            model_path,
            rules,
            json,
        } => {
            let path = resolve_model_path(model_path)?;
            inspect(&path, rules, json)?;
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
    }

    Ok(())
}

fn recommend(path: &Path, songs: &[String], limit: Option<usize>) -> Result<()> {
    let model = ModelStore::new(path).current()?;

    match model.recommend(songs, limit) {
        Recommendation::NoRecommendation => {
            println!("No recommendation for the given songs");
        }
        Recommendation::Tracks { tracks, matched_rules } => {
            println!("{} songs from {matched_rules} rules:", tracks.len());
            for track in tracks {
                println!(
                    "  {:.3}  {} ({} rules)",
                    track.confidence, track.track, track.rule_count
                );
            }
        }
    }
    Ok(())
}

fn inspect(path: &Path, rules: usize, json: bool) -> Result<()> {
    let loaded = ModelArtifact::load(path)
        .with_context(|| format!("Failed to inspect model {}", path.display()))?;
    let artifact = &loaded.artifact;
    let metadata = artifact.metadata();
    let format = match loaded.format {
        ArtifactFormat::Versioned => "versioned",
        ArtifactFormat::Legacy => "legacy",
    };

    if json {
        let summary = serde_json::json!({
            "path": path.display().to_string(),
            "format": format,
            "rules": artifact.rules().len(),
            "skipped_rules": loaded.skipped.len(),
            "metadata": metadata,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let show = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    println!("Model:          {} ({format})", path.display());
    println!("Created:        {}", show(metadata.created_at.map(|t| t.to_rfc3339())));
    println!("Data:           {}", show(metadata.data_path.clone()));
    println!("Playlists:      {}", show(metadata.num_playlists.map(|n| n.to_string())));
    println!("Min support:    {}", show(metadata.min_sup_ratio.map(|s| s.to_string())));
    println!("Min confidence: {}", show(metadata.min_conf.map(|c| c.to_string())));
    println!("Max itemset:    {}", show(metadata.max_itemset_len.map(|n| n.to_string())));
    println!("Rules:          {}", artifact.rules().len());
    if !loaded.skipped.is_empty() {
        println!("Skipped:        {} malformed records", loaded.skipped.len());
    }

    for rule in artifact.rules().iter().take(rules) {
        println!("  {rule}");
    }
    Ok(())
}
