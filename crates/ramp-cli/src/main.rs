//! RAMP - leaderboard command-line interface
//!
//! The `ramp` command inspects cross-validation folds and ranks trained
//! submissions from a competition snapshot.
//!
//! ## Commands
//!
//! - `fold-id`: Print the identity of a fold from its training indices
//! - `leaderboard`: Score, ensemble and rank the submissions of a snapshot

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ramp_core::{
    execution_time_leaderboard, FoldIdentity, FoldSpec, GroundTruth, Leaderboard, RampConfig,
    ScoreKind, ScoreType, SortBy, Submission, TimeRow,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "ramp")]
#[command(author = "Stevedores Org")]
#[command(version = ramp_core::VERSION)]
#[command(about = "RAMP fold orchestrator and ensemble leaderboard", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// TOML configuration file (environment overrides still apply)
    #[arg(long, global = true, env = "RAMP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the identity of a fold given its training indices
    FoldId {
        /// Training row indices, in fold order
        #[arg(required = true)]
        indices: Vec<usize>,
    },

    /// Rank the submissions of a competition snapshot
    Leaderboard {
        /// Snapshot file (JSON) with folds, ground truth and submissions
        #[arg(long)]
        snapshot: PathBuf,

        /// Row order
        #[arg(long, value_enum, default_value_t = SortBy::Score)]
        sort: SortBy,

        /// Print the leaderboard as JSON
        #[arg(long)]
        json: bool,

        /// Also print mean fold execution times
        #[arg(long)]
        times: bool,
    },
}

/// Everything needed to rebuild a leaderboard offline.
#[derive(Debug, Serialize, Deserialize)]
struct CompetitionSnapshot {
    #[serde(default)]
    score: ScoreKind,
    folds: Vec<FoldSpec>,
    #[serde(flatten)]
    truth: GroundTruth,
    submissions: Vec<Submission>,
}

#[derive(Debug, Serialize)]
struct LeaderboardOutput {
    score: String,
    #[serde(flatten)]
    leaderboard: Leaderboard,
    #[serde(skip_serializing_if = "Option::is_none")]
    times: Option<Vec<TimeRow>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ramp_core::telemetry::init_tracing(cli.json_logs, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::FoldId { indices } => {
            println!("{}", cmd_fold_id(&indices));
            Ok(())
        }
        Commands::Leaderboard {
            snapshot,
            sort,
            json,
            times,
        } => {
            let out = cmd_leaderboard(&config, &snapshot, sort, times).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", render_leaderboard_text(&out, config.leaderboard.score_precision));
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RampConfig> {
    match path {
        Some(path) => RampConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = RampConfig::default();
            config
                .apply_env()
                .context("Invalid RAMP_* environment override")?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn cmd_fold_id(indices: &[usize]) -> String {
    FoldIdentity::from_indices(indices).to_hex()
}

fn read_snapshot(path: &Path) -> Result<CompetitionSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    let snapshot: CompetitionSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Invalid snapshot JSON in {}", path.display()))?;

    let n_train = snapshot.truth.y_train.n_samples();
    for (i, fold) in snapshot.folds.iter().enumerate() {
        if let Some(max) = fold.max_index() {
            if max >= n_train {
                bail!("fold {i} addresses row {max} but y_train has {n_train} rows");
            }
        }
    }
    for s in &snapshot.submissions {
        if let Some(f) = s.on_folds.iter().find(|f| f.fold_index >= snapshot.folds.len()) {
            bail!(
                "submission {}/{} has a record for fold {} of {}",
                s.team,
                s.name,
                f.fold_index,
                snapshot.folds.len()
            );
        }
    }
    Ok(snapshot)
}

async fn cmd_leaderboard(
    config: &RampConfig,
    path: &Path,
    sort: SortBy,
    with_times: bool,
) -> Result<LeaderboardOutput> {
    let mut snapshot = read_snapshot(path)?;
    let score_type = snapshot.score.build();
    info!(
        submissions = snapshot.submissions.len(),
        folds = snapshot.folds.len(),
        score = score_type.name(),
        "building leaderboard"
    );

    let mut leaderboard = Leaderboard::build(
        &mut snapshot.submissions,
        &snapshot.folds,
        &snapshot.truth,
        score_type.clone(),
        &config.leaderboard_config(),
    )
    .await
    .context("Failed to build leaderboard")?;
    leaderboard.sort_by(sort, score_type.as_ref());

    Ok(LeaderboardOutput {
        score: score_type.name().to_string(),
        leaderboard,
        times: with_times.then(|| execution_time_leaderboard(&snapshot.submissions)),
    })
}

fn fmt_score(value: f64, precision: usize) -> String {
    if value >= f64::MAX {
        "-".to_string()
    } else {
        format!("{value:.precision$}")
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| fmt_score(v, precision))
}

fn render_leaderboard_text(out: &LeaderboardOutput, precision: usize) -> String {
    let board = &out.leaderboard;
    let title = format!("Leaderboard ({}, {} submissions)", out.score, board.rows.len());
    let mut text = format!("{title}\n{}\n", "=".repeat(title.len()));
    text.push_str(&format!(
        "{:>3}  {:<28} {:<16} {:>10} {:>10} {:>8} {:>4}\n",
        "#", "submission", "state", "valid", "test", "contrib", "sel"
    ));
    for (rank, row) in board.rows.iter().enumerate() {
        text.push_str(&format!(
            "{:>3}  {:<28} {:<16} {:>10} {:>10} {:>8.3} {:>4}\n",
            rank + 1,
            truncate(&format!("{}/{}", row.team, row.name), 28),
            row.state.as_str(),
            fmt_score(row.valid_score, precision),
            fmt_score(row.test_score, precision),
            row.contributivity,
            row.selection_count,
        ));
    }

    text.push_str(&format!(
        "\nbest_valid_score: {}\ncombined_valid_score: {}\ncombined_test_score: {}\nfoldwise_best_test_score: {}\n",
        fmt_opt(board.best_valid_score, precision),
        fmt_opt(board.combined_valid_score, precision),
        fmt_opt(board.combined_test_score, precision),
        fmt_opt(board.foldwise_best_test_score, precision),
    ));

    if let Some(times) = &out.times {
        text.push_str(&format!(
            "\n{:<28} {:>10} {:>10} {:>10}\n",
            "submission", "train_s", "valid_s", "test_s"
        ));
        for t in times {
            text.push_str(&format!(
                "{:<28} {:>10.3} {:>10.3} {:>10.3}\n",
                truncate(&format!("{}/{}", t.team, t.name), 28),
                t.train_time,
                t.valid_time,
                t.test_time,
            ));
        }
    }

    text.trim_end().to_string()
}

/// Truncate a string for display
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
