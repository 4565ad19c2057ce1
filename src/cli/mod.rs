//! Farecast CLI Module
//!
//! Command-line interface for training, prediction, and registry inspection.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{PipelineConfig, UnknownPartitionPolicy};
use crate::data::{load_dataset, load_features, write_predictions};
use crate::pipeline::{InferenceOrchestrator, RowOutcome, TrainingOrchestrator, TrainingState};
use crate::registry::{ArtifactRole, ModelRegistry};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn bad(s: &str) -> ColoredString    { s.truecolor(235, 110, 110) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn fmt_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{:.4}", s))
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "farecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-segment fare regression: cluster, select a champion per cluster, route at inference")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train one champion per partition and register the artifacts
    Train {
        /// Training data (CSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Target column name
        #[arg(short, long)]
        target: String,

        /// Registry directory (overrides the config file)
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Force the number of partitions instead of detecting the elbow
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Predict with the registered models
    Predict {
        /// Rows to score (CSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Registry directory (overrides the config file)
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output predictions file (CSV); printed when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Policy for partitions without a predictor (fail, largest); overrides the config file
        #[arg(long, value_parser = parse_policy)]
        fallback: Option<UnknownPartitionPolicy>,
    },

    /// List the artifacts in a registry
    Inspect {
        /// Registry directory
        #[arg(short, long, default_value = "registry")]
        registry: PathBuf,
    },
}

fn parse_policy(s: &str) -> Result<UnknownPartitionPolicy, String> {
    s.parse::<UnknownPartitionPolicy>().map_err(|e| e.to_string())
}

/// Registry directory and routing policy for `predict`: flags win over the
/// config file, which wins over the defaults
pub fn resolve_predict_settings(
    config_path: Option<&Path>,
    registry_dir: Option<&Path>,
    fallback: Option<UnknownPartitionPolicy>,
) -> anyhow::Result<(PathBuf, UnknownPartitionPolicy)> {
    let config = match config_path {
        Some(p) => PipelineConfig::from_file(p)?,
        None => PipelineConfig::default(),
    };
    let dir = registry_dir.map(Path::to_path_buf).unwrap_or(config.registry_dir);
    Ok((dir, fallback.unwrap_or(config.unknown_partition)))
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(
    data_path: &Path,
    target: &str,
    registry_dir: Option<&Path>,
    config_path: Option<&Path>,
    k: Option<usize>,
) -> anyhow::Result<()> {
    section("Train");

    let mut config = match config_path {
        Some(p) => PipelineConfig::from_file(p)?,
        None => PipelineConfig::default(),
    };
    if k.is_some() {
        config = config.with_forced_k(k);
    }
    if let Some(dir) = registry_dir {
        config = config.with_registry_dir(dir);
    }
    config.validate()?;

    step_run("Loading data");
    let start = Instant::now();
    let dataset = load_dataset(data_path, target)?;
    step_done(&format!("{} rows × {} cols in {:?}", dataset.len(), dataset.features.n_cols(), start.elapsed()));

    let registry = ModelRegistry::open(&config.registry_dir)?;
    step_ok(&format!("Registry {}", config.registry_dir.display()));

    step_run(&format!("Training candidates {}", config.candidates.join(", ").cyan()));
    let report = TrainingOrchestrator::new(config, &registry)?.run(&dataset)?;
    step_done(&format!("{:?}", report.elapsed));

    println!();
    line_box_top();
    line_box(&kv("Status  ", &format!("{:?}", report.status)));
    line_box(&kv("Rows    ", &format!("{} ({} duplicates dropped)", report.n_rows, report.duplicates_dropped)));
    line_box(&kv("k       ", &report.k.to_string()));
    line_box_sep();
    for p in &report.partitions {
        match &p.result {
            Ok(s) => line_box(&format!(
                "{} {:<3} {:>6} rows  {:<14} {}",
                ok("✓"),
                p.partition,
                p.rows,
                s.champion,
                format!("{:.4}", s.score).white().bold()
            )),
            Err(e) => {
                let mut reason: String = e.chars().take(30).collect();
                if e.chars().count() > 30 {
                    reason.push('…');
                }
                line_box(&format!("{} {:<3} {:>6} rows  {}", bad("✗"), p.partition, p.rows, bad(&reason)))
            }
        }
    }
    line_box_bottom();
    println!();

    if report.status == TrainingState::Failed {
        for p in report.partitions.iter().filter(|p| !p.is_success()) {
            if let Err(e) = &p.result {
                println!("  {} partition {}: {}", bad("✗"), p.partition, e);
            }
        }
        anyhow::bail!("{} of {} partitions failed", report.failed().len(), report.k);
    }
    Ok(())
}

pub fn cmd_predict(
    data_path: &Path,
    registry_dir: Option<&Path>,
    config_path: Option<&Path>,
    output: Option<&Path>,
    fallback: Option<UnknownPartitionPolicy>,
) -> anyhow::Result<()> {
    section("Predict");

    let (registry_dir, policy) = resolve_predict_settings(config_path, registry_dir, fallback)?;
    let registry = ModelRegistry::open(&registry_dir)?;
    let orchestrator = InferenceOrchestrator::open(&registry, policy)?;
    step_ok(&format!(
        "Loaded {} partitions from {} ({:?} on unknown partitions)",
        orchestrator.partition_model().k(),
        registry_dir.display(),
        policy
    ));

    step_run("Loading data");
    let features = load_features(data_path)?;
    step_done(&format!("{} rows", features.n_rows()));

    step_run("Predicting");
    let start = Instant::now();
    let predictions = orchestrator.predict(&features)?;
    step_done(&format!("{:?}", start.elapsed()));

    match output {
        Some(path) => {
            write_predictions(path, &predictions)?;
            step_ok(&format!("Saved → {}", path.display()));
        }
        None => {
            println!();
            for p in predictions.iter().take(20) {
                match &p.outcome {
                    RowOutcome::Predicted { value, model, routed_to } => println!(
                        "  {:>6}  {:>12.2}  {} {}",
                        p.row_index,
                        value,
                        muted(&format!("p{}", routed_to)),
                        dim(model)
                    ),
                    RowOutcome::Unroutable(f) => println!("  {:>6}  {}", p.row_index, bad(&f.to_string())),
                }
            }
            if predictions.len() > 20 {
                println!("  {}", dim(&format!("… {} more rows", predictions.len() - 20)));
            }
        }
    }

    let failed = predictions.n_failed();
    println!();
    if failed > 0 {
        println!("  {} {} of {} rows could not be scored", bad("!"), failed, predictions.len());
    }
    Ok(())
}

pub fn cmd_inspect(registry_dir: &Path) -> anyhow::Result<()> {
    section("Registry");

    let registry = ModelRegistry::open(registry_dir)?;
    let entries = registry.entries();
    if entries.is_empty() {
        println!("  {}", dim("empty"));
        println!();
        return Ok(());
    }

    line_box_top();
    for entry in &entries {
        let detail = match (&entry.role, &entry.metadata) {
            (ArtifactRole::Predictor, Some(m)) => format!(
                "{:<14} cv {}  holdout {}",
                m.candidate,
                fmt_score(m.cv_score),
                fmt_score(m.holdout_score)
            ),
            _ => entry.file.clone(),
        };
        line_box(&format!("{:<14} {}", accent(&entry.key), detail));
    }
    line_box_sep();
    if let Some(saved) = entries.iter().map(|e| e.saved_at).max() {
        line_box(&kv("Saved", &saved.format("%Y-%m-%d %H:%M:%S UTC").to_string()));
    }
    line_box_bottom();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        let colored = ok("done").to_string();
        assert_eq!(strip_ansi(&colored), "done");
    }

    #[test]
    fn test_parse_train() {
        let cli = Cli::parse_from(["farecast", "train", "--data", "f.csv", "--target", "Price", "--k", "3"]);
        match cli.command {
            Commands::Train { target, k, registry, .. } => {
                assert_eq!(target, "Price");
                assert_eq!(k, Some(3));
                assert!(registry.is_none());
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_parse_predict_defaults() {
        let cli = Cli::parse_from(["farecast", "predict", "--data", "f.csv"]);
        match cli.command {
            Commands::Predict { registry, fallback, output, config, .. } => {
                assert!(registry.is_none());
                assert!(config.is_none());
                assert!(fallback.is_none());
                assert!(output.is_none());
            }
            _ => panic!("expected predict"),
        }
    }

    #[test]
    fn test_parse_predict_fallback() {
        let cli = Cli::parse_from(["farecast", "predict", "--data", "f.csv", "--fallback", "largest"]);
        match cli.command {
            Commands::Predict { fallback, .. } => {
                assert_eq!(fallback, Some(UnknownPartitionPolicy::LargestPartition));
            }
            _ => panic!("expected predict"),
        }

        let bad = Cli::try_parse_from(["farecast", "predict", "--data", "f.csv", "--fallback", "nearest"]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_predict_policy_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        PipelineConfig::new()
            .with_unknown_partition(UnknownPartitionPolicy::LargestPartition)
            .with_registry_dir(dir.path().join("models"))
            .save(&path)
            .unwrap();

        let (registry, policy) = resolve_predict_settings(Some(&path), None, None).unwrap();
        assert_eq!(policy, UnknownPartitionPolicy::LargestPartition);
        assert_eq!(registry, dir.path().join("models"));

        let (registry, policy) =
            resolve_predict_settings(Some(&path), Some(Path::new("elsewhere")), Some(UnknownPartitionPolicy::Fail))
                .unwrap();
        assert_eq!(policy, UnknownPartitionPolicy::Fail);
        assert_eq!(registry, PathBuf::from("elsewhere"));

        let (registry, policy) = resolve_predict_settings(None, None, None).unwrap();
        assert_eq!(policy, UnknownPartitionPolicy::Fail);
        assert_eq!(registry, PathBuf::from("registry"));
    }
}
