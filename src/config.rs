//! Pipeline configuration
//!
//! [`PipelineConfig`] gathers every knob of a training or inference run. It
//! round-trips through JSON so a run can be reproduced from a file.

use crate::error::{FarecastError, Result};
use crate::partition::PartitionerConfig;
use crate::optimizer::{SearchStrategy, TunerConfig};
use crate::preprocessing::PreprocessingConfig;
use crate::selection::{Roster, SelectionConfig};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What inference does with a row whose partition has no predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPartitionPolicy {
    /// Mark the row as unroutable
    #[default]
    Fail,
    /// Route to the registered partition with the most training rows
    LargestPartition,
}

impl FromStr for UnknownPartitionPolicy {
    type Err = FarecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "largest" | "largest_partition" => Ok(Self::LargestPartition),
            other => Err(FarecastError::ConfigError(format!(
                "unknown partition policy '{}', expected 'fail' or 'largest'",
                other
            ))),
        }
    }
}

/// Per-partition train/test split
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of each partition held out for scoring
    pub test_ratio: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 348_724,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocessing: PreprocessingConfig,
    pub partitioner: PartitionerConfig,
    pub tuner: TunerConfig,
    pub selection: SelectionConfig,
    pub split: SplitConfig,
    /// Roster entries by name
    pub candidates: Vec<String>,
    /// Train partitions concurrently
    pub parallel_partitions: bool,
    pub unknown_partition: UnknownPartitionPolicy,
    pub registry_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preprocessing: PreprocessingConfig::default(),
            partitioner: PartitionerConfig::default(),
            tuner: TunerConfig::default(),
            selection: SelectionConfig::default(),
            split: SplitConfig::default(),
            candidates: ["ridge", "svr", "random_forest", "xgboost"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            parallel_partitions: true,
            unknown_partition: UnknownPartitionPolicy::default(),
            registry_dir: PathBuf::from("registry"),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            FarecastError::ConfigError(format!("cannot open {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            FarecastError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn with_preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    pub fn with_partitioner(mut self, partitioner: PartitionerConfig) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn with_tuner(mut self, tuner: TunerConfig) -> Self {
        self.tuner = tuner;
        self
    }

    pub fn with_selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_split(mut self, test_ratio: f64, seed: u64) -> Self {
        self.split = SplitConfig { test_ratio, seed };
        self
    }

    pub fn with_candidates(mut self, names: &[&str]) -> Self {
        self.candidates = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_parallel_partitions(mut self, parallel: bool) -> Self {
        self.parallel_partitions = parallel;
        self
    }

    pub fn with_unknown_partition(mut self, policy: UnknownPartitionPolicy) -> Self {
        self.unknown_partition = policy;
        self
    }

    pub fn with_registry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.registry_dir = dir.into();
        self
    }

    /// Force the partition count, bypassing elbow detection
    pub fn with_forced_k(mut self, k: Option<usize>) -> Self {
        self.partitioner.forced_k = k;
        self
    }

    /// Build the candidate roster named by `candidates`
    pub fn roster(&self) -> Result<Roster> {
        let names: Vec<&str> = self.candidates.iter().map(String::as_str).collect();
        Roster::from_names(&names)
    }

    pub fn validate(&self) -> Result<()> {
        self.partitioner.validate()?;

        if self.tuner.cv_folds < 2 {
            return Err(FarecastError::ConfigError(format!(
                "cv_folds must be at least 2, got {}",
                self.tuner.cv_folds
            )));
        }
        if let SearchStrategy::Random { n_iter: 0 } = self.tuner.strategy {
            return Err(FarecastError::ConfigError(
                "random search needs n_iter > 0".to_string(),
            ));
        }
        if !(self.split.test_ratio > 0.0 && self.split.test_ratio < 1.0) {
            return Err(FarecastError::ConfigError(format!(
                "test_ratio must be in (0, 1), got {}",
                self.split.test_ratio
            )));
        }
        let stacking = &self.selection.stacking;
        if stacking.enabled && stacking.n_folds < 2 {
            return Err(FarecastError::ConfigError(format!(
                "stacking needs at least 2 folds, got {}",
                stacking.n_folds
            )));
        }
        if self.candidates.is_empty() {
            return Err(FarecastError::ConfigError("no candidates configured".to_string()));
        }
        self.roster()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.split.test_ratio, 0.2);
        assert_eq!(config.unknown_partition, UnknownPartitionPolicy::Fail);
        assert!(config.parallel_partitions);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PipelineConfig::new().with_split(1.0, 1).validate().is_err());
        assert!(PipelineConfig::new().with_candidates(&[]).validate().is_err());
        assert!(PipelineConfig::new().with_candidates(&["lasso"]).validate().is_err());
        assert!(PipelineConfig::new()
            .with_tuner(TunerConfig::new().with_cv_folds(1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_file_roundtrip_and_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = PipelineConfig::new()
            .with_forced_k(Some(3))
            .with_unknown_partition(UnknownPartitionPolicy::LargestPartition);
        config.save(&path).unwrap();
        let back = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(back.partitioner.forced_k, Some(3));
        assert_eq!(back.unknown_partition, UnknownPartitionPolicy::LargestPartition);

        let partial = dir.path().join("partial.json");
        std::fs::write(&partial, r#"{"parallel_partitions": false}"#).unwrap();
        let back = PipelineConfig::from_file(&partial).unwrap();
        assert!(!back.parallel_partitions);
        assert_eq!(back.candidates.len(), 4);
    }

    #[test]
    fn test_partial_nested_sections_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested.json");
        std::fs::write(
            &path,
            r#"{"partitioner": {"min_k": 3}, "tuner": {"cv_folds": 4}, "selection": {"stacking": {"enabled": false}}, "split": {"seed": 7}}"#,
        )
        .unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.partitioner.min_k, 3);
        assert_eq!(config.partitioner.max_k, 10);
        assert_eq!(config.tuner.cv_folds, 4);
        assert_eq!(config.tuner.seed, 42);
        assert!(!config.selection.stacking.enabled);
        assert_eq!(config.selection.stacking.n_folds, 5);
        assert_eq!(config.selection.priority[0], "stacking");
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.split.test_ratio, 0.2);

        std::fs::write(&path, r#"{"preprocessing": {}}"#).unwrap();
        PipelineConfig::from_file(&path).unwrap();
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("largest".parse::<UnknownPartitionPolicy>().unwrap(), UnknownPartitionPolicy::LargestPartition);
        assert_eq!("FAIL".parse::<UnknownPartitionPolicy>().unwrap(), UnknownPartitionPolicy::Fail);
        assert!("nearest".parse::<UnknownPartitionPolicy>().is_err());
    }
}
