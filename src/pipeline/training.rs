//! Training orchestration
//!
//! Runs preprocess → partition → per-partition champion selection → register,
//! tracking progress as a [`TrainingState`]. A failing partition does not stop
//! its siblings; the run ends `Failed` and the report lists both sides.

use crate::config::PipelineConfig;
use crate::data::Dataset;
use crate::error::{FarecastError, Result};
use crate::partition::Partitioner;
use crate::preprocessing::FeaturePreprocessor;
use crate::registry::{FittedModel, ModelRegistry};
use crate::selection::{CandidateFailure, ChampionSelector, Roster, ScoreTable};
use crate::training::{train_test_split, RegressionMetrics};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingState {
    Preprocessing,
    Partitioning,
    PerPartitionTraining,
    /// Every partition has a stored champion
    Registered,
    Failed,
}

/// Champion of one partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub champion: String,
    pub score: f64,
    pub metrics: RegressionMetrics,
    pub train_rows: usize,
    pub test_rows: usize,
    pub scores: ScoreTable,
    pub failures: Vec<CandidateFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub partition: usize,
    pub rows: usize,
    /// Champion summary, or the reason the partition failed
    pub result: std::result::Result<PartitionSummary, String>,
}

impl PartitionOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub status: TrainingState,
    pub k: usize,
    pub n_rows: usize,
    pub duplicates_dropped: usize,
    /// Ascending by partition
    pub partitions: Vec<PartitionOutcome>,
    pub elapsed: Duration,
}

impl TrainingReport {
    pub fn succeeded(&self) -> BTreeSet<usize> {
        self.partitions
            .iter()
            .filter(|p| p.is_success())
            .map(|p| p.partition)
            .collect()
    }

    pub fn failed(&self) -> BTreeSet<usize> {
        self.partitions
            .iter()
            .filter(|p| !p.is_success())
            .map(|p| p.partition)
            .collect()
    }

    pub fn outcome(&self, partition: usize) -> Option<&PartitionOutcome> {
        self.partitions.iter().find(|p| p.partition == partition)
    }
}

/// Drives one training run against a registry
pub struct TrainingOrchestrator<'a> {
    config: PipelineConfig,
    registry: &'a ModelRegistry,
    roster: Roster,
    partitioner: Partitioner,
    selector: ChampionSelector,
    state: TrainingState,
}

impl<'a> TrainingOrchestrator<'a> {
    pub fn new(config: PipelineConfig, registry: &'a ModelRegistry) -> Result<Self> {
        config.validate()?;
        let roster = config.roster()?;
        let partitioner = Partitioner::new(config.partitioner.clone());
        let selector = ChampionSelector::new(config.tuner.clone(), config.selection.clone());
        Ok(Self {
            config,
            registry,
            roster,
            partitioner,
            selector,
            state: TrainingState::Preprocessing,
        })
    }

    /// Replace the roster built from the configured candidate names
    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    /// Replace the partitioner, e.g. to plug a different elbow detector
    pub fn with_partitioner(mut self, partitioner: Partitioner) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn enter(&mut self, state: TrainingState) {
        info!(from = ?self.state, to = ?state, "training state");
        self.state = state;
    }

    fn fail(&mut self, e: FarecastError) -> FarecastError {
        error!(state = ?self.state, error = %e, "training aborted");
        self.state = TrainingState::Failed;
        e
    }

    /// Run the full pipeline; stage errors before per-partition training abort the run
    pub fn run(&mut self, dataset: &Dataset) -> Result<TrainingReport> {
        let start = Instant::now();
        self.state = TrainingState::Preprocessing;

        let (x, y, duplicates_dropped) = match self.preprocess(dataset) {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e)),
        };

        self.enter(TrainingState::Partitioning);
        let (k, labels) = match self.partition(&x) {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e)),
        };

        self.enter(TrainingState::PerPartitionTraining);
        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (row, &label) in labels.iter().enumerate() {
            groups[label].push(row);
        }

        let partitions: Vec<PartitionOutcome> = if self.config.parallel_partitions {
            groups
                .par_iter()
                .enumerate()
                .map(|(p, rows)| self.train_partition(p, rows, &x, &y))
                .collect()
        } else {
            groups
                .iter()
                .enumerate()
                .map(|(p, rows)| self.train_partition(p, rows, &x, &y))
                .collect()
        };

        let report = TrainingReport {
            status: if partitions.iter().all(PartitionOutcome::is_success) {
                TrainingState::Registered
            } else {
                TrainingState::Failed
            },
            k,
            n_rows: x.nrows(),
            duplicates_dropped,
            partitions,
            elapsed: start.elapsed(),
        };
        self.enter(report.status);

        info!(
            status = ?report.status,
            k,
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "training finished"
        );
        Ok(report)
    }

    fn preprocess(&self, dataset: &Dataset) -> Result<(Array2<f64>, Array1<f64>, usize)> {
        let (data, dropped) = if self.config.preprocessing.drop_duplicates {
            dataset.drop_duplicates()?
        } else {
            (dataset.clone(), 0)
        };
        if dropped > 0 {
            info!(dropped, "duplicate rows removed");
        }
        if data.is_empty() {
            return Err(FarecastError::PreprocessingError("training data has no rows".to_string()));
        }

        let mut preprocessor = FeaturePreprocessor::with_config(self.config.preprocessing.clone());
        let x = preprocessor
            .fit_transform(&data.features)
            .map_err(|e| FarecastError::PreprocessingError(e.to_string()))?;
        info!(
            rows = x.nrows(),
            inputs = data.features.n_cols(),
            features = x.ncols(),
            "preprocessor fitted"
        );

        self.registry.purge()?;
        self.registry.save_preprocessor(&preprocessor)?;
        Ok((x, data.target, dropped))
    }

    fn partition(&self, x: &Array2<f64>) -> Result<(usize, Vec<usize>)> {
        let k = self.partitioner.resolve_k(x)?;
        let (model, labels) = self.partitioner.assign(x, k)?;
        self.registry.save_partitioner(&model)?;
        Ok((k, labels))
    }

    fn train_partition(&self, partition: usize, rows: &[usize], x: &Array2<f64>, y: &Array1<f64>) -> PartitionOutcome {
        let result = self.select_for_partition(partition, rows, x, y).map_err(|e| {
            warn!(partition, rows = rows.len(), error = %e, "partition failed");
            e.to_string()
        });
        PartitionOutcome {
            partition,
            rows: rows.len(),
            result,
        }
    }

    fn select_for_partition(
        &self,
        partition: usize,
        rows: &[usize],
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Result<PartitionSummary> {
        let x_part = x.select(Axis(0), rows);
        let y_part = y.select(Axis(0), rows);

        let split = train_test_split(rows.len(), self.config.split.test_ratio, self.config.split.seed)?;
        let x_train = x_part.select(Axis(0), &split.train_indices);
        let y_train = y_part.select(Axis(0), &split.train_indices);
        let x_test = x_part.select(Axis(0), &split.test_indices);
        let y_test = y_part.select(Axis(0), &split.test_indices);

        info!(partition, train = x_train.nrows(), test = x_test.nrows(), "selecting champion");
        let champion = self
            .selector
            .select_best(&self.roster, &x_train, &x_test, &y_train, &y_test)?;

        let fitted = FittedModel::predictor(partition, champion.name.clone(), champion.model)
            .with_hyperparameters(champion.params)
            .with_scores(champion.cv_score, Some(champion.score));
        self.registry.save_predictor(partition, &fitted)?;
        info!(partition, champion = %champion.name, score = champion.score, "partition registered");

        Ok(PartitionSummary {
            champion: champion.name,
            score: champion.score,
            metrics: champion.metrics,
            train_rows: x_train.nrows(),
            test_rows: x_test.nrows(),
            scores: champion.scores,
            failures: champion.failures,
        })
    }
}
