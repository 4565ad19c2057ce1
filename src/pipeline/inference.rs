//! Inference routing
//!
//! Rows are transformed with the fitted preprocessor, assigned to their
//! nearest partition and scored by that partition's registered predictor.
//! Missing or damaged predictors only affect the rows routed to them.

use crate::config::UnknownPartitionPolicy;
use crate::data::FeatureMatrix;
use crate::error::{FarecastError, Result};
use crate::partition::PartitionModel;
use crate::preprocessing::FeaturePreprocessor;
use crate::registry::{FittedModel, ModelRegistry, RegistryKey};
use ndarray::{Array2, Axis};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Why a row got no prediction
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingFailure {
    /// The row's partition has no registered predictor
    UnknownPartition(usize),
    ModelNotFound(String),
    CorruptArtifact(String),
    PredictionFailed(String),
}

impl fmt::Display for RoutingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingFailure::UnknownPartition(p) => write!(f, "Unknown partition: {}", p),
            RoutingFailure::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            RoutingFailure::CorruptArtifact(m) => write!(f, "Corrupt artifact: {}", m),
            RoutingFailure::PredictionFailed(m) => write!(f, "Prediction failed: {}", m),
        }
    }
}

impl From<FarecastError> for RoutingFailure {
    fn from(e: FarecastError) -> Self {
        match e {
            FarecastError::UnknownPartition(p) => RoutingFailure::UnknownPartition(p),
            FarecastError::ModelNotFound(m) => RoutingFailure::ModelNotFound(m),
            FarecastError::CorruptArtifact { key, reason } => {
                RoutingFailure::CorruptArtifact(format!("{}: {}", key, reason))
            }
            other => RoutingFailure::PredictionFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Predicted {
        value: f64,
        /// Candidate name of the predictor used
        model: String,
        /// Partition whose predictor produced the value
        routed_to: usize,
    },
    Unroutable(RoutingFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowPrediction {
    pub row_index: usize,
    /// Partition the row was assigned to, if assignment succeeded
    pub partition: Option<usize>,
    pub outcome: RowOutcome,
}

impl RowPrediction {
    pub fn value(&self) -> Option<f64> {
        match self.outcome {
            RowOutcome::Predicted { value, .. } => Some(value),
            RowOutcome::Unroutable(_) => None,
        }
    }
}

/// Per-row results in input order
#[derive(Debug, Clone, Default)]
pub struct PredictionSet {
    pub predictions: Vec<RowPrediction>,
}

impl PredictionSet {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RowPrediction> {
        self.predictions.iter()
    }

    pub fn get(&self, row_index: usize) -> Option<&RowPrediction> {
        self.predictions.get(row_index)
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.predictions.iter().map(RowPrediction::value).collect()
    }

    pub fn n_failed(&self) -> usize {
        self.predictions.iter().filter(|p| p.value().is_none()).count()
    }
}

/// Routes rows to the registered predictors
pub struct InferenceOrchestrator<'a> {
    registry: &'a ModelRegistry,
    preprocessor: FeaturePreprocessor,
    partitions: PartitionModel,
    policy: UnknownPartitionPolicy,
}

impl<'a> InferenceOrchestrator<'a> {
    /// Load the preprocessor and partitioner once
    pub fn open(registry: &'a ModelRegistry, policy: UnknownPartitionPolicy) -> Result<Self> {
        let preprocessor = registry.load_preprocessor()?;
        let partitions = registry.load_partitioner()?;
        info!(
            k = partitions.k(),
            predictors = registry.predictor_partitions().len(),
            policy = ?policy,
            "inference ready"
        );
        Ok(Self {
            registry,
            preprocessor,
            partitions,
            policy,
        })
    }

    pub fn partition_model(&self) -> &PartitionModel {
        &self.partitions
    }

    pub fn policy(&self) -> UnknownPartitionPolicy {
        self.policy
    }

    /// Registered partition with the most training rows; lowest label on ties
    fn largest_registered(&self) -> Option<usize> {
        let sizes = self.partitions.partition_sizes();
        self.registry
            .predictor_partitions()
            .into_iter()
            .filter(|&p| p < sizes.len())
            .fold(None, |best: Option<usize>, p| match best {
                Some(b) if sizes[b] >= sizes[p] => Some(b),
                _ => Some(p),
            })
    }

    fn route(&self, label: usize) -> std::result::Result<usize, RoutingFailure> {
        if self.registry.contains(RegistryKey::Predictor(label)) {
            return Ok(label);
        }
        match self.policy {
            UnknownPartitionPolicy::Fail => Err(RoutingFailure::UnknownPartition(label)),
            UnknownPartitionPolicy::LargestPartition => match self.largest_registered() {
                Some(target) => {
                    warn!(partition = label, routed_to = target, "no predictor, using largest partition");
                    Ok(target)
                }
                None => Err(RoutingFailure::UnknownPartition(label)),
            },
        }
    }

    /// Predict every row; failures are recorded per row
    pub fn predict(&self, raw: &FeatureMatrix) -> Result<PredictionSet> {
        let x = self.preprocessor.transform(raw)?;
        let n = x.nrows();

        let mut outcomes: Vec<Option<RowPrediction>> = vec![None; n];
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            match self.partitions.predict_partition(&row) {
                Ok(label) => groups.entry(label).or_default().push(i),
                Err(e) => {
                    outcomes[i] = Some(RowPrediction {
                        row_index: i,
                        partition: None,
                        outcome: RowOutcome::Unroutable(e.into()),
                    })
                }
            }
        }

        let mut loaded: HashMap<usize, std::result::Result<FittedModel, RoutingFailure>> = HashMap::new();
        for (label, rows) in &groups {
            let results = self.predict_group(*label, rows, &x, &mut loaded);
            for (&i, outcome) in rows.iter().zip(results) {
                outcomes[i] = Some(RowPrediction {
                    row_index: i,
                    partition: Some(*label),
                    outcome,
                });
            }
        }

        let predictions: Vec<RowPrediction> = outcomes.into_iter().flatten().collect();
        let set = PredictionSet { predictions };
        info!(rows = n, failed = set.n_failed(), partitions = groups.len(), "predictions complete");
        Ok(set)
    }

    fn predict_group(
        &self,
        label: usize,
        rows: &[usize],
        x: &Array2<f64>,
        loaded: &mut HashMap<usize, std::result::Result<FittedModel, RoutingFailure>>,
    ) -> Vec<RowOutcome> {
        let fail_all = |f: RoutingFailure| vec![RowOutcome::Unroutable(f); rows.len()];

        let target = match self.route(label) {
            Ok(t) => t,
            Err(f) => {
                warn!(partition = label, rows = rows.len(), "rows unroutable");
                return fail_all(f);
            }
        };
        let model = loaded
            .entry(target)
            .or_insert_with(|| self.registry.load_predictor(target).map_err(RoutingFailure::from));
        let fitted = match model {
            Ok(m) => m,
            Err(f) => {
                warn!(partition = target, error = %f, "predictor unavailable");
                return fail_all(f.clone());
            }
        };

        let xs = x.select(Axis(0), rows);
        match fitted.model.predict(&xs) {
            Ok(values) => {
                debug!(partition = label, routed_to = target, rows = rows.len(), model = %fitted.metadata.candidate, "group scored");
                values
                    .iter()
                    .map(|&value| RowOutcome::Predicted {
                        value,
                        model: fitted.metadata.candidate.clone(),
                        routed_to: target,
                    })
                    .collect()
            }
            Err(e) => fail_all(RoutingFailure::from(e)),
        }
    }
}
