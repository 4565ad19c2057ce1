//! Model registry
//!
//! Persists the fitted preprocessor, the partitioner and one predictor per
//! partition under exact keys (`preprocessor`, `partitioner`,
//! `predictor:<p>`). Each artifact is one enveloped bincode file; an
//! `index.json` maps keys to files and metadata so predictor names resolve
//! without deserialising models.

mod envelope;

pub use envelope::{FORMAT_VERSION, MAGIC};

use crate::error::{FarecastError, Result};
use crate::optimizer::ParamSet;
use crate::partition::PartitionModel;
use crate::preprocessing::FeaturePreprocessor;
use crate::training::Regressor;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

const INDEX_FILE: &str = "index.json";

/// Role an artifact plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Preprocessor,
    Partitioner,
    Predictor,
}

/// Exact registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistryKey {
    Preprocessor,
    Partitioner,
    Predictor(usize),
}

impl RegistryKey {
    pub fn role(&self) -> ArtifactRole {
        match self {
            RegistryKey::Preprocessor => ArtifactRole::Preprocessor,
            RegistryKey::Partitioner => ArtifactRole::Partitioner,
            RegistryKey::Predictor(_) => ArtifactRole::Predictor,
        }
    }

    pub fn partition(&self) -> Option<usize> {
        match self {
            RegistryKey::Predictor(p) => Some(*p),
            _ => None,
        }
    }

    fn file_name(&self) -> String {
        match self {
            RegistryKey::Preprocessor => "preprocessor.bin".to_string(),
            RegistryKey::Partitioner => "partitioner.bin".to_string(),
            RegistryKey::Predictor(p) => format!("predictor_{}.bin", p),
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKey::Preprocessor => write!(f, "preprocessor"),
            RegistryKey::Partitioner => write!(f, "partitioner"),
            RegistryKey::Predictor(p) => write!(f, "predictor:{}", p),
        }
    }
}

impl FromStr for RegistryKey {
    type Err = FarecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preprocessor" => Ok(RegistryKey::Preprocessor),
            "partitioner" => Ok(RegistryKey::Partitioner),
            _ => s
                .strip_prefix("predictor:")
                .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|p| p.parse().ok())
                .map(RegistryKey::Predictor)
                .ok_or_else(|| FarecastError::ValidationError(format!("invalid registry key '{}'", s))),
        }
    }
}

/// Provenance of a fitted predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub candidate: String,
    pub role: ArtifactRole,
    pub partition: Option<usize>,
    pub fitted_at: DateTime<Utc>,
    pub hyperparameters: ParamSet,
    pub cv_score: Option<f64>,
    pub holdout_score: Option<f64>,
    pub n_features: usize,
}

/// A trained regressor with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub metadata: ModelMetadata,
    pub model: Regressor,
}

impl FittedModel {
    /// Wrap a predictor for `partition`
    pub fn predictor(partition: usize, candidate: impl Into<String>, model: Regressor) -> Self {
        Self {
            metadata: ModelMetadata {
                candidate: candidate.into(),
                role: ArtifactRole::Predictor,
                partition: Some(partition),
                fitted_at: Utc::now(),
                hyperparameters: ParamSet::new(),
                cv_score: None,
                holdout_score: None,
                n_features: model.n_features(),
            },
            model,
        }
    }

    pub fn with_hyperparameters(mut self, params: ParamSet) -> Self {
        self.metadata.hyperparameters = params;
        self
    }

    pub fn with_scores(mut self, cv_score: Option<f64>, holdout_score: Option<f64>) -> Self {
        self.metadata.cv_score = cv_score;
        self.metadata.holdout_score = holdout_score;
        self
    }
}

/// Index entry (metadata only, without model data)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub key: String,
    pub role: ArtifactRole,
    pub file: String,
    pub saved_at: DateTime<Utc>,
    /// Predictor metadata; absent for other roles
    pub metadata: Option<ModelMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryIndex {
    format_version: u16,
    entries: BTreeMap<String, RegistryEntry>,
}

/// Directory-backed artifact store
#[derive(Debug)]
pub struct ModelRegistry {
    root: PathBuf,
    index: Mutex<RegistryIndex>,
}

impl ModelRegistry {
    /// Create or open registry at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let file = File::open(&index_path)?;
            serde_json::from_reader(BufReader::new(file)).map_err(|e| FarecastError::CorruptArtifact {
                key: INDEX_FILE.to_string(),
                reason: e.to_string(),
            })?
        } else {
            RegistryIndex {
                format_version: FORMAT_VERSION,
                entries: BTreeMap::new(),
            }
        };
        debug!(root = %root.display(), "registry opened");

        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_index(&self, index: &RegistryIndex) -> Result<()> {
        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        serde_json::to_writer_pretty(BufWriter::new(File::create(&tmp)?), index)?;
        fs::rename(&tmp, self.root.join(INDEX_FILE))?;
        Ok(())
    }

    fn save<T: Serialize>(&self, key: RegistryKey, value: &T, metadata: Option<ModelMetadata>) -> Result<()> {
        let bytes = envelope::encode(value)?;
        let file = key.file_name();
        let tmp = self.root.join(format!("{}.tmp", file));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.root.join(&file))?;

        let mut index = self.index.lock();
        index.entries.insert(
            key.to_string(),
            RegistryEntry {
                key: key.to_string(),
                role: key.role(),
                file,
                saved_at: Utc::now(),
                metadata,
            },
        );
        self.write_index(&index)?;
        info!(key = %key, bytes = bytes.len(), "artifact saved");
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, key: RegistryKey) -> Result<T> {
        let name = key.to_string();
        let file = {
            let index = self.index.lock();
            index
                .entries
                .get(&name)
                .map(|e| e.file.clone())
                .ok_or_else(|| FarecastError::ModelNotFound(name.clone()))?
        };
        let path = self.root.join(&file);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FarecastError::ModelNotFound(format!("{} ({} missing)", name, file)))
            }
            Err(e) => return Err(e.into()),
        };
        envelope::decode(&name, &bytes)
    }

    pub fn save_preprocessor(&self, preprocessor: &FeaturePreprocessor) -> Result<()> {
        self.save(RegistryKey::Preprocessor, preprocessor, None)
    }

    pub fn load_preprocessor(&self) -> Result<FeaturePreprocessor> {
        self.load(RegistryKey::Preprocessor)
    }

    pub fn save_partitioner(&self, model: &PartitionModel) -> Result<()> {
        self.save(RegistryKey::Partitioner, model, None)
    }

    pub fn load_partitioner(&self) -> Result<PartitionModel> {
        self.load(RegistryKey::Partitioner)
    }

    /// Store the predictor for `partition`, replacing any previous one
    pub fn save_predictor(&self, partition: usize, model: &FittedModel) -> Result<()> {
        let mut metadata = model.metadata.clone();
        metadata.partition = Some(partition);
        self.save(RegistryKey::Predictor(partition), model, Some(metadata))
    }

    pub fn load_predictor(&self, partition: usize) -> Result<FittedModel> {
        self.load(RegistryKey::Predictor(partition))
    }

    /// Candidate name of the stored predictor, read from the index only
    pub fn resolve_predictor_name(&self, partition: usize) -> Result<String> {
        let key = RegistryKey::Predictor(partition).to_string();
        let index = self.index.lock();
        index
            .entries
            .get(&key)
            .and_then(|e| e.metadata.as_ref())
            .map(|m| m.candidate.clone())
            .ok_or(FarecastError::ModelNotFound(key))
    }

    pub fn contains(&self, key: RegistryKey) -> bool {
        self.index.lock().entries.contains_key(&key.to_string())
    }

    /// Partitions that have a stored predictor, ascending
    pub fn predictor_partitions(&self) -> Vec<usize> {
        let index = self.index.lock();
        let mut parts: Vec<usize> = index
            .entries
            .keys()
            .filter_map(|k| k.parse::<RegistryKey>().ok())
            .filter_map(|k| k.partition())
            .collect();
        parts.sort_unstable();
        parts
    }

    /// Snapshot of every index entry, ordered by key
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.index.lock().entries.values().cloned().collect()
    }

    /// Delete every artifact and empty the index
    pub fn purge(&self) -> Result<usize> {
        let mut index = self.index.lock();
        let mut removed = 0;
        for entry in index.entries.values() {
            match fs::remove_file(self.root.join(&entry.file)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        index.entries.clear();
        self.write_index(&index)?;
        info!(removed, root = %self.root.display(), "registry purged");
        Ok(removed)
    }
}
