//! Integration tests for the model registry on disk

use farecast::data::{Dataset, FeatureMatrix};
use farecast::ensemble::{FitFn, StackingConfig, StackingRegressor};
use farecast::error::{FarecastError, Result};
use farecast::optimizer::{ParamSet, ParameterValue, SearchStrategy, TunerConfig};
use farecast::partition::{Partitioner, PartitionerConfig};
use farecast::pipeline::TrainingOrchestrator;
use farecast::config::PipelineConfig;
use farecast::registry::{ArtifactRole, FittedModel, ModelRegistry, RegistryKey, MAGIC};
use farecast::selection::SelectionConfig;
use farecast::training::{MeanRegressor, RandomForestRegressor, Regressor, RidgeRegression};
use ndarray::{Array1, Array2};
use std::thread;
use tempfile::tempdir;

fn stub(partition: usize, value: f64) -> FittedModel {
    FittedModel::predictor(partition, "baseline", Regressor::Baseline(MeanRegressor::constant(value, 3)))
}

#[test]
fn test_artifacts_carry_envelope_header() {
    let dir = tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    registry.save_predictor(4, &stub(4, 1.0)).unwrap();

    let bytes = std::fs::read(dir.path().join("predictor_4.bin")).unwrap();
    assert_eq!(&bytes[..4], MAGIC);
    assert!(dir.path().join("index.json").exists());
}

#[test]
fn test_index_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let params = ParamSet::new().with("alpha", ParameterValue::Float(2.0));
        let model = stub(0, 5.0).with_hyperparameters(params).with_scores(Some(0.91), Some(0.88));
        registry.save_predictor(0, &model).unwrap();

        let x = Array2::from_shape_fn((12, 3), |(i, j)| (i % 3) as f64 * 10.0 + j as f64 * 0.1);
        let (partitions, _) = Partitioner::new(PartitionerConfig::new()).assign(&x, 3).unwrap();
        registry.save_partitioner(&partitions).unwrap();
    }

    let registry = ModelRegistry::open(dir.path()).unwrap();
    assert_eq!(registry.resolve_predictor_name(0).unwrap(), "baseline");
    assert!(registry.contains(RegistryKey::Partitioner));
    assert_eq!(registry.load_partitioner().unwrap().k(), 3);

    let entry = registry
        .entries()
        .into_iter()
        .find(|e| e.key == "predictor:0")
        .unwrap();
    assert_eq!(entry.role, ArtifactRole::Predictor);
    let meta = entry.metadata.unwrap();
    assert_eq!(meta.holdout_score, Some(0.88));
    assert_eq!(meta.cv_score, Some(0.91));
    assert_eq!(meta.n_features, 3);
    assert_eq!(meta.hyperparameters.f64("alpha").unwrap(), 2.0);
}

#[test]
fn test_corrupt_index_is_reported() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.json"), "{ not json").unwrap();
    match ModelRegistry::open(dir.path()) {
        Err(FarecastError::CorruptArtifact { key, .. }) => assert_eq!(key, "index.json"),
        other => panic!("expected corrupt index, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_concurrent_saves() {
    let dir = tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    thread::scope(|s| {
        for p in 0..8 {
            let registry = &registry;
            s.spawn(move || registry.save_predictor(p, &stub(p, p as f64)).unwrap());
        }
    });
    assert_eq!(registry.predictor_partitions(), (0..8).collect::<Vec<_>>());

    let reopened = ModelRegistry::open(dir.path()).unwrap();
    assert_eq!(reopened.entries().len(), 8);
    let five = reopened.load_predictor(5).unwrap();
    assert_eq!(five.model.predict(&Array2::zeros((1, 3))).unwrap()[0], 5.0);
}

#[test]
fn test_training_records_provenance() {
    let mut m = FeatureMatrix::new(vec!["x".into(), "carrier".into()]).unwrap();
    let mut y = Vec::new();
    for i in 0..60 {
        let group = i % 2;
        let x = group as f64 * 20.0 + (i / 2) as f64 * 0.1;
        let carrier = if i % 3 == 0 { "IndiGo" } else { "Vistara" };
        m.push_row(vec![x.into(), carrier.into()]).unwrap();
        y.push(2.0 * x + if carrier == "IndiGo" { 50.0 } else { 0.0 });
    }
    let data = Dataset::new(m, Array1::from(y)).unwrap();

    let dir = tempdir().unwrap();
    let registry = ModelRegistry::open(dir.path()).unwrap();
    let config = PipelineConfig::new()
        .with_forced_k(Some(2))
        .with_tuner(TunerConfig::new().with_cv_folds(3).with_strategy(SearchStrategy::Grid))
        .with_selection(SelectionConfig::new().without_stacking())
        .with_candidates(&["ridge", "baseline"]);
    TrainingOrchestrator::new(config, &registry).unwrap().run(&data).unwrap();

    let width = registry.load_preprocessor().unwrap().n_output_features();
    for p in registry.predictor_partitions() {
        let fitted = registry.load_predictor(p).unwrap();
        assert_eq!(fitted.metadata.partition, Some(p));
        assert_eq!(fitted.metadata.n_features, width);
        assert!(fitted.metadata.holdout_score.is_some());
        assert!(!fitted.metadata.hyperparameters.is_empty());
    }
}

fn ridge(x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
    let mut m = RidgeRegression::new().with_alpha(0.5);
    m.fit(x, y)?;
    Ok(Regressor::Ridge(m))
}

fn forest(x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
    let mut m = RandomForestRegressor::new(8).with_random_state(11);
    m.fit(x, y)?;
    Ok(Regressor::RandomForest(m))
}

#[test]
fn test_stacking_champion_survives_reload() {
    let x = Array2::from_shape_fn((48, 3), |(i, j)| ((i * (j + 2)) % 11) as f64 + j as f64 * 0.5);
    let y = x.column(0).mapv(|v| 3.0 * v) - x.column(2).mapv(|v| v) + 7.0;
    let base: Vec<(String, FitFn<'_>)> = vec![
        ("ridge".to_string(), &ridge as FitFn<'_>),
        ("random_forest".to_string(), &forest as FitFn<'_>),
    ];
    let stacked = StackingRegressor::fit(
        &StackingConfig::default(),
        &base,
        ("ridge".to_string(), &ridge as FitFn<'_>),
        &x,
        &y,
    )
    .unwrap();
    let expected = stacked.predict(&x).unwrap();

    let dir = tempdir().unwrap();
    {
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let model = FittedModel::predictor(2, "stacking", Regressor::Stacking(Box::new(stacked)))
            .with_scores(Some(0.97), Some(0.95));
        registry.save_predictor(2, &model).unwrap();
    }

    let registry = ModelRegistry::open(dir.path()).unwrap();
    assert_eq!(registry.resolve_predictor_name(2).unwrap(), "stacking");
    let loaded = registry.load_predictor(2).unwrap();
    assert_eq!(loaded.model.kind(), "stacking");
    assert_eq!(loaded.model.n_features(), 3);
    match &loaded.model {
        Regressor::Stacking(m) => {
            assert_eq!(m.base_names(), &["ridge".to_string(), "random_forest".to_string()]);
            assert_eq!(m.meta_name(), "ridge");
        }
        other => panic!("expected stacking, got {}", other.kind()),
    }

    let restored = loaded.model.predict(&x).unwrap();
    for (a, b) in expected.iter().zip(restored.iter()) {
        assert_eq!(a, b);
    }
}
