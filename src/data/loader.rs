//! CSV ingestion and prediction export via polars

use super::{Dataset, FeatureMatrix, FeatureValue};
use crate::error::{FarecastError, Result};
use crate::pipeline::inference::{PredictionSet, RowOutcome};
use ndarray::Array1;
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(1000))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    debug!(path = %path.display(), rows = df.height(), cols = df.width(), "Read CSV");
    Ok(df)
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Convert one polars column into feature cells
fn column_values(col: &Column) -> Result<Vec<FeatureValue>> {
    if is_numeric(col.dtype()) {
        let casted = col.cast(&DataType::Float64)?;
        Ok(casted
            .f64()?
            .into_iter()
            .map(FeatureValue::from)
            .collect())
    } else {
        let casted = col.cast(&DataType::String)?;
        Ok(casted
            .str()?
            .into_iter()
            .map(|v| match v {
                Some(s) if !s.trim().is_empty() => FeatureValue::Categorical(s.to_string()),
                _ => FeatureValue::Missing,
            })
            .collect())
    }
}

fn frame_to_matrix(df: &DataFrame, skip: Option<&str>) -> Result<FeatureMatrix> {
    let cols: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|c| Some(c.name().as_str()) != skip)
        .collect();
    let names = cols.iter().map(|c| c.name().to_string()).collect();
    let values = cols
        .iter()
        .map(|c| column_values(c))
        .collect::<Result<Vec<_>>>()?;

    let mut matrix = FeatureMatrix::new(names)?;
    for i in 0..df.height() {
        matrix.push_row(values.iter().map(|col| col[i].clone()).collect())?;
    }
    Ok(matrix)
}

/// Load a training dataset; rows without a target value are dropped
pub fn load_dataset(path: &Path, target: &str) -> Result<Dataset> {
    let df = read_csv(path)?;
    let target_col = df.column(target).map_err(|_| {
        FarecastError::DataError(format!("target column '{}' not found", target))
    })?;
    if !is_numeric(target_col.dtype()) {
        return Err(FarecastError::DataError(format!(
            "target column '{}' must be numeric, found {}",
            target,
            target_col.dtype()
        )));
    }
    let target_values: Vec<Option<f64>> = target_col
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .collect();

    let features = frame_to_matrix(&df, Some(target))?;
    let keep: Vec<usize> = target_values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.map(|t| t.is_finite()).unwrap_or(false))
        .map(|(i, _)| i)
        .collect();
    if keep.len() < target_values.len() {
        warn!(
            dropped = target_values.len() - keep.len(),
            "Dropping rows with missing target"
        );
    }

    let features = features.select_rows(&keep)?;
    let target = Array1::from_iter(keep.iter().filter_map(|&i| target_values[i]));
    info!(rows = target.len(), features = features.n_cols(), "Loaded training data");
    Dataset::new(features, target)
}

/// Load a feature table for scoring
pub fn load_features(path: &Path) -> Result<FeatureMatrix> {
    let df = read_csv(path)?;
    let matrix = frame_to_matrix(&df, None)?;
    info!(rows = matrix.n_rows(), features = matrix.n_cols(), "Loaded scoring data");
    Ok(matrix)
}

/// Flatten a prediction set into a table: one row per input record
pub fn predictions_frame(predictions: &PredictionSet) -> Result<DataFrame> {
    let n = predictions.len();
    let mut row_index = Vec::with_capacity(n);
    let mut value = Vec::with_capacity(n);
    let mut partition = Vec::with_capacity(n);
    let mut model = Vec::with_capacity(n);
    let mut error = Vec::with_capacity(n);

    for p in predictions.iter() {
        row_index.push(p.row_index as u64);
        match &p.outcome {
            RowOutcome::Predicted { value: v, model: m, routed_to } => {
                value.push(Some(*v));
                partition.push(Some(*routed_to as u64));
                model.push(Some(m.clone()));
                error.push(None);
            }
            RowOutcome::Unroutable(failure) => {
                value.push(None);
                partition.push(p.partition.map(|x| x as u64));
                model.push(None);
                error.push(Some(failure.to_string()));
            }
        }
    }

    let df = DataFrame::new(vec![
        Column::new("row_index".into(), row_index),
        Column::new("prediction".into(), value),
        Column::new("partition".into(), partition),
        Column::new("model".into(), model),
        Column::new("error".into(), error),
    ])?;
    Ok(df)
}

/// Write predictions as CSV
pub fn write_predictions(path: &Path, predictions: &PredictionSet) -> Result<()> {
    let mut df = predictions_frame(predictions)?;
    let mut file = std::fs::File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    info!(path = %path.display(), rows = df.height(), "Wrote predictions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_dataset_splits_target() {
        let file = write_csv("stops,airline,price\n0,IndiGo,3897\n1,Vistara,7662\n2,,13882\n");
        let ds = load_dataset(file.path(), "price").unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.features.columns(), &["stops".to_string(), "airline".to_string()]);
        assert_eq!(ds.features.row(0).unwrap()[1], FeatureValue::Categorical("IndiGo".into()));
        assert!(ds.features.row(2).unwrap()[1].is_missing());
        assert_eq!(ds.target[1], 7662.0);
    }

    #[test]
    fn test_load_dataset_drops_missing_target() {
        let file = write_csv("stops,price\n0,100\n1,\n2,300\n");
        let ds = load_dataset(file.path(), "price").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.target[1], 300.0);
    }

    #[test]
    fn test_missing_target_column() {
        let file = write_csv("stops,airline\n0,IndiGo\n");
        let result = load_dataset(file.path(), "price");
        assert!(matches!(result, Err(FarecastError::DataError(_))));
    }

    #[test]
    fn test_load_features_keeps_all_columns() {
        let file = write_csv("a,b\n1.5,x\n2.5,y\n");
        let m = load_features(file.path()).unwrap();
        assert_eq!(m.n_cols(), 2);
        assert_eq!(m.row(1).unwrap()[0].as_f64(), Some(2.5));
    }
}
