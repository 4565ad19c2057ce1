//! Search space definition for hyperparameters
//!
//! Every parameter carries a finite list of values, so a space is a grid.
//! Combinations are addressed by a mixed-radix index (first parameter most
//! significant), which lets random search sample without replacement without
//! materialising the grid.

use crate::error::{FarecastError, Result};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    String(String),
    Bool(bool),
}

impl ParameterValue {
    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::String(v) => write!(f, "{}", v),
            ParameterValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// A named hyperparameter with its candidate values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<ParameterValue>,
}

impl Parameter {
    pub fn float(name: impl Into<String>, values: &[f64]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|&v| ParameterValue::Float(v)).collect(),
        }
    }

    pub fn int(name: impl Into<String>, values: &[i64]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|&v| ParameterValue::Int(v)).collect(),
        }
    }

    pub fn categorical(name: impl Into<String>, choices: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: choices.iter().map(|c| ParameterValue::String(c.to_string())).collect(),
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![ParameterValue::Bool(true), ParameterValue::Bool(false)],
        }
    }
}

/// Finite search space for hyperparameter tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
}

impl SearchSpace {
    /// Create a new empty search space
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter to the search space
    pub fn add(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn float(self, name: impl Into<String>, values: &[f64]) -> Self {
        self.add(Parameter::float(name, values))
    }

    pub fn int(self, name: impl Into<String>, values: &[i64]) -> Self {
        self.add(Parameter::int(name, values))
    }

    pub fn categorical(self, name: impl Into<String>, choices: &[&str]) -> Self {
        self.add(Parameter::categorical(name, choices))
    }

    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.add(Parameter::boolean(name))
    }

    /// Get all parameters
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Get parameter names in order
    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Reject spaces with no parameters, empty value lists or repeated names
    pub fn validate(&self, candidate: &str) -> Result<()> {
        let invalid = |reason: String| FarecastError::InvalidSearchSpace {
            candidate: candidate.to_string(),
            reason,
        };
        if self.parameters.is_empty() {
            return Err(invalid("no parameters".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.parameters {
            if p.values.is_empty() {
                return Err(invalid(format!("parameter '{}' has no values", p.name)));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(invalid(format!("parameter '{}' declared twice", p.name)));
            }
        }
        Ok(())
    }

    /// Number of combinations in the grid; zero for an empty space
    pub fn grid_size(&self) -> usize {
        if self.parameters.is_empty() {
            return 0;
        }
        self.parameters
            .iter()
            .fold(1usize, |acc, p| acc.saturating_mul(p.values.len()))
    }

    /// Combination at a mixed-radix grid position
    pub fn combination(&self, mut idx: usize) -> ParamSet {
        let mut picks = vec![0usize; self.parameters.len()];
        for (slot, p) in picks.iter_mut().zip(self.parameters.iter()).rev() {
            let radix = p.values.len().max(1);
            *slot = idx % radix;
            idx /= radix;
        }
        let values = self
            .parameters
            .iter()
            .zip(picks)
            .filter_map(|(p, i)| p.values.get(i).map(|v| (p.name.clone(), v.clone())))
            .collect();
        ParamSet { values }
    }

    /// Every combination; the last parameter varies fastest
    pub fn grid(&self) -> Vec<ParamSet> {
        (0..self.grid_size()).map(|i| self.combination(i)).collect()
    }

    /// Up to `n` distinct combinations drawn uniformly from the grid
    pub fn sample(&self, n: usize, rng: &mut impl Rng) -> Vec<ParamSet> {
        let total = self.grid_size();
        let amount = n.min(total);
        if amount == 0 {
            return Vec::new();
        }
        index::sample(rng, total, amount)
            .into_iter()
            .map(|i| self.combination(i))
            .collect()
    }
}

/// One concrete hyperparameter combination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    values: BTreeMap<String, ParameterValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> Result<&ParameterValue> {
        self.values.get(name).ok_or_else(|| FarecastError::InvalidParameter {
            name: name.to_string(),
            value: "<missing>".to_string(),
            reason: "not present in parameter set".to_string(),
        })
    }

    fn wrong_type(name: &str, value: &ParameterValue, expected: &str) -> FarecastError {
        FarecastError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: format!("expected {}", expected),
        }
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        let v = self.require(name)?;
        v.as_float().ok_or_else(|| Self::wrong_type(name, v, "a number"))
    }

    pub fn usize(&self, name: &str) -> Result<usize> {
        let v = self.require(name)?;
        v.as_int()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| Self::wrong_type(name, v, "a non-negative integer"))
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        let v = self.require(name)?;
        v.as_string().ok_or_else(|| Self::wrong_type(name, v, "a string"))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        let v = self.require(name)?;
        v.as_bool().ok_or_else(|| Self::wrong_type(name, v, "a boolean"))
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}
