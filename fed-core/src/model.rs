// fed-core/src/model.rs

//! Model state data types.
//!
//! A [`ModelState`] is an ordered mapping from parameter name to a dense
//! float tensor. The parameter-name set and per-parameter shapes form the
//! model schema; every submission for a round must match the schema of the
//! prior round's global state before it may be aggregated. Schema
//! compatibility is a precondition of aggregation, not something aggregation
//! establishes.
//!
//! States are plain values. Once a state has been persisted for a round it
//! is never mutated; each round produces a new, distinct `ModelState`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FedError, Result};

/// A dense tensor of 32-bit floats with an explicit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor, checking that `data` holds exactly one element per
    /// shape slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the element count does not match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(FedError::model(format!(
                "tensor with shape {:?} requires {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Creates a zero-filled tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A first schema divergence between two model states.
///
/// Carries the offending parameter name and a human-readable detail; the
/// aggregation engine attaches the provider identity when surfacing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub parameter: String,
    pub detail: String,
}

/// An ordered mapping from parameter name to tensor.
///
/// Iteration order is the lexicographic order of parameter names, which
/// keeps serialized payloads and aggregation loops deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    parameters: BTreeMap<String, Tensor>,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a parameter.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.parameters.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.parameters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// Iterates parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.parameters.iter()
    }

    /// Parameter names in lexicographic order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Total number of scalar elements across all parameters.
    pub fn element_count(&self) -> usize {
        self.parameters.values().map(Tensor::len).sum()
    }

    /// Checks that `other` carries exactly this state's parameter set with
    /// matching shapes.
    ///
    /// Returns the first divergence found: a parameter missing from `other`,
    /// a parameter present in `other` but not here, or a shape mismatch.
    pub fn check_compatible(&self, other: &ModelState) -> std::result::Result<(), SchemaViolation> {
        for (name, tensor) in &self.parameters {
            match other.get(name) {
                None => {
                    return Err(SchemaViolation {
                        parameter: name.clone(),
                        detail: "parameter missing".to_string(),
                    });
                }
                Some(theirs) if theirs.shape() != tensor.shape() => {
                    return Err(SchemaViolation {
                        parameter: name.clone(),
                        detail: format!(
                            "shape {:?} does not match expected {:?}",
                            theirs.shape(),
                            tensor.shape()
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        for name in other.parameters.keys() {
            if !self.parameters.contains_key(name) {
                return Err(SchemaViolation {
                    parameter: name.clone(),
                    detail: "parameter not present in the expected schema".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl FromIterator<(String, Tensor)> for ModelState {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            parameters: iter.into_iter().collect(),
        }
    }
}

/// A provider's candidate update for one round.
///
/// Produced by exactly one provider per round; a provider submitting twice
/// for the same round is a protocol violation surfaced as
/// [`FedError::DuplicateSubmission`], never a silent merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub round: u64,
    pub provider: String,
    pub state: ModelState,
}

impl Submission {
    pub fn new(round: u64, provider: impl Into<String>, state: ModelState) -> Self {
        Self {
            round,
            provider: provider.into(),
            state,
        }
    }
}

/// Checks that a provider identity is usable as an artifact name component.
///
/// Identities participate in `round-N-P` artifact names, so they must be
/// non-empty and restricted to alphanumerics, `-`, `_`, and `.`.
///
/// # Errors
///
/// Returns [`FedError::InvalidProvider`] otherwise.
pub fn validate_provider_id(provider: &str) -> Result<()> {
    let valid = !provider.is_empty()
        && provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !provider.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(FedError::InvalidProvider {
            provider: provider.to_string(),
        })
    }
}
