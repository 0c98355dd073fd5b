//! Model payloads.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An arbitrarily nested numeric tensor.
///
/// Serialized untagged, so `[[0.1, 0.2], [0.3, 0.4]]` parses directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tensor {
    Scalar(f64),
    Seq(Vec<Tensor>),
}

impl Tensor {
    /// Length of the outermost dimension; 0 for a scalar.
    pub fn first_dimension_len(&self) -> usize {
        match self {
            Tensor::Scalar(_) => 0,
            Tensor::Seq(items) => items.len(),
        }
    }

    /// Number of scalar leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            Tensor::Scalar(_) => 1,
            Tensor::Seq(items) => items.iter().map(Tensor::leaf_count).sum(),
        }
    }

    /// Nesting depth; 0 for a scalar.
    pub fn depth(&self) -> usize {
        match self {
            Tensor::Scalar(_) => 0,
            Tensor::Seq(items) => 1 + items.iter().map(Tensor::depth).max().unwrap_or(0),
        }
    }
}

/// One layer of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Layer {
    #[serde(default)]
    pub weights: Option<Tensor>,
    #[serde(default)]
    pub biases: Option<Tensor>,
}

/// A model exchanged in a round. Stored and gated, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPayload {
    pub layers: Vec<Layer>,
}

impl ModelPayload {
    /// A single layer with no weights or biases.
    ///
    /// Used as the round-0 placeholder and as the payload returned when a
    /// result is withheld for lack of tokens.
    pub fn empty() -> Self {
        Self {
            layers: vec![Layer::default()],
        }
    }

    /// Whether no layer carries any parameters.
    pub fn is_empty(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.weights.is_none() && l.biases.is_none())
    }

    /// Parse a JSON-encoded model.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::MalformedInput(format!("model payload: {}", e)))
    }

    /// Total number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.weights.iter().chain(l.biases.iter()))
            .map(Tensor::leaf_count)
            .sum()
    }
}
