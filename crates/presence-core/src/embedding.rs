//! Face embedding vector, its textual form, and decoding of stored values.
//!
//! Stores may hold an embedding either as a JSON array of numbers or as a
//! string such as `"[0.12, -0.5, ...]"`. Both decode to the same
//! [`Embedding`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("no embedding stored")]
    Missing,
    #[error("embedding has no values")]
    Empty,
    #[error("malformed embedding: {0}")]
    Malformed(String),
    #[error("non-finite value at index {0}")]
    NonFinite(usize),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// True when nothing was stored at all, as opposed to something unreadable.
    pub fn is_missing(&self) -> bool {
        matches!(self, EmbeddingError::Missing)
    }
}

/// Face embedding vector (128-dimensional for Facenet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Vectors of different length are an error rather than being
    /// silently truncated.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        if self.values.len() != other.values.len() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Render as `[v0, v1, ...]`. Parsing the result yields the same values.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Decode an embedding exactly as a store returned it.
    pub fn from_stored(value: &serde_json::Value) -> Result<Self, EmbeddingError> {
        use serde_json::Value;

        match value {
            Value::Null => Err(EmbeddingError::Missing),
            Value::String(s) if s.trim().is_empty() => Err(EmbeddingError::Missing),
            Value::String(s) => s.parse(),
            Value::Array(items) if items.is_empty() => Err(EmbeddingError::Missing),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let v = item.as_f64().ok_or_else(|| {
                        EmbeddingError::Malformed(format!("element {i} is not a number: {item}"))
                    })?;
                    values.push(finite(v as f32, i)?);
                }
                Ok(Self { values })
            }
            other => Err(EmbeddingError::Malformed(format!(
                "expected array or string, got {}",
                json_kind(other)
            ))),
        }
    }
}

impl fmt::Display for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

impl FromStr for Embedding {
    type Err = EmbeddingError;

    /// Parse `[a, b, c]` or `(a, b, c)`, tolerating whitespace and a
    /// trailing comma.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .or_else(|| {
                trimmed
                    .strip_prefix('(')
                    .and_then(|rest| rest.strip_suffix(')'))
            })
            .ok_or_else(|| EmbeddingError::Malformed(format!("not a vector literal: {}", preview(trimmed))))?;

        let inner = inner.trim();
        let inner = inner.strip_suffix(',').unwrap_or(inner);
        if inner.trim().is_empty() {
            return Err(EmbeddingError::Empty);
        }

        let mut values = Vec::new();
        for (i, part) in inner.split(',').enumerate() {
            let part = part.trim();
            let v: f32 = part.parse().map_err(|_| {
                EmbeddingError::Malformed(format!("element {i} is not a number: {}", preview(part)))
            })?;
            values.push(finite(v, i)?);
        }

        Ok(Self { values })
    }
}

fn finite(v: f32, index: usize) -> Result<f32, EmbeddingError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EmbeddingError::NonFinite(index))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shorten user-supplied text for error messages.
fn preview(s: &str) -> String {
    const MAX: usize = 32;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX).collect();
        format!("{head}...")
    }
}
