//! Scalar field values shared by entities, cache entries and store rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered field-name to value map carried by an entity.
pub type FieldMap = BTreeMap<String, Scalar>;

/// A single column value.
///
/// Serialized untagged so the JSON form of a value is the value itself
/// (`7`, `"A"`, `true`, `null`). Cache hashes store that form per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Encode for storage inside a cache hash field.
    ///
    /// `None` for non-finite floats, which have no JSON form.
    pub fn encode(&self) -> Option<String> {
        if let Self::Float(value) = self
            && !value.is_finite()
        {
            return None;
        }
        serde_json::to_string(self).ok()
    }

    /// Decode a cache hash field written by [`Scalar::encode`].
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Text interpolated into a cache key, before percent-encoding.
    ///
    /// Integers and text share a spelling (`7`), floats always carry a point or
    /// exponent (`1.0`) and booleans read `true`/`false`. `Null` has no segment:
    /// a key over a null field would collide with the empty string.
    pub fn key_segment(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(value.to_string()),
            Self::Int(value) => Some(value.to_string()),
            Self::Float(value) => Some(format!("{value:?}")),
            Self::Text(value) => Some(value.clone()),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Build a [`FieldMap`] from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> FieldMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Scalar>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}
