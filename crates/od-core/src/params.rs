//! Ordered, string-keyed operation parameters with typed accessors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OdError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag {
    values: Map<String, Value>,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fetch and convert a parameter that must be present.
    ///
    /// A missing key or an explicit `null` yields [`OdError::MissingParameter`];
    /// a value of the wrong shape yields [`OdError::Argument`] naming the key.
    pub fn get_required<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.values.get(key) {
            None | Some(Value::Null) => Err(OdError::MissingParameter { key: key.to_string() }),
            Some(value) => convert(key, value),
        }
    }

    /// Fetch a parameter, falling back to `default` when it is absent or unusable.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.values.get(key) {
            None | Some(Value::Null) => default,
            Some(value) => convert(key, value).unwrap_or(default),
        }
    }
}

fn convert<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    if let Ok(v) = T::deserialize(value) {
        return Ok(v);
    }
    // Loosely typed callers send numbers and booleans as strings.
    if let Value::String(s) = value {
        if let Ok(parsed) = serde_json::from_str::<Value>(s) {
            if let Ok(v) = T::deserialize(&parsed) {
                return Ok(v);
            }
        }
    }
    Err(OdError::argument(format!("parameter '{key}' has an invalid value: {value}")))
}

impl From<Map<String, Value>> for ParameterBag {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, Value)> for ParameterBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}
