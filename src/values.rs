//! The payload value taxonomy.  External and request events carry a typed
//! value tree between models; observation records carry the same trees to
//! the stream writers.  The set of kinds is closed, and serialization is
//! externally tagged so a round trip through a writer preserves the kind
//! (a `Set` never comes back as a `Tuple`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::errors::SimulationError;

/// A typed payload value, the wire format between models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
}

impl Value {
    /// The kind name of this value, used in mismatch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Tuple(_) => "tuple",
        }
    }

    pub fn as_bool(&self) -> Result<bool, SimulationError> {
        match self {
            Value::Bool(value) => Ok(*value),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_int(&self) -> Result<i64, SimulationError> {
        match self {
            Value::Int(value) => Ok(*value),
            other => Err(mismatch("int", other)),
        }
    }

    /// Integers widen to doubles here; configuration trees routinely write
    /// `3` where `3.0` is meant.
    pub fn as_double(&self) -> Result<f64, SimulationError> {
        match self {
            Value::Double(value) => Ok(*value),
            Value::Int(value) => Ok(*value as f64),
            other => Err(mismatch("double", other)),
        }
    }

    pub fn as_string(&self) -> Result<&str, SimulationError> {
        match self {
            Value::String(value) => Ok(value),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn as_set(&self) -> Result<&[Value], SimulationError> {
        match self {
            Value::Set(values) => Ok(values),
            other => Err(mismatch("set", other)),
        }
    }

    pub fn as_map(&self) -> Result<&BTreeMap<String, Value>, SimulationError> {
        match self {
            Value::Map(values) => Ok(values),
            other => Err(mismatch("map", other)),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value], SimulationError> {
        match self {
            Value::Tuple(values) => Ok(values),
            other => Err(mismatch("tuple", other)),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

fn mismatch(expected: &'static str, found: &Value) -> SimulationError {
    SimulationError::ValueKindMismatch {
        expected,
        found: found.kind(),
    }
}
