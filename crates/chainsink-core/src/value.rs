//! Row field model and insert-time normalization.
//!
//! Column engines for analytics store money-sized integers at full width, so
//! wide integers serialize as decimal strings, never as native floats.
//! Timestamps render with a space separator and millisecond precision, no
//! zone indicator. Hex-typed columns are stored without a `0x` prefix.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// A single row field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt64(u64),
    Int64(i64),
    /// Wide unsigned integer; serialized as a decimal string.
    BigUint(u128),
    Text(String),
    /// Hex bytes; any `0x` prefix is stripped when normalized.
    Hex(String),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Array(Vec<Value>),
    Null,
}

impl Value {
    /// Render for row-oriented JSON insert formats.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::UInt64(v) => serde_json::json!(v),
            Value::Int64(v) => serde_json::json!(v),
            Value::BigUint(v) => serde_json::Value::String(v.to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Hex(s) => serde_json::Value::String(strip_hex_prefix(s).to_string()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            }
            Value::Bool(b) => serde_json::json!(b),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Null => serde_json::Value::Null,
        }
    }

    /// Parse a JSON value read back from the database.
    ///
    /// Lossy by design: numbers come back as `UInt64`/`Int64`, everything
    /// textual as `Text`. Used only on the client-round-trip migration path,
    /// where rows are re-serialized with `to_json` immediately after.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::UInt64(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else {
                    Value::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Text(v.to_string()),
        }
    }

    /// The `u64` this value carries, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt64(v) => Some(*v),
            Value::Int64(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// An ingest entity: a kind tag plus ordered `(column, value)` pairs.
///
/// The kind is the PascalCase type name the producer knows the entity by;
/// the router maps it to a physical table. Field order is preserved into the
/// insert.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    kind: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: vec![],
        }
    }

    /// Set a field, replacing any previous value for the same column.
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        let column = column.into();
        if let Some(slot) = self.fields.iter_mut().find(|(c, _)| *c == column) {
            slot.1 = value;
        } else {
            self.fields.push((column, value));
        }
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Rewrap declared hex columns as `Value::Hex` so serialization strips
    /// any `0x` prefix. An empty string stays empty; the column treats it as
    /// a zero-byte fixed string of its declared length.
    pub fn apply_hex_columns(&mut self, hex_columns: &HashSet<String>) {
        for (column, value) in &mut self.fields {
            if hex_columns.contains(column) {
                if let Value::Text(s) = value {
                    *value = Value::Hex(std::mem::take(s));
                }
            }
        }
    }

    /// Values in field order.
    pub fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}
