// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The message record carried through the pipeline.
//!
//! A message has a fixed set of headers plus a variable set of typed user
//! fields. Once decoded it is immutable; the runtimes share it read-only.

/// Size of the message identifier.
pub const UUID_SIZE: usize = 16;

/// Default severity when the wire record carries none.
pub const DEFAULT_SEVERITY: i32 = 7;

/// A pipeline message.
///
/// Valid iff `uuid` and `timestamp` are present; the decoder enforces this,
/// so a `Message` obtained from the codec is always valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub uuid: [u8; UUID_SIZE],
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub msg_type: Option<String>,
    pub logger: Option<String>,
    pub severity: i32,
    pub payload: Option<String>,
    pub env_version: Option<String>,
    pub pid: i32,
    pub hostname: Option<String>,
    pub fields: Vec<Field>,
}

/// A named user field with a typed, possibly repeated value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    pub representation: Option<String>,
}

/// The typed value array of a user field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    Integer(Vec<i64>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
}

/// A borrowed view of one field element, as the matcher consumes it.
///
/// Integer elements are already coerced to double.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRef<'a> {
    Str(&'a str),
    Bytes(&'a [u8]),
    Number(f64),
    Bool(bool),
}

impl Default for Message {
    fn default() -> Self {
        Self {
            uuid: [0; UUID_SIZE],
            timestamp: 0,
            msg_type: None,
            logger: None,
            severity: DEFAULT_SEVERITY,
            payload: None,
            env_version: None,
            pid: 0,
            hostname: None,
            fields: Vec::new(),
        }
    }
}

impl Message {
    /// Create a message with the required headers and defaults for the rest.
    pub fn new(uuid: [u8; UUID_SIZE], timestamp: i64) -> Self {
        Self {
            uuid,
            timestamp,
            ..Default::default()
        }
    }

    /// Look up the `fi`-th field named `name` and return its `ai`-th element.
    ///
    /// Returns `None` when the field, the field index, or the array index is
    /// absent. Does not allocate.
    pub fn read_field(&self, name: &str, fi: usize, ai: usize) -> Option<FieldRef<'_>> {
        let field = self.fields.iter().filter(|f| f.name == name).nth(fi)?;
        match &field.value {
            FieldValue::String(v) => v.get(ai).map(|s| FieldRef::Str(s)),
            FieldValue::Bytes(v) => v.get(ai).map(|b| FieldRef::Bytes(b)),
            FieldValue::Integer(v) => v.get(ai).map(|i| FieldRef::Number(*i as f64)),
            FieldValue::Double(v) => v.get(ai).map(|d| FieldRef::Number(*d)),
            FieldValue::Bool(v) => v.get(ai).map(|b| FieldRef::Bool(*b)),
        }
    }
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            representation: None,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
