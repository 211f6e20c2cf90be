//! JSON transport form of [`TextOperation`].
//!
//! An operation travels as a flat JSON array:
//!
//! | element        | meaning            |
//! |----------------|--------------------|
//! | positive `n`   | retain `n` chars   |
//! | string `s`     | insert `s`         |
//! | negative `-n`  | delete `n` chars   |
//!
//! `[5, ", world"]` turns `"hello"` into `"hello, world"`; a whole
//! document is a single string element (`["hello"]`), or `[]` when empty.
//! Decoding goes through the builder, so non-canonical input is normalised.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::operation::{Component, OperationError, TextOperation};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireComponent {
    Count(i64),
    Text(String),
}

/// Largest base or target length a decoded operation may span, so that
/// every length still encodes as a JSON integer.
const MAX_LEN: usize = i64::MAX as usize;

fn from_wire(raw: Vec<WireComponent>) -> Result<TextOperation, OperationError> {
    let mut op = TextOperation::new();
    let (mut base_len, mut target_len) = (0usize, 0usize);
    for component in raw {
        match component {
            WireComponent::Count(0) => {
                return Err(OperationError::InvalidComponent(
                    "zero-length retain/delete".to_string(),
                ));
            }
            WireComponent::Count(n) if n > 0 => {
                let n = to_len(n.unsigned_abs())?;
                base_len = grow(base_len, n)?;
                target_len = grow(target_len, n)?;
                op.retain(n);
            }
            WireComponent::Count(n) => {
                let n = to_len(n.unsigned_abs())?;
                base_len = grow(base_len, n)?;
                op.delete(n);
            }
            WireComponent::Text(s) if s.is_empty() => {
                return Err(OperationError::InvalidComponent("empty insert".to_string()));
            }
            WireComponent::Text(s) => {
                target_len = grow(target_len, s.chars().count())?;
                op.insert(&s);
            }
        }
    }
    Ok(op)
}

fn grow(total: usize, n: usize) -> Result<usize, OperationError> {
    total
        .checked_add(n)
        .filter(|len| *len <= MAX_LEN)
        .ok_or_else(|| OperationError::InvalidComponent("operation length overflows".to_string()))
}

fn to_len(n: u64) -> Result<usize, OperationError> {
    usize::try_from(n).map_err(|_| OperationError::InvalidComponent(format!("length {n} out of range")))
}

fn to_wire(op: &TextOperation) -> Vec<WireComponent> {
    op.components()
        .iter()
        .map(|c| match c {
            Component::Retain(n) => WireComponent::Count(*n as i64),
            Component::Insert(s) => WireComponent::Text(s.clone()),
            Component::Delete(n) => WireComponent::Count(-(*n as i64)),
        })
        .collect()
}

impl Serialize for TextOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_wire(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TextOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<WireComponent>::deserialize(deserializer)?;
        from_wire(raw).map_err(serde::de::Error::custom)
    }
}

impl TextOperation {
    /// Encode to the JSON transport string.
    pub fn to_transport(&self) -> Result<String, OperationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON transport string.
    pub fn from_transport(s: &str) -> Result<Self, OperationError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Decode from an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, OperationError> {
        Ok(serde_json::from_value(value)?)
    }
}
