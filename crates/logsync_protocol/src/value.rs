//! Helpers for building and reading CBOR value trees.

use crate::error::{ProtocolError, ProtocolResult};
use ciborium::value::{Integer, Value};

/// Serializes a value tree to CBOR bytes.
pub(crate) fn to_cbor(value: &Value) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(buf)
}

/// Parses exactly one CBOR item from `bytes`.
pub(crate) fn from_cbor(bytes: &[u8]) -> ProtocolResult<Value> {
    let mut reader = bytes;
    let value: Value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| ProtocolError::decoding(e.to_string()))?;
    if !reader.is_empty() {
        return Err(ProtocolError::invalid_structure(format!(
            "{} trailing bytes after message",
            reader.len()
        )));
    }
    Ok(value)
}

pub(crate) fn text(key: &str) -> Value {
    Value::Text(key.to_string())
}

pub(crate) fn uint(v: u64) -> Value {
    Value::Integer(Integer::from(v))
}

pub(crate) fn int(v: i64) -> Value {
    Value::Integer(Integer::from(v))
}

/// Read-only view over the entries of a CBOR map with text keys.
pub(crate) struct Fields<'a> {
    entries: &'a [(Value, Value)],
    context: &'static str,
}

impl<'a> Fields<'a> {
    /// Interprets `value` as a map. Non-text or repeated keys are rejected.
    pub(crate) fn of(value: &'a Value, context: &'static str) -> ProtocolResult<Self> {
        let entries = value.as_map().ok_or_else(|| {
            ProtocolError::invalid_structure(format!("{context}: expected map"))
        })?;

        for (i, (key, _)) in entries.iter().enumerate() {
            let name = key.as_text().ok_or_else(|| {
                ProtocolError::invalid_structure(format!("{context}: non-text key"))
            })?;
            if entries[..i].iter().any(|(k, _)| k.as_text() == Some(name)) {
                return Err(ProtocolError::invalid_structure(format!(
                    "{context}: repeated key {name:?}"
                )));
            }
        }

        Ok(Self {
            entries: entries.as_slice(),
            context,
        })
    }

    pub(crate) fn optional(&self, name: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_text() == Some(name))
            .map(|(_, v)| v)
    }

    pub(crate) fn required(&self, name: &str) -> ProtocolResult<&'a Value> {
        self.optional(name).ok_or_else(|| {
            ProtocolError::invalid_structure(format!("{}: missing {name}", self.context))
        })
    }

    pub(crate) fn u64(&self, name: &str) -> ProtocolResult<u64> {
        let value = self.required(name)?;
        value
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| self.wrong_type(name, "unsigned integer"))
    }

    pub(crate) fn optional_i64(&self, name: &str) -> ProtocolResult<Option<i64>> {
        match self.optional(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_integer()
                .and_then(|i| i64::try_from(i).ok())
                .map(Some)
                .ok_or_else(|| self.wrong_type(name, "integer")),
        }
    }

    pub(crate) fn array(&self, name: &str) -> ProtocolResult<&'a [Value]> {
        self.required(name)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.wrong_type(name, "array"))
    }

    pub(crate) fn optional_bytes(&self, name: &str) -> ProtocolResult<Option<&'a [u8]>> {
        match self.optional(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_bytes()
                .map(|b| Some(b.as_slice()))
                .ok_or_else(|| self.wrong_type(name, "byte string")),
        }
    }

    fn wrong_type(&self, name: &str, expected: &str) -> ProtocolError {
        ProtocolError::invalid_structure(format!(
            "{}: field {name} is not a {expected}",
            self.context
        ))
    }
}

/// Reads a signed code from a value, for enum discriminants.
pub(crate) fn code(value: &Value, kind: &'static str) -> ProtocolResult<i128> {
    value
        .as_integer()
        .map(i128::from)
        .ok_or_else(|| ProtocolError::invalid_structure(format!("{kind}: expected integer code")))
}
