//! Encoding of data and initialization payloads for the native side.
//!
//! The native library parses JSON itself; this layer only forwards either
//! inline JSON text or a file path as a C string. Several per-chain payloads
//! are joined with the separator byte reported by the loaded library.

use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Result, TinyStanError};

/// A JSON payload: inline text or a path to a JSON file.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonInput {
    Text(String),
    File(PathBuf),
}

impl JsonInput {
    /// Serialise a JSON value as inline text.
    pub fn from_value(value: &serde_json::Value) -> Self {
        JsonInput::Text(value.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, JsonInput::Text(text) if text.is_empty())
    }

    /// Bytes forwarded to the native layer.
    ///
    /// File inputs must be readable before they are handed over.
    pub(crate) fn to_bytes(&self, option: &'static str) -> Result<Vec<u8>> {
        match self {
            JsonInput::Text(text) => Ok(text.as_bytes().to_vec()),
            JsonInput::File(path) => {
                validate_readable(path)?;
                path.to_str()
                    .map(|p| p.as_bytes().to_vec())
                    .ok_or_else(|| {
                        TinyStanError::argument(
                            option,
                            format!("path '{}' is not valid UTF-8", path.display()),
                        )
                    })
            }
        }
    }
}

impl Default for JsonInput {
    fn default() -> Self {
        JsonInput::Text(String::new())
    }
}

impl From<&str> for JsonInput {
    fn from(text: &str) -> Self {
        JsonInput::Text(text.to_string())
    }
}

impl From<String> for JsonInput {
    fn from(text: String) -> Self {
        JsonInput::Text(text)
    }
}

impl From<&Path> for JsonInput {
    fn from(path: &Path) -> Self {
        JsonInput::File(path.to_path_buf())
    }
}

impl From<PathBuf> for JsonInput {
    fn from(path: PathBuf) -> Self {
        JsonInput::File(path)
    }
}

impl From<serde_json::Value> for JsonInput {
    fn from(value: serde_json::Value) -> Self {
        JsonInput::from_value(&value)
    }
}

impl From<&JsonInput> for JsonInput {
    fn from(input: &JsonInput) -> Self {
        input.clone()
    }
}

fn validate_readable(path: &Path) -> Result<()> {
    File::open(path)
        .map(|_| ())
        .map_err(|source| TinyStanError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
}

/// Initial values for each chain or path.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Inits {
    /// Let the native side draw random inits.
    #[default]
    None,
    /// One payload applied to every chain.
    Single(JsonInput),
    /// One payload per chain, in chain order.
    PerChain(Vec<JsonInput>),
}

impl Inits {
    /// Encode for a call running `count` chains (or paths).
    ///
    /// Returns `None` for the native "no inits" sentinel.
    pub(crate) fn encode(&self, count: usize, unit: &str, separator: u8) -> Result<Option<CString>> {
        match self {
            Inits::None => Ok(None),
            Inits::Single(init) => c_string("inits", init.to_bytes("inits")?).map(Some),
            Inits::PerChain(inits) => {
                if inits.len() != count {
                    return Err(TinyStanError::argument(
                        "inits",
                        format!(
                            "expected {count} entries (one per {unit}), got {}",
                            inits.len()
                        ),
                    ));
                }
                let mut joined = Vec::new();
                for (i, init) in inits.iter().enumerate() {
                    let bytes = init.to_bytes("inits")?;
                    if bytes.contains(&separator) {
                        return Err(TinyStanError::argument(
                            "inits",
                            format!("entry {i} contains the separator byte {separator:#04x}"),
                        ));
                    }
                    if i > 0 {
                        joined.push(separator);
                    }
                    joined.extend_from_slice(&bytes);
                }
                c_string("inits", joined).map(Some)
            }
        }
    }
}

impl From<JsonInput> for Inits {
    fn from(init: JsonInput) -> Self {
        Inits::Single(init)
    }
}

impl From<Vec<JsonInput>> for Inits {
    fn from(inits: Vec<JsonInput>) -> Self {
        Inits::PerChain(inits)
    }
}

/// Encode the model data; empty text becomes a null pointer.
pub(crate) fn encode_data(data: &JsonInput) -> Result<Option<CString>> {
    if data.is_empty() {
        return Ok(None);
    }
    c_string("data", data.to_bytes("data")?).map(Some)
}

/// Encode an optional single JSON payload.
pub(crate) fn encode_optional(option: &'static str, input: Option<&JsonInput>) -> Result<Option<CString>> {
    match input {
        Some(input) if !input.is_empty() => c_string(option, input.to_bytes(option)?).map(Some),
        _ => Ok(None),
    }
}

fn c_string(option: &'static str, bytes: Vec<u8>) -> Result<CString> {
    CString::new(bytes).map_err(|e| {
        TinyStanError::argument(
            option,
            format!("contains an interior NUL byte at position {}", e.nul_position()),
        )
    })
}
