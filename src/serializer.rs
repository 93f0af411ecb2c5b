//! Serialization layer. Defaults to JSON via serde_json.
//!
//! Implement [`Serializer`] if the document should be written differently
//! (sorted compact output, a trailing newline, etc.). The payload it returns is
//! also what the scheduler compares to detect no-op writes, so it must be
//! deterministic for equal documents.

use crate::error::{Error, Result};
use crate::Document;
use serde_json::Value;

/// Converts the document to/from bytes for persistence.
pub trait Serializer: Send + Sync {
    /// Encode the whole document.
    fn serialize(&self, doc: &Document) -> Result<Vec<u8>>;

    /// Decode bytes back into a document. Anything other than a JSON object is
    /// an error.
    fn deserialize(&self, bytes: &[u8]) -> Result<Document>;
}

/// JSON serializer with optional pretty-printing.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Compact JSON (single line, no extra whitespace).
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-printed JSON with two-space indentation.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, doc: &Document) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(doc)
        } else {
            serde_json::to_vec(doc)
        };
        bytes.map_err(|e| Error::Serialize(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Document> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::Deserialize(format!(
                "expected a JSON object, found {}",
                kind(&other)
            ))),
        }
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
