//! Inbound payload normalization
//!
//! Callers send certificate data in several shapes; everything is reduced
//! to a flat batch of items before issuance. Shape resolution is ordered:
//!
//! 1. An object with an `items` key holding an array is a wrapped batch.
//! 2. An object whose keys are exactly `"0", "1", ...` in order is a list
//!    that arrived encoded as an object.
//! 3. Any other object is a batch of one.
//!
//! A bare JSON array is a list. Bodies that fail to parse as JSON fall back
//! to form-urlencoded decoding, which produces an object and re-enters the
//! object rules. Scalars and bodies that decode as neither are rejected.

use acg_common::{Error, Result};
use serde_json::Value;

/// Which of the accepted payload shapes a request used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{"items": [...]}`
    Wrapped,
    /// A bare array, or an object with contiguous numeric keys
    List,
    /// A single object of placeholder variables
    Single,
}

/// A request body reduced to a flat batch of candidate items
#[derive(Debug)]
pub struct NormalizedBatch {
    pub shape: PayloadShape,
    pub items: Vec<Value>,
}

/// Reduce a raw request body to a normalized batch.
pub fn resolve(body: &[u8]) -> Result<NormalizedBatch> {
    let trimmed = body.trim_ascii();
    if trimmed.is_empty() {
        return Ok(NormalizedBatch {
            shape: PayloadShape::List,
            items: Vec::new(),
        });
    }

    match serde_json::from_slice::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(resolve_object(map)),
        Ok(Value::Array(items)) => Ok(NormalizedBatch {
            shape: PayloadShape::List,
            items,
        }),
        Ok(_) => Err(Error::InvalidPayload(
            "payload must be a JSON object or array".to_string(),
        )),
        Err(_) => resolve_form(trimmed),
    }
}

fn resolve_object(map: serde_json::Map<String, Value>) -> NormalizedBatch {
    if let Some(Value::Array(items)) = map.get("items") {
        return NormalizedBatch {
            shape: PayloadShape::Wrapped,
            items: items.clone(),
        };
    }

    if is_encoded_list(&map) {
        return NormalizedBatch {
            shape: PayloadShape::List,
            items: map.into_iter().map(|(_, value)| value).collect(),
        };
    }

    NormalizedBatch {
        shape: PayloadShape::Single,
        items: vec![Value::Object(map)],
    }
}

/// An object stands in for a list when its keys, in document order, are
/// exactly the canonical decimals `"0", "1", ...`. An empty object counts.
fn is_encoded_list(map: &serde_json::Map<String, Value>) -> bool {
    map.keys()
        .enumerate()
        .all(|(index, key)| *key == index.to_string())
}

/// Decode a non-JSON body as a form submission. Only bodies that look like
/// one (at least one `=` pair) are accepted; anything else is malformed.
fn resolve_form(body: &[u8]) -> Result<NormalizedBatch> {
    if !body.contains(&b'=') {
        return Err(Error::InvalidPayload(
            "request body is neither JSON nor form data".to_string(),
        ));
    }

    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| Error::InvalidPayload(format!("invalid form body: {e}")))?;

    let mut map = serde_json::Map::new();
    for (key, value) in pairs {
        map.insert(key, Value::String(value));
    }
    Ok(resolve_object(map))
}
