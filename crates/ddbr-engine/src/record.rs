//! Record decoding
//!
//! Every line of a data file is one exported record. FULL exports write
//! `{"Item": {...}}`; incremental exports write
//! `{"Keys": {...}, "NewImage"?: {...}, "OldImage"?: {...}}` and the
//! operation type falls out of which images are present. Attribute maps use
//! DynamoDB JSON: each value is a single-key object whose key names the type
//! (`S`, `N`, `B`, `BOOL`, `NULL`, `SS`, `NS`, `BS`, `M`, `L`).
//!
//! This is the CPU hot path of the restore: one JSON parse per line, then a
//! single walk of the resulting tree.

use std::collections::{HashMap, HashSet};

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use ddbr_common::{RestoreError, Result};

/// A decoded item or key: attribute name to typed value
pub type Item = HashMap<String, AttributeValue>;

/// One logical mutation to apply to the target table
///
/// Any re-execution is idempotent: a PUT overwrites, a DELETE of a missing
/// key is a no-op, and UPDATE SET/REMOVE clauses converge on the same item
/// state.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert or replace the item with this image
    Put { image: Item },
    /// Remove the item identified by this key
    Delete { key: Item },
    /// Modify the item identified by `key` from `old_image` to `new_image`
    Update {
        key: Item,
        new_image: Item,
        old_image: Item,
    },
}

/// Contract for decoding one line into an [`Operation`]
///
/// A `Corrupt` error means the line is unusable and should be counted and
/// skipped; it never fails the restore.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, line: &[u8]) -> Result<Operation>;
}

/// JSON decoder for both export line shapes
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordDecoder;

impl JsonRecordDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl RecordDecoder for JsonRecordDecoder {
    fn decode(&self, line: &[u8]) -> Result<Operation> {
        let value: Value = serde_json::from_slice(line).map_err(|_| RestoreError::Corrupt)?;
        let obj = value.as_object().ok_or(RestoreError::Corrupt)?;

        // FULL export shape
        if let Some(item) = obj.get("Item") {
            return Ok(Operation::Put {
                image: decode_item(item)?,
            });
        }

        // INCREMENTAL export shape
        let keys = match obj.get("Keys") {
            Some(v) => Some(decode_item(v)?),
            None => None,
        };
        let new_image = obj.get("NewImage").map(decode_item).transpose()?;
        let old_image = obj.get("OldImage").map(decode_item).transpose()?;

        match (new_image, old_image) {
            (Some(new_image), Some(old_image)) => Ok(Operation::Update {
                key: keys.ok_or(RestoreError::Corrupt)?,
                new_image,
                old_image,
            }),
            (Some(image), None) => Ok(Operation::Put { image }),
            (None, Some(_)) => Ok(Operation::Delete {
                key: keys.ok_or(RestoreError::Corrupt)?,
            }),
            (None, None) => Err(RestoreError::Corrupt),
        }
    }
}

/// Decode a DynamoDB JSON attribute map
pub fn decode_item(value: &Value) -> Result<Item> {
    let obj = value.as_object().ok_or(RestoreError::Corrupt)?;
    let mut item = Item::with_capacity(obj.len());
    for (name, attr) in obj {
        item.insert(name.clone(), decode_attr(attr)?);
    }
    Ok(item)
}

/// Decode a single DynamoDB JSON attribute value
fn decode_attr(value: &Value) -> Result<AttributeValue> {
    let obj = value.as_object().ok_or(RestoreError::Corrupt)?;
    if obj.len() != 1 {
        return Err(RestoreError::Corrupt);
    }
    let (tag, val) = obj.iter().next().ok_or(RestoreError::Corrupt)?;

    match tag.as_str() {
        "S" => Ok(AttributeValue::S(as_string(val)?)),
        // Numbers stay textual to preserve arbitrary precision
        "N" => Ok(AttributeValue::N(as_string(val)?)),
        "B" => Ok(AttributeValue::B(Blob::new(decode_base64(val)?))),
        "BOOL" => Ok(AttributeValue::Bool(
            val.as_bool().ok_or(RestoreError::Corrupt)?,
        )),
        "NULL" => {
            val.as_bool().ok_or(RestoreError::Corrupt)?;
            Ok(AttributeValue::Null(true))
        },
        "SS" => Ok(AttributeValue::Ss(dedup(string_seq(val)?))),
        "NS" => Ok(AttributeValue::Ns(dedup(string_seq(val)?))),
        "BS" => {
            let arr = val.as_array().ok_or(RestoreError::Corrupt)?;
            let mut seen = HashSet::with_capacity(arr.len());
            let mut blobs = Vec::with_capacity(arr.len());
            for entry in arr {
                let bytes = decode_base64(entry)?;
                if seen.insert(bytes.clone()) {
                    blobs.push(Blob::new(bytes));
                }
            }
            Ok(AttributeValue::Bs(blobs))
        },
        "M" => Ok(AttributeValue::M(decode_item(val)?)),
        "L" => {
            let arr = val.as_array().ok_or(RestoreError::Corrupt)?;
            let mut list = Vec::with_capacity(arr.len());
            for entry in arr {
                list.push(decode_attr(entry)?);
            }
            Ok(AttributeValue::L(list))
        },
        _ => Err(RestoreError::Corrupt),
    }
}

fn as_string(value: &Value) -> Result<String> {
    Ok(value.as_str().ok_or(RestoreError::Corrupt)?.to_string())
}

fn decode_base64(value: &Value) -> Result<Vec<u8>> {
    let encoded = value.as_str().ok_or(RestoreError::Corrupt)?;
    BASE64.decode(encoded).map_err(|_| RestoreError::Corrupt)
}

fn string_seq(value: &Value) -> Result<Vec<String>> {
    let arr = value.as_array().ok_or(RestoreError::Corrupt)?;
    let mut out = Vec::with_capacity(arr.len());
    for entry in arr {
        out.push(as_string(entry)?);
    }
    Ok(out)
}

/// Drop duplicate set members, keeping first occurrence order
fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(values.len());
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}
