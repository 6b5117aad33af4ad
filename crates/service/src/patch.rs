//! JSON-Patch style edits to a dimension's option list.
//!
//! Only two operations exist, both on the path `/options/-`:
//!
//! ```json
//! [
//!   {"op": "remove", "path": "/options/-", "value": ["33"]},
//!   {"op": "add",    "path": "/options/-", "value": ["29", "30"]}
//! ]
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only path a patch operation may target.
pub const OPTIONS_PATH: &str = "/options/-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
}

impl PatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Vec<String>,
}

impl PatchOperation {
    pub fn add<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        Self::new(PatchOp::Add, values)
    }

    pub fn remove<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        Self::new(PatchOp::Remove, values)
    }

    fn new<I: IntoIterator<Item = S>, S: Into<String>>(op: PatchOp, values: I) -> Self {
        Self {
            op,
            path: OPTIONS_PATH.to_string(),
            value: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Whole-request rejections; none of the operations is applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("patch body is not a valid list of operations: {0}")]
    Malformed(String),

    #[error("patch contains no operations")]
    Empty,

    #[error("operation {index}: op '{op}' not supported, expected 'add' or 'remove'")]
    UnsupportedOp { index: usize, op: String },

    #[error("operation {index}: path '{path}' not supported, expected '/options/-'")]
    UnsupportedPath { index: usize, path: String },

    #[error("operation {index}: value must be a list of option ids")]
    InvalidValue { index: usize },

    #[error("patch names {actual} options, the maximum is {max}")]
    TooManyOptions { max: usize, actual: usize },
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    #[serde(default)]
    op: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    value: serde_json::Value,
}

/// Parse and validate a patch body.
///
/// Rejects the whole request on an unknown op, a path other than
/// [`OPTIONS_PATH`], a non-list value, or more than `max_options` option
/// ids in total across all operations.
pub fn parse_patch(body: &[u8], max_options: usize) -> Result<Vec<PatchOperation>, PatchError> {
    let raw: Vec<RawOperation> =
        serde_json::from_slice(body).map_err(|e| PatchError::Malformed(e.to_string()))?;
    if raw.is_empty() {
        return Err(PatchError::Empty);
    }

    let mut operations = Vec::with_capacity(raw.len());
    for (index, item) in raw.into_iter().enumerate() {
        let op = match item.op.as_str() {
            "add" => PatchOp::Add,
            "remove" => PatchOp::Remove,
            other => {
                return Err(PatchError::UnsupportedOp {
                    index,
                    op: other.to_string(),
                })
            }
        };
        if item.path != OPTIONS_PATH {
            return Err(PatchError::UnsupportedPath {
                index,
                path: item.path,
            });
        }
        let value: Vec<String> =
            serde_json::from_value(item.value).map_err(|_| PatchError::InvalidValue { index })?;
        operations.push(PatchOperation {
            op,
            path: item.path,
            value,
        });
    }

    check_size(&operations, max_options)?;
    Ok(operations)
}

/// Total option ids across `operations` must not exceed `max_options`.
pub fn check_size(operations: &[PatchOperation], max_options: usize) -> Result<(), PatchError> {
    let actual: usize = operations.iter().map(|o| o.value.len()).sum();
    if actual > max_options {
        return Err(PatchError::TooManyOptions {
            max: max_options,
            actual,
        });
    }
    Ok(())
}
