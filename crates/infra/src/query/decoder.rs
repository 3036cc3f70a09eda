//! Job payload decoding.
//!
//! The index treats job payloads as opaque: a decoder either reconstructs the
//! invocation or fails, and a failure is never fatal to a listing.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use jobtags_core::TagIndexError;

/// Raw invocation fields as stored in the job record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationData {
    pub type_name: String,
    pub method: String,
    /// JSON array of parameter type names.
    pub parameter_types: String,
    /// JSON array of serialized arguments.
    pub arguments: String,
}

/// A reconstructed job invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedJob {
    pub type_name: String,
    pub method: String,
    pub parameter_types: Vec<String>,
    pub arguments: Vec<Value>,
}

/// Why a payload could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// The job type is no longer known (code removed or renamed).
    #[error("job type not found: {0}")]
    TypeNotFound(String),

    #[error("missing invocation field: {0}")]
    MissingField(&'static str),

    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

impl From<PayloadError> for TagIndexError {
    fn from(err: PayloadError) -> Self {
        TagIndexError::deserialization(err.to_string())
    }
}

/// Deserialize-or-fail over a job payload.
pub trait InvocationDecoder: Send + Sync {
    fn decode(&self, data: &InvocationData) -> Result<DecodedJob, PayloadError>;
}

impl<D> InvocationDecoder for Arc<D>
where
    D: InvocationDecoder + ?Sized,
{
    fn decode(&self, data: &InvocationData) -> Result<DecodedJob, PayloadError> {
        (**self).decode(data)
    }
}

/// Decoder for JSON-encoded parameter type and argument arrays.
///
/// With a registry of known types, any other type resolves to
/// [`PayloadError::TypeNotFound`]. Type names may be assembly-qualified
/// (`"Ns.Type, Assembly"`); only the part before the first comma is matched.
#[derive(Debug, Clone, Default)]
pub struct JsonInvocationDecoder {
    known_types: Option<HashSet<String>>,
}

impl JsonInvocationDecoder {
    /// Accept every job type.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_types<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            known_types: Some(
                types
                    .into_iter()
                    .map(|t| type_key(t.as_ref()).to_string())
                    .collect(),
            ),
        }
    }

    fn resolve(&self, type_name: &str) -> Result<(), PayloadError> {
        match &self.known_types {
            Some(known) if !known.contains(type_key(type_name)) => {
                Err(PayloadError::TypeNotFound(type_name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl InvocationDecoder for JsonInvocationDecoder {
    fn decode(&self, data: &InvocationData) -> Result<DecodedJob, PayloadError> {
        if data.type_name.trim().is_empty() {
            return Err(PayloadError::MissingField("Type"));
        }
        if data.method.trim().is_empty() {
            return Err(PayloadError::MissingField("Method"));
        }
        self.resolve(&data.type_name)?;

        let parameter_types: Vec<String> = json_array(&data.parameter_types, "ParameterTypes")?;
        let arguments: Vec<Value> = json_array(&data.arguments, "Arguments")?;

        if !arguments.is_empty() && arguments.len() != parameter_types.len() {
            return Err(PayloadError::Malformed {
                field: "Arguments",
                reason: format!(
                    "{} arguments for {} parameters",
                    arguments.len(),
                    parameter_types.len()
                ),
            });
        }

        Ok(DecodedJob {
            type_name: data.type_name.clone(),
            method: data.method.clone(),
            parameter_types,
            arguments,
        })
    }
}

fn type_key(type_name: &str) -> &str {
    type_name.split(',').next().unwrap_or_default().trim()
}

fn json_array<T>(raw: &str, field: &'static str) -> Result<Vec<T>, PayloadError>
where
    T: for<'de> Deserialize<'de>,
{
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| PayloadError::Malformed {
        field,
        reason: e.to_string(),
    })
}
