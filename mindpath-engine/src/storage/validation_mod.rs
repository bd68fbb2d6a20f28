// src/storage/validation_mod.rs
// Validation Layer - checks password documents before they are stored

use std::collections::HashSet;

use grid_engine::{GridBounds, GridError};
use serde_json::Value;

use super::storage_mod::PasswordDocument;

/// Validation errors
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid format: {field} - {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Value out of range: {field} - {value}")]
    OutOfRange { field: String, value: String },

    #[error("Invalid type: {field} - expected {expected}, got {actual}")]
    InvalidType { field: String, expected: String, actual: String },
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// All error messages joined for a single `ValidationFailed`.
    pub fn summary(&self) -> String {
        self.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
    }
}

/// Check a document against the board it will be drawn on.
pub fn validate_document(doc: &PasswordDocument, bounds: &GridBounds) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if doc.id < 0 {
        errors.push(ValidationError::OutOfRange { field: "_id".to_string(), value: doc.id.to_string() });
    }

    if doc.moves.is_empty() {
        errors.push(ValidationError::RequiredFieldMissing { field: "moves".to_string() });
    }

    match doc.template().check_bounds(bounds) {
        Ok(_) => {
            // Revisits are legal for user-drawn paths but never produced by the generator.
            let nodes = doc.template().nodes();
            let distinct: HashSet<_> = nodes.iter().collect();
            if distinct.len() != nodes.len() {
                warnings.push(format!("path for {} revisits a node", doc.id));
            }
        }
        Err(GridError::OutOfBounds { node, .. }) if node == doc.start => {
            errors.push(ValidationError::OutOfRange { field: "start".to_string(), value: node.to_string() });
        }
        Err(e) => {
            errors.push(ValidationError::InvalidFormat { field: "moves".to_string(), reason: e.to_string() });
        }
    }

    ValidationResult { valid: errors.is_empty(), errors, warnings }
}

/// Decode a client payload into a document, naming the offending field.
pub fn document_from_value(value: &Value) -> Result<PasswordDocument, ValidationError> {
    let obj = value.as_object().ok_or_else(|| ValidationError::InvalidType {
        field: "document".to_string(),
        expected: "object".to_string(),
        actual: json_type(value).to_string(),
    })?;

    for field in ["_id", "start", "moves"] {
        if !obj.contains_key(field) {
            return Err(ValidationError::RequiredFieldMissing { field: field.to_string() });
        }
    }

    serde_json::from_value(value.clone()).map_err(|e| ValidationError::InvalidFormat {
        field: "document".to_string(),
        reason: e.to_string(),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
