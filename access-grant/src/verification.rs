//! Credential Verification
//!
//! Request and response bodies for the issuer's verifier service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Verification Request
///
/// Carries the embedded credential, not the whole presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    /// Credential to verify
    pub verifiable_credential: Value,
}

impl VerificationRequest {
    /// Build a request from a serialized presentation
    pub fn from_presentation(raw: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(raw)?;
        let verifiable_credential = match document.get("verifiableCredential") {
            Some(Value::Array(items)) if items.len() == 1 => items[0].clone(),
            Some(Value::Object(_)) => document["verifiableCredential"].clone(),
            _ => document,
        };
        Ok(Self {
            verifiable_credential,
        })
    }
}

/// Verification Result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Checks the verifier performed
    #[serde(default)]
    pub checks: Vec<String>,

    /// Non-fatal findings
    #[serde(default)]
    pub warnings: Vec<String>,

    /// Fatal findings
    #[serde(default)]
    pub errors: Vec<String>,
}

impl VerificationResult {
    /// Check if the verifier reported no errors
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
