//! Revocation list status entries

use serde_json::Value;
use url::Url;

use crate::error::{AccessGrantError, Result};

/// Status type understood by the issuer's status service
pub const REVOCATION_LIST_2020_STATUS: &str = "RevocationList2020Status";

/// Pointer into a revocation list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Status {
    /// Status entry identifier
    pub identifier: Url,

    /// Revocation list credential holding the bit
    pub credential: Url,

    /// Position of this credential's bit in the list
    pub index: u32,

    /// Status type, e.g. `RevocationList2020Status`
    pub status_type: String,
}

impl Status {
    /// Create a status entry
    pub fn new(identifier: Url, status_type: impl Into<String>, credential: Url, index: u32) -> Self {
        Self {
            identifier,
            credential,
            index,
            status_type: status_type.into(),
        }
    }

    /// Read a `credentialStatus` object.
    ///
    /// Returns `Ok(None)` for status types other than
    /// `RevocationList2020Status` and fails when a revocation list entry is
    /// incomplete.
    pub fn from_json(value: &Value) -> Result<Option<Self>> {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };

        let is_revocation_list = object.get("type").is_some_and(|t| match t {
            Value::String(s) => s == REVOCATION_LIST_2020_STATUS,
            Value::Array(items) => items
                .iter()
                .any(|i| i.as_str() == Some(REVOCATION_LIST_2020_STATUS)),
            _ => false,
        });
        if !is_revocation_list {
            return Ok(None);
        }

        let identifier = object
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Url::parse(s).ok())
            .ok_or_else(|| AccessGrantError::invalid("Missing or invalid credentialStatus id"))?;

        let credential = object
            .get("revocationListCredential")
            .and_then(Value::as_str)
            .and_then(|s| Url::parse(s).ok())
            .ok_or_else(|| {
                AccessGrantError::invalid("Missing or invalid revocationListCredential")
            })?;

        let index = match object.get("revocationListIndex") {
            Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        }
        .ok_or_else(|| AccessGrantError::invalid("Missing or invalid revocationListIndex"))?;

        Ok(Some(Status::new(
            identifier,
            REVOCATION_LIST_2020_STATUS,
            credential,
            index,
        )))
    }
}
