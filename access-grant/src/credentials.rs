//! Access Credential types
//!
//! Implements the three credential variants carried in a verifiable
//! presentation:
//! 1. Grant: the resource controller consented to an agent's access
//! 2. Request: an agent asks for access
//! 3. Denial: the resource controller refused a request
//!
//! Documents are validated once at parse time. The original serialization is
//! kept byte-for-byte so it can be re-sent to the verifier and status services.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;
use url::Url;

use crate::{
    error::{AccessGrantError, Result},
    status::Status,
    uri::matches_type,
    ACCESS_DENIAL_TYPE, ACCESS_GRANT_TYPE, ACCESS_REQUEST_TYPE, VC_CONTEXT_URI,
};

const VERIFIABLE_PRESENTATION: &str = "VerifiablePresentation";
const VERIFIABLE_CREDENTIAL: &str = "VerifiableCredential";

/// Credential variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CredentialKind {
    /// Access Grant
    Grant,

    /// Access Request
    Request,

    /// Access Denial
    Denial,
}

impl CredentialKind {
    /// All variants, in declaration order
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::Grant,
        CredentialKind::Request,
        CredentialKind::Denial,
    ];

    /// Unqualified credential type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Grant => ACCESS_GRANT_TYPE,
            Self::Request => ACCESS_REQUEST_TYPE,
            Self::Denial => ACCESS_DENIAL_TYPE,
        }
    }

    /// Key of the consent block inside `credentialSubject`
    pub fn consent_keyword(&self) -> &'static str {
        match self {
            Self::Grant | Self::Denial => "providedConsent",
            Self::Request => "hasConsent",
        }
    }

    /// GConsent status recorded when issuing this variant
    pub fn consent_status(&self) -> &'static str {
        match self {
            Self::Grant => "https://w3id.org/GConsent#ConsentStatusExplicitlyGiven",
            Self::Request => "https://w3id.org/GConsent#ConsentStatusRequested",
            Self::Denial => "https://w3id.org/GConsent#ConsentStatusDenied",
        }
    }

    /// Match a credential type, qualified or not
    pub fn from_type(type_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| matches_type(type_name, kind.type_name()))
    }

    fn recipient_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Grant | Self::Denial => {
                &["isProvidedToPerson", "isProvidedToController", "isProvidedTo"]
            }
            Self::Request => &["isConsentForDataSubject"],
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Fields shared by every credential variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialData {
    kind: CredentialKind,
    identifier: Url,
    issuer: Url,
    types: BTreeSet<String>,
    modes: BTreeSet<String>,
    purposes: BTreeSet<Url>,
    resources: BTreeSet<Url>,
    expiration: Option<DateTime<Utc>>,
    issued_at: Option<DateTime<Utc>>,
    creator: Url,
    recipient: Option<Url>,
    status: Option<Status>,
    raw: String,
}

impl CredentialData {
    /// Variant of this credential
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Dereferenceable credential identifier
    pub fn identifier(&self) -> &Url {
        &self.identifier
    }

    /// Issuer of the credential
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    /// Declared credential types
    pub fn types(&self) -> &BTreeSet<String> {
        &self.types
    }

    /// Access modes (Read, Write, Append, Control)
    pub fn modes(&self) -> &BTreeSet<String> {
        &self.modes
    }

    /// Purposes the access is scoped to
    pub fn purposes(&self) -> &BTreeSet<Url> {
        &self.purposes
    }

    /// Resources the access is scoped to
    pub fn resources(&self) -> &BTreeSet<Url> {
        &self.resources
    }

    /// Expiration, if the credential declares one
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    /// Issuance date, if the credential declares one
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Agent that asserted the consent
    pub fn creator(&self) -> &Url {
        &self.creator
    }

    /// Agent the consent is for
    pub fn recipient(&self) -> Option<&Url> {
        self.recipient.as_ref()
    }

    /// Revocation list entry
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Check if the credential is past its expiration
    pub fn is_expired(&self) -> bool {
        self.expiration.is_some_and(|exp| exp < Utc::now())
    }

    /// The original serialized document
    pub fn serialize(&self) -> &str {
        &self.raw
    }
}

/// Access Credential of any variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessCredential {
    /// Access Grant
    Grant(AccessGrant),

    /// Access Request
    Request(AccessRequest),

    /// Access Denial
    Denial(AccessDenial),
}

impl AccessCredential {
    /// Parse a verifiable presentation holding exactly one access credential.
    ///
    /// Every violated invariant is reported in the returned error.
    pub fn parse(input: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(input).map_err(|e| {
            AccessGrantError::invalid(format!("Unable to read access credential: {}", e))
        })?;
        Self::from_document(input.to_string(), &document)
    }

    /// Parse a response body that holds either a presentation or a bare
    /// credential. A bare credential is wrapped in a presentation, which then
    /// becomes the raw form.
    pub fn from_response(body: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(body).map_err(|e| {
            AccessGrantError::invalid(format!("Unable to read access credential: {}", e))
        })?;
        Self::from_value(document, Some(body))
    }

    pub(crate) fn from_value(document: Value, raw: Option<&str>) -> Result<Self> {
        if has_type(&document, VERIFIABLE_PRESENTATION) {
            let raw = match raw {
                Some(raw) => raw.to_string(),
                None => serde_json::to_string(&document)?,
            };
            return Self::from_document(raw, &document);
        }

        let wrapped = json!({
            "@context": [VC_CONTEXT_URI],
            "type": [VERIFIABLE_PRESENTATION],
            "verifiableCredential": [document],
        });
        let raw = serde_json::to_string(&wrapped)?;
        Self::from_document(raw, &wrapped)
    }

    fn from_document(raw: String, document: &Value) -> Result<Self> {
        if !has_type(document, VERIFIABLE_PRESENTATION) {
            return Err(AccessGrantError::invalid(
                "missing VerifiablePresentation type",
            ));
        }

        let candidates: Vec<&Map<String, Value>> = as_values(document.get("verifiableCredential"))
            .into_iter()
            .filter_map(Value::as_object)
            .filter(|vc| {
                as_strings(vc.get("type"))
                    .iter()
                    .any(|t| CredentialKind::from_type(t).is_some())
            })
            .collect();

        let [vc] = candidates.as_slice() else {
            return Err(AccessGrantError::invalid(
                "ambiguous number of verifiable credentials",
            ));
        };

        let data = CredentialData::from_credential(raw, vc)?;
        Ok(match data.kind {
            CredentialKind::Grant => AccessCredential::Grant(AccessGrant(data)),
            CredentialKind::Request => AccessCredential::Request(AccessRequest(data)),
            CredentialKind::Denial => AccessCredential::Denial(AccessDenial(data)),
        })
    }

    /// Shared credential fields
    pub fn data(&self) -> &CredentialData {
        match self {
            Self::Grant(c) => &c.0,
            Self::Request(c) => &c.0,
            Self::Denial(c) => &c.0,
        }
    }
}

impl Deref for AccessCredential {
    type Target = CredentialData;

    fn deref(&self) -> &CredentialData {
        self.data()
    }
}

impl CredentialData {
    fn from_credential(raw: String, vc: &Map<String, Value>) -> Result<Self> {
        let mut violations = Vec::new();

        let types: BTreeSet<String> = as_strings(vc.get("type")).into_iter().collect();
        if !types.contains(VERIFIABLE_CREDENTIAL) {
            violations.push("missing VerifiableCredential type".to_string());
        }

        let kinds: BTreeSet<CredentialKind> = types
            .iter()
            .filter_map(|t| CredentialKind::from_type(t))
            .collect();
        let kind = match kinds.iter().collect::<Vec<_>>().as_slice() {
            [kind] => **kind,
            _ => {
                return Err(AccessGrantError::invalid(
                    "credential must declare exactly one access credential type",
                ))
            }
        };

        let issuer = issuer_uri(vc.get("issuer"));
        if issuer.is_none() {
            violations.push("missing or invalid issuer field".to_string());
        }

        let identifier = as_uri(vc.get("id"));
        if identifier.is_none() {
            violations.push("missing or invalid id field".to_string());
        }

        let expiration = as_instant(vc.get("expirationDate"), "expirationDate", &mut violations);
        let issued_at = as_instant(vc.get("issuanceDate"), "issuanceDate", &mut violations);

        let status = match vc.get("credentialStatus") {
            Some(value) => match Status::from_json(value) {
                Ok(status) => status,
                Err(AccessGrantError::InvalidCredential { message, .. }) => {
                    violations.push(message);
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let subject = vc.get("credentialSubject").and_then(Value::as_object);
        let creator = subject.and_then(|s| as_uri(s.get("id")));
        if subject.is_none() {
            violations.push("missing or invalid credentialSubject field".to_string());
        } else if creator.is_none() {
            violations.push("missing or invalid credentialSubject.id field".to_string());
        }

        let keyword = kind.consent_keyword();
        let consent = subject.and_then(|s| s.get(keyword)).and_then(Value::as_object);

        let mut modes = BTreeSet::new();
        let mut resources = BTreeSet::new();
        let mut purposes = BTreeSet::new();
        let mut recipient = None;

        match consent {
            None if subject.is_some() => {
                violations.push(format!("missing consent clause ({})", keyword));
            }
            None => {}
            Some(consent) => {
                if !consent.contains_key("mode") {
                    violations.push("consent clause is missing mode".to_string());
                }
                if !consent.contains_key("forPersonalData") {
                    violations.push("consent clause is missing forPersonalData".to_string());
                }

                modes = as_strings(consent.get("mode")).into_iter().collect();
                resources = as_uris(consent.get("forPersonalData"), "forPersonalData", &mut violations);
                purposes = as_uris(consent.get("forPurpose"), "forPurpose", &mut violations);
                recipient = kind
                    .recipient_keys()
                    .iter()
                    .find_map(|key| as_uri(consent.get(*key)));

                if kind == CredentialKind::Grant && recipient.is_none() {
                    violations.push("access grant is missing a recipient".to_string());
                }
            }
        }

        match (issuer, identifier, creator) {
            (Some(issuer), Some(identifier), Some(creator)) if violations.is_empty() => Ok(Self {
                kind,
                identifier,
                issuer,
                types,
                modes,
                purposes,
                resources,
                expiration,
                issued_at,
                creator,
                recipient,
                status,
                raw,
            }),
            _ => {
                warn!(kind = %kind, violations = violations.len(), "Rejected access credential");
                Err(AccessGrantError::InvalidCredential {
                    message: format!("invalid {}: {}", kind, violations.join("; ")),
                    violations,
                })
            }
        }
    }
}

/// A concrete credential type the client can return
pub trait CredentialVariant: Sized + Clone + fmt::Debug + Send + Sync + 'static {
    /// Variant tag, or `None` when any variant is accepted
    const KIND: Option<CredentialKind>;

    /// Narrow a parsed credential to this type
    fn from_credential(credential: AccessCredential) -> Result<Self>;

    /// Shared credential fields
    fn data(&self) -> &CredentialData;
}

impl CredentialVariant for AccessCredential {
    const KIND: Option<CredentialKind> = None;

    fn from_credential(credential: AccessCredential) -> Result<Self> {
        Ok(credential)
    }

    fn data(&self) -> &CredentialData {
        AccessCredential::data(self)
    }
}

macro_rules! credential_variant {
    ($(#[$meta:meta])* $name:ident, $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(CredentialData);

        impl $name {
            /// Parse a serialized presentation as this variant
            pub fn parse(input: &str) -> Result<Self> {
                Self::from_credential(AccessCredential::parse(input)?)
            }
        }

        impl Deref for $name {
            type Target = CredentialData;

            fn deref(&self) -> &CredentialData {
                &self.0
            }
        }

        impl From<$name> for AccessCredential {
            fn from(credential: $name) -> Self {
                AccessCredential::$kind(credential)
            }
        }

        impl CredentialVariant for $name {
            const KIND: Option<CredentialKind> = Some(CredentialKind::$kind);

            fn from_credential(credential: AccessCredential) -> Result<Self> {
                match credential {
                    AccessCredential::$kind(c) => Ok(c),
                    other => Err(AccessGrantError::TypeMismatch {
                        expected: CredentialKind::$kind,
                        actual: other.kind(),
                    }),
                }
            }

            fn data(&self) -> &CredentialData {
                &self.0
            }
        }
    };
}

credential_variant!(
    /// Consent given by a resource controller to a recipient
    AccessGrant,
    Grant
);
credential_variant!(
    /// Request for access, awaiting a grant or denial
    AccessRequest,
    Request
);
credential_variant!(
    /// Refusal of an access request
    AccessDenial,
    Denial
);

impl AccessGrant {
    /// Agent that received the grant
    pub fn grantee(&self) -> Option<&Url> {
        self.recipient()
    }

    /// Agent that gave the grant
    pub fn grantor(&self) -> &Url {
        self.creator()
    }
}

fn has_type(value: &Value, type_name: &str) -> bool {
    as_strings(value.get("type")).iter().any(|t| t == type_name)
}

fn as_values(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn as_strings(value: Option<&Value>) -> Vec<String> {
    as_values(value)
        .into_iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn as_uri(value: Option<&Value>) -> Option<Url> {
    value.and_then(Value::as_str).and_then(|s| Url::parse(s).ok())
}

fn issuer_uri(value: Option<&Value>) -> Option<Url> {
    match value {
        Some(Value::Object(issuer)) => as_uri(issuer.get("id")),
        other => as_uri(other),
    }
}

fn as_uris(value: Option<&Value>, field: &str, violations: &mut Vec<String>) -> BTreeSet<Url> {
    let mut uris = BTreeSet::new();
    for item in as_strings(value) {
        match Url::parse(&item) {
            Ok(uri) => {
                uris.insert(uri);
            }
            Err(_) => violations.push(format!("invalid {} value: {}", field, item)),
        }
    }
    uris
}

fn as_instant(
    value: Option<&Value>,
    field: &str,
    violations: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let text = value?.as_str();
    match text.map(DateTime::parse_from_rfc3339) {
        Some(Ok(instant)) => Some(instant.with_timezone(&Utc)),
        _ => {
            violations.push(format!("invalid {} field", field));
            None
        }
    }
}
