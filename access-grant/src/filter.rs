//! Credential filters and queries
//!
//! [`CredentialFilter`] renders a paginated search as a query string.
//! [`AccessCredentialQuery`] renders a lookup as a derivation request body.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;
use url::Url;

use crate::{
    credentials::{CredentialKind, CredentialVariant},
    error::{AccessGrantError, Result},
    DEFAULT_PAGE_SIZE, INRUPT_CONTEXT_URI, MAX_PAGE_SIZE, VC_CONTEXT_URI,
};

/// Lifecycle state used to filter a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialStatus {
    /// Request awaiting an answer
    Pending,
    /// Request was denied
    Denied,
    /// Request was granted
    Granted,
    /// Request was withdrawn
    Canceled,
    /// Past its expiration date
    Expired,
    /// Grant currently in effect
    Active,
    /// Grant was revoked
    Revoked,
}

impl CredentialStatus {
    /// Query-string value
    pub fn value(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Denied => "Denied",
            Self::Granted => "Granted",
            Self::Canceled => "Canceled",
            Self::Expired => "Expired",
            Self::Active => "Active",
            Self::Revoked => "Revoked",
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Time window used to filter by issuance or revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialDuration {
    /// One day
    P1D,
    /// Seven days
    P7D,
    /// One month (30 days)
    P1M,
    /// Three months (90 days)
    P3M,
}

impl CredentialDuration {
    /// Fixed length of the window
    pub fn as_duration(&self) -> chrono::Duration {
        match self {
            Self::P1D => chrono::Duration::days(1),
            Self::P7D => chrono::Duration::days(7),
            Self::P1M => chrono::Duration::days(30),
            Self::P3M => chrono::Duration::days(90),
        }
    }

    /// Query-string value
    pub fn name(&self) -> &'static str {
        match self {
            Self::P1D => "P1D",
            Self::P7D => "P7D",
            Self::P1M => "P1M",
            Self::P3M => "P3M",
        }
    }
}

impl fmt::Display for CredentialDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Search filter for credentials of type `T`
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialFilter<T> {
    from_agent: Option<Url>,
    to_agent: Option<Url>,
    status: Option<CredentialStatus>,
    resource: Option<Url>,
    purpose: Option<Url>,
    issued_within: Option<CredentialDuration>,
    revoked_within: Option<CredentialDuration>,
    page: Option<String>,
    page_size: i32,
    credential_type: PhantomData<fn() -> T>,
}

impl<T: CredentialVariant> CredentialFilter<T> {
    /// Start an empty filter
    pub fn builder() -> CredentialFilterBuilder<T> {
        CredentialFilterBuilder::default()
    }

    /// Start a builder pre-filled with this filter's values
    pub fn to_builder(&self) -> CredentialFilterBuilder<T> {
        CredentialFilterBuilder {
            from_agent: self.from_agent.clone(),
            to_agent: self.to_agent.clone(),
            status: self.status,
            resource: self.resource.clone(),
            purpose: self.purpose.clone(),
            issued_within: self.issued_within,
            revoked_within: self.revoked_within,
            page: self.page.clone(),
            page_size: self.page_size,
            credential_type: PhantomData,
        }
    }

    /// Agent that created the credential
    pub fn from_agent(&self) -> Option<&Url> {
        self.from_agent.as_ref()
    }

    /// Agent the credential is for
    pub fn to_agent(&self) -> Option<&Url> {
        self.to_agent.as_ref()
    }

    /// Lifecycle state
    pub fn status(&self) -> Option<CredentialStatus> {
        self.status
    }

    /// Target resource
    pub fn resource(&self) -> Option<&Url> {
        self.resource.as_ref()
    }

    /// Purpose
    pub fn purpose(&self) -> Option<&Url> {
        self.purpose.as_ref()
    }

    /// Issuance window
    pub fn issued_within(&self) -> Option<CredentialDuration> {
        self.issued_within
    }

    /// Revocation window
    pub fn revoked_within(&self) -> Option<CredentialDuration> {
        self.revoked_within
    }

    /// Opaque page token
    pub fn page(&self) -> Option<&str> {
        self.page.as_deref()
    }

    /// Items per page
    pub fn page_size(&self) -> i32 {
        self.page_size
    }

    /// Variant this filter searches for
    pub fn credential_kind(&self) -> Option<CredentialKind> {
        T::KIND
    }

    /// Render this filter as a query on `base`.
    ///
    /// Fails when `T` does not name a single credential variant.
    pub fn as_url(&self, base: &Url) -> Result<Url> {
        let kind = T::KIND.ok_or_else(|| {
            AccessGrantError::UnsupportedOperation(
                "a credential filter requires a concrete credential type".to_string(),
            )
        })?;

        let mut url = base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("type", kind.type_name());
            query.append_pair("pageSize", &self.page_size.to_string());
            if let Some(purpose) = &self.purpose {
                query.append_pair("purpose", purpose.as_str());
            }
            if let Some(resource) = &self.resource {
                query.append_pair("resource", resource.as_str());
            }
            if let Some(agent) = &self.from_agent {
                query.append_pair("fromAgent", agent.as_str());
            }
            if let Some(agent) = &self.to_agent {
                query.append_pair("toAgent", agent.as_str());
            }
            if let Some(status) = self.status {
                query.append_pair("status", status.value());
            }
            if let Some(window) = self.issued_within {
                query.append_pair("issuedWithin", window.name());
            }
            if let Some(window) = self.revoked_within {
                query.append_pair("revokedWithin", window.name());
            }
            if let Some(page) = &self.page {
                query.append_pair("page", page);
            }
        }
        Ok(url)
    }

    /// Derive the filter for another page
    pub fn with_page(&self, page: impl Into<String>) -> Self {
        self.to_builder().page(page).build()
    }
}

/// Builder for [`CredentialFilter`]
#[derive(Debug, Clone)]
pub struct CredentialFilterBuilder<T> {
    from_agent: Option<Url>,
    to_agent: Option<Url>,
    status: Option<CredentialStatus>,
    resource: Option<Url>,
    purpose: Option<Url>,
    issued_within: Option<CredentialDuration>,
    revoked_within: Option<CredentialDuration>,
    page: Option<String>,
    page_size: i32,
    credential_type: PhantomData<fn() -> T>,
}

impl<T> Default for CredentialFilterBuilder<T> {
    fn default() -> Self {
        Self {
            from_agent: None,
            to_agent: None,
            status: None,
            resource: None,
            purpose: None,
            issued_within: None,
            revoked_within: None,
            page: None,
            page_size: DEFAULT_PAGE_SIZE,
            credential_type: PhantomData,
        }
    }
}

impl<T: CredentialVariant> CredentialFilterBuilder<T> {
    /// Filter by creator
    pub fn from_agent(mut self, agent: Url) -> Self {
        self.from_agent = Some(agent);
        self
    }

    /// Filter by recipient
    pub fn to_agent(mut self, agent: Url) -> Self {
        self.to_agent = Some(agent);
        self
    }

    /// Filter by lifecycle state
    pub fn status(mut self, status: CredentialStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by resource
    pub fn resource(mut self, resource: Url) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Filter by purpose
    pub fn purpose(mut self, purpose: Url) -> Self {
        self.purpose = Some(purpose);
        self
    }

    /// Filter by issuance window
    pub fn issued_within(mut self, window: CredentialDuration) -> Self {
        self.issued_within = Some(window);
        self
    }

    /// Filter by revocation window
    pub fn revoked_within(mut self, window: CredentialDuration) -> Self {
        self.revoked_within = Some(window);
        self
    }

    /// Select a page
    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    /// Set the page size. Values outside `1..=100` fall back to the default.
    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = if page_size > 0 && page_size <= MAX_PAGE_SIZE {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };
        self
    }

    /// Build the filter
    pub fn build(self) -> CredentialFilter<T> {
        CredentialFilter {
            from_agent: self.from_agent,
            to_agent: self.to_agent,
            status: self.status,
            resource: self.resource,
            purpose: self.purpose,
            issued_within: self.issued_within,
            revoked_within: self.revoked_within,
            page: self.page,
            page_size: self.page_size,
            credential_type: PhantomData,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone)]
pub struct CredentialResult<T> {
    items: Vec<T>,
    first: Option<CredentialFilter<T>>,
    prev: Option<CredentialFilter<T>>,
    next: Option<CredentialFilter<T>>,
    last: Option<CredentialFilter<T>>,
}

impl<T: CredentialVariant> CredentialResult<T> {
    /// Create a result page
    pub fn new(
        items: Vec<T>,
        first: Option<CredentialFilter<T>>,
        prev: Option<CredentialFilter<T>>,
        next: Option<CredentialFilter<T>>,
        last: Option<CredentialFilter<T>>,
    ) -> Self {
        Self {
            items,
            first,
            prev,
            next,
            last,
        }
    }

    /// Build a result page, deriving page filters from `Link` header values
    pub fn from_links<'a>(
        items: Vec<T>,
        filter: &CredentialFilter<T>,
        links: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut result = Self::new(items, None, None, None, None);
        for header in links {
            for (rel, target) in parse_link_header(header) {
                let Some(page) = target
                    .query_pairs()
                    .find(|(name, _)| name == "page")
                    .map(|(_, value)| value.into_owned())
                else {
                    continue;
                };
                let derived = Some(filter.with_page(page));
                match rel.as_str() {
                    "first" => result.first = derived,
                    "prev" | "previous" => result.prev = derived,
                    "next" => result.next = derived,
                    "last" => result.last = derived,
                    _ => {}
                }
            }
        }
        result
    }

    /// Items on this page
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Take ownership of the items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Filter for the first page
    pub fn first_page(&self) -> Option<&CredentialFilter<T>> {
        self.first.as_ref()
    }

    /// Filter for the previous page
    pub fn prev_page(&self) -> Option<&CredentialFilter<T>> {
        self.prev.as_ref()
    }

    /// Filter for the next page
    pub fn next_page(&self) -> Option<&CredentialFilter<T>> {
        self.next.as_ref()
    }

    /// Filter for the last page
    pub fn last_page(&self) -> Option<&CredentialFilter<T>> {
        self.last.as_ref()
    }
}

/// Split an RFC 8288 `Link` header into `(rel, target)` pairs
fn parse_link_header(header: &str) -> Vec<(String, Url)> {
    let mut links = Vec::new();
    let mut rest = header;

    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>').map(|e| start + e) else {
            break;
        };
        let target = &rest[start + 1..end];
        let params_end = rest[end..].find('<').map_or(rest.len(), |n| end + n);
        let params = &rest[end + 1..params_end];
        rest = &rest[params_end..];

        let Ok(target) = Url::parse(target.trim()) else {
            continue;
        };

        for param in params.split(';') {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case("rel") {
                continue;
            }
            let value = value.trim().trim_end_matches(',').trim().trim_matches('"');
            for rel in value.split_whitespace() {
                links.push((rel.to_ascii_lowercase(), target.clone()));
            }
        }
    }

    links
}

/// Lookup of credentials of type `T` through the derivation service
#[derive(Debug, Clone, PartialEq)]
pub struct AccessCredentialQuery<T> {
    resource: Option<Url>,
    creator: Option<Url>,
    recipient: Option<Url>,
    purposes: BTreeSet<Url>,
    modes: BTreeSet<String>,
    credential_type: PhantomData<fn() -> T>,
}

impl<T: CredentialVariant> AccessCredentialQuery<T> {
    /// Start an empty query
    pub fn builder() -> AccessCredentialQueryBuilder<T> {
        AccessCredentialQueryBuilder::default()
    }

    /// Target resource
    pub fn resource(&self) -> Option<&Url> {
        self.resource.as_ref()
    }

    /// Agent that created the credential
    pub fn creator(&self) -> Option<&Url> {
        self.creator.as_ref()
    }

    /// Agent the credential is for
    pub fn recipient(&self) -> Option<&Url> {
        self.recipient.as_ref()
    }

    /// Purposes
    pub fn purposes(&self) -> &BTreeSet<Url> {
        &self.purposes
    }

    /// Access modes
    pub fn modes(&self) -> &BTreeSet<String> {
        &self.modes
    }

    /// The same query aimed at another resource
    pub fn with_resource(&self, resource: Url) -> Self {
        Self {
            resource: Some(resource),
            ..self.clone()
        }
    }

    /// Variant this query looks for.
    ///
    /// Fails when `T` does not name a single credential variant.
    pub fn kind(&self) -> Result<CredentialKind> {
        T::KIND.ok_or_else(|| {
            AccessGrantError::UnsupportedOperation(
                "queries require a concrete credential type".to_string(),
            )
        })
    }

    /// Render the derivation request body
    pub fn to_derivation_body(&self) -> Result<Value> {
        let kind = self.kind()?;

        let mut consent = Map::new();
        if !self.modes.is_empty() {
            consent.insert("mode".to_string(), json!(self.modes));
        }
        if let Some(resource) = &self.resource {
            consent.insert("forPersonalData".to_string(), json!([resource.as_str()]));
        }
        if !self.purposes.is_empty() {
            let purposes: Vec<&str> = self.purposes.iter().map(Url::as_str).collect();
            consent.insert("forPurpose".to_string(), json!(purposes));
        }
        if let Some(recipient) = &self.recipient {
            let key = match kind {
                CredentialKind::Request => "isConsentForDataSubject",
                CredentialKind::Grant | CredentialKind::Denial => "isProvidedTo",
            };
            consent.insert(key.to_string(), json!(recipient.as_str()));
        }

        let mut subject = Map::new();
        if let Some(creator) = &self.creator {
            subject.insert("id".to_string(), json!(creator.as_str()));
        }
        subject.insert(kind.consent_keyword().to_string(), Value::Object(consent));

        Ok(json!({
            "verifiableClaim": {
                "@context": [VC_CONTEXT_URI, INRUPT_CONTEXT_URI],
                "type": [kind.type_name()],
                "credentialSubject": subject,
            }
        }))
    }
}

/// Only resource, creator, recipient and purpose carry over. Status, time
/// windows and paging have no derivation counterpart and are dropped with a
/// warning.
impl<T: CredentialVariant> From<&CredentialFilter<T>> for AccessCredentialQuery<T> {
    fn from(filter: &CredentialFilter<T>) -> Self {
        let mut dropped = Vec::new();
        if filter.status.is_some() {
            dropped.push("status");
        }
        if filter.issued_within.is_some() {
            dropped.push("issued_within");
        }
        if filter.revoked_within.is_some() {
            dropped.push("revoked_within");
        }
        if filter.page.is_some() {
            dropped.push("page");
        }
        if filter.page_size != DEFAULT_PAGE_SIZE {
            dropped.push("page_size");
        }
        if !dropped.is_empty() {
            warn!(
                fields = ?dropped,
                "Filter fields ignored by credential query, use search to apply them"
            );
        }

        let mut builder = AccessCredentialQuery::<T>::builder();
        builder.resource = filter.resource.clone();
        builder.creator = filter.from_agent.clone();
        builder.recipient = filter.to_agent.clone();
        if let Some(purpose) = &filter.purpose {
            builder.purposes.insert(purpose.clone());
        }
        builder.build()
    }
}

/// Builder for [`AccessCredentialQuery`]
#[derive(Debug, Clone)]
pub struct AccessCredentialQueryBuilder<T> {
    resource: Option<Url>,
    creator: Option<Url>,
    recipient: Option<Url>,
    purposes: BTreeSet<Url>,
    modes: BTreeSet<String>,
    credential_type: PhantomData<fn() -> T>,
}

impl<T> Default for AccessCredentialQueryBuilder<T> {
    fn default() -> Self {
        Self {
            resource: None,
            creator: None,
            recipient: None,
            purposes: BTreeSet::new(),
            modes: BTreeSet::new(),
            credential_type: PhantomData,
        }
    }
}

impl<T: CredentialVariant> AccessCredentialQueryBuilder<T> {
    /// Filter by resource
    pub fn resource(mut self, resource: Url) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Filter by creator
    pub fn creator(mut self, creator: Url) -> Self {
        self.creator = Some(creator);
        self
    }

    /// Filter by recipient
    pub fn recipient(mut self, recipient: Url) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Add a purpose
    pub fn purpose(mut self, purpose: Url) -> Self {
        self.purposes.insert(purpose);
        self
    }

    /// Add an access mode
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.modes.insert(mode.into());
        self
    }

    /// Build the query
    pub fn build(self) -> AccessCredentialQuery<T> {
        AccessCredentialQuery {
            resource: self.resource,
            creator: self.creator,
            recipient: self.recipient,
            purposes: self.purposes,
            modes: self.modes,
            credential_type: PhantomData,
        }
    }
}
