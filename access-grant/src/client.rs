//! Access Grant Client
//!
//! Performs the protocol operations against an issuer's discovered services:
//! fetch, verify, revoke, delete, issue (request, grant, deny), query and
//! search. Every call is authenticated through the client's [`Session`]: a
//! cached credential is tried first and a `401` triggers one
//! challenge-driven retry.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Method, Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    auth::{AnonymousSession, Challenge, Credential, Request, Session, DPOP},
    config::AccessGrantConfig,
    credentials::{
        AccessCredential, AccessDenial, AccessGrant, AccessRequest, CredentialKind,
        CredentialVariant,
    },
    discovery::{Metadata, MetadataCache},
    error::{AccessGrantError, Result},
    filter::{AccessCredentialQuery, CredentialFilter, CredentialResult},
    status::REVOCATION_LIST_2020_STATUS,
    uri::get_parent,
    verification::{VerificationRequest, VerificationResult},
    INRUPT_CONTEXT_URI, VC_CONTEXT_URI,
};

/// Parameters of a new Access Request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequestParameters {
    /// Agent whose resources are requested (usually the storage owner)
    pub recipient: Option<Url>,

    /// Requested resources
    pub resources: BTreeSet<Url>,

    /// Requested access modes
    pub modes: BTreeSet<String>,

    /// Purposes of the access
    pub purposes: BTreeSet<Url>,

    /// When the requested access should end
    pub expiration: Option<DateTime<Utc>>,

    /// When the requested access should start
    pub issued_at: Option<DateTime<Utc>>,
}

impl AccessRequestParameters {
    /// Start an empty set of parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recipient
    pub fn recipient(mut self, recipient: Url) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Add a resource
    pub fn resource(mut self, resource: Url) -> Self {
        self.resources.insert(resource);
        self
    }

    /// Add an access mode
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.modes.insert(mode.into());
        self
    }

    /// Add a purpose
    pub fn purpose(mut self, purpose: Url) -> Self {
        self.purposes.insert(purpose);
        self
    }

    /// Set the expiration
    pub fn expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Set the issuance date
    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }
}

/// Client for an Access Grant issuer
#[derive(Debug, Clone)]
pub struct AccessGrantClient {
    http: reqwest::Client,
    config: Arc<AccessGrantConfig>,
    metadata: Arc<MetadataCache>,
    session: Arc<dyn Session>,
}

impl AccessGrantClient {
    /// Create an anonymous client with its own HTTP client
    pub fn new(config: AccessGrantConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Self::with_http_client(config, http)
    }

    /// Create an anonymous client on top of an existing HTTP client
    pub fn with_http_client(config: AccessGrantConfig, http: reqwest::Client) -> Result<Self> {
        config.check()?;
        let metadata = MetadataCache::new(config.metadata_cache_ttl, config.metadata_cache_size);
        Ok(Self {
            http,
            config: Arc::new(config),
            metadata: Arc::new(metadata),
            session: Arc::new(AnonymousSession::new()),
        })
    }

    /// A client sharing this one's HTTP client and metadata cache but
    /// authenticating with `session`
    pub fn session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            http: self.http.clone(),
            config: self.config.clone(),
            metadata: self.metadata.clone(),
            session,
        }
    }

    /// Active session
    pub fn current_session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Client configuration
    pub fn config(&self) -> &AccessGrantConfig {
        &self.config
    }

    /// Service endpoints of `issuer`
    pub async fn metadata(&self, issuer: &Url) -> Result<Metadata> {
        self.metadata.get_or_discover(&self.http, issuer).await
    }

    /// Fetch a credential and narrow it to `T`
    pub async fn fetch<T: CredentialVariant>(&self, identifier: &Url) -> Result<T> {
        let action = "Unable to fetch access credential";
        let response = self.send(Method::GET, identifier.clone(), None, action).await?;
        let response = ensure_success(response, action)?;
        let body = response.text().await?;
        T::from_credential(AccessCredential::from_response(&body)?)
    }

    /// Check a credential with its issuer's verifier service
    pub async fn verify<T: CredentialVariant>(&self, credential: &T) -> Result<VerificationResult> {
        let data = credential.data();
        let metadata = self.metadata(data.issuer()).await?;
        let body = serde_json::to_value(VerificationRequest::from_presentation(data.serialize())?)?;

        let action = "Unable to perform credential verification";
        let response = self
            .send(Method::POST, metadata.verify_endpoint, Some(&body), action)
            .await?;
        let response = ensure_success(response, action)?;
        Ok(response.json::<VerificationResult>().await?)
    }

    /// Revoke a grant through its revocation list entry.
    ///
    /// Only Access Grants carrying a status can be revoked.
    pub async fn revoke<T: CredentialVariant>(&self, credential: &T) -> Result<()> {
        let data = credential.data();
        if data.kind() != CredentialKind::Grant {
            return Err(AccessGrantError::UnsupportedOperation(format!(
                "revocation is not defined for {}",
                data.kind()
            )));
        }
        let status = data.status().ok_or_else(|| {
            AccessGrantError::UnsupportedOperation(format!(
                "access grant {} has no revocation status",
                data.identifier()
            ))
        })?;

        let metadata = self.metadata(data.issuer()).await?;
        let body = json!({
            "credentialId": data.identifier().as_str(),
            "credentialStatus": [{
                "id": status.identifier.as_str(),
                "type": REVOCATION_LIST_2020_STATUS,
                "status": "1",
            }],
        });

        let action = "Unable to revoke access credential";
        let response = self
            .send(Method::POST, metadata.status_endpoint, Some(&body), action)
            .await?;
        ensure_success(response, action)?;
        info!(credential = %data.identifier(), "Revoked access credential");
        Ok(())
    }

    /// Delete a credential from the issuer
    pub async fn delete<T: CredentialVariant>(&self, credential: &T) -> Result<()> {
        let identifier = credential.data().identifier().clone();
        let action = "Unable to delete access credential";
        let response = self.send(Method::DELETE, identifier.clone(), None, action).await?;
        ensure_success(response, action)?;
        info!(credential = %identifier, "Deleted access credential");
        Ok(())
    }

    /// Ask the configured issuer for a new Access Request
    pub async fn request_access(&self, parameters: AccessRequestParameters) -> Result<AccessRequest> {
        let body = issuance_body(
            CredentialKind::Request,
            parameters.recipient.as_ref(),
            &parameters.resources,
            &parameters.modes,
            &parameters.purposes,
            parameters.expiration,
            parameters.issued_at,
        );
        let issuer = self.config.issuer.clone();
        self.issue(&issuer, &body).await
    }

    /// Grant an Access Request
    pub async fn grant_access(&self, request: &AccessRequest) -> Result<AccessGrant> {
        let body = consent_body(CredentialKind::Grant, request);
        self.issue(request.issuer(), &body).await
    }

    /// Deny an Access Request
    pub async fn deny_access(&self, request: &AccessRequest) -> Result<AccessDenial> {
        let body = consent_body(CredentialKind::Denial, request);
        self.issue(request.issuer(), &body).await
    }

    async fn issue<T: CredentialVariant>(&self, issuer: &Url, body: &Value) -> Result<T> {
        let metadata = self.metadata(issuer).await?;
        let action = "Unable to issue access credential";
        let response = self
            .send(Method::POST, metadata.issue_endpoint, Some(body), action)
            .await?;
        let response = ensure_success(response, action)?;
        let text = response.text().await?;
        let credential = T::from_credential(AccessCredential::from_response(&text)?)?;
        info!(
            credential = %credential.data().identifier(),
            kind = %credential.data().kind(),
            "Issued access credential"
        );
        Ok(credential)
    }

    /// Find credentials of type `T` matching the given fields.
    ///
    /// A resource-scoped lookup that finds nothing is retried on each
    /// containing folder up to the storage root.
    pub async fn query<T: CredentialVariant>(
        &self,
        resource: Option<&Url>,
        creator: Option<&Url>,
        recipient: Option<&Url>,
        mode: Option<&str>,
        purpose: Option<&Url>,
    ) -> Result<Vec<T>> {
        let mut builder = AccessCredentialQuery::<T>::builder();
        if let Some(resource) = resource {
            builder = builder.resource(resource.clone());
        }
        if let Some(creator) = creator {
            builder = builder.creator(creator.clone());
        }
        if let Some(recipient) = recipient {
            builder = builder.recipient(recipient.clone());
        }
        if let Some(mode) = mode {
            builder = builder.mode(mode);
        }
        if let Some(purpose) = purpose {
            builder = builder.purpose(purpose.clone());
        }
        self.query_with(&builder.build()).await
    }

    /// Find credentials matching a filter through the derivation service.
    ///
    /// Only the filter's resource, agents and purpose reach the derivation
    /// service. Status, issuance and revocation windows and paging are
    /// ignored with a warning; use [`search`](Self::search) to apply them.
    pub async fn query_filter<T: CredentialVariant>(
        &self,
        filter: &CredentialFilter<T>,
    ) -> Result<Vec<T>> {
        self.query_with(&AccessCredentialQuery::from(filter)).await
    }

    /// Run a derivation query
    pub async fn query_with<T: CredentialVariant>(
        &self,
        query: &AccessCredentialQuery<T>,
    ) -> Result<Vec<T>> {
        let kind = query.kind()?;
        let metadata = self.metadata(&self.config.issuer).await?;

        let Some(resource) = query.resource().cloned() else {
            return self.derive(&metadata.query_endpoint, query, kind).await;
        };

        let mut current = Some(resource);
        while let Some(target) = current {
            let scoped = query.with_resource(target.clone());
            let items = self.derive(&metadata.query_endpoint, &scoped, kind).await?;
            if !items.is_empty() {
                return Ok(items);
            }
            current = get_parent(&target);
            if let Some(parent) = &current {
                debug!(%target, %parent, "No credentials found, trying containing folder");
            }
        }
        Ok(Vec::new())
    }

    async fn derive<T: CredentialVariant>(
        &self,
        endpoint: &Url,
        query: &AccessCredentialQuery<T>,
        kind: CredentialKind,
    ) -> Result<Vec<T>> {
        let body = query.to_derivation_body()?;
        let action = "Unable to perform credential query";
        let response = self
            .send(Method::POST, endpoint.clone(), Some(&body), action)
            .await?;
        let response = ensure_success(response, action)?;
        let document: Value = response.json().await?;
        parse_credentials(document, "verifiableCredential", kind)
    }

    /// Page through the issuer's credential list
    pub async fn search<T: CredentialVariant>(
        &self,
        filter: &CredentialFilter<T>,
    ) -> Result<CredentialResult<T>> {
        let kind = filter.credential_kind().ok_or_else(|| {
            AccessGrantError::UnsupportedOperation(
                "search requires a concrete credential type".to_string(),
            )
        })?;
        let url = filter.as_url(&credentials_endpoint(&self.config.issuer)?)?;

        let action = "Unable to perform credential search";
        let response = self.send(Method::GET, url, None, action).await?;
        let response = ensure_success(response, action)?;

        let links: Vec<String> = response
            .headers()
            .get_all(header::LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let document: Value = response.json().await?;
        let items = parse_credentials(document, "items", kind)?;

        Ok(CredentialResult::from_links(
            items,
            filter,
            links.iter().map(String::as_str),
        ))
    }

    async fn send(
        &self,
        method: Method,
        uri: Url,
        body: Option<&Value>,
        action: &str,
    ) -> Result<Response> {
        let request = Request::new(method, uri);
        let cached = self.session.from_cache(&request);

        let response = self.execute(&request, body, cached.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenges = parse_challenges(&response);
        debug!(uri = %request.uri, challenges = challenges.len(), "Authentication required");

        let Some(credential) = self.session.authenticate(&request, &challenges).await? else {
            warn!(uri = %request.uri, "No credential available for challenge");
            return Err(AccessGrantError::Unauthorized {
                message: action.to_string(),
                challenges,
            });
        };

        let retry = self.execute(&request, body, Some(&credential)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(uri = %request.uri, "Credential rejected");
            return Err(AccessGrantError::Unauthorized {
                message: action.to_string(),
                challenges: parse_challenges(&retry),
            });
        }
        Ok(retry)
    }

    async fn execute(
        &self,
        request: &Request,
        body: Option<&Value>,
        credential: Option<&Credential>,
    ) -> Result<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.uri.clone())
            .header(header::ACCEPT, "application/json");

        if let Some(timeout) = self.config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(credential) = credential {
            builder = builder.header(header::AUTHORIZATION, credential.authorization());
            if credential.scheme.eq_ignore_ascii_case(DPOP) {
                let proof = credential
                    .jkt
                    .as_deref()
                    .and_then(|jkt| self.session.generate_proof(jkt, request));
                if let Some(proof) = proof {
                    builder = builder.header(DPOP, proof);
                }
            }
        }

        let response = builder.send().await?;
        debug!(
            method = %request.method,
            uri = %request.uri,
            status = response.status().as_u16(),
            "Access grant exchange"
        );
        Ok(response)
    }
}

fn ensure_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(AccessGrantError::Unauthorized {
            message: action.to_string(),
            challenges: parse_challenges(&response),
        });
    }
    warn!(uri = %response.url(), status = status.as_u16(), "{}", action);
    Err(AccessGrantError::Status {
        message: action.to_string(),
        status: status.as_u16(),
    })
}

fn parse_challenges(response: &Response) -> Vec<Challenge> {
    response
        .headers()
        .get_all(header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Challenge::parse_header)
        .collect()
}

fn credentials_endpoint(issuer: &Url) -> Result<Url> {
    let mut url = issuer.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| AccessGrantError::Config(format!("Issuer {} cannot be a base", issuer)))?
        .pop_if_empty()
        .extend(["credentials", ""]);
    Ok(url)
}

/// Read credentials out of a list response: a bare array or an object
/// holding the array under `key`. Credentials of other variants are skipped;
/// a malformed credential fails the whole response.
fn parse_credentials<T: CredentialVariant>(
    document: Value,
    key: &str,
    kind: CredentialKind,
) -> Result<Vec<T>> {
    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove(key) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(item) => vec![item],
        },
        _ => {
            return Err(AccessGrantError::invalid(
                "credential list response is neither an array nor an object",
            ))
        }
    };

    let mut credentials = Vec::with_capacity(items.len());
    for item in items {
        let credential = AccessCredential::from_value(item, None)?;
        if credential.kind() != kind {
            debug!(
                expected = %kind,
                actual = %credential.kind(),
                "Skipping credential of another type"
            );
            continue;
        }
        credentials.push(T::from_credential(credential)?);
    }
    Ok(credentials)
}

fn consent_body(kind: CredentialKind, request: &AccessRequest) -> Value {
    issuance_body(
        kind,
        Some(request.creator()),
        request.resources(),
        request.modes(),
        request.purposes(),
        request.expiration(),
        None,
    )
}

fn issuance_body(
    kind: CredentialKind,
    recipient: Option<&Url>,
    resources: &BTreeSet<Url>,
    modes: &BTreeSet<String>,
    purposes: &BTreeSet<Url>,
    expiration: Option<DateTime<Utc>>,
    issued_at: Option<DateTime<Utc>>,
) -> Value {
    let mut consent = Map::new();
    consent.insert("mode".to_string(), json!(modes));
    consent.insert("hasStatus".to_string(), json!(kind.consent_status()));
    let resources: Vec<&str> = resources.iter().map(Url::as_str).collect();
    consent.insert("forPersonalData".to_string(), json!(resources));
    if let Some(recipient) = recipient {
        let key = match kind {
            CredentialKind::Request => "isConsentForDataSubject",
            CredentialKind::Grant | CredentialKind::Denial => "isProvidedTo",
        };
        consent.insert(key.to_string(), json!(recipient.as_str()));
    }
    if !purposes.is_empty() {
        let purposes: Vec<&str> = purposes.iter().map(Url::as_str).collect();
        consent.insert("forPurpose".to_string(), json!(purposes));
    }

    let mut subject = Map::new();
    subject.insert(kind.consent_keyword().to_string(), Value::Object(consent));

    let mut credential = Map::new();
    credential.insert(
        "@context".to_string(),
        json!([VC_CONTEXT_URI, INRUPT_CONTEXT_URI]),
    );
    credential.insert("type".to_string(), json!([kind.type_name()]));
    if let Some(expiration) = expiration {
        credential.insert(
            "expirationDate".to_string(),
            json!(expiration.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    if let Some(issued_at) = issued_at {
        credential.insert(
            "issuanceDate".to_string(),
            json!(issued_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    credential.insert("credentialSubject".to_string(), Value::Object(subject));

    json!({ "credential": credential })
}
