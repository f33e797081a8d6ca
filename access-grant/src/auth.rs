//! Authentication sessions
//!
//! A [`Session`] supplies the credentials the client attaches to outgoing
//! requests. The client first asks for a cached credential and, after a `401`,
//! hands the server's challenges to [`Session::authenticate`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{AccessGrantError, Result};
use crate::uri::without_fragment;

/// Bearer authentication scheme
pub const BEARER: &str = "Bearer";

/// DPoP authentication scheme
pub const DPOP: &str = "DPoP";

/// An outgoing request that needs authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method
    pub method: Method,

    /// Request target
    pub uri: Url,
}

impl Request {
    /// Create a request
    pub fn new(method: Method, uri: Url) -> Self {
        Self { method, uri }
    }

    /// Create a `GET` request
    pub fn get(uri: Url) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Create a `POST` request
    pub fn post(uri: Url) -> Self {
        Self::new(Method::POST, uri)
    }
}

/// Resolved authorization material for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Authorization scheme (`Bearer`, `DPoP`)
    pub scheme: String,

    /// Who issued the token
    pub issuer: Option<Url>,

    /// Opaque token value
    pub token: String,

    /// When the token stops being valid
    pub expiration: Option<DateTime<Utc>>,

    /// Agent the token speaks for
    pub principal: Option<Url>,

    /// Thumbprint of the proof key, for sender-constrained tokens
    pub jkt: Option<String>,
}

impl Credential {
    /// Create a bearer credential
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: BEARER.to_string(),
            issuer: None,
            token: token.into(),
            expiration: None,
            principal: None,
            jkt: None,
        }
    }

    /// Check if the credential is past its expiration
    pub fn is_expired(&self) -> bool {
        self.expiration.is_some_and(|exp| exp < Utc::now())
    }

    /// Render the `Authorization` header value
    pub fn authorization(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

/// One challenge from a `WWW-Authenticate` header
#[derive(Debug, Clone)]
pub struct Challenge {
    scheme: String,
    parameters: BTreeMap<String, String>,
}

impl Challenge {
    /// Create a challenge with no parameters
    pub fn new(scheme: impl Into<String>) -> Self {
        Self::with_parameters(scheme, BTreeMap::new())
    }

    /// Create a challenge with parameters
    pub fn with_parameters(scheme: impl Into<String>, parameters: BTreeMap<String, String>) -> Self {
        Self {
            scheme: scheme.into(),
            parameters,
        }
    }

    /// Authentication scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Look up a parameter (names are case-insensitive)
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All parameters
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Check the scheme ignoring case
    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    /// Parse every challenge in a `WWW-Authenticate` header value.
    ///
    /// A new challenge starts at any token not followed by `=`, with or
    /// without a comma before it, so both `Bearer, DPoP algs="ES256"` and
    /// `Bearer realm="x" DPoP algs="ES256"` yield two challenges. A token68
    /// right after the scheme is consumed but not kept.
    pub fn parse_header(header: &str) -> Vec<Challenge> {
        let mut cursor = Cursor::new(header);
        let mut challenges = Vec::new();

        loop {
            cursor.skip_separators();
            if cursor.is_done() {
                break;
            }

            let scheme = cursor.token();
            if scheme.is_empty() {
                cursor.bump();
                continue;
            }

            let mark = cursor.pos;
            cursor.skip_whitespace();
            let token68 = cursor.token();
            while cursor.peek() == Some('=') {
                cursor.bump();
            }
            cursor.skip_whitespace();
            if token68.is_empty() || !matches!(cursor.peek(), None | Some(',')) {
                cursor.pos = mark;
            }

            let mut parameters = BTreeMap::new();
            loop {
                let mark = cursor.pos;
                cursor.skip_separators();
                let name = cursor.token();
                if name.is_empty() {
                    cursor.pos = mark;
                    break;
                }
                cursor.skip_whitespace();
                if cursor.peek() != Some('=') {
                    cursor.pos = mark;
                    break;
                }
                cursor.bump();
                cursor.skip_whitespace();
                let value = if cursor.peek() == Some('"') {
                    cursor.bump();
                    cursor.quoted()
                } else {
                    cursor.token().to_string()
                };
                parameters.insert(name.to_ascii_lowercase(), value);
            }

            challenges.push(Challenge::with_parameters(scheme, parameters));

            // A bare token opens the next challenge, anything else is skipped to the next comma
            let mark = cursor.pos;
            cursor.skip_whitespace();
            if matches!(cursor.peek(), Some(c) if is_token_char(c)) {
                cursor.pos = mark;
            } else {
                while matches!(cursor.peek(), Some(c) if c != ',') {
                    cursor.bump();
                }
            }
        }

        challenges
    }
}

impl PartialEq for Challenge {
    fn eq(&self, other: &Self) -> bool {
        self.is_scheme(&other.scheme) && self.parameters == other.parameters
    }
}

impl Eq for Challenge {}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme)?;
        let mut first = true;
        for (name, value) in &self.parameters {
            let sep = if first { " " } else { ", " };
            write!(f, "{}{}=\"{}\"", sep, name, value)?;
            first = false;
        }
        Ok(())
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace() || c == ',') {
            self.bump();
        }
    }

    fn token(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_token_char(c)) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn quoted(&mut self) -> String {
        let mut value = String::new();
        while let Some(c) = self.bump() {
            match c {
                '"' => break,
                '\\' => {
                    if let Some(escaped) = self.bump() {
                        value.push(escaped);
                    }
                }
                _ => value.push(c),
            }
        }
        value
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~/".contains(c)
}

/// Source of request credentials
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Session identifier
    fn id(&self) -> &str;

    /// Agent this session acts for, if known
    fn principal(&self) -> Option<Url>;

    /// Authorization schemes this session can satisfy
    fn supported_schemes(&self) -> BTreeSet<String>;

    /// Produce a credential for `request` in answer to `challenges`.
    ///
    /// `Ok(None)` means the session has nothing to offer.
    async fn authenticate(
        &self,
        request: &Request,
        challenges: &[Challenge],
    ) -> Result<Option<Credential>>;

    /// Look up a previously resolved credential without doing any work
    fn from_cache(&self, request: &Request) -> Option<Credential>;

    /// Drop every cached credential
    fn reset(&self);

    /// Pick a proof key thumbprint for one of the given algorithms
    fn select_thumbprint(&self, _algorithms: &[String]) -> Option<String> {
        None
    }

    /// Produce a proof-of-possession header for `request`
    fn generate_proof(&self, _jkt: &str, _request: &Request) -> Option<String> {
        None
    }
}

/// Session that never authenticates
#[derive(Debug, Clone)]
pub struct AnonymousSession {
    id: String,
}

impl AnonymousSession {
    /// Create an anonymous session
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for AnonymousSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for AnonymousSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn principal(&self) -> Option<Url> {
        None
    }

    fn supported_schemes(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    async fn authenticate(
        &self,
        _request: &Request,
        _challenges: &[Challenge],
    ) -> Result<Option<Credential>> {
        Ok(None)
    }

    fn from_cache(&self, _request: &Request) -> Option<Credential> {
        None
    }

    fn reset(&self) {}
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    webid: Option<String>,
    sub: Option<String>,
    iss: Option<String>,
    exp: Option<i64>,
}

/// Session backed by a static bearer token
#[derive(Debug)]
pub struct TokenSession {
    id: String,
    token: String,
    principal: Option<Url>,
    issuer: Option<Url>,
    expiration: Option<DateTime<Utc>>,
    cache: DashMap<Url, Credential>,
}

impl TokenSession {
    /// Create a session from an opaque access token
    pub fn of_token(token: impl Into<String>, principal: Option<Url>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token: token.into(),
            principal,
            issuer: None,
            expiration: None,
            cache: DashMap::new(),
        }
    }

    /// Create a session from an ID token.
    ///
    /// The principal comes from the `webid` claim, falling back to `sub`. The
    /// signature is not checked here; the resource server validates the token.
    pub fn of_id_token(token: impl Into<String>) -> Result<Self> {
        let token = token.into();

        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<TokenClaims>(&token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| AccessGrantError::Config(format!("Invalid ID token: {}", e)))?
            .claims;

        let principal = claims
            .webid
            .as_deref()
            .or(claims.sub.as_deref())
            .and_then(|p| Url::parse(p).ok());
        let issuer = claims.iss.as_deref().and_then(|i| Url::parse(i).ok());
        let expiration = claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single());

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            token,
            principal,
            issuer,
            expiration,
            cache: DashMap::new(),
        })
    }

    fn credential(&self) -> Credential {
        Credential {
            scheme: BEARER.to_string(),
            issuer: self.issuer.clone(),
            token: self.token.clone(),
            expiration: self.expiration,
            principal: self.principal.clone(),
            jkt: None,
        }
    }
}

#[async_trait]
impl Session for TokenSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn principal(&self) -> Option<Url> {
        self.principal.clone()
    }

    fn supported_schemes(&self) -> BTreeSet<String> {
        BTreeSet::from([BEARER.to_string()])
    }

    async fn authenticate(
        &self,
        request: &Request,
        challenges: &[Challenge],
    ) -> Result<Option<Credential>> {
        if !challenges.is_empty() && !challenges.iter().any(|c| c.is_scheme(BEARER)) {
            debug!(uri = %request.uri, "No bearer challenge offered");
            return Ok(None);
        }

        let credential = self.credential();
        if credential.is_expired() {
            debug!(session = %self.id, "Token expired");
            return Ok(None);
        }

        self.cache
            .insert(without_fragment(&request.uri), credential.clone());
        Ok(Some(credential))
    }

    fn from_cache(&self, request: &Request) -> Option<Credential> {
        self.cache
            .get(&without_fragment(&request.uri))
            .map(|entry| entry.value().clone())
    }

    fn reset(&self) {
        self.cache.clear();
    }
}
