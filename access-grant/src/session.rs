//! Access Grant Session
//!
//! Wraps an authentication session with a set of held Access Grants. A request
//! whose target lies inside one of a grant's resources is answered with a
//! bearer token derived from that grant; anything else falls through to the
//! wrapped session.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{
    auth::{Challenge, Credential, Request, Session, BEARER},
    credentials::AccessGrant,
    error::Result,
    uri::{is_ancestor, without_fragment},
};

#[derive(Debug, Clone)]
struct CachedGrant {
    credential: Credential,
    grant: AccessGrant,
}

/// Session that authorizes requests with held Access Grants
#[derive(Debug)]
pub struct AccessGrantSession {
    id: String,
    session: Arc<dyn Session>,
    grants: Vec<AccessGrant>,
    cache: DashMap<Url, CachedGrant>,
}

impl AccessGrantSession {
    /// Wrap `session` with the given grants, tried in order
    pub fn of_access_grants(
        session: Arc<dyn Session>,
        grants: impl IntoIterator<Item = AccessGrant>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session,
            grants: grants.into_iter().collect(),
            cache: DashMap::new(),
        }
    }

    /// Held grants
    pub fn grants(&self) -> &[AccessGrant] {
        &self.grants
    }

    /// First unexpired held grant whose scope covers `uri`
    pub fn find_grant(&self, uri: &Url) -> Option<&AccessGrant> {
        self.grants.iter().find(|grant| {
            !grant.is_expired() && grant.resources().iter().any(|r| is_ancestor(r, uri))
        })
    }

    /// Grant that produced the cached credential for `request`
    pub fn cached_grant(&self, request: &Request) -> Option<AccessGrant> {
        self.cache
            .get(&without_fragment(&request.uri))
            .map(|entry| entry.grant.clone())
    }

    /// Bearer token standing for a grant
    pub fn encode_grant(grant: &AccessGrant) -> String {
        URL_SAFE_NO_PAD.encode(grant.serialize())
    }

    fn grant_credential(&self, grant: &AccessGrant) -> Credential {
        Credential {
            scheme: BEARER.to_string(),
            issuer: Some(grant.issuer().clone()),
            token: Self::encode_grant(grant),
            expiration: grant.expiration(),
            principal: self.session.principal(),
            jkt: None,
        }
    }
}

#[async_trait]
impl Session for AccessGrantSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn principal(&self) -> Option<Url> {
        self.session.principal()
    }

    fn supported_schemes(&self) -> BTreeSet<String> {
        self.session.supported_schemes()
    }

    async fn authenticate(
        &self,
        request: &Request,
        challenges: &[Challenge],
    ) -> Result<Option<Credential>> {
        if let Some(grant) = self.find_grant(&request.uri) {
            debug!(
                uri = %request.uri,
                grant = %grant.identifier(),
                "Authorizing request with access grant"
            );
            let credential = self.grant_credential(grant);
            self.cache.insert(
                without_fragment(&request.uri),
                CachedGrant {
                    credential: credential.clone(),
                    grant: grant.clone(),
                },
            );
            return Ok(Some(credential));
        }

        self.session.authenticate(request, challenges).await
    }

    /// Grant credential cached for the request, else whatever the wrapped session holds
    fn from_cache(&self, request: &Request) -> Option<Credential> {
        self.cache
            .get(&without_fragment(&request.uri))
            .map(|entry| entry.credential.clone())
            .or_else(|| self.session.from_cache(request))
    }

    fn reset(&self) {
        self.cache.clear();
    }

    fn select_thumbprint(&self, algorithms: &[String]) -> Option<String> {
        self.session.select_thumbprint(algorithms)
    }

    fn generate_proof(&self, jkt: &str, request: &Request) -> Option<String> {
        self.session.generate_proof(jkt, request)
    }
}
