//! Blocking facade over [`crate::AccessGrantClient`]
//!
//! Each call drives the async client to completion on a private
//! current-thread runtime, blocking only the calling thread. Do not use it
//! from inside an async context.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use url::Url;

use crate::{
    auth::Session,
    client::{self, AccessRequestParameters},
    config::AccessGrantConfig,
    credentials::{AccessDenial, AccessGrant, AccessRequest, CredentialVariant},
    error::Result,
    filter::{CredentialFilter, CredentialResult},
    verification::VerificationResult,
};

/// Synchronous Access Grant client
#[derive(Debug, Clone)]
pub struct AccessGrantClient {
    inner: client::AccessGrantClient,
    runtime: Arc<Runtime>,
}

impl AccessGrantClient {
    /// Create an anonymous client
    pub fn new(config: AccessGrantConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            inner: client::AccessGrantClient::new(config)?,
            runtime: Arc::new(runtime),
        })
    }

    /// Wrap an existing async client
    pub fn from_async(inner: client::AccessGrantClient) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    /// A client authenticating with `session`
    pub fn session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            inner: self.inner.session(session),
            runtime: self.runtime.clone(),
        }
    }

    /// The wrapped async client
    pub fn as_async(&self) -> &client::AccessGrantClient {
        &self.inner
    }

    /// Fetch a credential and narrow it to `T`
    pub fn fetch<T: CredentialVariant>(&self, identifier: &Url) -> Result<T> {
        self.runtime.block_on(self.inner.fetch(identifier))
    }

    /// Check a credential with its issuer's verifier service
    pub fn verify<T: CredentialVariant>(&self, credential: &T) -> Result<VerificationResult> {
        self.runtime.block_on(self.inner.verify(credential))
    }

    /// Revoke a grant
    pub fn revoke<T: CredentialVariant>(&self, credential: &T) -> Result<()> {
        self.runtime.block_on(self.inner.revoke(credential))
    }

    /// Delete a credential
    pub fn delete<T: CredentialVariant>(&self, credential: &T) -> Result<()> {
        self.runtime.block_on(self.inner.delete(credential))
    }

    /// Ask for access
    pub fn request_access(&self, parameters: AccessRequestParameters) -> Result<AccessRequest> {
        self.runtime.block_on(self.inner.request_access(parameters))
    }

    /// Grant an Access Request
    pub fn grant_access(&self, request: &AccessRequest) -> Result<AccessGrant> {
        self.runtime.block_on(self.inner.grant_access(request))
    }

    /// Deny an Access Request
    pub fn deny_access(&self, request: &AccessRequest) -> Result<AccessDenial> {
        self.runtime.block_on(self.inner.deny_access(request))
    }

    /// Find credentials of type `T`
    pub fn query<T: CredentialVariant>(
        &self,
        resource: Option<&Url>,
        creator: Option<&Url>,
        recipient: Option<&Url>,
        mode: Option<&str>,
        purpose: Option<&Url>,
    ) -> Result<Vec<T>> {
        self.runtime
            .block_on(self.inner.query(resource, creator, recipient, mode, purpose))
    }

    /// Find credentials matching a filter
    pub fn query_filter<T: CredentialVariant>(&self, filter: &CredentialFilter<T>) -> Result<Vec<T>> {
        self.runtime.block_on(self.inner.query_filter(filter))
    }

    /// Page through the issuer's credential list
    pub fn search<T: CredentialVariant>(
        &self,
        filter: &CredentialFilter<T>,
    ) -> Result<CredentialResult<T>> {
        self.runtime.block_on(self.inner.search(filter))
    }
}
