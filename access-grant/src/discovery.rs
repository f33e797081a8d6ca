//! Service Discovery
//!
//! Resolves an issuer to its service endpoints through
//! `{issuer}/.well-known/vc-configuration` and keeps the result for a
//! configurable time.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{AccessGrantError, Result},
    uri::is_success,
};

/// Issuer service endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Issuance endpoint
    #[serde(rename = "issuerService")]
    pub issue_endpoint: Url,

    /// Verification endpoint
    #[serde(rename = "verifierService")]
    pub verify_endpoint: Url,

    /// Status (revocation) endpoint
    #[serde(rename = "statusService")]
    pub status_endpoint: Url,

    /// Derivation (query) endpoint
    #[serde(rename = "derivationService")]
    pub query_endpoint: Url,
}

/// Location of an issuer's configuration document
pub fn well_known_url(issuer: &Url) -> Result<Url> {
    let mut url = issuer.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| AccessGrantError::Discovery(format!("Issuer {} cannot be a base", issuer)))?
        .pop_if_empty()
        .extend([".well-known", "vc-configuration"]);
    Ok(url)
}

/// Fetch an issuer's service metadata
pub async fn discover(http: &reqwest::Client, issuer: &Url) -> Result<Metadata> {
    let url = well_known_url(issuer)?;
    debug!(%url, "Fetching issuer configuration");

    let response = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status().as_u16();
    if !is_success(status) {
        warn!(%issuer, status, "Issuer configuration unavailable");
        return Err(AccessGrantError::Status {
            message: "Unexpected error while fetching the Access Grant metadata".to_string(),
            status,
        });
    }

    let body = response.text().await?;
    let metadata: Metadata = serde_json::from_str(&body)
        .map_err(|e| AccessGrantError::Discovery(format!("{}: {}", url, e)))?;

    info!(%issuer, "Discovered Access Grant services");
    Ok(metadata)
}

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: Metadata,
    fetched_at: Instant,
}

/// Bounded, time-limited cache of issuer metadata
#[derive(Debug)]
pub struct MetadataCache {
    entries: DashMap<Url, CachedMetadata>,
    ttl: Duration,
    capacity: usize,
}

impl MetadataCache {
    /// Create a cache
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Fresh metadata for `issuer`, if cached
    pub fn get(&self, issuer: &Url) -> Option<Metadata> {
        let entry = self.entries.get(issuer)?;
        if entry.fetched_at.elapsed() < self.ttl {
            return Some(entry.metadata.clone());
        }
        drop(entry);
        self.entries.remove(issuer);
        None
    }

    /// Store metadata, evicting the oldest entry when full
    pub fn insert(&self, issuer: Url, metadata: Metadata) {
        if !self.entries.contains_key(&issuer) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.fetched_at)
                .map(|entry| entry.key().clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            issuer,
            CachedMetadata {
                metadata,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Metadata for `issuer`, discovering it on a miss
    pub async fn get_or_discover(&self, http: &reqwest::Client, issuer: &Url) -> Result<Metadata> {
        if let Some(metadata) = self.get(issuer) {
            return Ok(metadata);
        }
        let metadata = discover(http, issuer).await?;
        self.insert(issuer.clone(), metadata.clone());
        Ok(metadata)
    }

    /// Number of cached issuers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}
