//! # access-grant: Solid Access Grant client
//!
//! This crate issues, fetches, verifies, revokes and queries Access
//! Credentials: verifiable credentials that authorize an agent to use specific
//! access modes on specific Solid resources.
//!
//! ## Features
//!
//! - **Credential Model**: strict parsing of grants, requests and denials
//! - **Service Discovery**: issuer endpoints from `/.well-known/vc-configuration`
//! - **Protocol Client**: fetch, verify, revoke, delete, issue and query
//! - **Filters**: paginated credential search with page links
//! - **Grant Sessions**: resolve which held grant authorizes an outgoing request
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │   AccessGrantSession                        │
//! │   held grants + per-URI credential cache    │
//! └─────────────────────────────────────────────┘
//!                       ↓ delegates to
//!         ┌─────────────────────────────┐
//!         │   Session (token, anonymous)│
//!         └─────────────────────────────┘
//!                       ↓ authenticates
//!         ┌─────────────────────────────┐
//!         │   AccessGrantClient         │
//!         │   discovery → operation     │
//!         └─────────────────────────────┘
//!                       ↓
//!         ┌─────────────────────────────┐
//!         │   VC ISSUER                 │
//!         │   issue / verify / status / │
//!         │   derive / credentials      │
//!         └─────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod blocking;
pub mod client;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod session;
pub mod status;
pub mod uri;
pub mod verification;

// Re-exports for convenience
pub use auth::{AnonymousSession, Challenge, Credential, Request, Session, TokenSession};
pub use client::{AccessGrantClient, AccessRequestParameters};
pub use config::AccessGrantConfig;
pub use credentials::{
    AccessCredential, AccessDenial, AccessGrant, AccessRequest, CredentialData, CredentialKind,
    CredentialVariant,
};
pub use discovery::{Metadata, MetadataCache};
pub use error::{AccessGrantError, Result};
pub use filter::{
    AccessCredentialQuery, AccessCredentialQueryBuilder, CredentialDuration, CredentialFilter,
    CredentialFilterBuilder, CredentialResult, CredentialStatus,
};
pub use session::AccessGrantSession;
pub use status::Status;
pub use verification::{VerificationRequest, VerificationResult};

/// W3C Verifiable Credentials context
pub const VC_CONTEXT_URI: &str = "https://www.w3.org/2018/credentials/v1";

/// Inrupt credentials context
pub const INRUPT_CONTEXT_URI: &str = "https://schema.inrupt.com/credentials/v1.jsonld";

/// GConsent schema, the only consent vocabulary supported
pub const GCONSENT_SCHEMA: &str = "https://w3id.org/GConsent";

/// Namespace under which the credential types may be qualified
pub const SOLID_VC_NAMESPACE: &str = "http://www.w3.org/ns/solid/vc#";

/// Type name of an Access Grant
pub const ACCESS_GRANT_TYPE: &str = "SolidAccessGrant";

/// Type name of an Access Request
pub const ACCESS_REQUEST_TYPE: &str = "SolidAccessRequest";

/// Type name of an Access Denial
pub const ACCESS_DENIAL_TYPE: &str = "SolidAccessDenial";

/// Default number of items per search page
pub const DEFAULT_PAGE_SIZE: i32 = 20;

/// Largest page size a filter may ask for
pub const MAX_PAGE_SIZE: i32 = 100;
