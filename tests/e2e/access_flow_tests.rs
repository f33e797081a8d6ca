//! End-to-end access flows against a mock issuer
//!
//! Walks the full consent lifecycle: a requester asks for access, the owner
//! grants or denies it, the requester uses the grant, and the owner revokes
//! it again.

use std::sync::Arc;

use access_grant::{
    blocking, AccessCredential, AccessGrant, AccessGrantSession, AccessRequest,
    AccessRequestParameters, AnonymousSession, CredentialKind, Request, Session, TokenSession,
};
use access_grant_tests::common::{json_response, setup_test_logging, Fixtures, MockIssuer};
use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde_json::json;
use url::Url;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, ResponseTemplate,
};

async fn mount_issuance(issuer: &MockIssuer) {
    Mock::given(method("POST"))
        .and(path("/issue"))
        .and(body_partial_json(json!({"credential": {"type": ["SolidAccessRequest"]}})))
        .respond_with(json_response(201, &issuer.fixtures.access_request()))
        .mount(&issuer.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/issue"))
        .and(body_partial_json(json!({"credential": {"type": ["SolidAccessGrant"]}})))
        .respond_with(json_response(201, &issuer.fixtures.access_grant()))
        .mount(&issuer.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/issue"))
        .and(body_partial_json(json!({"credential": {"type": ["SolidAccessDenial"]}})))
        .respond_with(json_response(201, &issuer.fixtures.access_denial()))
        .mount(&issuer.server)
        .await;
}

#[tokio::test]
async fn test_request_grant_use_revoke() -> Result<()> {
    setup_test_logging();
    let issuer = MockIssuer::start().await;
    mount_issuance(&issuer).await;
    Mock::given(method("GET"))
        .and(path("/credentials/access-request-1"))
        .respond_with(json_response(200, &issuer.fixtures.access_request()))
        .mount(&issuer.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(json_response(200, r#"{"checks": ["proof"]}"#))
        .mount(&issuer.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&issuer.server)
        .await;

    let requester = issuer.client_with(Arc::new(TokenSession::of_token(
        "requester-token",
        Some(Url::parse("https://id.example/requester")?),
    )));
    let owner = issuer.client_with(Arc::new(TokenSession::of_token(
        "owner-token",
        Some(Url::parse("https://id.example/owner")?),
    )));

    // Requester asks for access
    let issued = requester
        .request_access(
            AccessRequestParameters::new()
                .recipient(Url::parse("https://id.example/owner")?)
                .resource(Url::parse("https://storage.example/owner/shared/")?)
                .mode("Read")
                .mode("Append")
                .purpose(Url::parse("https://purpose.example/research")?)
                .expiration(Utc.with_ymd_and_hms(2099, 3, 1, 9, 0, 0).unwrap()),
        )
        .await?;

    // Owner looks the request up and approves it
    let request: AccessRequest = owner.fetch(issued.identifier()).await?;
    assert_eq!(request, issued);
    let grant = owner.grant_access(&request).await?;
    assert_eq!(grant.grantee(), Some(request.creator()));
    assert_eq!(grant.resources(), request.resources());
    assert_eq!(grant.modes(), request.modes());

    // Requester checks the grant and uses it
    assert!(requester.verify(&grant).await?.is_valid());
    let session = AccessGrantSession::of_access_grants(
        requester.current_session().clone(),
        [grant.clone()],
    );
    let target = Request::get(Url::parse("https://storage.example/owner/shared/report.ttl")?);
    let credential = session
        .authenticate(&target, &[])
        .await?
        .expect("grant covers the shared folder");
    assert_eq!(credential.token, AccessGrantSession::encode_grant(&grant));
    assert_eq!(credential.principal.as_ref().map(Url::as_str), Some("https://id.example/requester"));

    // Owner withdraws it
    owner.revoke(&grant).await?;
    let revocations = issuer.bodies("/status").await;
    assert_eq!(revocations.len(), 1);
    assert_eq!(revocations[0]["credentialId"], grant.identifier().as_str());
    Ok(())
}

#[tokio::test]
async fn test_request_denied() -> Result<()> {
    let issuer = MockIssuer::start().await;
    mount_issuance(&issuer).await;
    Mock::given(method("DELETE"))
        .and(path("/credentials/access-request-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&issuer.server)
        .await;

    let client = issuer.client();
    let request = AccessRequest::parse(&issuer.fixtures.access_request())?;

    let denial = client.deny_access(&request).await?;
    assert_eq!(denial.kind(), CredentialKind::Denial);
    assert_eq!(denial.recipient(), Some(request.creator()));

    // Denials cannot be revoked, only removed
    assert!(client.revoke(&denial).await.is_err());
    client.delete(&request).await?;
    Ok(())
}

#[tokio::test]
async fn test_owner_finds_pending_requests() -> Result<()> {
    let issuer = MockIssuer::start().await;
    let request = Fixtures::credential_of(&issuer.fixtures.access_request());
    Mock::given(method("POST"))
        .and(path("/derive"))
        .and(body_partial_json(json!({
            "verifiableClaim": {
                "type": ["SolidAccessRequest"],
                "credentialSubject": {"hasConsent": {
                    "isConsentForDataSubject": "https://id.example/owner"
                }}
            }
        })))
        .respond_with(json_response(
            200,
            &json!({"verifiableCredential": [request]}).to_string(),
        ))
        .expect(1)
        .mount(&issuer.server)
        .await;

    let owner = Url::parse("https://id.example/owner")?;
    let pending: Vec<AccessCredential> = issuer
        .client()
        .query::<AccessRequest>(None, None, Some(&owner), None, None)
        .await?
        .into_iter()
        .map(AccessCredential::from)
        .collect();

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), CredentialKind::Request);
    Ok(())
}

#[test]
fn test_blocking_client_flow() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let issuer = runtime.block_on(async {
        let issuer = MockIssuer::start().await;
        mount_issuance(&issuer).await;
        issuer
    });

    let client = blocking::AccessGrantClient::new(issuer.config())?;
    let request = AccessRequest::parse(&issuer.fixtures.access_request())?;
    let grant: AccessGrant = client.grant_access(&request)?;
    assert_eq!(grant.issuer(), &issuer.base());

    let anonymous = client.session(Arc::new(AnonymousSession::new()));
    assert!(anonymous.as_async().current_session().principal().is_none());

    // The mock server verifies its expectations on drop
    runtime.block_on(async move { drop(issuer) });
    Ok(())
}
