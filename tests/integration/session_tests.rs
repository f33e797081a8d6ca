//! Integration tests for Access Grant sessions
//!
//! Covers grant selection against real resource hierarchies, the per-URI
//! credential cache under concurrent use, and a client that presents a held
//! grant when its issuer challenges a request.

use std::sync::Arc;

use access_grant::{
    AccessGrant, AccessGrantSession, AccessRequest, AnonymousSession, Challenge, CredentialFilter,
    Request, Session, TokenSession,
};
use access_grant_tests::common::{json_response, Fixtures, MockIssuer};
use futures::future::join_all;
use serde_json::{json, Value};
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, ResponseTemplate,
};

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// The fixture grant, rescoped to `resources`
fn grant_for(fixtures: &Fixtures, id: &str, resources: &[&str]) -> AccessGrant {
    let mut document: Value = serde_json::from_str(&fixtures.access_grant()).unwrap();
    let credential = &mut document["verifiableCredential"][0];
    credential["id"] = json!(id);
    credential["credentialSubject"]["providedConsent"]["forPersonalData"] = json!(resources);
    AccessGrant::parse(&document.to_string()).unwrap()
}

#[tokio::test]
async fn test_grant_scope_follows_hierarchy() {
    let fixtures = Fixtures::new("https://vc.example");
    let grant = grant_for(
        &fixtures,
        "https://vc.example/credentials/shared",
        &["https://storage.example/owner/shared/"],
    );
    let session = AccessGrantSession::of_access_grants(Arc::new(AnonymousSession::new()), [grant]);

    for covered in [
        "https://storage.example/owner/shared/",
        "https://storage.example/owner/shared/notes.ttl",
        "https://storage.example/owner/shared/deep/er/file.txt#fragment",
    ] {
        let request = Request::get(url(covered));
        assert!(
            session.authenticate(&request, &[]).await.unwrap().is_some(),
            "{covered} should be covered"
        );
    }

    for outside in [
        "https://storage.example/owner/",
        "https://storage.example/owner/shared",
        "https://storage.example/owner/shared-other/file",
        "http://storage.example/owner/shared/notes.ttl",
        "https://storage.example:8443/owner/shared/notes.ttl",
    ] {
        let request = Request::get(url(outside));
        assert!(
            session.authenticate(&request, &[]).await.unwrap().is_none(),
            "{outside} should not be covered"
        );
    }
}

#[tokio::test]
async fn test_cache_ignores_fragment() {
    let fixtures = Fixtures::new("https://vc.example");
    let grant = grant_for(
        &fixtures,
        "https://vc.example/credentials/shared",
        &["https://storage.example/owner/shared/"],
    );
    let session = AccessGrantSession::of_access_grants(Arc::new(AnonymousSession::new()), [grant]);

    let request = Request::get(url("https://storage.example/owner/shared/card#me"));
    let credential = session.authenticate(&request, &[]).await.unwrap().unwrap();

    let same_document = Request::get(url("https://storage.example/owner/shared/card#it"));
    assert_eq!(session.from_cache(&same_document), Some(credential));
}

#[tokio::test]
async fn test_concurrent_authentication() {
    let fixtures = Fixtures::new("https://vc.example");
    let grant = grant_for(
        &fixtures,
        "https://vc.example/credentials/shared",
        &["https://storage.example/owner/shared/"],
    );
    let expected = AccessGrantSession::encode_grant(&grant);
    let session = Arc::new(AccessGrantSession::of_access_grants(
        Arc::new(AnonymousSession::new()),
        [grant],
    ));

    let tasks = (0..16).map(|n| {
        let session = session.clone();
        tokio::spawn(async move {
            let request = Request::get(url(&format!(
                "https://storage.example/owner/shared/file-{n}"
            )));
            session.authenticate(&request, &[]).await
        })
    });
    let credentials = join_all(tasks).await;

    for credential in credentials {
        let credential = credential.unwrap().unwrap().unwrap();
        assert_eq!(credential.token, expected);
    }
    for n in 0..16 {
        let request = Request::get(url(&format!("https://storage.example/owner/shared/file-{n}")));
        assert!(session.from_cache(&request).is_some());
    }
}

#[tokio::test]
async fn test_falls_back_to_token_session() {
    let fixtures = Fixtures::new("https://vc.example");
    let grant = grant_for(
        &fixtures,
        "https://vc.example/credentials/shared",
        &["https://storage.example/owner/shared/"],
    );
    let delegate = Arc::new(TokenSession::of_token(
        "owner-token",
        Some(url("https://id.example/owner")),
    ));
    let session = AccessGrantSession::of_access_grants(delegate.clone(), [grant]);

    let private = Request::get(url("https://storage.example/owner/private/diary"));
    let credential = session
        .authenticate(&private, &[Challenge::new("Bearer")])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.token, "owner-token");
    assert!(delegate.from_cache(&private).is_some());
    assert_eq!(session.from_cache(&private), delegate.from_cache(&private));
    assert!(session.cached_grant(&private).is_none());

    // No bearer challenge the delegate can answer
    let dpop_only = Request::get(url("https://storage.example/owner/private/other"));
    assert!(session
        .authenticate(&dpop_only, &[Challenge::new("DPoP")])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_client_presents_held_grant() {
    let issuer = MockIssuer::start().await;
    let credentials = issuer.url("/credentials/");
    let grant = grant_for(
        &issuer.fixtures,
        issuer.url("/credentials/held-grant").as_str(),
        &[credentials.as_str()],
    );
    let token = AccessGrantSession::encode_grant(&grant);
    let request = Fixtures::credential_of(&issuer.fixtures.access_request());

    Mock::given(method("GET"))
        .and(path("/credentials/"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(json_response(200, &json!({"items": [request]}).to_string()))
        .with_priority(1)
        .expect(2)
        .mount(&issuer.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/credentials/"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Bearer realm=\"vc\""),
        )
        .expect(1)
        .mount(&issuer.server)
        .await;

    let session = Arc::new(AccessGrantSession::of_access_grants(
        Arc::new(AnonymousSession::new()),
        [grant.clone()],
    ));
    let client = issuer.client_with(session.clone());
    let filter = CredentialFilter::<AccessRequest>::builder().build();

    let first = client.search(&filter).await.unwrap();
    assert_eq!(first.items().len(), 1);

    // The second search reuses the cached grant credential without a challenge
    let second = client.search(&filter).await.unwrap();
    assert_eq!(second.items().len(), 1);

    let cached = session
        .cached_grant(&Request::get(filter.as_url(&credentials).unwrap()))
        .unwrap();
    assert_eq!(cached, grant);
}

#[tokio::test]
async fn test_delegated_requests_reuse_owner_token() {
    let issuer = MockIssuer::start().await;
    Mock::given(method("GET"))
        .and(path("/credentials/"))
        .and(header("authorization", "Bearer owner-token"))
        .respond_with(json_response(200, r#"{"items": []}"#))
        .with_priority(1)
        .expect(3)
        .mount(&issuer.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/credentials/"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", "Bearer realm=\"vc\""),
        )
        .expect(1)
        .mount(&issuer.server)
        .await;

    let owner = Arc::new(TokenSession::of_token(
        "owner-token",
        Some(url("https://id.example/owner")),
    ));
    let session = Arc::new(AccessGrantSession::of_access_grants(owner, Vec::new()));
    let client = issuer.client_with(session);
    let filter = CredentialFilter::<AccessRequest>::builder().build();

    for _ in 0..3 {
        assert!(client.search(&filter).await.unwrap().items().is_empty());
    }

    // Only the first search goes out without the owner's token
    let unauthenticated = issuer
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/credentials/")
        .filter(|request| !request.headers.contains_key("authorization"))
        .count();
    assert_eq!(unauthenticated, 1);
}
