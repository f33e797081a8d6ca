//! Common test utilities shared across integration and E2E tests

use std::sync::Arc;

use access_grant::{AccessGrantClient, AccessGrantConfig, Session};
use serde_json::Value;
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const VC_CONFIGURATION: &str = include_str!("../fixtures/vc_configuration.json");
const ACCESS_REQUEST: &str = include_str!("../fixtures/access_request.json");
const ACCESS_GRANT: &str = include_str!("../fixtures/access_grant.json");
const ACCESS_DENIAL: &str = include_str!("../fixtures/access_denial.json");

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("access_grant=debug")
        .with_test_writer()
        .try_init();
}

/// Fixture documents, with `{{baseUrl}}` bound to a mock issuer
#[derive(Debug, Clone)]
pub struct Fixtures {
    base: String,
}

impl Fixtures {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    fn render(&self, template: &str) -> String {
        template.replace("{{baseUrl}}", &self.base)
    }

    pub fn vc_configuration(&self) -> String {
        self.render(VC_CONFIGURATION)
    }

    pub fn access_request(&self) -> String {
        self.render(ACCESS_REQUEST)
    }

    pub fn access_grant(&self) -> String {
        self.render(ACCESS_GRANT)
    }

    pub fn access_denial(&self) -> String {
        self.render(ACCESS_DENIAL)
    }

    /// The bare credential inside a presentation fixture
    pub fn credential_of(document: &str) -> Value {
        let presentation: Value =
            serde_json::from_str(document).expect("fixture is valid JSON");
        presentation["verifiableCredential"][0].clone()
    }
}

/// A wiremock VC issuer serving its `.well-known/vc-configuration`
pub struct MockIssuer {
    pub server: MockServer,
    pub fixtures: Fixtures,
}

impl MockIssuer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let fixtures = Fixtures::new(server.uri());

        Mock::given(method("GET"))
            .and(path("/.well-known/vc-configuration"))
            .respond_with(json_response(200, &fixtures.vc_configuration()))
            .mount(&server)
            .await;

        Self { server, fixtures }
    }

    pub fn base(&self) -> Url {
        Url::parse(&self.server.uri()).expect("mock server uri is a URL")
    }

    pub fn url(&self, path: &str) -> Url {
        self.base().join(path).expect("valid path")
    }

    pub fn config(&self) -> AccessGrantConfig {
        AccessGrantConfig::new(self.base())
    }

    pub fn client(&self) -> AccessGrantClient {
        AccessGrantClient::new(self.config()).expect("client builds")
    }

    pub fn client_with(&self, session: Arc<dyn Session>) -> AccessGrantClient {
        self.client().session(session)
    }

    /// JSON bodies of every request received on `path`
    pub async fn bodies(&self, request_path: &str) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == request_path)
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }
}

/// A JSON response with the given status
pub fn json_response(status: u16, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .insert_header("content-type", "application/json")
        .set_body_string(body.to_string())
}
