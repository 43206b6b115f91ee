use std::sync::LazyLock;

use reports_auth::Algorithm;
use reports_auth::testutil::{TestSigningKey, jwks_document, realm_claims};
use reports_server::{AppConfig, ReportGenerator, build_app};
use serde_json::Value;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CERTS_PATH: &str = "/realms/reports-realm/protocol/openid-connect/certs";
const ISSUER: &str = "http://localhost:8080/realms/reports-realm";

static SIGNING_KEY: LazyLock<TestSigningKey> = LazyLock::new(|| TestSigningKey::generate("k1"));

struct TestServer {
    base: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

fn config_for(idp: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.keycloak_url = idp.uri();
    cfg.auth.issuer = Some(ISSUER.to_string());
    cfg.auth.request_timeout_ms = 2_000;
    cfg
}

async fn start_server(cfg: &AppConfig) -> TestServer {
    let app = build_app(cfg).expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        shutdown: tx,
        handle,
    }
}

async fn mount_certs(idp: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks_document(&[SIGNING_KEY.jwk("RS256")])),
        )
        .expect(expected_calls)
        .mount(idp)
        .await;
}

fn token_with_roles(sub: &str, roles: &[&str]) -> String {
    SIGNING_KEY.sign(&realm_claims(sub, ISSUER, "reports-api", roles))
}

#[tokio::test]
async fn service_endpoints_work() {
    let idp = MockServer::start().await;
    mount_certs(&idp, 0).await;
    let server = start_server(&config_for(&idp)).await;
    let client = reqwest::Client::new();

    // GET /
    let resp = client.get(format!("{}/", server.base)).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "Reports API");
    assert_eq!(body["status"], "ok");

    // GET /healthz
    let resp = client
        .get(format!("{}/healthz", server.base))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["x-request-id"], "trace-me");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    server.stop().await;
}

#[tokio::test]
async fn reports_for_authorized_user() {
    let idp = MockServer::start().await;
    // One fresh key fetch per request
    mount_certs(&idp, 2).await;
    let server = start_server(&config_for(&idp)).await;
    let client = reqwest::Client::new();
    let token = token_with_roles("u1", &["offline_access", "prothetic_user"]);

    let mut device_sets = Vec::new();
    for _ in 0..2 {
        let resp = client
            .get(format!("{}/reports", server.base))
            .bearer_auth(&token)
            .header("origin", "http://localhost:3000")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );
        assert!(resp.headers().contains_key("x-request-id"));

        let body: Value = resp.json().await.unwrap();
        let reports = body["reports"].as_array().unwrap();
        assert_eq!(reports.len(), 7);
        for report in reports {
            let value = report["value"].as_u64().unwrap();
            assert!((50..=99).contains(&value));
            assert!(report["reportId"].is_string());
        }
        device_sets.push(
            reports
                .iter()
                .map(|r| r["device"].as_str().unwrap().to_string())
                .collect::<Vec<_>>(),
        );
    }

    assert_eq!(device_sets[0], device_sets[1]);
    assert_eq!(
        device_sets[0][0],
        ReportGenerator::device_id("u1", 0).to_string()
    );

    server.stop().await;
}

#[tokio::test]
async fn missing_or_invalid_credentials_are_unauthorized() {
    let idp = MockServer::start().await;
    let server = start_server(&config_for(&idp)).await;
    mount_certs(&idp, 2).await;
    let client = reqwest::Client::new();
    let url = format!("{}/reports", server.base);

    // No Authorization header
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let challenge = resp.headers()["www-authenticate"].to_str().unwrap().to_string();
    assert!(challenge.starts_with("Bearer realm=\"reports\""));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");

    // Not a JWT; rejected before contacting the identity provider
    let resp = client.get(&url).bearer_auth("garbage").send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_token");
    assert_eq!(body["error_description"], "Malformed token");

    // Unknown key id
    let token = SIGNING_KEY.sign_with(
        Algorithm::RS256,
        Some("rotated"),
        &realm_claims("u1", ISSUER, "reports-api", &["prothetic_user"]),
    );
    let resp = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error_description"], "Token signing key not recognized");

    // Wrong issuer; internal reason stays out of the response
    let token = SIGNING_KEY.sign(&realm_claims(
        "u1",
        "http://evil/realms/reports-realm",
        "reports-api",
        &["prothetic_user"],
    ));
    let resp = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_token");
    assert_eq!(body["error_description"], "Invalid token");

    server.stop().await;
}

#[tokio::test]
async fn missing_role_is_forbidden() {
    let idp = MockServer::start().await;
    mount_certs(&idp, 1).await;
    let server = start_server(&config_for(&idp)).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/reports", server.base))
        .bearer_auth(token_with_roles("u1", &["other_role"]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert!(!resp.headers().contains_key("www-authenticate"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_scope");

    server.stop().await;
}

#[tokio::test]
async fn identity_provider_outage_is_server_error() {
    let idp = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&idp)
        .await;
    let server = start_server(&config_for(&idp)).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/reports", server.base))
        .bearer_auth(token_with_roles("u1", &["prothetic_user"]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "server_error");
    assert!(!body.to_string().contains("503"));

    server.stop().await;
}

#[tokio::test]
async fn key_cache_reuses_fetched_keys_when_enabled() {
    let idp = MockServer::start().await;
    mount_certs(&idp, 1).await;
    let mut cfg = config_for(&idp);
    cfg.auth.key_cache_ttl_secs = Some(300);
    let server = start_server(&cfg).await;
    let client = reqwest::Client::new();
    let token = token_with_roles("u1", &["prothetic_user"]);

    for _ in 0..3 {
        let resp = client
            .get(format!("{}/reports", server.base))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    server.stop().await;
}
