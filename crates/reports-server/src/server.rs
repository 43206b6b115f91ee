use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, header::AUTHORIZATION},
    middleware,
    routing::get,
};
use reports_auth::{
    AuthState, CachingKeyProvider, IdentityProviderConfig, KeyFetchError, KeyProvider,
    RealmKeyProvider, TokenVerifier,
};
use thiserror::Error;
use tower_http::{
    cors::{AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use url::Url;

use crate::{
    config::{AppConfig, AuthSettings, CorsConfig},
    handlers,
    middleware::{self as app_middleware, RequestId},
    reports::ReportGenerator,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Key provider setup failed: {0}")]
    KeyProvider(#[from] KeyFetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub reports: Arc<ReportGenerator>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub struct ReportsServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(cfg: &AppConfig) -> Result<Router, ServerError> {
    let state = AppState {
        auth: build_auth_state(&cfg.auth)?,
        reports: Arc::new(ReportGenerator::new(&cfg.reports)),
    };

    Ok(Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/reports", get(handlers::reports))
        .with_state(state)
        // Middleware stack (outermost last: request id -> cors -> trace)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let req_id = req
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.as_str().to_string())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(cors_layer(&cfg.cors)?)
        .layer(middleware::from_fn(app_middleware::request_id)))
}

/// Wires the key provider and verifier for the configured realm.
fn build_auth_state(auth: &AuthSettings) -> Result<AuthState, ServerError> {
    let base_url = Url::parse(&auth.keycloak_url)
        .map_err(|e| ServerError::Config(format!("auth.keycloak_url: {e}")))?;
    let idp = IdentityProviderConfig::new(base_url, &auth.realm)
        .with_request_timeout(auth.request_timeout());

    let realm_keys = RealmKeyProvider::new(idp)?;
    tracing::info!(certs_url = %realm_keys.certs_url(), "Realm key provider configured");

    let provider: Arc<dyn KeyProvider> = match auth.key_cache_ttl_secs {
        Some(ttl) => {
            tracing::warn!(
                ttl_secs = ttl,
                "Realm key caching enabled; key rotation is picked up only after the TTL"
            );
            Arc::new(CachingKeyProvider::new(
                Arc::new(realm_keys),
                std::time::Duration::from_secs(ttl),
            ))
        }
        None => Arc::new(realm_keys),
    };

    let verifier = TokenVerifier::new(provider)
        .with_allowed_algorithms(auth.algorithms().map_err(ServerError::Config)?)
        .with_leeway(auth.clock_skew());

    Ok(AuthState::new(Arc::new(verifier), auth.requirements()))
}

fn cors_layer(cors: &CorsConfig) -> Result<CorsLayer, ServerError> {
    let allow_origin = if cors.allowed_origins.iter().any(|origin| origin == "*") {
        // tower-http panics on a wildcard inside a list or next to credentials
        if cors.allowed_origins.len() > 1 || cors.allow_credentials {
            return Err(ServerError::Config(
                "CORS origin \"*\" must stand alone and requires allow_credentials = false".into(),
            ));
        }
        AllowOrigin::any()
    } else {
        let origins = cors
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| ServerError::Config(format!("invalid CORS origin: {origin}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers([AUTHORIZATION])
        .allow_credentials(cors.allow_credentials))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> Result<ReportsServer, ServerError> {
        let app = build_app(&self.config)?;

        Ok(ReportsServer {
            addr: self.addr,
            app,
        })
    }
}

impl ReportsServer {
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
