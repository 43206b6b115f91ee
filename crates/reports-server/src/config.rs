use std::{net::SocketAddr, str::FromStr, time::Duration};

use axum::http::HeaderValue;
use reports_auth::{AccessRequirements, Algorithm};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity provider and access requirements
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Synthetic report generation
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Auth validations
        Url::parse(&self.auth.keycloak_url)
            .map_err(|e| format!("auth.keycloak_url is not a valid URL: {e}"))?;
        if self.auth.realm.trim().is_empty() {
            return Err("auth.realm must not be empty".into());
        }
        if self.auth.audience.trim().is_empty() {
            return Err("auth.audience must not be empty".into());
        }
        if self.auth.required_role.trim().is_empty() {
            return Err("auth.required_role must not be empty".into());
        }
        if matches!(self.auth.issuer.as_deref(), Some(iss) if iss.trim().is_empty()) {
            return Err("auth.issuer must not be empty when set".into());
        }
        if self.auth.request_timeout_ms == 0 {
            return Err("auth.request_timeout_ms must be > 0".into());
        }
        if self.auth.key_cache_ttl_secs == Some(0) {
            return Err("auth.key_cache_ttl_secs must be > 0 when set".into());
        }
        if self.auth.allowed_algorithms.is_empty() {
            return Err("auth.allowed_algorithms must not be empty".into());
        }
        self.auth.algorithms()?;
        // CORS validations
        let has_wildcard = self.cors.allowed_origins.iter().any(|o| o == "*");
        if has_wildcard && self.cors.allow_credentials {
            return Err("cors.allowed_origins cannot contain \"*\" when allow_credentials is true".into());
        }
        if has_wildcard && self.cors.allowed_origins.len() > 1 {
            return Err("cors.allowed_origins: \"*\" cannot be combined with other origins".into());
        }
        for origin in &self.cors.allowed_origins {
            HeaderValue::from_str(origin)
                .map_err(|_| format!("cors.allowed_origins contains an invalid origin: {origin}"))?;
        }
        // Report validations
        if self.reports.devices_per_user == 0 {
            return Err("reports.devices_per_user must be > 0".into());
        }
        if self.reports.min_value > self.reports.max_value {
            return Err("reports.min_value must be <= reports.max_value".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Identity provider location and what every token must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Base URL of the Keycloak server (default: http://keycloak:8080)
    #[serde(default = "default_keycloak_url")]
    pub keycloak_url: String,

    /// Realm whose keys sign access tokens (default: reports-realm)
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Expected `iss` claim.
    /// If not set, defaults to {keycloak_url}/realms/{realm}
    #[serde(default)]
    pub issuer: Option<String>,

    /// Expected `aud` entry (default: reports-api)
    #[serde(default = "default_audience")]
    pub audience: String,

    /// Realm role required to read reports (default: prothetic_user)
    #[serde(default = "default_required_role")]
    pub required_role: String,

    /// Timeout for the certs request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Reuse fetched keys for this many seconds.
    /// Unset means keys are fetched on every verification.
    #[serde(default)]
    pub key_cache_ttl_secs: Option<u64>,

    /// Signature algorithms accepted from token headers
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_algorithms: Vec<String>,

    /// Clock skew tolerated on expiry, in seconds
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

fn default_keycloak_url() -> String {
    "http://keycloak:8080".into()
}
fn default_realm() -> String {
    "reports-realm".into()
}
fn default_audience() -> String {
    "reports-api".into()
}
fn default_required_role() -> String {
    "prothetic_user".into()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_allowed_algorithms() -> Vec<String> {
    reports_auth::DEFAULT_ALLOWED_ALGORITHMS
        .iter()
        .map(|alg| format!("{alg:?}"))
        .collect()
}
fn default_clock_skew_secs() -> u64 {
    60
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            keycloak_url: default_keycloak_url(),
            realm: default_realm(),
            issuer: None,
            audience: default_audience(),
            required_role: default_required_role(),
            request_timeout_ms: default_request_timeout_ms(),
            key_cache_ttl_secs: None,
            allowed_algorithms: default_allowed_algorithms(),
            clock_skew_secs: default_clock_skew_secs(),
        }
    }
}

impl AuthSettings {
    /// Issuer tokens must carry.
    pub fn effective_issuer(&self) -> String {
        self.issuer.clone().unwrap_or_else(|| {
            format!(
                "{}/realms/{}",
                self.keycloak_url.trim_end_matches('/'),
                self.realm
            )
        })
    }

    pub fn requirements(&self) -> AccessRequirements {
        AccessRequirements::new(
            self.effective_issuer(),
            &self.audience,
            &self.required_role,
        )
    }

    /// Parses the configured algorithm names.
    pub fn algorithms(&self) -> Result<Vec<Algorithm>, String> {
        self.allowed_algorithms
            .iter()
            .map(|name| {
                let alg = Algorithm::from_str(name.trim())
                    .map_err(|_| format!("auth.allowed_algorithms: unknown algorithm {name}"))?;
                if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                    return Err(format!(
                        "auth.allowed_algorithms: symmetric algorithm {name} cannot be verified with realm keys"
                    ));
                }
                Ok(alg)
            })
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

/// Static cross-origin policy applied to every route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_allow_credentials")]
    pub allow_credentials: bool,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn default_allow_credentials() -> bool {
    true
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_credentials: default_allow_credentials(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Number of devices reported per user
    #[serde(default = "default_devices_per_user")]
    pub devices_per_user: usize,
    /// Lower bound of generated values (inclusive)
    #[serde(default = "default_min_value")]
    pub min_value: u32,
    /// Upper bound of generated values (inclusive)
    #[serde(default = "default_max_value")]
    pub max_value: u32,
}

fn default_devices_per_user() -> usize {
    7
}
fn default_min_value() -> u32 {
    50
}
fn default_max_value() -> u32 {
    99
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            devices_per_user: default_devices_per_user(),
            min_value: default_min_value(),
            max_value: default_max_value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "reports.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., REPORTS__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("REPORTS")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.allowed_algorithms")
                .with_list_parse_key("cors.allowed_origins"),
        );
        // Variables the deployment has always used for the identity provider
        builder = builder
            .set_override_option("auth.keycloak_url", non_empty_env("KEYCLOAK_URL"))
            .map_err(|e| format!("config build error: {e}"))?
            .set_override_option("auth.realm", non_empty_env("KEYCLOAK_REALM"))
            .map_err(|e| format!("config build error: {e}"))?;
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }

    fn non_empty_env(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}
