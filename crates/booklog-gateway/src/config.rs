use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::validation::{validate_route_prefix, validate_upstream_url};

const DEFAULT_ADDR: &str = ":8000";
const DEFAULT_USER_SERVICE_URL: &str = "http://user-service:8080";
const DEFAULT_BOOK_SERVICE_URL: &str = "http://book-service:8081";
const DEFAULT_INTROSPECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RATE_LIMIT_RPM: u32 = 600;

/// How bearer tokens are verified. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    /// Ask a remote introspection endpoint.
    Introspect,
    /// Verify HS256/HS384/HS512 signatures with a shared secret.
    LocalHmac,
    /// Verify RS256/RS384/RS512 signatures with a public key.
    LocalRsa,
    /// Pick HMAC or RSA from the token header, depending on configured keys.
    Auto,
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Introspect => write!(f, "introspect"),
            Self::LocalHmac => write!(f, "local-hmac"),
            Self::LocalRsa => write!(f, "local-rsa"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for VerificationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "introspect" | "introspection" => Ok(Self::Introspect),
            "hmac" | "local-hmac" | "hs256" => Ok(Self::LocalHmac),
            "rsa" | "local-rsa" | "rs256" => Ok(Self::LocalRsa),
            "auto" => Ok(Self::Auto),
            _ => Err(ConfigError::InvalidValue {
                key: "AUTH_MODE",
                value: s.to_string(),
            }),
        }
    }
}

/// Token verification settings.
#[derive(Clone)]
pub struct VerificationConfig {
    pub mode: VerificationMode,
    /// Introspection endpoint (required for `introspect`)
    pub introspect_url: Option<String>,
    /// Upper bound for one introspection round-trip
    pub introspect_timeout: Duration,
    /// HMAC shared secret
    pub hmac_secret: Option<Vec<u8>>,
    /// RSA public key, PEM encoded
    pub rsa_public_key_pem: Option<String>,
}

impl fmt::Debug for VerificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationConfig")
            .field("mode", &self.mode)
            .field("introspect_url", &self.introspect_url)
            .field("introspect_timeout", &self.introspect_timeout)
            .field(
                "hmac_secret",
                &self.hmac_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "rsa_public_key_pem",
                &self.rsa_public_key_pem.as_ref().map(|_| "[PEM]"),
            )
            .finish()
    }
}

impl VerificationConfig {
    /// Check that the material the selected mode needs is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            VerificationMode::Introspect => {
                let url = self
                    .introspect_url
                    .as_deref()
                    .ok_or(ConfigError::MissingRequired("AUTH_INTROSPECT_URL"))?;
                url::Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.to_string()))?;
            }
            VerificationMode::LocalHmac => {
                if self.hmac_secret.is_none() {
                    return Err(ConfigError::MissingRequired("AUTH_HS_SECRET"));
                }
            }
            VerificationMode::LocalRsa => {
                if self.rsa_public_key_pem.is_none() {
                    return Err(ConfigError::MissingRequired("AUTH_RS_PUBKEY"));
                }
            }
            VerificationMode::Auto => {
                if self.hmac_secret.is_none() && self.rsa_public_key_pem.is_none() {
                    return Err(ConfigError::MissingRequired(
                        "AUTH_HS_SECRET or AUTH_RS_PUBKEY",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// An extra authenticated resource route from `GATEWAY_ROUTES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRoute {
    pub prefix: String,
    pub upstream: String,
}

#[derive(Clone)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to (`host:port`)
    pub bind_addr: String,
    /// Identity service: registration, login and `/users`
    pub user_service_url: String,
    /// Book catalog service: `/books`
    pub book_service_url: String,
    /// Additional resource prefixes
    pub extra_routes: Vec<ResourceRoute>,
    /// Global switch; when false every route is public
    pub auth_enabled: bool,
    pub verification: VerificationConfig,
    /// Upper bound for one proxied round-trip
    pub upstream_timeout: Duration,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Per-IP requests per minute, 0 disables rate limiting
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("user_service_url", &self.user_service_url)
            .field("book_service_url", &self.book_service_url)
            .field("extra_routes", &self.extra_routes)
            .field("auth_enabled", &self.auth_enabled)
            .field("verification", &self.verification)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values are
    /// treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr =
            normalize_bind_addr(&get("GATEWAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()))?;

        let user_service_url =
            get("USER_SERVICE_URL").unwrap_or_else(|| DEFAULT_USER_SERVICE_URL.to_string());
        validate_upstream_url(&user_service_url)?;

        let book_service_url =
            get("BOOK_SERVICE_URL").unwrap_or_else(|| DEFAULT_BOOK_SERVICE_URL.to_string());
        validate_upstream_url(&book_service_url)?;

        let extra_routes = match get("GATEWAY_ROUTES") {
            Some(raw) => parse_routes(&raw)?,
            None => Vec::new(),
        };

        let auth_enabled = match get("GATEWAY_AUTH_ENABLED") {
            Some(v) => parse_bool("GATEWAY_AUTH_ENABLED", &v)?,
            None => true,
        };

        let introspect_url = get("AUTH_INTROSPECT_URL");
        let mode = match get("AUTH_MODE") {
            Some(m) => m.parse()?,
            None => derive_mode(introspect_url.is_some(), get("AUTH_ALGO").as_deref()),
        };

        let introspect_timeout = Duration::from_millis(parse_timeout(
            "AUTH_INTROSPECT_TIMEOUT_MS",
            get("AUTH_INTROSPECT_TIMEOUT_MS"),
            DEFAULT_INTROSPECT_TIMEOUT_MS,
        )?);

        let hmac_secret = get("AUTH_HS_SECRET").map(String::into_bytes);
        // PEM blocks often arrive through env files with escaped newlines
        let rsa_public_key_pem = get("AUTH_RS_PUBKEY").map(|pem| pem.replace("\\n", "\n"));

        let verification = VerificationConfig {
            mode,
            introspect_url,
            introspect_timeout,
            hmac_secret,
            rsa_public_key_pem,
        };

        if auth_enabled {
            verification.validate()?;
            if let Some(ref secret) = verification.hmac_secret {
                if secret.len() < 32 {
                    tracing::warn!(
                        "AUTH_HS_SECRET is short ({} bytes); use at least 32 random bytes",
                        secret.len()
                    );
                }
            }
        } else {
            tracing::warn!("GATEWAY_AUTH_ENABLED=false: protected routes are served without authentication");
        }

        let upstream_timeout = Duration::from_secs(parse_timeout(
            "UPSTREAM_TIMEOUT_SECS",
            get("UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?);

        let allowed_origins: Vec<String> = get("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm: u32 = parse_number(
            "RATE_LIMIT_RPM",
            get("RATE_LIMIT_RPM"),
            DEFAULT_RATE_LIMIT_RPM as u64,
        )?
        .try_into()
        .map_err(|_| ConfigError::InvalidValue {
            key: "RATE_LIMIT_RPM",
            value: "out of range".to_string(),
        })?;

        let metrics_token = get("METRICS_TOKEN");
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set: /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            bind_addr,
            user_service_url,
            book_service_url,
            extra_routes,
            auth_enabled,
            verification,
            upstream_timeout,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
        })
    }
}

/// Legacy selection: an introspection URL wins, then `AUTH_ALGO`, then auto.
fn derive_mode(has_introspect_url: bool, algo: Option<&str>) -> VerificationMode {
    if has_introspect_url {
        return VerificationMode::Introspect;
    }
    match algo.map(|a| a.trim().to_ascii_uppercase()).as_deref() {
        Some("HS256") => VerificationMode::LocalHmac,
        Some("RS256") => VerificationMode::LocalRsa,
        _ => VerificationMode::Auto,
    }
}

/// `:8000` binds every interface.
fn normalize_bind_addr(raw: &str) -> Result<String, ConfigError> {
    let raw = raw.trim();
    let addr = if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw.to_string()
    };

    let valid_port = addr
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if !valid_port {
        return Err(ConfigError::InvalidValue {
            key: "GATEWAY_ADDR",
            value: raw.to_string(),
        });
    }
    Ok(addr)
}

/// Parse `"/orders=http://orders:8082,/reviews=http://reviews:8083"`.
fn parse_routes(raw: &str) -> Result<Vec<ResourceRoute>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (prefix, upstream) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidRoute(entry.to_string()))?;
            let prefix = prefix.trim().to_string();
            let upstream = upstream.trim().to_string();
            validate_route_prefix(&prefix)?;
            validate_upstream_url(&upstream)?;
            Ok(ResourceRoute { prefix, upstream })
        })
        .collect()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number(key: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

/// Timeouts of zero would fail every call.
fn parse_timeout(key: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match parse_number(key, value, default)? {
        0 => Err(ConfigError::InvalidValue {
            key,
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("route prefixes overlap: {0} and {1}")]
    OverlappingRoutes(String, String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
