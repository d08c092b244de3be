use crate::auth::TokenVerifier;
use crate::config::{ConfigError, GatewayConfig};
use crate::proxy::{PassThrough, ResponseHook};
use crate::router::RouteTable;
use std::sync::Arc;

/// Shared application state. Everything here is immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub routes: Arc<RouteTable>,
    /// `None` when authentication is disabled
    pub verifier: Option<Arc<TokenVerifier>>,
    pub http_client: reqwest::Client,
    pub response_hook: Arc<dyn ResponseHook>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let routes = RouteTable::from_config(&config)?;

        let verifier = if config.auth_enabled {
            Some(Arc::new(TokenVerifier::from_config(&config.verification)?))
        } else {
            None
        };

        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none()) // redirects go back to the client
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            verifier,
            http_client,
            response_hook: Arc::new(PassThrough),
        })
    }

    /// Replace the response post-processing hook.
    pub fn with_response_hook(mut self, hook: Arc<dyn ResponseHook>) -> Self {
        self.response_hook = hook;
        self
    }
}
