pub mod auth;
pub mod config;
pub mod cors;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod router;
pub mod routes;
pub mod state;
pub mod validation;

pub use auth::{TokenVerifier, VerifiedIdentity, VerifyError};
pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use router::RouteTable;
pub use state::AppState;
