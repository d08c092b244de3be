use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Condition, middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booklog_gateway::{
    config::GatewayConfig, cors::build_cors, metrics::register_metrics, routes, state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let bind_addr = config.bind_addr.clone();
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting booklog-gateway on {}", bind_addr);
    if config.auth_enabled {
        tracing::info!("Authentication: enabled (mode: {})", config.verification.mode);
    } else {
        tracing::warn!("Authentication: disabled");
    }

    register_metrics();

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize gateway: {}", e);
            std::process::exit(1);
        }
    };
    for route in state.routes.routes() {
        tracing::info!(
            route = %route.name,
            prefix = %route.prefix,
            upstream = %route.upstream,
            auth = route.requires_auth && state.verifier.is_some(),
            strip = route.strip_prefix,
            "route registered"
        );
    }
    let state_data = web::Data::new(state);

    // RATE_LIMIT_RPM=0 switches the limiter off
    let governor_conf = match GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm.max(1) as u64)
        .finish()
    {
        Some(conf) => conf,
        None => {
            tracing::error!("Invalid rate limit: {} requests/minute", rate_limit_rpm);
            std::process::exit(1);
        }
    };
    if rate_limit_rpm == 0 {
        tracing::info!("Rate limiting: disabled");
    }

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(Condition::new(
                rate_limit_rpm > 0,
                Governor::new(&governor_conf),
            ))
            .wrap(build_cors(&allowed_origins))
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .bind(bind_addr.as_str())?
    .run()
    .await
}
