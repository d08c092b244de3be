pub mod gateway;
pub mod health;

use actix_web::web;

/// Local endpoints first, then the dispatcher catch-all.
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::configure(cfg);
    gateway::configure(cfg);
}
