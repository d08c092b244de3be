use actix_web::web;

use crate::dispatch::dispatch;

/// Every path not claimed by a local route goes through the dispatcher,
/// which answers 404 itself for unknown prefixes. Register this last.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/{tail:.*}").route(web::route().to(dispatch)));
}
