/// HTTP surface of the relay: health, descriptor, metrics and the inbox socket
pub mod health;
pub mod websocket;

pub use health::{health, root};
pub use websocket::inbox_ws;

use crate::metrics;
use actix_web::web;

/// Register every route served by the relay
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/", web::get().to(root))
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .route("/inbox", web::get().to(inbox_ws));
}
