use crate::websocket::messages::iso_timestamp;
use actix_web::HttpResponse;
use serde_json::json;

pub const SERVICE_NAME: &str = "clothme-real-api";

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": iso_timestamp(),
        "service": SERVICE_NAME,
    }))
}

/// GET /
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": "ClothMe Real-time API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "WebSocket server for real-time features",
        "websocket": "/inbox",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_health_payload() {
        let app = test::init_service(App::new().route("/health", web::get().to(health))).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(body["timestamp"].as_str().is_some());
    }

    #[actix_web::test]
    async fn test_root_descriptor() {
        let app = test::init_service(App::new().route("/", web::get().to(root))).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["websocket"], "/inbox");
    }
}
