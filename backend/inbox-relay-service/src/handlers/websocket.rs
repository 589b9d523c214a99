use crate::auth::Handshake;
use crate::error::RelayError;
use crate::state::AppState;
use crate::websocket::WsSession;
use actix_web::{web, Error, HttpRequest, HttpResponse, ResponseError};
use actix_web_actors::ws;

/// GET /inbox: websocket upgrade for the inbox namespace.
///
/// Handshakes without a credential are accepted unauthenticated; a credential
/// that fails verification is answered with 401 before the upgrade.
pub async fn inbox_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let handshake = Handshake::from_request(&req);

    let (connection_id, outbound) = match state.sessions.connect(handshake).await {
        Ok(registered) => registered,
        Err(e @ RelayError::Unauthorized(_)) => {
            tracing::warn!(error = %e, "websocket handshake rejected");
            return Ok(e.error_response());
        }
        Err(e) => return Err(e.into()),
    };

    let session = WsSession::new(
        connection_id.clone(),
        state.sessions.clone(),
        outbound,
        &state.websocket,
    );

    let started = ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(state.websocket.max_frame_size)
        .start();

    if started.is_err() {
        // Upgrade never happened, so no actor will run the cleanup
        state.sessions.disconnect(&connection_id).await;
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestHarness;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_invalid_credential_gets_401() {
        let harness = TestHarness::new();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.app_state()))
                .route("/inbox", web::get().to(inbox_ws)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/inbox?token=not-a-token")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(harness.sessions.session_count().await, 0);
    }

    #[actix_web::test]
    async fn test_plain_http_request_is_cleaned_up() {
        let harness = TestHarness::new();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.app_state()))
                .route("/inbox", web::get().to(inbox_ws)),
        )
        .await;

        // No upgrade headers, so the handshake fails after registration
        let req = test::TestRequest::get().uri("/inbox").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
        assert_eq!(harness.sessions.session_count().await, 0);
        assert_eq!(harness.connections.total_connections().await, 0);
    }
}
