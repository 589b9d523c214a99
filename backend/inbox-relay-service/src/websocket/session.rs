use super::{ConnectionId, ServerMessage};
use crate::config::WebSocketConfig;
use crate::services::SessionManager;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Websocket actor for one inbox connection.
///
/// Text frames are queued to a per-connection worker that handles them one at
/// a time, so requests from one client complete in arrival order. When the
/// actor stops, the queue is closed and the worker runs disconnect cleanup
/// after the last queued request.
pub struct WsSession {
    id: ConnectionId,
    sessions: SessionManager,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    outbound: Option<mpsc::UnboundedReceiver<ServerMessage>>,
    inbound: Option<mpsc::UnboundedSender<String>>,
}

impl WsSession {
    pub fn new(
        id: ConnectionId,
        sessions: SessionManager,
        outbound: mpsc::UnboundedReceiver<ServerMessage>,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            id,
            sessions,
            hb: Instant::now(),
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
            outbound: Some(outbound),
            inbound: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(connection_id = %act.id, "heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn start_worker(&mut self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.inbound = Some(tx);

        let sessions = self.sessions.clone();
        let id = self.id.clone();
        actix::spawn(async move {
            while let Some(text) = rx.recv().await {
                let reply = sessions.handle_text(&id, &text).await;
                sessions.connections().send_to(&id, reply).await;
            }
            sessions.disconnect(&id).await;
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(connection_id = %self.id, "websocket session started");
        self.hb(ctx);
        self.start_worker();

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(connection_id = %self.id, "websocket session stopped");
        // Closing the queue lets the worker finish in-flight requests, then clean up
        self.inbound.take();
    }
}

/// Frames queued for this connection by the session manager or the fan-out router
impl StreamHandler<ServerMessage> for WsSession {
    fn handle(&mut self, msg: ServerMessage, ctx: &mut Self::Context) {
        match msg.to_json() {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(
                connection_id = %self.id,
                event = msg.event_name(),
                error = %e,
                "failed to serialize outbound frame"
            ),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // Outbound channel closes once the connection is unregistered
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                let queued = self
                    .inbound
                    .as_ref()
                    .map(|tx| tx.send(text.to_string()).is_ok())
                    .unwrap_or(false);
                if !queued {
                    tracing::warn!(connection_id = %self.id, "request worker gone, closing");
                    ctx.stop();
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!(connection_id = %self.id, "binary frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(connection_id = %self.id, ?reason, "close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}
