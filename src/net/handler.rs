//! Connection handler module
//!
//! Handles the lifecycle of relay connections:
//! - WebSocket upgrade and session registration
//! - Frame decoding and dispatch to the router
//! - Best-effort delivery of routed frames
//! - Deregistration and leave notification on disconnect

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, info, trace, warn};
use tungstenite::protocol::WebSocketConfig;

use crate::error::{NetworkError, RelayError, Result};
use crate::net::session::{Session, SessionKey};
use crate::protocol::codec;
use crate::protocol::message::Message;
use crate::routing::{Delivery, Router};
use crate::AppState;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Outcome of one delivery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// Write each routed message to its recipient if the transport is open.
///
/// A closed or congested recipient is skipped; it never stops delivery to
/// the others. Messages shared between recipients are encoded once.
pub fn deliver(deliveries: &[Delivery]) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut encoded: Option<(&Arc<Message>, String)> = None;

    for delivery in deliveries {
        let recipient = &delivery.recipient;
        if !recipient.is_open() {
            trace!(session_id = recipient.key, "Skipping closed transport");
            report.skipped += 1;
            continue;
        }

        let cached = encoded
            .as_ref()
            .filter(|(message, _)| Arc::ptr_eq(*message, &delivery.message))
            .map(|(_, frame)| frame.clone());
        let frame = match cached {
            Some(frame) => frame,
            None => {
                let frame = codec::encode(&delivery.message);
                encoded = Some((&delivery.message, frame.clone()));
                frame
            }
        };

        match recipient.outbound().send_frame(frame) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                debug!(session_id = recipient.key, error = %e, "Delivery skipped");
                report.skipped += 1;
            }
        }
    }

    report
}

/// Connection handler for relay clients
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a WebSocket connection (browser client)
    pub async fn handle_websocket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        let mut shutdown_rx = self.state.shutdown_signal();

        // Set TCP options before upgrade
        stream.set_nodelay(true)?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.state.config.max_message_size);

        let ws_stream = accept_async_with_config(stream, Some(ws_config))
            .await
            .map_err(|e| RelayError::Network(NetworkError::Handshake(e.to_string())))?;

        info!(address = %addr, "WebSocket connection established");

        let (sink, source) = ws_stream.split();
        let (tx, rx) = mpsc::channel(self.state.config.outbound_buffer);

        let session = self.state.registry.open_session(addr, tx);
        let writer = tokio::spawn(write_frames(sink, rx, session.key));

        // Teardown runs even if frame processing unwinds
        let guard = DisconnectGuard {
            handler: self,
            session: session.clone(),
        };
        let result = self.process_connection(source, &session, &mut shutdown_rx).await;
        drop(guard);

        if let Err(e) = writer.await {
            warn!(session_id = session.key, error = %e, "Writer task failed");
        }

        result
    }

    /// Read frames until the peer goes away or the server shuts down
    async fn process_connection(
        &self,
        mut source: WsSource,
        session: &Arc<Session>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            let frame = tokio::select! {
                frame = source.next() => frame,
                _ = shutdown_rx.recv() => {
                    debug!(session_id = session.key, "Closing connection for shutdown");
                    break;
                }
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => self.handle_frame(session, text.as_bytes()),
                Some(Ok(WsMessage::Binary(data))) => self.handle_frame(session, &data),
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(session_id = session.key, "Connection closed");
                    break;
                }
                // Pings are answered by tungstenite on the next write
                Some(Ok(_)) => {}
                Some(Err(e)) => match RelayError::from(e) {
                    RelayError::Network(NetworkError::ConnectionClosed) => {
                        debug!(session_id = session.key, "Connection closed");
                        break;
                    }
                    other => return Err(other),
                },
            }
        }

        Ok(())
    }

    /// Decode one frame and route it. Undecodable frames are dropped.
    pub fn handle_frame(&self, session: &Arc<Session>, bytes: &[u8]) {
        let message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    session_id = session.key,
                    kind = e.kind(),
                    error = %e,
                    "Dropping undecodable frame"
                );
                return;
            }
        };

        trace!(
            session_id = session.key,
            message_type = message.type_name(),
            "Frame received"
        );

        let snapshot = self.state.registry.list();
        let outcome = Router::new(&snapshot).route(session, message);
        outcome.sender_update.apply_to(session);

        let report = deliver(&outcome.deliveries);
        trace!(
            session_id = session.key,
            delivered = report.delivered,
            skipped = report.skipped,
            "Frame routed"
        );
    }

    /// Deregister the session and tell the sessions that could see it
    pub fn disconnect(&self, session: &Session) {
        session.outbound().close();
        if self.state.registry.remove(session).is_none() {
            return;
        }

        let remaining = self.state.registry.list();
        let deliveries = Router::new(&remaining).leave(session);
        let report = deliver(&deliveries);

        info!(
            session_id = session.key,
            user_id = ?session.user_id(),
            page_id = ?session.page_id(),
            notified = report.delivered,
            connected_for = ?session.connected_for(),
            "Session disconnected"
        );
    }
}

struct DisconnectGuard<'a> {
    handler: &'a ConnectionHandler,
    session: Arc<Session>,
}

impl Drop for DisconnectGuard<'_> {
    fn drop(&mut self) {
        self.handler.disconnect(&self.session);
    }
}

/// Forward queued frames to the socket until the outbound handle closes
async fn write_frames(mut sink: WsSink, mut rx: mpsc::Receiver<String>, session_id: SessionKey) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(WsMessage::Text(frame)).await {
            debug!(session_id = session_id, error = %e, "Write failed, closing writer");
            break;
        }
    }

    if let Err(e) = sink.close().await {
        trace!(session_id = session_id, error = %e, "Error during transport shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::message::{CursorEvent, HandshakeAck, LeaveEvent};
    use pretty_assertions::assert_eq;

    fn handler() -> ConnectionHandler {
        let (shutdown_tx, _) = broadcast::channel(1);
        ConnectionHandler::new(Arc::new(AppState::new(ServerConfig::default(), shutdown_tx)))
    }

    fn connect(handler: &ConnectionHandler) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let session = handler
            .state
            .registry
            .open_session("127.0.0.1:5000".parse().unwrap(), tx);
        (session, rx)
    }

    fn send(handler: &ConnectionHandler, session: &Arc<Session>, text: &str) {
        handler.handle_frame(session, text.as_bytes());
    }

    fn received(rx: &mut mpsc::Receiver<String>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(codec::decode_text(&frame).unwrap());
        }
        messages
    }

    #[test]
    fn test_deliver_skips_closed_recipients() {
        let handler = handler();
        let (a, mut a_rx) = connect(&handler);
        let (b, mut b_rx) = connect(&handler);
        let (c, mut c_rx) = connect(&handler);
        b.outbound().close();

        let message = Arc::new(Message::Cursor(CursorEvent::at(1.0, 2.0)));
        let deliveries: Vec<Delivery> = [&a, &b, &c]
            .into_iter()
            .map(|s| Delivery {
                recipient: s.clone(),
                message: message.clone(),
            })
            .collect();

        let report = deliver(&deliveries);
        assert_eq!(
            report,
            DeliveryReport {
                delivered: 2,
                skipped: 1
            }
        );
        assert_eq!(received(&mut a_rx).len(), 1);
        assert!(received(&mut b_rx).is_empty());
        assert_eq!(received(&mut c_rx).len(), 1);
    }

    #[test]
    fn test_handshake_then_cursor() {
        let handler = handler();
        let (s1, mut s1_rx) = connect(&handler);
        let (s2, mut s2_rx) = connect(&handler);

        send(&handler, &s1, r#"{"type":"init","userId":"one","pageId":"p1"}"#);
        send(&handler, &s2, r#"{"type":"init","userId":"two","pageId":"p1"}"#);

        assert_eq!(
            received(&mut s1_rx),
            vec![Message::HandshakeAck(HandshakeAck {
                user_id: "one".to_string(),
                page_id: Some("p1".to_string()),
            })]
        );
        assert_eq!(received(&mut s2_rx).len(), 1);

        send(&handler, &s1, r#"{"type":"cursor","x":10,"y":20}"#);
        assert!(received(&mut s1_rx).is_empty());
        assert_eq!(
            received(&mut s2_rx),
            vec![Message::Cursor(CursorEvent {
                user_id: Some("one".to_string()),
                page_id: Some("p1".to_string()),
                ..CursorEvent::at(10.0, 20.0)
            })]
        );
    }

    #[test]
    fn test_bad_frame_does_not_stop_processing() {
        let handler = handler();
        let (s1, mut s1_rx) = connect(&handler);

        send(&handler, &s1, r#"{"type":"cursor","x":"abc"}"#);
        send(&handler, &s1, "not json");
        send(&handler, &s1, r#"{"type":"init"}"#);

        let messages = received(&mut s1_rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Message::HandshakeAck(_)));
    }

    #[test]
    fn test_disconnect_sends_leave_once() {
        let handler = handler();
        let (s1, mut s1_rx) = connect(&handler);
        let (s2, _s2_rx) = connect(&handler);
        let (s3, mut s3_rx) = connect(&handler);

        send(&handler, &s1, r#"{"type":"init","pageId":"p1"}"#);
        send(&handler, &s2, r#"{"type":"init","userId":"two","pageId":"p1"}"#);
        send(&handler, &s3, r#"{"type":"init","pageId":"p2"}"#);
        received(&mut s1_rx);
        received(&mut s3_rx);

        handler.disconnect(&s2);
        // A second disconnect for the same session is a no-op
        handler.disconnect(&s2);

        assert_eq!(
            received(&mut s1_rx),
            vec![Message::Leave(LeaveEvent {
                user_id: "two".to_string(),
                page_id: Some("p1".to_string()),
            })]
        );
        assert!(received(&mut s3_rx).is_empty());
        assert!(!s2.is_open());
        assert_eq!(handler.state.registry.len(), 2);
    }

    #[test]
    fn test_disconnect_without_handshake_is_silent() {
        let handler = handler();
        let (s1, mut s1_rx) = connect(&handler);
        let (anonymous, _rx) = connect(&handler);

        send(&handler, &s1, r#"{"type":"init"}"#);
        received(&mut s1_rx);

        // Cursor traffic alone does not confirm an id
        send(&handler, &anonymous, r#"{"type":"cursor","x":1,"y":1}"#);
        received(&mut s1_rx);

        handler.disconnect(&anonymous);
        assert!(received(&mut s1_rx).is_empty());
    }
}
