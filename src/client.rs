//! Relay client
//!
//! Native counterpart of the browser client: connects to a relay, performs
//! the `init` handshake, sends throttled cursor samples and surfaces the
//! cursor and leave events of other sessions through a channel.

use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use crate::error::{DecodeError, NetworkError, RelayError, Result};
use crate::protocol::codec;
use crate::protocol::message::{
    CoordinateSpace, CursorEvent, Handshake, HandshakeAck, LeaveEvent, Message,
};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the inbound event channel
const EVENT_BUFFER: usize = 256;

/// Connection options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Relay URL, e.g. `ws://localhost:8080`
    pub url: String,
    /// Requested user id; the server assigns one when absent
    pub user_id: Option<String>,
    /// Page scope to join
    pub page_id: Option<String>,
    /// Minimum interval between two sent samples
    pub throttle: Duration,
    /// How long to wait for `init-ack`
    pub handshake_timeout: Duration,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: None,
            page_id: None,
            throttle: Duration::ZERO,
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_page_id(mut self, page_id: impl Into<String>) -> Self {
        self.page_id = Some(page_id.into());
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }
}

/// Event received from another session
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Cursor(CursorEvent),
    Leave(LeaveEvent),
}

/// A pointer position sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Viewport pixel coordinates
    Viewport { x: f64, y: f64 },
    /// Offset inside a tracked element of the given size
    Element {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

impl Sample {
    /// Build the cursor event for this sample
    pub fn to_cursor(&self) -> std::result::Result<CursorEvent, DecodeError> {
        let cursor = match *self {
            Sample::Viewport { x, y } => CursorEvent {
                space: Some(CoordinateSpace::Viewport),
                ..CursorEvent::at(x, y)
            },
            Sample::Element {
                x,
                y,
                width,
                height,
            } => CursorEvent {
                space: Some(CoordinateSpace::Element),
                relative_x: normalize(x, width),
                relative_y: normalize(y, height),
                ..CursorEvent::at(x, y)
            },
        };

        if !cursor.x.is_finite() || !cursor.y.is_finite() {
            return Err(DecodeError::InvalidField(
                "sample coordinates must be finite".to_string(),
            ));
        }
        Ok(cursor)
    }
}

/// Position within an extent as a fraction in [0, 1]
fn normalize(offset: f64, extent: f64) -> Option<f64> {
    if extent > 0.0 && extent.is_finite() && offset.is_finite() {
        Some((offset / extent).clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Drops samples arriving faster than a minimum interval
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Whether a sample taken at `now` may be sent; records it if so
    pub fn ready_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }
}

/// A connected relay client
pub struct CursorClient {
    sink: SplitSink<ClientStream, WsMessage>,
    user_id: String,
    page_id: Option<String>,
    throttle: Throttle,
    reader: JoinHandle<()>,
}

impl CursorClient {
    /// Connect, complete the handshake and start receiving events
    pub async fn connect(options: ClientOptions) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        let (ws_stream, _) = connect_async(options.url.as_str())
            .await
            .map_err(|e| RelayError::Network(NetworkError::WebSocket(e.to_string())))?;
        let (mut sink, mut source) = ws_stream.split();

        let init = Message::Handshake(Handshake {
            user_id: options.user_id.clone(),
            page_id: options.page_id.clone(),
        });
        sink.send(WsMessage::Text(codec::encode(&init))).await?;

        let (ack, early) =
            tokio::time::timeout(options.handshake_timeout, wait_for_ack(&mut source))
                .await
                .map_err(|_| RelayError::Network(NetworkError::Timeout))??;

        info!(
            url = %options.url,
            user_id = %ack.user_id,
            page_id = ?ack.page_id,
            "Connected to relay"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_events(source, early, tx));

        let client = Self {
            sink,
            user_id: ack.user_id,
            page_id: ack.page_id.or(options.page_id),
            throttle: Throttle::new(options.throttle),
            reader,
        };
        Ok((client, rx))
    }

    /// Server-confirmed user id
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Page scope in effect for this client
    pub fn page_id(&self) -> Option<&str> {
        self.page_id.as_deref()
    }

    /// Send a sample unless it falls inside the throttle window.
    /// Returns whether the sample was sent.
    pub async fn send_sample(&mut self, sample: Sample) -> Result<bool> {
        let cursor = sample.to_cursor()?;
        if !self.throttle.ready() {
            trace!("Sample throttled");
            return Ok(false);
        }

        let message = Message::Cursor(CursorEvent {
            user_id: Some(self.user_id.clone()),
            page_id: self.page_id.clone(),
            ..cursor
        });
        self.sink.send(WsMessage::Text(codec::encode(&message))).await?;
        Ok(true)
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

impl Drop for CursorClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read frames until `init-ack`, keeping events that arrive before it
async fn wait_for_ack(
    source: &mut SplitStream<ClientStream>,
) -> Result<(HandshakeAck, Vec<ClientEvent>)> {
    let mut early = Vec::new();

    while let Some(frame) = source.next().await {
        let Some(message) = decode_frame(frame?) else {
            continue;
        };
        match message {
            Message::HandshakeAck(ack) => return Ok((ack, early)),
            Message::Cursor(cursor) => early.push(ClientEvent::Cursor(cursor)),
            Message::Leave(leave) => early.push(ClientEvent::Leave(leave)),
            Message::Handshake(_) => {}
        }
    }

    Err(RelayError::Network(NetworkError::Handshake(
        "connection closed before init-ack".to_string(),
    )))
}

async fn read_events(
    mut source: SplitStream<ClientStream>,
    early: Vec<ClientEvent>,
    tx: mpsc::Sender<ClientEvent>,
) {
    for event in early {
        if tx.send(event).await.is_err() {
            return;
        }
    }

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Relay connection failed");
                break;
            }
        };
        let event = match decode_frame(frame) {
            Some(Message::Cursor(cursor)) => ClientEvent::Cursor(cursor),
            Some(Message::Leave(leave)) => ClientEvent::Leave(leave),
            Some(other) => {
                trace!(message_type = other.type_name(), "Ignoring message");
                continue;
            }
            None => continue,
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }

    debug!("Relay connection closed");
}

fn decode_frame(frame: WsMessage) -> Option<Message> {
    let decoded = match frame {
        WsMessage::Text(text) => codec::decode_text(&text),
        WsMessage::Binary(data) => codec::decode(&data),
        _ => return None,
    };
    match decoded {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(kind = e.kind(), error = %e, "Dropping undecodable frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_throttle_window() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(50));

        assert!(throttle.ready_at(start));
        assert!(!throttle.ready_at(start + Duration::from_millis(10)));
        assert!(!throttle.ready_at(start + Duration::from_millis(49)));
        assert!(throttle.ready_at(start + Duration::from_millis(50)));
        assert!(!throttle.ready_at(start + Duration::from_millis(60)));
    }

    #[test]
    fn test_zero_throttle_always_ready() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.ready_at(start));
        assert!(throttle.ready_at(start));
    }

    #[test]
    fn test_viewport_sample() {
        let cursor = Sample::Viewport { x: 12.0, y: 34.0 }.to_cursor().unwrap();
        assert_eq!(
            cursor,
            CursorEvent {
                space: Some(CoordinateSpace::Viewport),
                ..CursorEvent::at(12.0, 34.0)
            }
        );
    }

    #[test]
    fn test_element_sample_is_normalized() {
        let cursor = Sample::Element {
            x: 50.0,
            y: 300.0,
            width: 200.0,
            height: 100.0,
        }
        .to_cursor()
        .unwrap();

        assert_eq!(cursor.space, Some(CoordinateSpace::Element));
        assert_eq!(cursor.relative_x, Some(0.25));
        // Outside the element clamps to the edge
        assert_eq!(cursor.relative_y, Some(1.0));
    }

    #[test]
    fn test_zero_sized_element_omits_relative() {
        let cursor = Sample::Element {
            x: 5.0,
            y: 5.0,
            width: 0.0,
            height: 10.0,
        }
        .to_cursor()
        .unwrap();

        assert_eq!(cursor.relative_x, None);
        assert_eq!(cursor.relative_y, Some(0.5));
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        assert!(Sample::Viewport {
            x: f64::NAN,
            y: 0.0
        }
        .to_cursor()
        .is_err());
    }

    #[test]
    fn test_options_builder() {
        let options = ClientOptions::new("ws://localhost:8080")
            .with_user_id("alice")
            .with_page_id("home")
            .with_throttle(Duration::from_millis(16));

        assert_eq!(options.user_id.as_deref(), Some("alice"));
        assert_eq!(options.page_id.as_deref(), Some("home"));
        assert_eq!(options.throttle, Duration::from_millis(16));
    }
}
