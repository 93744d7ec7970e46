//! Message routing
//!
//! Decides, for one inbound message, which sessions receive what. Routing is
//! pure: it reads the sender and a registry snapshot and returns the changes
//! to apply to the sender plus the list of deliveries. Nothing is written to
//! a transport here.
//!
//! Page scope is a soft filter. A session without a page scope can send to
//! and receive from every page.

use std::sync::Arc;

use tracing::debug;

use crate::net::session::Session;
use crate::protocol::message::{CursorEvent, Handshake, HandshakeAck, LeaveEvent, Message};

/// One outbound message addressed to one session
#[derive(Debug, Clone)]
pub struct Delivery {
    pub recipient: Arc<Session>,
    /// Shared between all recipients of the same broadcast
    pub message: Arc<Message>,
}

/// Identity changes to apply to the sender after routing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderUpdate {
    pub confirm_id: Option<String>,
    pub adopt_page: Option<String>,
}

impl SenderUpdate {
    pub fn is_empty(&self) -> bool {
        self.confirm_id.is_none() && self.adopt_page.is_none()
    }

    /// Apply the update to the session it was computed for
    pub fn apply_to(&self, session: &Session) {
        if let Some(user_id) = &self.confirm_id {
            session.confirm_id(user_id.clone());
        }
        if let Some(page_id) = &self.adopt_page {
            session.adopt_page(page_id.clone());
        }
    }
}

/// Result of routing a single message
#[derive(Debug, Default)]
pub struct RouteOutcome {
    pub sender_update: SenderUpdate,
    pub deliveries: Vec<Delivery>,
}

/// Whether two page scopes can see each other. Unset matches everything.
pub fn scope_matches(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Router over a snapshot of the registered sessions
pub struct Router<'a> {
    sessions: &'a [Arc<Session>],
}

impl<'a> Router<'a> {
    pub fn new(sessions: &'a [Arc<Session>]) -> Self {
        Self { sessions }
    }

    /// Route a message received from `sender`
    pub fn route(&self, sender: &Arc<Session>, message: Message) -> RouteOutcome {
        match message {
            Message::Handshake(handshake) => self.route_handshake(sender, handshake),
            Message::Cursor(cursor) => self.route_cursor(sender, cursor),
            other => {
                debug!(
                    session_id = sender.key,
                    message_type = other.type_name(),
                    "Dropping server-only message sent by client"
                );
                RouteOutcome::default()
            }
        }
    }

    /// Deliveries announcing that `departed` has left.
    ///
    /// Sessions that never completed a handshake leave silently.
    pub fn leave(&self, departed: &Session) -> Vec<Delivery> {
        let Some(user_id) = departed.user_id() else {
            return Vec::new();
        };
        let page_id = departed.page_id();

        let message = Arc::new(Message::Leave(LeaveEvent {
            user_id,
            page_id: page_id.clone(),
        }));

        self.recipients(departed, page_id.as_deref())
            .map(|recipient| Delivery {
                recipient,
                message: message.clone(),
            })
            .collect()
    }

    fn route_handshake(&self, sender: &Arc<Session>, handshake: Handshake) -> RouteOutcome {
        let confirmed = sender.user_id();
        let current_page = sender.page_id();

        let user_id = confirmed
            .clone()
            .or(handshake.user_id)
            .unwrap_or_else(|| sender.provisional_id().to_string());

        let sender_update = SenderUpdate {
            confirm_id: confirmed.is_none().then(|| user_id.clone()),
            adopt_page: current_page
                .is_none()
                .then(|| handshake.page_id.clone())
                .flatten(),
        };
        let page_id = current_page.or(handshake.page_id);

        let ack = Message::HandshakeAck(HandshakeAck { user_id, page_id });

        RouteOutcome {
            sender_update,
            deliveries: vec![Delivery {
                recipient: sender.clone(),
                message: Arc::new(ack),
            }],
        }
    }

    fn route_cursor(&self, sender: &Arc<Session>, cursor: CursorEvent) -> RouteOutcome {
        let current_page = sender.page_id();

        let sender_update = SenderUpdate {
            confirm_id: None,
            adopt_page: current_page
                .is_none()
                .then(|| cursor.page_id.clone())
                .flatten(),
        };
        let page_id = current_page.or(cursor.page_id);

        let message = Arc::new(Message::Cursor(CursorEvent {
            user_id: sender.user_id().or(cursor.user_id),
            page_id: page_id.clone(),
            ..cursor
        }));

        let deliveries = self
            .recipients(sender, page_id.as_deref())
            .map(|recipient| Delivery {
                recipient,
                message: message.clone(),
            })
            .collect();

        RouteOutcome {
            sender_update,
            deliveries,
        }
    }

    /// Every session other than `origin` whose scope matches `page_id`
    fn recipients<'s>(
        &'s self,
        origin: &'s Session,
        page_id: Option<&'s str>,
    ) -> impl Iterator<Item = Arc<Session>> + 's {
        self.sessions
            .iter()
            .filter(move |s| s.key != origin.key)
            .filter(move |s| scope_matches(page_id, s.page_id().as_deref()))
            .cloned()
    }
}
