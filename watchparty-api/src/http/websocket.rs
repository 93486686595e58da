//! WebSocket transport for the current session protocol
//!
//! Both socket flavours share [`WebSocketStream`] and [`serve_socket`]; only
//! the [`FrameProtocol`] differs. Frames are JSON text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{stream::SplitStream, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};
use watchparty_core::models::{ClientId, PresenceEntry, SessionId};

use crate::http::{AppError, AppState};
use crate::impls::{
    ConnectionContext, FrameProtocol, SessionProtocol, StreamMessage, StreamMessageHandler,
};

/// Outbound frames buffered per connection before a slow client is cut off
const OUTBOUND_BUFFER: usize = 1000;

/// Query parameters for the session socket
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    /// Stable user identity; presence is only entered when set
    pub identity: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl WsQuery {
    fn presence_entry(self) -> Option<PresenceEntry> {
        let identity = self.identity.filter(|id| !id.trim().is_empty())?;
        let display_name = self.display_name.unwrap_or_else(|| identity.clone());
        let mut entry = PresenceEntry::new(identity, display_name);
        entry.avatar = self.avatar;
        Some(entry)
    }
}

/// Adapts an axum [`WebSocket`] to [`StreamMessage`]
pub struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
    sender: mpsc::Sender<String>,
    is_alive: Arc<AtomicBool>,
}

impl WebSocketStream {
    /// Split the socket and spawn the task that drains outbound frames into it
    pub fn new(socket: WebSocket) -> Self {
        let (mut sink, receiver) = socket.split();
        let (sender, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let is_alive = Arc::new(AtomicBool::new(true));

        let alive = is_alive.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    error!("Failed to send WebSocket message: {}", e);
                    alive.store(false, Ordering::Relaxed);
                    break;
                }
            }
        });

        Self {
            receiver,
            sender,
            is_alive,
        }
    }
}

#[async_trait::async_trait]
impl StreamMessage for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<String, String>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => return Some(Err(format!("WebSocket error: {e}"))),
                // Ping/pong are answered by axum; binary frames are not part of either protocol
                Some(Ok(_)) => {}
            }
        }
    }

    fn send(&self, frame: String) -> Result<(), String> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                "Channel full: WebSocket client too slow to consume messages".to_string()
            }
            mpsc::error::TrySendError::Closed(_) => {
                "Channel closed: WebSocket client disconnected".to_string()
            }
        })
    }

    fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }
}

/// Run one upgraded socket through the shared message loop
pub(crate) async fn serve_socket<P: FrameProtocol>(
    socket: WebSocket,
    ctx: ConnectionContext,
    protocol: P,
    presence: Option<PresenceEntry>,
) {
    let mut handler = StreamMessageHandler::new(ctx, protocol);
    if let Some(entry) = presence {
        handler = handler.with_presence(entry);
    }

    let mut stream = WebSocketStream::new(socket);
    handler.run(&mut stream).await;
}

/// `GET /ws/sessions/{session_id}`
pub async fn session_socket_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    if session_id.trim().is_empty() {
        return Err(AppError::bad_request("session id is required"));
    }

    let connection_id = nanoid::nanoid!();
    let ctx = ConnectionContext {
        session_id: SessionId::from_string(session_id),
        sender_id: ClientId::from(connection_id.as_str()),
        connection_id,
        service: state.sync_service.clone(),
    };
    let presence = query.presence_entry();
    debug!(
        session_id = %ctx.session_id,
        connection_id = %ctx.connection_id,
        has_presence = presence.is_some(),
        "Upgrading session socket"
    );

    Ok(ws
        .max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| serve_socket(socket, ctx, SessionProtocol, presence)))
}
