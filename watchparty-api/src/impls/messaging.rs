//! Transport-agnostic connection loop.
//!
//! Each WebSocket flavour supplies a [`StreamMessage`] for IO and a
//! [`FrameProtocol`] for its wire format; the loop in
//! [`StreamMessageHandler::run`] is shared by both.

use std::time::Duration;

use tracing::{debug, error, info, warn};
use watchparty_cluster::HubEvent;
use watchparty_core::models::{ClientId, PresenceEntry, SessionId};

use super::sync_service::SyncService;

/// Bidirectional text-frame IO for one connection
#[async_trait::async_trait]
pub trait StreamMessage: Send {
    /// Receive the next text frame; `None` once the connection closed
    async fn recv(&mut self) -> Option<Result<String, String>>;

    fn send(&self, frame: String) -> Result<(), String>;

    fn is_alive(&self) -> bool;
}

/// Everything a protocol adapter knows about its connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub session_id: SessionId,
    pub connection_id: String,
    /// Sender id the server stamps on events from this connection
    pub sender_id: ClientId,
    pub service: SyncService,
}

/// Wire format of one WebSocket flavour
pub trait FrameProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one inbound frame; returned frames go to this connection only
    fn handle_frame(&self, ctx: &ConnectionContext, frame: &str) -> Vec<String>;

    /// Render a hub event for this connection, or skip it
    fn render(&self, ctx: &ConnectionContext, event: &HubEvent) -> Option<String>;
}

/// Per-connection message loop
pub struct StreamMessageHandler<P: FrameProtocol> {
    ctx: ConnectionContext,
    protocol: P,
    presence: Option<PresenceEntry>,
    heartbeat: Duration,
}

impl<P: FrameProtocol> StreamMessageHandler<P> {
    pub fn new(ctx: ConnectionContext, protocol: P) -> Self {
        Self {
            ctx,
            protocol,
            presence: None,
            heartbeat: Duration::from_secs(30),
        }
    }

    /// Enter presence with this entry when the loop starts
    #[must_use]
    pub fn with_presence(mut self, entry: PresenceEntry) -> Self {
        self.presence = Some(entry);
        self
    }

    #[must_use]
    pub const fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Run until the client goes away, then leave presence and unsubscribe
    pub async fn run<S: StreamMessage>(&self, stream: &mut S) {
        let ctx = &self.ctx;
        ctx.service.hub().connect(&ctx.session_id, &ctx.connection_id);
        let (_subscription_id, mut event_rx) =
            ctx.service.hub().subscribe(&ctx.session_id, &ctx.connection_id);

        if let Some(entry) = &self.presence {
            ctx.service
                .join(&ctx.session_id, &ctx.connection_id, entry.clone());
        }

        info!(
            session_id = %ctx.session_id,
            connection_id = %ctx.connection_id,
            protocol = self.protocol.name(),
            "Connection established"
        );

        loop {
            tokio::select! {
                frame = stream.recv() => {
                    match frame {
                        Some(Ok(text)) => {
                            for reply in self.protocol.handle_frame(ctx, &text) {
                                if let Err(e) = stream.send(reply) {
                                    warn!(connection_id = %ctx.connection_id, error = %e, "Failed to send reply");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(connection_id = %ctx.connection_id, error = %e, "Error receiving frame");
                            break;
                        }
                        None => {
                            debug!(connection_id = %ctx.connection_id, "Client closed connection");
                            break;
                        }
                    }
                }

                event = event_rx.recv() => {
                    let Some(event) = event else {
                        error!(connection_id = %ctx.connection_id, "Session event channel closed");
                        break;
                    };
                    if let Some(frame) = self.protocol.render(ctx, &event) {
                        if let Err(e) = stream.send(frame) {
                            error!(connection_id = %ctx.connection_id, error = %e, "Failed to forward event");
                            break;
                        }
                    }
                }

                () = tokio::time::sleep(self.heartbeat) => {
                    if !stream.is_alive() {
                        info!(connection_id = %ctx.connection_id, "Connection no longer alive");
                        break;
                    }
                }
            }
        }

        ctx.service.disconnect(&ctx.connection_id);
        info!(
            session_id = %ctx.session_id,
            connection_id = %ctx.connection_id,
            protocol = self.protocol.name(),
            "Connection closed"
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// In-memory stream driven by a pair of channels
    pub(crate) struct ChannelStream {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    pub(crate) fn channel_stream() -> (
        ChannelStream,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let stream = ChannelStream {
            inbound: in_rx,
            outbound: out_tx,
        };
        (stream, in_tx, out_rx)
    }

    #[async_trait::async_trait]
    impl StreamMessage for ChannelStream {
        async fn recv(&mut self) -> Option<Result<String, String>> {
            self.inbound.recv().await.map(Ok)
        }

        fn send(&self, frame: String) -> Result<(), String> {
            self.outbound.send(frame).map_err(|e| e.to_string())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    struct EchoProtocol;

    impl FrameProtocol for EchoProtocol {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn handle_frame(&self, _ctx: &ConnectionContext, frame: &str) -> Vec<String> {
            vec![format!("echo:{frame}")]
        }

        fn render(&self, _ctx: &ConnectionContext, event: &HubEvent) -> Option<String> {
            Some(event.event_type())
        }
    }

    #[tokio::test]
    async fn test_loop_replies_and_cleans_up() {
        let service = SyncService::default();
        let session = SessionId::from("s");
        let ctx = ConnectionContext {
            session_id: session.clone(),
            connection_id: "conn1".to_string(),
            sender_id: ClientId::from("conn1"),
            service: service.clone(),
        };
        let handler = StreamMessageHandler::new(ctx, EchoProtocol)
            .with_presence(PresenceEntry::new("alice", "Alice"));

        let (mut stream, in_tx, mut out_rx) = channel_stream();
        let task = tokio::spawn(async move { handler.run(&mut stream).await });

        // Own presence enter is forwarded first
        assert_eq!(out_rx.recv().await.unwrap(), "presence:enter");
        assert_eq!(service.members(&session).len(), 1);

        in_tx.send("hello".to_string()).unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), "echo:hello");

        drop(in_tx);
        task.await.unwrap();
        assert!(service.members(&session).is_empty());
        assert_eq!(service.hub().subscriber_count(&session), 0);
    }
}
