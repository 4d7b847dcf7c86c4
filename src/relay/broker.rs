// Single-consumer broker that owns the request handler and its store

use crate::relay::client::ReplyChannel;
use crate::relay::handler::RequestHandler;
use crate::relay::indicator::StatusIndicator;
use anyhow::{Context, Result};
use tokio::sync::mpsc;

/// Handle for communicating with the broker
#[derive(Clone)]
pub struct BrokerHandle {
    pub tx: mpsc::UnboundedSender<BrokerCommand>,
}

impl BrokerHandle {
    pub fn new(tx: mpsc::UnboundedSender<BrokerCommand>) -> Self {
        Self { tx }
    }

    /// Send a command to the broker
    pub fn send_command(&self, cmd: BrokerCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .context("Failed to send command to broker")
    }

    /// Queue a raw request body received on connection `origin`
    pub fn submit(&self, origin: Option<String>, body: impl Into<Vec<u8>>) -> Result<()> {
        self.send_command(BrokerCommand::Request {
            origin,
            body: body.into(),
        })
    }
}

/// Commands that can be sent to the broker
#[derive(Debug)]
pub enum BrokerCommand {
    /// A request body, with the connection it arrived on
    Request {
        origin: Option<String>,
        body: Vec<u8>,
    },
    /// Connection closed; forget its destinations
    ConnectionClosed { connection_id: String },
    /// Flush the store and stop
    Shutdown,
}

/// Processes requests one at a time, in arrival order
///
/// The broker task is the only owner of the handler, so store operations
/// never interleave. Replies go out after the store change is done and a
/// failed delivery does not undo it.
pub struct MessageBroker<I> {
    handler: RequestHandler<I>,
    replies: ReplyChannel,
    rx: mpsc::UnboundedReceiver<BrokerCommand>,
}

impl<I: StatusIndicator> MessageBroker<I> {
    /// Create a new message broker
    pub fn new(handler: RequestHandler<I>, replies: ReplyChannel) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let broker = Self {
            handler,
            replies,
            rx,
        };

        (broker, BrokerHandle::new(tx))
    }

    /// Run the broker event loop
    ///
    /// Returns once a `Shutdown` arrives or every handle is dropped, after
    /// flushing the store.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Message broker started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                BrokerCommand::Request { origin, body } => {
                    self.handle_request(origin.as_deref(), &body).await;
                }
                BrokerCommand::ConnectionClosed { connection_id } => {
                    self.replies.remove_client(&connection_id).await;
                }
                BrokerCommand::Shutdown => {
                    tracing::info!("Broker shutting down");
                    break;
                }
            }
        }

        let store = self.handler.into_store();
        let count = store.size();
        store.close().context("Failed to flush message store")?;

        tracing::info!("Message broker stopped ({} messages persisted)", count);
        Ok(())
    }

    async fn handle_request(&mut self, origin: Option<&str>, body: &[u8]) {
        let Some(reply) = self.handler.handle(body) else {
            return;
        };

        tracing::info!("Sending reply {} to {}", reply.payload, reply.dest);

        if let Err(e) = self.replies.deliver(origin, &reply).await {
            tracing::warn!("Failed to deliver reply to '{}': {}", reply.dest, e);
        }
    }
}
