// Connections, reply routing and the command-line client

use crate::relay::message::{Dest, Reply};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use uuid::Uuid;

/// Longest request or reply line accepted on a connection
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Reply delivery failures
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no route to destination '{0}'")]
    NoRoute(Dest),

    #[error("connection for destination '{0}' is closed")]
    Closed(Dest),

    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A connected client
pub struct ClientConnection {
    pub id: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ClientConnection {
    /// Create a new client connection
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tx,
        }
    }

    /// Queue encoded bytes for the client
    fn send(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(bytes).is_ok()
    }
}

#[derive(Default)]
struct Routes {
    connections: HashMap<String, ClientConnection>,
    /// Destination name -> owning connection id
    bindings: HashMap<Dest, String>,
}

/// Routes replies to the connection that owns their destination
///
/// A destination is bound to the connection that first sends a request
/// naming it, for as long as that connection stays open.
#[derive(Clone, Default)]
pub struct ReplyChannel {
    routes: Arc<RwLock<Routes>>,
}

impl ReplyChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new client
    pub async fn add_client(&self, client: ClientConnection) -> String {
        let id = client.id.clone();
        let mut routes = self.routes.write().await;
        routes.connections.insert(id.clone(), client);
        tracing::debug!("Client {} connected", id);
        id
    }

    /// Remove a client and every destination bound to it
    pub async fn remove_client(&self, id: &str) {
        let mut routes = self.routes.write().await;
        routes.connections.remove(id);
        routes.bindings.retain(|_, owner| owner.as_str() != id);
        tracing::debug!("Client {} disconnected", id);
    }

    /// Deliver a reply, binding its destination to `origin` if unbound
    pub async fn deliver(&self, origin: Option<&str>, reply: &Reply) -> Result<(), DeliveryError> {
        let bytes = reply.to_bytes()?;
        let mut guard = self.routes.write().await;
        let routes = &mut *guard;

        let owner = match routes.bindings.get(&reply.dest) {
            Some(owner) => owner.clone(),
            None => {
                let origin = origin
                    .filter(|id| routes.connections.contains_key(*id))
                    .ok_or_else(|| DeliveryError::NoRoute(reply.dest.clone()))?
                    .to_string();
                routes.bindings.insert(reply.dest.clone(), origin.clone());
                tracing::debug!("Bound destination '{}' to client {}", reply.dest, origin);
                origin
            }
        };

        let delivered = routes
            .connections
            .get(&owner)
            .is_some_and(|client| client.send(bytes));

        if delivered {
            Ok(())
        } else {
            routes.connections.remove(&owner);
            routes.bindings.retain(|_, id| *id != owner);
            Err(DeliveryError::Closed(reply.dest.clone()))
        }
    }

    /// Connection currently bound to `dest`
    pub async fn owner_of(&self, dest: &Dest) -> Option<String> {
        let routes = self.routes.read().await;
        routes.bindings.get(dest).cloned()
    }

    /// Get number of connected clients
    pub async fn client_count(&self) -> usize {
        let routes = self.routes.read().await;
        routes.connections.len()
    }
}

/// Handle a client connection stream
///
/// Each incoming line is passed to `on_line`; outgoing replies arrive on
/// `outgoing_rx` already encoded. Reading stops when the client closes its
/// write side or `on_line` returns `false`; `on_close` then runs and the
/// writer keeps going until every sender of `outgoing_rx` is gone, so
/// replies to requests already submitted still reach a half-closed client.
pub async fn handle_client_stream<F, C>(
    stream: UnixStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut on_line: F,
    on_close: C,
) -> Result<()>
where
    F: FnMut(String) -> bool,
    C: FnOnce(),
{
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
    );

    // Spawn task to handle outgoing messages
    let write_task = tokio::spawn(async move {
        while let Some(bytes) = outgoing_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                return;
            }
        }
        let _ = write_half.shutdown().await;
    });

    // Handle incoming messages
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if !on_line(line) {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Error reading from client: {}", e);
                break;
            }
        }
    }

    on_close();

    write_task.await.context("Connection writer failed")?;
    Ok(())
}

/// Client side of the relay socket
pub struct RelayClient {
    lines: FramedRead<tokio::net::unix::OwnedReadHalf, LinesCodec>,
    sink: FramedWrite<tokio::net::unix::OwnedWriteHalf, LinesCodec>,
    timeout: Duration,
}

impl RelayClient {
    /// Connect to a running relay
    pub async fn connect(socket_path: &Path, timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to relay at {:?}", socket_path))?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            lines: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            sink: FramedWrite::new(write_half, LinesCodec::new()),
            timeout,
        })
    }

    /// Send a request without waiting for a reply
    pub async fn send(&mut self, request: &Value) -> Result<()> {
        self.sink
            .send(serde_json::to_string(request)?)
            .await
            .context("Failed to send request")
    }

    /// Wait for the next reply
    pub async fn recv(&mut self) -> Result<Value> {
        let line = tokio::time::timeout(self.timeout, self.lines.next())
            .await
            .context("Timed out waiting for a reply")?
            .context("Relay closed the connection")?
            .context("Failed to read reply")?;

        serde_json::from_str(&line).context("Relay sent an invalid reply")
    }

    /// Send a request and wait for its reply
    pub async fn request(&mut self, request: &Value) -> Result<Value> {
        self.send(request).await?;
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connect() -> (ClientConnection, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientConnection::new(tx), rx)
    }

    #[tokio::test]
    async fn test_first_use_binds_destination() {
        let channel = ReplyChannel::new();
        let (client, mut rx) = connect();
        let id = channel.add_client(client).await;

        let reply = Reply::success(Dest::new("A"));
        channel.deliver(Some(id.as_str()), &reply).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"{\"Status\":\"success\"}\n".to_vec());
        assert_eq!(channel.owner_of(&Dest::new("A")).await, Some(id));
    }

    #[tokio::test]
    async fn test_bound_destination_routes_to_owner() {
        let channel = ReplyChannel::new();
        let (owner, mut owner_rx) = connect();
        let (other, mut other_rx) = connect();
        let owner_id = channel.add_client(owner).await;
        let other_id = channel.add_client(other).await;

        channel
            .deliver(Some(owner_id.as_str()), &Reply::success(Dest::new("A")))
            .await
            .unwrap();
        owner_rx.recv().await.unwrap();

        // A request from another connection naming "A" replies to the owner
        let reply = Reply::failed(Dest::new("A"), "No messages available");
        channel.deliver(Some(other_id.as_str()), &reply).await.unwrap();

        let bytes = owner_rx.recv().await.unwrap();
        let payload: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["Reason"], json!("No messages available"));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_destination_without_origin() {
        let channel = ReplyChannel::new();
        let result = channel.deliver(None, &Reply::success(Dest::new("nowhere"))).await;
        assert!(matches!(result, Err(DeliveryError::NoRoute(_))));
    }

    #[tokio::test]
    async fn test_remove_client_drops_bindings() {
        let channel = ReplyChannel::new();
        let (client, _rx) = connect();
        let id = channel.add_client(client).await;

        channel
            .deliver(Some(id.as_str()), &Reply::success(Dest::new("A")))
            .await
            .unwrap();
        assert_eq!(channel.client_count().await, 1);

        channel.remove_client(&id).await;
        assert_eq!(channel.client_count().await, 0);
        assert!(channel.owner_of(&Dest::new("A")).await.is_none());
    }

    #[tokio::test]
    async fn test_closed_connection_is_reported() {
        let channel = ReplyChannel::new();
        let (client, rx) = connect();
        let id = channel.add_client(client).await;
        drop(rx);

        let result = channel.deliver(Some(id.as_str()), &Reply::success(Dest::new("A"))).await;
        assert!(matches!(result, Err(DeliveryError::Closed(_))));
        assert_eq!(channel.client_count().await, 0);
    }
}
