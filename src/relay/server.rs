// Relay server: store lifecycle, broker task and Unix socket listener

use crate::relay::broker::{BrokerCommand, BrokerHandle, MessageBroker};
use crate::relay::client::{handle_client_stream, ClientConnection, ReplyChannel};
use crate::relay::handler::RequestHandler;
use crate::relay::indicator::{BitPatternIndicator, LogIndicator, StatusIndicator};
use crate::relay::storage::MessageStore;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Name announced when none is configured
pub const DEFAULT_SERVER_NAME: &str = "Message Bottle Server";

/// Server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub name: String,
    pub socket_path: PathBuf,
    pub db_path: PathBuf,
    /// Indicator output lines; empty means log-only
    pub indicator_lines: Vec<u32>,
}

impl RelayConfig {
    pub fn new(socket_path: PathBuf, db_path: PathBuf) -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            socket_path,
            db_path,
            indicator_lines: Vec::new(),
        }
    }
}

/// Indicator chosen from the configuration
pub enum ConfiguredIndicator {
    Log(LogIndicator),
    Lines(BitPatternIndicator),
}

impl ConfiguredIndicator {
    pub fn from_lines(lines: &[u32]) -> Self {
        if lines.is_empty() {
            ConfiguredIndicator::Log(LogIndicator)
        } else {
            ConfiguredIndicator::Lines(BitPatternIndicator::new(lines.to_vec()))
        }
    }
}

impl StatusIndicator for ConfiguredIndicator {
    fn notify(&mut self, count: usize) {
        match self {
            ConfiguredIndicator::Log(indicator) => indicator.notify(count),
            ConfiguredIndicator::Lines(indicator) => indicator.notify(count),
        }
    }
}

/// A running relay
pub struct RelayServer {
    config: RelayConfig,
    broker_handle: BrokerHandle,
    broker_task: JoinHandle<Result<()>>,
    listener_task: JoinHandle<()>,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl RelayServer {
    /// Open the store and start serving
    ///
    /// Fails if the persisted store cannot be opened or the socket cannot
    /// be bound.
    pub async fn start(config: RelayConfig) -> Result<Self> {
        let indicator = ConfiguredIndicator::from_lines(&config.indicator_lines);
        Self::start_with_indicator(config, indicator).await
    }

    /// Start with a caller-supplied status indicator
    pub async fn start_with_indicator<I>(config: RelayConfig, indicator: I) -> Result<Self>
    where
        I: StatusIndicator + 'static,
    {
        tracing::info!("Starting {}", config.name);

        let store = MessageStore::open(&config.db_path)
            .with_context(|| format!("Failed to open message store {:?}", config.db_path))?;

        // Remove old socket if exists
        let _ = std::fs::remove_file(&config.socket_path);
        let listener = UnixListener::bind(&config.socket_path)
            .with_context(|| format!("Failed to bind Unix socket {:?}", config.socket_path))?;

        let mut handler = RequestHandler::new(store, indicator);
        handler.refresh_indicator();

        let replies = ReplyChannel::new();
        let (broker, broker_handle) = MessageBroker::new(handler, replies.clone());
        let broker_task = tokio::spawn(broker.run());

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let listener_task = tokio::spawn(Self::run_listener(
            listener,
            config.socket_path.clone(),
            broker_handle.clone(),
            replies,
            shutdown_rx,
        ));

        tracing::info!("{} listening on {:?}", config.name, config.socket_path);

        Ok(Self {
            config,
            broker_handle,
            broker_task,
            listener_task,
            shutdown_tx,
        })
    }

    /// Run the Unix socket listener
    async fn run_listener(
        listener: UnixListener,
        socket_path: PathBuf,
        broker_handle: BrokerHandle,
        replies: ReplyChannel,
        mut shutdown_rx: mpsc::UnboundedReceiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            tokio::spawn(Self::handle_connection(
                                stream,
                                broker_handle.clone(),
                                replies.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Listener shutting down");
                    break;
                }
            }
        }

        // Cleanup
        let _ = std::fs::remove_file(&socket_path);
    }

    /// Handle a new client connection
    async fn handle_connection(stream: UnixStream, broker_handle: BrokerHandle, replies: ReplyChannel) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let client_id = replies.add_client(ClientConnection::new(outgoing_tx)).await;
        // The routing table must not outlive the broker through this task
        drop(replies);

        let origin = client_id.clone();
        let submit = |line: String| broker_handle.submit(Some(origin.clone()), line).is_ok();

        // Queued behind this client's requests so their replies still go out;
        // the broker then drops the connection's sender, which ends the writer
        let closed = || {
            let _ = broker_handle.send_command(BrokerCommand::ConnectionClosed {
                connection_id: client_id.clone(),
            });
        };

        if let Err(e) = handle_client_stream(stream, outgoing_rx, submit, closed).await {
            tracing::error!("Client stream error: {}", e);
        }
    }

    /// Get server configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Stop accepting connections, drain queued requests and flush the store
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Shutting down {}", self.config.name);

        let _ = self.shutdown_tx.send(());
        self.listener_task
            .await
            .context("Listener task failed")?;

        self.broker_handle
            .send_command(BrokerCommand::Shutdown)
            .context("Failed to send shutdown command")?;
        self.broker_task
            .await
            .context("Broker task failed")??;

        tracing::info!("Shutdown complete");
        Ok(())
    }
}
