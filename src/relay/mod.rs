// Message relay: store, query engine and request handling
//
// Clients push free-form messages and pull them back, optionally filtered
// by wildcard patterns. A single broker task owns the persisted store and
// handles requests strictly one at a time.

pub mod wildcard;
pub mod message;
pub mod query;
pub mod storage;
pub mod indicator;
pub mod handler;
pub mod client;
pub mod broker;
pub mod server;
pub mod cli;
pub mod commands;

pub use wildcard::WildcardPattern;
pub use message::{Action, Dest, Reply, Request, StoredMessage};
pub use query::{build_predicate, Predicate, QuerySpec};
pub use storage::{MessageStore, StoreError};
pub use indicator::{BitPatternIndicator, LogIndicator, StatusIndicator};
pub use handler::{RequestError, RequestHandler};
pub use client::{DeliveryError, RelayClient, ReplyChannel};
pub use broker::{BrokerCommand, BrokerHandle, MessageBroker};
pub use server::{RelayConfig, RelayServer};
pub use cli::{BottleCli, BottleCommand};
pub use commands::execute_command;
