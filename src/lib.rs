//! bottle - Relay server for storing and distributing text messages
//!
//! Clients push messages made of free-form fields and later pull them back,
//! oldest first, optionally filtered by shell-style wildcard patterns. The
//! store is persisted in SQLite and survives restarts.

pub mod relay;

pub use relay::{MessageStore, QuerySpec, RelayConfig, RelayServer, RequestHandler};
