//! # HybridKV Sync Client
//!
//! Purpose: Provide a synchronous Redis-compatible client whose batched
//! commands (pipelines and MULTI/EXEC transactions) hand out individually
//! resolvable results, and whose subscribe mode dispatches pushed events to
//! registered callbacks.
//!
//! ## Design Principles
//! 1. **One Result Per Command**: Every queued command gets a `Deferred`;
//!    bracket replies (`OK`, `QUEUED`) are consumed internally.
//! 2. **Transforms by Identity**: The reply shape a caller sees is chosen
//!    from the command name and flags, once, when the command is built.
//! 3. **Transport Seam**: All IO goes through the `Transport` trait, so the
//!    batching and dispatch logic is independent of the socket.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod command;
mod commands;
mod config;
mod connection;
mod deferred;
mod error;
mod pipeline;
mod pubsub;
mod resp;
mod transaction;
mod transform;
mod transport;
mod value;

pub use client::KVClient;
pub use command::{Command, ToArg};
pub use commands::Commands;
pub use config::ClientConfig;
pub use connection::Connection;
pub use deferred::{Deferred, DeferredState};
pub use error::{ClientError, ClientResult, CommandError, CommandErrorKind};
pub use pipeline::Pipeline;
pub use pubsub::{EventKind, OnTimeout, SubscribedClient, Subscription, SubscriptionMode, SubscriptionState};
pub use resp::RespValue;
pub use transaction::Transaction;
pub use transform::{transform_for, Transform};
pub use transport::Transport;
pub use value::Value;
