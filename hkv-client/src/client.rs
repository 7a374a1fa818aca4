//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API over one `Transport`: direct
//! calls, pipelines, MULTI/EXEC transactions, optimistic locking with WATCH,
//! and the subscription loop.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides framing, reply accounting and
//!    bracket replies; callers only see transformed values.
//! 2. **Scoped Batches**: `pipelined` and `multi` take a closure, so a batch
//!    can not outlive its flush and can not be flushed twice.
//! 3. **User Errors Pass Through**: Bodies and callbacks return any
//!    `E: From<ClientError>`; their errors come back unchanged.
//! 4. **Fail Fast**: Protocol violations surface immediately as errors.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::command::{Command, ExecContext, ToArg};
use crate::commands::Commands;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::pipeline::Pipeline;
use crate::pubsub::{self, push_event_kind, EventKind, Subscription, SubscriptionMode};
use crate::resp::RespValue;
use crate::transaction::{fail_all, settle_exec, Transaction};
use crate::transport::Transport;
use crate::value::Value;

/// Synchronous client over a single transport.
pub struct KVClient<T: Transport = Connection> {
    transport: T,
}

impl KVClient<Connection> {
    /// Connects with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Connects with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        Ok(KVClient {
            transport: Connection::connect(&config)?,
        })
    }
}

impl<T: Transport> KVClient<T> {
    /// Wraps an already established transport.
    pub fn from_transport(transport: T) -> Self {
        KVClient { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Closes the underlying transport. Required after a failed subscription.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Sends one command and returns its transformed reply.
    ///
    /// An error reply is returned as `ClientError::Command`.
    pub fn call(&mut self, command: Command) -> ClientResult<Value> {
        command.validate_for(ExecContext::Direct)?;
        let reply = self.transport.send_command(&command)?;
        command.transform().apply(reply)
    }

    /// Queues the commands issued by `body` and sends them as one batch.
    ///
    /// Returns one outcome per queued record, in order. If `body` fails,
    /// nothing is sent and its error is returned.
    ///
    /// ```no_run
    /// use hkv_client::{Commands, KVClient};
    ///
    /// # fn main() -> hkv_client::ClientResult<()> {
    /// let mut client = KVClient::connect("127.0.0.1:6379")?;
    /// let results = client.pipelined(|pipe| -> hkv_client::ClientResult<()> {
    ///     pipe.set("counter", 1i64)?;
    ///     pipe.incr("counter")?;
    ///     Ok(())
    /// })?;
    /// assert_eq!(results.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn pipelined<F, E>(&mut self, body: F) -> Result<Vec<ClientResult<Value>>, E>
    where
        F: FnOnce(&mut Pipeline) -> Result<(), E>,
        E: From<ClientError>,
    {
        let mut pipeline = Pipeline::new();
        let outcome = body(&mut pipeline);
        if let Err(err) = pipeline.outcome(outcome) {
            pipeline.abandon();
            return Err(err);
        }
        Ok(pipeline.flush(&mut self.transport)?)
    }

    /// Runs `body` inside MULTI/EXEC.
    ///
    /// Returns the transformed values in queue order, or `None` when a
    /// watched key changed and the server aborted the transaction. A
    /// per-command error is raised after every `Deferred` is settled. If
    /// `body` fails or a command is rejected, DISCARD is sent and the
    /// original error is returned.
    pub fn multi<F, E>(&mut self, body: F) -> Result<Option<Vec<Value>>, E>
    where
        F: FnOnce(&mut Transaction) -> Result<(), E>,
        E: From<ClientError>,
    {
        if let RespValue::Error(message) = self.transport.send_command(&Command::new("MULTI"))? {
            return Err(ClientError::from_server(&message).into());
        }
        debug!("transaction opened");

        let mut tx = Transaction::new();
        let outcome = body(&mut tx);
        if let Err(err) = tx.outcome(outcome) {
            tx.abandon();
            self.discard();
            return Err(err);
        }
        if tx.is_empty() {
            self.discard();
            return Ok(Some(Vec::new()));
        }

        let queued = tx.into_queued();
        let mut commands: Vec<Command> = queued.iter().map(|entry| entry.command.clone()).collect();
        commands.push(Command::new("EXEC"));

        let mut replies = match self.transport.send_batch(&commands) {
            Ok(replies) if replies.len() == commands.len() => replies,
            Ok(_) => {
                let err = ClientError::Protocol("transaction reply count mismatch");
                fail_all(&queued, &err);
                return Err(err.into());
            }
            Err(err) => {
                fail_all(&queued, &err);
                return Err(err.into());
            }
        };
        let exec = replies.pop().ok_or(ClientError::Protocol("missing EXEC reply"))?;
        debug!(queued = queued.len(), "transaction committed");
        Ok(settle_exec(&queued, &replies, exec)?)
    }

    /// Sends DISCARD; a failure is logged, the caller's error wins.
    fn discard(&mut self) {
        match self.transport.send_command(&Command::new("DISCARD")) {
            Ok(RespValue::Error(message)) => {
                warn!(error = %String::from_utf8_lossy(&message), "DISCARD rejected");
            }
            Ok(_) => debug!("transaction discarded"),
            Err(err) => warn!(error = %err, "DISCARD failed"),
        }
    }

    /// Marks `keys` for optimistic locking by the next transaction.
    pub fn watch<K: ToArg>(&mut self, keys: &[K]) -> ClientResult<()> {
        if keys.is_empty() {
            return Err(ClientError::InvalidCommand("WATCH needs at least one key".to_string()));
        }
        self.call(Command::new("WATCH").args(keys)).map(|_| ())
    }

    pub fn unwatch(&mut self) -> ClientResult<()> {
        self.call(Command::new("UNWATCH")).map(|_| ())
    }

    /// Watches `keys`, then runs `body`; UNWATCH is sent if `body` fails.
    pub fn watching<K, F, R, E>(&mut self, keys: &[K], body: F) -> Result<R, E>
    where
        K: ToArg,
        F: FnOnce(&mut Self) -> Result<R, E>,
        E: From<ClientError>,
    {
        self.watch(keys)?;
        match body(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(unwatch_err) = self.unwatch() {
                    warn!(error = %unwatch_err, "UNWATCH failed");
                }
                Err(err)
            }
        }
    }

    /// Subscribes to `channels` and dispatches events until every channel is
    /// unsubscribed.
    ///
    /// On error the connection stays in subscribed mode; close it.
    pub fn subscribe<'a, C, E>(&mut self, channels: &[C], subscription: Subscription<'a, E>) -> Result<(), E>
    where
        C: ToArg,
        E: From<ClientError> + 'a,
    {
        self.run_subscription(SubscriptionMode::Channel, channels, subscription, None)
    }

    /// As `subscribe`, applying the subscription's timeout policy when no
    /// event arrives within `timeout` (`Duration::ZERO` waits forever).
    ///
    /// By default an elapsed timeout leaves the loop normally and the
    /// connection stays subscribed; `OnTimeout::Fail` raises instead.
    pub fn subscribe_with_timeout<'a, C, E>(
        &mut self,
        timeout: Duration,
        channels: &[C],
        subscription: Subscription<'a, E>,
    ) -> Result<(), E>
    where
        C: ToArg,
        E: From<ClientError> + 'a,
    {
        self.run_subscription(SubscriptionMode::Channel, channels, subscription, Some(timeout))
    }

    /// Pattern counterpart of `subscribe`.
    pub fn psubscribe<'a, P, E>(&mut self, patterns: &[P], subscription: Subscription<'a, E>) -> Result<(), E>
    where
        P: ToArg,
        E: From<ClientError> + 'a,
    {
        self.run_subscription(SubscriptionMode::Pattern, patterns, subscription, None)
    }

    pub fn psubscribe_with_timeout<'a, P, E>(
        &mut self,
        timeout: Duration,
        patterns: &[P],
        subscription: Subscription<'a, E>,
    ) -> Result<(), E>
    where
        P: ToArg,
        E: From<ClientError> + 'a,
    {
        self.run_subscription(SubscriptionMode::Pattern, patterns, subscription, Some(timeout))
    }

    fn run_subscription<'a, A, E>(
        &mut self,
        mode: SubscriptionMode,
        targets: &[A],
        subscription: Subscription<'a, E>,
        timeout: Option<Duration>,
    ) -> Result<(), E>
    where
        A: ToArg,
        E: From<ClientError> + 'a,
    {
        let targets = targets.iter().map(ToArg::to_arg).collect();
        pubsub::run(&mut self.transport, mode, targets, subscription, timeout)
    }

    /// Unsubscribes outside a subscription loop (all channels when empty).
    ///
    /// Every acknowledgement is consumed before returning, so no stale push
    /// frame is left on the connection. Returns the subscription count
    /// reported by the last acknowledgement.
    pub fn unsubscribe<C: ToArg>(&mut self, channels: &[C]) -> ClientResult<i64> {
        self.leave(Command::new("UNSUBSCRIBE").args(channels), EventKind::Unsubscribe)
    }

    /// Pattern counterpart of `unsubscribe` (all patterns when empty).
    pub fn punsubscribe<P: ToArg>(&mut self, patterns: &[P]) -> ClientResult<i64> {
        self.leave(Command::new("PUNSUBSCRIBE").args(patterns), EventKind::PUnsubscribe)
    }

    fn leave(&mut self, command: Command, ack: EventKind) -> ClientResult<i64> {
        // The number of acks is unknown for a bare (P)UNSUBSCRIBE; the PING
        // reply queued behind it marks the end of them.
        self.transport.write_command(&command)?;
        self.transport.write_command(&Command::new("PING"))?;

        let mut remaining = 0;
        let mut rejected = None;
        loop {
            let event = self.transport.next_event(None)?.ok_or(ClientError::ConnectionClosed)?;
            if is_pong(&event) {
                break;
            }
            if let RespValue::Error(message) = &event {
                rejected.get_or_insert_with(|| ClientError::from_server(message));
                continue;
            }
            if push_event_kind(&event) != Some(ack) {
                trace!("skipping push event while unsubscribing");
                continue;
            }
            let RespValue::Array(items) = event else {
                return Err(ClientError::Protocol("malformed unsubscribe ack"));
            };
            remaining = items
                .last()
                .and_then(RespValue::as_integer)
                .ok_or(ClientError::Protocol("malformed unsubscribe ack"))?;
        }
        debug!(%ack, remaining, "unsubscribed outside subscription loop");
        match rejected {
            Some(err) => Err(err),
            None => Ok(remaining),
        }
    }
}

/// PING answers `+PONG` outside subscribed mode and `[pong, ""]` inside it.
fn is_pong(event: &RespValue) -> bool {
    match event {
        RespValue::Simple(text) => text.eq_ignore_ascii_case(b"PONG"),
        RespValue::Array(items) => items
            .first()
            .and_then(RespValue::as_bytes)
            .is_some_and(|kind| kind.eq_ignore_ascii_case(b"pong")),
        _ => false,
    }
}

impl<T: Transport> Commands for KVClient<T> {
    type Output = ClientResult<Value>;

    fn issue(&mut self, command: Command) -> Self::Output {
        self.call(command)
    }
}
