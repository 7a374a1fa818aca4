//! # Subscription Dispatcher
//!
//! Purpose: Drive the blocking receive loop of a subscribed connection and
//! hand each pushed event to the callback registered for its type.
//!
//! ## Design Principles
//! 1. **Explicit Fallback**: The callback table is a plain map; a type with
//!    no handler is skipped, nothing is inserted on lookup.
//! 2. **Re-entrancy Through a Handle**: Callbacks receive `&mut
//!    SubscribedClient`, which owns the loop state (subscribed targets,
//!    remaining count) and borrows the connection. Issuing SUBSCRIBE or
//!    UNSUBSCRIBE from a callback only writes; the acknowledgement comes back
//!    through the same loop.
//! 3. **Termination by Count**: The loop ends on the mode's stop event
//!    (`unsubscribe` / `punsubscribe`) whose trailing count is exactly 0.
//! 4. **No Cleanup on Error**: An error leaves the connection subscribed;
//!    the caller must close it.
//!
//! ## Event Shapes
//!
//! ```text
//! [subscribe,    channel, count]     [psubscribe,   pattern, count]
//! [unsubscribe,  channel, count]     [punsubscribe, pattern, count]
//! [message,      channel, payload]   [pmessage,     pattern, channel, payload]
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::command::{Command, ExecContext, ToArg};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::transport::Transport;
use crate::value::Value;

/// Type tag of a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Subscribe,
    Unsubscribe,
    Message,
    PSubscribe,
    PUnsubscribe,
    PMessage,
}

impl EventKind {
    pub fn from_bytes(tag: &[u8]) -> Option<Self> {
        let kind = match tag {
            b"subscribe" => EventKind::Subscribe,
            b"unsubscribe" => EventKind::Unsubscribe,
            b"message" => EventKind::Message,
            b"psubscribe" => EventKind::PSubscribe,
            b"punsubscribe" => EventKind::PUnsubscribe,
            b"pmessage" => EventKind::PMessage,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Message => "message",
            EventKind::PSubscribe => "psubscribe",
            EventKind::PUnsubscribe => "punsubscribe",
            EventKind::PMessage => "pmessage",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the event type when `frame` is a pub/sub push frame.
pub(crate) fn push_event_kind(frame: &RespValue) -> Option<EventKind> {
    match frame {
        RespValue::Array(items) => items.first()?.as_bytes().and_then(EventKind::from_bytes),
        _ => None,
    }
}

/// Channel subscriptions or pattern subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    Channel,
    Pattern,
}

impl SubscriptionMode {
    fn start_command(self) -> &'static str {
        match self {
            SubscriptionMode::Channel => "SUBSCRIBE",
            SubscriptionMode::Pattern => "PSUBSCRIBE",
        }
    }

    fn stop_kind(self) -> EventKind {
        match self {
            SubscriptionMode::Channel => EventKind::Unsubscribe,
            SubscriptionMode::Pattern => EventKind::PUnsubscribe,
        }
    }
}

/// What the loop does when no event arrives within the timeout.
///
/// An elapsed timeout is not an error unless the caller opts into `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnTimeout {
    /// Keep waiting.
    Continue,
    /// Leave the loop as if it had terminated normally.
    #[default]
    Return,
    /// Raise `ClientError::Timeout`.
    Fail,
}

type Handler<'a, E> = Box<dyn FnMut(&mut SubscribedClient<'_>, &[RespValue]) -> Result<(), E> + 'a>;

fn handler<'a, E, F>(f: F) -> Handler<'a, E>
where
    F: FnMut(&mut SubscribedClient<'_>, &[RespValue]) -> Result<(), E> + 'a,
{
    Box::new(f)
}

/// Callback table for one subscription loop.
///
/// `E` is the error type callbacks may raise; it is returned unchanged from
/// the subscribe call.
pub struct Subscription<'a, E = ClientError> {
    handlers: HashMap<EventKind, Handler<'a, E>>,
    on_timeout: OnTimeout,
}

impl<'a, E> Default for Subscription<'a, E>
where
    E: From<ClientError> + 'a,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, E> Subscription<'a, E>
where
    E: From<ClientError> + 'a,
{
    pub fn new() -> Self {
        Subscription {
            handlers: HashMap::new(),
            on_timeout: OnTimeout::default(),
        }
    }

    /// Sets the behavior when a timed subscription sees no event in time.
    pub fn timeout_policy(mut self, policy: OnTimeout) -> Self {
        self.on_timeout = policy;
        self
    }

    /// `(channel, subscribed count)` on each channel subscription ack.
    pub fn on_subscribe<F>(self, f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], i64) -> Result<(), E> + 'a,
    {
        self.register_counted(EventKind::Subscribe, f)
    }

    /// `(channel, remaining count)` on each channel unsubscription ack.
    pub fn on_unsubscribe<F>(self, f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], i64) -> Result<(), E> + 'a,
    {
        self.register_counted(EventKind::Unsubscribe, f)
    }

    /// `(channel, payload)` for each message on a subscribed channel.
    pub fn on_message<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], &[u8]) -> Result<(), E> + 'a,
    {
        self.handlers.insert(
            EventKind::Message,
            handler(move |client, rest| {
                let [channel, payload] = rest else {
                    return Err(malformed(EventKind::Message).into());
                };
                f(client, bytes_of(channel), bytes_of(payload))
            }),
        );
        self
    }

    /// `(pattern, subscribed count)` on each pattern subscription ack.
    pub fn on_psubscribe<F>(self, f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], i64) -> Result<(), E> + 'a,
    {
        self.register_counted(EventKind::PSubscribe, f)
    }

    /// `(pattern, remaining count)` on each pattern unsubscription ack.
    pub fn on_punsubscribe<F>(self, f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], i64) -> Result<(), E> + 'a,
    {
        self.register_counted(EventKind::PUnsubscribe, f)
    }

    /// `(pattern, channel, payload)` for each message matching a pattern.
    pub fn on_pmessage<F>(mut self, mut f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], &[u8], &[u8]) -> Result<(), E> + 'a,
    {
        self.handlers.insert(
            EventKind::PMessage,
            handler(move |client, rest| {
                let [pattern, channel, payload] = rest else {
                    return Err(malformed(EventKind::PMessage).into());
                };
                f(client, bytes_of(pattern), bytes_of(channel), bytes_of(payload))
            }),
        );
        self
    }

    fn register_counted<F>(mut self, kind: EventKind, mut f: F) -> Self
    where
        F: FnMut(&mut SubscribedClient<'_>, &[u8], i64) -> Result<(), E> + 'a,
    {
        self.handlers.insert(
            kind,
            handler(move |client, rest| {
                let (target, count) = counted_parts(kind, rest)?;
                f(client, target, count)
            }),
        );
        self
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Invokes the handler for `kind`; unregistered kinds are a no-op.
    fn dispatch(&mut self, kind: EventKind, client: &mut SubscribedClient<'_>, rest: &[RespValue]) -> Result<(), E> {
        match self.handlers.get_mut(&kind) {
            Some(handler) => handler(client, rest),
            None => Ok(()),
        }
    }
}

fn bytes_of(value: &RespValue) -> &[u8] {
    value.as_bytes().unwrap_or_default()
}

fn malformed(kind: EventKind) -> ClientError {
    debug!(%kind, "malformed push event");
    ClientError::Protocol("malformed push event")
}

fn counted_parts(kind: EventKind, rest: &[RespValue]) -> ClientResult<(&[u8], i64)> {
    match rest {
        // The target is null when unsubscribing with nothing subscribed.
        [target, RespValue::Integer(count)] => Ok((bytes_of(target), *count)),
        _ => Err(malformed(kind)),
    }
}

/// Loop-owned subscription bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    channels: BTreeSet<Vec<u8>>,
    patterns: BTreeSet<Vec<u8>>,
    remaining: i64,
}

impl SubscriptionState {
    fn observe(&mut self, kind: EventKind, rest: &[RespValue]) {
        let Ok((target, count)) = counted_parts(kind, rest) else {
            return;
        };
        match kind {
            EventKind::Subscribe => {
                self.channels.insert(target.to_vec());
            }
            EventKind::Unsubscribe => {
                self.channels.remove(target);
            }
            EventKind::PSubscribe => {
                self.patterns.insert(target.to_vec());
            }
            EventKind::PUnsubscribe => {
                self.patterns.remove(target);
            }
            EventKind::Message | EventKind::PMessage => return,
        }
        self.remaining = count;
    }
}

/// Handle passed to callbacks while the subscription loop runs.
pub struct SubscribedClient<'t> {
    transport: &'t mut dyn Transport,
    mode: SubscriptionMode,
    state: SubscriptionState,
}

impl<'t> SubscribedClient<'t> {
    fn new(transport: &'t mut dyn Transport, mode: SubscriptionMode) -> Self {
        SubscribedClient {
            transport,
            mode,
            state: SubscriptionState::default(),
        }
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    /// Subscription count reported by the latest acknowledgement.
    pub fn remaining(&self) -> i64 {
        self.state.remaining
    }

    pub fn is_subscribed(&self, channel: impl AsRef<[u8]>) -> bool {
        self.state.channels.contains(channel.as_ref())
    }

    pub fn is_psubscribed(&self, pattern: impl AsRef<[u8]>) -> bool {
        self.state.patterns.contains(pattern.as_ref())
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    pub fn subscribe<A: ToArg>(&mut self, channels: &[A]) -> ClientResult<()> {
        self.write(Command::new("SUBSCRIBE").args(channels), !channels.is_empty())
    }

    pub fn psubscribe<A: ToArg>(&mut self, patterns: &[A]) -> ClientResult<()> {
        self.write(Command::new("PSUBSCRIBE").args(patterns), !patterns.is_empty())
    }

    pub fn unsubscribe<A: ToArg>(&mut self, channels: &[A]) -> ClientResult<()> {
        self.write(Command::new("UNSUBSCRIBE").args(channels), true)
    }

    /// Unsubscribes from every channel.
    pub fn unsubscribe_all(&mut self) -> ClientResult<()> {
        self.write(Command::new("UNSUBSCRIBE"), true)
    }

    pub fn punsubscribe<A: ToArg>(&mut self, patterns: &[A]) -> ClientResult<()> {
        self.write(Command::new("PUNSUBSCRIBE").args(patterns), true)
    }

    /// Unsubscribes from every pattern.
    pub fn punsubscribe_all(&mut self) -> ClientResult<()> {
        self.write(Command::new("PUNSUBSCRIBE"), true)
    }

    /// Sends any other command and waits for its reply.
    pub fn call(&mut self, command: Command) -> ClientResult<Value> {
        command.validate_for(ExecContext::Direct)?;
        let reply = self.transport.send_command(&command)?;
        command.transform().apply(reply)
    }

    fn write(&mut self, command: Command, has_targets: bool) -> ClientResult<()> {
        if !has_targets {
            return Err(ClientError::InvalidCommand(format!(
                "{} needs at least one target",
                String::from_utf8_lossy(command.name())
            )));
        }
        self.transport.write_command(&command)
    }
}

/// Runs a subscription loop until its termination condition or an error.
pub(crate) fn run<'a, E>(
    transport: &mut dyn Transport,
    mode: SubscriptionMode,
    targets: Vec<Bytes>,
    mut subscription: Subscription<'a, E>,
    timeout: Option<Duration>,
) -> Result<(), E>
where
    E: From<ClientError> + 'a,
{
    if targets.is_empty() {
        return Err(ClientError::InvalidCommand(format!(
            "{} needs at least one target",
            mode.start_command()
        ))
        .into());
    }
    let timeout = timeout.filter(|t| !t.is_zero());
    let stop = mode.stop_kind();
    transport.write_command(&Command::new(mode.start_command()).args(&targets))?;
    debug!(?mode, targets = targets.len(), "subscription started");

    let mut client = SubscribedClient::new(transport, mode);
    loop {
        let event = match client.transport.next_event(timeout)? {
            Some(event) => event,
            None => match subscription.on_timeout {
                OnTimeout::Continue => continue,
                OnTimeout::Return => {
                    debug!(?mode, "subscription timed out, returning");
                    return Ok(());
                }
                OnTimeout::Fail => {
                    return Err(ClientError::Timeout(timeout.unwrap_or_default()).into());
                }
            },
        };

        let items = match event {
            RespValue::Error(message) => return Err(ClientError::from_server(&message).into()),
            RespValue::Array(items) if !items.is_empty() => items,
            _ => return Err(ClientError::Protocol("push event is not a non-empty array").into()),
        };
        let Some(kind) = items[0].as_bytes().and_then(EventKind::from_bytes) else {
            trace!("ignoring push event of unknown type");
            continue;
        };
        let rest = &items[1..];
        trace!(%kind, "dispatching push event");

        client.state.observe(kind, rest);
        subscription.dispatch(kind, &mut client, rest)?;

        if kind == stop && rest.last() == Some(&RespValue::Integer(0)) {
            debug!(?mode, "subscription finished");
            return Ok(());
        }
    }
}
