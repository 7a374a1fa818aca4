//! # Encoded Commands
//!
//! A `Command` is the unit every execution path queues: its arguments, the
//! reply transform chosen from its identity, and an optional server-side
//! block timeout.
//!
//! Validation happens when a command is called directly or enters a pipeline
//! or transaction, so a malformed command fails immediately instead of
//! poisoning a flush.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{ClientError, ClientResult};
use crate::resp::encode_command;
use crate::transform::{transform_for, Transform};

/// Types that can be encoded as a command argument.
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for &str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for &String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for &[u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for &[u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(&self[..])
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for i64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for i32 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for u64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for usize {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

/// Execution path a command is submitted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecContext {
    Direct,
    Pipeline,
    Transaction,
}

/// A fully encoded command plus its reply transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    args: Vec<Bytes>,
    transform: Option<Transform>,
    block_timeout: Option<Duration>,
}

impl Command {
    /// Starts a command with the given name.
    pub fn new(name: impl ToArg) -> Self {
        Command {
            args: vec![name.to_arg()],
            transform: None,
            block_timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Appends every argument of `args`.
    pub fn args<A: ToArg>(mut self, args: &[A]) -> Self {
        self.args.extend(args.iter().map(ToArg::to_arg));
        self
    }

    /// Overrides the transform selected from the command name.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Marks the command as blocking server-side for up to `timeout`
    /// (`Duration::ZERO` blocks indefinitely).
    pub fn blocking(mut self, timeout: Duration) -> Self {
        self.block_timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// Transform applied to this command's reply.
    pub fn transform(&self) -> Transform {
        self.transform.unwrap_or_else(|| transform_for(&self.args))
    }

    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout
    }

    /// Case-insensitive name check.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    /// Encodes the command as one RESP array.
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_command(&self.args, out);
    }

    /// Rejects commands that can never be sent.
    pub(crate) fn validate(&self) -> ClientResult<()> {
        if self.name().is_empty() {
            return Err(ClientError::InvalidCommand("empty command name".to_string()));
        }
        if self.is("SET") {
            let has = |flag: &str| self.args[3..].iter().any(|arg| arg.eq_ignore_ascii_case(flag.as_bytes()));
            if self.args.len() > 3 && has("NX") && has("XX") {
                return Err(ClientError::InvalidCommand(
                    "SET accepts only one of NX and XX".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Rejects commands that may not be submitted through `context`.
    pub(crate) fn validate_for(&self, context: ExecContext) -> ClientResult<()> {
        self.validate()?;
        if self.is_subscription() {
            return Err(self.rejected("subscription commands (use the subscribe API)"));
        }
        if context == ExecContext::Direct {
            return Ok(());
        }
        if self.is("MULTI") || self.is("EXEC") || self.is("DISCARD") {
            let what = match context {
                ExecContext::Transaction => "nested transaction markers",
                _ => "transaction markers (use Pipeline::multi)",
            };
            return Err(self.rejected(what));
        }
        if context == ExecContext::Transaction && (self.is("WATCH") || self.is("UNWATCH")) {
            return Err(self.rejected("WATCH inside MULTI"));
        }
        Ok(())
    }

    fn is_subscription(&self) -> bool {
        ["SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE"]
            .iter()
            .any(|name| self.is(name))
    }

    fn rejected(&self, what: &str) -> ClientError {
        ClientError::InvalidCommand(format!(
            "{} rejected: {what} are not allowed here",
            String::from_utf8_lossy(self.name())
        ))
    }
}
