//! # Client Error Taxonomy
//!
//! Every failure a caller can observe is a `ClientError`. Errors are `Clone`
//! because a failed `Deferred` hands its captured error out on every read.
//!
//! Server error replies are never collapsed into one generic variant: the
//! leading token of the message selects a `CommandErrorKind`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// The peer closed the connection, or it was closed after a fault.
    #[error("connection closed")]
    ConnectionClosed,

    /// No pushed event arrived within the subscription timeout.
    #[error("no event received within {0:?}")]
    Timeout(Duration),

    /// The server rejected a specific command.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A deferred result was read before its batch resolved it.
    #[error("value will be available once the pipeline or transaction is flushed")]
    FutureNotReady,

    /// EXEC reported that a watched key changed before commit.
    #[error("transaction aborted: a watched key was modified")]
    TransactionAborted,

    /// A reply transformer could not interpret the reply shape.
    #[error("cannot decode {actual} reply as {expected}")]
    Decode {
        expected: &'static str,
        actual: &'static str,
    },

    /// The command was rejected client-side before anything was sent.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Address could not be parsed into a socket address.
    #[error("invalid address")]
    InvalidAddress,

    /// Configuration document could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Maps a raw `-ERR ...` payload to the matching taxonomy member.
    pub fn from_server(message: &[u8]) -> Self {
        ClientError::Command(CommandError::parse(message))
    }

    /// True for connection-level failures; the connection must be discarded.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::ConnectionClosed
                | ClientError::Timeout(_)
        )
    }

    /// Returns the server error kind when this is a command error.
    pub fn command_kind(&self) -> Option<CommandErrorKind> {
        match self {
            ClientError::Command(err) => Some(err.kind),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

/// Category of a server-side command rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandErrorKind {
    /// WRONGTYPE: operation against a key holding the wrong kind of value.
    WrongType,
    /// ERR value is not an integer (or float) or out of range.
    NotAnInteger,
    /// ERR syntax error.
    Syntax,
    /// ERR unknown command.
    UnknownCommand,
    /// EXECABORT: the transaction was discarded because of queue-time errors.
    ExecAbort,
    NoScript,
    ReadOnly,
    OutOfMemory,
    Busy,
    NoAuth,
    /// Any other error reply.
    Generic,
}

/// Server rejection of one command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server error: {message}")]
pub struct CommandError {
    pub kind: CommandErrorKind,
    /// Raw server message, prefix included.
    pub message: String,
}

impl CommandError {
    /// Classifies a server error message by its leading token.
    pub fn parse(message: &[u8]) -> Self {
        let message = String::from_utf8_lossy(message).into_owned();
        let (prefix, rest) = match message.split_once(' ') {
            Some((prefix, rest)) => (prefix, rest),
            None => (message.as_str(), ""),
        };
        let kind = match prefix {
            "WRONGTYPE" => CommandErrorKind::WrongType,
            "EXECABORT" => CommandErrorKind::ExecAbort,
            "NOSCRIPT" => CommandErrorKind::NoScript,
            "READONLY" => CommandErrorKind::ReadOnly,
            "OOM" => CommandErrorKind::OutOfMemory,
            "BUSY" => CommandErrorKind::Busy,
            "NOAUTH" => CommandErrorKind::NoAuth,
            "ERR" => classify_err(rest),
            _ => CommandErrorKind::Generic,
        };
        CommandError { kind, message }
    }
}

fn classify_err(rest: &str) -> CommandErrorKind {
    if rest.starts_with("value is not an integer") || rest.starts_with("value is not a valid float") {
        CommandErrorKind::NotAnInteger
    } else if rest.starts_with("syntax error") {
        CommandErrorKind::Syntax
    } else if rest.starts_with("unknown command") {
        CommandErrorKind::UnknownCommand
    } else {
        CommandErrorKind::Generic
    }
}
