//! # MULTI/EXEC Transactions
//!
//! Purpose: Queue commands between the begin and commit markers and turn the
//! grouped EXEC reply back into one settled `Deferred` per command.
//!
//! ## Lifecycle
//!
//! ```text
//! idle ──MULTI──> open ──enqueue*──> queued ──EXEC──> committed
//!                   │                   │               ├─ *-1  ──> aborted  (watched key changed)
//!                   │                   │               └─ -ERR ──> errored  (commit failed outright)
//!                   └──── body error / rejected enqueue ──> DISCARD, every Deferred fails NotReady
//! ```
//!
//! The same builder serves a standalone transaction (markers sent by
//! `KVClient::multi`) and a transaction nested in a pipeline (markers queued
//! as ordinary pipeline records). Bracket replies (`OK`, `QUEUED`) never
//! reach the caller.

use tracing::debug;

use crate::command::{Command, ExecContext};
use crate::commands::Commands;
use crate::deferred::Deferred;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::value::Value;

/// One queued command and the result handle given out for it.
#[derive(Debug)]
pub(crate) struct Queued {
    pub(crate) command: Command,
    pub(crate) deferred: Deferred,
}

impl Queued {
    pub(crate) fn new(command: Command) -> Self {
        let deferred = Deferred::pending(command.transform());
        Queued { command, deferred }
    }
}

/// Transaction handle passed to the body of `multi`.
#[derive(Debug, Default)]
pub struct Transaction {
    queued: Vec<Queued>,
    rejected: Option<ClientError>,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Transaction::default()
    }

    /// Queues `command`; its value is available once the transaction commits.
    ///
    /// A rejected command aborts the whole transaction, even if the body
    /// carries on.
    pub fn enqueue(&mut self, command: Command) -> ClientResult<Deferred> {
        if let Err(err) = command.validate_for(ExecContext::Transaction) {
            self.rejected.get_or_insert_with(|| err.clone());
            return Err(err);
        }
        let queued = Queued::new(command);
        let deferred = queued.deferred.clone();
        self.queued.push(queued);
        Ok(deferred)
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Combines the body outcome with any rejected enqueue.
    pub(crate) fn outcome<E>(&self, body: Result<(), E>) -> Result<(), E>
    where
        E: From<ClientError>,
    {
        body?;
        match &self.rejected {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    /// First command rejected by `enqueue`, if any.
    pub(crate) fn rejection(&self) -> Option<&ClientError> {
        self.rejected.as_ref()
    }

    /// Fails every handed-out result; nothing queued will run.
    pub(crate) fn abandon(&self) {
        debug!(queued = self.queued.len(), "transaction abandoned");
        for queued in &self.queued {
            queued.deferred.fail(ClientError::FutureNotReady);
        }
    }

    pub(crate) fn into_queued(self) -> Vec<Queued> {
        self.queued
    }
}

impl Commands for Transaction {
    type Output = ClientResult<Deferred>;

    fn issue(&mut self, command: Command) -> Self::Output {
        self.enqueue(command)
    }
}

/// Fails every queued result with `err`.
pub(crate) fn fail_all(queued: &[Queued], err: &ClientError) {
    for entry in queued {
        entry.deferred.fail(err.clone());
    }
}

/// Settles queued results from the queue acknowledgements and EXEC reply.
///
/// Returns the transformed values in submission order, `None` when a watched
/// key aborted the transaction, or the first error (after every result has
/// been settled).
pub(crate) fn settle_exec(
    queued: &[Queued],
    acks: &[RespValue],
    exec: RespValue,
) -> ClientResult<Option<Vec<Value>>> {
    // A command rejected at queue time keeps its own error.
    for (entry, ack) in queued.iter().zip(acks) {
        if let RespValue::Error(message) = ack {
            entry.deferred.fail(ClientError::from_server(message));
        }
    }

    match exec {
        RespValue::Error(message) => {
            let err = ClientError::from_server(&message);
            fail_all(queued, &err);
            Err(err)
        }
        RespValue::NullArray => {
            debug!(queued = queued.len(), "transaction aborted by watched key");
            fail_all(queued, &ClientError::TransactionAborted);
            Ok(None)
        }
        RespValue::Array(replies) if replies.len() == queued.len() => {
            let mut values = Vec::with_capacity(replies.len());
            let mut first_err = None;
            for (entry, reply) in queued.iter().zip(replies) {
                entry.deferred.resolve(reply);
                match entry.deferred.value() {
                    Ok(value) => values.push(value),
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(Some(values)),
            }
        }
        _ => {
            let err = ClientError::Protocol("EXEC reply does not match queued commands");
            fail_all(queued, &err);
            Err(err)
        }
    }
}
