//! # Pipelines
//!
//! Purpose: Accumulate commands without sending them, flush them as one
//! write, and pair the raw replies back to the `Deferred` handed out for each
//! record.
//!
//! ## Reply Accounting
//!
//! Each record knows how many raw replies it consumes:
//!
//! ```text
//! bare command           1   reply
//! nested transaction     N+2 MULTI ack, N QUEUED acks, EXEC reply
//! empty transaction      0   nothing is sent, resolves to []
//! ```
//!
//! Bracket replies are consumed here; the caller only sees one outcome per
//! record.

use tracing::debug;

use crate::command::{Command, ExecContext};
use crate::commands::Commands;
use crate::deferred::Deferred;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::transaction::{fail_all, settle_exec, Queued, Transaction};
use crate::transform::Transform;
use crate::transport::Transport;
use crate::value::Value;

#[derive(Debug)]
enum Record {
    Command(Queued),
    Transaction { queued: Vec<Queued>, deferred: Deferred },
}

impl Record {
    fn deferred(&self) -> &Deferred {
        match self {
            Record::Command(queued) => &queued.deferred,
            Record::Transaction { deferred, .. } => deferred,
        }
    }

    fn reply_count(&self) -> usize {
        match self {
            Record::Command(_) => 1,
            Record::Transaction { queued, .. } if queued.is_empty() => 0,
            Record::Transaction { queued, .. } => queued.len() + 2,
        }
    }

    fn encode_into(&self, out: &mut Vec<Command>) {
        match self {
            Record::Command(queued) => out.push(queued.command.clone()),
            Record::Transaction { queued, .. } if queued.is_empty() => {}
            Record::Transaction { queued, .. } => {
                out.push(Command::new("MULTI"));
                out.extend(queued.iter().map(|entry| entry.command.clone()));
                out.push(Command::new("EXEC"));
            }
        }
    }

    /// Settles this record from exactly `reply_count()` replies.
    fn settle(&self, mut replies: Vec<RespValue>) {
        match self {
            Record::Command(queued) => {
                if let Some(reply) = replies.pop() {
                    queued.deferred.resolve(reply);
                }
            }
            Record::Transaction { queued, deferred } if queued.is_empty() => {
                deferred.settle(Ok(Value::Array(Vec::new())));
            }
            Record::Transaction { queued, deferred } => {
                let Some(exec) = replies.pop() else {
                    return;
                };
                if let Some(RespValue::Error(message)) = replies.first() {
                    let err = ClientError::from_server(message);
                    fail_all(queued, &err);
                    deferred.fail(err);
                    return;
                }
                match settle_exec(queued, &replies[1..], exec) {
                    Ok(Some(values)) => deferred.settle(Ok(Value::Array(values))),
                    Ok(None) => deferred.settle(Ok(Value::Nil)),
                    Err(err) => deferred.fail(err),
                };
            }
        }
    }

    fn fail(&self, err: &ClientError) {
        if let Record::Transaction { queued, .. } = self {
            fail_all(queued, err);
        }
        self.deferred().fail(err.clone());
    }
}

/// Command batch handle passed to the body of `pipelined`.
#[derive(Debug, Default)]
pub struct Pipeline {
    records: Vec<Record>,
    rejected: Option<ClientError>,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Pipeline::default()
    }

    /// Queues `command`; its value is available after the flush.
    pub fn enqueue(&mut self, command: Command) -> ClientResult<Deferred> {
        if let Err(err) = command.validate_for(ExecContext::Pipeline) {
            self.rejected.get_or_insert_with(|| err.clone());
            return Err(err);
        }
        let queued = Queued::new(command);
        let deferred = queued.deferred.clone();
        self.records.push(Record::Command(queued));
        Ok(deferred)
    }

    /// Queues a whole transaction as one record.
    ///
    /// The returned `Deferred` resolves to the grouped array of transformed
    /// values, or to `Nil` when a watched key aborted the transaction.
    pub fn multi<F, E>(&mut self, body: F) -> Result<Deferred, E>
    where
        F: FnOnce(&mut Transaction) -> Result<(), E>,
        E: From<ClientError>,
    {
        let mut tx = Transaction::new();
        let outcome = body(&mut tx);
        if let Err(err) = tx.outcome(outcome) {
            tx.abandon();
            // A body error of the caller's own type can not be kept here.
            let cause = tx
                .rejection()
                .cloned()
                .unwrap_or_else(|| ClientError::InvalidCommand("nested transaction body failed".to_string()));
            self.rejected.get_or_insert(cause);
            return Err(err);
        }
        let deferred = Deferred::pending(Transform::Identity);
        self.records.push(Record::Transaction {
            queued: tx.into_queued(),
            deferred: deferred.clone(),
        });
        Ok(deferred)
    }

    /// Number of records (a nested transaction counts once).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

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

    /// Fails every handed-out result; nothing is sent.
    pub(crate) fn abandon(&self) {
        debug!(records = self.records.len(), "pipeline abandoned");
        for record in &self.records {
            record.fail(&ClientError::FutureNotReady);
        }
    }

    /// Sends every record as one batch and settles the results.
    ///
    /// Returns one outcome per record, in enqueue order. A transport fault
    /// fails every result in the batch and is returned as the error.
    pub(crate) fn flush(self, transport: &mut dyn Transport) -> ClientResult<Vec<ClientResult<Value>>> {
        let mut commands = Vec::new();
        for record in &self.records {
            record.encode_into(&mut commands);
        }
        debug!(records = self.records.len(), commands = commands.len(), "flushing pipeline");

        let replies = match transport.send_batch(&commands) {
            Ok(replies) if replies.len() == commands.len() => replies,
            Ok(replies) => {
                debug!(expected = commands.len(), got = replies.len(), "pipeline reply count mismatch");
                return Err(self.fail_all(ClientError::Protocol("pipeline reply count mismatch")));
            }
            Err(err) => return Err(self.fail_all(err)),
        };

        let mut replies = replies.into_iter();
        let mut outcomes = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let chunk: Vec<RespValue> = replies.by_ref().take(record.reply_count()).collect();
            record.settle(chunk);
            outcomes.push(record.deferred().value());
        }
        Ok(outcomes)
    }

    fn fail_all(&self, err: ClientError) -> ClientError {
        for record in &self.records {
            record.fail(&err);
        }
        err
    }
}

impl Commands for Pipeline {
    type Output = ClientResult<Deferred>;

    fn issue(&mut self, command: Command) -> Self::Output {
        self.enqueue(command)
    }
}
