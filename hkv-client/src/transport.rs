//! Transport seam between the resolution core and the wire.
//!
//! Pipelines, transactions and the subscription loop only ever talk to a
//! `Transport`; `Connection` is the TCP implementation, tests plug in doubles.

use std::time::Duration;

use crate::command::Command;
use crate::error::ClientResult;
use crate::resp::RespValue;

/// Blocking request/reply channel to one server connection.
///
/// Any `Err` returned here is a transport fault: the connection is no
/// longer usable and the caller is expected to `close` it.
pub trait Transport {
    /// Sends one command and blocks for its reply.
    ///
    /// A server error reply is returned as `Ok(RespValue::Error(..))`.
    fn send_command(&mut self, command: &Command) -> ClientResult<RespValue>;

    /// Sends all commands as one write and reads exactly one reply per
    /// command, in order. All-or-nothing: a fault yields no replies.
    fn send_batch(&mut self, commands: &[Command]) -> ClientResult<Vec<RespValue>>;

    /// Writes a command without reading a reply; used in subscribe mode,
    /// where acknowledgements arrive as pushed events.
    fn write_command(&mut self, command: &Command) -> ClientResult<()>;

    /// Waits for the next pushed event. `None` as timeout blocks
    /// indefinitely; `Ok(None)` means the timeout elapsed first.
    fn next_event(&mut self, timeout: Option<Duration>) -> ClientResult<Option<RespValue>>;

    /// Releases the connection.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_command(&mut self, command: &Command) -> ClientResult<RespValue> {
        (**self).send_command(command)
    }

    fn send_batch(&mut self, commands: &[Command]) -> ClientResult<Vec<RespValue>> {
        (**self).send_batch(commands)
    }

    fn write_command(&mut self, command: &Command) -> ClientResult<()> {
        (**self).write_command(command)
    }

    fn next_event(&mut self, timeout: Option<Duration>) -> ClientResult<Option<RespValue>> {
        (**self).next_event(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
