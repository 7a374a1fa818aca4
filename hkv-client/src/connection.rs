//! # TCP Connection
//!
//! Purpose: The `Transport` used in production: one blocking TCP stream with
//! reusable buffers, shared by request/reply traffic and subscribe mode.
//!
//! ## Design Principles
//! 1. **One Write Per Batch**: A pipeline is encoded into one buffer and
//!    written once; replies are then read back in order, with the read
//!    timeout stretched by the longest server-side block in the batch.
//! 2. **Faults Are Sticky**: After an IO or framing error the connection
//!    refuses further use; reply boundaries can no longer be trusted.
//! 3. **Pushes Are Never Lost**: In subscribe mode, push frames that arrive
//!    while a command reply is awaited are queued for `next_event`.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::pubsub::{push_event_kind, EventKind};
use crate::resp::{read_response, RespValue};
use crate::transport::Transport;

/// Single TCP connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    read_timeout: Option<Duration>,
    pending_events: VecDeque<RespValue>,
    subscribed: bool,
    usable: bool,
}

impl Connection {
    /// Opens a connection using `config`.
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout())?;
        stream.set_write_timeout(config.write_timeout())?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        debug!(addr = %config.addr, "connection established");

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            read_timeout: config.read_timeout(),
            pending_events: VecDeque::new(),
            subscribed: false,
            usable: true,
        })
    }

    /// True while no fault has been observed and `close` was not called.
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    fn ensure_usable(&self) -> ClientResult<()> {
        if self.usable {
            Ok(())
        } else {
            Err(ClientError::ConnectionClosed)
        }
    }

    /// Marks the connection unusable when `result` is a fault.
    fn guard<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if result.is_err() {
            self.usable = false;
        }
        result
    }

    fn flush_writes(&mut self) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    fn read_reply(&mut self) -> ClientResult<RespValue> {
        loop {
            let reply = read_response(&mut self.reader, &mut self.line_buf)?;
            if self.subscribed && push_event_kind(&reply).is_some() {
                self.pending_events.push_back(reply);
                continue;
            }
            return Ok(reply);
        }
    }

    fn exec_one(&mut self, command: &Command) -> ClientResult<RespValue> {
        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        self.flush_writes()?;
        self.with_block_timeout(command.block_timeout(), Self::read_reply)
    }

    fn exec_batch(&mut self, commands: &[Command]) -> ClientResult<Vec<RespValue>> {
        self.write_buf.clear();
        for command in commands {
            command.encode(&mut self.write_buf);
        }
        self.flush_writes()?;

        self.with_block_timeout(batch_block_timeout(commands), |conn| {
            let mut replies = Vec::with_capacity(commands.len());
            for _ in commands {
                replies.push(conn.read_reply()?);
            }
            Ok(replies)
        })
    }

    /// Runs `read` with the read timeout extended by `block`, the time the
    /// server may legitimately hold a reply (`Duration::ZERO` means forever).
    fn with_block_timeout<R>(
        &mut self,
        block: Option<Duration>,
        read: impl FnOnce(&mut Self) -> ClientResult<R>,
    ) -> ClientResult<R> {
        let Some(block) = block else {
            return read(self);
        };
        let extended = match self.read_timeout {
            Some(timeout) if !block.is_zero() => Some(timeout + block),
            _ => None,
        };
        self.reader.get_ref().set_read_timeout(extended)?;
        let result = read(self);
        self.reader.get_ref().set_read_timeout(self.read_timeout)?;
        result
    }

    fn wait_event(&mut self, timeout: Option<Duration>) -> ClientResult<Option<RespValue>> {
        if self.reader.buffer().is_empty() {
            self.reader.get_ref().set_read_timeout(timeout)?;
            let ready = match self.reader.fill_buf() {
                Ok(buf) => Ok(!buf.is_empty()),
                Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    Ok(false)
                }
                Err(err) => Err(ClientError::from(err)),
            };
            self.reader.get_ref().set_read_timeout(self.read_timeout)?;
            match ready {
                Ok(true) => {}
                Ok(false) if timeout.is_some() => return Ok(None),
                Ok(false) => return Err(ClientError::ConnectionClosed),
                Err(err) => return Err(err),
            }
        }

        let event = read_response(&mut self.reader, &mut self.line_buf)?;
        self.track_subscription(&event);
        Ok(Some(event))
    }

    fn track_subscription(&mut self, event: &RespValue) {
        if let Some(EventKind::Unsubscribe | EventKind::PUnsubscribe) = push_event_kind(event) {
            if let RespValue::Array(items) = event {
                if items.last().and_then(RespValue::as_integer) == Some(0) {
                    self.subscribed = false;
                }
            }
        }
    }
}

impl Transport for Connection {
    fn send_command(&mut self, command: &Command) -> ClientResult<RespValue> {
        self.ensure_usable()?;
        let result = self.exec_one(command);
        self.guard(result)
    }

    fn send_batch(&mut self, commands: &[Command]) -> ClientResult<Vec<RespValue>> {
        self.ensure_usable()?;
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.exec_batch(commands);
        self.guard(result)
    }

    fn write_command(&mut self, command: &Command) -> ClientResult<()> {
        self.ensure_usable()?;
        if command.is("SUBSCRIBE") || command.is("PSUBSCRIBE") {
            self.subscribed = true;
        }
        self.write_buf.clear();
        command.encode(&mut self.write_buf);
        let result = self.flush_writes();
        self.guard(result)
    }

    fn next_event(&mut self, timeout: Option<Duration>) -> ClientResult<Option<RespValue>> {
        self.ensure_usable()?;
        if let Some(event) = self.pending_events.pop_front() {
            self.track_subscription(&event);
            return Ok(Some(event));
        }
        let result = self.wait_event(timeout.filter(|t| !t.is_zero()));
        self.guard(result)
    }

    fn close(&mut self) {
        if self.usable {
            debug!("closing connection");
        }
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        self.usable = false;
        self.pending_events.clear();
    }
}

/// Longest block timeout in a batch; any indefinite block wins.
fn batch_block_timeout(commands: &[Command]) -> Option<Duration> {
    commands
        .iter()
        .filter_map(Command::block_timeout)
        .reduce(|longest, next| {
            if longest.is_zero() || next.is_zero() {
                Duration::ZERO
            } else {
                longest.max(next)
            }
        })
}

fn connect_stream(config: &ClientConfig) -> ClientResult<TcpStream> {
    let addr: SocketAddr = config.addr.parse().map_err(|_| ClientError::InvalidAddress)?;
    let stream = match config.connect_timeout() {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}
