//! # Deferred Results
//!
//! Purpose: Hand out a placeholder for every command queued in a pipeline or
//! transaction, and fill it once the batch is flushed.
//!
//! ## Design Principles
//! 1. **Single Assignment**: The cell is a `OnceLock`; the first resolution
//!    wins and later attempts report `false` without touching the value.
//! 2. **Errors Surface on Read**: A failed result stores its error and hands
//!    it out from `value()`, so settling a batch never stops half-way.
//! 3. **Pending Is Loud**: Reading before resolution is a sequencing bug and
//!    fails with `ClientError::FutureNotReady`, never with a default.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──resolve(reply)──> resolved(value)
//!    │   └─resolve(-ERR)───> failed(Command)
//!    └──────fail(err)──────> failed(err)
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::transform::Transform;
use crate::value::Value;

/// Observable state of a deferred result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Resolved,
    Failed,
}

/// Single-assignment handle to a command's eventual result.
///
/// Clones share the same cell: the batch keeps one to resolve, the caller
/// keeps one to read.
#[derive(Clone)]
pub struct Deferred {
    cell: Arc<OnceLock<ClientResult<Value>>>,
    transform: Transform,
}

impl Deferred {
    /// Creates a pending result bound to `transform`.
    pub(crate) fn pending(transform: Transform) -> Self {
        Deferred {
            cell: Arc::new(OnceLock::new()),
            transform,
        }
    }

    /// Applies the transform to `raw` and stores the outcome.
    ///
    /// An error reply is stored as the mapped command error; a transform
    /// failure is stored as a decode error. Returns `false` if the result
    /// was already settled.
    pub(crate) fn resolve(&self, raw: RespValue) -> bool {
        if self.is_ready() {
            return false;
        }
        self.settle(self.transform.apply(raw))
    }

    /// Stores an error directly.
    pub(crate) fn fail(&self, err: ClientError) -> bool {
        self.settle(Err(err))
    }

    /// Stores a precomputed outcome.
    pub(crate) fn settle(&self, outcome: ClientResult<Value>) -> bool {
        self.cell.set(outcome).is_ok()
    }

    /// Returns the resolved value, or re-raises the captured error.
    pub fn value(&self) -> ClientResult<Value> {
        match self.cell.get() {
            Some(outcome) => outcome.clone(),
            None => Err(ClientError::FutureNotReady),
        }
    }

    pub fn state(&self) -> DeferredState {
        match self.cell.get() {
            None => DeferredState::Pending,
            Some(Ok(_)) => DeferredState::Resolved,
            Some(Err(_)) => DeferredState::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .field("transform", &self.transform)
            .finish()
    }
}
