//! The contract every notification backend fulfils.
//!
//! The backends differ wildly underneath, so the surface is deliberately
//! narrow:
//!
//! 1) registration is expressed per direction. `add` only ever adds
//!    directions to what a [`Handle`] already has and `del` only ever removes
//!    them. The handle's `interest` is kept equal to what the kernel knows.
//! 2) results of `wait` are read back by index through `data` and `event` and
//!    are only valid until the next `wait`. kqueue reports the read and write
//!    sides of one descriptor as separate entries, so callers must not assume
//!    one entry per descriptor.
//! 3) readiness is level triggered: anything left unconsumed is reported
//!    again on the next call.
//!
//! No backend ever closes a registered descriptor. Remove a handle with `del`
//! before closing what it refers to.
use crate::error::Result;
use crate::handle::{Events, Handle};

/// Initial event storage of a poller built with `new()`.
pub const DEFAULT_CAPACITY: usize = 16;

pub trait AsPoller {
    /// Register `events` for `handle`, keeping any direction already there.
    fn add(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()>;

    /// Drop `events` from `handle`. Dropping the last direction removes the
    /// handle from the backend altogether.
    fn del(&mut self, handle: &mut Handle, events: Events, data: usize) -> Result<()>;

    /// Wait up to `timeout_ms` milliseconds, forever if negative, and return
    /// how many results are ready.
    fn wait(&mut self, timeout_ms: i32) -> Result<usize>;

    /// User data of result `i` of the last `wait`.
    fn data(&self, i: usize) -> usize;

    /// Directions of result `i` of the last `wait`. Hang-ups and errors set
    /// both bits.
    fn event(&self, i: usize) -> Events;

    fn error(&self) -> &str;

    /// Number of registered handles.
    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the backend. Member descriptors stay open.
    fn term(self) -> Result<()>
    where
        Self: Sized;
}
