//! Transport abstraction - the byte-stream seam beneath the session.
//!
//! A [`Transport`] is an opened, bidirectional byte channel. The session
//! owns it uniquely: only the receive task calls [`Transport::recv`]
//! (at most one receive is in flight per session), only the send path
//! calls [`Transport::send`], and `close` may be called from anywhere and
//! must be idempotent.
//!
//! Implementations may be byte-oriented (serial) or message-oriented
//! (loopback); the session treats every received chunk as "some bytes"
//! and feeds them to the BDTP framer, so boundaries are free to differ.

use std::future::Future;

use bytes::Bytes;

use crate::config::TransportKind;
use crate::error::Result;

mod loopback;
mod serial;

pub use loopback::LoopbackTransport;
pub use serial::SerialTransport;

/// Async byte-stream transport consumed by the session.
pub trait Transport: Send + Sync + 'static {
    /// Submit a send. Resolves with the byte count written; large writes
    /// may be split and a full queue surfaces as `RateLimited`.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Receive the next available chunk. Resolves when data arrives or the
    /// transport closes (`TransportClosed`, or `Canceled` for a graceful
    /// local close).
    fn recv(&self) -> impl Future<Output = Result<Bytes>> + Send;

    /// Close the transport. Synchronous and idempotent; wakes and fails
    /// all outstanding receives.
    fn close(&self);

    /// True while the transport is open for I/O.
    fn is_open(&self) -> bool;

    /// Transport kind tag.
    fn kind(&self) -> TransportKind;
}
