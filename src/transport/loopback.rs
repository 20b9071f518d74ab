//! In-memory loopback transport for protocol testing.
//!
//! Sent frames are looped into the receive queue as complete messages
//! (toggleable), and test code can inject "received" bytes directly.
//! Message boundaries are preserved: one send or injection becomes one
//! [`Transport::recv`] completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::config::TransportKind;
use crate::error::{Result, SdkError};
use crate::ring::MessageRing;
use crate::transport::Transport;

/// Default receive-queue capacity in messages.
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 16;

/// In-memory transport that loops sends back to the receive side.
pub struct LoopbackTransport {
    receive_queue: MessageRing,
    data_available: Notify,
    open: AtomicBool,
    loopback_enabled: AtomicBool,
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
}

impl LoopbackTransport {
    /// Create a closed transport with the given receive-queue capacity.
    pub fn new(max_pending_messages: usize) -> Self {
        Self {
            receive_queue: MessageRing::new(max_pending_messages),
            data_available: Notify::new(),
            open: AtomicBool::new(false),
            loopback_enabled: AtomicBool::new(true),
            bytes_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Create an already-open transport with the default capacity.
    pub fn open_with_defaults() -> Self {
        let transport = Self::new(DEFAULT_MAX_PENDING_MESSAGES);
        transport.open.store(true, Ordering::Release);
        transport
    }

    /// Open the transport. Fails with `AlreadyConnected` when open.
    pub fn open(&self) -> Result<()> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(SdkError::AlreadyConnected);
        }
        self.receive_queue.clear();
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Inject bytes on the receive side, as if the device had sent them.
    /// Returns the byte count accepted: 0 when closed or the queue is full.
    pub fn inject(&self, data: &[u8]) -> usize {
        if !self.is_open() {
            return 0;
        }
        if !self.receive_queue.enqueue(Bytes::copy_from_slice(data)) {
            return 0;
        }
        self.data_available.notify_one();
        data.len()
    }

    /// Enable or disable looping sends into the receive queue.
    pub fn set_loopback_enabled(&self, enabled: bool) {
        self.loopback_enabled.store(enabled, Ordering::Release);
    }

    /// True when sends loop back into the receive queue.
    pub fn is_loopback_enabled(&self) -> bool {
        self.loopback_enabled.load(Ordering::Acquire)
    }

    /// Total bytes accepted by `send` so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Messages waiting on the receive side.
    pub fn messages_available(&self) -> usize {
        self.receive_queue.len()
    }

    /// Bytes waiting on the receive side.
    pub fn bytes_available(&self) -> usize {
        self.receive_queue.total_bytes()
    }

    /// Drop everything waiting on the receive side.
    pub fn clear_buffers(&self) {
        self.receive_queue.clear();
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(SdkError::NotConnected);
        }

        if self.is_loopback_enabled() {
            if !self.receive_queue.enqueue(Bytes::copy_from_slice(data)) {
                return Err(SdkError::RateLimited);
            }
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
            self.data_available.notify_one();
        }

        self.bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data.len())
    }

    async fn recv(&self) -> Result<Bytes> {
        loop {
            // Arm the notification before checking state so a concurrent
            // enqueue or close between the check and the await is not lost.
            let notified = self.data_available.notified();

            if !self.is_open() {
                return Err(SdkError::Canceled);
            }
            if let Some(message) = self.receive_queue.dequeue() {
                return Ok(message);
            }

            notified.await;
        }
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.receive_queue.clear();
        self.data_available.notify_waiters();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_open_twice_fails() {
        let transport = LoopbackTransport::new(4);
        assert!(transport.open().is_ok());
        assert!(matches!(
            transport.open(),
            Err(SdkError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_loops_back_to_recv() {
        let transport = LoopbackTransport::open_with_defaults();

        let written = transport.send(b"hello device").await.unwrap();
        assert_eq!(written, 12);
        assert_eq!(transport.bytes_sent(), 12);

        let received = transport.recv().await.unwrap();
        assert_eq!(&received[..], b"hello device");
    }

    #[tokio::test]
    async fn test_loopback_disabled_drops_send_from_recv() {
        let transport = LoopbackTransport::open_with_defaults();
        transport.set_loopback_enabled(false);

        transport.send(b"outbound only").await.unwrap();
        assert_eq!(transport.messages_available(), 0);
        // Send still reports success and counts bytes.
        assert_eq!(transport.bytes_sent(), 13);
    }

    #[tokio::test]
    async fn test_inject_reaches_recv_with_boundaries() {
        let transport = LoopbackTransport::open_with_defaults();

        assert_eq!(transport.inject(&[1, 2, 3]), 3);
        assert_eq!(transport.inject(&[4, 5]), 2);
        assert_eq!(transport.messages_available(), 2);
        assert_eq!(transport.bytes_available(), 5);

        assert_eq!(&transport.recv().await.unwrap()[..], &[1, 2, 3]);
        assert_eq!(&transport.recv().await.unwrap()[..], &[4, 5]);
    }

    #[tokio::test]
    async fn test_send_rate_limited_when_queue_full() {
        let transport = LoopbackTransport::new(2);
        transport.open().unwrap();

        transport.send(b"a").await.unwrap();
        transport.send(b"b").await.unwrap();
        let err = transport.send(b"c").await.unwrap_err();
        assert!(matches!(err, SdkError::RateLimited));
    }

    #[tokio::test]
    async fn test_inject_refused_when_closed_or_full() {
        let transport = LoopbackTransport::new(1);
        assert_eq!(transport.inject(b"closed"), 0);

        transport.open().unwrap();
        assert_eq!(transport.inject(b"x"), 1);
        assert_eq!(transport.inject(b"overflow"), 0);
    }

    #[tokio::test]
    async fn test_recv_waits_for_data() {
        let transport = Arc::new(LoopbackTransport::open_with_defaults());
        let injector = transport.clone();

        let receiver = tokio::spawn(async move { transport.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        injector.inject(b"late data");

        let received = receiver.await.unwrap().unwrap();
        assert_eq!(&received[..], b"late data");
    }

    #[tokio::test]
    async fn test_close_cancels_pending_recv() {
        let transport = Arc::new(LoopbackTransport::open_with_defaults());
        let closer = transport.clone();

        let receiver = tokio::spawn(async move { transport.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        closer.close();

        let result = receiver.await.unwrap();
        assert!(matches!(result, Err(SdkError::Canceled)));
        assert!(!closer.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = LoopbackTransport::open_with_defaults();
        transport.close();
        transport.close();
        assert!(!transport.is_open());

        let err = transport.send(b"x").await.unwrap_err();
        assert!(matches!(err, SdkError::NotConnected));
    }

    #[test]
    fn test_kind_tag() {
        let transport = LoopbackTransport::new(1);
        assert_eq!(transport.kind(), TransportKind::Loopback);
    }
}
