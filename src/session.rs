//! Session - lifecycle, receive loop, and the user-facing API.
//!
//! A [`Session`] owns an opened transport and drives a dedicated receive
//! task: it keeps exactly one receive in flight, feeds every chunk to the
//! BDTP framer, routes decoded datagrams to the BST codec or the BEM
//! correlator, and fans typed events out to the user callbacks. A timeout
//! sweep runs after every chunk and every few milliseconds while idle.
//!
//! Callbacks fire synchronously on the receive task (events, decode
//! errors, correlated completions) or on whichever task swept a timeout;
//! they must not call [`Session::close`], which joins the receive task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::SerialConfig;
use crate::error::{ErrorKind, Result, SdkError};
use crate::events::{
    DeviceStatusEvent, ErrorCallback, EventCallback, MessagePayload, ParsedMessageEvent, SdkEvent,
};
use crate::protocol::bdtp::BdtpFramer;
use crate::protocol::bem::{command, BemCommand, BemCompletion, BemEngine, OperatingMode};
use crate::protocol::bst::{self, id, BstDatagram};
use crate::protocol::system_status;
use crate::transport::{SerialTransport, Transport};

/// Timeout-sweep cadence while the receive loop is idle.
const SWEEP_INTERVAL: Duration = Duration::from_millis(5);

struct SessionInner<T: Transport> {
    transport: T,
    bem: BemEngine,
    on_event: EventCallback,
    on_error: ErrorCallback,
    running: AtomicBool,
    frames_received: AtomicU64,
    bem_responses_received: AtomicU64,
}

/// A running session over an opened transport.
///
/// Construction starts the receive loop immediately; [`Session::close`]
/// stops it, cancels pending BEM requests, and closes the transport.
pub struct Session<T: Transport> {
    inner: Arc<SessionInner<T>>,
    receive_task: StdMutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Session<T> {
    /// Take ownership of an opened transport and start receiving.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(transport: T, on_event: EventCallback, on_error: ErrorCallback) -> Self {
        let inner = Arc::new(SessionInner {
            transport,
            bem: BemEngine::new(),
            on_event,
            on_error,
            running: AtomicBool::new(true),
            frames_received: AtomicU64::new(0),
            bem_responses_received: AtomicU64::new(0),
        });

        let receive_task = tokio::spawn(receive_loop(inner.clone()));

        Self {
            inner,
            receive_task: StdMutex::new(Some(receive_task)),
        }
    }

    /// True while the receive loop runs and the transport is open.
    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && self.inner.transport.is_open()
    }

    /// Stop the session: signal the receive loop, close the transport,
    /// join the loop, and cancel all pending BEM requests. Idempotent.
    ///
    /// Must not be called from a session callback.
    pub async fn close(&self) {
        let was_running = self.inner.running.swap(false, Ordering::AcqRel);
        self.inner.transport.close();

        let task = self.receive_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if was_running {
            self.inner.bem.clear_pending_requests();
            tracing::info!("session closed");
        }
    }

    /// Send a payload through the named protocol layer.
    ///
    /// `"bdtp"` and `"bst"` wrap the payload with DLE framing (the payload
    /// must already carry its BST envelope and checksum); any other tag
    /// sends the bytes raw.
    pub async fn send(&self, protocol: &str, payload: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(SdkError::NotConnected);
        }

        match protocol {
            "bdtp" | "bst" => {
                let framed = BdtpFramer::encode_payload(payload);
                self.inner.transport.send(&framed).await
            }
            _ => self.inner.transport.send(payload).await,
        }
    }

    /// Encode and send a BEM command, registering it for response
    /// correlation before the bytes leave.
    ///
    /// Encoding failures invoke `completion` synchronously with
    /// `InvalidArgument` and register nothing. Send failures surface
    /// through the session error callback while the registered request
    /// ages out through the timeout sweep, so the completion still fires
    /// exactly once.
    pub async fn send_bem_command(
        &self,
        command: BemCommand,
        timeout: Duration,
        completion: BemCompletion,
    ) {
        let frame = match self.inner.bem.encode_command(&command) {
            Ok(frame) => frame,
            Err(e) => {
                completion(None, e.kind(), &e.to_string());
                return;
            }
        };

        let sequence_id =
            self.inner
                .bem
                .register_request(command.bem_id, command.bst_id, timeout, completion);
        tracing::debug!(
            bem_id = command.bem_id,
            sequence_id,
            "BEM command registered"
        );

        if let Err(e) = self.inner.transport.send(&frame).await {
            tracing::warn!(error = %e, "BEM command send failed");
            (self.inner.on_error)(e.kind(), &e.to_string());
        }
    }

    /// Request the device's current operating mode.
    pub async fn get_operating_mode(&self, timeout: Duration, completion: BemCompletion) {
        self.send_bem_command(BemCommand::get_operating_mode(), timeout, completion)
            .await;
    }

    /// Switch the device to `mode`. The response echoes the new mode but
    /// is not verified against the request; compare
    /// `response.operating_mode()` if you need that guarantee.
    pub async fn set_operating_mode(
        &self,
        mode: OperatingMode,
        timeout: Duration,
        completion: BemCompletion,
    ) {
        self.send_bem_command(BemCommand::set_operating_mode(mode), timeout, completion)
            .await;
    }

    /// Sweep pending BEM requests for expired timeouts now.
    pub fn process_timeouts(&self) -> usize {
        self.inner.bem.process_timeouts()
    }

    /// BST frames decoded and delivered so far.
    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    /// BEM responses decoded so far (correlated or unsolicited).
    pub fn bem_responses_received(&self) -> u64 {
        self.inner.bem_responses_received.load(Ordering::Relaxed)
    }

    /// BEM requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.bem.pending_count()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.transport.close();
        if let Some(task) = self.receive_task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.bem.clear_pending_requests();
    }
}

/// Open a serial transport and start a session over it.
///
/// On failure the error callback fires with the transport error and the
/// error is returned.
pub async fn open_serial_session(
    config: &SerialConfig,
    on_event: EventCallback,
    on_error: ErrorCallback,
) -> Result<Session<SerialTransport>> {
    match SerialTransport::open(config).await {
        Ok(transport) => Ok(Session::new(transport, on_event, on_error)),
        Err(e) => {
            on_error(e.kind(), &e.to_string());
            Err(e)
        }
    }
}

/// Dedicated receive loop: one in-flight receive, framer feed, event
/// dispatch, and the idle timeout sweep.
async fn receive_loop<T: Transport>(inner: Arc<SessionInner<T>>) {
    tracing::debug!("receive loop started");
    emit_connected(&inner, true);

    let mut framer = BdtpFramer::new();
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if !inner.running.load(Ordering::Acquire) {
            break;
        }

        tokio::select! {
            chunk = inner.transport.recv() => {
                match chunk {
                    Ok(bytes) => {
                        tracing::trace!(len = bytes.len(), "received chunk");
                        process_chunk(&inner, &mut framer, &bytes);
                        inner.bem.process_timeouts();
                    }
                    Err(e) => {
                        match e.kind() {
                            ErrorKind::Canceled => {}
                            kind => {
                                (inner.on_error)(kind, &e.to_string());
                            }
                        }
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                inner.bem.process_timeouts();
            }
        }
    }

    inner.running.store(false, Ordering::Release);
    inner.bem.clear_pending_requests();
    emit_connected(&inner, false);
    tracing::debug!("receive loop exiting");
}

fn emit_connected<T: Transport>(inner: &SessionInner<T>, connected: bool) {
    (inner.on_event)(SdkEvent::DeviceStatus(DeviceStatusEvent {
        key: "connected".into(),
        value: connected.to_string(),
    }));
}

fn process_chunk<T: Transport>(inner: &Arc<SessionInner<T>>, framer: &mut BdtpFramer, bytes: &[u8]) {
    framer.parse(
        bytes,
        |datagram| handle_datagram(inner, datagram),
        |kind, message| {
            tracing::warn!(message, "BDTP error");
            (inner.on_error)(kind, message);
        },
    );
}

fn handle_datagram<T: Transport>(inner: &Arc<SessionInner<T>>, datagram: BstDatagram) {
    if id::is_bem_response(datagram.id) {
        match inner.bem.decode_response(&datagram) {
            Ok(response) => handle_bem_response(inner, response),
            Err(e) => (inner.on_error)(ErrorKind::MalformedFrame, &e.to_string()),
        }
        return;
    }

    match bst::decode_datagram(&datagram) {
        Ok(frame) => {
            inner.frames_received.fetch_add(1, Ordering::Relaxed);
            (inner.on_event)(SdkEvent::ParsedMessage(ParsedMessageEvent {
                protocol: "bst",
                message_type: frame.message_name().to_string(),
                payload: MessagePayload::Bst(frame),
            }));
        }
        Err(e) => (inner.on_error)(ErrorKind::MalformedFrame, &e.to_string()),
    }
}

fn handle_bem_response<T: Transport>(
    inner: &Arc<SessionInner<T>>,
    response: crate::protocol::bem::BemResponse,
) {
    inner.bem_responses_received.fetch_add(1, Ordering::Relaxed);

    if inner.bem.correlate_response(&response) {
        return;
    }

    // Unsolicited: surface as a typed event.
    let message_type = format!("BEM_Response_{:X}", response.bem_id);
    let status = (response.bem_id == command::SYSTEM_STATUS)
        .then(|| system_status::decode(&response.data).ok())
        .flatten();

    (inner.on_event)(SdkEvent::ParsedMessage(ParsedMessageEvent {
        protocol: "bem",
        message_type,
        payload: MessagePayload::Bem(response),
    }));

    // A system status report carrying the mode also surfaces it as a
    // device status pair.
    if let Some(mode) = status.and_then(|s| s.operating_mode) {
        (inner.on_event)(SdkEvent::DeviceStatus(DeviceStatusEvent {
            key: "operating_mode".into(),
            value: mode.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn null_callbacks() -> (EventCallback, ErrorCallback) {
        (Arc::new(|_| {}), Arc::new(|_, _| {}))
    }

    #[tokio::test]
    async fn test_session_connects_and_closes_idempotently() {
        let (on_event, on_error) = null_callbacks();
        let session = Session::new(LoopbackTransport::open_with_defaults(), on_event, on_error);

        assert!(session.is_connected());
        session.close().await;
        assert!(!session.is_connected());
        session.close().await;
    }

    #[tokio::test]
    async fn test_send_refused_when_closed() {
        let (on_event, on_error) = null_callbacks();
        let session = Session::new(LoopbackTransport::open_with_defaults(), on_event, on_error);
        session.close().await;

        let err = session.send("bst", &[0x93]).await.unwrap_err();
        assert!(matches!(err, SdkError::NotConnected));
    }

    #[tokio::test]
    async fn test_invalid_bem_command_completes_synchronously() {
        let (on_event, on_error) = null_callbacks();
        let session = Session::new(LoopbackTransport::open_with_defaults(), on_event, on_error);

        let (tx, rx) = std::sync::mpsc::channel();
        let bad = BemCommand {
            bst_id: 0x93, // not a BEM command id
            bem_id: 0x11,
            data: Vec::new(),
        };
        session
            .send_bem_command(
                bad,
                Duration::from_secs(1),
                Box::new(move |resp, kind, _| {
                    assert!(resp.is_none());
                    tx.send(kind).unwrap();
                }),
            )
            .await;

        assert_eq!(rx.recv().unwrap(), ErrorKind::InvalidArgument);
        assert_eq!(session.pending_requests(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_cancels_pending_requests() {
        let (on_event, on_error) = null_callbacks();
        let transport = LoopbackTransport::open_with_defaults();
        transport.set_loopback_enabled(false);
        let session = Session::new(transport, on_event, on_error);

        let (tx, rx) = std::sync::mpsc::channel();
        session
            .get_operating_mode(
                Duration::from_secs(60),
                Box::new(move |resp, kind, _| {
                    assert!(resp.is_none());
                    tx.send(kind).unwrap();
                }),
            )
            .await;
        assert_eq!(session.pending_requests(), 1);

        session.close().await;
        assert_eq!(rx.recv().unwrap(), ErrorKind::Canceled);
        assert_eq!(session.pending_requests(), 0);
    }
}
