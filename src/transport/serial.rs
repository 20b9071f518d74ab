//! Serial port transport.
//!
//! A dedicated reader task pumps the port into a byte ring sized by
//! `read_buffer_size`; [`Transport::recv`] drains the ring, waking on new
//! data and at least every `read_timeout_ms` while idle. Writes go
//! straight to the port under a short async lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::{Parity, SerialConfig, TransportKind};
use crate::error::{Result, SdkError};
use crate::ring::ByteRing;
use crate::transport::Transport;

struct Shared {
    ring: ByteRing,
    data_available: Notify,
    open: AtomicBool,
    closed_locally: AtomicBool,
    writer: Mutex<WriteHalf<SerialStream>>,
}

/// Serial port transport backed by `tokio-serial`.
pub struct SerialTransport {
    shared: Arc<Shared>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    read_timeout: Duration,
    chunk_size: usize,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("read_timeout", &self.read_timeout)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl SerialTransport {
    /// Open the configured port and start the reader task.
    pub async fn open(config: &SerialConfig) -> Result<Self> {
        if config.port.is_empty() {
            return Err(SdkError::InvalidArgument("serial port name is empty".into()));
        }

        let builder = tokio_serial::new(config.port.as_str(), config.baud)
            .data_bits(map_data_bits(config.data_bits)?)
            .parity(map_parity(config.parity))
            .stop_bits(map_stop_bits(config.stop_bits)?);

        let stream = builder.open_native_async().map_err(|e| {
            SdkError::TransportOpenFailed(format!("{}: {e}", config.port))
        })?;
        tracing::info!(port = %config.port, baud = config.baud, "serial port open");

        let (read_half, write_half) = tokio::io::split(stream);

        let shared = Arc::new(Shared {
            ring: ByteRing::new(config.read_buffer_size.max(64)),
            data_available: Notify::new(),
            open: AtomicBool::new(true),
            closed_locally: AtomicBool::new(false),
            writer: Mutex::new(write_half),
        });

        let reader = tokio::spawn(reader_loop(read_half, shared.clone()));

        Ok(Self {
            shared,
            reader: StdMutex::new(Some(reader)),
            read_timeout: config.read_timeout(),
            chunk_size: config.read_buffer_size.clamp(64, 4096),
        })
    }
}

impl Transport for SerialTransport {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(SdkError::NotConnected);
        }

        let mut writer = self.shared.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(data.len())
    }

    async fn recv(&self) -> Result<Bytes> {
        loop {
            let notified = self.shared.data_available.notified();

            let mut chunk = vec![0u8; self.chunk_size];
            let n = self.shared.ring.read(&mut chunk);
            if n > 0 {
                chunk.truncate(n);
                return Ok(Bytes::from(chunk));
            }

            if !self.is_open() {
                return Err(if self.shared.closed_locally.load(Ordering::Acquire) {
                    SdkError::Canceled
                } else {
                    SdkError::TransportClosed
                });
            }

            // Wake on new data, bounded by the configured poll cap.
            let _ = tokio::time::timeout(self.read_timeout, notified).await;
        }
    }

    fn close(&self) {
        if !self.shared.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.closed_locally.store(true, Ordering::Release);
        self.shared.data_available.notify_waiters();

        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
        tracing::info!("serial port closed");
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pump the port into the receive ring until the port fails or the
/// transport closes.
async fn reader_loop(mut port: ReadHalf<SerialStream>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; 4096];

    loop {
        if !shared.open.load(Ordering::Acquire) {
            break;
        }

        match port.read(&mut buf).await {
            Ok(0) => {
                tracing::warn!("serial port reported end of stream");
                break;
            }
            Ok(n) => {
                let written = shared.ring.write(&buf[..n]);
                if written < n {
                    // Consumer is not keeping up; the ring refuses the
                    // overflow rather than overwrite.
                    tracing::warn!(dropped = n - written, "serial receive ring full");
                }
                shared.data_available.notify_one();
            }
            Err(e) => {
                if shared.open.load(Ordering::Acquire) {
                    tracing::error!(error = %e, "serial read failed");
                }
                break;
            }
        }
    }

    shared.open.store(false, Ordering::Release);
    shared.data_available.notify_waiters();
}

fn map_data_bits(bits: u8) -> Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(SdkError::InvalidArgument(format!(
            "invalid data bits {other}, expected 5-8"
        ))),
    }
}

fn map_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn map_stop_bits(bits: u8) -> Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(SdkError::InvalidArgument(format!(
            "invalid stop bits {other}, expected 1 or 2"
        ))),
    }
}
