//! BDTP (Binary Data Transfer Protocol) framing.
//!
//! BDTP carves the raw transport byte stream into frames delimited by
//! `DLE STX ... DLE ETX`, with literal DLE bytes inside the payload
//! doubled. A completed frame is validated as a BST envelope (length and,
//! for Type 1 records, a zero-sum checksum) before a [`BstDatagram`] is
//! emitted.
//!
//! The parser is an incremental state machine: feed it arbitrary chunks
//! and it emits zero or more datagrams per call. Protocol errors drop the
//! frame in progress and the parser resynchronizes on the next `DLE STX`.

use bytes::{Bytes, BytesMut};

use crate::error::{ErrorKind, Result, SdkError};
use crate::protocol::bst::{id, BstDatagram};

/// Data Link Escape.
pub const DLE: u8 = 0x10;
/// Start of Text.
pub const STX: u8 = 0x02;
/// End of Text.
pub const ETX: u8 = 0x03;

/// Maximum unescaped frame payload. Large enough for the biggest Type 2
/// record (1785 data bytes plus headers); anything longer is dropped to
/// keep an unterminated frame from growing without bound.
pub const MAX_FRAME_SIZE: usize = 2048;

/// Parser state. `Idle` is the initial state and the state re-entered
/// after every completed or dropped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Scanning for a frame start.
    Idle,
    /// Saw DLE outside a frame; STX starts a frame.
    GotDle,
    /// Inside a frame, accumulating payload bytes.
    InFrame,
    /// Saw DLE inside a frame; next byte disambiguates escape/end/abort.
    InFrameGotDle,
}

/// Incremental DLE/STX/ETX frame parser plus the encode side.
pub struct BdtpFramer {
    state: State,
    buffer: BytesMut,
    frames_received: u64,
    frames_dropped: u64,
}

impl BdtpFramer {
    /// Create a framer in the `Idle` state.
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
            frames_received: 0,
            frames_dropped: 0,
        }
    }

    /// Consume an input chunk, emitting a [`BstDatagram`] per completed
    /// valid frame and an error per protocol violation. The entire input
    /// is always consumed; the return value is the byte count.
    pub fn parse<F, E>(&mut self, data: &[u8], mut emit_frame: F, mut emit_error: E) -> usize
    where
        F: FnMut(BstDatagram),
        E: FnMut(ErrorKind, &str),
    {
        for &byte in data {
            match self.state {
                State::Idle => {
                    if byte == DLE {
                        self.state = State::GotDle;
                    }
                    // Anything else while idle is inter-frame noise.
                }

                State::GotDle => {
                    if byte == STX {
                        tracing::trace!("frame start (DLE STX)");
                        self.state = State::InFrame;
                        self.buffer.clear();
                    } else if byte == DLE {
                        // Repeated DLE outside a frame; keep waiting for STX.
                        tracing::warn!("double DLE outside frame");
                    } else {
                        tracing::warn!(byte, "invalid byte after DLE outside frame");
                        self.state = State::Idle;
                    }
                }

                State::InFrame => {
                    if byte == DLE {
                        self.state = State::InFrameGotDle;
                    } else {
                        self.push_payload_byte(byte, &mut emit_error);
                    }
                }

                State::InFrameGotDle => {
                    if byte == ETX {
                        tracing::debug!(len = self.buffer.len(), "frame complete");
                        self.complete_frame(&mut emit_frame, &mut emit_error);
                        self.state = State::Idle;
                    } else if byte == DLE {
                        // Escaped literal 0x10.
                        self.state = State::InFrame;
                        self.push_payload_byte(DLE, &mut emit_error);
                    } else if byte == STX {
                        tracing::warn!(
                            dropped = self.buffer.len(),
                            "frame aborted by new DLE STX"
                        );
                        emit_error(
                            ErrorKind::MalformedFrame,
                            "BDTP frame aborted, new frame started",
                        );
                        self.frames_dropped += 1;
                        self.buffer.clear();
                        self.state = State::InFrame;
                    } else {
                        tracing::warn!(byte, "invalid BDTP escape sequence");
                        emit_error(ErrorKind::MalformedFrame, "invalid BDTP escape sequence");
                        self.frames_dropped += 1;
                        self.buffer.clear();
                        self.state = State::Idle;
                    }
                }
            }
        }

        data.len()
    }

    /// Return to `Idle` and discard any frame in progress.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
    }

    /// Valid frames emitted so far.
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames dropped due to protocol errors.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    fn push_payload_byte<E>(&mut self, byte: u8, emit_error: &mut E)
    where
        E: FnMut(ErrorKind, &str),
    {
        if self.buffer.len() >= MAX_FRAME_SIZE {
            tracing::warn!("frame exceeds maximum size, dropping");
            emit_error(ErrorKind::MalformedFrame, "BDTP frame exceeds maximum size");
            self.frames_dropped += 1;
            self.buffer.clear();
            self.state = State::Idle;
            return;
        }
        self.buffer.extend_from_slice(&[byte]);
    }

    fn complete_frame<F, E>(&mut self, emit_frame: &mut F, emit_error: &mut E)
    where
        F: FnMut(BstDatagram),
        E: FnMut(ErrorKind, &str),
    {
        if self.buffer.is_empty() {
            return;
        }

        match parse_bst_envelope(&self.buffer) {
            Ok(datagram) => {
                self.frames_received += 1;
                emit_frame(datagram);
            }
            Err(e) => {
                self.frames_dropped += 1;
                emit_error(ErrorKind::MalformedFrame, &e.to_string());
            }
        }
        self.buffer.clear();
    }

    /// Mod-256 sum of `data`. The encoder appends the two's complement so
    /// the protected region sums to zero.
    pub fn checksum(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
    }

    /// Wrap an already-checksummed BST payload with DLE/STX/ETX framing,
    /// doubling literal DLE bytes.
    pub fn encode_payload(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 4 + payload.len() / 16);
        out.push(DLE);
        out.push(STX);
        for &byte in payload {
            if byte == DLE {
                out.push(DLE);
            }
            out.push(byte);
        }
        out.push(DLE);
        out.push(ETX);
        out
    }

    /// Build a Type 1 envelope (`id, store_len, body, checksum`) for the
    /// datagram and wrap it with BDTP framing. The body must fit the
    /// 8-bit store length.
    pub fn encode_bst_datagram(datagram: &BstDatagram) -> Result<Vec<u8>> {
        if datagram.body.len() > u8::MAX as usize {
            return Err(SdkError::InvalidArgument(
                "BST body exceeds Type 1 store length".into(),
            ));
        }

        let mut payload = Vec::with_capacity(datagram.body.len() + 3);
        payload.push(datagram.id);
        payload.push(datagram.body.len() as u8);
        payload.extend_from_slice(&datagram.body);
        payload.push(Self::checksum(&payload).wrapping_neg());

        Ok(Self::encode_payload(&payload))
    }
}

impl Default for BdtpFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a completed frame buffer as a BST envelope.
///
/// Type 1: `<id> <store_len> <body> <checksum>` where all four parts sum
/// to zero mod 256. Type 2 (ids 0xD0..0xDF): `<id> <total_len LE> <body>`
/// where the total length covers the whole envelope; no checksum.
fn parse_bst_envelope(frame: &[u8]) -> Result<BstDatagram> {
    if frame.len() < 3 {
        return Err(SdkError::MalformedFrame(
            "BST frame too short (minimum 3 bytes)".into(),
        ));
    }

    let bst_id = frame[0];

    if id::is_type2(bst_id) {
        let total_len = u16::from_le_bytes([frame[1], frame[2]]);
        if frame.len() != total_len as usize {
            return Err(SdkError::MalformedFrame(format!(
                "BST Type 2 length mismatch: header says {total_len}, frame has {}",
                frame.len()
            )));
        }
        return Ok(BstDatagram {
            id: bst_id,
            length: total_len,
            body: Bytes::copy_from_slice(&frame[3..]),
        });
    }

    let store_len = frame[1];
    let expected = 2 + store_len as usize + 1;
    if frame.len() != expected {
        return Err(SdkError::MalformedFrame(format!(
            "BST frame length mismatch: expected {expected} bytes, got {}",
            frame.len()
        )));
    }

    let sum = BdtpFramer::checksum(frame);
    if sum != 0 {
        return Err(SdkError::MalformedFrame(format!(
            "BST checksum mismatch: frame sums to 0x{sum:02X}"
        )));
    }

    Ok(BstDatagram {
        id: bst_id,
        length: u16::from(store_len),
        body: Bytes::copy_from_slice(&frame[2..2 + store_len as usize]),
    })
}
