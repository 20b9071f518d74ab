//! BEM (Binary Encoded Message) command/response protocol.
//!
//! BEM messages ride inside BST A-series records: commands go out as
//! A1/A4/A6/A8, responses come back as A0/A2/A3/A5. The [`BemEngine`]
//! encodes commands, decodes responses, and correlates responses to
//! outstanding requests under per-request timeouts. Responses with no
//! matching request are unsolicited and surface as events.
//!
//! Correlation is keyed on `(response_bst_id, bem_id)` alone. Sequence ids
//! are allocated and recorded for diagnostics but are not part of the key:
//! devices may reuse them, so the id pair is the contract. Two outstanding
//! identical commands therefore collide; the table is last-writer-wins and
//! the displaced request is canceled (see `register_request`). A device
//! discriminator can widen the key in a future revision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{ErrorKind, Result, SdkError};
use crate::protocol::bdtp::BdtpFramer;
use crate::protocol::bst::{id, BstDatagram};

/// BEM command ids of interest.
pub mod command {
    /// Get (empty payload) or set (2-byte LE mode) the operating mode.
    pub const GET_SET_OPERATING_MODE: u8 = 0x11;
    /// Ids at or above this value are unsolicited status messages.
    pub const UNSOLICITED_BASE: u8 = 0xF0;
    /// Periodic system status report.
    pub const SYSTEM_STATUS: u8 = 0xF2;

    /// True when the BEM id denotes an unsolicited status message.
    #[inline]
    pub fn is_unsolicited(bem_id: u8) -> bool {
        bem_id >= UNSOLICITED_BASE
    }
}

/// Maximum BEM command payload: 255-byte store minus the BEM id, bounded
/// further so the checksum always fits the Type 1 envelope.
pub const MAX_COMMAND_PAYLOAD: usize = 252;

/// Fixed BEM response header length (bytes before the payload).
const RESPONSE_HEADER_LEN: usize = 12;

/// Device operating mode, a 16-bit value with a sparse named space.
///
/// Standard modes sit below 253, `NORMAL` is the generic single-mode
/// device state, 40000..=40255 are predefined instrument modes, and
/// 50000..=59999 are user-configured modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatingMode(pub u16);

impl OperatingMode {
    /// Mode information lost or device is new.
    pub const UNDEFINED: Self = Self(0);
    /// NGT: normal Rx and Tx transfers over BST, enable lists active.
    pub const NGT_TRANSFER_NORMAL: Self = Self(1);
    /// NGT: receive-all transfers, Rx enable list inactive.
    pub const NGT_TRANSFER_RX_ALL: Self = Self(2);
    /// Raw CAN transfers, no NMEA 2000 processing.
    pub const NGT_TRANSFER_RAW: Self = Self(3);
    /// NGW: NMEA 2000 to NMEA 0183 conversion.
    pub const NG_CONVERT_NORMAL: Self = Self(4);
    /// Buffer modes for buffer/combiner products.
    pub const BUFFER_1: Self = Self(16);
    pub const BUFFER_2: Self = Self(17);
    pub const BUFFER_3: Self = Self(18);
    pub const AUTOSWITCH_DIRECT: Self = Self(19);
    pub const AUTOSWITCH_SMART: Self = Self(20);
    pub const COMBINE_1: Self = Self(21);
    pub const COMBINE_2: Self = Self(22);
    pub const TEST_1: Self = Self(23);
    pub const NSI_1: Self = Self(24);
    /// Generic "normal" state for single-mode instruments.
    pub const NORMAL: Self = Self(512);
    /// First predefined instrument mode.
    pub const PREDEFINED_START: Self = Self(40_000);
    /// Last predefined instrument mode.
    pub const PREDEFINED_END: Self = Self(40_255);
    /// First user-configured mode.
    pub const USER_START: Self = Self(50_000);
    /// Last user-configured mode.
    pub const USER_END: Self = Self(59_999);
    /// No mode.
    pub const NULL: Self = Self(65_535);

    /// Decode from the 2-byte little-endian wire form.
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    /// Encode to the 2-byte little-endian wire form.
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Human-readable name for the mode.
    pub fn name(self) -> &'static str {
        match self {
            Self::UNDEFINED => "Undefined",
            Self::NGT_TRANSFER_NORMAL => "NGT Transfer Normal",
            Self::NGT_TRANSFER_RX_ALL => "NGT Transfer Rx All",
            Self::NGT_TRANSFER_RAW => "NGT Transfer Raw",
            Self::NG_CONVERT_NORMAL => "NG Convert Normal",
            Self::BUFFER_1 => "Buffer 1",
            Self::BUFFER_2 => "Buffer 2",
            Self::BUFFER_3 => "Buffer 3",
            Self::AUTOSWITCH_DIRECT => "Autoswitch Direct",
            Self::AUTOSWITCH_SMART => "Autoswitch Smart",
            Self::COMBINE_1 => "Combine 1",
            Self::COMBINE_2 => "Combine 2",
            Self::TEST_1 => "Test 1",
            Self::NSI_1 => "NSI 1",
            Self::NORMAL => "Normal",
            Self::NULL => "Null",
            Self(40_000..=40_255) => "Predefined",
            Self(50_000..=59_999) => "User",
            _ => "Unknown",
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Known ARL model ids (subset).
pub fn model_name(model_id: u16) -> &'static str {
    match model_id {
        0x000E => "NGT-1",
        0x000F => "NGT-1 USB",
        0x0010 => "NGW-1",
        0x0011 => "EMU-1",
        0x0020 => "PRO-NDC-1-E2K",
        0x0030 => "WGX",
        _ => "Unknown model",
    }
}

/// BEM command to be sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BemCommand {
    /// BST command id (A1, A4, A6, A8).
    pub bst_id: u8,
    /// BEM command id.
    pub bem_id: u8,
    /// Command payload.
    pub data: Vec<u8>,
}

impl BemCommand {
    /// Request the current operating mode (A1 / 0x11, empty payload).
    pub fn get_operating_mode() -> Self {
        Self {
            bst_id: id::BEM_COMMAND_A1,
            bem_id: command::GET_SET_OPERATING_MODE,
            data: Vec::new(),
        }
    }

    /// Switch the device to `mode` (A1 / 0x11, 2-byte LE payload).
    pub fn set_operating_mode(mode: OperatingMode) -> Self {
        Self {
            bst_id: id::BEM_COMMAND_A1,
            bem_id: command::GET_SET_OPERATING_MODE,
            data: mode.to_le_bytes().to_vec(),
        }
    }
}

/// Decoded BEM response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BemResponse {
    /// BST response id (A0, A2, A3, A5).
    pub bst_id: u8,
    /// BEM id this responds to (or reports, for unsolicited messages).
    pub bem_id: u8,
    /// Device-assigned sequence id (diagnostic only).
    pub sequence_id: u8,
    /// ARL model id.
    pub model_id: u16,
    /// Device serial number.
    pub serial_number: u32,
    /// ARL error code; 0 is success.
    pub error_code: u32,
    /// Response payload after the fixed header.
    pub data: Bytes,
}

impl BemResponse {
    /// Model name for the reported model id.
    pub fn model_name(&self) -> &'static str {
        model_name(self.model_id)
    }

    /// Operating mode carried in the first two payload bytes, when present.
    pub fn operating_mode(&self) -> Option<OperatingMode> {
        let bytes = self.data.get(..2)?;
        Some(OperatingMode::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Completion for a BEM request.
///
/// Fires exactly once per registered request: with the correlated response
/// and `Ok` (or `UnsupportedOperation` on a device error), or with no
/// response and `Timeout`/`Canceled`. May run on the session receive task
/// or inside a timeout sweep; treat invocations as potentially concurrent
/// with your other callbacks.
pub type BemCompletion = Box<dyn FnOnce(Option<BemResponse>, ErrorKind, &str) + Send>;

struct PendingRequest {
    sequence_id: u8,
    bem_id: u8,
    sent_at: Instant,
    timeout: Duration,
    completion: BemCompletion,
}

/// BEM request/response engine: command encode, response decode, and the
/// pending-request correlation table.
///
/// The table is shared between the receive task and any caller of the send
/// APIs; a short mutex guards it and completions always fire outside the
/// lock so a completion may safely re-enter the engine.
pub struct BemEngine {
    pending: Mutex<HashMap<u32, PendingRequest>>,
    sequence: AtomicU8,
    commands_sent: AtomicU64,
    responses_correlated: AtomicU64,
    timeout_count: AtomicU64,
}

impl BemEngine {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU8::new(0),
            commands_sent: AtomicU64::new(0),
            responses_correlated: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
        }
    }

    /// Encode a command into a complete BDTP frame ready for the wire.
    pub fn encode_command(&self, cmd: &BemCommand) -> Result<Vec<u8>> {
        if !id::is_bem_command(cmd.bst_id) {
            return Err(SdkError::InvalidArgument(format!(
                "BST id 0x{:02X} is not a BEM command id",
                cmd.bst_id
            )));
        }
        if cmd.data.len() > MAX_COMMAND_PAYLOAD {
            return Err(SdkError::InvalidArgument(
                "BEM command payload too large".into(),
            ));
        }

        let store_len = 1 + cmd.data.len() as u8;
        let mut envelope = Vec::with_capacity(3 + cmd.data.len() + 1);
        envelope.push(cmd.bst_id);
        envelope.push(store_len);
        envelope.push(cmd.bem_id);
        envelope.extend_from_slice(&cmd.data);
        envelope.push(BdtpFramer::checksum(&envelope).wrapping_neg());

        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        Ok(BdtpFramer::encode_payload(&envelope))
    }

    /// Decode a response datagram. The body carries a 12-byte fixed header
    /// (`bem_id seq model(2 LE) serial(4 LE) error(4 LE)`) then payload.
    pub fn decode_response(&self, datagram: &BstDatagram) -> Result<BemResponse> {
        if !id::is_bem_response(datagram.id) {
            return Err(SdkError::MalformedFrame(format!(
                "BST id 0x{:02X} is not a BEM response id",
                datagram.id
            )));
        }

        let body = &datagram.body;
        if body.len() < RESPONSE_HEADER_LEN {
            return Err(SdkError::MalformedFrame("BEM response too short".into()));
        }

        Ok(BemResponse {
            bst_id: datagram.id,
            bem_id: body[0],
            sequence_id: body[1],
            model_id: u16::from_le_bytes([body[2], body[3]]),
            serial_number: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
            error_code: u32::from_le_bytes([body[8], body[9], body[10], body[11]]),
            data: datagram.body.slice(RESPONSE_HEADER_LEN..),
        })
    }

    /// Register a pending request before its command frame is sent.
    ///
    /// The entry is keyed by the response id the command's BST id maps to
    /// plus the BEM id. Returns the allocated sequence id. If an entry with
    /// the same key is already outstanding it is displaced and its
    /// completion fires with `Canceled`, keeping the exactly-once contract.
    pub fn register_request(
        &self,
        bem_id: u8,
        bst_id: u8,
        timeout: Duration,
        completion: BemCompletion,
    ) -> u8 {
        let sequence_id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = correlation_key(response_id_for(bst_id), bem_id);

        let displaced = {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                key,
                PendingRequest {
                    sequence_id,
                    bem_id,
                    sent_at: Instant::now(),
                    timeout,
                    completion,
                },
            )
        };

        if let Some(old) = displaced {
            tracing::warn!(
                bem_id = old.bem_id,
                sequence_id = old.sequence_id,
                "pending request displaced by identical command"
            );
            (old.completion)(None, ErrorKind::Canceled, "request displaced by a newer request");
        }

        sequence_id
    }

    /// Correlate a decoded response to a pending request.
    ///
    /// On a hit the entry is removed and its completion fires (outside the
    /// table lock); returns true. On a miss the table is untouched and the
    /// caller surfaces the response as an unsolicited event.
    pub fn correlate_response(&self, response: &BemResponse) -> bool {
        let key = correlation_key(response.bst_id, response.bem_id);

        let request = {
            let mut pending = self.pending.lock().unwrap();
            pending.remove(&key)
        };

        let Some(request) = request else {
            return false;
        };

        self.responses_correlated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            bem_id = response.bem_id,
            sequence_id = request.sequence_id,
            "correlated BEM response"
        );

        if response.error_code != 0 {
            let msg = format!("device returned error {}", response.error_code);
            (request.completion)(
                Some(response.clone()),
                ErrorKind::UnsupportedOperation,
                &msg,
            );
        } else {
            (request.completion)(Some(response.clone()), ErrorKind::Ok, "");
        }
        true
    }

    /// Sweep the table, firing `Timeout` for every entry whose deadline
    /// passed. Returns the number swept.
    pub fn process_timeouts(&self) -> usize {
        let now = Instant::now();

        let expired: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap();
            let keys: Vec<u32> = pending
                .iter()
                .filter(|(_, req)| now.duration_since(req.sent_at) >= req.timeout)
                .map(|(&key, _)| key)
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove(&key))
                .collect()
        };

        let count = expired.len();
        self.timeout_count.fetch_add(count as u64, Ordering::Relaxed);

        for request in expired {
            tracing::debug!(
                bem_id = request.bem_id,
                sequence_id = request.sequence_id,
                "BEM request timed out"
            );
            (request.completion)(None, ErrorKind::Timeout, "request timed out");
        }
        count
    }

    /// Cancel every outstanding request (session shutdown).
    pub fn clear_pending_requests(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, req)| req).collect()
        };

        for request in drained {
            (request.completion)(None, ErrorKind::Canceled, "request canceled");
        }
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Commands encoded so far.
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent.load(Ordering::Relaxed)
    }

    /// Responses that matched a pending request.
    pub fn responses_correlated(&self) -> u64 {
        self.responses_correlated.load(Ordering::Relaxed)
    }

    /// Requests that expired without a response.
    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Relaxed)
    }
}

impl Default for BemEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Response BST id a command BST id correlates against.
pub fn response_id_for(command_bst_id: u8) -> u8 {
    match command_bst_id {
        id::BEM_COMMAND_A1 => id::BEM_RESPONSE_A0,
        id::BEM_COMMAND_A4 => id::BEM_RESPONSE_A2,
        id::BEM_COMMAND_A6 => id::BEM_RESPONSE_A3,
        id::BEM_COMMAND_A8 => id::BEM_RESPONSE_A5,
        _ => id::BEM_RESPONSE_A0,
    }
}

/// Correlation key. The upper half of the u32 is spare room for a device
/// discriminator if multi-device channels ever need disambiguation.
fn correlation_key(response_bst_id: u8, bem_id: u8) -> u32 {
    (u32::from(response_bst_id) << 8) | u32::from(bem_id)
}
