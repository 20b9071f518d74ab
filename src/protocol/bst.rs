//! BST (Binary Serial Transfer) message formats.
//!
//! BST records ride inside BDTP frames. The first payload byte identifies
//! the record type:
//!
//! - Type 1 (8-bit store length): 0x93 (N2K gateway to host), 0x94 (N2K
//!   host to gateway), 0x95 (compact CAN), 0x9D (NMEA 0183), and the BEM
//!   A-series command/response ids.
//! - Type 2 (16-bit little-endian total length): 0xD0..0xDF, of which 0xD0
//!   is the current N2K record.
//!
//! The decoder is stateless: it takes a contiguous byte view starting at
//! the id byte and produces a typed [`BstFrame`] variant. Field layouts are
//! part of the device contract and must match bit-for-bit.

use bytes::Bytes;

use crate::error::{Result, SdkError};

/// BST message id codes.
pub mod id {
    /// BST-93: NGT gateway-to-host NMEA 2000.
    pub const N2K_GATEWAY_TO_PC: u8 = 0x93;
    /// BST-94: host-to-gateway NMEA 2000 transmit.
    pub const N2K_PC_TO_GATEWAY: u8 = 0x94;
    /// BST-95: compact timestamped CAN frame.
    pub const CAN_FRAME: u8 = 0x95;
    /// BST-9D: NMEA 0183 encapsulation.
    pub const NMEA_0183: u8 = 0x9D;
    /// BST-D0: current NMEA 2000 record (Type 2).
    pub const N2K_D0: u8 = 0xD0;

    /// BEM gateway-to-host response ids.
    pub const BEM_RESPONSE_A0: u8 = 0xA0;
    pub const BEM_RESPONSE_A2: u8 = 0xA2;
    pub const BEM_RESPONSE_A3: u8 = 0xA3;
    pub const BEM_RESPONSE_A5: u8 = 0xA5;

    /// BEM host-to-gateway command ids.
    pub const BEM_COMMAND_A1: u8 = 0xA1;
    pub const BEM_COMMAND_A4: u8 = 0xA4;
    pub const BEM_COMMAND_A6: u8 = 0xA6;
    pub const BEM_COMMAND_A8: u8 = 0xA8;

    /// True for the BEM gateway-to-host response set.
    #[inline]
    pub fn is_bem_response(id: u8) -> bool {
        matches!(
            id,
            BEM_RESPONSE_A0 | BEM_RESPONSE_A2 | BEM_RESPONSE_A3 | BEM_RESPONSE_A5
        )
    }

    /// True for the BEM host-to-gateway command set.
    #[inline]
    pub fn is_bem_command(id: u8) -> bool {
        matches!(
            id,
            BEM_COMMAND_A1 | BEM_COMMAND_A4 | BEM_COMMAND_A6 | BEM_COMMAND_A8
        )
    }

    /// True for Type 2 ids (16-bit total length, no tail checksum).
    #[inline]
    pub fn is_type2(id: u8) -> bool {
        (0xD0..=0xDF).contains(&id)
    }

    /// Human-readable name for a BST id.
    pub fn name(id: u8) -> &'static str {
        match id {
            N2K_GATEWAY_TO_PC => "BST-93 (N2K Gateway-PC)",
            N2K_PC_TO_GATEWAY => "BST-94 (N2K PC-Gateway)",
            CAN_FRAME => "BST-95 (CAN Frame)",
            NMEA_0183 => "BST-9D (NMEA 0183)",
            N2K_D0 => "BST-D0 (N2K Latest)",
            _ if is_bem_response(id) => "BEM Response",
            _ if is_bem_command(id) => "BEM Command",
            _ => "Unknown BST",
        }
    }
}

/// Raw BST record as carved out of a BDTP frame.
///
/// `length` is the store length for Type 1 records and the total length
/// (inclusive of the three-byte header) for Type 2 records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BstDatagram {
    /// BST id byte.
    pub id: u8,
    /// Store length (Type 1) or total length (Type 2).
    pub length: u16,
    /// Record body, exclusive of id, length, and checksum bytes.
    pub body: Bytes,
}

/// BST-95 timestamp resolution, packed into the DPPC byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampResolution {
    /// 1 ms resolution, 65.536 s rollover.
    #[default]
    Millis1 = 0,
    /// 100 us resolution.
    Micros100 = 1,
    /// 10 us resolution.
    Micros10 = 2,
    /// 1 us resolution.
    Micros1 = 3,
}

impl TimestampResolution {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => TimestampResolution::Millis1,
            1 => TimestampResolution::Micros100,
            2 => TimestampResolution::Micros10,
            _ => TimestampResolution::Micros1,
        }
    }
}

/// Message direction relative to the NMEA 2000 bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Received from the bus.
    #[default]
    Received = 0,
    /// Transmitted to the bus.
    Transmitted = 1,
}

impl Direction {
    fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 {
            Direction::Received
        } else {
            Direction::Transmitted
        }
    }
}

/// BST-D0 message type, packed into the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum D0MessageType {
    /// Single CAN frame message.
    #[default]
    Single = 0,
    /// Fast-packet multi-frame message.
    FastPacket = 1,
    /// Multi-packet (BAM or RTS).
    MultiPacket = 2,
    /// Reserved for future expansion.
    Reserved = 3,
}

impl D0MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => D0MessageType::Single,
            1 => D0MessageType::FastPacket,
            2 => D0MessageType::MultiPacket,
            _ => D0MessageType::Reserved,
        }
    }
}

/// Decoded BST-93 frame (gateway-to-host N2K, legacy NGT format).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bst93Frame {
    /// PGN priority (0-7).
    pub priority: u8,
    /// Parameter Group Number (18-bit).
    pub pgn: u32,
    /// Source address on the bus.
    pub source: u8,
    /// Destination address (0xFF = broadcast).
    pub destination: u8,
    /// Gateway timestamp in milliseconds.
    pub timestamp_ms: u32,
    /// PGN payload.
    pub data: Bytes,
}

/// Decoded BST-94 frame (host-to-gateway N2K transmit).
///
/// The wire format carries no source address; the decoder fills 0.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bst94Frame {
    pub priority: u8,
    pub pgn: u32,
    pub source: u8,
    pub destination: u8,
    pub data: Bytes,
}

/// Decoded BST-95 frame (compact CAN packet, at most 8 data bytes).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bst95Frame {
    pub priority: u8,
    pub pgn: u32,
    pub source: u8,
    pub destination: u8,
    /// 16-bit rolling timestamp in units of `resolution`.
    pub timestamp: u16,
    pub resolution: TimestampResolution,
    pub direction: Direction,
    pub data: Bytes,
}

/// Decoded BST-D0 frame (current N2K record format).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BstD0Frame {
    pub priority: u8,
    pub pgn: u32,
    pub source: u8,
    pub destination: u8,
    /// Gateway timestamp in milliseconds.
    pub timestamp_ms: u32,
    pub message_type: D0MessageType,
    pub direction: Direction,
    /// True when the record was generated by the gateway itself.
    pub internal_source: bool,
    /// Fast-packet sequence id (0-7).
    pub fast_packet_seq: u8,
    pub data: Bytes,
}

/// Typed BST frame.
///
/// Every variant exposes the shared capability set `{bst_id, priority,
/// pgn, source, destination}`; pattern-match for variant-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BstFrame {
    Bst93(Bst93Frame),
    Bst94(Bst94Frame),
    Bst95(Bst95Frame),
    BstD0(BstD0Frame),
}

impl BstFrame {
    /// BST id byte of this variant.
    pub fn bst_id(&self) -> u8 {
        match self {
            BstFrame::Bst93(_) => id::N2K_GATEWAY_TO_PC,
            BstFrame::Bst94(_) => id::N2K_PC_TO_GATEWAY,
            BstFrame::Bst95(_) => id::CAN_FRAME,
            BstFrame::BstD0(_) => id::N2K_D0,
        }
    }

    /// PGN priority (0-7).
    pub fn priority(&self) -> u8 {
        match self {
            BstFrame::Bst93(f) => f.priority,
            BstFrame::Bst94(f) => f.priority,
            BstFrame::Bst95(f) => f.priority,
            BstFrame::BstD0(f) => f.priority,
        }
    }

    /// 18-bit Parameter Group Number.
    pub fn pgn(&self) -> u32 {
        match self {
            BstFrame::Bst93(f) => f.pgn,
            BstFrame::Bst94(f) => f.pgn,
            BstFrame::Bst95(f) => f.pgn,
            BstFrame::BstD0(f) => f.pgn,
        }
    }

    /// Source address.
    pub fn source(&self) -> u8 {
        match self {
            BstFrame::Bst93(f) => f.source,
            BstFrame::Bst94(f) => f.source,
            BstFrame::Bst95(f) => f.source,
            BstFrame::BstD0(f) => f.source,
        }
    }

    /// Destination address (0xFF = broadcast).
    pub fn destination(&self) -> u8 {
        match self {
            BstFrame::Bst93(f) => f.destination,
            BstFrame::Bst94(f) => f.destination,
            BstFrame::Bst95(f) => f.destination,
            BstFrame::BstD0(f) => f.destination,
        }
    }

    /// PGN payload bytes.
    pub fn data(&self) -> &Bytes {
        match self {
            BstFrame::Bst93(f) => &f.data,
            BstFrame::Bst94(f) => &f.data,
            BstFrame::Bst95(f) => &f.data,
            BstFrame::BstD0(f) => &f.data,
        }
    }

    /// Human-readable message name.
    pub fn message_name(&self) -> &'static str {
        id::name(self.bst_id())
    }
}

/* PGN helpers ------------------------------------------------------------ */

/// Reconstruct a PGN from PDU fields.
///
/// PDU2 (`pduf >= 240`): `PGN = (DP << 16) | (PDUF << 8) | PDUS`.
/// PDU1 (`pduf < 240`): `PGN = (DP << 16) | (PDUF << 8)`; PDUS carries the
/// destination address instead.
pub fn calculate_pgn(pduf: u8, pdus: u8, data_page: u8) -> u32 {
    let base = (u32::from(data_page & 0x03) << 16) | (u32::from(pduf) << 8);
    if pduf >= 240 {
        base | u32::from(pdus)
    } else {
        base
    }
}

/// Split a PGN into `(pduf, pdus, data_page)`.
///
/// For PDU1 PGNs the returned `pdus` is 0; the transmit encoders overwrite
/// it with the destination address.
pub fn extract_pdu_fields(pgn: u32) -> (u8, u8, u8) {
    let data_page = ((pgn >> 16) & 0x03) as u8;
    let pduf = ((pgn >> 8) & 0xFF) as u8;
    let pdus = if pduf >= 240 { (pgn & 0xFF) as u8 } else { 0 };
    (pduf, pdus, data_page)
}

/* Decoder ---------------------------------------------------------------- */

/* BST-93 body offsets */
const BST93_OFF_TIME: usize = 6;
const BST93_OFF_DATA_LEN: usize = 10;
const BST93_OFF_DATA: usize = 11;

/* BST-94 body offsets */
const BST94_OFF_DATA_LEN: usize = 5;
const BST94_OFF_DATA: usize = 6;

/* BST-95 body offsets */
const BST95_HEADER_LEN: usize = 6;
const BST95_MAX_DATA: usize = 8;

/* BST-D0 body offsets */
const BSTD0_OFF_TIME: usize = 6;
const BSTD0_HEADER_LEN: usize = 10;

/// BST-D0 maximum payload (fast-packet limit).
pub const D0_MAX_DATA: usize = 1785;

/// Decode a BST record from a contiguous view starting at the id byte.
///
/// BEM A-series responses are rejected here; they carry a different body
/// layout and decode through the BEM engine.
pub fn decode(data: &[u8]) -> Result<BstFrame> {
    let bst_id = *data
        .first()
        .ok_or_else(|| SdkError::MalformedFrame("empty BST data".into()))?;

    match bst_id {
        id::N2K_GATEWAY_TO_PC => decode_93(type1_body(data)?).map(BstFrame::Bst93),
        id::N2K_PC_TO_GATEWAY => decode_94(type1_body(data)?).map(BstFrame::Bst94),
        id::CAN_FRAME => decode_95(type1_body(data)?).map(BstFrame::Bst95),
        id::N2K_D0 => decode_d0(type2_body(data)?).map(BstFrame::BstD0),
        _ if id::is_bem_response(bst_id) => Err(SdkError::ProtocolMismatch(
            format!("BST 0x{bst_id:02X} is a BEM response, decode via the BEM engine"),
        )),
        _ => Err(SdkError::MalformedFrame(format!(
            "unsupported BST id 0x{bst_id:02X}"
        ))),
    }
}

/// Decode a framer-validated datagram (session hot path; skips re-slicing
/// the id/length envelope).
pub fn decode_datagram(datagram: &BstDatagram) -> Result<BstFrame> {
    match datagram.id {
        id::N2K_GATEWAY_TO_PC => decode_93(&datagram.body).map(BstFrame::Bst93),
        id::N2K_PC_TO_GATEWAY => decode_94(&datagram.body).map(BstFrame::Bst94),
        id::CAN_FRAME => decode_95(&datagram.body).map(BstFrame::Bst95),
        id::N2K_D0 => decode_d0(&datagram.body).map(BstFrame::BstD0),
        other => Err(SdkError::MalformedFrame(format!(
            "unsupported BST id 0x{other:02X}"
        ))),
    }
}

/// Extract the Type 1 body: `<id> <store_len> <body[store_len]>`.
fn type1_body(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 2 {
        return Err(SdkError::MalformedFrame("BST header truncated".into()));
    }
    let store_len = data[1] as usize;
    let payload = &data[2..];
    if payload.len() < store_len {
        return Err(SdkError::MalformedFrame("BST payload truncated".into()));
    }
    Ok(&payload[..store_len])
}

/// Extract the Type 2 body: `<id> <total_len LE> <body>` where `total_len`
/// counts from the id byte through the last body byte.
fn type2_body(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 3 {
        return Err(SdkError::MalformedFrame("BST header truncated".into()));
    }
    let total_len = u16::from_le_bytes([data[1], data[2]]) as usize;
    if total_len < 3 {
        return Err(SdkError::MalformedFrame(
            "BST total length smaller than header".into(),
        ));
    }
    if data.len() < total_len {
        return Err(SdkError::MalformedFrame("BST payload truncated".into()));
    }
    Ok(&data[3..total_len])
}

/// Body: `priority pdus pduf datapage destination source timestamp(4 LE)
/// data_len data[..]`.
fn decode_93(body: &[u8]) -> Result<Bst93Frame> {
    if body.len() < BST93_OFF_DATA {
        return Err(SdkError::MalformedFrame("BST-93 body too short".into()));
    }

    let pdus = body[1];
    let pduf = body[2];
    let data_page = body[3] & 0x03;

    let data_len = body[BST93_OFF_DATA_LEN] as usize;
    if body.len() < BST93_OFF_DATA + data_len {
        return Err(SdkError::MalformedFrame(
            "BST-93 data length exceeds store length".into(),
        ));
    }

    Ok(Bst93Frame {
        priority: body[0] & 0x07,
        pgn: calculate_pgn(pduf, pdus, data_page),
        source: body[5],
        destination: body[4],
        timestamp_ms: read_u32_le(&body[BST93_OFF_TIME..]),
        data: Bytes::copy_from_slice(&body[BST93_OFF_DATA..BST93_OFF_DATA + data_len]),
    })
}

/// Body: `priority pdus pduf datapage destination data_len data[..]`.
/// No source and no timestamp; used on the transmit path.
fn decode_94(body: &[u8]) -> Result<Bst94Frame> {
    if body.len() < BST94_OFF_DATA {
        return Err(SdkError::MalformedFrame("BST-94 body too short".into()));
    }

    let pdus = body[1];
    let pduf = body[2];
    let data_page = body[3] & 0x03;

    let data_len = body[BST94_OFF_DATA_LEN] as usize;
    if body.len() < BST94_OFF_DATA + data_len {
        return Err(SdkError::MalformedFrame(
            "BST-94 data length exceeds store length".into(),
        ));
    }

    Ok(Bst94Frame {
        priority: body[0] & 0x07,
        pgn: calculate_pgn(pduf, pdus, data_page),
        source: 0,
        destination: body[4],
        data: Bytes::copy_from_slice(&body[BST94_OFF_DATA..BST94_OFF_DATA + data_len]),
    })
}

/// Body: `timestamp(2 LE) source pdus pduf dppc data[0..8]`. The DPPC byte
/// packs datapage (bits 0-1), priority (2-4), timestamp resolution (5-6),
/// and direction (bit 7).
fn decode_95(body: &[u8]) -> Result<Bst95Frame> {
    if body.len() < BST95_HEADER_LEN {
        return Err(SdkError::MalformedFrame("BST-95 body too short".into()));
    }

    let data_len = body.len() - BST95_HEADER_LEN;
    if data_len > BST95_MAX_DATA {
        return Err(SdkError::MalformedFrame(
            "BST-95 data exceeds 8 bytes".into(),
        ));
    }

    let pdus = body[3];
    let pduf = body[4];
    let dppc = body[5];
    let data_page = dppc & 0x03;

    Ok(Bst95Frame {
        priority: (dppc >> 2) & 0x07,
        pgn: calculate_pgn(pduf, pdus, data_page),
        source: body[2],
        // PDU1 carries the destination in PDUS; PDU2 is broadcast.
        destination: if pduf < 240 { pdus } else { 0xFF },
        timestamp: u16::from_le_bytes([body[0], body[1]]),
        resolution: TimestampResolution::from_bits(dppc >> 5),
        direction: Direction::from_bit(dppc >> 7),
        data: Bytes::copy_from_slice(&body[BST95_HEADER_LEN..]),
    })
}

/// Body: `destination source pdus pduf dpp control timestamp(4 LE)
/// data[..]`. DPP packs datapage (bits 0-1) and priority (2-4); control
/// packs message type (0-1), direction (3), internal-source (4), and the
/// fast-packet sequence id (5-7).
fn decode_d0(body: &[u8]) -> Result<BstD0Frame> {
    if body.len() < BSTD0_HEADER_LEN {
        return Err(SdkError::MalformedFrame("BST-D0 body too short".into()));
    }

    let pdus = body[2];
    let pduf = body[3];
    let dpp = body[4];
    let control = body[5];
    let data_page = dpp & 0x03;

    Ok(BstD0Frame {
        priority: (dpp >> 2) & 0x07,
        pgn: calculate_pgn(pduf, pdus, data_page),
        source: body[1],
        destination: body[0],
        timestamp_ms: read_u32_le(&body[BSTD0_OFF_TIME..]),
        message_type: D0MessageType::from_bits(control),
        direction: Direction::from_bit(control >> 3),
        internal_source: (control >> 4) & 0x01 != 0,
        fast_packet_seq: (control >> 5) & 0x07,
        data: Bytes::copy_from_slice(&body[BSTD0_HEADER_LEN..]),
    })
}

/* Encoder ---------------------------------------------------------------- */

/// Encode a BST-94 transmit record: `<id> <store_len> <body>`.
///
/// The zero-sum checksum is not appended here; the BDTP encoder adds it
/// when wrapping.
pub fn encode_94(frame: &Bst94Frame) -> Result<Vec<u8>> {
    if frame.data.len() > u8::MAX as usize - BST94_OFF_DATA {
        return Err(SdkError::InvalidArgument("BST-94 data too large".into()));
    }

    let (pduf, mut pdus, data_page) = extract_pdu_fields(frame.pgn);
    if pduf < 240 {
        pdus = frame.destination;
    }

    let data_len = frame.data.len() as u8;
    let store_len = BST94_OFF_DATA as u8 + data_len;

    let mut out = Vec::with_capacity(2 + store_len as usize);
    out.push(id::N2K_PC_TO_GATEWAY);
    out.push(store_len);
    out.push(frame.priority & 0x07);
    out.push(pdus);
    out.push(pduf);
    out.push(data_page & 0x03);
    out.push(frame.destination);
    out.push(data_len);
    out.extend_from_slice(&frame.data);
    Ok(out)
}

/// Encode a BST-D0 record: `<id> <total_len LE> <body>`. The 16-bit total
/// length counts from the id byte through the last body byte; Type 2
/// records carry no tail checksum.
pub fn encode_d0(frame: &BstD0Frame) -> Result<Vec<u8>> {
    if frame.data.len() > D0_MAX_DATA {
        return Err(SdkError::InvalidArgument("BST-D0 data too large".into()));
    }

    let (pduf, mut pdus, data_page) = extract_pdu_fields(frame.pgn);
    if pduf < 240 {
        pdus = frame.destination;
    }

    let total_len = (3 + BSTD0_HEADER_LEN + frame.data.len()) as u16;

    let mut out = Vec::with_capacity(total_len as usize);
    out.push(id::N2K_D0);
    out.extend_from_slice(&total_len.to_le_bytes());
    out.push(frame.destination);
    out.push(frame.source);
    out.push(pdus);
    out.push(pduf);
    out.push((data_page & 0x03) | ((frame.priority & 0x07) << 2));
    out.push(
        (frame.message_type as u8 & 0x03)
            | ((frame.direction as u8 & 0x01) << 3)
            | (u8::from(frame.internal_source) << 4)
            | ((frame.fast_packet_seq & 0x07) << 5),
    );
    out.extend_from_slice(&frame.timestamp_ms.to_le_bytes());
    out.extend_from_slice(&frame.data);
    Ok(out)
}

fn read_u32_le(p: &[u8]) -> u32 {
    u32::from_le_bytes([p[0], p[1], p[2], p[3]])
}
