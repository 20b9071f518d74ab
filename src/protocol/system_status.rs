//! System Status unsolicited message (BEM id 0xF2).
//!
//! Gateways configured to report status send this periodically on the A0
//! response channel. The payload is length-driven: individual-buffer
//! statistics, then unified-buffer statistics, then an optional CAN status
//! block and an optional operating mode. The message may be truncated at
//! any of those extension points and still decode.

use crate::error::{Result, SdkError};
use crate::protocol::bem::OperatingMode;

/// Statistics for one individual buffer (an Rx/Tx channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndividualBufferStats {
    /// Receive bandwidth usage (%).
    pub rx_bandwidth: u8,
    /// Receive loading (%).
    pub rx_loading: u8,
    /// Receive filtered packets (%).
    pub rx_filtered: u8,
    /// Receive dropped packets (%).
    pub rx_dropped: u8,
    /// Transmit bandwidth usage (%).
    pub tx_bandwidth: u8,
    /// Transmit loading (%).
    pub tx_loading: u8,
}

/// Statistics for one unified buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifiedBufferStats {
    /// Buffer bandwidth usage (%).
    pub bandwidth: u8,
    /// Deleted packets (%).
    pub deleted: u8,
    /// Buffer loading (%).
    pub loading: u8,
    /// Pointer queue loading (%).
    pub pointer_loading: u8,
}

/// CAN bus error counters and status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanExtendedStatus {
    pub rx_error_count: u8,
    pub tx_error_count: u8,
    pub can_status: u8,
}

/// Decoded System Status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    pub individual_buffers: Vec<IndividualBufferStats>,
    pub unified_buffers: Vec<UnifiedBufferStats>,
    pub can_status: Option<CanExtendedStatus>,
    pub operating_mode: Option<OperatingMode>,
}

const INDIVIDUAL_ENTRY_LEN: usize = 6;
const UNIFIED_ENTRY_LEN: usize = 4;
const MAX_INDIVIDUAL_BUFFERS: u8 = 16;
const MAX_UNIFIED_BUFFERS: u8 = 8;

/// Decode a System Status payload (the BEM data block after the response
/// header).
pub fn decode(data: &[u8]) -> Result<SystemStatus> {
    if data.is_empty() {
        return Err(SdkError::MalformedFrame(
            "system status payload empty".into(),
        ));
    }

    let mut offset = 0usize;

    let individual_count = data[offset];
    offset += 1;
    if individual_count < 1 || individual_count > MAX_INDIVIDUAL_BUFFERS {
        return Err(SdkError::MalformedFrame(format!(
            "invalid individual buffer count {individual_count}"
        )));
    }

    let individual_bytes = individual_count as usize * INDIVIDUAL_ENTRY_LEN;
    if offset + individual_bytes > data.len() {
        return Err(SdkError::MalformedFrame(
            "system status truncated inside individual buffers".into(),
        ));
    }

    let mut individual_buffers = Vec::with_capacity(individual_count as usize);
    for _ in 0..individual_count {
        individual_buffers.push(IndividualBufferStats {
            rx_bandwidth: data[offset],
            rx_loading: data[offset + 1],
            rx_filtered: data[offset + 2],
            rx_dropped: data[offset + 3],
            tx_bandwidth: data[offset + 4],
            tx_loading: data[offset + 5],
        });
        offset += INDIVIDUAL_ENTRY_LEN;
    }

    let mut status = SystemStatus {
        individual_buffers,
        unified_buffers: Vec::new(),
        can_status: None,
        operating_mode: None,
    };

    // Everything past this point is optional; truncation here is valid.
    if offset >= data.len() {
        return Ok(status);
    }

    let unified_count = data[offset];
    offset += 1;
    if unified_count > MAX_UNIFIED_BUFFERS {
        return Err(SdkError::MalformedFrame(format!(
            "invalid unified buffer count {unified_count}"
        )));
    }

    let unified_bytes = unified_count as usize * UNIFIED_ENTRY_LEN;
    if offset + unified_bytes > data.len() {
        return Err(SdkError::MalformedFrame(
            "system status truncated inside unified buffers".into(),
        ));
    }

    status.unified_buffers.reserve(unified_count as usize);
    for _ in 0..unified_count {
        status.unified_buffers.push(UnifiedBufferStats {
            bandwidth: data[offset],
            deleted: data[offset + 1],
            loading: data[offset + 2],
            pointer_loading: data[offset + 3],
        });
        offset += UNIFIED_ENTRY_LEN;
    }

    if data.len() - offset >= 3 {
        status.can_status = Some(CanExtendedStatus {
            rx_error_count: data[offset],
            tx_error_count: data[offset + 1],
            can_status: data[offset + 2],
        });
        offset += 3;
    }

    if data.len() - offset >= 2 {
        status.operating_mode = Some(OperatingMode::from_le_bytes([
            data[offset],
            data[offset + 1],
        ]));
    }

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One individual buffer, one unified buffer, CAN status, and a mode.
    fn full_payload() -> Vec<u8> {
        vec![
            0x01, // individual buffer count
            10, 20, 30, 40, 50, 60, // individual stats
            0x01, // unified buffer count
            11, 22, 33, 44, // unified stats
            2, 3, 0x80, // CAN status
            0x01, 0x00, // operating mode 1 LE
        ]
    }

    #[test]
    fn test_decode_full_payload() {
        let status = decode(&full_payload()).unwrap();

        assert_eq!(status.individual_buffers.len(), 1);
        let indi = status.individual_buffers[0];
        assert_eq!(indi.rx_bandwidth, 10);
        assert_eq!(indi.tx_loading, 60);

        assert_eq!(status.unified_buffers.len(), 1);
        let uni = status.unified_buffers[0];
        assert_eq!(uni.bandwidth, 11);
        assert_eq!(uni.pointer_loading, 44);

        let can = status.can_status.unwrap();
        assert_eq!(can.rx_error_count, 2);
        assert_eq!(can.tx_error_count, 3);
        assert_eq!(can.can_status, 0x80);

        assert_eq!(status.operating_mode, Some(OperatingMode::NGT_TRANSFER_NORMAL));
    }

    #[test]
    fn test_decode_truncated_after_individual_buffers() {
        let status = decode(&full_payload()[..7]).unwrap();
        assert_eq!(status.individual_buffers.len(), 1);
        assert!(status.unified_buffers.is_empty());
        assert!(status.can_status.is_none());
        assert!(status.operating_mode.is_none());
    }

    #[test]
    fn test_decode_truncated_before_can_status() {
        let status = decode(&full_payload()[..12]).unwrap();
        assert_eq!(status.unified_buffers.len(), 1);
        assert!(status.can_status.is_none());
        assert!(status.operating_mode.is_none());
    }

    #[test]
    fn test_decode_can_status_without_mode() {
        let status = decode(&full_payload()[..15]).unwrap();
        assert!(status.can_status.is_some());
        assert!(status.operating_mode.is_none());
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_counts() {
        // Zero individual buffers is out of range.
        assert!(decode(&[0x00]).is_err());
        // 17 exceeds the maximum.
        assert!(decode(&[17]).is_err());
        // Unified count beyond 8.
        let mut payload = vec![0x01, 0, 0, 0, 0, 0, 0, 9];
        payload.extend_from_slice(&[0u8; 36]);
        assert!(decode(&payload).is_err());
    }

    #[test]
    fn test_decode_rejects_short_entry_data() {
        // Claims 2 individual buffers but carries bytes for one.
        let payload = vec![0x02, 1, 2, 3, 4, 5, 6];
        assert!(decode(&payload).is_err());
    }

    #[test]
    fn test_decode_multiple_buffers() {
        let mut payload = vec![0x02];
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        payload.extend_from_slice(&[7, 8, 9, 10, 11, 12]);
        payload.push(0x02);
        payload.extend_from_slice(&[1, 2, 3, 4]);
        payload.extend_from_slice(&[5, 6, 7, 8]);

        let status = decode(&payload).unwrap();
        assert_eq!(status.individual_buffers.len(), 2);
        assert_eq!(status.individual_buffers[1].rx_bandwidth, 7);
        assert_eq!(status.unified_buffers.len(), 2);
        assert_eq!(status.unified_buffers[1].loading, 7);
    }
}
