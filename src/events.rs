//! Event types delivered to session callbacks.
//!
//! Decoded traffic surfaces as [`SdkEvent`] values through the session's
//! event callback, in the order it was decoded from the transport. The
//! payload is a typed sum - no downcasting is involved anywhere on the
//! receive path.

use std::sync::Arc;

use crate::error::ErrorKind;
use crate::protocol::bem::BemResponse;
use crate::protocol::bst::BstFrame;

/// Typed payload of a parsed message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// Decoded BST frame (93/94/95/D0).
    Bst(BstFrame),
    /// BEM response with no pending request (unsolicited).
    Bem(BemResponse),
}

/// A message decoded from the device stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessageEvent {
    /// Protocol layer that produced the payload ("bst" or "bem").
    pub protocol: &'static str,
    /// Message type within the protocol (e.g. "BST-93 (N2K Gateway-PC)",
    /// "BEM_Response_F2").
    pub message_type: String,
    /// Typed payload.
    pub payload: MessagePayload,
}

/// Device status as key-value pairs (e.g. "connected", "operating_mode").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatusEvent {
    pub key: String,
    pub value: String,
}

/// Variant over all session events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    ParsedMessage(ParsedMessageEvent),
    DeviceStatus(DeviceStatusEvent),
}

/// Event callback. Invoked synchronously from the session's receive task;
/// keep it light and do not call back into blocking session operations.
pub type EventCallback = Arc<dyn Fn(SdkEvent) + Send + Sync>;

/// Error callback, invoked with the flat kind and a descriptive message.
/// Fires on the receive task for decode errors and on whichever task
/// observes a transport failure.
pub type ErrorCallback = Arc<dyn Fn(ErrorKind, &str) + Send + Sync>;
