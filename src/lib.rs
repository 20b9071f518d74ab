//! # actisense-sdk
//!
//! SDK core for talking to Actisense marine gateway devices (NGT-1, NGX,
//! NGW-1, ...) over serial or equivalent byte-stream transports.
//!
//! The device exposes a stream of NMEA 2000/CAN traffic plus a
//! command-response channel for device control. This crate turns the raw
//! byte stream into structured, correlated, typed events:
//!
//! - **BDTP framer** - carves the DLE/STX/ETX-escaped stream into frames
//!   and validates the zero-sum checksum.
//! - **BST codec** - decodes and encodes the structured record formats
//!   (93/94/95/D0) carrying N2K PGNs.
//! - **BEM engine** - encodes device commands, decodes responses, and
//!   correlates outstanding requests under timeouts; unsolicited messages
//!   surface as events.
//! - **Session** - owns a transport, drives the receive loop, fans typed
//!   events out to callbacks, and exposes the async send and
//!   request/response API.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use actisense_sdk::{open_serial_session, SerialConfig, SdkEvent};
//!
//! #[tokio::main]
//! async fn main() -> actisense_sdk::Result<()> {
//!     let session = open_serial_session(
//!         &SerialConfig::new("/dev/ttyUSB0"),
//!         Arc::new(|event| {
//!             if let SdkEvent::ParsedMessage(msg) = event {
//!                 println!("{}: {:?}", msg.message_type, msg.payload);
//!             }
//!         }),
//!         Arc::new(|kind, message| eprintln!("{kind}: {message}")),
//!     )
//!     .await?;
//!
//!     session
//!         .get_operating_mode(Duration::from_secs(5), Box::new(|resp, kind, _| {
//!             println!("mode: {:?} ({kind})", resp.and_then(|r| r.operating_mode()));
//!         }))
//!         .await;
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod ring;
pub mod session;
pub mod transport;

pub use config::{Parity, SerialConfig, TransportKind};
pub use error::{ErrorKind, Result, SdkError};
pub use events::{
    DeviceStatusEvent, ErrorCallback, EventCallback, MessagePayload, ParsedMessageEvent, SdkEvent,
};
pub use protocol::bem::{BemCommand, BemCompletion, BemEngine, BemResponse, OperatingMode};
pub use protocol::bst::{BstDatagram, BstFrame};
pub use session::{open_serial_session, Session};
pub use transport::{LoopbackTransport, SerialTransport, Transport};
