//! The layered Actisense protocol stack.
//!
//! Inbound, bytes flow BDTP -> BST -> (for A-series responses) BEM:
//! [`bdtp::BdtpFramer`] carves the byte stream into validated
//! [`bst::BstDatagram`]s, [`bst::decode_datagram`] types them, and
//! [`bem::BemEngine`] decodes and correlates command responses. Outbound,
//! the BST/BEM encoders build record envelopes and the BDTP encoder adds
//! the checksum and DLE framing.

pub mod bdtp;
pub mod bem;
pub mod bst;
pub mod system_status;
