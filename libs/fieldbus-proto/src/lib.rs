//! Modbus wire-format codec.
//!
//! Message model (one Request/Reply pair per function code), byte-level
//! encode/decode with big-endian words, CRC-16 for the serial framing and
//! MBAP headers for TCP. Transport and dispatch live in `fieldbus-server`;
//! this crate is pure data, no I/O.

pub mod constants;
pub mod crc;
pub mod error;
pub mod frame;
pub mod message;
pub mod pdu;
pub mod wire;

pub use constants::{BROADCAST_ADDR, MAX_PDU_SIZE, MBAP_HEADER_LEN};
pub use error::{ErrorCode, Result};
pub use frame::{decode_rtu, encode_rtu, encode_tcp, MbapHeader};
pub use message::{
    bit_at, pack_bits, BodyLen, DateTimeValue, DeviceIdentification, FilePacket, IdObject,
    Reply, Request,
};
pub use pdu::Pdu;
