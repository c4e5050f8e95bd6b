//! Transport framings: serial (address + PDU + CRC) and MBAP over TCP.

use crate::constants::*;
use crate::crc::{crc16, crc_from_wire, crc_to_wire};
use crate::error::{ErrorCode, Result};
use crate::pdu::Pdu;

/// Parsed 7-byte MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Unit id + PDU byte count.
    pub length: u16,
    pub unit: u8,
}

impl MbapHeader {
    /// Parse and validate a raw header. Protocol id must be zero, the
    /// length field must describe at least a function code and at most a
    /// full PDU.
    pub fn parse(raw: &[u8; MBAP_HEADER_LEN]) -> Result<Self> {
        let transaction_id = u16::from_be_bytes([raw[0], raw[1]]);
        let protocol_id = u16::from_be_bytes([raw[2], raw[3]]);
        let length = u16::from_be_bytes([raw[4], raw[5]]);
        if protocol_id != 0 {
            return Err(ErrorCode::InvalidFormat);
        }
        if length < 2 {
            return Err(ErrorCode::InvalidFormat);
        }
        if length as usize > MAX_MBAP_LENGTH {
            return Err(ErrorCode::PacketTooLong);
        }
        Ok(Self { transaction_id, length, unit: raw[6] })
    }

    /// PDU bytes that follow the header on the wire.
    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}

/// Frame a PDU for TCP transport, echoing the request's transaction id.
pub fn encode_tcp(transaction_id: u16, unit: u8, pdu: &Pdu) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(pdu.as_slice());
    frame
}

/// Frame a PDU for serial transport: address + PDU + CRC (low byte first).
pub fn encode_rtu(addr: u8, pdu: &Pdu) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(addr);
    frame.extend_from_slice(pdu.as_slice());
    frame.extend_from_slice(&crc_to_wire(crc16(&frame)));
    frame
}

/// Parse a complete serial frame, verifying the trailing CRC unless
/// `check_crc` is off (diagnostics aid for lossy test links).
pub fn decode_rtu(frame: &[u8], check_crc: bool) -> Result<(u8, Pdu)> {
    if frame.len() < 4 {
        return Err(ErrorCode::InvalidFormat);
    }
    if frame.len() > MAX_RTU_FRAME_SIZE {
        return Err(ErrorCode::PacketTooLong);
    }
    let body = &frame[..frame.len() - 2];
    if check_crc {
        let received = crc_from_wire(frame[frame.len() - 2], frame[frame.len() - 1]);
        if crc16(body) != received {
            return Err(ErrorCode::BadChecksum);
        }
    }
    Ok((body[0], Pdu::from_slice(&body[1..])?))
}
