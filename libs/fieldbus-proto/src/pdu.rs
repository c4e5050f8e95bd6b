//! Protocol Data Unit: function code + payload, transport-independent.
//!
//! Stack-allocated with a fixed backing store; every append is bounds
//! checked so a PDU can never grow past the protocol maximum.

use crate::constants::MAX_PDU_SIZE;
use crate::error::{ErrorCode, Result};

#[derive(Clone, Copy)]
pub struct Pdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl Pdu {
    /// Start a PDU with the given function code.
    pub fn new(function: u8) -> Self {
        let mut data = [0u8; MAX_PDU_SIZE];
        data[0] = function;
        Self { data, len: 1 }
    }

    /// Build a PDU from raw bytes (function code + payload).
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ErrorCode::InvalidFormat);
        }
        if bytes.len() > MAX_PDU_SIZE {
            return Err(ErrorCode::PacketTooLong);
        }
        let mut data = [0u8; MAX_PDU_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { data, len: bytes.len() })
    }

    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ErrorCode::PacketTooLong);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a word, big-endian.
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.extend(&value.to_be_bytes())
    }

    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        if self.len + bytes.len() > MAX_PDU_SIZE {
            return Err(ErrorCode::PacketTooLong);
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn function(&self) -> u8 {
        self.data[0]
    }

    /// Payload bytes after the function code.
    pub fn payload(&self) -> &[u8] {
        &self.data[1..self.len]
    }

    pub fn is_exception(&self) -> bool {
        self.data[0] & crate::constants::EXCEPTION_FLAG != 0
    }

    /// Exception code, if this PDU is an exception reply.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len >= 2 {
            Some(self.data[1])
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pdu(fc=0x{:02X}, {}B)", self.function(), self.len)
    }
}

impl PartialEq for Pdu {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Pdu {}
