//! Protocol error taxonomy.
//!
//! Two classes share one enum: *wire exceptions* are serialized back to the
//! peer as an exception reply, *internal errors* never reach the wire and
//! cause the offending frame to be dropped. `wire_code()` distinguishes
//! them: it returns `Some` only for the sendable class.

use thiserror::Error;

/// Result alias used throughout the codec
pub type Result<T> = std::result::Result<T, ErrorCode>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // --- wire exceptions (standard exception codes 0x01..=0x0B) ---
    #[error("illegal function")]
    IllegalFunction,

    #[error("illegal data address")]
    IllegalDataAddress,

    #[error("illegal data value")]
    IllegalDataValue,

    #[error("server device failure")]
    ServerDeviceFailure,

    #[error("acknowledge")]
    Acknowledge,

    #[error("server busy")]
    ServerBusy,

    #[error("negative acknowledge")]
    NegativeAcknowledge,

    #[error("memory parity error")]
    MemoryParityError,

    #[error("gateway path unavailable")]
    GatewayUnavailable,

    #[error("gateway target device failed to respond")]
    GatewayTargetFailed,

    // --- internal errors, never serialized ---
    #[error("invalid frame format")]
    InvalidFormat,

    #[error("bad checksum")]
    BadChecksum,

    #[error("wrong node address")]
    WrongNodeAddress,

    #[error("timed out")]
    Timeout,

    #[error("packet too long")]
    PacketTooLong,

    #[error("session closed")]
    SessionClosed,
}

impl ErrorCode {
    /// Wire exception code, or `None` for the internal-only class.
    pub fn wire_code(&self) -> Option<u8> {
        match self {
            Self::IllegalFunction => Some(0x01),
            Self::IllegalDataAddress => Some(0x02),
            Self::IllegalDataValue => Some(0x03),
            Self::ServerDeviceFailure => Some(0x04),
            Self::Acknowledge => Some(0x05),
            Self::ServerBusy => Some(0x06),
            Self::NegativeAcknowledge => Some(0x07),
            Self::MemoryParityError => Some(0x08),
            Self::GatewayUnavailable => Some(0x0A),
            Self::GatewayTargetFailed => Some(0x0B),
            _ => None,
        }
    }

    pub fn is_wire_exception(&self) -> bool {
        self.wire_code().is_some()
    }

    /// Map a received exception code back to an error. Unknown codes fold
    /// into `ServerDeviceFailure`.
    pub fn from_wire(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayUnavailable,
            0x0B => Self::GatewayTargetFailed,
            _ => Self::ServerDeviceFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_class_has_codes() {
        assert_eq!(ErrorCode::IllegalFunction.wire_code(), Some(0x01));
        assert_eq!(ErrorCode::IllegalDataAddress.wire_code(), Some(0x02));
        assert_eq!(ErrorCode::GatewayTargetFailed.wire_code(), Some(0x0B));
    }

    #[test]
    fn test_internal_class_never_serializes() {
        for e in [
            ErrorCode::InvalidFormat,
            ErrorCode::BadChecksum,
            ErrorCode::WrongNodeAddress,
            ErrorCode::Timeout,
            ErrorCode::PacketTooLong,
            ErrorCode::SessionClosed,
        ] {
            assert!(e.wire_code().is_none(), "{e} must not have a wire code");
            assert!(!e.is_wire_exception());
        }
    }

    #[test]
    fn test_wire_code_round_trip() {
        for e in [
            ErrorCode::IllegalFunction,
            ErrorCode::IllegalDataAddress,
            ErrorCode::IllegalDataValue,
            ErrorCode::ServerDeviceFailure,
            ErrorCode::Acknowledge,
            ErrorCode::ServerBusy,
            ErrorCode::NegativeAcknowledge,
            ErrorCode::MemoryParityError,
            ErrorCode::GatewayUnavailable,
            ErrorCode::GatewayTargetFailed,
        ] {
            let code = e.wire_code().unwrap();
            assert_eq!(ErrorCode::from_wire(code), e);
        }
    }
}
