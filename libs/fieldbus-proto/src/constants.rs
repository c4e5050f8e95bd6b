//! Protocol constants: function codes, size limits, exception codes.
//!
//! All limits derive from the 256-byte serial ADU: 1 address byte +
//! 253-byte PDU (function + data) + 2 CRC bytes.

/// Maximum PDU size in bytes (function code + data)
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum ADU size for the serial framing (address + PDU + CRC)
pub const MAX_RTU_FRAME_SIZE: usize = MAX_PDU_SIZE + 3;

/// MBAP header length in bytes (transaction id + protocol id + length + unit)
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum value of the MBAP length field (unit id + PDU)
pub const MAX_MBAP_LENGTH: usize = MAX_PDU_SIZE + 1;

/// Maximum registers per read request (FC 0x03/0x04)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers per write request (FC 0x10)
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum coils per read request (FC 0x01/0x02)
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum coils per write request (FC 0x0F)
pub const MAX_WRITE_COILS: u16 = 1968;

/// Reserved node address meaning "all servers, no reply expected"
pub const BROADCAST_ADDR: u8 = 255;

/// Coil ON value for WriteSingleCoil (FC 0x05)
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF value for WriteSingleCoil (FC 0x05)
pub const COIL_OFF: u16 = 0x0000;

// Function codes
pub const FN_READ_COILS: u8 = 0x01;
pub const FN_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FN_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FN_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FN_DIAGNOSTICS: u8 = 0x08;
pub const FN_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FN_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FN_ENCAPSULATED_INTERFACE: u8 = 0x2B;
pub const FN_SET_DATE_TIME: u8 = 0x50;
pub const FN_REMOTE_SERVICE: u8 = 0x53;
pub const FN_JOURNAL_COMMAND: u8 = 0x65;
pub const FN_FILE_TRANSFER: u8 = 0x66;

/// MEI type for ReadDeviceIdentification under FC 0x2B
pub const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// High bit set on the function code marks an exception reply
pub const EXCEPTION_FLAG: u8 = 0x80;

// Diagnostics (FC 0x08) sub-function codes
pub const DIAG_ECHO: u16 = 0x0000;
pub const DIAG_CLEAR_COUNTERS: u16 = 0x000A;
pub const DIAG_BUS_MESSAGE_COUNT: u16 = 0x000B;
pub const DIAG_BUS_COMM_ERROR_COUNT: u16 = 0x000C;
pub const DIAG_BUS_EXCEPTION_COUNT: u16 = 0x000D;
pub const DIAG_SERVER_MESSAGE_COUNT: u16 = 0x000E;
pub const DIAG_SERVER_NO_RESPONSE_COUNT: u16 = 0x000F;
pub const DIAG_SERVER_NAK_COUNT: u16 = 0x0010;
pub const DIAG_SERVER_BUSY_COUNT: u16 = 0x0011;
pub const DIAG_CHAR_OVERRUN_COUNT: u16 = 0x0012;
