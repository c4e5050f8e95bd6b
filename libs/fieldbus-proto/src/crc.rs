//! CRC-16 for the serial framing.
//!
//! Polynomial x^16 + x^15 + x^2 + 1 (reflected form 0xA001), seed 0xFFFF,
//! computed over address + function + payload. The result goes on the wire
//! low byte first, without further swapping.

/// Precomputed lookup table, one entry per input byte value.
const CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the CRC over `data`, table-driven.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for &byte in data {
        let idx = ((crc ^ byte as u16) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC_TABLE[idx];
    }
    crc
}

/// Split a CRC into its wire order: low byte first.
pub fn crc_to_wire(crc: u16) -> [u8; 2] {
    [(crc & 0xFF) as u8, (crc >> 8) as u8]
}

/// Reassemble a CRC from its two wire bytes.
pub fn crc_from_wire(lo: u8, hi: u8) -> u16 {
    u16::from(lo) | (u16::from(hi) << 8)
}
