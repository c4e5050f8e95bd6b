//! Request/Reply message model and its byte-level codec.
//!
//! One variant pair per supported function code. `decode` validates the
//! fixed header first, then checks every declared count against the
//! protocol maxima before any tail bytes are copied, so no buffer is ever
//! sized from an unchecked field. Multi-byte values travel big-endian.
//!
//! Count violations decode to `IllegalDataValue` (a wire exception, the
//! peer learns about it); structural damage decodes to `InvalidFormat` or
//! `PacketTooLong` (internal, the frame is dropped upstream).

use crate::constants::*;
use crate::error::{ErrorCode, Result};
use crate::pdu::Pdu;
use crate::wire::WireReader;

/// Calendar value carried by SetDateTime (FC 0x50), one byte per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeValue {
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub day: u8,
    pub mon: u8,
    pub year: u8,
    pub century: u8,
}

/// One (object id, value) entry of a device-identification reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdObject {
    pub id: u8,
    pub value: Vec<u8>,
}

impl IdObject {
    pub fn text(id: u8, value: &str) -> Self {
        Self { id, value: value.as_bytes().to_vec() }
    }
}

/// Device-identification reply body (FC 0x2B / MEI 0x0E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub device_id: u8,
    pub conformity: u8,
    /// 0xFF if further objects exist beyond this reply, else 0.
    pub more_follows: u8,
    pub next_object_id: u8,
    pub objects: Vec<IdObject>,
}

/// One chunk of a file served over FC 0x66.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePacket {
    pub file: u16,
    pub num_packets: u16,
    pub packet: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { start: u16, count: u16 },
    ReadDiscreteInputs { start: u16, count: u16 },
    ReadHoldingRegisters { start: u16, count: u16 },
    ReadInputRegisters { start: u16, count: u16 },
    WriteSingleCoil { addr: u16, value: bool },
    WriteSingleRegister { addr: u16, value: u16 },
    WriteMultipleCoils { start: u16, count: u16, data: Vec<u8> },
    WriteMultipleRegisters { start: u16, values: Vec<u16> },
    Diagnostics { sub: u16, data: u16 },
    ReadDeviceIdentification { device_id: u8, object_id: u8 },
    SetDateTime(DateTimeValue),
    RemoteService { data: Vec<u8> },
    JournalCommand { command: u16, count: u16 },
    FileTransfer { file: u16, packet: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Packed coil bytes, bit 0 of byte 0 = first requested coil.
    ReadCoils { data: Vec<u8> },
    ReadDiscreteInputs { data: Vec<u8> },
    ReadHoldingRegisters { values: Vec<u16> },
    ReadInputRegisters { values: Vec<u16> },
    WriteSingleCoil { addr: u16, value: bool },
    WriteSingleRegister { addr: u16, value: u16 },
    WriteMultipleCoils { start: u16, count: u16 },
    WriteMultipleRegisters { start: u16, count: u16 },
    Diagnostics { sub: u16, data: u16 },
    ReadDeviceIdentification(DeviceIdentification),
    SetDateTime(DateTimeValue),
    RemoteService { data: Vec<u8> },
    JournalCommand { data: Vec<u8> },
    FileTransfer(FilePacket),
    /// `function` is the original code without the high bit.
    Exception { function: u8, code: ErrorCode },
}

// ===== bit packing =====

/// Pack coil values little-endian within each byte, `ceil(n/8)` bytes out.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (n, &bit) in bits.iter().enumerate() {
        if bit {
            out[n / 8] |= 1 << (n % 8);
        }
    }
    out
}

/// Value of packed bit `n`, false when out of range.
pub fn bit_at(data: &[u8], n: usize) -> bool {
    data.get(n / 8).is_some_and(|b| b & (1 << (n % 8)) != 0)
}

// ===== frame-assembly length tables =====

/// Expected shape of a request body (everything after the function code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLen {
    Fixed(usize),
    /// Fixed head whose last byte declares the tail length.
    Variable { head: usize },
}

/// Body shape for a request function code, `None` if unsupported.
pub fn request_body_len(function: u8) -> Option<BodyLen> {
    match function {
        FN_READ_COILS
        | FN_READ_DISCRETE_INPUTS
        | FN_READ_HOLDING_REGISTERS
        | FN_READ_INPUT_REGISTERS
        | FN_WRITE_SINGLE_COIL
        | FN_WRITE_SINGLE_REGISTER
        | FN_DIAGNOSTICS
        | FN_JOURNAL_COMMAND
        | FN_FILE_TRANSFER => Some(BodyLen::Fixed(4)),
        FN_WRITE_MULTIPLE_COILS | FN_WRITE_MULTIPLE_REGISTERS => {
            Some(BodyLen::Variable { head: 5 })
        }
        FN_ENCAPSULATED_INTERFACE => Some(BodyLen::Fixed(3)),
        FN_SET_DATE_TIME => Some(BodyLen::Fixed(7)),
        FN_REMOTE_SERVICE => Some(BodyLen::Variable { head: 1 }),
        _ => None,
    }
}

/// Tail length declared by a variable request's head, bounds-checked
/// against the PDU maximum before the caller reads a single tail byte.
pub fn request_tail_len(function: u8, head: &[u8]) -> Result<usize> {
    let h = match request_body_len(function) {
        Some(BodyLen::Variable { head }) => head,
        Some(BodyLen::Fixed(_)) => return Ok(0),
        None => return Err(ErrorCode::IllegalFunction),
    };
    if head.len() < h {
        return Err(ErrorCode::InvalidFormat);
    }
    let tail = head[h - 1] as usize;
    // function byte + head + tail must fit the PDU
    if 1 + h + tail > MAX_PDU_SIZE {
        return Err(ErrorCode::PacketTooLong);
    }
    Ok(tail)
}

impl Request {
    pub fn function(&self) -> u8 {
        match self {
            Self::ReadCoils { .. } => FN_READ_COILS,
            Self::ReadDiscreteInputs { .. } => FN_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters { .. } => FN_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters { .. } => FN_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil { .. } => FN_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister { .. } => FN_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils { .. } => FN_WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters { .. } => FN_WRITE_MULTIPLE_REGISTERS,
            Self::Diagnostics { .. } => FN_DIAGNOSTICS,
            Self::ReadDeviceIdentification { .. } => FN_ENCAPSULATED_INTERFACE,
            Self::SetDateTime(_) => FN_SET_DATE_TIME,
            Self::RemoteService { .. } => FN_REMOTE_SERVICE,
            Self::JournalCommand { .. } => FN_JOURNAL_COMMAND,
            Self::FileTransfer { .. } => FN_FILE_TRANSFER,
        }
    }

    /// Decode a request payload for the given function code.
    pub fn decode(function: u8, payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let req = match function {
            FN_READ_COILS | FN_READ_DISCRETE_INPUTS => {
                let start = r.read_u16()?;
                let count = r.read_u16()?;
                if count == 0 || count > MAX_READ_COILS {
                    return Err(ErrorCode::IllegalDataValue);
                }
                if function == FN_READ_COILS {
                    Self::ReadCoils { start, count }
                } else {
                    Self::ReadDiscreteInputs { start, count }
                }
            }
            FN_READ_HOLDING_REGISTERS | FN_READ_INPUT_REGISTERS => {
                let start = r.read_u16()?;
                let count = r.read_u16()?;
                if count == 0 || count > MAX_READ_REGISTERS {
                    return Err(ErrorCode::IllegalDataValue);
                }
                if function == FN_READ_HOLDING_REGISTERS {
                    Self::ReadHoldingRegisters { start, count }
                } else {
                    Self::ReadInputRegisters { start, count }
                }
            }
            FN_WRITE_SINGLE_COIL => {
                let addr = r.read_u16()?;
                let value = match r.read_u16()? {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ErrorCode::IllegalDataValue),
                };
                Self::WriteSingleCoil { addr, value }
            }
            FN_WRITE_SINGLE_REGISTER => {
                let addr = r.read_u16()?;
                let value = r.read_u16()?;
                Self::WriteSingleRegister { addr, value }
            }
            FN_WRITE_MULTIPLE_COILS => {
                let start = r.read_u16()?;
                let count = r.read_u16()?;
                let byte_count = r.read_u8()? as usize;
                if count == 0 || count > MAX_WRITE_COILS {
                    return Err(ErrorCode::IllegalDataValue);
                }
                if byte_count != (count as usize).div_ceil(8) {
                    return Err(ErrorCode::InvalidFormat);
                }
                let data = r.read_bytes(byte_count)?.to_vec();
                Self::WriteMultipleCoils { start, count, data }
            }
            FN_WRITE_MULTIPLE_REGISTERS => {
                let start = r.read_u16()?;
                let count = r.read_u16()?;
                let byte_count = r.read_u8()? as usize;
                if count == 0 || count > MAX_WRITE_REGISTERS {
                    return Err(ErrorCode::IllegalDataValue);
                }
                if byte_count != count as usize * 2 {
                    return Err(ErrorCode::InvalidFormat);
                }
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(r.read_u16()?);
                }
                Self::WriteMultipleRegisters { start, values }
            }
            FN_DIAGNOSTICS => {
                let sub = r.read_u16()?;
                let data = r.read_u16()?;
                Self::Diagnostics { sub, data }
            }
            FN_ENCAPSULATED_INTERFACE => {
                if r.read_u8()? != MEI_READ_DEVICE_ID {
                    return Err(ErrorCode::IllegalFunction);
                }
                let device_id = r.read_u8()?;
                let object_id = r.read_u8()?;
                Self::ReadDeviceIdentification { device_id, object_id }
            }
            FN_SET_DATE_TIME => Self::SetDateTime(DateTimeValue {
                hour: r.read_u8()?,
                min: r.read_u8()?,
                sec: r.read_u8()?,
                day: r.read_u8()?,
                mon: r.read_u8()?,
                year: r.read_u8()?,
                century: r.read_u8()?,
            }),
            FN_REMOTE_SERVICE => {
                let byte_count = r.read_u8()? as usize;
                let data = r.read_bytes(byte_count)?.to_vec();
                Self::RemoteService { data }
            }
            FN_JOURNAL_COMMAND => {
                let command = r.read_u16()?;
                let count = r.read_u16()?;
                Self::JournalCommand { command, count }
            }
            FN_FILE_TRANSFER => {
                let file = r.read_u16()?;
                let packet = r.read_u16()?;
                Self::FileTransfer { file, packet }
            }
            _ => return Err(ErrorCode::IllegalFunction),
        };
        r.finish()?;
        Ok(req)
    }

    /// Encode into a fresh PDU.
    pub fn to_pdu(&self) -> Result<Pdu> {
        let mut pdu = Pdu::new(self.function());
        match self {
            Self::ReadCoils { start, count }
            | Self::ReadDiscreteInputs { start, count }
            | Self::ReadHoldingRegisters { start, count }
            | Self::ReadInputRegisters { start, count } => {
                pdu.push_u16(*start)?;
                pdu.push_u16(*count)?;
            }
            Self::WriteSingleCoil { addr, value } => {
                pdu.push_u16(*addr)?;
                pdu.push_u16(if *value { COIL_ON } else { COIL_OFF })?;
            }
            Self::WriteSingleRegister { addr, value } => {
                pdu.push_u16(*addr)?;
                pdu.push_u16(*value)?;
            }
            Self::WriteMultipleCoils { start, count, data } => {
                if data.len() > u8::MAX as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push_u16(*start)?;
                pdu.push_u16(*count)?;
                pdu.push(data.len() as u8)?;
                pdu.extend(data)?;
            }
            Self::WriteMultipleRegisters { start, values } => {
                if values.len() > MAX_WRITE_REGISTERS as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push_u16(*start)?;
                pdu.push_u16(values.len() as u16)?;
                pdu.push((values.len() * 2) as u8)?;
                for v in values {
                    pdu.push_u16(*v)?;
                }
            }
            Self::Diagnostics { sub, data } => {
                pdu.push_u16(*sub)?;
                pdu.push_u16(*data)?;
            }
            Self::ReadDeviceIdentification { device_id, object_id } => {
                pdu.push(MEI_READ_DEVICE_ID)?;
                pdu.push(*device_id)?;
                pdu.push(*object_id)?;
            }
            Self::SetDateTime(dt) => {
                pdu.extend(&[dt.hour, dt.min, dt.sec, dt.day, dt.mon, dt.year, dt.century])?;
            }
            Self::RemoteService { data } => {
                if data.len() > u8::MAX as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push(data.len() as u8)?;
                pdu.extend(data)?;
            }
            Self::JournalCommand { command, count } => {
                pdu.push_u16(*command)?;
                pdu.push_u16(*count)?;
            }
            Self::FileTransfer { file, packet } => {
                pdu.push_u16(*file)?;
                pdu.push_u16(*packet)?;
            }
        }
        Ok(pdu)
    }
}

impl Reply {
    /// Function code this reply goes out under.
    pub fn function(&self) -> u8 {
        match self {
            Self::ReadCoils { .. } => FN_READ_COILS,
            Self::ReadDiscreteInputs { .. } => FN_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters { .. } => FN_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters { .. } => FN_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil { .. } => FN_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister { .. } => FN_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils { .. } => FN_WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters { .. } => FN_WRITE_MULTIPLE_REGISTERS,
            Self::Diagnostics { .. } => FN_DIAGNOSTICS,
            Self::ReadDeviceIdentification(_) => FN_ENCAPSULATED_INTERFACE,
            Self::SetDateTime(_) => FN_SET_DATE_TIME,
            Self::RemoteService { .. } => FN_REMOTE_SERVICE,
            Self::JournalCommand { .. } => FN_JOURNAL_COMMAND,
            Self::FileTransfer(_) => FN_FILE_TRANSFER,
            Self::Exception { function, .. } => function | EXCEPTION_FLAG,
        }
    }

    /// Coil reply from individual bit values.
    pub fn coils_from_bits(bits: &[bool]) -> Self {
        Self::ReadCoils { data: pack_bits(bits) }
    }

    /// Discrete-input reply from individual bit values.
    pub fn discrete_inputs_from_bits(bits: &[bool]) -> Self {
        Self::ReadDiscreteInputs { data: pack_bits(bits) }
    }

    /// Build an exception reply for a request function code. Callers must
    /// pass a wire-class error; internal errors have no wire form.
    pub fn exception(function: u8, code: ErrorCode) -> Result<Self> {
        if !code.is_wire_exception() {
            return Err(ErrorCode::InvalidFormat);
        }
        Ok(Self::Exception { function: function & !EXCEPTION_FLAG, code })
    }

    /// Decode a reply payload for the given function code (client side).
    pub fn decode(function: u8, payload: &[u8]) -> Result<Self> {
        if function & EXCEPTION_FLAG != 0 {
            let mut r = WireReader::new(payload);
            let code = ErrorCode::from_wire(r.read_u8()?);
            r.finish()?;
            return Ok(Self::Exception { function: function & !EXCEPTION_FLAG, code });
        }
        let mut r = WireReader::new(payload);
        let reply = match function {
            FN_READ_COILS | FN_READ_DISCRETE_INPUTS => {
                let byte_count = r.read_u8()? as usize;
                if byte_count > (MAX_READ_COILS as usize).div_ceil(8) {
                    return Err(ErrorCode::PacketTooLong);
                }
                let data = r.read_bytes(byte_count)?.to_vec();
                if function == FN_READ_COILS {
                    Self::ReadCoils { data }
                } else {
                    Self::ReadDiscreteInputs { data }
                }
            }
            FN_READ_HOLDING_REGISTERS | FN_READ_INPUT_REGISTERS => {
                let byte_count = r.read_u8()? as usize;
                if byte_count % 2 != 0 {
                    return Err(ErrorCode::InvalidFormat);
                }
                if byte_count / 2 > MAX_READ_REGISTERS as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                let mut values = Vec::with_capacity(byte_count / 2);
                for _ in 0..byte_count / 2 {
                    values.push(r.read_u16()?);
                }
                if function == FN_READ_HOLDING_REGISTERS {
                    Self::ReadHoldingRegisters { values }
                } else {
                    Self::ReadInputRegisters { values }
                }
            }
            FN_WRITE_SINGLE_COIL => {
                let addr = r.read_u16()?;
                let value = match r.read_u16()? {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(ErrorCode::IllegalDataValue),
                };
                Self::WriteSingleCoil { addr, value }
            }
            FN_WRITE_SINGLE_REGISTER => {
                let addr = r.read_u16()?;
                let value = r.read_u16()?;
                Self::WriteSingleRegister { addr, value }
            }
            FN_WRITE_MULTIPLE_COILS => {
                let start = r.read_u16()?;
                let count = r.read_u16()?;
                Self::WriteMultipleCoils { start, count }
            }
            FN_WRITE_MULTIPLE_REGISTERS => {
                let start = r.read_u16()?;
                let count = r.read_u16()?;
                Self::WriteMultipleRegisters { start, count }
            }
            FN_DIAGNOSTICS => {
                let sub = r.read_u16()?;
                let data = r.read_u16()?;
                Self::Diagnostics { sub, data }
            }
            FN_ENCAPSULATED_INTERFACE => {
                if r.read_u8()? != MEI_READ_DEVICE_ID {
                    return Err(ErrorCode::InvalidFormat);
                }
                let device_id = r.read_u8()?;
                let conformity = r.read_u8()?;
                let more_follows = r.read_u8()?;
                let next_object_id = r.read_u8()?;
                let object_count = r.read_u8()? as usize;
                let mut objects = Vec::with_capacity(object_count.min(32));
                for _ in 0..object_count {
                    let id = r.read_u8()?;
                    let len = r.read_u8()? as usize;
                    objects.push(IdObject { id, value: r.read_bytes(len)?.to_vec() });
                }
                Self::ReadDeviceIdentification(DeviceIdentification {
                    device_id,
                    conformity,
                    more_follows,
                    next_object_id,
                    objects,
                })
            }
            FN_SET_DATE_TIME => Self::SetDateTime(DateTimeValue {
                hour: r.read_u8()?,
                min: r.read_u8()?,
                sec: r.read_u8()?,
                day: r.read_u8()?,
                mon: r.read_u8()?,
                year: r.read_u8()?,
                century: r.read_u8()?,
            }),
            FN_REMOTE_SERVICE => {
                let byte_count = r.read_u8()? as usize;
                Self::RemoteService { data: r.read_bytes(byte_count)?.to_vec() }
            }
            FN_JOURNAL_COMMAND => {
                let byte_count = r.read_u8()? as usize;
                Self::JournalCommand { data: r.read_bytes(byte_count)?.to_vec() }
            }
            FN_FILE_TRANSFER => {
                let byte_count = r.read_u8()? as usize;
                let file = r.read_u16()?;
                let num_packets = r.read_u16()?;
                let packet = r.read_u16()?;
                let data_len = r.read_u8()? as usize;
                if byte_count != data_len + 7 {
                    return Err(ErrorCode::InvalidFormat);
                }
                let data = r.read_bytes(data_len)?.to_vec();
                Self::FileTransfer(FilePacket { file, num_packets, packet, data })
            }
            _ => return Err(ErrorCode::IllegalFunction),
        };
        r.finish()?;
        Ok(reply)
    }

    /// Encode into a fresh PDU. Fails with `PacketTooLong` when variable
    /// content would not fit the 253-byte bound.
    pub fn to_pdu(&self) -> Result<Pdu> {
        let mut pdu = Pdu::new(self.function());
        match self {
            Self::ReadCoils { data } | Self::ReadDiscreteInputs { data } => {
                if data.len() > u8::MAX as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push(data.len() as u8)?;
                pdu.extend(data)?;
            }
            Self::ReadHoldingRegisters { values } | Self::ReadInputRegisters { values } => {
                if values.len() > MAX_READ_REGISTERS as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push((values.len() * 2) as u8)?;
                for v in values {
                    pdu.push_u16(*v)?;
                }
            }
            Self::WriteSingleCoil { addr, value } => {
                pdu.push_u16(*addr)?;
                pdu.push_u16(if *value { COIL_ON } else { COIL_OFF })?;
            }
            Self::WriteSingleRegister { addr, value } => {
                pdu.push_u16(*addr)?;
                pdu.push_u16(*value)?;
            }
            Self::WriteMultipleCoils { start, count }
            | Self::WriteMultipleRegisters { start, count } => {
                pdu.push_u16(*start)?;
                pdu.push_u16(*count)?;
            }
            Self::Diagnostics { sub, data } => {
                pdu.push_u16(*sub)?;
                pdu.push_u16(*data)?;
            }
            Self::ReadDeviceIdentification(body) => {
                if body.objects.len() > u8::MAX as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push(MEI_READ_DEVICE_ID)?;
                pdu.push(body.device_id)?;
                pdu.push(body.conformity)?;
                pdu.push(body.more_follows)?;
                pdu.push(body.next_object_id)?;
                pdu.push(body.objects.len() as u8)?;
                for obj in &body.objects {
                    if obj.value.len() > u8::MAX as usize {
                        return Err(ErrorCode::PacketTooLong);
                    }
                    pdu.push(obj.id)?;
                    pdu.push(obj.value.len() as u8)?;
                    pdu.extend(&obj.value)?;
                }
            }
            Self::SetDateTime(dt) => {
                pdu.extend(&[dt.hour, dt.min, dt.sec, dt.day, dt.mon, dt.year, dt.century])?;
            }
            Self::RemoteService { data } | Self::JournalCommand { data } => {
                if data.len() > u8::MAX as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push(data.len() as u8)?;
                pdu.extend(data)?;
            }
            Self::FileTransfer(pkt) => {
                if pkt.data.len() + 7 > u8::MAX as usize {
                    return Err(ErrorCode::PacketTooLong);
                }
                pdu.push((pkt.data.len() + 7) as u8)?;
                pdu.push_u16(pkt.file)?;
                pdu.push_u16(pkt.num_packets)?;
                pdu.push_u16(pkt.packet)?;
                pdu.push(pkt.data.len() as u8)?;
                pdu.extend(&pkt.data)?;
            }
            Self::Exception { code, .. } => {
                // exception() guarantees a wire code exists
                pdu.push(code.wire_code().ok_or(ErrorCode::InvalidFormat)?)?;
            }
        }
        Ok(pdu)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn round_trip_request(req: Request) {
        let pdu = req.to_pdu().unwrap();
        let decoded = Request::decode(pdu.function(), pdu.payload()).unwrap();
        assert_eq!(decoded, req);
    }

    fn round_trip_reply(reply: Reply) {
        let pdu = reply.to_pdu().unwrap();
        let decoded = Reply::decode(pdu.function(), pdu.payload()).unwrap();
        assert_eq!(decoded, reply);
    }

    // ===== Round trips =====

    #[test]
    fn test_request_round_trips() {
        round_trip_request(Request::ReadCoils { start: 0x0013, count: 19 });
        round_trip_request(Request::ReadDiscreteInputs { start: 0, count: 2000 });
        round_trip_request(Request::ReadHoldingRegisters { start: 0x006B, count: 125 });
        round_trip_request(Request::ReadInputRegisters { start: 8, count: 1 });
        round_trip_request(Request::WriteSingleCoil { addr: 0x00AC, value: true });
        round_trip_request(Request::WriteSingleRegister { addr: 1, value: 0x0003 });
        round_trip_request(Request::WriteMultipleCoils {
            start: 0x0013,
            count: 10,
            data: vec![0xCD, 0x01],
        });
        round_trip_request(Request::WriteMultipleRegisters {
            start: 1,
            values: vec![0x000A, 0x0102],
        });
        round_trip_request(Request::Diagnostics { sub: DIAG_ECHO, data: 0xA537 });
        round_trip_request(Request::ReadDeviceIdentification { device_id: 1, object_id: 0 });
        round_trip_request(Request::SetDateTime(DateTimeValue {
            hour: 23,
            min: 59,
            sec: 58,
            day: 31,
            mon: 12,
            year: 99,
            century: 20,
        }));
        round_trip_request(Request::RemoteService { data: vec![1, 2, 3, 4] });
        round_trip_request(Request::JournalCommand { command: 2, count: 10 });
        round_trip_request(Request::FileTransfer { file: 7, packet: 3 });
    }

    #[test]
    fn test_reply_round_trips() {
        round_trip_reply(Reply::ReadCoils { data: vec![0xCD, 0x6B, 0x05] });
        round_trip_reply(Reply::ReadDiscreteInputs { data: vec![0xAC] });
        round_trip_reply(Reply::ReadHoldingRegisters { values: vec![10, 20, 30] });
        round_trip_reply(Reply::ReadInputRegisters { values: vec![0xFFFF] });
        round_trip_reply(Reply::WriteSingleCoil { addr: 5, value: true });
        round_trip_reply(Reply::WriteSingleRegister { addr: 1, value: 3 });
        round_trip_reply(Reply::WriteMultipleCoils { start: 0x0013, count: 10 });
        round_trip_reply(Reply::WriteMultipleRegisters { start: 1, count: 2 });
        round_trip_reply(Reply::Diagnostics { sub: DIAG_BUS_MESSAGE_COUNT, data: 42 });
        round_trip_reply(Reply::ReadDeviceIdentification(DeviceIdentification {
            device_id: 1,
            conformity: 0x01,
            more_follows: 0,
            next_object_id: 0,
            objects: vec![
                IdObject::text(0, "ACME"),
                IdObject::text(1, "FB-100"),
                IdObject::text(2, "v2.1"),
            ],
        }));
        round_trip_reply(Reply::SetDateTime(DateTimeValue {
            hour: 12,
            min: 0,
            sec: 0,
            day: 1,
            mon: 6,
            year: 24,
            century: 20,
        }));
        round_trip_reply(Reply::RemoteService { data: vec![0xDE, 0xAD] });
        round_trip_reply(Reply::JournalCommand { data: vec![0, 1] });
        round_trip_reply(Reply::FileTransfer(FilePacket {
            file: 1,
            num_packets: 4,
            packet: 0,
            data: vec![9; 64],
        }));
        round_trip_reply(Reply::Exception {
            function: FN_READ_COILS,
            code: ErrorCode::IllegalDataAddress,
        });
    }

    // ===== Count bounds =====

    #[test]
    fn test_oversize_counts_rejected_before_allocation() {
        // 2001 coils
        let err = Request::decode(FN_READ_COILS, &[0x00, 0x00, 0x07, 0xD1]).unwrap_err();
        assert_eq!(err, ErrorCode::IllegalDataValue);
        // 126 registers
        let err = Request::decode(FN_READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x7E])
            .unwrap_err();
        assert_eq!(err, ErrorCode::IllegalDataValue);
        // zero count
        let err = Request::decode(FN_READ_INPUT_REGISTERS, &[0x00, 0x00, 0x00, 0x00])
            .unwrap_err();
        assert_eq!(err, ErrorCode::IllegalDataValue);
    }

    #[test]
    fn test_write_multiple_byte_count_must_match() {
        // count=10 needs 2 data bytes, header claims 3
        let err = Request::decode(
            FN_WRITE_MULTIPLE_COILS,
            &[0x00, 0x13, 0x00, 0x0A, 0x03, 0xCD, 0x01, 0x00],
        )
        .unwrap_err();
        assert_eq!(err, ErrorCode::InvalidFormat);

        // count=2 registers needs byte count 4, header claims 2
        let err = Request::decode(
            FN_WRITE_MULTIPLE_REGISTERS,
            &[0x00, 0x01, 0x00, 0x02, 0x02, 0x00, 0x0A],
        )
        .unwrap_err();
        assert_eq!(err, ErrorCode::InvalidFormat);
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let err = Request::decode(FN_READ_COILS, &[0x00, 0x00, 0x00, 0x01, 0xFF]).unwrap_err();
        assert_eq!(err, ErrorCode::InvalidFormat);
    }

    #[test]
    fn test_write_single_coil_value_must_be_on_or_off() {
        let err = Request::decode(FN_WRITE_SINGLE_COIL, &[0x00, 0x05, 0x12, 0x34]).unwrap_err();
        assert_eq!(err, ErrorCode::IllegalDataValue);
    }

    #[test]
    fn test_unknown_function_code() {
        assert_eq!(
            Request::decode(0x51, &[]).unwrap_err(),
            ErrorCode::IllegalFunction
        );
        assert_eq!(request_body_len(0x51), None);
    }

    #[test]
    fn test_unknown_mei_type_rejected() {
        let err = Request::decode(FN_ENCAPSULATED_INTERFACE, &[0x0D, 0x01, 0x00]).unwrap_err();
        assert_eq!(err, ErrorCode::IllegalFunction);
    }

    // ===== Bit packing =====

    #[test]
    fn test_pack_bits_is_little_endian_per_byte() {
        // first requested coil lands in bit 0 of byte 0
        let data = pack_bits(&[true, false, true]);
        assert_eq!(data, vec![0b0000_0101]);
        assert!(bit_at(&data, 0));
        assert!(!bit_at(&data, 1));
        assert!(bit_at(&data, 2));
        assert!(!bit_at(&data, 3));
    }

    #[test]
    fn test_packed_length_is_ceil_count_over_8() {
        for count in [1usize, 7, 8, 9, 16, 17, 2000] {
            let bits = vec![true; count];
            assert_eq!(pack_bits(&bits).len(), count.div_ceil(8), "count={count}");
        }
    }

    #[test]
    fn test_every_packed_bit_matches_source() {
        let bits: Vec<bool> = (0..37).map(|n| n % 3 == 0).collect();
        let data = pack_bits(&bits);
        for (n, &b) in bits.iter().enumerate() {
            assert_eq!(bit_at(&data, n), b, "bit {n}");
        }
    }

    // ===== Length tables =====

    #[test]
    fn test_body_len_table_covers_all_functions() {
        assert_eq!(request_body_len(FN_READ_COILS), Some(BodyLen::Fixed(4)));
        assert_eq!(request_body_len(FN_SET_DATE_TIME), Some(BodyLen::Fixed(7)));
        assert_eq!(
            request_body_len(FN_ENCAPSULATED_INTERFACE),
            Some(BodyLen::Fixed(3))
        );
        assert_eq!(
            request_body_len(FN_WRITE_MULTIPLE_COILS),
            Some(BodyLen::Variable { head: 5 })
        );
        assert_eq!(
            request_body_len(FN_REMOTE_SERVICE),
            Some(BodyLen::Variable { head: 1 })
        );
    }

    #[test]
    fn test_tail_len_from_declared_byte_count() {
        let head = [0x00, 0x13, 0x00, 0x0A, 0x02];
        assert_eq!(request_tail_len(FN_WRITE_MULTIPLE_COILS, &head).unwrap(), 2);
        assert_eq!(request_tail_len(FN_REMOTE_SERVICE, &[0x10]).unwrap(), 16);
        // fixed-shape functions have no tail
        assert_eq!(request_tail_len(FN_READ_COILS, &[0; 4]).unwrap(), 0);
    }

    #[test]
    fn test_tail_len_bounded_by_pdu() {
        // byte count 0xFF would push the body past the PDU limit
        let head = [0x00, 0x00, 0x07, 0xB0, 0xFF];
        assert_eq!(
            request_tail_len(FN_WRITE_MULTIPLE_COILS, &head).unwrap_err(),
            ErrorCode::PacketTooLong
        );
    }

    // ===== Encoding details =====

    #[test]
    fn test_read_registers_reply_layout() {
        let reply = Reply::ReadHoldingRegisters { values: vec![10, 20, 30] };
        let pdu = reply.to_pdu().unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x03, 0x06, 0x00, 0x0A, 0x00, 0x14, 0x00, 0x1E]
        );
    }

    #[test]
    fn test_write_single_coil_echo_layout() {
        let pdu = Reply::WriteSingleCoil { addr: 5, value: true }.to_pdu().unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0x05, 0xFF, 0x00]);
    }

    #[test]
    fn test_exception_reply_layout() {
        let reply = Reply::exception(FN_READ_HOLDING_REGISTERS, ErrorCode::IllegalDataAddress)
            .unwrap();
        let pdu = reply.to_pdu().unwrap();
        assert_eq!(pdu.as_slice(), &[0x83, 0x02]);
        assert!(pdu.is_exception());
    }

    #[test]
    fn test_exception_refuses_internal_errors() {
        assert!(Reply::exception(FN_READ_COILS, ErrorCode::BadChecksum).is_err());
    }

    #[test]
    fn test_device_identification_too_big_for_pdu() {
        let body = DeviceIdentification {
            device_id: 1,
            conformity: 1,
            more_follows: 0,
            next_object_id: 0,
            objects: (0..3)
                .map(|id| IdObject { id, value: vec![b'x'; 100] })
                .collect(),
        };
        assert_eq!(
            Reply::ReadDeviceIdentification(body).to_pdu().unwrap_err(),
            ErrorCode::PacketTooLong
        );
    }

    #[test]
    fn test_file_transfer_reply_layout() {
        let pdu = Reply::FileTransfer(FilePacket {
            file: 0x0102,
            num_packets: 2,
            packet: 1,
            data: vec![0xAB, 0xCD],
        })
        .to_pdu()
        .unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x66, 0x09, 0x01, 0x02, 0x00, 0x02, 0x00, 0x01, 0x02, 0xAB, 0xCD]
        );
    }
}
