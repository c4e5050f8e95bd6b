//! In-memory register bank and its wiring into the handler registry.
//!
//! Backs every served function code: bit and word tables, a settable
//! wall clock, device-identification objects, a journal of recorded
//! error words and downloadable file images chunked for FC 0x66.

use std::collections::HashMap;
use std::sync::Arc;

use fieldbus_proto::constants::*;
use fieldbus_proto::{
    DateTimeValue, DeviceIdentification, ErrorCode, FilePacket, IdObject, Reply, Request,
};
use fieldbus_server::HandlerRegistry;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

/// Payload bytes per file-transfer packet.
const FILE_CHUNK: usize = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
    pub vendor: String,
    pub product: String,
    pub version: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            coils: 1024,
            discrete_inputs: 1024,
            holding_registers: 4096,
            input_registers: 4096,
            vendor: "fieldbus".into(),
            product: "fieldbusd".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

pub struct RegisterBank {
    coils: RwLock<Vec<bool>>,
    discrete: RwLock<Vec<bool>>,
    holding: RwLock<Vec<u16>>,
    input: RwLock<Vec<u16>>,
    clock: RwLock<Option<DateTimeValue>>,
    journal: RwLock<Vec<u16>>,
    files: RwLock<HashMap<u16, Vec<u8>>>,
    identity: Vec<IdObject>,
}

impl RegisterBank {
    pub fn new(config: &BankConfig) -> Self {
        Self {
            coils: RwLock::new(vec![false; config.coils]),
            discrete: RwLock::new(vec![false; config.discrete_inputs]),
            holding: RwLock::new(vec![0; config.holding_registers]),
            input: RwLock::new(vec![0; config.input_registers]),
            clock: RwLock::new(None),
            journal: RwLock::new(Vec::new()),
            files: RwLock::new(HashMap::new()),
            identity: vec![
                IdObject::text(0x00, &config.vendor),
                IdObject::text(0x01, &config.product),
                IdObject::text(0x02, &config.version),
            ],
        }
    }

    // test and tooling access

    pub fn set_discrete_input(&self, addr: u16, value: bool) -> Result<(), ErrorCode> {
        let mut table = self.discrete.write();
        let slot = table
            .get_mut(addr as usize)
            .ok_or(ErrorCode::IllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    pub fn set_input_register(&self, addr: u16, value: u16) -> Result<(), ErrorCode> {
        let mut table = self.input.write();
        let slot = table
            .get_mut(addr as usize)
            .ok_or(ErrorCode::IllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    pub fn record_journal_entry(&self, code: u16) {
        self.journal.write().push(code);
    }

    pub fn store_file(&self, number: u16, image: Vec<u8>) {
        self.files.write().insert(number, image);
    }

    pub fn clock(&self) -> Option<DateTimeValue> {
        *self.clock.read()
    }

    fn read_bits(table: &RwLock<Vec<bool>>, start: u16, count: u16) -> Result<Reply, ErrorCode> {
        let table = table.read();
        let end = start as usize + count as usize;
        if end > table.len() {
            return Err(ErrorCode::IllegalDataAddress);
        }
        Ok(Reply::coils_from_bits(&table[start as usize..end]))
    }

    fn read_words(
        table: &RwLock<Vec<u16>>,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ErrorCode> {
        let table = table.read();
        let end = start as usize + count as usize;
        if end > table.len() {
            return Err(ErrorCode::IllegalDataAddress);
        }
        Ok(table[start as usize..end].to_vec())
    }

    fn device_identification(&self, object_id: u8) -> Result<Reply, ErrorCode> {
        let from = self
            .identity
            .iter()
            .position(|obj| obj.id == object_id)
            .ok_or(ErrorCode::IllegalDataAddress)?;
        Ok(Reply::ReadDeviceIdentification(DeviceIdentification {
            device_id: 0x01,
            conformity: 0x01,
            more_follows: 0,
            next_object_id: 0,
            objects: self.identity[from..].to_vec(),
        }))
    }

    fn file_packet(&self, file: u16, packet: u16) -> Result<Reply, ErrorCode> {
        let files = self.files.read();
        let image = files.get(&file).ok_or(ErrorCode::IllegalDataAddress)?;
        let num_packets = image.len().div_ceil(FILE_CHUNK).max(1) as u16;
        if packet >= num_packets {
            return Err(ErrorCode::IllegalDataAddress);
        }
        let offset = packet as usize * FILE_CHUNK;
        let chunk = &image[offset..(offset + FILE_CHUNK).min(image.len())];
        Ok(Reply::FileTransfer(FilePacket {
            file,
            num_packets,
            packet,
            data: chunk.to_vec(),
        }))
    }

    fn journal_reply(&self, command: u16, count: u16) -> Result<Reply, ErrorCode> {
        match command {
            // acknowledge
            0 => Ok(Reply::JournalCommand { data: vec![0, 0] }),
            // read the newest `count` recorded words
            1 => {
                let journal = self.journal.read();
                let take = (count as usize).min(journal.len()).min(MAX_PDU_SIZE / 2 - 1);
                let mut data = Vec::with_capacity(take * 2);
                for word in journal.iter().rev().take(take) {
                    data.extend_from_slice(&word.to_be_bytes());
                }
                Ok(Reply::JournalCommand { data })
            }
            // clear
            2 => {
                self.journal.write().clear();
                Ok(Reply::JournalCommand { data: vec![0, 0] })
            }
            _ => Err(ErrorCode::IllegalDataValue),
        }
    }

    fn set_clock(&self, dt: DateTimeValue) -> Result<Reply, ErrorCode> {
        let valid = dt.hour < 24
            && dt.min < 60
            && dt.sec < 60
            && (1..=31).contains(&dt.day)
            && (1..=12).contains(&dt.mon)
            && dt.year < 100;
        if !valid {
            return Err(ErrorCode::IllegalDataValue);
        }
        *self.clock.write() = Some(dt);
        info!(
            "clock set to {:02}{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
            dt.century, dt.year, dt.mon, dt.day, dt.hour, dt.min, dt.sec
        );
        Ok(Reply::SetDateTime(dt))
    }

    /// Register a handler for every function code the bank serves.
    pub fn install(self: &Arc<Self>, registry: &mut HandlerRegistry) {
        let bank = Arc::clone(self);
        registry.register(FN_READ_COILS, move |req| match req {
            Request::ReadCoils { start, count } => {
                RegisterBank::read_bits(&bank.coils, *start, *count)
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_READ_DISCRETE_INPUTS, move |req| match req {
            Request::ReadDiscreteInputs { start, count } => {
                RegisterBank::read_bits(&bank.discrete, *start, *count).map(|reply| {
                    match reply {
                        Reply::ReadCoils { data } => Reply::ReadDiscreteInputs { data },
                        other => other,
                    }
                })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_READ_HOLDING_REGISTERS, move |req| match req {
            Request::ReadHoldingRegisters { start, count } => {
                RegisterBank::read_words(&bank.holding, *start, *count)
                    .map(|values| Reply::ReadHoldingRegisters { values })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_READ_INPUT_REGISTERS, move |req| match req {
            Request::ReadInputRegisters { start, count } => {
                RegisterBank::read_words(&bank.input, *start, *count)
                    .map(|values| Reply::ReadInputRegisters { values })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_WRITE_SINGLE_COIL, move |req| match req {
            Request::WriteSingleCoil { addr, value } => {
                let mut coils = bank.coils.write();
                let slot = coils
                    .get_mut(*addr as usize)
                    .ok_or(ErrorCode::IllegalDataAddress)?;
                *slot = *value;
                Ok(Reply::WriteSingleCoil { addr: *addr, value: *value })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_WRITE_SINGLE_REGISTER, move |req| match req {
            Request::WriteSingleRegister { addr, value } => {
                let mut holding = bank.holding.write();
                let slot = holding
                    .get_mut(*addr as usize)
                    .ok_or(ErrorCode::IllegalDataAddress)?;
                *slot = *value;
                Ok(Reply::WriteSingleRegister { addr: *addr, value: *value })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_WRITE_MULTIPLE_COILS, move |req| match req {
            Request::WriteMultipleCoils { start, count, data } => {
                let mut coils = bank.coils.write();
                let end = *start as usize + *count as usize;
                if end > coils.len() {
                    return Err(ErrorCode::IllegalDataAddress);
                }
                for n in 0..*count as usize {
                    coils[*start as usize + n] = fieldbus_proto::bit_at(data, n);
                }
                Ok(Reply::WriteMultipleCoils { start: *start, count: *count })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_WRITE_MULTIPLE_REGISTERS, move |req| match req {
            Request::WriteMultipleRegisters { start, values } => {
                let mut holding = bank.holding.write();
                let end = *start as usize + values.len();
                if end > holding.len() {
                    return Err(ErrorCode::IllegalDataAddress);
                }
                holding[*start as usize..end].copy_from_slice(values);
                Ok(Reply::WriteMultipleRegisters {
                    start: *start,
                    count: values.len() as u16,
                })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_ENCAPSULATED_INTERFACE, move |req| match req {
            Request::ReadDeviceIdentification { object_id, .. } => {
                bank.device_identification(*object_id)
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_SET_DATE_TIME, move |req| match req {
            Request::SetDateTime(dt) => bank.set_clock(*dt),
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        registry.register(FN_REMOTE_SERVICE, |req| match req {
            // no remote services wired up; echo keeps link probes happy
            Request::RemoteService { data } => Ok(Reply::RemoteService { data: data.clone() }),
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_JOURNAL_COMMAND, move |req| match req {
            Request::JournalCommand { command, count } => bank.journal_reply(*command, *count),
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let bank = Arc::clone(self);
        registry.register(FN_FILE_TRANSFER, move |req| match req {
            Request::FileTransfer { file, packet } => bank.file_packet(*file, *packet),
            _ => Err(ErrorCode::ServerDeviceFailure),
        });
    }
}
