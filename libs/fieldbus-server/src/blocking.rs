//! Simplified blocking adapter for embedded and test use.
//!
//! Serves exactly one connection at a time with plain blocking reads
//! bounded by the idle timeout. Shares the dispatcher and the codec's
//! length tables with the event-loop server but none of its machinery;
//! the primary delivery target remains `ConnectionListener`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use fieldbus_proto::constants::MBAP_HEADER_LEN;
use fieldbus_proto::crc::{crc16, crc_from_wire};
use fieldbus_proto::message::{request_body_len, request_tail_len, BodyLen};
use fieldbus_proto::{encode_rtu, encode_tcp, ErrorCode, MbapHeader, Pdu};
use tracing::{debug, info};

use crate::config::{AddrClass, Framing, ServerConfig};
use crate::dispatcher::{Outcome, ProtocolDispatcher};
use crate::error::ServerError;
use crate::registry::HandlerRegistry;
use crate::stats::{Counters, StatScope};

pub struct BlockingServer {
    config: ServerConfig,
    dispatcher: ProtocolDispatcher,
    counters: Arc<Counters>,
    totals: Counters,
}

enum Step {
    Reply(Vec<u8>),
    Silent,
    Done,
}

impl BlockingServer {
    pub fn new(config: ServerConfig, registry: HandlerRegistry) -> Self {
        let reply_timeout = config.reply_timeout();
        Self {
            config,
            dispatcher: ProtocolDispatcher::new(Arc::new(registry), reply_timeout),
            counters: Arc::new(Counters::new()),
            totals: Counters::new(),
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    fn scope(&self) -> StatScope<'_> {
        StatScope { session: &self.counters, server: &self.totals }
    }

    /// Serve one connected peer until it closes or goes idle.
    pub fn serve(&self, stream: &mut TcpStream) -> Result<(), ServerError> {
        stream.set_read_timeout(Some(self.config.idle_timeout()))?;
        stream.set_nodelay(true)?;
        info!("blocking server serving {:?}", stream.peer_addr().ok());
        loop {
            match self.step(stream)? {
                Step::Done => return Ok(()),
                Step::Silent => {}
                Step::Reply(bytes) => {
                    stream.write_all(&bytes)?;
                    if let Some(pause) = self.config.after_reply_pause() {
                        std::thread::sleep(pause);
                    }
                }
            }
        }
    }

    /// Read and process one frame.
    fn step(&self, stream: &mut TcpStream) -> Result<Step, ServerError> {
        match self.config.framing {
            Framing::Tcp => self.step_tcp(stream),
            Framing::Rtu => self.step_rtu(stream),
        }
    }

    fn step_tcp(&self, r: &mut TcpStream) -> Result<Step, ServerError> {
        let mut raw = [0u8; MBAP_HEADER_LEN];
        if !read_or_done(r, &mut raw)? {
            return Ok(Step::Done);
        }
        let header = match MbapHeader::parse(&raw) {
            Ok(h) => h,
            Err(code) => {
                self.scope().internal(code);
                return Ok(Step::Done);
            }
        };
        let mut body = vec![0u8; header.pdu_len()];
        if !read_or_done(r, &mut body)? {
            return Ok(Step::Done);
        }
        let pdu = match Pdu::from_slice(&body) {
            Ok(p) => p,
            Err(code) => {
                self.scope().internal(code);
                return Ok(Step::Done);
            }
        };
        Ok(match self.dispatcher.process(&pdu, self.scope()) {
            Outcome::Send(out) => {
                Step::Reply(encode_tcp(header.transaction_id, header.unit, &out))
            }
            Outcome::Drop(_) => Step::Silent,
        })
    }

    fn step_rtu(&self, r: &mut TcpStream) -> Result<Step, ServerError> {
        let mut head = [0u8; 2];
        if !read_or_done(r, &mut head)? {
            return Ok(Step::Done);
        }
        let (addr, function) = (head[0], head[1]);

        let shape = match request_body_len(function) {
            Some(shape) => shape,
            None => {
                self.scope().internal(ErrorCode::InvalidFormat);
                return Ok(Step::Done);
            }
        };
        let mut body = match shape {
            BodyLen::Fixed(n) => vec![0u8; n],
            BodyLen::Variable { head: h } => vec![0u8; h],
        };
        if !read_or_done(r, &mut body)? {
            return Ok(Step::Done);
        }
        if let BodyLen::Variable { head: h } = shape {
            match request_tail_len(function, &body) {
                Ok(tail) => {
                    body.resize(h + tail, 0);
                    if !read_or_done(r, &mut body[h..])? {
                        return Ok(Step::Done);
                    }
                }
                Err(code) => {
                    let declared = body[h - 1] as usize;
                    let mut discard = vec![0u8; declared + 2];
                    if !read_or_done(r, &mut discard)? {
                        return Ok(Step::Done);
                    }
                    self.scope().internal(code);
                    return Ok(Step::Silent);
                }
            }
        }

        let mut crc = [0u8; 2];
        if !read_or_done(r, &mut crc)? {
            return Ok(Step::Done);
        }

        if self.config.crc_check {
            let mut covered = Vec::with_capacity(2 + body.len());
            covered.push(addr);
            covered.push(function);
            covered.extend_from_slice(&body);
            if crc16(&covered) != crc_from_wire(crc[0], crc[1]) {
                debug!("bad checksum on fc=0x{function:02X}");
                self.scope().internal(ErrorCode::BadChecksum);
                return Ok(Step::Silent);
            }
        }

        match self.config.classify_addr(addr) {
            AddrClass::Foreign => {
                self.scope().internal(ErrorCode::WrongNodeAddress);
                return Ok(Step::Silent);
            }
            AddrClass::Broadcast => {
                let mut pdu_bytes = vec![function];
                pdu_bytes.extend_from_slice(&body);
                if let Ok(pdu) = Pdu::from_slice(&pdu_bytes) {
                    let _ = self.dispatcher.process(&pdu, self.scope());
                }
                return Ok(Step::Silent);
            }
            AddrClass::Unicast => {}
        }

        let mut pdu_bytes = vec![function];
        pdu_bytes.extend_from_slice(&body);
        let pdu = match Pdu::from_slice(&pdu_bytes) {
            Ok(p) => p,
            Err(code) => {
                self.scope().internal(code);
                return Ok(Step::Silent);
            }
        };
        Ok(match self.dispatcher.process(&pdu, self.scope()) {
            Outcome::Send(out) => Step::Reply(encode_rtu(addr, &out)),
            Outcome::Drop(_) => Step::Silent,
        })
    }
}

/// `read_exact` that folds EOF and read-timeout into "we're done".
fn read_or_done(r: &mut impl Read, buf: &mut [u8]) -> Result<bool, ServerError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
