//! Per-connection transport engine.
//!
//! One task per accepted connection: reassemble frames from the byte
//! stream (MBAP or serial framing), filter the node address once at
//! frame-accept time, drive the dispatcher, and drain the FIFO output
//! queue. Exactly one request is in flight; the next frame is not read
//! until the previous reply finished queueing and writing.
//!
//! Teardown is idempotent: cancellation, idle timeout and fatal I/O all
//! funnel into the same exit path, which fires the finalization callback
//! exactly once so the listener can drop its handle.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use fieldbus_proto::constants::MBAP_HEADER_LEN;
use fieldbus_proto::crc::{crc16, crc_from_wire};
use fieldbus_proto::message::{request_body_len, request_tail_len, BodyLen};
use fieldbus_proto::{encode_rtu, encode_tcp, ErrorCode, MbapHeader, Pdu};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{AddrClass, Framing, ServerConfig};
use crate::dispatcher::{Outcome, ProtocolDispatcher};
use crate::stats::{Counters, ServerStats, StatScope};

/// A fully reassembled inbound frame.
#[derive(Debug)]
enum Inbound {
    Tcp { transaction_id: u16, unit: u8, pdu: Pdu },
    Rtu { addr: u8, pdu: Pdu },
}

/// Result of one frame-read attempt.
enum ReadOutcome {
    Frame(Inbound),
    /// Damaged frame, already counted; the stream is still in sync.
    Skip,
    /// Closed, desynchronized or errored stream; tear the session down.
    Fatal,
}

pub type FinalizeFn = Box<dyn FnOnce(u64) + Send + Sync>;

pub struct TransportSession {
    id: u64,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    dispatcher: Arc<ProtocolDispatcher>,
    counters: Arc<Counters>,
    server_stats: Arc<ServerStats>,
    cancel: CancellationToken,
    output: VecDeque<Vec<u8>>,
    on_close: Option<FinalizeFn>,
}

impl TransportSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
        dispatcher: Arc<ProtocolDispatcher>,
        server_stats: Arc<ServerStats>,
        cancel: CancellationToken,
        on_close: FinalizeFn,
    ) -> Self {
        Self {
            id,
            peer,
            config,
            dispatcher,
            counters: Arc::new(Counters::new()),
            server_stats,
            cancel,
            output: VecDeque::new(),
            on_close: Some(on_close),
        }
    }

    /// This session's own counters, for observation from outside.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    fn scope(&self) -> StatScope<'_> {
        StatScope { session: &self.counters, server: &self.server_stats.counters }
    }

    /// Drive the session until disconnect, idle timeout or cancellation.
    pub async fn run(mut self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("session {}: set_nodelay failed: {e}", self.id);
        }
        let (mut rd, mut wr) = stream.into_split();
        info!("session {} open, peer {}", self.id, self.peer);

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("session {} cancelled", self.id);
                    break;
                }
                read = tokio::time::timeout(
                    self.config.idle_timeout(),
                    self.read_frame(&mut rd),
                ) => match read {
                    Err(_) => {
                        info!("session {} idle timeout", self.id);
                        break;
                    }
                    Ok(outcome) => outcome,
                },
            };

            match outcome {
                ReadOutcome::Fatal => break,
                ReadOutcome::Skip => continue,
                ReadOutcome::Frame(frame) => {
                    if self.exchange(frame, &mut wr).await.is_err() {
                        warn!("session {} write failed", self.id);
                        break;
                    }
                }
            }
        }

        self.finish();
    }

    /// Decode, dispatch and answer one frame.
    async fn exchange(
        &mut self,
        frame: Inbound,
        wr: &mut OwnedWriteHalf,
    ) -> std::io::Result<()> {
        let reply = match frame {
            Inbound::Tcp { transaction_id, unit, pdu } => {
                // node address is implicit on TCP, the unit id just echoes
                match self.dispatcher.process(&pdu, self.scope()) {
                    Outcome::Send(out) => Some(encode_tcp(transaction_id, unit, &out)),
                    Outcome::Drop(code) => {
                        trace!("session {} dropped frame: {code}", self.id);
                        None
                    }
                }
            }
            Inbound::Rtu { addr, pdu } => match self.config.classify_addr(addr) {
                AddrClass::Foreign => {
                    debug!("session {} frame for node {addr}, not ours", self.id);
                    self.scope().internal(ErrorCode::WrongNodeAddress);
                    None
                }
                AddrClass::Broadcast => {
                    // processed for its side effects, never answered
                    if let Outcome::Send(_) = self.dispatcher.process(&pdu, self.scope()) {
                        trace!("session {} broadcast reply suppressed", self.id);
                    }
                    None
                }
                AddrClass::Unicast => match self.dispatcher.process(&pdu, self.scope()) {
                    Outcome::Send(out) => Some(encode_rtu(addr, &out)),
                    Outcome::Drop(code) => {
                        trace!("session {} dropped frame: {code}", self.id);
                        None
                    }
                },
            },
        };

        if let Some(bytes) = reply {
            self.output.push_back(bytes);
            self.flush_output(wr).await?;
            if let Some(pause) = self.config.after_reply_pause() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    /// Drain the output queue in FIFO order.
    async fn flush_output(&mut self, wr: &mut OwnedWriteHalf) -> std::io::Result<()> {
        while let Some(bytes) = self.output.front() {
            wr.write_all(bytes).await?;
            trace!("session {} TX: {}B", self.id, bytes.len());
            self.output.pop_front();
        }
        wr.flush().await
    }

    async fn read_frame(&self, rd: &mut OwnedReadHalf) -> ReadOutcome {
        match self.config.framing {
            Framing::Tcp => self.read_tcp_frame(rd).await,
            Framing::Rtu => self.read_rtu_frame(rd).await,
        }
    }

    /// MBAP: fixed 7-byte header bounds the body read.
    async fn read_tcp_frame(&self, rd: &mut OwnedReadHalf) -> ReadOutcome {
        let mut raw = [0u8; MBAP_HEADER_LEN];
        if rd.read_exact(&mut raw).await.is_err() {
            return ReadOutcome::Fatal;
        }
        let header = match MbapHeader::parse(&raw) {
            Ok(h) => h,
            Err(code) => {
                // a lying header desynchronizes the stream, close it
                warn!("session {} bad MBAP header: {code}", self.id);
                self.scope().internal(code);
                return ReadOutcome::Fatal;
            }
        };
        let mut body = vec![0u8; header.pdu_len()];
        if rd.read_exact(&mut body).await.is_err() {
            return ReadOutcome::Fatal;
        }
        match Pdu::from_slice(&body) {
            Ok(pdu) => ReadOutcome::Frame(Inbound::Tcp {
                transaction_id: header.transaction_id,
                unit: header.unit,
                pdu,
            }),
            Err(code) => {
                self.scope().internal(code);
                ReadOutcome::Fatal
            }
        }
    }

    /// Serial framing over the stream: the function code picks the body
    /// shape from the codec's length tables, then two CRC bytes follow.
    async fn read_rtu_frame(&self, rd: &mut OwnedReadHalf) -> ReadOutcome {
        let mut head = [0u8; 2];
        if rd.read_exact(&mut head).await.is_err() {
            return ReadOutcome::Fatal;
        }
        let (addr, function) = (head[0], head[1]);

        let body_len = match request_body_len(function) {
            Some(shape) => shape,
            None => {
                // unknown length, the stream cannot be resynchronized
                warn!("session {} unknown fc=0x{function:02X}", self.id);
                self.scope().internal(ErrorCode::InvalidFormat);
                return ReadOutcome::Fatal;
            }
        };

        let mut body = match body_len {
            BodyLen::Fixed(n) => vec![0u8; n],
            BodyLen::Variable { head: h } => vec![0u8; h],
        };
        if rd.read_exact(&mut body).await.is_err() {
            return ReadOutcome::Fatal;
        }

        if let BodyLen::Variable { head: h } = body_len {
            match request_tail_len(function, &body) {
                Ok(tail) => {
                    body.resize(h + tail, 0);
                    if rd.read_exact(&mut body[h..]).await.is_err() {
                        return ReadOutcome::Fatal;
                    }
                }
                Err(code) => {
                    // consume the declared tail to stay in sync, then drop
                    let declared = body[h - 1] as usize;
                    let mut discard = vec![0u8; declared + 2];
                    if rd.read_exact(&mut discard).await.is_err() {
                        return ReadOutcome::Fatal;
                    }
                    self.scope().internal(code);
                    return ReadOutcome::Skip;
                }
            }
        }

        let mut crc = [0u8; 2];
        if rd.read_exact(&mut crc).await.is_err() {
            return ReadOutcome::Fatal;
        }

        if self.config.crc_check {
            let mut covered = Vec::with_capacity(2 + body.len());
            covered.push(addr);
            covered.push(function);
            covered.extend_from_slice(&body);
            if crc16(&covered) != crc_from_wire(crc[0], crc[1]) {
                debug!("session {} bad checksum on fc=0x{function:02X}", self.id);
                self.scope().internal(ErrorCode::BadChecksum);
                return ReadOutcome::Skip;
            }
        }

        let mut pdu_bytes = Vec::with_capacity(1 + body.len());
        pdu_bytes.push(function);
        pdu_bytes.extend_from_slice(&body);
        match Pdu::from_slice(&pdu_bytes) {
            Ok(pdu) => ReadOutcome::Frame(Inbound::Rtu { addr, pdu }),
            Err(code) => {
                self.scope().internal(code);
                ReadOutcome::Skip
            }
        }
    }

    /// Single exit point; fires the finalization callback exactly once.
    fn finish(&mut self) {
        self.output.clear();
        if let Some(on_close) = self.on_close.take() {
            on_close(self.id);
        }
        info!("session {} closed, peer {}", self.id, self.peer);
    }
}
