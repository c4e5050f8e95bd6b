//! Per-exchange state machine: decode, dispatch, encode, send or drop.
//!
//! Only wire-class errors ever turn into an exception reply; internal
//! errors drop the frame with nothing on the wire. The reply timeout is
//! measured over the whole decode-to-encode span; a late exchange is
//! dropped even if the handler succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldbus_proto::constants::*;
use fieldbus_proto::{ErrorCode, Pdu, Reply, Request};
use tracing::{debug, warn};

use crate::registry::HandlerRegistry;
use crate::stats::StatScope;

/// What the session should do with the exchange.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Queue these PDU bytes as the reply.
    Send(Pdu),
    /// Say nothing; the frame is consumed.
    Drop(ErrorCode),
}

pub struct ProtocolDispatcher {
    registry: Arc<HandlerRegistry>,
    reply_timeout: Duration,
}

impl ProtocolDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, reply_timeout: Duration) -> Self {
        Self { registry, reply_timeout }
    }

    /// Run one exchange over an already-accepted frame.
    pub fn process(&self, pdu: &Pdu, stats: StatScope<'_>) -> Outcome {
        let started = Instant::now();
        stats.request();
        let function = pdu.function();

        let request = match Request::decode(function, pdu.payload()) {
            Ok(req) => req,
            Err(code) => {
                debug!("decode failed fc=0x{function:02X}: {code}");
                return self.fail(function, code, stats);
            }
        };

        // Diagnostics answers from the session's own counters, so it is
        // served here rather than through the registry.
        let result = match request {
            Request::Diagnostics { sub, data } => diagnostics(sub, data, stats),
            ref req => self.registry.dispatch(req),
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(code) => return self.fail(function, code, stats),
        };

        let out = match reply.to_pdu() {
            Ok(pdu) => pdu,
            Err(code) => {
                warn!("reply encode failed fc=0x{function:02X}: {code}");
                return self.fail(function, code, stats);
            }
        };

        if started.elapsed() > self.reply_timeout {
            stats.internal(ErrorCode::Timeout);
            warn!("exchange fc=0x{function:02X} exceeded reply timeout, dropped");
            return Outcome::Drop(ErrorCode::Timeout);
        }

        stats.reply();
        Outcome::Send(out)
    }

    /// Route an error to the wire or the floor according to its class.
    fn fail(&self, function: u8, code: ErrorCode, stats: StatScope<'_>) -> Outcome {
        match Reply::exception(function, code).and_then(|r| r.to_pdu()) {
            Ok(pdu) if code.is_wire_exception() => {
                stats.exception(code);
                Outcome::Send(pdu)
            }
            _ => {
                stats.internal(code);
                Outcome::Drop(code)
            }
        }
    }
}

/// FC 0x08 sub-functions over the session counters.
fn diagnostics(sub: u16, data: u16, stats: StatScope<'_>) -> Result<Reply, ErrorCode> {
    let counters = stats.session;
    let value = |c: &std::sync::atomic::AtomicU64| {
        counters.get(c).min(u64::from(u16::MAX)) as u16
    };
    let reply_data = match sub {
        DIAG_ECHO => data,
        DIAG_CLEAR_COUNTERS => {
            counters.clear();
            data
        }
        DIAG_BUS_MESSAGE_COUNT => value(&counters.requests),
        DIAG_BUS_COMM_ERROR_COUNT => value(&counters.bad_checksum),
        DIAG_BUS_EXCEPTION_COUNT => value(&counters.exceptions),
        DIAG_SERVER_MESSAGE_COUNT => value(&counters.replies),
        DIAG_SERVER_NO_RESPONSE_COUNT => value(&counters.dropped),
        DIAG_SERVER_NAK_COUNT => value(&counters.naks),
        DIAG_SERVER_BUSY_COUNT => value(&counters.busy),
        DIAG_CHAR_OVERRUN_COUNT => value(&counters.packet_too_long),
        _ => return Err(ErrorCode::IllegalDataValue),
    };
    Ok(Reply::Diagnostics { sub, data: reply_data })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::stats::Counters;
    use fieldbus_proto::Request;

    fn dispatcher_with<F>(function: u8, handler: F) -> ProtocolDispatcher
    where
        F: Fn(&Request) -> Result<Reply, ErrorCode> + Send + Sync + 'static,
    {
        let mut registry = HandlerRegistry::new();
        registry.register(function, handler);
        ProtocolDispatcher::new(Arc::new(registry), Duration::from_secs(1))
    }

    fn pdu_of(req: &Request) -> Pdu {
        req.to_pdu().unwrap()
    }

    // ===== Send path =====

    #[test]
    fn test_success_encodes_the_handler_reply() {
        let d = dispatcher_with(FN_READ_HOLDING_REGISTERS, |_| {
            Ok(Reply::ReadHoldingRegisters { values: vec![10, 20, 30] })
        });
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::ReadHoldingRegisters { start: 0x10, count: 3 };
        match d.process(&pdu_of(&req), scope) {
            Outcome::Send(pdu) => {
                assert_eq!(&pdu.as_slice()[..2], &[0x03, 0x06]);
                assert_eq!(pdu.len(), 8);
            }
            other => panic!("expected Send, got {other:?}"),
        }
        assert_eq!(session.get(&session.requests), 1);
        assert_eq!(session.get(&session.replies), 1);
    }

    #[test]
    fn test_wire_error_becomes_exception_reply() {
        let d = dispatcher_with(FN_READ_COILS, |_| Err(ErrorCode::IllegalDataAddress));
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::ReadCoils { start: 9999, count: 1 };
        match d.process(&pdu_of(&req), scope) {
            Outcome::Send(pdu) => {
                assert_eq!(pdu.as_slice(), &[0x81, 0x02]);
            }
            other => panic!("expected exception reply, got {other:?}"),
        }
        assert_eq!(session.get(&session.exceptions), 1);
    }

    #[test]
    fn test_unregistered_function_gets_illegal_function_exception() {
        let d = ProtocolDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Duration::from_secs(1),
        );
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::JournalCommand { command: 1, count: 1 };
        match d.process(&pdu_of(&req), scope) {
            Outcome::Send(pdu) => assert_eq!(pdu.as_slice(), &[0xE5, 0x01]),
            other => panic!("expected exception reply, got {other:?}"),
        }
    }

    // ===== Drop path =====

    #[test]
    fn test_internal_error_drops_silently() {
        let d = dispatcher_with(FN_READ_COILS, |_| Err(ErrorCode::SessionClosed));
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::ReadCoils { start: 0, count: 1 };
        assert_eq!(
            d.process(&pdu_of(&req), scope),
            Outcome::Drop(ErrorCode::SessionClosed)
        );
        assert_eq!(session.get(&session.dropped), 1);
        assert_eq!(session.get(&session.replies), 0);
    }

    #[test]
    fn test_malformed_payload_drops() {
        let d = dispatcher_with(FN_READ_COILS, |_| Ok(Reply::ReadCoils { data: vec![0] }));
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        // truncated body
        let pdu = Pdu::from_slice(&[FN_READ_COILS, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(
            d.process(&pdu, scope),
            Outcome::Drop(ErrorCode::InvalidFormat)
        );
        assert_eq!(session.get(&session.invalid_format), 1);
    }

    #[test]
    fn test_oversize_count_is_answered_with_illegal_data_value() {
        let d = dispatcher_with(FN_READ_COILS, |_| Ok(Reply::ReadCoils { data: vec![0] }));
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        // 2001 coils: structurally whole, semantically out of range
        let pdu = Pdu::from_slice(&[FN_READ_COILS, 0x00, 0x00, 0x07, 0xD1]).unwrap();
        match d.process(&pdu, scope) {
            Outcome::Send(pdu) => assert_eq!(pdu.as_slice(), &[0x81, 0x03]),
            other => panic!("expected exception reply, got {other:?}"),
        }
    }

    #[test]
    fn test_slow_exchange_times_out() {
        let mut registry = HandlerRegistry::new();
        registry.register(FN_READ_COILS, |_| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Reply::ReadCoils { data: vec![0] })
        });
        let d = ProtocolDispatcher::new(Arc::new(registry), Duration::from_millis(1));
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::ReadCoils { start: 0, count: 1 };
        assert_eq!(
            d.process(&pdu_of(&req), scope),
            Outcome::Drop(ErrorCode::Timeout)
        );
        assert_eq!(session.get(&session.timeouts), 1);
    }

    // ===== Diagnostics =====

    #[test]
    fn test_diagnostics_echo() {
        let d = ProtocolDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Duration::from_secs(1),
        );
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::Diagnostics { sub: DIAG_ECHO, data: 0xA537 };
        match d.process(&pdu_of(&req), scope) {
            Outcome::Send(pdu) => {
                assert_eq!(pdu.as_slice(), &[0x08, 0x00, 0x00, 0xA5, 0x37]);
            }
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[test]
    fn test_diagnostics_counter_read_and_clear() {
        let d = ProtocolDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Duration::from_secs(1),
        );
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        session.record_internal(ErrorCode::BadChecksum);

        let read = Request::Diagnostics { sub: DIAG_BUS_COMM_ERROR_COUNT, data: 0 };
        match d.process(&pdu_of(&read), scope) {
            Outcome::Send(pdu) => assert_eq!(pdu.as_slice(), &[0x08, 0x00, 0x0C, 0x00, 0x01]),
            other => panic!("expected counter value, got {other:?}"),
        }

        let clear = Request::Diagnostics { sub: DIAG_CLEAR_COUNTERS, data: 0 };
        match d.process(&pdu_of(&clear), scope) {
            Outcome::Send(_) => {}
            other => panic!("expected ack, got {other:?}"),
        }
        assert_eq!(session.get(&session.bad_checksum), 0);
    }

    #[test]
    fn test_diagnostics_unknown_subfunction_is_exception() {
        let d = ProtocolDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Duration::from_secs(1),
        );
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };

        let req = Request::Diagnostics { sub: 0x7777, data: 0 };
        match d.process(&pdu_of(&req), scope) {
            Outcome::Send(pdu) => assert_eq!(pdu.as_slice(), &[0x88, 0x03]),
            other => panic!("expected exception, got {other:?}"),
        }
    }
}
