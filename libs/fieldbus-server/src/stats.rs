//! Request/error counters, per session and aggregated per server.
//!
//! Counters are plain atomics so the diagnostics handler and an external
//! observer can read them without stopping the event loop.

use std::sync::atomic::{AtomicU64, Ordering};

use fieldbus_proto::ErrorCode;

/// One set of protocol counters. A session owns one; the server owns an
/// aggregate that outlives every session.
#[derive(Debug, Default)]
pub struct Counters {
    /// Frames accepted for dispatch
    pub requests: AtomicU64,
    /// Replies fully queued for transmission
    pub replies: AtomicU64,
    /// Exception replies sent
    pub exceptions: AtomicU64,
    /// Frames dropped for any internal error
    pub dropped: AtomicU64,
    pub bad_checksum: AtomicU64,
    pub invalid_format: AtomicU64,
    pub wrong_node_address: AtomicU64,
    pub timeouts: AtomicU64,
    pub packet_too_long: AtomicU64,
    /// NegativeAcknowledge exceptions sent
    pub naks: AtomicU64,
    /// ServerBusy exceptions sent
    pub busy: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_internal(&self, code: ErrorCode) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let counter = match code {
            ErrorCode::BadChecksum => &self.bad_checksum,
            ErrorCode::WrongNodeAddress => &self.wrong_node_address,
            ErrorCode::Timeout => &self.timeouts,
            ErrorCode::PacketTooLong => &self.packet_too_long,
            _ => &self.invalid_format,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exception(&self, code: ErrorCode) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
        match code {
            ErrorCode::NegativeAcknowledge => {
                self.naks.fetch_add(1, Ordering::Relaxed);
            }
            ErrorCode::ServerBusy => {
                self.busy.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn clear(&self) {
        for c in [
            &self.requests,
            &self.replies,
            &self.exceptions,
            &self.dropped,
            &self.bad_checksum,
            &self.invalid_format,
            &self.wrong_node_address,
            &self.timeouts,
            &self.packet_too_long,
            &self.naks,
            &self.busy,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    pub fn get(&self, c: &AtomicU64) -> u64 {
        c.load(Ordering::Relaxed)
    }
}

/// Both counter sets a session records into: its own and the server's.
#[derive(Clone, Copy)]
pub struct StatScope<'a> {
    pub session: &'a Counters,
    pub server: &'a Counters,
}

impl StatScope<'_> {
    pub fn request(&self) {
        self.session.requests.fetch_add(1, Ordering::Relaxed);
        self.server.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply(&self) {
        self.session.replies.fetch_add(1, Ordering::Relaxed);
        self.server.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exception(&self, code: ErrorCode) {
        self.session.record_exception(code);
        self.server.record_exception(code);
    }

    pub fn internal(&self, code: ErrorCode) {
        self.session.record_internal(code);
        self.server.record_internal(code);
    }
}

/// Server-wide statistics: the aggregate counters plus session-lifecycle
/// numbers maintained by the listener.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub counters: Counters,
    pub sessions_opened: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub sessions_rejected: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_counted_per_kind() {
        let c = Counters::new();
        c.record_internal(ErrorCode::BadChecksum);
        c.record_internal(ErrorCode::BadChecksum);
        c.record_internal(ErrorCode::Timeout);
        assert_eq!(c.get(&c.bad_checksum), 2);
        assert_eq!(c.get(&c.timeouts), 1);
        assert_eq!(c.get(&c.dropped), 3);
    }

    #[test]
    fn test_clear_resets_everything() {
        let c = Counters::new();
        c.requests.fetch_add(5, Ordering::Relaxed);
        c.record_exception(ErrorCode::ServerBusy);
        c.clear();
        assert_eq!(c.get(&c.requests), 0);
        assert_eq!(c.get(&c.exceptions), 0);
        assert_eq!(c.get(&c.busy), 0);
    }

    #[test]
    fn test_scope_records_into_both_sets() {
        let session = Counters::new();
        let server = Counters::new();
        let scope = StatScope { session: &session, server: &server };
        scope.request();
        scope.internal(ErrorCode::InvalidFormat);
        assert_eq!(session.get(&session.requests), 1);
        assert_eq!(server.get(&server.requests), 1);
        assert_eq!(session.get(&session.invalid_format), 1);
        assert_eq!(server.get(&server.invalid_format), 1);
    }
}
