//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use fieldbus_proto::BROADCAST_ADDR;
use serde::{Deserialize, Serialize};

/// Frame layout spoken on accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// MBAP header, no CRC
    #[default]
    Tcp,
    /// Address + PDU + CRC-16 carried over the byte stream
    Rtu,
}

/// How an inbound frame's node address relates to this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrClass {
    /// Addressed to us, reply expected
    Unicast,
    /// Broadcast, process without replying
    Broadcast,
    /// Someone else's traffic, drop
    Foreign,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub framing: Framing,
    /// Active-session ceiling; the newest connection past it is refused.
    pub max_sessions: usize,
    pub idle_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    /// Pause after each reply before the next frame is read.
    pub after_reply_pause_ms: u64,
    /// Node addresses served; empty accepts any unicast address.
    pub addresses: Vec<u8>,
    /// Process broadcast frames (never replied to either way).
    pub broadcast: bool,
    /// Verify the serial framing's CRC. Off only for lossy test links.
    pub crc_check: bool,
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 1502)),
            framing: Framing::Tcp,
            max_sessions: 32,
            idle_timeout_ms: 60_000,
            reply_timeout_ms: 3_000,
            after_reply_pause_ms: 0,
            addresses: Vec::new(),
            broadcast: true,
            crc_check: true,
            stats_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn after_reply_pause(&self) -> Option<Duration> {
        (self.after_reply_pause_ms > 0)
            .then(|| Duration::from_millis(self.after_reply_pause_ms))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// Classify a frame's node address. The only place address filtering
    /// happens; everything downstream trusts the result.
    pub fn classify_addr(&self, addr: u8) -> AddrClass {
        if addr == BROADCAST_ADDR {
            if self.broadcast {
                AddrClass::Broadcast
            } else {
                AddrClass::Foreign
            }
        } else if self.addresses.is_empty() || self.addresses.contains(&addr) {
            AddrClass::Unicast
        } else {
            AddrClass::Foreign
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_address_list_accepts_any_unicast() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.classify_addr(1), AddrClass::Unicast);
        assert_eq!(cfg.classify_addr(247), AddrClass::Unicast);
    }

    #[test]
    fn test_address_filter() {
        let cfg = ServerConfig { addresses: vec![10, 11], ..Default::default() };
        assert_eq!(cfg.classify_addr(10), AddrClass::Unicast);
        assert_eq!(cfg.classify_addr(12), AddrClass::Foreign);
    }

    #[test]
    fn test_broadcast_mode() {
        let cfg = ServerConfig { addresses: vec![10], ..Default::default() };
        assert_eq!(cfg.classify_addr(BROADCAST_ADDR), AddrClass::Broadcast);
        let off = ServerConfig { broadcast: false, ..Default::default() };
        assert_eq!(off.classify_addr(BROADCAST_ADDR), AddrClass::Foreign);
    }

    #[test]
    fn test_defaults_parse_back_from_yaml() {
        let cfg: ServerConfig = serde_yaml::from_str("listen: 127.0.0.1:15502\n")
            .expect("partial config with defaults");
        assert_eq!(cfg.listen.port(), 15502);
        assert_eq!(cfg.max_sessions, 32);
        assert!(cfg.crc_check);
    }
}
