//! Accept loop and session pool.
//!
//! The listener owns the active-session collection. Admission is
//! deterministic: once `max_sessions` handles exist, the newest connection
//! is refused by closing its socket immediately. Sessions remove
//! themselves through the finalization callback; `shutdown` cancels every
//! session and stops the accept loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::ProtocolDispatcher;
use crate::error::ServerError;
use crate::registry::HandlerRegistry;
use crate::session::TransportSession;
use crate::stats::ServerStats;

/// Listener-side view of a live session.
pub struct SessionHandle {
    pub peer: SocketAddr,
    pub opened: Instant,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Idempotent; safe to call while the session is tearing down.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

pub struct ConnectionListener {
    config: Arc<ServerConfig>,
    dispatcher: Arc<ProtocolDispatcher>,
    stats: Arc<ServerStats>,
    sessions: Arc<Mutex<HashMap<u64, SessionHandle>>>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl ConnectionListener {
    pub fn new(config: ServerConfig, registry: HandlerRegistry) -> Self {
        let reply_timeout = config.reply_timeout();
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(ProtocolDispatcher::new(Arc::new(registry), reply_timeout)),
            stats: Arc::new(ServerStats::new()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Address actually bound, once `run` is up. Callers that bind port 0
    /// should use the value returned by `bind` instead.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listen socket. Split from `run` so tests can learn the
    /// ephemeral port before any client connects.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), ServerError> {
        let listener = TcpListener::bind(self.config.listen).await?;
        let local = listener.local_addr()?;
        info!("listening on {local}, framing {:?}", self.config.framing);
        Ok((listener, local))
    }

    /// Accept connections and tick statistics until shutdown.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        let mut tick = tokio::time::interval(self.config.stats_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => self.log_stats(),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) => warn!("accept failed: {e}"),
                },
            }
        }

        // stop every session; each removes itself via its callback
        let handles = self.sessions.lock();
        for handle in handles.values() {
            handle.terminate();
        }
        info!("listener stopped, {} sessions cancelled", handles.len());
    }

    /// Cancel all sessions and stop accepting. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = {
            let mut sessions = self.sessions.lock();
            if sessions.len() >= self.config.max_sessions {
                self.stats.sessions_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "refusing {peer}: session limit {} reached",
                    self.config.max_sessions
                );
                // reject-newest: closing the socket is the refusal
                drop(stream);
                return;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = self.cancel.child_token();
            sessions.insert(id, SessionHandle { peer, opened: Instant::now(), cancel });
            id
        };
        self.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);

        let cancel = {
            let sessions = self.sessions.lock();
            match sessions.get(&id) {
                Some(h) => h.cancel.clone(),
                None => return,
            }
        };

        let listener = Arc::clone(self);
        let on_close = Box::new(move |sid: u64| {
            listener.sessions.lock().remove(&sid);
            listener.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
        });

        let session = TransportSession::new(
            id,
            peer,
            Arc::clone(&self.config),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.stats),
            cancel,
            on_close,
        );
        tokio::spawn(session.run(stream));
    }

    fn log_stats(&self) {
        let c = &self.stats.counters;
        info!(
            "sessions {} (opened {}, closed {}, rejected {}), requests {}, replies {}, exceptions {}, dropped {}",
            self.session_count(),
            self.stats.sessions_opened.load(Ordering::Relaxed),
            self.stats.sessions_closed.load(Ordering::Relaxed),
            self.stats.sessions_rejected.load(Ordering::Relaxed),
            c.get(&c.requests),
            c.get(&c.replies),
            c.get(&c.exceptions),
            c.get(&c.dropped),
        );
    }
}
