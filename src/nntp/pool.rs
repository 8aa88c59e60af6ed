//! Leveled NNTP server pool
//!
//! The pool owns every configured server grouped by failover level, enforces
//! per-server connection quotas, hands out leases to downloader tasks, and
//! keeps a small idle set so healthy connections are reused instead of
//! re-dialed. A background sweep closes idle connections past their age
//! threshold.
//!
//! Leasing never performs I/O under the pool lock: [`ServerPool::lease`]
//! reserves capacity and returns either an idle connection or just the server
//! config; the caller dials outside the lock and returns the lease via
//! [`ServerPool::release`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::nntp::NntpConnection;
use crate::utils::wild_match;

/// A reserved slot on one server, possibly carrying a reusable connection.
pub struct Lease {
    /// Configuration of the leased server
    pub server: ServerConfig,
    /// Idle connection to reuse; `None` means the caller must dial
    pub connection: Option<NntpConnection>,
}

/// Per-server counters exposed to the RPC status surface.
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// Server id from the configuration
    pub id: u32,
    /// Server host
    pub host: String,
    /// Failover level
    pub level: u32,
    /// Connections currently leased
    pub in_use: u32,
    /// Articles fetched successfully from this server
    pub success_articles: u64,
    /// Articles that failed on this server
    pub failed_articles: u64,
}

struct IdleConn {
    conn: NntpConnection,
    since: Instant,
}

struct ServerSlot {
    config: ServerConfig,
    in_use: u32,
    idle: Vec<IdleConn>,
}

struct ServerCounters {
    id: u32,
    success: AtomicU64,
    failed: AtomicU64,
}

struct PoolInner {
    slots: Mutex<Vec<ServerSlot>>,
    counters: Vec<ServerCounters>,
    generation: AtomicU32,
    max_level: u32,
    idle_timeout: Duration,
}

/// Owns all configured servers and their connection quotas.
#[derive(Clone)]
pub struct ServerPool {
    inner: Arc<PoolInner>,
}

impl ServerPool {
    /// Build a pool from server configurations.
    pub fn new(servers: Vec<ServerConfig>, idle_timeout: Duration) -> Self {
        let max_level = servers.iter().map(|s| s.level).max().unwrap_or(0);
        let counters = servers
            .iter()
            .map(|s| ServerCounters {
                id: s.id,
                success: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            })
            .collect();
        let slots = servers
            .into_iter()
            .map(|config| ServerSlot {
                config,
                in_use: 0,
                idle: Vec::new(),
            })
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
                counters,
                generation: AtomicU32::new(0),
                max_level,
                idle_timeout,
            }),
        }
    }

    /// Highest configured level; the failover ceiling.
    pub fn max_level(&self) -> u32 {
        self.inner.max_level
    }

    /// Configuration generation, bumped on reload so the scheduler can
    /// recompute its thread budget.
    pub fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Bump the generation (called after a configuration reload).
    pub fn bump_generation(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Sum of `max_connections` over active servers at levels 0 and 1,
    /// feeding the scheduler's `downloads_limit` formula.
    pub async fn primary_connection_budget(&self) -> u32 {
        let slots = self.inner.slots.lock().await;
        slots
            .iter()
            .filter(|s| s.config.active && s.config.level <= 1)
            .map(|s| s.config.max_connections)
            .sum()
    }

    /// Lease a connection slot on any active server at `level` with spare
    /// capacity whose group pattern (if any) covers one of `groups`.
    ///
    /// Returns `None` when every eligible server at that level is saturated.
    pub async fn lease(&self, level: u32, groups: &[String]) -> Option<Lease> {
        let mut slots = self.inner.slots.lock().await;
        for slot in slots.iter_mut() {
            if !slot.config.active || slot.config.level != level {
                continue;
            }
            if slot.in_use >= slot.config.max_connections {
                continue;
            }
            if let Some(pattern) = &slot.config.group_pattern
                && !groups.is_empty()
                && !groups.iter().any(|g| wild_match(pattern, g))
            {
                continue;
            }
            slot.in_use += 1;
            let connection = slot.idle.pop().map(|i| i.conn);
            return Some(Lease {
                server: slot.config.clone(),
                connection,
            });
        }
        None
    }

    /// Return a leased slot. A healthy, reusable connection goes back to the
    /// idle set; anything else is dropped (the socket closes on drop).
    pub async fn release(&self, server_id: u32, connection: Option<NntpConnection>, reusable: bool) {
        let mut slots = self.inner.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|s| s.config.id == server_id) {
            slot.in_use = slot.in_use.saturating_sub(1);
            if reusable
                && let Some(conn) = connection
                && !conn.is_cancelled()
            {
                slot.idle.push(IdleConn {
                    conn,
                    since: Instant::now(),
                });
            }
        }
    }

    /// Close idle connections older than the configured threshold. Returns
    /// the connections to close so the caller can QUIT them outside the lock.
    pub async fn sweep_idle(&self) -> Vec<NntpConnection> {
        let mut slots = self.inner.slots.lock().await;
        let threshold = self.inner.idle_timeout;
        let mut expired = Vec::new();
        for slot in slots.iter_mut() {
            let mut kept = Vec::with_capacity(slot.idle.len());
            for idle in slot.idle.drain(..) {
                if idle.since.elapsed() > threshold {
                    expired.push(idle.conn);
                } else {
                    kept.push(idle);
                }
            }
            slot.idle = kept;
        }
        expired
    }

    /// Record a successful article fetch against a server.
    pub fn record_success(&self, server_id: u32) {
        if let Some(c) = self.inner.counters.iter().find(|c| c.id == server_id) {
            c.success.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed article fetch against a server.
    pub fn record_failure(&self, server_id: u32) {
        if let Some(c) = self.inner.counters.iter().find(|c| c.id == server_id) {
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Per-server counters for the RPC status surface.
    pub async fn connection_stats(&self) -> Vec<ServerStats> {
        let slots = self.inner.slots.lock().await;
        slots
            .iter()
            .map(|slot| {
                let (success, failed) = self
                    .inner
                    .counters
                    .iter()
                    .find(|c| c.id == slot.config.id)
                    .map(|c| {
                        (
                            c.success.load(Ordering::Relaxed),
                            c.failed.load(Ordering::Relaxed),
                        )
                    })
                    .unwrap_or((0, 0));
                ServerStats {
                    id: slot.config.id,
                    host: slot.config.host.clone(),
                    level: slot.config.level,
                    in_use: slot.in_use,
                    success_articles: success,
                    failed_articles: failed,
                }
            })
            .collect()
    }

    /// Total connections currently leased across all servers.
    pub async fn total_in_use(&self) -> u32 {
        let slots = self.inner.slots.lock().await;
        slots.iter().map(|s| s.in_use).sum()
    }
}
