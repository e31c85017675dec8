//! Sliding-window admission control.
//!
//! Each client owns an ascending sequence of admission timestamps. A request
//! is admitted only when every configured window still has headroom; the
//! timestamp is recorded on admission only, so rejected requests never count
//! against the client.
//!
//! Locking is two-level: the client map sits behind an `RwLock` that is only
//! written when a client is first seen (or swept), and each client's history
//! has its own `Mutex`, so concurrent checks for different clients do not
//! contend with each other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{GuardError, GuardResult};
use crate::{lock, names};

type History = Arc<Mutex<VecDeque<Instant>>>;

/// One admission window: at most `max_requests` within a trailing `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowLimit {
    pub window: Duration,
    pub max_requests: u32,
    pub name: String,
}

impl WindowLimit {
    pub fn new(window_secs: u64, max_requests: u32, name: impl Into<String>) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_requests,
            name: name.into(),
        }
    }

    /// Build a limit with a sub-second window.
    pub fn with_window(window: Duration, max_requests: u32, name: impl Into<String>) -> Self {
        Self {
            window,
            max_requests,
            name: name.into(),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        /// Name of the first window that was exceeded
        window: String,
        /// Seconds until the oldest request in that window ages out
        retry_after_secs: u64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn limiting_window(&self) -> Option<&str> {
        match self {
            Admission::Allowed => None,
            Admission::Denied { window, .. } => Some(window),
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Admission::Allowed => None,
            Admission::Denied { retry_after_secs, .. } => Some(*retry_after_secs),
        }
    }

    /// Convert into a result, mapping a denial onto [`GuardError::RateLimited`].
    pub fn into_result(self) -> GuardResult<()> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Denied {
                window,
                retry_after_secs,
            } => Err(GuardError::RateLimited {
                window,
                retry_after_secs,
            }),
        }
    }
}

/// Point-in-time limiter statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    /// Percentage of checks that were rejected
    pub block_rate: f64,
    /// Clients with at least one admission inside the longest window
    pub active_clients: usize,
    /// Clients currently holding history
    pub tracked_clients: usize,
    pub limits: Vec<String>,
}

/// Per-client limiter over several independent sliding windows.
pub struct SlidingWindowRateLimiter {
    limits: Vec<WindowLimit>,
    longest: Duration,
    clients: RwLock<HashMap<String, History>>,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
}

impl SlidingWindowRateLimiter {
    /// Create a limiter over the given windows, evaluated in order.
    pub fn new(limits: Vec<WindowLimit>) -> GuardResult<Self> {
        if limits.is_empty() {
            return Err(GuardError::invalid_config("at least one window is required"));
        }
        if let Some(bad) = limits.iter().find(|l| l.window.is_zero()) {
            return Err(GuardError::invalid_config(format!(
                "window '{}' must be longer than zero",
                bad.name
            )));
        }

        let longest = limits
            .iter()
            .map(|l| l.window)
            .max()
            .unwrap_or_default();

        Ok(Self {
            limits,
            longest,
            clients: RwLock::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
        })
    }

    /// Default policy: 5 requests per minute and 20 per hour.
    pub fn default_limits() -> Vec<WindowLimit> {
        vec![
            WindowLimit::new(60, 5, "minute"),
            WindowLimit::new(3600, 20, "hour"),
        ]
    }

    pub fn limits(&self) -> &[WindowLimit] {
        &self.limits
    }

    /// Check and, if admitted, record a request from `client`.
    pub fn admit(&self, client: &str) -> Admission {
        self.admit_at(client, Instant::now())
    }

    pub(crate) fn admit_at(&self, client: &str, now: Instant) -> Admission {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let history = self.history_for(client);
        let mut timestamps = lock(&history);

        // Keep the sequence ascending even if callers raced on `now`.
        let now = timestamps.back().map_or(now, |last| now.max(*last));
        purge_expired(&mut timestamps, now, self.longest);

        for limit in &self.limits {
            let mut in_window = timestamps
                .iter()
                .filter(|t| now.duration_since(**t) < limit.window);
            let oldest = in_window.next();
            let count = oldest.map_or(0, |_| 1 + in_window.count());

            if count >= limit.max_requests as usize {
                let retry_after_secs = match oldest {
                    Some(oldest) => {
                        let age = now.duration_since(*oldest);
                        limit.window.saturating_sub(age).as_secs() + 1
                    }
                    None => limit.window.as_secs().max(1),
                };

                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "window" => limit.name.clone())
                    .increment(1);
                warn!(
                    client = %client,
                    window = %limit.name,
                    count,
                    max = limit.max_requests,
                    retry_after_secs,
                    "Rate limit exceeded"
                );

                return Admission::Denied {
                    window: limit.name.clone(),
                    retry_after_secs,
                };
            }
        }

        timestamps.push_back(now);
        Admission::Allowed
    }

    /// Drop all history for a client. Returns whether the client was tracked.
    pub fn reset_client(&self, client: &str) -> bool {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(client)
            .is_some();
        if removed {
            info!(client = %client, "Rate limit history reset");
        }
        removed
    }

    /// Purge aged-out timestamps for every client and forget clients whose
    /// history is now empty. Returns the number of clients removed.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub(crate) fn purge_idle_at(&self, now: Instant) -> usize {
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = clients.len();

        clients.retain(|_, history| {
            // Another caller cloned the handle and may be about to append.
            if Arc::strong_count(history) > 1 {
                return true;
            }
            let mut timestamps = lock(history);
            purge_expired(&mut timestamps, now, self.longest);
            !timestamps.is_empty()
        });

        let removed = before - clients.len();
        if removed > 0 {
            debug!(removed, remaining = clients.len(), "Purged idle rate limit clients");
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let clients = self
            .clients
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let active_clients = clients
            .values()
            .filter(|history| {
                lock(history)
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < self.longest)
            })
            .count();

        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let blocked_requests = self.blocked_requests.load(Ordering::Relaxed);
        let block_rate = if total_requests > 0 {
            blocked_requests as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };

        RateLimiterStats {
            total_requests,
            blocked_requests,
            block_rate,
            active_clients,
            tracked_clients: clients.len(),
            limits: self
                .limits
                .iter()
                .map(|l| format!("{} req/{}", l.max_requests, l.name))
                .collect(),
        }
    }

    fn history_for(&self, client: &str) -> History {
        {
            let clients = self
                .clients
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(history) = clients.get(client) {
                return Arc::clone(history);
            }
        }

        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(clients.entry(client.to_string()).or_default())
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self {
            limits: Self::default_limits(),
            longest: Duration::from_secs(3600),
            clients: RwLock::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
        }
    }
}

/// Drop timestamps whose age has reached the longest window.
fn purge_expired(timestamps: &mut VecDeque<Instant>, now: Instant, longest: Duration) {
    while let Some(front) = timestamps.front() {
        if now.duration_since(*front) >= longest {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
