use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Which per-caller quota an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Message sends: the expensive path (model call + writes).
    Send,
    /// History reads.
    Read,
}

/// Per-caller sliding-window rate limiter with two tiers: a stricter quota
/// on sends, a looser one on reads. One limiter handle is shared by all
/// request workers; the map is the only state.
pub struct RateLimiter {
    window: Duration,
    send_limit: u32,
    read_limit: u32,
    hits: Mutex<HashMap<(String, Tier), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, send_limit: u32, read_limit: u32) -> Self {
        Self {
            window,
            send_limit,
            read_limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// The production shape: limits counted per minute.
    pub fn per_minute(send_limit: u32, read_limit: u32) -> Self {
        Self::new(Duration::from_secs(60), send_limit, read_limit)
    }

    /// Record one hit for `caller` on `tier`. `Err` carries how long until
    /// the oldest hit leaves the window.
    pub fn check(&self, caller: &str, tier: Tier) -> Result<(), Duration> {
        let limit = match tier {
            Tier::Send => self.send_limit,
            Tier::Read => self.read_limit,
        };

        let now = Instant::now();
        let mut hits = self.lock();
        let window = hits.entry((caller.to_string(), tier)).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= limit as usize {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after);
        }

        window.push_back(now);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, Tier), VecDeque<Instant>>> {
        self.hits.lock().expect("rate limiter lock poisoned")
    }
}
