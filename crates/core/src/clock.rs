use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Wall clock used for every race timing decision.
///
/// The unix time is captured once and then advanced with tokio's monotonic clock, so countdowns
/// follow `tokio::time::pause` in tests and are immune to wall-clock steps mid-race.
#[derive(Clone, Copy, Debug)]
pub struct RaceClock {
    anchor_unix: Duration,
    anchor: Instant,
}

impl Default for RaceClock {
    fn default() -> Self {
        Self::system()
    }
}

impl RaceClock {
    pub fn system() -> Self {
        let anchor_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            anchor_unix,
            anchor: Instant::now(),
        }
    }

    /// A clock that reads `unix_secs` right now.
    pub fn starting_at(unix_secs: u64) -> Self {
        Self {
            anchor_unix: Duration::from_secs(unix_secs),
            anchor: Instant::now(),
        }
    }

    /// Time since the unix epoch.
    pub fn now(&self) -> Duration {
        self.anchor_unix + self.anchor.elapsed()
    }

    pub fn now_secs(&self) -> u64 {
        self.now().as_secs()
    }

    pub fn now_secs_f64(&self) -> f64 {
        self.now().as_secs_f64()
    }

    /// Time remaining until the unix timestamp `ts`, zero if it already passed.
    pub fn until(&self, ts: u64) -> Duration {
        Duration::from_secs(ts).saturating_sub(self.now())
    }

    /// Sleeps until the unix timestamp `ts`.
    pub async fn sleep_until(&self, ts: u64) {
        tokio::time::sleep(self.until(ts)).await
    }
}
