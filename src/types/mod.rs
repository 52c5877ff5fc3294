pub mod entities;
pub mod events;

use chrono::{DateTime, Utc};

/// Time source for everything that compares wall-clock instants (coaching
/// cooldown, heartbeat liveness, talk-time stamps). Injected so tests can
/// drive it manually.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
