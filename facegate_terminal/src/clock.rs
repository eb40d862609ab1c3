//! FaceGate Terminal - Clock Source

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock time for envelope timestamps
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now_unix(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.now_unix(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// System clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Manually driven clock
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now_unix: i64) -> Self {
        Self {
            now: AtomicI64::new(now_unix),
        }
    }

    pub fn set(&self, now_unix: i64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(1_700_000_000);
        assert_eq!(clock.now_unix(), 1_700_000_000);

        clock.advance(301);
        assert_eq!(clock.now_unix(), 1_700_000_301);
        assert_eq!(clock.now().timestamp(), 1_700_000_301);

        clock.set(5);
        assert_eq!(clock.now_unix(), 5);
    }
}
