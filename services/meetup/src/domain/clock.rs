//! 現在時刻の供給元
//!
//! テストで時刻を固定・進行できるようにトレイトで抽象化する。

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// 現在時刻を返すトレイト
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// システム時刻を返す実装
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 任意の時刻を返す実装（テスト・再現実行用）
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// 現在時刻を置き換える
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    /// 現在時刻を進める
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_returns_configured_time() {
        let t = Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn test_fixed_clock_advance_and_set() {
        let t = Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(t);

        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), t + Duration::seconds(90));

        clock.set(t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
