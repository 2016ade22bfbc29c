//! Retry backoff between failed fetches.

use std::time::Duration;

use botloop_core::BackoffConfig;
use botloop_workers::Signal;
use rand::Rng;

/// Doubling delay with an optional ceiling and attempt limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Option<Duration>,
    max_attempts: Option<u32>,
    jitter: bool,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            ceiling: None,
            max_attempts: None,
            jitter: false,
            current: floor,
            attempts: 0,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        let mut backoff = Self::new(Duration::from_millis(config.floor_ms));
        backoff.ceiling = config.ceiling_ms.map(Duration::from_millis);
        backoff.max_attempts = config.max_attempts;
        backoff.jitter = config.jitter;
        backoff
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = Some(ceiling);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before the next retry, or `None` once the attempt limit is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.max_attempts.is_some_and(|max| self.attempts > max) {
            return None;
        }

        let delay = self.current;
        let doubled = self.current.checked_mul(2).unwrap_or(Duration::MAX);
        self.current = match self.ceiling {
            Some(ceiling) => doubled.min(ceiling),
            None => doubled,
        };

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            Some(Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay))
        } else {
            Some(delay)
        }
    }

    /// Back to the floor after a success.
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            tracing::debug!("🔄 Backoff reset after {} failed attempts", self.attempts);
        }
        self.current = self.floor;
        self.attempts = 0;
    }

    /// Delay the next failure will sleep, before jitter.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// How the poller waits between iterations.
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration` unless `stop` is set first. Returns `true` when interrupted.
    fn sleep(&self, duration: Duration, stop: &Signal) -> bool;
}

/// Real sleeper: waits on the stop signal so a stop request cuts the sleep short.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, stop: &Signal) -> bool {
        stop.wait_timeout(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_doubles_from_floor() {
        let mut backoff = Backoff::new(ms(250));
        assert_eq!(backoff.next_delay(), Some(ms(250)));
        assert_eq!(backoff.next_delay(), Some(ms(500)));
        assert_eq!(backoff.next_delay(), Some(ms(1000)));
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_ceiling_caps_delay() {
        let mut backoff = Backoff::new(ms(400)).with_ceiling(ms(1000));
        let delays: Vec<_> = (0..5).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![ms(400), ms(800), ms(1000), ms(1000), ms(1000)]);
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::new(ms(100));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(ms(100)));
    }

    #[test]
    fn test_max_attempts_exhausts() {
        let mut backoff = Backoff::new(ms(10)).with_max_attempts(2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_doubling_saturates() {
        let mut backoff = Backoff::new(Duration::MAX);
        assert_eq!(backoff.next_delay(), Some(Duration::MAX));
        assert_eq!(backoff.next_delay(), Some(Duration::MAX));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = BackoffConfig {
            floor_ms: 1000,
            ceiling_ms: None,
            max_attempts: None,
            jitter: true,
        };
        for _ in 0..50 {
            let mut backoff = Backoff::from_config(&config);
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= ms(750) && delay <= ms(1250), "{delay:?}");
        }
    }

    #[test]
    fn test_thread_sleeper_interrupted_by_stop() {
        let stop = Arc::new(Signal::new());
        let setter = stop.clone();
        let started = Instant::now();
        let t = std::thread::spawn(move || {
            std::thread::sleep(ms(30));
            setter.set();
        });
        assert!(ThreadSleeper.sleep(Duration::from_secs(10), &stop));
        assert!(started.elapsed() < Duration::from_secs(5));
        t.join().unwrap();

        let idle = Signal::new();
        assert!(!ThreadSleeper.sleep(ms(10), &idle));
    }
}
