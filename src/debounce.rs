use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Pending<T> {
    token: u64,
    due: Instant,
    value: T,
}

/// Trailing-edge debounce as a single cancellable scheduled task. Scheduling
/// again supersedes whatever was pending.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay: Duration,
    next_token: u64,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_token: 1,
            pending: None,
        }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn schedule(&mut self, value: T, now: Instant) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.pending = Some(Pending {
            token,
            due: now + self.delay,
            value,
        });
        token
    }

    /// Drops the pending task; returns whether one existed.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn pending_token(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.token)
    }

    /// Time left before the pending task fires, zero when already due.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|p| p.due.saturating_duration_since(now))
    }

    pub fn take_due(&mut self, now: Instant) -> Option<(u64, T)> {
        if !self.pending.as_ref().is_some_and(|p| now >= p.due) {
            return None;
        }
        self.pending.take().map(|p| (p.token, p.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_after_the_delay() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(300));
        let token = d.schedule("as", start);
        assert_eq!(d.take_due(start + Duration::from_millis(299)), None);
        assert_eq!(
            d.remaining(start + Duration::from_millis(100)),
            Some(Duration::from_millis(200))
        );
        assert_eq!(d.take_due(start + Duration::from_millis(300)), Some((token, "as")));
        assert_eq!(d.take_due(start + Duration::from_millis(900)), None);
    }

    #[test]
    fn new_keystroke_supersedes_pending_query() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(300));
        let first = d.schedule("as", start);
        let second = d.schedule("ash", start + Duration::from_millis(200));
        assert_ne!(first, second);
        assert_eq!(d.take_due(start + Duration::from_millis(350)), None);
        assert_eq!(
            d.take_due(start + Duration::from_millis(500)),
            Some((second, "ash"))
        );
    }

    #[test]
    fn cancel_drops_pending() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(10));
        d.schedule(1, start);
        assert!(d.cancel());
        assert!(!d.cancel());
        assert_eq!(d.take_due(start + Duration::from_secs(1)), None);
        assert_eq!(d.pending_token(), None);
    }
}
