//! Trailing-edge debounce pacing the database-update flusher.

use std::time::Duration;

use tokio::time::Instant;

/// Schedules at most one pending fire at a time. `trigger` arms the timer if
/// it is not armed already; further triggers before the deadline are
/// absorbed, so a burst of completions produces a single batched fire.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn trigger(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    /// Moves a pending fire to "now"; a no-op when nothing is pending.
    pub fn flush(&mut self) {
        if self.deadline.is_some() {
            self.deadline = Some(Instant::now());
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the armed deadline passes; pends forever while unarmed,
    /// which makes it safe to park in a `select!` arm. Cancellation keeps the
    /// deadline, completion clears it.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn triggers_collapse_into_one_fire() {
        let mut throttle = Throttle::new(Duration::from_secs(1));
        throttle.trigger();
        throttle.trigger();
        throttle.trigger();
        assert!(throttle.is_pending());

        throttle.fired().await;
        assert!(!throttle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_fires_immediately() {
        let mut throttle = Throttle::new(Duration::from_secs(3_600));
        throttle.trigger();
        throttle.flush();
        // Virtual time: a huge interval would hang here if flush had no
        // effect.
        throttle.fired().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms() {
        let mut throttle = Throttle::new(Duration::from_secs(1));
        throttle.trigger();
        throttle.cancel();
        assert!(!throttle.is_pending());

        let fired = tokio::time::timeout(Duration::from_secs(5), throttle.fired()).await;
        assert!(fired.is_err(), "disarmed throttle must not fire");
    }
}
