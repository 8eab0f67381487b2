use std::time::Duration;

/// Reconnect delay that doubles after every failed session and snaps back to
/// the initial value once a session reaches listening.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_backoff(self.current, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    #[cfg(test)]
    pub fn current(&self) -> Duration {
        self.current
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current.saturating_add(current);
    if next > max {
        max
    } else {
        next
    }
}
