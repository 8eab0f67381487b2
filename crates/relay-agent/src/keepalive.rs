use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Nothing due yet; wait at most this long for the next frame.
    Wait(Duration),
    SendProbe,
    /// The outstanding probe was not answered inside the grace window.
    Expired,
}

/// Tracks time since the last confirmed liveness signal on the push stream.
///
/// The clock resets only when a probe is answered. Ordinary frames do not
/// move it, so a probe goes out at least once per interval even on a busy
/// stream.
#[derive(Debug, Clone)]
pub struct KeepaliveTimer {
    interval: Duration,
    grace: Duration,
    last_reset: Instant,
    probe_sent_at: Option<Instant>,
}

impl KeepaliveTimer {
    pub fn new(interval: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            interval,
            grace,
            last_reset: now,
            probe_sent_at: None,
        }
    }

    pub fn poll(&self, now: Instant) -> KeepaliveAction {
        match self.probe_sent_at {
            Some(sent) => {
                let deadline = sent + self.grace;
                if now >= deadline {
                    KeepaliveAction::Expired
                } else {
                    KeepaliveAction::Wait(deadline - now)
                }
            }
            None => {
                let due = self.last_reset + self.interval;
                if now >= due {
                    KeepaliveAction::SendProbe
                } else {
                    KeepaliveAction::Wait(due - now)
                }
            }
        }
    }

    pub fn probe_sent(&mut self, now: Instant) {
        self.probe_sent_at = Some(now);
    }

    /// Records a probe response. Returns false when no probe was outstanding.
    pub fn acknowledge(&mut self, now: Instant) -> bool {
        if self.probe_sent_at.take().is_none() {
            return false;
        }
        self.last_reset = now;
        true
    }

    #[cfg(test)]
    pub fn probe_outstanding(&self) -> bool {
        self.probe_sent_at.is_some()
    }
}
