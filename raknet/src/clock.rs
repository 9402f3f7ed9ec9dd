use std::time::Instant;

/// The source of RakNet timestamps (ping / pong times). This is a monotonic millisecond counter
///  relative to the host's start, unrelated to wall clock time.
#[derive(Debug, Clone, Copy)]
pub struct RakNetClock {
    epoch: Instant,
}

impl RakNetClock {
    pub fn new(epoch: Instant) -> RakNetClock {
        RakNetClock { epoch }
    }

    pub fn millis(&self, now: Instant) -> i64 {
        now.saturating_duration_since(self.epoch)
            .as_millis()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}
