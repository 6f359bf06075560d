use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// Collapses bursts of state changes into at most one flush per refresh tick.
///
/// Ticks sit on a fixed grid starting at construction time, so a burst never
/// pushes its own flush further out. The coalescer only decides *when* to
/// flush; the caller reads whatever state is current at that moment.
#[derive(Debug)]
pub struct UpdateCoalescer {
    interval: Duration,
    origin: Instant,
    deadline: Option<Instant>,
    flushes: u64,
}

impl UpdateCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, origin: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            origin,
            deadline: None,
            flushes: 0,
        }
    }

    /// Note a state change. Returns `true` if this scheduled a new flush and
    /// `false` if one was already pending.
    pub fn observe(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(self.next_tick(now));
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending flush if its tick has arrived.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.flushes += 1;
                true
            }
            _ => false,
        }
    }

    /// Flush right now, dropping any pending tick.
    pub fn force_flush(&mut self) {
        self.deadline = None;
        self.flushes += 1;
    }

    /// Drop a pending tick without counting a flush.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    fn next_tick(&self, now: Instant) -> Instant {
        let interval = self.interval.as_nanos();
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        let ticks = elapsed / interval + 1;
        let offset = u64::try_from(ticks * interval).unwrap_or(u64::MAX);
        self.origin + Duration::from_nanos(offset)
    }
}

impl Default for UpdateCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}
