use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const MAX_POLL_TICKS: u32 = 240;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchTick {
    Changed,
    Unchanged,
    Expired,
}

/// Detects variant-selection changes from host notifications and a bounded
/// polling fallback. Blank ids and repeats of the last seen id are not changes.
#[derive(Clone, Debug)]
pub struct SelectionWatcher {
    last: String,
    ticks: u32,
    max_ticks: u32,
}

impl SelectionWatcher {
    pub fn new(initial: Option<&str>) -> Self {
        Self::with_max_ticks(initial, MAX_POLL_TICKS)
    }

    pub fn with_max_ticks(initial: Option<&str>, max_ticks: u32) -> Self {
        Self { last: initial.unwrap_or_default().trim().to_string(), ticks: 0, max_ticks }
    }

    pub fn observe(&mut self, current: Option<&str>) -> bool {
        let current = current.unwrap_or_default().trim();
        if current.is_empty() || current == self.last {
            return false;
        }
        self.last = current.to_string();
        true
    }

    /// One polling tick. After `max_ticks` polls the watcher stops reporting.
    pub fn tick(&mut self, current: Option<&str>) -> WatchTick {
        if self.is_expired() {
            return WatchTick::Expired;
        }
        self.ticks += 1;
        if self.observe(current) {
            WatchTick::Changed
        } else {
            WatchTick::Unchanged
        }
    }

    pub fn is_expired(&self) -> bool {
        self.ticks >= self.max_ticks
    }

    pub fn last_seen(&self) -> Option<&str> {
        (!self.last.is_empty()).then_some(self.last.as_str())
    }
}
