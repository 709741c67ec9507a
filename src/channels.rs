use crate::prelude::*;

/// Notifications raised away from the poll loop that should reach the display.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ReadAttemptFailed {
        address: u16,
        attempt: u32,
        attempts: u32,
        reason: String,
    },
    ReadExhausted {
        address: u16,
        attempts: u32,
    },
    StoreError {
        series: String,
        reason: String,
    },
    StoreTrimmed {
        series: String,
        removed: usize,
    },
    DailyYieldUpdated {
        energy_kwh: f64,
    },
    /// Queued once at startup so the first tick announces itself.
    Started {
        poll_interval_secs: u64,
        energy_kwh: f64,
    },
}

#[derive(Debug, Clone)]
pub struct Channels {
    pub events: broadcast::Sender<Event>,
    pub shutdown: broadcast::Sender<()>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            events: Self::channel(),
            shutdown: Self::channel(),
        }
    }

    /// Nobody listening is fine; events are advisory.
    pub fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("event dropped, no receivers");
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(256).0
    }
}
