use crate::prelude::*;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Day,
    Night,
}

impl Mode {
    pub fn at(hour: u32, day_start: u32, day_end: u32) -> Self {
        if day_start <= hour && hour < day_end {
            Self::Day
        } else {
            Self::Night
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Night => write!(f, "night"),
        }
    }
}

/// Remainder of the period once the tick's own work is paid for.
pub fn daytime_pause(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

#[async_trait]
pub trait Tick: Send {
    async fn day(&mut self) -> Result<()>;
    async fn night(&mut self) -> Result<()>;
}

/// Once-per-hour gate for the daily-yield refresh.
#[derive(Clone, Debug, Default)]
pub struct YieldRefresh {
    hours: Vec<u32>,
    last: Option<(NaiveDate, u32)>,
}

impl YieldRefresh {
    pub fn new(hours: Vec<u32>) -> Self {
        Self { hours, last: None }
    }

    pub fn due(&self, now: NaiveDateTime) -> bool {
        self.hours.contains(&now.hour()) && self.last != Some((now.date(), now.hour()))
    }

    /// Only call after a successful refresh so a failed hour is retried next tick.
    pub fn mark(&mut self, now: NaiveDateTime) {
        self.last = Some((now.date(), now.hour()));
    }
}

pub struct Scheduler {
    period: Duration,
    day_start: u32,
    day_end: u32,
    clock: Arc<dyn Clock>,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: &ConfigWrapper, clock: Arc<dyn Clock>, channels: Channels) -> Self {
        let schedule = config.schedule();
        Self {
            period: schedule.poll_interval(),
            day_start: schedule.day_start(),
            day_end: schedule.day_end(),
            clock,
            channels,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn mode(&self) -> Mode {
        Mode::at(self.clock.now().hour(), self.day_start, self.day_end)
    }

    /// Runs ticks until a shutdown is broadcast. Ticks are never interrupted;
    /// shutdown is noticed during the pause that follows.
    pub async fn start<T: Tick>(&self, ticker: &mut T) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();
        let mut last_mode = None;

        loop {
            let started = Instant::now();
            let mode = self.mode();

            if last_mode != Some(mode) {
                info!("entering {} mode", mode);
                last_mode = Some(mode);
            }

            let result = match mode {
                Mode::Day => ticker.day().await,
                Mode::Night => ticker.night().await,
            };
            if let Err(err) = result {
                error!("{} tick failed: {:?}", mode, err);
            }

            let pause = match mode {
                Mode::Day => daytime_pause(self.period, started.elapsed()),
                Mode::Night => self.period,
            };
            debug!("{} tick took {:?}, sleeping {:?}", mode, started.elapsed(), pause);

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }

        Ok(())
    }
}
