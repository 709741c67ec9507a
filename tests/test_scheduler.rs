mod common;
use common::*;

use async_trait::async_trait;
use solar_matrix::scheduler::{Scheduler, Tick};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

/// Pretends to work for `work` each tick and stops the scheduler after `limit` ticks.
struct Busy {
    work: Duration,
    limit: usize,
    starts: Vec<(Instant, &'static str)>,
    shutdown: broadcast::Sender<()>,
}

impl Busy {
    fn new(work: Duration, limit: usize, channels: &Channels) -> Self {
        Self {
            work,
            limit,
            starts: Vec::new(),
            shutdown: channels.shutdown.clone(),
        }
    }

    async fn tick(&mut self, mode: &'static str) -> Result<()> {
        self.starts.push((Instant::now(), mode));
        if self.starts.len() == self.limit {
            self.shutdown.send(())?;
        }
        tokio::time::sleep(self.work).await;
        Ok(())
    }

    fn gaps(&self) -> Vec<Duration> {
        self.starts.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }
}

#[async_trait]
impl Tick for Busy {
    async fn day(&mut self) -> Result<()> {
        self.tick("day").await
    }

    async fn night(&mut self) -> Result<()> {
        self.tick("night").await
    }
}

fn scheduler(now: &str, channels: &Channels) -> Scheduler {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), 502);
    Scheduler::new(&config, Arc::new(FixedClock::new(at(now))), channels.clone())
}

#[tokio::test(start_paused = true)]
async fn daytime_work_is_absorbed_into_the_period() -> Result<()> {
    let channels = Channels::new();
    let mut busy = Busy::new(Duration::from_secs(45), 3, &channels);

    scheduler("2024-06-01 12:00", &channels).start(&mut busy).await?;

    assert_eq!(busy.gaps(), vec![Duration::from_secs(60); 2]);
    assert!(busy.starts.iter().all(|(_, mode)| *mode == "day"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn overrunning_day_tick_starts_next_immediately() -> Result<()> {
    let channels = Channels::new();
    let mut busy = Busy::new(Duration::from_secs(65), 3, &channels);

    scheduler("2024-06-01 12:00", &channels).start(&mut busy).await?;

    assert_eq!(busy.gaps(), vec![Duration::from_secs(65); 2]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn night_sleeps_full_period_after_work() -> Result<()> {
    let channels = Channels::new();
    let mut busy = Busy::new(Duration::from_secs(5), 2, &channels);

    scheduler("2024-06-01 23:00", &channels).start(&mut busy).await?;

    assert_eq!(busy.gaps(), vec![Duration::from_secs(65)]);
    assert_eq!(busy.starts[0].1, "night");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_tick_does_not_stop_the_loop() -> Result<()> {
    struct Flaky(u32, broadcast::Sender<()>);

    #[async_trait]
    impl Tick for Flaky {
        async fn day(&mut self) -> Result<()> {
            self.0 += 1;
            if self.0 == 3 {
                self.1.send(())?;
            }
            bail!("device unplugged")
        }

        async fn night(&mut self) -> Result<()> {
            unreachable!()
        }
    }

    let channels = Channels::new();
    let mut flaky = Flaky(0, channels.shutdown.clone());

    scheduler("2024-06-01 12:00", &channels).start(&mut flaky).await?;

    assert_eq!(flaky.0, 3);
    Ok(())
}
