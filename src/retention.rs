use crate::prelude::*;
use chrono::NaiveDateTime;
use std::sync::Arc;

/// Trims every series on a cron schedule.
pub struct RetentionTask {
    stores: Vec<TimeSeriesStore>,
    retention: chrono::Duration,
    cron: String,
    clock: Arc<dyn Clock>,
    channels: Channels,
}

impl RetentionTask {
    pub fn new(
        config: &ConfigWrapper,
        stores: Vec<TimeSeriesStore>,
        clock: Arc<dyn Clock>,
        channels: Channels,
    ) -> Self {
        Self {
            stores,
            retention: config.storage().retention(),
            cron: config.storage().trim_cron().to_string(),
            clock,
            channels,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            let now = chrono::Local::now();
            let next = cron_parser::parse(&self.cron, &now)
                .map_err(|err| anyhow!("bad trim schedule {:?}: {:?}", self.cron, err))?;
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("next retention trim at {}", next.format("%Y-%m-%d %H:%M"));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run_once(self.clock.now());
                }
                _ = shutdown.recv() => {
                    info!("retention task stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Trims each store independently; one failing store does not stop the others.
    pub fn run_once(&self, now: NaiveDateTime) -> usize {
        let mut total = 0;

        for store in &self.stores {
            match store.trim(now, self.retention) {
                Ok(removed) => {
                    total += removed;
                    self.channels.emit(Event::StoreTrimmed {
                        series: store.name().to_string(),
                        removed,
                    });
                }
                Err(err) => {
                    error!("trimming {} failed: {}", store.name(), err);
                    self.channels.emit(Event::StoreError {
                        series: store.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        total
    }
}
