use crate::prelude::*;

use super::Coordinator;
use crate::daily_yield::{daily_message, DailyYield};
use crate::modbus::Connector;
use chrono::NaiveDateTime;
use std::time::Duration;

const CHART_PAUSE: Duration = Duration::from_secs(1);
const YIELD_REPEATS: usize = 2;

impl<C: Connector, M: LedMatrix + Send> Coordinator<C, M> {
    /// Refresh the daily yield when due, then alternate the production chart
    /// with the yield message.
    pub async fn night_tick(&mut self) -> Result<()> {
        self.stats.night_ticks += 1;
        let now = self.clock.now();

        if self.refresh.due(now) {
            self.refresh_daily_yield(now).await;
        }

        self.drain_events().await?;

        let levels = self.chart_levels(now);
        self.renderer.bar_chart(&levels)?;
        tokio::time::sleep(CHART_PAUSE).await;
        self.renderer.clear()?;

        let message = self
            .daily
            .as_ref()
            .map_or_else(|| daily_message(0.0), DailyYield::message);
        for _ in 0..YIELD_REPEATS {
            self.renderer.show_message(&message, Rgb::WHITE).await?;
        }

        self.renderer.bar_chart(&levels)
    }

    pub fn chart_levels(&mut self, now: NaiveDateTime) -> Vec<u8> {
        let solar = self.solar.clone();
        let series = self.history(&solar);
        let levels = self.chart.bucketize(&series, now);
        debug!("chart for {}: {:?}", self.chart.active_day(now), levels);
        levels
    }

    async fn refresh_daily_yield(&mut self, now: NaiveDateTime) {
        let register = self.yield_register.clone();
        let Some(energy_kwh) = self.acquire(&register).await else {
            warn!("daily yield refresh failed, retrying next tick");
            return;
        };

        let snapshot = DailyYield::new(energy_kwh, now);
        if let Err(err) = self.yield_file.save(&snapshot) {
            error!("saving {}: {:?}", self.yield_file.path().display(), err);
            self.channels.emit(Event::StoreError {
                series: "daily_yield".to_string(),
                reason: err.to_string(),
            });
            return;
        }

        info!("daily yield {:.2} kWh", energy_kwh);
        self.daily = Some(snapshot);
        self.refresh.mark(now);
        self.stats.yield_refreshes += 1;
        self.channels.emit(Event::DailyYieldUpdated { energy_kwh });
    }
}
