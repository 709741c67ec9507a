use crate::prelude::*;

mod daytime;
mod nighttime;

use crate::chart::ChartBucketizer;
use crate::daily_yield::{DailyYield, DailyYieldFile};
use crate::display::Renderer;
use crate::level::LevelMapper;
use crate::modbus::{Connector, DeviceClient};
use crate::scheduler::{Tick, YieldRefresh};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PollStats {
    pub day_ticks: u64,
    pub night_ticks: u64,
    pub samples_stored: u64,
    pub failed_reads: u64,
    pub store_errors: u64,
    pub yield_refreshes: u64,
    pub messages_shown: u64,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Ticks: {} day, {} night", self.day_ticks, self.night_ticks);
        info!("  Samples stored: {}", self.samples_stored);
        info!("  Failed reads: {}", self.failed_reads);
        info!("  Store errors: {}", self.store_errors);
        info!("  Daily yield refreshes: {}", self.yield_refreshes);
        info!("  Notifications shown: {}", self.messages_shown);
    }
}

/// Owns the device, the display and both series; the scheduler drives it.
pub struct Coordinator<C, M> {
    client: DeviceClient<C>,
    renderer: Renderer<M>,
    solar: TimeSeriesStore,
    grid: TimeSeriesStore,
    solar_register: RegisterDescriptor,
    grid_register: RegisterDescriptor,
    yield_register: RegisterDescriptor,
    yield_file: DailyYieldFile,
    daily: Option<DailyYield>,
    refresh: YieldRefresh,
    mapper: LevelMapper,
    chart: ChartBucketizer,
    clock: Arc<dyn Clock>,
    channels: Channels,
    events: broadcast::Receiver<Event>,
    stats: PollStats,
}

impl<C: Connector, M: LedMatrix + Send> Coordinator<C, M> {
    pub fn new(
        config: &ConfigWrapper,
        client: DeviceClient<C>,
        renderer: Renderer<M>,
        solar: TimeSeriesStore,
        grid: TimeSeriesStore,
        clock: Arc<dyn Clock>,
        channels: Channels,
    ) -> Self {
        let schedule = config.schedule();
        let display = config.display();
        let yield_file = DailyYieldFile::new(config.storage().daily_yield_file());

        let daily = yield_file.load();
        match &daily {
            Some(snapshot) => info!(
                "last daily yield {:.2} kWh on {} ({})",
                snapshot.energy_kwh,
                snapshot.date,
                yield_file.path().display()
            ),
            None => info!("no daily yield snapshot at {}", yield_file.path().display()),
        }

        let events = channels.events.subscribe();
        channels.emit(Event::Started {
            poll_interval_secs: schedule.poll_interval().as_secs(),
            energy_kwh: daily.as_ref().map_or(0.0, |d| d.energy_kwh),
        });

        Self {
            client,
            renderer,
            solar,
            grid,
            solar_register: config.registers().solar_power(),
            grid_register: config.registers().grid_power(),
            yield_register: config.registers().daily_yield(),
            yield_file,
            daily,
            refresh: YieldRefresh::new(schedule.yield_refresh_hours()),
            mapper: LevelMapper::new(display.min_level()),
            chart: ChartBucketizer::new(
                display.chart_buckets(),
                schedule.day_start(),
                schedule.day_end(),
                display.saturation(),
            ),
            clock,
            events,
            channels,
            stats: PollStats::default(),
        }
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn renderer(&self) -> &Renderer<M> {
        &self.renderer
    }

    pub fn daily_yield(&self) -> Option<&DailyYield> {
        self.daily.as_ref()
    }

    pub fn clear_display(&mut self) -> Result<()> {
        self.renderer.clear()
    }

    /// Reads one register as a number; any failure means no value this tick.
    async fn acquire(&mut self, register: &RegisterDescriptor) -> Option<f64> {
        match self.client.read_value(register).await {
            Ok(value) => match value.as_f64() {
                Some(v) => Some(v),
                None => {
                    warn!("{} decoded to non-numeric {:?}", register.name, value);
                    None
                }
            },
            Err(err) => {
                warn!("no {} this tick: {}", register.name, err);
                self.stats.failed_reads += 1;
                None
            }
        }
    }

    fn record(&mut self, store: &TimeSeriesStore, sample: Sample) {
        match store.append(sample) {
            Ok(()) => self.stats.samples_stored += 1,
            Err(err) => self.store_failed(store, err),
        }
    }

    /// Full history of `store`; unreadable history is treated as empty.
    fn history(&mut self, store: &TimeSeriesStore) -> Vec<Sample> {
        match store.read_all() {
            Ok(samples) => samples,
            Err(err) => {
                self.store_failed(store, err);
                Vec::new()
            }
        }
    }

    fn store_failed(&mut self, store: &TimeSeriesStore, err: StoreError) {
        error!("{}: {}", store.name(), err);
        self.stats.store_errors += 1;
        self.channels.emit(Event::StoreError {
            series: store.name().to_string(),
            reason: err.to_string(),
        });
    }

    /// Shows queued notifications before the regular content.
    async fn drain_events(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(message) = notification(&event) {
                        pending.push(message);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => warn!("missed {} events", missed),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        for (text, color) in pending {
            self.renderer.show_message(&text, color).await?;
            self.stats.messages_shown += 1;
        }
        Ok(())
    }
}

fn notification(event: &Event) -> Option<(String, Rgb)> {
    match event {
        // individual attempts are only logged
        Event::ReadAttemptFailed { .. } => None,
        Event::ReadExhausted { address, .. } => Some((format!("Read error {}", address), Rgb::RED)),
        Event::StoreError { series, .. } => Some((format!("Store error {}", series), Rgb::RED)),
        Event::StoreTrimmed { series, .. } => Some((format!("Cleanup {} done", series), Rgb::GREEN)),
        Event::DailyYieldUpdated { energy_kwh } => Some((format!("Saved {:.2} kWh", energy_kwh), Rgb::GREEN)),
        Event::Started {
            poll_interval_secs,
            energy_kwh,
        } => Some((
            format!("Polling every {}s, daily yield {:.2} kWh", poll_interval_secs, energy_kwh),
            Rgb::GREEN,
        )),
    }
}

#[async_trait]
impl<C: Connector, M: LedMatrix + Send> Tick for Coordinator<C, M> {
    async fn day(&mut self) -> Result<()> {
        self.day_tick().await
    }

    async fn night(&mut self) -> Result<()> {
        self.night_tick().await
    }
}
