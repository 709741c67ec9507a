mod common;
use common::*;

use solar_matrix::coordinator::Coordinator;
use solar_matrix::daily_yield::DailyYieldFile;
use solar_matrix::display::{index, Renderer};
use solar_matrix::modbus::{DeviceClient, TcpConnector};
use solar_matrix::retry::RetryPolicy;
use solar_matrix::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

struct Rig {
    _dir: TempDir,
    device: FakeDevice,
    config: ConfigWrapper,
    clock: FixedClock,
    matrix: RecordingMatrix,
    coordinator: Coordinator<TcpConnector, RecordingMatrix>,
}

async fn rig(now: &str) -> Rig {
    common_setup();
    let dir = TempDir::new().unwrap();
    let device = FakeDevice::start().await;
    let config = test_config(dir.path(), device.port());
    let clock = FixedClock::new(at(now));
    let matrix = RecordingMatrix::default();
    let channels = Channels::new();

    let coordinator = Coordinator::new(
        &config,
        DeviceClient::new(
            device.connector(),
            RetryPolicy::new(3, Duration::from_millis(10)),
            channels.clone(),
        ),
        Renderer::new(matrix.clone(), config.display()),
        TimeSeriesStore::new("solar", config.storage().solar_file()),
        TimeSeriesStore::new("grid", config.storage().grid_file()),
        Arc::new(clock.clone()),
        channels,
    );

    Rig {
        _dir: dir,
        device,
        config,
        clock,
        matrix,
        coordinator,
    }
}

#[tokio::test]
async fn day_tick_stores_and_draws() -> Result<()> {
    let mut rig = rig("2024-06-01 12:00").await;
    let registers = rig.config.registers();
    rig.device.set(&registers.solar_power(), 2500);
    rig.device.set(&registers.grid_power(), -1500);

    rig.coordinator.day_tick().await?;

    let solar = TimeSeriesStore::new("solar", rig.config.storage().solar_file());
    let grid = TimeSeriesStore::new("grid", rig.config.storage().grid_file());
    assert_eq!(solar.read_all()?, vec![Sample::new(at("2024-06-01 12:00"), 2500.0)]);
    assert_eq!(grid.values()?, vec![-1.5]);

    // exporting: both bars full, grid bar red at full pulse on the last frame
    let last = rig.matrix.last().unwrap();
    assert_eq!(last[index(7, 0)], Rgb(255, 0, 0));
    assert!(last[index(0, 0)].is_lit());

    let stats = rig.coordinator.stats();
    assert_eq!((stats.day_ticks, stats.samples_stored, stats.failed_reads), (1, 2, 0));
    Ok(())
}

#[tokio::test]
async fn failed_read_skips_sample() -> Result<()> {
    let mut rig = rig("2024-06-01 12:00").await;
    let registers = rig.config.registers();
    rig.device.set(&registers.grid_power(), 500);

    rig.coordinator.day_tick().await?;

    let solar = TimeSeriesStore::new("solar", rig.config.storage().solar_file());
    assert!(solar.read_all()?.is_empty());
    assert_eq!(rig.device.requests_for(registers.solar_power().address), 3);

    let stats = rig.coordinator.stats();
    assert_eq!(stats.failed_reads, 1);
    assert_eq!(stats.samples_stored, 1);
    // startup notice, then the exhausted read, both before the readings
    assert_eq!(stats.messages_shown, 2);

    // no solar bar; grid bar blue since importing
    let last = rig.matrix.last().unwrap();
    assert!(!last[index(0, 7)].is_lit());
    assert_eq!(last[index(7, 0)], Rgb(0, 0, 255));
    Ok(())
}

#[tokio::test]
async fn store_failure_is_reported() -> Result<()> {
    let mut rig = rig("2024-06-01 12:00").await;
    let registers = rig.config.registers();
    rig.device.set(&registers.solar_power(), 1000);
    rig.device.set(&registers.grid_power(), 0);
    std::fs::create_dir_all(rig.config.storage().solar_file())?;

    rig.coordinator.day_tick().await?;

    let stats = rig.coordinator.stats();
    assert!(stats.store_errors >= 1);
    assert_eq!(stats.samples_stored, 1);
    assert!(stats.messages_shown >= 1);
    Ok(())
}

#[tokio::test]
async fn night_tick_refreshes_yield_once_per_hour() -> Result<()> {
    let mut rig = rig("2024-06-01 20:30").await;
    let daily = rig.config.registers().daily_yield();
    rig.device.set(&daily, 1234);

    let solar = TimeSeriesStore::new("solar", rig.config.storage().solar_file());
    solar.append(Sample::new(at("2024-06-01 07:00"), 1000.0))?;
    solar.append(Sample::new(at("2024-06-01 13:00"), 4000.0))?;

    rig.coordinator.night_tick().await?;

    assert_eq!(rig.device.requests_for(daily.address), 1);
    let snapshot = rig.coordinator.daily_yield().cloned().unwrap();
    assert_eq!(snapshot.energy_kwh, 12.34);
    assert_eq!(snapshot.date, at("2024-06-01 20:30").date());
    assert_eq!(
        DailyYieldFile::new(rig.config.storage().daily_yield_file()).load(),
        Some(snapshot)
    );
    assert_eq!(rig.coordinator.stats().yield_refreshes, 1);

    // the chart is what stays on screen: buckets of 1h45 from 06:00
    let levels = rig.coordinator.chart_levels(at("2024-06-01 20:30"));
    assert_eq!(levels, vec![2, 0, 0, 0, 8, 0, 0, 0]);
    assert_eq!(rig.matrix.last(), Some(solar_matrix::display::renderer::bar_frame(&levels)));

    // same hour: no second read
    rig.clock.set(at("2024-06-01 20:45"));
    rig.coordinator.night_tick().await?;
    assert_eq!(rig.device.requests_for(daily.address), 1);

    rig.clock.set(at("2024-06-01 21:00"));
    rig.coordinator.night_tick().await?;
    assert_eq!(rig.device.requests_for(daily.address), 2);
    Ok(())
}

#[tokio::test]
async fn night_tick_without_snapshot_shows_zero_yield() -> Result<()> {
    let mut rig = rig("2024-06-02 03:00").await;
    rig.matrix.reset();

    rig.coordinator.night_tick().await?;

    assert_eq!(rig.device.requests_for(rig.config.registers().daily_yield().address), 0);
    assert!(rig.coordinator.daily_yield().is_none());

    // startup notice in green, then "Daily power: 0.00 kWh" in white
    let frames = rig.matrix.frames();
    let first_white = frames.iter().position(|f| f.contains(&Rgb::WHITE)).unwrap();
    assert!(frames[..first_white].iter().any(|f| f.contains(&Rgb::GREEN)));
    assert!(!frames[first_white..].iter().any(|f| f.contains(&Rgb::GREEN)));
    assert_eq!(rig.coordinator.stats().messages_shown, 1);

    // the empty chart is what stays on screen
    assert!(rig.matrix.last().unwrap().iter().all(|p| !p.is_lit()));
    Ok(())
}

#[tokio::test]
async fn snapshot_is_loaded_at_startup() -> Result<()> {
    let dir = TempDir::new()?;
    let device = FakeDevice::start().await;
    let config = test_config(dir.path(), device.port());
    let file = DailyYieldFile::new(config.storage().daily_yield_file());
    file.save(&solar_matrix::daily_yield::DailyYield::new(8.5, at("2024-06-01 22:00")))?;

    let coordinator = Coordinator::new(
        &config,
        DeviceClient::new(device.connector(), RetryPolicy::default(), Channels::new()),
        Renderer::new(RecordingMatrix::default(), config.display()),
        TimeSeriesStore::new("solar", config.storage().solar_file()),
        TimeSeriesStore::new("grid", config.storage().grid_file()),
        Arc::new(FixedClock::new(at("2024-06-02 02:00"))),
        Channels::new(),
    );

    assert_eq!(coordinator.daily_yield().map(|d| d.energy_kwh), Some(8.5));
    Ok(())
}

/// Wall clock that starts at `base` and follows tokio time.
struct TokioClock {
    base: chrono::NaiveDateTime,
    origin: Instant,
}

impl Clock for TokioClock {
    fn now(&self) -> chrono::NaiveDateTime {
        self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn scheduler_switches_to_night_at_day_end() -> Result<()> {
    common_setup();
    let dir = TempDir::new()?;
    let config = test_config(dir.path(), 502);
    let registers = config.registers();
    let channels = Channels::new();

    let device = MemoryDevice::with_latency(Duration::from_secs(2));
    device.set(&registers.solar_power(), 800);
    device.set(&registers.grid_power(), -200);
    device.set(&registers.daily_yield(), 1234);

    let origin = Instant::now();
    let clock = Arc::new(TokioClock {
        base: chrono::NaiveDateTime::parse_from_str("2024-06-01 19:59:30", "%Y-%m-%d %H:%M:%S")?,
        origin,
    });

    let mut coordinator = Coordinator::new(
        &config,
        DeviceClient::new(device.clone(), RetryPolicy::new(3, Duration::from_secs(1)), channels.clone()),
        Renderer::new(RecordingMatrix::default(), config.display()),
        TimeSeriesStore::new("solar", config.storage().solar_file()),
        TimeSeriesStore::new("grid", config.storage().grid_file()),
        clock.clone(),
        channels.clone(),
    );

    // a compensated night pause would start the second night tick at 120 s
    let shutdown = channels.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(121)).await;
        let _ = shutdown.send(());
    });

    Scheduler::new(&config, clock, channels).start(&mut coordinator).await?;

    let stats = coordinator.stats();
    assert_eq!((stats.day_ticks, stats.night_ticks), (1, 1));
    assert_eq!(stats.yield_refreshes, 1);

    // the day tick spent 4 s on reads and still started the night on the minute
    let reads: Vec<(u16, Duration)> = device.reads().iter().map(|(a, t)| (*a, *t - origin)).collect();
    assert_eq!(
        reads,
        vec![
            (registers.solar_power().address, Duration::ZERO),
            (registers.grid_power().address, Duration::from_secs(2)),
            (registers.daily_yield().address, Duration::from_secs(60)),
        ]
    );
    assert_eq!(
        coordinator.daily_yield().map(|d| d.timestamp),
        Some(chrono::NaiveDateTime::parse_from_str("2024-06-01 20:00:30", "%Y-%m-%d %H:%M:%S")?)
    );

    let solar = TimeSeriesStore::new("solar", config.storage().solar_file());
    assert_eq!(solar.read_all()?, vec![Sample::new(at("2024-06-01 19:59"), 800.0)]);
    Ok(())
}
