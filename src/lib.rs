pub mod channels;     // Event and shutdown channels
pub mod chart;        // Night chart bucketing
pub mod config;       // Configuration management
pub mod coordinator;  // Main poll coordinator
pub mod daily_yield;  // Daily yield snapshot
pub mod display;      // LED matrix sinks and rendering
pub mod error;        // Device and store errors
pub mod level;        // Reading to bar level mapping
pub mod modbus;       // Modbus TCP framing and client
pub mod options;      // Command line options parsing
pub mod prelude;      // Common imports
pub mod register;     // Register descriptors and maps
pub mod retention;    // Scheduled series trimming
pub mod retry;        // Bounded retry policy
pub mod scheduler;    // Day/night tick scheduling
pub mod store;        // CSV time series storage
pub mod watchdog;     // Network watchdog

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::display::{Matrix, Renderer};
use crate::modbus::{DeviceClient, TcpConnector};
use crate::options::Options;
use crate::prelude::*;
use crate::register::RegisterMap;
use crate::retention::RetentionTask;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::watchdog::{NetworkWatchdog, PingProbe, SystemReboot};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();
}

pub fn device_client(config: &ConfigWrapper, channels: Channels) -> DeviceClient<TcpConnector> {
    let inverter = config.inverter();
    DeviceClient::new(
        TcpConnector::from_config(inverter),
        RetryPolicy::new(inverter.attempts(), inverter.retry_delay()),
        channels,
    )
}

/// Runs until a shutdown is broadcast on `channels`, or `options.runtime` elapses.
pub async fn app(options: Options, config: ConfigWrapper, channels: Channels) -> Result<()> {
    info!("solar-matrix {} starting with {}", CARGO_PKG_VERSION, options.config_file);
    config.log_summary();

    if options.dump_registers {
        return dump_registers(&config, options.register_file.as_deref(), channels).await;
    }

    if let Some(seconds) = options.runtime {
        info!("stopping after {} seconds", seconds);
        let shutdown = channels.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            info!("runtime limit reached");
            let _ = shutdown.send(());
        });
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = config.storage();
    let solar = TimeSeriesStore::new("solar", storage.solar_file());
    let grid = TimeSeriesStore::new("grid", storage.grid_file());

    info!("Initializing components...");

    info!("  Creating retention task...");
    let retention = RetentionTask::new(
        &config,
        vec![solar.clone(), grid.clone()],
        clock.clone(),
        channels.clone(),
    );
    let mut handles = vec![tokio::spawn(async move {
        if let Err(e) = retention.start().await {
            error!("Retention task failed: {:?}", e);
        }
    })];

    if config.watchdog().enabled() {
        info!("  Creating network watchdog...");
        let hosts = watchdog::resolve_hosts(config.watchdog()).await;
        let mut watchdog = NetworkWatchdog::new(config.watchdog(), hosts, PingProbe, SystemReboot);
        let channels = channels.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = watchdog.start(channels).await {
                error!("Watchdog failed: {:?}", e);
            }
        }));
    }

    info!("  Creating display...");
    let matrix = Matrix::from_config(config.display())?;
    let renderer = Renderer::new(matrix, config.display());

    info!("  Creating coordinator...");
    let mut coordinator = Coordinator::new(
        &config,
        device_client(&config, channels.clone()),
        renderer,
        solar,
        grid,
        clock.clone(),
        channels.clone(),
    );

    let scheduler = Scheduler::new(&config, clock, channels.clone());
    let result = scheduler.start(&mut coordinator).await;

    info!("Shutdown signal received, stopping components...");
    let _ = channels.shutdown.send(());
    if let Err(e) = coordinator.clear_display() {
        warn!("clearing display failed: {:?}", e);
    }

    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            error!("Error waiting for background task: {}", e);
        }
    }

    coordinator.stats().print_summary();
    info!("Application shutdown complete");
    result
}

async fn dump_registers(config: &ConfigWrapper, register_file: Option<&str>, channels: Channels) -> Result<()> {
    let map = match register_file {
        Some(file) => RegisterMap::from_file(file)?,
        None => RegisterMap::sun2000(),
    };
    let client = device_client(config, channels);
    info!("reading {} registers", map.len());

    for register in map.iter() {
        match client.read_value(register).await {
            Ok(value) => println!("{:<32} {:>5} {} {}", register.name, register.address, value, register.unit()),
            Err(err) => println!("{:<32} {:>5} error: {}", register.name, register.address, err),
        }
    }

    Ok(())
}
