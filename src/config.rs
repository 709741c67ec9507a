use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::sync::Arc;
use std::time::Duration;

use crate::register::RegisterDescriptor;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,

    #[serde(default)]
    pub registers: Registers,

    #[serde(default)]
    pub schedule: Schedule,

    #[serde(default)]
    pub storage: Storage,

    #[serde(default)]
    pub display: Display,

    #[serde(default)]
    pub watchdog: Watchdog,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    pub host: String,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub connect_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub read_timeout: Option<Duration>,

    pub attempts: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub retry_delay_ms: Option<Duration>,
}
impl Inverter {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(502)
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id.unwrap_or(1)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(Duration::from_secs(5))
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout.unwrap_or(Duration::from_secs(5))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.unwrap_or(3)
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay_ms.unwrap_or(Duration::from_secs(1))
    }
} // }}}

// Registers {{{
/// The three registers the poll loop needs; each can be overridden.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Registers {
    pub solar_power: Option<RegisterDescriptor>,
    pub grid_power: Option<RegisterDescriptor>,
    pub daily_yield: Option<RegisterDescriptor>,
}
impl Registers {
    /// Active power in W.
    pub fn solar_power(&self) -> RegisterDescriptor {
        self.solar_power.clone().unwrap_or_else(|| {
            RegisterDescriptor::new("solar_power", 32080, 2, RegisterKind::I32).with_unit("W")
        })
    }

    /// Meter active power in kW; negative when exporting.
    pub fn grid_power(&self) -> RegisterDescriptor {
        self.grid_power.clone().unwrap_or_else(|| {
            RegisterDescriptor::new("grid_power", 37113, 2, RegisterKind::I32)
                .with_gain(1000.0)
                .with_unit("kW")
        })
    }

    pub fn daily_yield(&self) -> RegisterDescriptor {
        self.daily_yield.clone().unwrap_or_else(|| {
            RegisterDescriptor::new("daily_yield", 32114, 2, RegisterKind::U32)
                .with_gain(100.0)
                .with_unit("kWh")
        })
    }
} // }}}

// Schedule {{{
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Schedule {
    pub day_start: Option<u32>,
    pub day_end: Option<u32>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub poll_interval: Option<Duration>,

    pub yield_refresh_hours: Option<Vec<u32>>,
}
impl Schedule {
    pub fn day_start(&self) -> u32 {
        self.day_start.unwrap_or(6)
    }

    pub fn day_end(&self) -> u32 {
        self.day_end.unwrap_or(20)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(Duration::from_secs(60))
    }

    pub fn yield_refresh_hours(&self) -> Vec<u32> {
        self.yield_refresh_hours.clone().unwrap_or_else(|| vec![20, 21, 22])
    }
} // }}}

// Storage {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Storage {
    pub solar_file: Option<String>,
    pub grid_file: Option<String>,
    pub daily_yield_file: Option<String>,
    pub retention_days: Option<i64>,
    pub trim_cron: Option<String>,
}
impl Storage {
    pub fn solar_file(&self) -> &str {
        self.solar_file.as_deref().unwrap_or("logs/power_log.csv")
    }

    pub fn grid_file(&self) -> &str {
        self.grid_file.as_deref().unwrap_or("logs/power_cons_log.csv")
    }

    pub fn daily_yield_file(&self) -> &str {
        self.daily_yield_file.as_deref().unwrap_or("last_daily_energy.json")
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days.unwrap_or(365)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days())
    }

    pub fn trim_cron(&self) -> &str {
        self.trim_cron.as_deref().unwrap_or("0 0 * * *")
    }
} // }}}

// Display {{{
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayDevice {
    #[default]
    SenseHat,
    Log,
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Display {
    #[serde(default)]
    pub device: DisplayDevice,
    pub framebuffer: Option<String>,
    pub rotation: Option<u16>,

    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub scroll_speed_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub wave_speed_ms: Option<Duration>,
    pub wave_cycles: Option<u32>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub max_animation: Option<Duration>,

    pub min_level: Option<u8>,
    pub saturation: Option<f64>,
    pub chart_buckets: Option<usize>,
}
impl Display {
    pub fn device(&self) -> DisplayDevice {
        self.device
    }

    pub fn framebuffer(&self) -> Option<&str> {
        self.framebuffer.as_deref()
    }

    pub fn rotation(&self) -> u16 {
        self.rotation.unwrap_or(180)
    }

    pub fn scroll_speed(&self) -> Duration {
        self.scroll_speed_ms.unwrap_or(Duration::from_millis(60))
    }

    pub fn wave_speed(&self) -> Duration {
        self.wave_speed_ms.unwrap_or(Duration::from_millis(300))
    }

    pub fn wave_cycles(&self) -> u32 {
        self.wave_cycles.unwrap_or(20)
    }

    pub fn max_animation(&self) -> Duration {
        self.max_animation.unwrap_or(Duration::from_secs(30))
    }

    pub fn min_level(&self) -> u8 {
        self.min_level.unwrap_or(1)
    }

    pub fn saturation(&self) -> f64 {
        self.saturation.unwrap_or(0.9)
    }

    pub fn chart_buckets(&self) -> usize {
        self.chart_buckets.unwrap_or(8)
    }
} // }}}

// Watchdog {{{
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Watchdog {
    pub enabled: Option<bool>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub check_interval: Option<Duration>,
    pub max_failures: Option<u32>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub ping_timeout: Option<Duration>,

    /// Empty means the default gateway plus two public resolvers.
    #[serde(default)]
    pub hosts_to_check: Vec<String>,
    pub enable_reboot: Option<bool>,
}
impl Watchdog {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval.unwrap_or(Duration::from_secs(60))
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures.unwrap_or(10)
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout.unwrap_or(Duration::from_secs(5))
    }

    pub fn hosts_to_check(&self) -> &[String] {
        &self.hosts_to_check
    }

    pub fn enable_reboot(&self) -> bool {
        self.enable_reboot == Some(true)
    }
} // }}}

/// Cheap to clone, read-only after load.
#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn inverter(&self) -> &Inverter {
        &self.config.inverter
    }

    pub fn registers(&self) -> &Registers {
        &self.config.registers
    }

    pub fn schedule(&self) -> &Schedule {
        &self.config.schedule
    }

    pub fn storage(&self) -> &Storage {
        &self.config.storage
    }

    pub fn display(&self) -> &Display {
        &self.config.display
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.config.watchdog
    }

    pub fn loglevel(&self) -> &str {
        &self.config.loglevel
    }

    pub fn log_summary(&self) {
        self.config.log_summary()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content).map_err(|err| anyhow!("{}: {}", file, err))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Logs the effective settings, defaults filled in.
    pub fn log_summary(&self) {
        let inv = &self.inverter;
        info!("Configuration loaded successfully:");
        info!("  Inverter: {}:{} unit {}", inv.host(), inv.port(), inv.unit_id());
        info!(
            "    Timeouts: connect {:?}, read {:?}",
            inv.connect_timeout(),
            inv.read_timeout()
        );
        info!("    Retry: {} attempts, {:?} apart", inv.attempts(), inv.retry_delay());

        info!("  Registers:");
        for register in [
            self.registers.solar_power(),
            self.registers.grid_power(),
            self.registers.daily_yield(),
        ] {
            info!(
                "    {}: {} x{} {} gain {} {}",
                register.name,
                register.address,
                register.count,
                register.kind,
                register.gain,
                register.unit()
            );
        }

        let schedule = &self.schedule;
        info!(
            "  Schedule: day {:02}:00-{:02}:00, poll every {:?}, yield refresh at {:?}",
            schedule.day_start(),
            schedule.day_end(),
            schedule.poll_interval(),
            schedule.yield_refresh_hours()
        );

        let storage = &self.storage;
        info!("  Storage:");
        info!("    Solar: {}", storage.solar_file());
        info!("    Grid: {}", storage.grid_file());
        info!("    Daily yield: {}", storage.daily_yield_file());
        info!(
            "    Retention: {} days, trimmed at \"{}\"",
            storage.retention_days(),
            storage.trim_cron()
        );

        let display = &self.display;
        info!("  Display: {:?} (rotation {})", display.device(), display.rotation());
        info!(
            "    Scroll {:?}/column, wave capped at {:?}, {} chart buckets",
            display.scroll_speed(),
            display.max_animation(),
            display.chart_buckets()
        );

        let watchdog = &self.watchdog;
        info!("  Watchdog: {}", if watchdog.enabled() { "enabled" } else { "disabled" });
        if watchdog.enabled() {
            info!(
                "    Every {:?}, ping timeout {:?}, {} failures allowed, reboot {}",
                watchdog.check_interval(),
                watchdog.ping_timeout(),
                watchdog.max_failures(),
                if watchdog.enable_reboot() { "enabled" } else { "disabled" }
            );
            if !watchdog.hosts_to_check().is_empty() {
                info!("    Hosts: {}", watchdog.hosts_to_check().join(", "));
            }
        }

        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        let inv = &self.inverter;
        if inv.host().is_empty() {
            bail!("inverter.host cannot be empty");
        }
        if inv.port() == 0 {
            bail!("inverter.port must be between 1 and 65535");
        }
        if inv.attempts() == 0 {
            bail!("inverter.attempts must be at least 1");
        }
        if inv.read_timeout().is_zero() || inv.connect_timeout().is_zero() {
            bail!("inverter timeouts must be positive");
        }

        for register in [
            self.registers.solar_power(),
            self.registers.grid_power(),
            self.registers.daily_yield(),
        ] {
            register.validate()?;
        }

        let schedule = &self.schedule;
        if schedule.day_start() > 24 || schedule.day_end() > 24 {
            bail!("schedule hours must be within 0..=24");
        }
        if schedule.day_start() >= schedule.day_end() {
            bail!(
                "schedule.day_start ({}) must be before schedule.day_end ({})",
                schedule.day_start(),
                schedule.day_end()
            );
        }
        if schedule.poll_interval().is_zero() {
            bail!("schedule.poll_interval must be positive");
        }
        if let Some(hour) = schedule.yield_refresh_hours().iter().find(|h| **h > 23) {
            bail!("schedule.yield_refresh_hours contains invalid hour {}", hour);
        }

        let storage = &self.storage;
        if storage.retention_days() <= 0 {
            bail!("storage.retention_days must be positive");
        }
        if let Err(err) = cron_parser::parse(storage.trim_cron(), &chrono::Local::now()) {
            bail!("storage.trim_cron {:?} is invalid: {:?}", storage.trim_cron(), err);
        }

        let display = &self.display;
        if !matches!(display.rotation(), 0 | 90 | 180 | 270) {
            bail!("display.rotation must be 0, 90, 180 or 270");
        }
        if display.min_level() > crate::level::MAX_LEVEL {
            bail!("display.min_level must be at most {}", crate::level::MAX_LEVEL);
        }
        if !(display.saturation() > 0.0 && display.saturation() <= 1.0) {
            bail!("display.saturation must be in (0, 1]");
        }

        let watchdog = &self.watchdog;
        if watchdog.enabled() {
            if watchdog.max_failures() == 0 {
                bail!("watchdog.max_failures must be at least 1");
            }
            if watchdog.check_interval().is_zero() || watchdog.ping_timeout().is_zero() {
                bail!("watchdog intervals must be positive");
            }
        }

        Ok(())
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
