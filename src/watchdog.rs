//! Network reachability watchdog.
//!
//! Independent of the poll loop: it pings a handful of hosts on its own
//! cadence and, after enough consecutive misses, reboots the machine (when
//! allowed). All logging goes to the `watchdog` target.

use crate::prelude::*;

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const TARGET: &str = "watchdog";
const PUBLIC_HOSTS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];
const STATS_EVERY: u64 = 100;

#[async_trait]
pub trait Probe: Send + Sync {
    async fn reachable(&self, host: &str, timeout: Duration) -> bool;
}

#[async_trait]
pub trait Rebooter: Send + Sync {
    async fn reboot(&self) -> Result<()>;
}

/// One ICMP echo through the system `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

#[async_trait]
impl Probe for PingProbe {
    async fn reachable(&self, host: &str, timeout: Duration) -> bool {
        let wait = timeout.as_secs().max(1).to_string();
        let mut command = Command::new("ping");
        command
            .args(["-c", "1", "-W", wait.as_str(), host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout + Duration::from_secs(2), command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(err)) => {
                warn!(target: TARGET, "cannot run ping for {}: {}", host, err);
                false
            }
            Err(_) => {
                debug!(target: TARGET, "ping {} timed out", host);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReboot;

#[async_trait]
impl Rebooter for SystemReboot {
    async fn reboot(&self) -> Result<()> {
        let status = Command::new("sudo").arg("reboot").status().await?;
        if !status.success() {
            bail!("reboot command exited with {}", status);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Reachable,
    Unreachable { failures: u32 },
    /// Threshold hit with reboot disabled; the counter starts over.
    Reset,
    Rebooting,
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct WatchdogStats {
    pub checks: u64,
    pub failed_checks: u64,
    pub resets: u64,
}

pub struct NetworkWatchdog<P, R> {
    probe: P,
    rebooter: R,
    hosts: Vec<String>,
    interval: Duration,
    ping_timeout: Duration,
    max_failures: u32,
    enable_reboot: bool,
    failures: u32,
    stats: WatchdogStats,
}

impl<P: Probe, R: Rebooter> NetworkWatchdog<P, R> {
    pub fn new(config: &config::Watchdog, hosts: Vec<String>, probe: P, rebooter: R) -> Self {
        Self {
            probe,
            rebooter,
            hosts,
            interval: config.check_interval(),
            ping_timeout: config.ping_timeout(),
            max_failures: config.max_failures().max(1),
            enable_reboot: config.enable_reboot(),
            failures: 0,
            stats: WatchdogStats::default(),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn stats(&self) -> WatchdogStats {
        self.stats
    }

    pub async fn start(&mut self, channels: Channels) -> Result<()> {
        let mut shutdown = channels.shutdown.subscribe();
        info!(
            target: TARGET,
            "watching {} every {:?}, reboot after {} failures ({})",
            self.hosts.join(", "),
            self.interval,
            self.max_failures,
            if self.enable_reboot { "enabled" } else { "disabled" }
        );

        loop {
            if self.check_once().await == Outcome::Rebooting {
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    info!(target: TARGET, "watchdog stopping");
                    self.log_stats();
                    return Ok(());
                }
            }
        }
    }

    pub async fn check_once(&mut self) -> Outcome {
        self.stats.checks += 1;
        let outcome = self.evaluate().await;

        if self.stats.checks % STATS_EVERY == 0 {
            self.log_stats();
        }

        outcome
    }

    async fn evaluate(&mut self) -> Outcome {
        for host in &self.hosts {
            if self.probe.reachable(host, self.ping_timeout).await {
                if self.failures > 0 {
                    info!(target: TARGET, "network back via {} after {} failed checks", host, self.failures);
                }
                self.failures = 0;
                return Outcome::Reachable;
            }
        }

        self.failures += 1;
        self.stats.failed_checks += 1;
        warn!(
            target: TARGET,
            "no host reachable ({}/{})",
            self.failures,
            self.max_failures
        );

        if self.failures < self.max_failures {
            return Outcome::Unreachable {
                failures: self.failures,
            };
        }

        if !self.enable_reboot {
            warn!(target: TARGET, "failure threshold reached but reboot is disabled, resetting counter");
            self.failures = 0;
            self.stats.resets += 1;
            return Outcome::Reset;
        }

        error!(target: TARGET, "network unreachable for {} checks, rebooting", self.failures);
        if let Err(err) = self.rebooter.reboot().await {
            error!(target: TARGET, "reboot failed: {:?}", err);
        }
        Outcome::Rebooting
    }

    fn log_stats(&self) {
        info!(
            target: TARGET,
            "{} checks, {} failed, {} resets, {} consecutive failures",
            self.stats.checks,
            self.stats.failed_checks,
            self.stats.resets,
            self.failures
        );
    }
}

/// Configured hosts, or the default gateway plus public resolvers.
pub async fn resolve_hosts(config: &config::Watchdog) -> Vec<String> {
    if !config.hosts_to_check().is_empty() {
        return config.hosts_to_check().to_vec();
    }

    let mut hosts = Vec::new();
    match default_gateway().await {
        Some(gateway) => hosts.push(gateway),
        None => warn!(target: TARGET, "no default gateway found"),
    }
    hosts.extend(PUBLIC_HOSTS.iter().map(|h| h.to_string()));
    hosts
}

pub async fn default_gateway() -> Option<String> {
    let output = Command::new("ip")
        .args(["route", "show", "default"])
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    parse_gateway(&String::from_utf8_lossy(&output.stdout))
}

/// Address after `via` on the first `default` route line.
pub fn parse_gateway(routes: &str) -> Option<String> {
    routes
        .lines()
        .filter(|line| line.starts_with("default"))
        .find_map(|line| {
            let mut words = line.split_whitespace();
            words.find(|w| *w == "via")?;
            words.next().map(str::to_string)
        })
}
