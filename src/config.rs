use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::ports;
use crate::scanner::Target;
use crate::types::Protocol;

/// Top-level configuration file layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub targets: Vec<TargetSpec>,
}

/// One target entry as written in the configuration file.
///
/// A protocol is enabled by the presence of its section; anything else
/// under a target is rejected at load time.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    pub name: String,
    pub ip: String,
    pub workers: usize,
    pub tcp: Option<PortProtocolSpec>,
    pub udp: Option<PortProtocolSpec>,
    pub icmp: Option<PingSpec>,
}

/// Schedule and port ranges for a TCP or UDP section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortProtocolSpec {
    pub period: String,
    pub range: String,
    #[serde(default)]
    pub expected: String,
}

/// Schedule for an ICMP section. Pings have no port ranges.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PingSpec {
    pub period: String,
}

/// Read and validate a configuration file, producing ready-to-run targets.
/// Any invalid entry fails the whole load.
pub fn load(path: &Path) -> Result<Vec<Target>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("unable to open config {}", path.display()))?;
    parse(&raw)
}

/// Validate configuration text and build the target list.
pub fn parse(raw: &str) -> Result<Vec<Target>> {
    let config: Config = serde_yaml::from_str(raw).context("unable to parse configuration")?;

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(config.targets.len());
    for spec in config.targets {
        if !seen.insert(spec.name.clone()) {
            bail!("duplicate target name {:?}", spec.name);
        }
        targets.push(build_target(spec)?);
    }
    Ok(targets)
}

fn build_target(spec: TargetSpec) -> Result<Target> {
    let ip: IpAddr = spec
        .ip
        .parse()
        .with_context(|| format!("unable to parse IP address {}", spec.ip))?;
    if spec.workers == 0 {
        bail!("target {}: workers must be positive", spec.name);
    }

    let mut target = Target::new(spec.name.clone(), ip, spec.workers);

    if let Some(tcp) = &spec.tcp {
        enable_ports(&mut target, Protocol::Tcp, tcp)
            .with_context(|| format!("target {}: tcp", spec.name))?;
    }
    if let Some(udp) = &spec.udp {
        enable_ports(&mut target, Protocol::Udp, udp)
            .with_context(|| format!("target {}: udp", spec.name))?;
    }
    if let Some(icmp) = &spec.icmp {
        let period = parse_period(&icmp.period)
            .with_context(|| format!("target {}: icmp", spec.name))?;
        target.enable_ping(period);
    }

    Ok(target)
}

fn enable_ports(target: &mut Target, proto: Protocol, spec: &PortProtocolSpec) -> Result<()> {
    let period = parse_period(&spec.period)?;
    let range = ports::parse_ports_range(&spec.range)?;
    let expected = ports::parse_ports_range(&spec.expected)?.into_iter().collect();
    target.enable_ports(proto, period, range, expected);
    Ok(())
}

/// Parse a scan period.
///
/// Periods either combine `h`, `m` and `s` components (`1h30m`, `45s`) or
/// give a whole number of days as `<n>d`. The result must be non-zero.
pub fn parse_period(period: &str) -> Result<Duration> {
    let duration = if period.contains(['h', 'm', 's']) {
        parse_hms(period)?
    } else if let Some(days) = period.strip_suffix('d') {
        let days: u64 = days
            .parse()
            .with_context(|| format!("invalid period {period:?}"))?;
        Duration::from_secs(days * 24 * 3600)
    } else {
        bail!("invalid period {period:?}: expected h/m/s components or a day count like 2d");
    };

    if duration.is_zero() {
        bail!("invalid period {period:?}: period must be positive");
    }
    Ok(duration)
}

fn parse_hms(period: &str) -> Result<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for c in period.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .with_context(|| format!("invalid period {period:?}"))?;
        digits.clear();
        total += match c {
            'h' => Duration::from_secs(value * 3600),
            'm' => Duration::from_secs(value * 60),
            's' => Duration::from_secs(value),
            other => bail!("invalid period {period:?}: unknown unit {other:?}"),
        };
    }
    if !digits.is_empty() {
        bail!("invalid period {period:?}: number without a unit");
    }
    Ok(total)
}
