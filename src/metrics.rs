use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use prometheus::{IntGauge, IntGaugeVec, Opts, Registry};

use crate::store::PriorStore;
use crate::types::{Protocol, ScanOutcome};

/// Where completed scan outcomes end up.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Record the outcome of one scan cycle and persist its open-port set.
    async fn receive_outcome(&self, outcome: ScanOutcome) -> Result<()>;

    /// Expose how many targets the configuration declares. Called once.
    fn set_target_count(&self, count: usize);
}

/// Prometheus-backed sink shared by every target in the process.
///
/// Owns the metrics registry, the down-host set for ICMP tracking and the
/// prior-state store used for cross-cycle diffs.
pub struct PromSink {
    registry: Registry,
    targets_total: IntGauge,
    icmp_down_total: IntGauge,
    uptime_sec: IntGauge,
    open_ports: IntGaugeVec,
    unexpected_ports: IntGaugeVec,
    closed_ports: IntGaugeVec,
    diff_ports: IntGaugeVec,
    down_hosts: Mutex<HashSet<String>>,
    store: Arc<dyn PriorStore>,
    started: Instant,
}

impl PromSink {
    pub fn new(store: Arc<dyn PriorStore>) -> Result<Self> {
        let registry = Registry::new();

        let targets_total = IntGauge::with_opts(Opts::new(
            "scanexporter_targets_number_total",
            "Number of targets detected in config file.",
        ))?;
        let icmp_down_total = IntGauge::with_opts(Opts::new(
            "scanexporter_icmp_not_responding_total",
            "Number of targets that don't respond to pings.",
        ))?;
        let uptime_sec = IntGauge::with_opts(Opts::new(
            "scanexporter_uptime_sec",
            "Scan exporter uptime, in seconds.",
        ))?;

        let labels = ["proto", "name"];
        let open_ports = IntGaugeVec::new(
            Opts::new("scanexporter_open_ports_total", "Number of ports that are open."),
            &labels,
        )?;
        let unexpected_ports = IntGaugeVec::new(
            Opts::new(
                "scanexporter_unexpected_open_ports_total",
                "Number of ports that are open, and shouldn't be.",
            ),
            &labels,
        )?;
        let closed_ports = IntGaugeVec::new(
            Opts::new(
                "scanexporter_unexpected_closed_ports_total",
                "Number of ports that are closed and shouldn't be.",
            ),
            &labels,
        )?;
        let diff_ports = IntGaugeVec::new(
            Opts::new(
                "scanexporter_diff_ports_total",
                "Number of ports that are different from previous scan.",
            ),
            &labels,
        )?;

        registry.register(Box::new(targets_total.clone()))?;
        registry.register(Box::new(icmp_down_total.clone()))?;
        registry.register(Box::new(uptime_sec.clone()))?;
        registry.register(Box::new(open_ports.clone()))?;
        registry.register(Box::new(unexpected_ports.clone()))?;
        registry.register(Box::new(closed_ports.clone()))?;
        registry.register(Box::new(diff_ports.clone()))?;

        Ok(Self {
            registry,
            targets_total,
            icmp_down_total,
            uptime_sec,
            open_ports,
            unexpected_ports,
            closed_ports,
            diff_ports,
            down_hosts: Mutex::new(HashSet::new()),
            store,
            started: Instant::now(),
        })
    }

    /// Handle to the registry for the exposition endpoint.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Keep the uptime gauge current for the life of the process.
    pub fn start_uptime(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                self.uptime_sec.set(self.started.elapsed().as_secs() as i64);
            }
        });
    }

    /// Track hosts that stopped (or resumed) answering pings. The down
    /// gauge always equals the cardinality of the down-host set.
    fn handle_ping(&self, outcome: &ScanOutcome) {
        let responding = !outcome.open.is_empty();
        let ip = outcome.ip.to_string();

        let mut down = self.down_hosts.lock().unwrap();
        if responding {
            down.remove(&ip);
        } else {
            down.insert(ip);
        }
        self.icmp_down_total.set(down.len() as i64);
    }
}

#[async_trait]
impl MetricsSink for PromSink {
    async fn receive_outcome(&self, outcome: ScanOutcome) -> Result<()> {
        if outcome.protocol == Protocol::Icmp {
            self.handle_ping(&outcome);
            return Ok(());
        }

        let proto = outcome.protocol.as_str();
        self.open_ports
            .with_label_values(&[proto, &outcome.name])
            .set(outcome.open.len() as i64);
        self.unexpected_ports
            .with_label_values(&[proto, &outcome.name])
            .set(outcome.unexpected.len() as i64);
        self.closed_ports
            .with_label_values(&[proto, &outcome.name])
            .set(outcome.closed.len() as i64);

        let key = format!("{}/{}", outcome.ip, proto);
        let prior = self
            .store
            .read(&key)
            .await
            .with_context(|| format!("prior-state read failed for {key}"))?;
        self.diff_ports
            .with_label_values(&[proto, &outcome.name])
            .set(diff_count(&prior, &outcome.open) as i64);
        self.store
            .replace(&key, &outcome.open)
            .await
            .with_context(|| format!("prior-state write failed for {key}"))?;

        Ok(())
    }

    fn set_target_count(&self, count: usize) {
        self.targets_total.set(count as i64);
    }
}

/// Cardinality of the symmetric difference between the previous and the
/// current open-port sets.
fn diff_count(prior: &HashSet<String>, open: &[String]) -> usize {
    let current: HashSet<&str> = open.iter().map(String::as_str).collect();
    let added = current.iter().filter(|p| !prior.contains(**p)).count();
    let removed = prior.iter().filter(|p| !current.contains(p.as_str())).count();
    added + removed
}
