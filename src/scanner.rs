use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use rand::{distributions::Alphanumeric, Rng};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::MissedTickBehavior;

use crate::metrics::MetricsSink;
use crate::ports;
use crate::probe;
use crate::types::{Job, Protocol, ScanOutcome};

/// Sentinel port reported in an ICMP partial when the host answered.
const PING_RESPONDING: &str = "1";

/// Capacity of the trigger channel shared by a target's tickers.
const TRIGGER_CAPACITY: usize = 100;

/// Length of the random identifier tagging one scan cycle.
const SCAN_ID_LEN: usize = 10;

/// Schedule, port list and expectations for one protocol on one target.
#[derive(Debug, Clone)]
struct ProtocolPlan {
    period: Duration,
    ports: Vec<String>,
    expected: HashSet<String>,
}

/// A configured scan target.
///
/// Construction happens at config load; after that the target is immutable
/// except for the in-flight markers, which track which protocols currently
/// have a scan cycle running.
pub struct Target {
    name: String,
    ip: IpAddr,
    workers: usize,
    protos: HashMap<Protocol, ProtocolPlan>,
    in_flight: InFlight,
}

impl Target {
    pub fn new(name: String, ip: IpAddr, workers: usize) -> Self {
        Self {
            name,
            ip,
            workers,
            protos: HashMap::new(),
            in_flight: InFlight::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Enable periodic TCP or UDP scanning of a pre-expanded port list.
    pub fn enable_ports(
        &mut self,
        proto: Protocol,
        period: Duration,
        ports: Vec<String>,
        expected: HashSet<String>,
    ) {
        self.protos.insert(proto, ProtocolPlan { period, ports, expected });
    }

    /// Enable periodic ICMP reachability checks.
    pub fn enable_ping(&mut self, period: Duration) {
        self.protos.insert(
            Protocol::Icmp,
            ProtocolPlan {
                period,
                ports: Vec::new(),
                expected: HashSet::new(),
            },
        );
    }

    /// Run the target's scan schedule forever.
    ///
    /// Spawns one ticker per enabled protocol, the worker pool, the
    /// aggregator and the outcome forwarder, then serves triggers. A
    /// planner failure tears down this target's trigger loop; other
    /// targets are unaffected.
    pub async fn run(self: Arc<Self>, sink: Arc<dyn MetricsSink>) {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<Protocol>(TRIGGER_CAPACITY);
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(3 * self.workers);
        let (results_tx, results_rx) = mpsc::channel::<Job>(3 * self.workers);
        let (outcome_tx, outcome_rx) = mpsc::channel::<ScanOutcome>(3 * self.workers);

        for (&proto, plan) in &self.protos {
            tokio::spawn(ticker(proto, plan.period, trigger_tx.clone()));
        }
        drop(trigger_tx);

        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
        for _ in 0..self.workers {
            tokio::spawn(worker(Arc::clone(&jobs_rx), results_tx.clone()));
        }
        drop(results_tx);
        info!("{}: {} workers started", self.name, self.workers);

        tokio::spawn(Arc::clone(&self).aggregate(results_rx, outcome_tx));
        tokio::spawn(forward(sink, outcome_rx));

        while let Some(proto) = trigger_rx.recv().await {
            if !self.in_flight.begin(proto) {
                warn!("{}: a scan already started", self.name);
                continue;
            }

            let mut jobs = match self.plan_jobs(proto) {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("{}: error creating jobs: {e}", self.name);
                    return;
                }
            };
            if jobs.is_empty() {
                // No partials will ever arrive to clear the marker.
                self.in_flight.finish(proto);
                continue;
            }

            let scan_id = new_scan_id();
            let job_count = jobs.len();
            for job in &mut jobs {
                job.scan_id = scan_id.clone();
                job.job_count = job_count;
            }
            for job in jobs {
                if jobs_tx.send(job).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Split the protocol's port list into at most `workers` contiguous
    /// jobs whose sizes differ by at most one. ICMP gets a single job with
    /// no ports.
    fn plan_jobs(&self, proto: Protocol) -> Result<Vec<Job>> {
        let Some(plan) = self.protos.get(&proto) else {
            bail!("no such protocol {proto} in current protocol list");
        };

        let job = |ports: Vec<String>| Job {
            scan_id: String::new(),
            job_count: 0,
            ip: self.ip,
            protocol: proto,
            ports,
        };

        if proto == Protocol::Icmp {
            return Ok(vec![job(Vec::new())]);
        }

        let base_size = plan.ports.len() / self.workers;
        let bigger = plan.ports.len() - base_size * self.workers;

        let mut jobs = Vec::new();
        let mut size = base_size + 1;
        let mut idx = 0;
        for i in 0..self.workers {
            if i == bigger {
                size -= 1;
                if size == 0 {
                    break;
                }
            }
            jobs.push(job(plan.ports[idx..idx + size].to_vec()));
            idx += size;
        }
        Ok(jobs)
    }

    /// Fan partial results back into whole scan outcomes.
    async fn aggregate(
        self: Arc<Self>,
        mut results_rx: Receiver<Job>,
        outcome_tx: Sender<ScanOutcome>,
    ) {
        let mut acc = Aggregator::default();
        while let Some(partial) = results_rx.recv().await {
            let proto = partial.protocol;
            let Some(open) = acc.ingest(partial) else {
                continue;
            };

            let elapsed = self.in_flight.finish(proto);
            if proto != Protocol::Icmp {
                if let Some(elapsed) = elapsed {
                    info!("{}/{} scan duration {:?}", self.name, proto, elapsed);
                }
            }

            let outcome = self.outcome(proto, open);
            self.recap(&outcome);
            if outcome_tx.send(outcome).await.is_err() {
                return;
            }
        }
    }

    /// Classify a completed cycle's open ports against the expected set.
    fn outcome(&self, proto: Protocol, open: HashSet<String>) -> ScanOutcome {
        let (unexpected, closed) = match self.protos.get(&proto) {
            Some(plan) if proto != Protocol::Icmp => accordance(&open, &plan.expected),
            _ => (Vec::new(), Vec::new()),
        };
        ScanOutcome {
            name: self.name.clone(),
            ip: self.ip,
            protocol: proto,
            open: sort_or_keep(open.into_iter().collect()),
            unexpected,
            closed,
        }
    }

    /// One-line warnings when the last scan deviated from expectations.
    fn recap(&self, outcome: &ScanOutcome) {
        if !outcome.unexpected.is_empty() {
            warn!("[{}] {:?} unexpected", self.name, outcome.unexpected);
        }
        if !outcome.closed.is_empty() {
            warn!("[{}] {:?} closed", self.name, outcome.closed);
        }
    }
}

/// Per-protocol markers for cycles that have started but not yet finished.
/// The trigger loop is the only writer of start instants; the aggregator is
/// the only remover.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<Protocol, Instant>>>);

impl InFlight {
    /// Mark `proto` as scanning. Returns false, changing nothing, when a
    /// cycle is already running.
    fn begin(&self, proto: Protocol) -> bool {
        let mut map = self.0.lock().unwrap();
        match map.entry(proto) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        }
    }

    /// Clear `proto`, returning how long the cycle ran.
    fn finish(&self, proto: Protocol) -> Option<Duration> {
        let mut map = self.0.lock().unwrap();
        map.remove(&proto).map(|started| started.elapsed())
    }
}

/// Accumulates partial results per scan identifier.
#[derive(Default)]
struct Aggregator {
    open_ports: HashMap<String, HashSet<String>>,
    received: HashMap<String, usize>,
}

impl Aggregator {
    /// Record one partial. Once all `job_count` partials for the scan
    /// identifier have arrived, returns the full open-port set and releases
    /// the per-scan state.
    fn ingest(&mut self, partial: Job) -> Option<HashSet<String>> {
        let received = self.received.entry(partial.scan_id.clone()).or_insert(0);
        *received += 1;
        let done = *received == partial.job_count;

        self.open_ports
            .entry(partial.scan_id.clone())
            .or_default()
            .extend(partial.ports);

        if !done {
            return None;
        }
        self.received.remove(&partial.scan_id);
        self.open_ports.remove(&partial.scan_id)
    }
}

/// Emit `proto` into the trigger channel immediately, then once per period.
/// A full channel blocks the ticker; ticks missed while blocked are skipped.
async fn ticker(proto: Protocol, period: Duration, trigger_tx: Sender<Protocol>) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        if trigger_tx.send(proto).await.is_err() {
            return;
        }
    }
}

/// Daemon task: take jobs from the shared queue, probe every port, report
/// one partial result per job. Probe errors never escape the worker.
async fn worker(jobs_rx: Arc<tokio::sync::Mutex<Receiver<Job>>>, results_tx: Sender<Job>) {
    loop {
        let job = { jobs_rx.lock().await.recv().await };
        let Some(job) = job else {
            return;
        };

        let mut open = Vec::new();
        match job.protocol {
            Protocol::Tcp => {
                for port in &job.ports {
                    if probe::tcp_probe(job.ip, port).await {
                        debug!("{}/{} open", port, job.protocol);
                        open.push(port.clone());
                    }
                }
            }
            Protocol::Udp => {
                for port in &job.ports {
                    match probe::udp_probe(job.ip, port).await {
                        Ok(true) => {
                            debug!("{}/{} open", port, job.protocol);
                            open.push(port.clone());
                        }
                        Ok(false) => {}
                        Err(e) => warn!("error while scanning udp: {e:#}"),
                    }
                }
            }
            Protocol::Icmp => match probe::icmp_probe(job.ip).await {
                Ok(true) => {
                    debug!("{} responds to pings", job.ip);
                    open.push(PING_RESPONDING.to_string());
                }
                Ok(false) => warn!("{} doesn't respond to pings", job.ip),
                Err(e) => warn!("error while scanning icmp: {e:#}"),
            },
        }

        let partial = Job { ports: open, ..job };
        if results_tx.send(partial).await.is_err() {
            return;
        }
    }
}

/// Hand finished outcomes to the metrics sink.
async fn forward(sink: Arc<dyn MetricsSink>, mut outcome_rx: Receiver<ScanOutcome>) {
    while let Some(outcome) = outcome_rx.recv().await {
        if let Err(e) = sink.receive_outcome(outcome).await {
            error!("error handling results: {e:#}");
        }
    }
}

/// Classify `open` against `expected`: ports that are open but not
/// expected, and ports that are expected but not open. Both lists come out
/// numerically sorted.
fn accordance(
    open: &HashSet<String>,
    expected: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let unexpected: Vec<String> = open.difference(expected).cloned().collect();
    let closed: Vec<String> = expected.difference(open).cloned().collect();
    (sort_or_keep(unexpected), sort_or_keep(closed))
}

fn sort_or_keep(ports: Vec<String>) -> Vec<String> {
    match ports::sort_ports(&ports) {
        Ok(sorted) => sorted,
        Err(e) => {
            error!("error sorting ports: {e}");
            ports
        }
    }
}

/// Random 10-character alphanumeric tag shared by all jobs of one cycle.
fn new_scan_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SCAN_ID_LEN)
        .map(char::from)
        .collect()
}
