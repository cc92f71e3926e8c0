use std::net::IpAddr;
use std::sync::Arc;

use prometheus::{Encoder, Registry, TextEncoder};
use scan_exporter::metrics::{MetricsSink, PromSink};
use scan_exporter::store::MemoryStore;
use scan_exporter::types::{Protocol, ScanOutcome};

fn sink() -> Arc<PromSink> {
    Arc::new(PromSink::new(Arc::new(MemoryStore::default())).unwrap())
}

fn outcome(name: &str, ip: &str, protocol: Protocol, open: &[&str]) -> ScanOutcome {
    ScanOutcome {
        name: name.to_string(),
        ip: ip.parse::<IpAddr>().unwrap(),
        protocol,
        open: open.iter().map(|p| p.to_string()).collect(),
        unexpected: Vec::new(),
        closed: Vec::new(),
    }
}

/// Read one gauge value back out of the registry, matching on labels.
fn gauge_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    for family in registry.gather() {
        if family.get_name() != name {
            continue;
        }
        'metric: for metric in family.get_metric() {
            for (key, value) in labels {
                let found = metric
                    .get_label()
                    .iter()
                    .any(|l| l.get_name() == *key && l.get_value() == *value);
                if !found {
                    continue 'metric;
                }
            }
            return Some(metric.get_gauge().get_value());
        }
    }
    None
}

#[tokio::test]
async fn outcomes_show_up_on_the_registry() {
    let sink = sink();
    let mut o = outcome("web", "192.0.2.7", Protocol::Tcp, &["22", "80", "8080"]);
    o.unexpected = vec!["8080".to_string()];
    o.closed = vec!["443".to_string()];

    sink.receive_outcome(o).await.unwrap();

    let registry = sink.registry();
    let labels = [("proto", "tcp"), ("name", "web")];
    assert_eq!(
        gauge_value(&registry, "scanexporter_open_ports_total", &labels),
        Some(3.0)
    );
    assert_eq!(
        gauge_value(&registry, "scanexporter_unexpected_open_ports_total", &labels),
        Some(1.0)
    );
    assert_eq!(
        gauge_value(&registry, "scanexporter_unexpected_closed_ports_total", &labels),
        Some(1.0)
    );
    // First scan: every open port counts as different.
    assert_eq!(
        gauge_value(&registry, "scanexporter_diff_ports_total", &labels),
        Some(3.0)
    );
}

#[tokio::test]
async fn diff_is_computed_against_the_previous_cycle() {
    let sink = sink();
    let labels = [("proto", "tcp"), ("name", "web")];

    sink.receive_outcome(outcome("web", "192.0.2.7", Protocol::Tcp, &["22", "80"]))
        .await
        .unwrap();
    sink.receive_outcome(outcome("web", "192.0.2.7", Protocol::Tcp, &["22", "443"]))
        .await
        .unwrap();

    // 80 disappeared and 443 appeared.
    assert_eq!(
        gauge_value(&sink.registry(), "scanexporter_diff_ports_total", &labels),
        Some(2.0)
    );
}

#[tokio::test]
async fn ping_outcomes_move_the_down_gauge() {
    let sink = sink();
    let registry = sink.registry();
    let gauge = |r: &Registry| gauge_value(r, "scanexporter_icmp_not_responding_total", &[]);

    let up = outcome("web", "192.0.2.7", Protocol::Icmp, &["1"]);
    let down = outcome("web", "192.0.2.7", Protocol::Icmp, &[]);

    sink.receive_outcome(up.clone()).await.unwrap();
    assert_eq!(gauge(&registry), Some(0.0));

    sink.receive_outcome(down.clone()).await.unwrap();
    assert_eq!(gauge(&registry), Some(1.0));

    sink.receive_outcome(down).await.unwrap();
    assert_eq!(gauge(&registry), Some(1.0));

    sink.receive_outcome(up).await.unwrap();
    assert_eq!(gauge(&registry), Some(0.0));
}

#[tokio::test]
async fn registry_renders_as_prometheus_text() {
    let sink = sink();
    sink.set_target_count(3);
    sink.receive_outcome(outcome("web", "192.0.2.7", Protocol::Tcp, &["22"]))
        .await
        .unwrap();

    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&sink.registry().gather(), &mut buf)
        .unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("scanexporter_targets_number_total 3"));
    assert!(text.contains("scanexporter_open_ports_total{name=\"web\",proto=\"tcp\"} 1"));
}
