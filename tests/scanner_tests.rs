use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use scan_exporter::metrics::{MetricsSink, PromSink};
use scan_exporter::scanner::Target;
use scan_exporter::store::MemoryStore;
use scan_exporter::types::Protocol;

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

/// Full pipeline against loopback: one listening port, one closed port.
#[tokio::test(flavor = "multi_thread")]
async fn tcp_cycle_reports_open_ports_to_the_sink() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let closed_port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        port
    };

    let mut target = Target::new("loopback".to_string(), "127.0.0.1".parse().unwrap(), 2);
    let ports = vec![open_port.to_string(), closed_port.to_string()];
    let expected: HashSet<String> = [open_port.to_string()].into_iter().collect();
    // A long period means exactly one cycle runs during the test.
    target.enable_ports(Protocol::Tcp, Duration::from_secs(3600), ports, expected);

    let sink = Arc::new(PromSink::new(Arc::new(MemoryStore::default())).unwrap());
    let registry = sink.registry();
    let sink_dyn: Arc<dyn MetricsSink> = sink;
    tokio::spawn(Arc::new(target).run(sink_dyn));

    // The diff gauge is the last one a cycle touches; once it shows up the
    // whole outcome has been recorded.
    let labels = [("proto", "tcp"), ("name", "loopback")];
    let mut diff = None;
    for _ in 0..100 {
        diff = gauge_value(&registry, "scanexporter_diff_ports_total", &labels);
        if diff.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(diff, Some(1.0), "scan cycle never reached the sink");

    assert_eq!(
        gauge_value(&registry, "scanexporter_open_ports_total", &labels),
        Some(1.0)
    );
    assert_eq!(
        gauge_value(&registry, "scanexporter_unexpected_open_ports_total", &labels),
        Some(0.0)
    );
    assert_eq!(
        gauge_value(&registry, "scanexporter_unexpected_closed_ports_total", &labels),
        Some(0.0)
    );
}
