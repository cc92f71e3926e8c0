use std::fmt;
use std::net::IpAddr;

/// Scan protocols a target can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One partition of a scan cycle handed to a worker.
///
/// Workers reuse the same shape for partial results, with `ports` narrowed
/// down to the open ports found in the partition.
#[derive(Debug, Clone)]
pub struct Job {
    pub scan_id: String,
    pub job_count: usize,
    pub ip: IpAddr,
    pub protocol: Protocol,
    pub ports: Vec<String>,
}

/// Everything known about one finished scan cycle for a target/protocol.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub name: String,
    pub ip: IpAddr,
    pub protocol: Protocol,
    pub open: Vec<String>,
    pub unexpected: Vec<String>,
    pub closed: Vec<String>,
}
