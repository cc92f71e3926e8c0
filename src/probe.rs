use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time;

/// Connect timeout for a single TCP probe.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Back-off before retrying a probe that hit file-descriptor exhaustion.
const FD_BACKOFF: Duration = Duration::from_secs(2);

/// Overall deadline for one ICMP reachability check.
const PING_DEADLINE: Duration = Duration::from_secs(2);

/// Echo requests sent per ICMP check.
const ECHO_COUNT: u16 = 3;

/// Datagrams sent per UDP check.
const UDP_SENDS: usize = 3;

/// Probe a TCP port. Returns true if a connection could be established.
///
/// When the connect fails because the process ran out of file descriptors,
/// the probe sleeps and retries the same port instead of reporting it
/// closed; every other error counts as closed or filtered.
pub async fn tcp_probe(ip: IpAddr, port: &str) -> bool {
    let Ok(port) = port.parse::<u16>() else {
        return false;
    };
    let addr = SocketAddr::new(ip, port);

    loop {
        match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(conn)) => {
                drop(conn);
                return true;
            }
            Ok(Err(e)) if e.to_string().contains("too many open files") => {
                time::sleep(FD_BACKOFF).await;
            }
            _ => return false,
        }
    }
}

/// Probe a UDP port by sending three single-null-byte datagrams.
///
/// UDP gives no acknowledgement, so the port is reported open only when all
/// sends succeed. Failure to bind or connect the socket surfaces as an
/// error; individual send failures just mark the port closed.
pub async fn udp_probe(ip: IpAddr, port: &str) -> Result<bool> {
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port value: {port}"))?;

    let local: SocketAddr = match ip {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local)
        .await
        .context("unable to bind local UDP socket")?;
    socket
        .connect(SocketAddr::new(ip, port))
        .await
        .with_context(|| format!("unable to connect UDP socket to {ip}:{port}"))?;

    let mut error_count = 0;
    for _ in 0..UDP_SENDS {
        if socket.send(&[0u8]).await.is_err() {
            error_count += 1;
        }
    }

    Ok(error_count == 0)
}

/// Ping a host with three echo requests in privileged (raw socket) mode.
/// Returns true only when every request was answered within the deadline.
pub async fn icmp_probe(ip: IpAddr) -> Result<bool> {
    let config = match ip {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&config).context("unable to create ICMP client")?;
    let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
    pinger.timeout(PING_DEADLINE);

    let payload = [0u8; 56];
    let replies = time::timeout(PING_DEADLINE, async {
        let mut replies = 0u16;
        for seq in 0..ECHO_COUNT {
            if pinger.ping(PingSequence(seq), &payload).await.is_ok() {
                replies += 1;
            }
        }
        replies
    })
    .await
    .unwrap_or(0);

    Ok(replies == ECHO_COUNT)
}
