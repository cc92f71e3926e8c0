use anyhow::{bail, Context, Result};

/// Expand a port-range expression into the effective list of port strings.
///
/// The expression is a comma-separated list of tokens:
/// - `all` expands to every port from 1 to 65535
/// - `reserved` expands to the reserved range 1 to 1023
/// - a single port number: `443`
/// - an inclusive range: `8000-8010`
///
/// Empty tokens are skipped. Textual order and duplicates are preserved.
pub fn parse_ports_range(ranges: &str) -> Result<Vec<String>> {
    let mut ports: Vec<String> = Vec::new();

    for spec in ranges.split(',') {
        if spec.is_empty() {
            continue;
        }
        match spec {
            "all" => ports.extend((1u32..=65535).map(|p| p.to_string())),
            "reserved" => ports.extend((1u32..=1023).map(|p| p.to_string())),
            _ => {
                let (lo, hi) = match spec.split_once('-') {
                    Some((lo, hi)) => (lo, hi),
                    None => (spec, spec),
                };
                let lo: u32 = lo
                    .parse()
                    .with_context(|| format!("invalid port value: {spec}"))?;
                let hi: u32 = hi
                    .parse()
                    .with_context(|| format!("invalid port value: {spec}"))?;

                if lo > hi {
                    bail!("lower port {lo} is higher than high port {hi}");
                }
                if hi > 65535 {
                    bail!("port {hi} is higher than max port");
                }
                ports.extend((lo..=hi).map(|p| p.to_string()));
            }
        }
    }

    Ok(ports)
}

/// Sort port strings in numerical order, so that `22` comes before `1337`.
/// A plain string sort would put `1337` first.
pub fn sort_ports(ports: &[String]) -> Result<Vec<String>> {
    let mut numeric = ports
        .iter()
        .map(|p| {
            p.parse::<u32>()
                .with_context(|| format!("unsortable port {p:?}"))
        })
        .collect::<Result<Vec<u32>>>()?;

    numeric.sort_unstable();

    Ok(numeric.into_iter().map(|p| p.to_string()).collect())
}
