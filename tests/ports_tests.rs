use scan_exporter::ports::{parse_ports_range, sort_ports};

#[test]
fn mixed_expression_expands_in_textual_order() {
    let ports = parse_ports_range("22,80,1000-1002,reserved").expect("parse ok");

    assert_eq!(ports[..4], ["22", "80", "1000", "1001"]);
    // 22, 80, 1000..=1002, then the 1023 reserved ports.
    assert_eq!(ports.len(), 5 + 1023);
    assert_eq!(ports.last().unwrap(), "1023");
}

#[test]
fn inverted_range_is_rejected() {
    assert!(parse_ports_range("80-70").is_err());
}

#[test]
fn all_covers_the_whole_port_space() {
    let ports = parse_ports_range("all").unwrap();
    assert_eq!(ports.len(), 65535);
    assert_eq!(ports.first().unwrap(), "1");
    assert_eq!(ports.last().unwrap(), "65535");
}

#[test]
fn reserved_covers_the_reserved_block() {
    let ports = parse_ports_range("reserved").unwrap();
    assert_eq!(ports.len(), 1023);
    assert_eq!(ports.last().unwrap(), "1023");
}

#[test]
fn sorting_is_numeric() {
    let ports: Vec<String> = ["9", "1337", "22", "80"]
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert_eq!(sort_ports(&ports).unwrap(), vec!["9", "22", "80", "1337"]);
}
