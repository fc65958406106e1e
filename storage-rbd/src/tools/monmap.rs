// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

const MONMAP_BANNER: &str = "dumped monmap epoch";

#[derive(Debug, Deserialize)]
struct MonMap {
    mons: Vec<MonEntry>,
}

#[derive(Debug, Deserialize)]
struct MonEntry {
    addr: String,
}

/// Monitor hosts and ports, index-aligned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorAddresses {
    pub hosts: Vec<String>,
    pub ports: Vec<String>,
}

/// Decode `ceph mon dump --format=json` output
///
/// Older ceph releases print a `dumped monmap epoch N` line ahead of the JSON.
pub fn parse_mon_dump(output: &str) -> Result<MonitorAddresses> {
    let payload = if output.starts_with(MONMAP_BANNER) {
        output.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        output
    };

    let monmap: MonMap = serde_json::from_str(payload)?;

    let mut addresses = MonitorAddresses::default();
    for mon in &monmap.mons {
        let (host, port) = split_addr(&mon.addr)?;
        addresses.hosts.push(host);
        addresses.ports.push(port);
    }
    Ok(addresses)
}

/// `host:port/nonce`, host possibly a bracketed IPv6 address
fn split_addr(addr: &str) -> Result<(String, String)> {
    let malformed = || DriverError::format(addr, "Expected host:port/nonce");

    let (host_port, _nonce) = addr.rsplit_once('/').ok_or_else(malformed)?;
    let (host, port) = host_port.rsplit_once(':').ok_or_else(malformed)?;
    let host = host.trim_matches(|c| c == '[' || c == ']');

    Ok((host.to_string(), port.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_ipv4_and_ipv6_monitors() {
        let addresses = parse_mon_dump(
            r#"{"mons":[{"addr":"10.0.0.1:6789/0"},{"addr":"[fe80::1]:6790/0"}]}"#,
        )
        .unwrap();

        assert_eq!(addresses.hosts, vec!["10.0.0.1", "fe80::1"]);
        assert_eq!(addresses.ports, vec!["6789", "6790"]);
    }

    #[test]
    fn skips_epoch_banner() {
        let output = "dumped monmap epoch 3\n{\"epoch\": 3, \"mons\": [{\"name\": \"a\", \"addr\": \"192.168.1.5:6789/0\"}]}\n";
        let addresses = parse_mon_dump(output).unwrap();

        assert_eq!(addresses.hosts, vec!["192.168.1.5"]);
        assert_eq!(addresses.ports, vec!["6789"]);
    }

    #[test]
    fn empty_monmap_yields_no_addresses() {
        let addresses = parse_mon_dump(r#"{"mons": []}"#).unwrap();
        assert!(addresses.hosts.is_empty());
        assert!(addresses.ports.is_empty());
    }

    #[test]
    fn rejects_invalid_payloads() {
        assert!(matches!(parse_mon_dump("not json"), Err(DriverError::Json(_))));
        assert!(matches!(
            parse_mon_dump(r#"{"mons":[{"addr":"10.0.0.1"}]}"#),
            Err(DriverError::Format { .. })
        ));
    }
}
