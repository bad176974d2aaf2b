//! Established connections to public addresses and where they lead

use crate::{Result, ScanError};
use log::debug;
use maxminddb::{geoip2, Reader};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use std::path::Path;

static SOCKET_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[?([0-9A-Fa-f:.]+?)(?:%[\w.-]+)?\]?:(\d+)$").unwrap());

/// ISO country code for an address
pub trait CountryLookup: Send + Sync {
    fn country(&self, ip: IpAddr) -> Option<String>;
}

/// Country lookups backed by a GeoLite2/GeoIP2 country (or city) database
pub struct GeoIpCountries {
    reader: Reader<Vec<u8>>,
}

impl GeoIpCountries {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::open_readfile(path).map_err(|e| {
            ScanError::LookupFailure(format!("Failed to open GeoIP database {}: {}", path.display(), e))
        })?;
        Ok(Self { reader })
    }
}

impl CountryLookup for GeoIpCountries {
    fn country(&self, ip: IpAddr) -> Option<String> {
        match self.reader.lookup(ip) {
            Ok(found) => match found.decode::<geoip2::Country>() {
                Ok(Some(record)) => record.country.iso_code.map(str::to_string),
                Ok(None) => None,
                Err(e) => {
                    debug!("GeoIP decode for {} failed: {}", ip, e);
                    None
                }
            },
            Err(e) => {
                debug!("GeoIP lookup for {} failed: {}", ip, e);
                None
            }
        }
    }
}

/// Fixed table of address → country, for callers that already know
#[derive(Debug, Clone, Default)]
pub struct StaticCountries(pub BTreeMap<IpAddr, String>);

impl CountryLookup for StaticCountries {
    fn country(&self, ip: IpAddr) -> Option<String> {
        self.0.get(&ip).cloned()
    }
}

/// Whether `ip` lies outside private, loopback and link-local space
pub fn is_external(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_external(IpAddr::V4(v4));
            }
            let head = v6.segments()[0];
            let unique_local = head & 0xfe00 == 0xfc00;
            let link_local = head & 0xffc0 == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

fn parse_socket_addr(field: &str) -> Option<IpAddr> {
    let caps = SOCKET_ADDR.captures(field)?;
    let ip: IpAddr = caps[1].parse().ok()?;
    Some(match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    })
}

/// Distinct public peers of established TCP connections in `ss -tn` or
/// `netstat -tn` output. Both put the peer address in the fifth column.
pub fn external_peers(output: &str) -> BTreeSet<IpAddr> {
    output
        .lines()
        .filter(|line| line.contains("ESTAB"))
        .filter_map(|line| line.split_whitespace().nth(4))
        .filter_map(parse_socket_addr)
        .filter(|ip| is_external(*ip))
        .collect()
}

/// Connection count per resolved country, plus the peers in `danger`
/// countries formatted as `ip (CC)`
pub fn classify_peers(
    peers: &BTreeSet<IpAddr>,
    countries: &dyn CountryLookup,
    danger: &HashSet<String>,
) -> (BTreeMap<String, usize>, Vec<String>) {
    let mut counts = BTreeMap::new();
    let mut suspicious = Vec::new();

    for ip in peers {
        let code = match countries.country(*ip) {
            Some(code) if !code.is_empty() => code.to_ascii_uppercase(),
            _ => continue,
        };
        if danger.contains(&code) {
            suspicious.push(format!("{} ({})", ip, code));
        }
        *counts.entry(code).or_insert(0) += 1;
    }

    (counts, suspicious)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::DANGER_COUNTRIES;

    const SS_OUTPUT: &str = "State  Recv-Q Send-Q   Local Address:Port     Peer Address:Port Process\n\
        ESTAB  0      0        192.168.1.20:51544     142.250.72.14:443\n\
        ESTAB  0      0        192.168.1.20:40112     192.168.1.1:53\n\
        ESTAB  0      0        192.168.1.20:40114     142.250.72.14:443\n\
        ESTAB  0      0   [::ffff:192.168.1.20]:22  [::ffff:95.108.213.7]:61002\n\
        ESTAB  0      0   [2001:db8:1::20]:58210    [2a00:1450:4001:81d::200e]:443\n\
        ESTAB  0      0   [fe80::1%eth0]:58211      [fe80::2%eth0]:22\n\
        TIME-WAIT 0   0        192.168.1.20:51000     8.8.8.8:53\n";

    const NETSTAT_OUTPUT: &str = "Active Internet connections (w/o servers)\n\
        Proto Recv-Q Send-Q Local Address           Foreign Address         State\n\
        tcp        0      0 10.0.0.5:22             203.0.113.9:50122       ESTABLISHED\n\
        tcp        0      0 10.0.0.5:22             10.0.0.7:50123          ESTABLISHED\n";

    fn ips(list: &[&str]) -> BTreeSet<IpAddr> {
        list.iter().map(|ip| ip.parse().unwrap()).collect()
    }

    #[test]
    fn peers_from_ss_output() {
        assert_eq!(
            external_peers(SS_OUTPUT),
            ips(&["142.250.72.14", "95.108.213.7", "2a00:1450:4001:81d::200e"])
        );
    }

    #[test]
    fn peers_from_netstat_output() {
        assert_eq!(external_peers(NETSTAT_OUTPUT), ips(&["203.0.113.9"]));
        assert!(external_peers("").is_empty());
    }

    #[test]
    fn private_ranges_are_internal() {
        for ip in ["10.1.2.3", "172.16.0.1", "192.168.0.1", "127.0.0.1", "169.254.1.1", "fd12::1", "fe80::1", "::1"] {
            assert!(!is_external(ip.parse().unwrap()), "{}", ip);
        }
        assert!(is_external("8.8.8.8".parse().unwrap()));
        assert!(is_external("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn danger_country_peers_are_flagged() {
        let lookup = StaticCountries(
            [("95.108.213.7", "ru"), ("142.250.72.14", "US")]
                .iter()
                .map(|(ip, cc)| (ip.parse().unwrap(), cc.to_string()))
                .collect(),
        );
        let peers = ips(&["95.108.213.7", "142.250.72.14", "203.0.113.9"]);

        let (counts, suspicious) = classify_peers(&peers, &lookup, &DANGER_COUNTRIES);
        assert_eq!(suspicious, vec!["95.108.213.7 (RU)".to_string()]);
        assert_eq!(counts.get("US"), Some(&1));
        assert_eq!(counts.get("RU"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
