//! UTM mitigation recommendations

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Score at or above which intrusion prevention is recommended
pub const IPS_SCORE_THRESHOLD: f64 = 5.0;

/// A UTM capability worth enabling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mitigation {
    Firewall,
    Ips,
    WebFilter,
}

impl Mitigation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mitigation::Firewall => "firewall",
            Mitigation::Ips => "ips",
            Mitigation::WebFilter => "web_filter",
        }
    }
}

impl fmt::Display for Mitigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mitigations for a scored device.
///
/// `firewall` when any port is open, `web_filter` when any country is in
/// `danger_countries` (compared case-insensitively against uppercase codes),
/// `ips` when `score >= 5`.
pub fn recommend_mitigations<P, C>(
    score: f64,
    open_ports: &[P],
    countries: &[C],
    danger_countries: &HashSet<String>,
) -> BTreeSet<Mitigation>
where
    P: AsRef<str>,
    C: AsRef<str>,
{
    let mut items = BTreeSet::new();

    if !open_ports.is_empty() {
        items.insert(Mitigation::Firewall);
    }
    if countries
        .iter()
        .any(|c| danger_countries.contains(&c.as_ref().trim().to_ascii_uppercase()))
    {
        items.insert(Mitigation::WebFilter);
    }
    if score >= IPS_SCORE_THRESHOLD {
        items.insert(Mitigation::Ips);
    }

    items
}
