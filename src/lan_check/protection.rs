//! Local firewall and endpoint protection status

use serde::{Deserialize, Serialize};

/// Whether the scanning machine's own defences are switched on. `None`
/// means the state could not be determined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostProtection {
    pub firewall_enabled: Option<bool>,
    pub endpoint_protection_enabled: Option<bool>,
}

/// `ufw status`: active, inactive or undetermined
pub fn parse_ufw_status(output: &str) -> Option<bool> {
    let output = output.to_lowercase();
    if output.contains("status: active") {
        Some(true)
    } else if output.contains("inactive") {
        Some(false)
    } else {
        None
    }
}

/// `netsh advfirewall show allprofiles`: the first profile state line wins
pub fn parse_netsh_firewall(output: &str) -> Option<bool> {
    for line in output.lines().map(str::trim) {
        if !(line.contains("State") || line.contains("状態")) {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.contains("OFF") || line.contains("無効") {
            return Some(false);
        }
        if upper.contains("ON") || line.contains("有効") {
            return Some(true);
        }
    }
    None
}

/// `(Get-MpComputerStatus).RealTimeProtectionEnabled`
pub fn parse_defender_status(output: &str) -> Option<bool> {
    match output.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
