//! Per-device exposure rating
//!
//! Additive, 0 to 10, higher is riskier. Complements the deduction-based
//! security score with a quick view of what a single device exposes.

use super::{legacy_os_severity, DANGER_COUNTRIES, SAFE_COUNTRIES};

const UNKNOWN_PORT_POINTS: f64 = 0.5;
const PORT_POINTS_CAP: f64 = 6.0;
const COUNTRY_POINTS_CAP: f64 = 4.0;
const DANGER_COUNTRY_POINTS: f64 = 3.0;
const FOREIGN_COUNTRY_POINTS: f64 = 0.5;
const LEGACY_OS_POINTS: f64 = 0.7;
const UTM_FACTOR: f64 = 0.8;

fn port_points(port: &str) -> f64 {
    match port {
        "3389" => 4.0,
        "445" => 3.0,
        "23" => 2.0,
        "22" => 1.5,
        "21" | "80" => 1.0,
        "443" => 0.5,
        _ => UNKNOWN_PORT_POINTS,
    }
}

/// Exposure score and warnings for a device.
///
/// Port points are capped at 6 and country points at 4. An end-of-life
/// Windows release adds a little more, and an active UTM scales the total
/// by 0.8.
pub fn device_exposure<P, C>(
    open_ports: &[P],
    countries: &[C],
    has_utm: bool,
    os_version: Option<&str>,
) -> (f64, Vec<String>)
where
    P: AsRef<str>,
    C: AsRef<str>,
{
    let mut warnings = Vec::new();

    let mut ports = 0.0;
    for port in open_ports {
        let port = port.as_ref().trim();
        ports += port_points(port);
        if port == "3389" {
            warnings.push("RDP port open (3389)".to_string());
        }
    }

    let mut country_points = 0.0;
    for country in countries {
        let code = country.as_ref().trim().to_ascii_uppercase();
        if code.is_empty() {
            continue;
        }
        if DANGER_COUNTRIES.contains(&code) {
            country_points += DANGER_COUNTRY_POINTS;
            warnings.push(format!("Communicating with {}", code));
        } else if !SAFE_COUNTRIES.contains(&code) {
            country_points += FOREIGN_COUNTRY_POINTS;
        }
    }

    let mut score = ports.min(PORT_POINTS_CAP) + country_points.min(COUNTRY_POINTS_CAP);
    if os_version.map_or(false, |os| legacy_os_severity(os).is_some()) {
        score += LEGACY_OS_POINTS;
    }
    if has_utm {
        score *= UTM_FACTOR;
    }

    let score = (score.clamp(0.0, 10.0) * 10.0).round() / 10.0;
    (score, warnings)
}
