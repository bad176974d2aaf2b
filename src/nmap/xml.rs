//! Parsing of nmap's XML (`-oX`) output

use crate::network::{Host, PortResult, PortState};
use crate::scanner::ScanResult;
use crate::{Result, ScanError};
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;

/// Minimal element tree built from the event stream
#[derive(Debug, Clone, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ScanError::ParseError(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Depth-first search over all descendants
    fn descendants_named<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants_named(name, out);
        }
    }
}

fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ScanError::ParseError("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ScanError::ParseError(format!(
            "truncated output: <{}> never closed",
            open.name
        )));
    }

    let root = root.ok_or_else(|| ScanError::ParseError("empty output".to_string()))?;
    if root.name != "nmaprun" {
        return Err(ScanError::ParseError(format!(
            "expected <nmaprun> root, found <{}>",
            root.name
        )));
    }
    Ok(root)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(ScanError::ParseError("multiple root elements".to_string()));
    }
    Ok(())
}

/// Parse `nmap -sn` output into one [`Host`] per live address.
///
/// Vendor and hostname are filled only when nmap embedded them; enrichment
/// happens later. A repeated address keeps its first record.
pub fn parse_discovery(xml: &str) -> Result<Vec<Host>> {
    let root = parse_document(xml)?;
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();

    for element in root.children_named("host") {
        let down = element
            .child("status")
            .and_then(|s| s.attr("state"))
            .map_or(false, |state| state == "down");
        if down {
            continue;
        }

        let mut host = Host::default();
        for address in element.children_named("address") {
            match address.attr("addrtype") {
                Some("ipv4") | Some("ipv6") => {
                    host.ip = address.attr("addr").unwrap_or_default().to_string();
                }
                Some("mac") => {
                    host.mac = address.attr("addr").unwrap_or_default().to_string();
                    host.vendor = address.attr("vendor").unwrap_or_default().to_string();
                }
                _ => {}
            }
        }

        if let Some(name) = element
            .child("hostnames")
            .and_then(|h| h.child("hostname"))
            .and_then(|h| h.attr("name"))
        {
            host.hostname = name.to_string();
        }

        if host.ip.is_empty() {
            continue;
        }
        if seen.insert(host.ip.clone()) {
            hosts.push(host);
        }
    }

    debug!("Parsed {} live hosts from discovery output", hosts.len());
    Ok(hosts)
}

/// Parse a single-host probe into a [`ScanResult`].
///
/// Ports keep the order nmap reported them in; a port id seen twice keeps its
/// first record. The OS name is read only when `os_detection` is set.
pub fn parse_probe(xml: &str, os_detection: bool) -> Result<ScanResult> {
    let root = parse_document(xml)?;

    let mut port_elements = Vec::new();
    root.descendants_named("port", &mut port_elements);

    let mut seen = HashSet::new();
    let mut ports = Vec::new();
    for element in port_elements {
        let port = match element.attr("portid") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };
        if !seen.insert(port.clone()) {
            continue;
        }

        let state = element
            .child("state")
            .and_then(|s| s.attr("state"))
            .map_or(PortState::Unknown, PortState::from_nmap);

        let mut result = PortResult::new(port, state);
        if let Some(service) = element.child("service") {
            result.service = service.attr("name").unwrap_or_default().to_string();
            result.service_info = service_info(service);
        }
        ports.push(result);
    }

    let os = if os_detection {
        let mut matches = Vec::new();
        root.descendants_named("osmatch", &mut matches);
        matches
            .first()
            .and_then(|m| m.attr("name"))
            .unwrap_or_default()
            .to_string()
    } else {
        String::new()
    };

    Ok(ScanResult { os, ports })
}

/// Space-join product, version and extra info, omitting empty parts
fn service_info(service: &Element) -> Option<String> {
    let parts: Vec<&str> = ["product", "version", "extrainfo"]
        .iter()
        .filter_map(|key| service.attr(key))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -R -sn 192.168.1.0/24 -oX -">
<host><status state="up" reason="arp-response"/>
<address addr="192.168.1.1" addrtype="ipv4"/>
<address addr="00:11:22:33:44:55" addrtype="mac" vendor="Router Inc"/>
<hostnames><hostname name="gateway.lan" type="PTR"/></hostnames>
</host>
<host><status state="up" reason="arp-response"/>
<address addr="192.168.1.2" addrtype="ipv4"/>
<address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/>
<hostnames/>
</host>
<host><status state="down" reason="no-response"/>
<address addr="192.168.1.3" addrtype="ipv4"/>
</host>
<runstats><finished time="1"/><hosts up="2" down="1" total="3"/></runstats>
</nmaprun>
"#;

    const PROBE: &str = r#"<?xml version="1.0"?>
<nmaprun>
<host><address addr="10.0.0.5" addrtype="ipv4"/>
<ports>
<extraports state="closed" count="995"/>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh" product="OpenSSH" version="8.9p1" extrainfo="Ubuntu Linux; protocol 2.0"/></port>
<port protocol="tcp" portid="80"><state state="open"/><service name="http" product="nginx"/></port>
<port protocol="tcp" portid="443"><state state="filtered"/><service name="https"/></port>
<port protocol="udp" portid="80"><state state="open|filtered"/></port>
</ports>
<os><portused state="open" proto="tcp" portid="22"/>
<osmatch name="Linux 5.0 - 5.14" accuracy="98"/>
<osmatch name="Linux 4.15" accuracy="90"/>
</os>
</host>
</nmaprun>
"#;

    #[test]
    fn discovery_extracts_live_hosts() {
        let hosts = parse_discovery(DISCOVERY).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(
            hosts[0],
            Host::new("192.168.1.1")
                .with_mac("00:11:22:33:44:55")
                .with_vendor("Router Inc")
                .with_hostname("gateway.lan")
        );
        assert_eq!(hosts[1], Host::new("192.168.1.2").with_mac("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn discovery_of_empty_run_has_no_hosts() {
        assert!(parse_discovery("<nmaprun></nmaprun>").unwrap().is_empty());
    }

    #[test]
    fn probe_keeps_order_and_joins_service_info() {
        let result = parse_probe(PROBE, true).unwrap();
        let ports: Vec<&str> = result.ports.iter().map(|p| p.port.as_str()).collect();
        assert_eq!(ports, vec!["22", "80", "443"]);

        assert_eq!(
            result.ports[0].service_info.as_deref(),
            Some("OpenSSH 8.9p1 Ubuntu Linux; protocol 2.0")
        );
        assert_eq!(result.ports[1].service_info.as_deref(), Some("nginx"));
        assert_eq!(result.ports[2].state, PortState::Filtered);
        assert_eq!(result.ports[2].service_info, None);
        assert_eq!(result.os, "Linux 5.0 - 5.14");
    }

    #[test]
    fn os_is_empty_unless_requested() {
        let result = parse_probe(PROBE, false).unwrap();
        assert_eq!(result.os, "");
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        for bad in ["", "not xml at all", "<nmaprun><host></nmaprun>", "<nmaprun><host>", "<other/>"] {
            assert!(
                matches!(parse_probe(bad, false), Err(ScanError::ParseError(_))),
                "expected parse error for {:?}",
                bad
            );
        }
    }
}
