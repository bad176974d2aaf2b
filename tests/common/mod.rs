//! Shared helpers: stand-in executables for nmap and friends

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const PROBE_XML: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
<host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh" product="OpenSSH" version="8.9p1"/></port>
<port protocol="tcp" portid="3389"><state state="open"/><service name="ms-wbt-server"/></port>
<port protocol="tcp" portid="80"><state state="closed"/><service name="http"/></port>
</ports>
<os><osmatch name="Microsoft Windows 7 SP1" accuracy="96"/></os>
</host>
</nmaprun>
"#;

pub const DISCOVERY_XML: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
<host><status state="up"/>
<address addr="192.168.1.1" addrtype="ipv4"/>
<address addr="00:11:22:33:44:55" addrtype="mac" vendor="Router Inc"/>
<hostnames><hostname name="gateway.lan" type="PTR"/></hostnames>
</host>
<host><status state="up"/>
<address addr="192.168.1.2" addrtype="ipv4"/>
<address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/>
<hostnames/>
</host>
</nmaprun>
"#;

/// Write an executable `/bin/sh` script named `name` into `dir`
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A tool that prints `xml` on stdout and exits 0
pub fn fake_nmap_printing(dir: &Path, xml: &str) -> PathBuf {
    fake_tool(dir, "nmap", &format!("cat <<'XML'\n{}XML", xml))
}
