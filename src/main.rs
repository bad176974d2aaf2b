use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lanscore::{
    lan_check::LanChecker,
    scoring::{exposure::device_exposure, ConfigStore, RiskObservations, ScoringEngine},
    HostDiscoverer, HostScan, ProbeOptions, ScanCoordinator, ServiceProber, ToolConfig,
};

const DEFAULT_SUBNET: &str = "192.168.1.0/24";

fn cli() -> Command {
    let ports = Arg::new("ports")
        .short('p')
        .long("ports")
        .value_name("PORTS")
        .help("Comma-separated port list (e.g. 22,80,443)");
    let service = Arg::new("service")
        .long("service")
        .help("Enable service/version detection (-sV)")
        .action(ArgAction::SetTrue);
    let os = Arg::new("os")
        .long("os")
        .help("Enable OS detection (-O)")
        .action(ArgAction::SetTrue);
    let script = Arg::new("script")
        .long("script")
        .value_name("NAME")
        .help("NSE script to run; repeatable")
        .action(ArgAction::Append);
    let timing = Arg::new("timing")
        .short('T')
        .long("timing")
        .value_name("LEVEL")
        .help("Timing template (0-5)")
        .value_parser(clap::value_parser!(u8).range(0..=5));
    let stall = Arg::new("stall-timeout")
        .long("stall-timeout")
        .value_name("SECS")
        .help("Kill a probe that prints nothing for this many seconds")
        .value_parser(clap::value_parser!(u64).range(1..));

    Command::new("lanscore")
        .version(env!("CARGO_PKG_VERSION"))
        .about("LAN discovery, service probing and security scoring")
        .subcommand_required(true)
        .arg(
            Arg::new("tools")
                .long("tools")
                .value_name("FILE")
                .help("Tool configuration file (TOML); defaults to ~/.lanscore.toml")
                .global(true),
        )
        .subcommand(
            Command::new("discover-hosts")
                .about("List live hosts on a subnet")
                .arg(Arg::new("subnet").value_name("CIDR").default_value(DEFAULT_SUBNET)),
        )
        .subcommand(
            Command::new("port-scan")
                .about("Probe one host's services")
                .arg(Arg::new("host").value_name("HOST").required(true))
                .arg(ports.clone())
                .arg(service.clone())
                .arg(os.clone())
                .arg(script.clone())
                .arg(timing.clone())
                .arg(stall.clone()),
        )
        .subcommand(
            Command::new("lan-scan")
                .about("Discover a subnet and probe every host")
                .arg(
                    Arg::new("subnet")
                        .short('s')
                        .long("subnet")
                        .value_name("CIDR")
                        .default_value(DEFAULT_SUBNET),
                )
                .arg(ports)
                .arg(service)
                .arg(os)
                .arg(script)
                .arg(timing)
                .arg(stall)
                .arg(
                    Arg::new("workers")
                        .short('w')
                        .long("workers")
                        .value_name("COUNT")
                        .help("Concurrent probes (default: one per host, at most 32)")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("lan-check")
                .about("Run LAN security checks")
                .arg(Arg::new("subnet").value_name("CIDR").default_value(DEFAULT_SUBNET)),
        )
        .subcommand(
            Command::new("score")
                .about("Score a JSON file of risk observations")
                .arg(Arg::new("observations").value_name("FILE").required(true))
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Scoring configuration (JSON or YAML)"),
                ),
        )
}

fn tool_config(matches: &ArgMatches) -> Result<ToolConfig> {
    match matches.get_one::<String>("tools") {
        Some(path) => Ok(ToolConfig::from_toml_file(path)?),
        None => Ok(ToolConfig::load_default_config()),
    }
}

fn port_list(matches: &ArgMatches) -> Option<Vec<String>> {
    matches.get_one::<String>("ports").map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn probe_options(matches: &ArgMatches) -> ProbeOptions {
    let mut options = ProbeOptions::default()
        .with_service_detection(matches.get_flag("service"))
        .with_os_detection(matches.get_flag("os"));
    if let Some(scripts) = matches.get_many::<String>("script") {
        options = options.with_scripts(scripts.cloned().collect());
    }
    if let Some(level) = matches.get_one::<u8>("timing") {
        options = options.with_timing_level(*level);
    }
    if let Some(secs) = matches.get_one::<u64>("stall-timeout") {
        options = options.with_stall_timeout(Duration::from_secs(*secs));
    }
    options
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn scored_record(scan: &HostScan, engine: &ScoringEngine) -> Result<serde_json::Value> {
    let mut record = serde_json::to_value(scan)?;
    if let (Ok(result), Some(fields)) = (&scan.result, record.as_object_mut()) {
        let observations = RiskObservations::from_scan(result);
        let none: [&str; 0] = [];
        let (exposure, warnings) =
            device_exposure(&observations.open_ports, &none, false, observations.os_version.as_deref());
        fields.insert("security".into(), serde_json::to_value(engine.assess(&observations))?);
        fields.insert("exposure".into(), serde_json::json!({ "score": exposure, "warnings": warnings }));
    }
    Ok(record)
}

async fn discover_hosts(config: ToolConfig, subnet: &str) -> Result<()> {
    let hosts = HostDiscoverer::new(config).discover(subnet).await?;
    eprintln!("{} {} hosts up on {}", "[+]".bright_green(), hosts.len(), subnet.bright_cyan());
    print_json(&hosts)
}

async fn port_scan(config: ToolConfig, matches: &ArgMatches) -> Result<()> {
    let host = matches
        .get_one::<String>("host")
        .context("missing host")?;
    let ports = port_list(matches).unwrap_or_default();
    let options = probe_options(matches);

    eprintln!("{} Probing {}", "[~]".bright_blue(), host.bright_cyan());
    let result = ServiceProber::new(config).probe(host, &ports, &options).await?;
    eprintln!("{} {} open ports", "[+]".bright_green(), result.open_ports().count());
    print_json(&result)
}

async fn lan_scan(config: ToolConfig, matches: &ArgMatches) -> Result<()> {
    let subnet = matches
        .get_one::<String>("subnet")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SUBNET);
    let ports = port_list(matches);
    let options = probe_options(matches);
    let workers = matches.get_one::<usize>("workers").copied();

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let discoverer = HostDiscoverer::new(config.clone());
    let coordinator = ScanCoordinator::new(Arc::new(ServiceProber::new(config)));
    let scans = lanscore::lan_scan(&discoverer, &coordinator, subnet, ports, &options, workers, |scan, total| {
        progress.set_length(total as u64);
        progress.set_message(scan.host.ip.clone());
        progress.inc(1);
    })
    .await?;
    progress.finish_and_clear();
    eprintln!("{} {} hosts scanned on {}", "[+]".bright_green(), scans.len(), subnet.bright_cyan());

    let failed = scans.iter().filter(|s| !s.is_ok()).count();
    if failed > 0 {
        eprintln!("{} {} of {} hosts failed", "[!]".bright_yellow(), failed, scans.len());
    }

    let engine = ScoringEngine::default();
    let records = scans
        .iter()
        .map(|scan| scored_record(scan, &engine))
        .collect::<Result<Vec<_>>>()?;
    print_json(&records)
}

async fn lan_check(config: ToolConfig, subnet: &str) -> Result<()> {
    let report = LanChecker::new(&config).run_checks(subnet).await;
    let warnings = report.warnings();
    if warnings > 0 {
        eprintln!("{} {} checks raised warnings", "[!]".bright_yellow(), warnings);
    } else {
        eprintln!("{} no warnings", "[+]".bright_green());
    }

    let mut observations = RiskObservations::default();
    report.apply_to(&mut observations);
    let assessment = ScoringEngine::default().assess(&observations);
    print_json(&serde_json::json!({ "checks": report, "security": assessment }))
}

fn score(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<String>("observations")
        .context("missing observations file")?;
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let observations: RiskObservations =
        serde_json::from_str(&text).with_context(|| format!("Invalid observations in {}", path))?;

    let store = Arc::new(ConfigStore::default());
    if let Some(config) = matches.get_one::<String>("config") {
        store.reload_from_path(Path::new(config))?;
    }

    let assessment = ScoringEngine::new(store).assess(&observations);
    eprintln!("{} score {:.1}", "[+]".bright_green(), assessment.score.score);
    print_json(&assessment)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let matches = cli().get_matches();
    let config = tool_config(&matches)?;

    match matches.subcommand() {
        Some(("discover-hosts", sub)) => {
            let subnet = sub.get_one::<String>("subnet").map(String::as_str).unwrap_or(DEFAULT_SUBNET);
            discover_hosts(config, subnet).await
        }
        Some(("port-scan", sub)) => port_scan(config, sub).await,
        Some(("lan-scan", sub)) => lan_scan(config, sub).await,
        Some(("lan-check", sub)) => {
            let subnet = sub.get_one::<String>("subnet").map(String::as_str).unwrap_or(DEFAULT_SUBNET);
            lan_check(config, subnet).await
        }
        Some(("score", sub)) => score(sub),
        _ => unreachable!("subcommand_required"),
    }
}
