//! Benchmarks for scoring and nmap output parsing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lanscore::nmap::xml::parse_probe;
use lanscore::scoring::{exposure::device_exposure, score, RiskObservations, ScoringConfig, ScoringEngine, TlsStatus};

fn busy_observations() -> RiskObservations {
    RiskObservations {
        danger_ports: vec!["3389".into(), "445".into()],
        open_ports: (1..=40).map(|p| p.to_string()).collect(),
        geolocation: Some("BR".into()),
        tls_status: Some(TlsStatus::Expired),
        firewall_enabled: Some(false),
        os_version: Some("Windows Server 2008 R2".into()),
        intl_traffic_ratio: Some(0.55),
        dns_fail_rate: Some(0.2),
        http_ratio: Some(0.6),
        unknown_mac_ratio: Some(0.1),
        device_count: Some(48),
        upnp: true,
        ..Default::default()
    }
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    let config = ScoringConfig::default();
    let empty = RiskObservations::default();
    let busy = busy_observations();

    group.bench_function("score_empty", |b| b.iter(|| score(black_box(&empty), black_box(&config))));
    group.bench_function("score_busy", |b| b.iter(|| score(black_box(&busy), black_box(&config))));

    let engine = ScoringEngine::default();
    group.bench_function("assess_busy", |b| b.iter(|| engine.assess(black_box(&busy))));

    group.bench_function("device_exposure", |b| {
        b.iter(|| device_exposure(black_box(&busy.open_ports), black_box(&["CN", "JP", "BR"]), true, None))
    });

    group.finish();
}

fn probe_document(ports: usize) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<nmaprun><host><address addr=\"10.0.0.1\" addrtype=\"ipv4\"/><ports>\n");
    for port in 1..=ports {
        let state = if port % 7 == 0 { "open" } else { "closed" };
        xml.push_str(&format!(
            "<port protocol=\"tcp\" portid=\"{}\"><state state=\"{}\"/><service name=\"svc{}\" product=\"Example\" version=\"1.0\"/></port>\n",
            port, state, port
        ));
    }
    xml.push_str("</ports><os><osmatch name=\"Linux 5.4\" accuracy=\"95\"/></os></host></nmaprun>\n");
    xml
}

fn bench_xml_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("probe_xml");
    for ports in [10usize, 100, 1000] {
        let xml = probe_document(ports);
        group.bench_with_input(BenchmarkId::from_parameter(ports), &xml, |b, xml| {
            b.iter(|| parse_probe(black_box(xml), true))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scoring, bench_xml_parsing);
criterion_main!(benches);
