// End-to-end pipeline tests over synthesized capture files:
// build classic pcap bytes in memory, run the full pipeline, check the
// report that would be persisted.

use std::io::Write;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use dnsentinel::config::Config;
use dnsentinel::intelligence::{LegitimacyLevel, Recommendation};
use dnsentinel::pipeline::run_capture_pipeline;

const LINKTYPE_ETHERNET: u32 = 1;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;

fn base_ts() -> i64 {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .unwrap()
        .timestamp()
}

fn global_header_le() -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(&0xA1B2_C3D4u32.to_le_bytes());
    header.extend_from_slice(&2u16.to_le_bytes());
    header.extend_from_slice(&4u16.to_le_bytes());
    header.extend_from_slice(&0i32.to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes());
    header.extend_from_slice(&65535u32.to_le_bytes());
    header.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());
    header
}

fn record_le(ts_sec: i64, frame: &[u8]) -> Vec<u8> {
    let mut record = Vec::new();
    record.extend_from_slice(&(ts_sec as u32).to_le_bytes());
    record.extend_from_slice(&0u32.to_le_bytes());
    record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    record.extend_from_slice(frame);
    record
}

fn encode_name(domain: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn dns_query_message(domain: &str, qtype: u16) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(&0x4242u16.to_be_bytes());
    message.extend_from_slice(&0x0100u16.to_be_bytes());
    message.extend_from_slice(&1u16.to_be_bytes());
    message.extend_from_slice(&0u16.to_be_bytes());
    message.extend_from_slice(&0u16.to_be_bytes());
    message.extend_from_slice(&0u16.to_be_bytes());
    message.extend_from_slice(&encode_name(domain));
    message.extend_from_slice(&qtype.to_be_bytes());
    message.extend_from_slice(&1u16.to_be_bytes());
    message
}

fn ipv4_udp_frame(src: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0x02; 6]);
    frame.extend_from_slice(&[0x04; 6]);
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&((20 + 8 + payload.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.push(64);
    frame.push(IPPROTO_UDP);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&[8, 8, 8, 8]);

    frame.extend_from_slice(&51000u16.to_be_bytes());
    frame.extend_from_slice(&53u16.to_be_bytes());
    frame.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);
    frame
}

fn write_capture(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "dnsentinel_e2e_{}_{}.pcap",
        std::process::id(),
        name
    ));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

/// A full permutation of 36 distinct characters: entropy is exactly
/// log2(36) ~ 5.17 bits/char no matter what the shuffle does.
fn random_subdomain(seed: u64) -> String {
    let mut alphabet: Vec<char> = "abcdefghijklmnopqrstuvwxyz0123456789".chars().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    alphabet.shuffle(&mut rng);
    alphabet.into_iter().collect()
}

#[test]
fn single_query_produces_no_suspicious_domains() {
    let mut bytes = global_header_le();
    let message = dns_query_message("example.com.", 1);
    bytes.extend_from_slice(&record_le(base_ts(), &ipv4_udp_frame([10, 0, 0, 1], &message)));
    let path = write_capture("single_query", &bytes);

    let report = run_capture_pipeline(&path, &Config::default()).unwrap();

    assert_eq!(report.extractor_stats.total_packets, 1);
    assert_eq!(report.extractor_stats.dns_queries, 1);
    assert_eq!(report.extractor_stats.parse_errors, 0);
    assert_eq!(report.filter_stats.total_queries_processed, 1);
    assert_eq!(report.filter_stats.unique_domains_seen, 1);
    assert_eq!(report.total_domains_analyzed, 0);
    assert!(report.assessments.is_empty());
    assert!(report.high_risk_domains.is_empty());
    std::fs::remove_file(path).ok();
}

#[test]
fn empty_capture_produces_empty_report() {
    let path = write_capture("empty", &global_header_le());
    let report = run_capture_pipeline(&path, &Config::default()).unwrap();

    assert_eq!(report.extractor_stats.total_packets, 0);
    assert_eq!(report.extractor_stats.dns_queries, 0);
    assert_eq!(report.total_domains_analyzed, 0);
    assert!(report.assessments.is_empty());
    assert!(report.recommendations.is_empty());
    std::fs::remove_file(path).ok();
}

#[test]
fn tunnel_traffic_is_condemned() {
    let mut bytes = global_header_le();

    // background noise: two queries to a normal domain, minutes apart
    for (i, name) in ["www.example.com", "mail.example.com"].iter().enumerate() {
        let message = dns_query_message(name, 1);
        bytes.extend_from_slice(&record_le(
            base_ts() + i as i64 * 300,
            &ipv4_udp_frame([10, 0, 0, 2], &message),
        ));
    }

    // 30 distinct high-entropy 36-char subdomains via TXT over ~5 min
    for i in 0..30u64 {
        let name = format!("{}.tun.xyz", random_subdomain(i));
        let message = dns_query_message(&name, 16);
        bytes.extend_from_slice(&record_le(
            base_ts() + (i as i64) * 10,
            &ipv4_udp_frame([10, 0, 0, 7], &message),
        ));
    }

    let path = write_capture("tunnel", &bytes);
    let report = run_capture_pipeline(&path, &Config::default()).unwrap();

    assert_eq!(report.extractor_stats.dns_queries, 32);
    assert_eq!(report.total_domains_analyzed, 1);
    assert_eq!(report.high_risk_domains, vec!["tun.xyz".to_string()]);
    assert_eq!(report.legitimacy_breakdown["confirmed_fake"], 1);
    assert_eq!(report.legitimacy_breakdown["legitimate"], 0);
    assert!(report
        .filter_stats
        .suspicious_domains
        .contains(&"tun.xyz".to_string()));

    let assessment = &report.assessments["tun.xyz"];
    assert_eq!(assessment.legitimacy_level, LegitimacyLevel::ConfirmedFake);
    assert_eq!(assessment.recommendation, Recommendation::Block);

    let stat_flags: Vec<String> = assessment
        .analysis_data
        .statistical_flags
        .as_deref()
        .unwrap()
        .iter()
        .map(|f| f.to_string())
        .collect();
    assert!(stat_flags.iter().any(|f| f.starts_with("high_entropy_")));
    assert!(stat_flags.iter().any(|f| f.starts_with("txt_heavy_")));
    assert!(stat_flags
        .iter()
        .any(|f| f.starts_with("rapid_subdomain_generation_")));
    assert!(stat_flags.iter().any(|f| f.starts_with("high_cardinality_")));
    assert!(stat_flags.iter().any(|f| f.starts_with("single_use_pattern_")));
    assert!(stat_flags.iter().any(|f| f.starts_with("long_subdomain_")));

    // prioritization advice always accompanies high-risk findings
    assert!(!report.recommendations.is_empty());
    std::fs::remove_file(path).ok();
}

#[test]
fn hex_exfil_labels_are_flagged_for_encoding() {
    let mut bytes = global_header_le();

    // 12 single-use hex-shaped labels, spaced 30s apart
    for i in 0..12u8 {
        let label = hex::encode([i; 10]);
        let message = dns_query_message(&format!("{}.exfil.net", label), 1);
        bytes.extend_from_slice(&record_le(
            base_ts() + (i as i64) * 30,
            &ipv4_udp_frame([10, 0, 0, 9], &message),
        ));
    }

    let path = write_capture("hex_exfil", &bytes);
    let report = run_capture_pipeline(&path, &Config::default()).unwrap();

    assert_eq!(report.total_domains_analyzed, 1);
    let assessment = &report.assessments["exfil.net"];
    assert_eq!(assessment.legitimacy_score, 35);
    assert_eq!(assessment.legitimacy_level, LegitimacyLevel::ConfirmedFake);
    assert_eq!(assessment.recommendation, Recommendation::Block);
    assert!(assessment
        .evidence
        .risk_factors
        .iter()
        .any(|r| r == "encoding_like_patterns"));
    assert!(assessment
        .evidence
        .negative_indicators
        .iter()
        .any(|n| n == "single_use_pattern"));
    std::fs::remove_file(path).ok();
}

#[test]
fn report_serializes_with_iso8601_timestamps() {
    let mut bytes = global_header_le();
    for i in 0..30u64 {
        let name = format!("{}.tun.xyz", random_subdomain(i));
        let message = dns_query_message(&name, 16);
        bytes.extend_from_slice(&record_le(
            base_ts() + (i as i64) * 10,
            &ipv4_udp_frame([10, 0, 0, 7], &message),
        ));
    }
    let path = write_capture("serialization", &bytes);
    let report = run_capture_pipeline(&path, &Config::default()).unwrap();

    let value = serde_json::to_value(&report).unwrap();
    for key in [
        "total_domains_analyzed",
        "legitimacy_breakdown",
        "high_risk_domains",
        "recommendations",
        "extractor_stats",
        "filter_stats",
        "assessments",
    ] {
        assert!(value.get(key).is_some(), "missing report key {}", key);
    }

    let assessment = &value["assessments"]["tun.xyz"];
    assert_eq!(assessment["legitimacy_level"], "confirmed_fake");
    assert_eq!(assessment["recommendation"], "BLOCK");
    let timestamp = assessment["timestamp"].as_str().unwrap();
    assert!(timestamp.contains('T'), "not ISO-8601: {}", timestamp);

    // flags serialize as their contract strings
    let flags = assessment["analysis_data"]["statistical_flags"]
        .as_array()
        .unwrap();
    assert!(flags.iter().all(|f| f.is_string()));
    std::fs::remove_file(path).ok();
}

#[test]
fn truncated_capture_still_reports() {
    let mut bytes = global_header_le();
    let message = dns_query_message("example.com", 1);
    bytes.extend_from_slice(&record_le(base_ts(), &ipv4_udp_frame([10, 0, 0, 1], &message)));
    // chop the final record in half
    let message2 = dns_query_message("other.org", 1);
    let mut tail = record_le(base_ts() + 1, &ipv4_udp_frame([10, 0, 0, 1], &message2));
    tail.truncate(tail.len() / 2);
    bytes.extend_from_slice(&tail);

    let path = write_capture("truncated", &bytes);
    let report = run_capture_pipeline(&path, &Config::default()).unwrap();
    assert_eq!(report.extractor_stats.total_packets, 1);
    assert_eq!(report.extractor_stats.dns_queries, 1);
    std::fs::remove_file(path).ok();
}
