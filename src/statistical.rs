//! Statistical first-stage filter
//!
//! Tracks per-base-domain query behavior and promotes a domain to
//! `SuspiciousDomain` the moment any indicator fires. Indicators look
//! at query rate, label length, label entropy, subdomain churn and
//! query-type mix; thresholds come from configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::config::StatisticalThresholds;
use crate::entropy::subdomain_entropy;
use crate::models::{DnsQuery, Flag, FlagCategory, RecordType, SuspiciousDomain};

/// Minimum observations before a domain is worth judging.
const MIN_QUERIES_FOR_ANALYSIS: usize = 2;
/// Single-use subdomain count that triggers the pattern flag.
const SINGLE_USE_FLOOR: usize = 5;
/// Unique subdomain count above which churn rate is examined.
const RAPID_GENERATION_FLOOR: usize = 20;
/// Unique subdomains per minute that counts as rapid generation.
const RAPID_GENERATION_RATE: f64 = 2.0;
/// Query count above which type-mix and cardinality ratios are trusted.
const TYPE_ANALYSIS_FLOOR: usize = 10;

#[derive(Debug)]
struct DomainStats {
    queries: Vec<DnsQuery>,
    unique_subdomains: BTreeSet<String>,
    source_ips: BTreeSet<IpAddr>,
    query_types: BTreeMap<RecordType, usize>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl DomainStats {
    fn new(first: DateTime<Utc>) -> Self {
        Self {
            queries: Vec::new(),
            unique_subdomains: BTreeSet::new(),
            source_ips: BTreeSet::new(),
            query_types: BTreeMap::new(),
            first_seen: first,
            last_seen: first,
        }
    }
}

/// Snapshot of filter activity for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    pub total_queries_processed: u64,
    pub unique_domains_seen: usize,
    pub suspicious_domains_count: usize,
    pub suspicious_domains: Vec<String>,
    pub detection_rate: f64,
    pub thresholds: StatisticalThresholds,
}

/// Per-run aggregation and flagging state.
pub struct StatisticalFilter {
    thresholds: StatisticalThresholds,
    domain_stats: BTreeMap<String, DomainStats>,
    flagged: BTreeSet<String>,
    total_queries_processed: u64,
}

impl StatisticalFilter {
    pub fn new(thresholds: StatisticalThresholds) -> Self {
        Self {
            thresholds,
            domain_stats: BTreeMap::new(),
            flagged: BTreeSet::new(),
            total_queries_processed: 0,
        }
    }

    /// Fold a batch of queries into the aggregates, then emit a
    /// `SuspiciousDomain` for every domain whose indicators fired for
    /// the first time.
    pub fn process_queries(&mut self, queries: &[DnsQuery]) -> Vec<SuspiciousDomain> {
        debug!("processing {} DNS queries", queries.len());
        for query in queries {
            self.track(query);
            self.total_queries_processed += 1;
        }

        let newly_flagged = self.sweep();
        info!(
            "statistical filter flagged {} of {} tracked domains",
            self.flagged.len(),
            self.domain_stats.len()
        );
        newly_flagged
    }

    fn track(&mut self, query: &DnsQuery) {
        let stats = self
            .domain_stats
            .entry(query.base_domain())
            .or_insert_with(|| DomainStats::new(query.timestamp));

        let subdomain = query.subdomain();
        if !subdomain.is_empty() {
            stats.unique_subdomains.insert(subdomain);
        }
        stats.source_ips.insert(query.source_ip);
        *stats.query_types.entry(query.query_type).or_insert(0) += 1;
        if query.timestamp < stats.first_seen {
            stats.first_seen = query.timestamp;
        }
        if query.timestamp > stats.last_seen {
            stats.last_seen = query.timestamp;
        }
        stats.queries.push(query.clone());
    }

    fn sweep(&mut self) -> Vec<SuspiciousDomain> {
        let mut newly_flagged = Vec::new();

        for (base_domain, stats) in &self.domain_stats {
            if self.flagged.contains(base_domain) {
                continue;
            }
            if stats.queries.len() < MIN_QUERIES_FOR_ANALYSIS {
                continue;
            }

            let flags = self.indicators(stats);
            if flags.is_empty() {
                continue;
            }

            let mut domain =
                SuspiciousDomain::new(base_domain.clone(), stats.first_seen, stats.last_seen);
            for query in &stats.queries {
                domain.add_query(query.clone());
            }
            info!(
                "flagged {}: {}",
                base_domain,
                flags
                    .iter()
                    .map(Flag::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            for flag in flags {
                domain.add_flag(FlagCategory::Statistical, flag);
            }
            newly_flagged.push(domain);
        }

        for domain in &newly_flagged {
            self.flagged.insert(domain.base_domain.clone());
        }
        newly_flagged
    }

    fn indicators(&self, stats: &DomainStats) -> Vec<Flag> {
        let mut flags = Vec::new();

        let window = stats.last_seen - stats.first_seen;
        let window_minutes = match window.num_microseconds() {
            Some(micros) => micros as f64 / 60_000_000.0,
            None => window.num_milliseconds() as f64 / 60_000.0,
        };

        // query rate
        if window_minutes > 0.0 {
            let per_minute = stats.queries.len() as f64 / window_minutes;
            if per_minute > self.thresholds.frequency_per_minute {
                flags.push(Flag::HighFrequency { per_minute });
            }
        }

        // oversized labels, first offender only
        if let Some(long) = stats
            .unique_subdomains
            .iter()
            .find(|s| s.len() > self.thresholds.max_subdomain_length)
        {
            flags.push(Flag::LongSubdomain { length: long.len() });
        }

        // label randomness
        let high_entropy_count = stats
            .unique_subdomains
            .iter()
            .filter(|s| subdomain_entropy(s) > self.thresholds.high_entropy_threshold)
            .count();
        if high_entropy_count > 0 {
            flags.push(Flag::HighEntropy {
                count: high_entropy_count,
                ratio: high_entropy_count as f64 / stats.unique_subdomains.len() as f64,
            });
        }

        // subdomains queried exactly once
        let mut subdomain_counts: BTreeMap<String, usize> = BTreeMap::new();
        for query in &stats.queries {
            let subdomain = query.subdomain();
            if !subdomain.is_empty() {
                *subdomain_counts.entry(subdomain).or_insert(0) += 1;
            }
        }
        let single_use = subdomain_counts.values().filter(|&&c| c == 1).count();
        if single_use > SINGLE_USE_FLOOR {
            flags.push(Flag::SingleUsePattern {
                count: single_use,
                ratio: single_use as f64 / subdomain_counts.len() as f64,
            });
        }

        // query type mix
        let total_queries: usize = stats.query_types.values().sum();
        if total_queries > TYPE_ANALYSIS_FLOOR {
            let txt = stats.query_types.get(&RecordType::Txt).copied().unwrap_or(0);
            let txt_ratio = txt as f64 / total_queries as f64;
            if txt_ratio > 0.8 {
                flags.push(Flag::TxtHeavy { ratio: txt_ratio });
            }
            if stats.query_types.len() > 3 {
                flags.push(Flag::MixedQueryTypes {
                    count: stats.query_types.len(),
                });
            }
        }

        // subdomain churn
        if stats.unique_subdomains.len() > RAPID_GENERATION_FLOOR && window_minutes > 0.0 {
            let per_minute = stats.unique_subdomains.len() as f64 / window_minutes;
            if per_minute > RAPID_GENERATION_RATE {
                flags.push(Flag::RapidSubdomainGeneration { per_minute });
            }
        }

        // unique-to-total ratio
        if total_queries > TYPE_ANALYSIS_FLOOR {
            let ratio = stats.unique_subdomains.len() as f64 / total_queries as f64;
            if ratio > 0.8 {
                flags.push(Flag::HighCardinality { ratio });
            }
        }

        flags
    }

    /// Filter activity snapshot for the report.
    pub fn statistics(&self) -> FilterStats {
        FilterStats {
            total_queries_processed: self.total_queries_processed,
            unique_domains_seen: self.domain_stats.len(),
            suspicious_domains_count: self.flagged.len(),
            suspicious_domains: self.flagged.iter().cloned().collect(),
            detection_rate: self.flagged.len() as f64 / self.domain_stats.len().max(1) as f64,
            thresholds: self.thresholds.clone(),
        }
    }

    /// Drop aggregates (and their flagged markers) whose last activity
    /// precedes the cutoff.
    pub fn clear_older_than(&mut self, hours: i64) {
        let cutoff = Utc::now() - Duration::hours(hours);
        let stale: Vec<String> = self
            .domain_stats
            .iter()
            .filter(|(_, stats)| stats.last_seen < cutoff)
            .map(|(domain, _)| domain.clone())
            .collect();

        for domain in &stale {
            self.domain_stats.remove(domain);
            self.flagged.remove(domain);
        }
        info!("cleared {} stale domain aggregates", stale.len());
    }
}

impl Default for StatisticalFilter {
    fn default() -> Self {
        Self::new(StatisticalThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn query(domain: &str, seconds: i64, qtype: RecordType) -> DnsQuery {
        DnsQuery::new(domain, ts(seconds), "192.168.1.10".parse().unwrap(), qtype, None)
    }

    /// 36 distinct characters rotated per index: entropy log2(36) ~ 5.17
    fn random_label(index: usize) -> String {
        let alphabet = "abcdefghijklmnopqrstuvwxyz0123456789";
        let split = index % alphabet.len();
        format!("{}{}", &alphabet[split..], &alphabet[..split])
    }

    #[test]
    fn test_single_query_is_never_flagged() {
        let mut filter = StatisticalFilter::default();
        let flagged = filter.process_queries(&[query("one.example.com", 0, RecordType::A)]);
        assert!(flagged.is_empty());
        assert_eq!(filter.statistics().unique_domains_seen, 1);
    }

    #[test]
    fn test_normal_traffic_is_not_flagged() {
        let mut filter = StatisticalFilter::default();
        let queries = vec![
            query("www.example.com", 0, RecordType::A),
            query("www.example.com", 60, RecordType::A),
            query("mail.example.com", 120, RecordType::Mx),
        ];
        let flagged = filter.process_queries(&queries);
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_high_frequency_flag() {
        let mut filter = StatisticalFilter::default();
        // 40 queries in ~2 minutes -> ~20 qpm
        let queries: Vec<DnsQuery> = (0..40)
            .map(|i| query("app.example.com", i * 3, RecordType::A))
            .collect();
        let flagged = filter.process_queries(&queries);
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0]
            .flags(FlagCategory::Statistical)
            .iter()
            .any(Flag::is_high_frequency));
    }

    #[test]
    fn test_subsecond_window_still_computes_rates() {
        let mut filter = StatisticalFilter::default();
        let start = ts(0);
        let queries: Vec<DnsQuery> = (0..12)
            .map(|i| {
                DnsQuery::new(
                    "burst.example.com",
                    start + Duration::milliseconds(i * 50),
                    "192.168.1.10".parse().unwrap(),
                    RecordType::A,
                    None,
                )
            })
            .collect();

        let flagged = filter.process_queries(&queries);
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0]
            .flags(FlagCategory::Statistical)
            .iter()
            .any(Flag::is_high_frequency));
    }

    #[test]
    fn test_zero_window_does_not_divide_by_zero() {
        let mut filter = StatisticalFilter::default();
        let queries = vec![
            query("a.example.com", 0, RecordType::A),
            query("b.example.com", 0, RecordType::A),
        ];
        // same timestamp: window is zero, no rate flags, no panic
        let flagged = filter.process_queries(&queries);
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_long_subdomain_flag() {
        let mut filter = StatisticalFilter::default();
        let queries = vec![
            query(
                "this-subdomain-is-way-over-the-limit.example.com",
                0,
                RecordType::A,
            ),
            query("www.example.com", 3600, RecordType::A),
        ];
        let flagged = filter.process_queries(&queries);
        assert_eq!(flagged.len(), 1);
        let has_long = flagged[0]
            .flags(FlagCategory::Statistical)
            .iter()
            .any(|f| matches!(f, Flag::LongSubdomain { length } if *length > 20));
        assert!(has_long);
    }

    #[test]
    fn test_tunnel_like_traffic_raises_the_full_flag_set() {
        let mut filter = StatisticalFilter::default();
        // 30 distinct high-entropy 36-char labels via TXT over ~5 minutes
        let queries: Vec<DnsQuery> = (0..30)
            .map(|i| {
                query(
                    &format!("{}.tun.xyz", random_label(i)),
                    (i as i64) * 10,
                    RecordType::Txt,
                )
            })
            .collect();

        let flagged = filter.process_queries(&queries);
        assert_eq!(flagged.len(), 1);
        let domain = &flagged[0];
        assert_eq!(domain.base_domain, "tun.xyz");
        assert_eq!(domain.total_queries, 30);
        assert_eq!(domain.unique_subdomains.len(), 30);

        let flags = domain.flags(FlagCategory::Statistical);
        assert!(flags.iter().any(Flag::is_high_entropy));
        assert!(flags.iter().any(Flag::is_txt_heavy));
        assert!(flags.iter().any(|f| matches!(f, Flag::RapidSubdomainGeneration { .. })));
        assert!(flags.iter().any(|f| matches!(f, Flag::HighCardinality { .. })));
        assert!(flags.iter().any(Flag::is_single_use));
        assert!(flags.iter().any(|f| matches!(f, Flag::LongSubdomain { .. })));
    }

    #[test]
    fn test_mixed_query_types_flag() {
        let mut filter = StatisticalFilter::default();
        let types = [
            RecordType::A,
            RecordType::Aaaa,
            RecordType::Mx,
            RecordType::Txt,
        ];
        let queries: Vec<DnsQuery> = (0..12)
            .map(|i| query("multi.example.net", (i as i64) * 30, types[i % 4]))
            .collect();
        let flagged = filter.process_queries(&queries);
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0]
            .flags(FlagCategory::Statistical)
            .iter()
            .any(|f| matches!(f, Flag::MixedQueryTypes { count: 4 })));
    }

    #[test]
    fn test_domain_is_flagged_only_once() {
        let mut filter = StatisticalFilter::default();
        let queries: Vec<DnsQuery> = (0..40)
            .map(|i| query("app.example.com", i * 3, RecordType::A))
            .collect();
        assert_eq!(filter.process_queries(&queries).len(), 1);
        // same traffic again: already flagged, nothing new emitted
        assert!(filter.process_queries(&queries).is_empty());
        assert_eq!(filter.statistics().suspicious_domains_count, 1);
    }

    #[test]
    fn test_aggregate_invariants_hold() {
        let mut filter = StatisticalFilter::default();
        let queries: Vec<DnsQuery> = (0..30)
            .map(|i| {
                query(
                    &format!("{}.tun.xyz", random_label(i)),
                    (i as i64) * 10,
                    RecordType::Txt,
                )
            })
            .collect();
        let flagged = filter.process_queries(&queries);
        let domain = &flagged[0];
        assert!(domain.first_seen <= domain.last_seen);
        assert_eq!(domain.total_queries, domain.queries.len());
        assert!(domain
            .queries
            .iter()
            .all(|q| q.base_domain() == domain.base_domain));
    }

    #[test]
    fn test_clear_older_than_drops_stale_domains() {
        let mut filter = StatisticalFilter::default();
        let old: Vec<DnsQuery> = (0..40)
            .map(|i| query("app.example.com", i * 3, RecordType::A))
            .collect();
        filter.process_queries(&old);
        assert_eq!(filter.statistics().suspicious_domains_count, 1);

        // fixture timestamps are from 2024, far older than any cutoff
        filter.clear_older_than(24);
        let stats = filter.statistics();
        assert_eq!(stats.unique_domains_seen, 0);
        assert_eq!(stats.suspicious_domains_count, 0);
    }

    #[test]
    fn test_statistics_snapshot() {
        let mut filter = StatisticalFilter::default();
        let queries: Vec<DnsQuery> = (0..40)
            .map(|i| query("app.example.com", i * 3, RecordType::A))
            .collect();
        filter.process_queries(&queries);

        let stats = filter.statistics();
        assert_eq!(stats.total_queries_processed, 40);
        assert_eq!(stats.unique_domains_seen, 1);
        assert_eq!(stats.suspicious_domains, vec!["example.com".to_string()]);
        assert!((stats.detection_rate - 1.0).abs() < 1e-9);
    }
}
