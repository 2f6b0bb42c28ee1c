//! Core data model
//!
//! `DnsQuery` is produced once by the extractor and never mutated.
//! `SuspiciousDomain` aggregates everything the filters learned about a
//! base domain and is enriched in place by the downstream analyzers.
//! `Flag` keeps every indicator as a typed variant; the wire/report
//! representation is the exact string emitted by `Display`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// DNS query type, mapped from the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Any,
    /// Anything without a symbolic name, rendered as `TYPE<n>`.
    Other(u16),
}

impl RecordType {
    /// Map a wire-format QTYPE code to its symbolic name.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => RecordType::A,
            2 => RecordType::Ns,
            5 => RecordType::Cname,
            6 => RecordType::Soa,
            12 => RecordType::Ptr,
            15 => RecordType::Mx,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            255 => RecordType::Any,
            other => RecordType::Other(other),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Ns => write!(f, "NS"),
            RecordType::Cname => write!(f, "CNAME"),
            RecordType::Soa => write!(f, "SOA"),
            RecordType::Ptr => write!(f, "PTR"),
            RecordType::Mx => write!(f, "MX"),
            RecordType::Txt => write!(f, "TXT"),
            RecordType::Aaaa => write!(f, "AAAA"),
            RecordType::Srv => write!(f, "SRV"),
            RecordType::Any => write!(f, "ANY"),
            RecordType::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

impl Serialize for RecordType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One observed DNS question.
///
/// The domain is normalized on construction: lower-cased, trimmed, and
/// carrying a trailing dot. Instances are immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsQuery {
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub query_type: RecordType,
    pub destination_ip: Option<IpAddr>,
    pub response_code: Option<u8>,
}

impl DnsQuery {
    pub fn new(
        domain: &str,
        timestamp: DateTime<Utc>,
        source_ip: IpAddr,
        query_type: RecordType,
        destination_ip: Option<IpAddr>,
    ) -> Self {
        let mut domain = domain.trim().to_lowercase();
        if !domain.ends_with('.') {
            domain.push('.');
        }
        Self {
            domain,
            timestamp,
            source_ip,
            query_type,
            destination_ip,
            response_code: None,
        }
    }

    fn labels(&self) -> Vec<&str> {
        self.domain.trim_end_matches('.').split('.').collect()
    }

    /// Labels above the final two, joined with dots. Empty for a bare
    /// base domain.
    pub fn subdomain(&self) -> String {
        let labels = self.labels();
        if labels.len() <= 2 {
            return String::new();
        }
        labels[..labels.len() - 2].join(".")
    }

    /// Final two labels joined with a dot.
    pub fn base_domain(&self) -> String {
        let labels = self.labels();
        if labels.len() >= 2 {
            labels[labels.len() - 2..].join(".")
        } else {
            self.domain.trim_end_matches('.').to_string()
        }
    }

    /// Final label.
    pub fn tld(&self) -> String {
        self.labels().last().copied().unwrap_or_default().to_string()
    }
}

impl fmt::Display for DnsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {} at {}",
            self.query_type, self.domain, self.source_ip, self.timestamp
        )
    }
}

/// Analyzer category a flag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagCategory {
    Statistical,
    String,
    Set,
    Semantic,
}

impl fmt::Display for FlagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagCategory::Statistical => write!(f, "statistical"),
            FlagCategory::String => write!(f, "string"),
            FlagCategory::Set => write!(f, "set"),
            FlagCategory::Semantic => write!(f, "semantic"),
        }
    }
}

/// A single detection indicator.
///
/// Variants carry the measured values; `Display` renders the exact
/// strings that appear in reports and that operators grep for.
#[derive(Debug, Clone, PartialEq)]
pub enum Flag {
    // statistical
    HighFrequency { per_minute: f64 },
    LongSubdomain { length: usize },
    HighEntropy { count: usize, ratio: f64 },
    SingleUsePattern { count: usize, ratio: f64 },
    TxtHeavy { ratio: f64 },
    MixedQueryTypes { count: usize },
    RapidSubdomainGeneration { per_minute: f64 },
    HighCardinality { ratio: f64 },
    // string
    CommonSubstring(String),
    LongLabelDistribution,
    SequentialGenerationPairs(usize),
    EncodingLikePatterns,
    // set
    HighCardinalityRatio(f64),
    SingleUseSubdomainsRatio(f64),
    LongLabelsAvg(f64),
    ConsonantHeavyLabels,
    // semantic
    Keyword(String),
    HomoglyphLikeSequence,
    BrandImpersonation(String),
}

impl Flag {
    /// Statistical indicators strong enough to void the
    /// "normal DNS patterns" credit and drive hard decisions.
    pub fn is_major(&self) -> bool {
        matches!(
            self,
            Flag::HighFrequency { .. }
                | Flag::HighEntropy { .. }
                | Flag::SingleUsePattern { .. }
                | Flag::TxtHeavy { .. }
                | Flag::RapidSubdomainGeneration { .. }
                | Flag::HighCardinality { .. }
        )
    }

    pub fn is_high_entropy(&self) -> bool {
        matches!(self, Flag::HighEntropy { .. })
    }

    pub fn is_high_frequency(&self) -> bool {
        matches!(self, Flag::HighFrequency { .. })
    }

    pub fn is_txt_heavy(&self) -> bool {
        matches!(self, Flag::TxtHeavy { .. })
    }

    /// Single-use indicators from either the statistical or set stage.
    pub fn is_single_use(&self) -> bool {
        matches!(
            self,
            Flag::SingleUsePattern { .. } | Flag::SingleUseSubdomainsRatio(_)
        )
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::HighFrequency { per_minute } => {
                write!(f, "high_frequency_{:.1}_per_min", per_minute)
            }
            Flag::LongSubdomain { length } => write!(f, "long_subdomain_{}_chars", length),
            Flag::HighEntropy { count, ratio } => {
                write!(f, "high_entropy_{}_subdomains_{:.2}_ratio", count, ratio)
            }
            Flag::SingleUsePattern { count, ratio } => {
                write!(f, "single_use_pattern_{}_domains_{:.2}_ratio", count, ratio)
            }
            Flag::TxtHeavy { ratio } => write!(f, "txt_heavy_{:.2}_ratio", ratio),
            Flag::MixedQueryTypes { count } => write!(f, "mixed_query_types_{}_types", count),
            Flag::RapidSubdomainGeneration { per_minute } => {
                write!(f, "rapid_subdomain_generation_{:.1}_per_min", per_minute)
            }
            Flag::HighCardinality { ratio } => write!(f, "high_cardinality_{:.2}_ratio", ratio),
            Flag::CommonSubstring(s) => write!(f, "common_substring:{}", s),
            Flag::LongLabelDistribution => write!(f, "long_label_distribution"),
            Flag::SequentialGenerationPairs(count) => {
                write!(f, "sequential_generation_pairs:{}", count)
            }
            Flag::EncodingLikePatterns => write!(f, "encoding_like_patterns"),
            Flag::HighCardinalityRatio(ratio) => {
                write!(f, "high_cardinality_ratio:{:.2}", ratio)
            }
            Flag::SingleUseSubdomainsRatio(ratio) => {
                write!(f, "single_use_subdomains_ratio:{:.2}", ratio)
            }
            Flag::LongLabelsAvg(avg) => write!(f, "long_labels_avg:{:.1}", avg),
            Flag::ConsonantHeavyLabels => write!(f, "consonant_heavy_labels"),
            Flag::Keyword(word) => write!(f, "keyword:{}", word),
            Flag::HomoglyphLikeSequence => write!(f, "homoglyph_like_sequence"),
            Flag::BrandImpersonation(brand) => write!(f, "brand_impersonation:{}", brand),
        }
    }
}

impl Serialize for Flag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Aggregate record for a base domain flagged by the statistical filter
/// and enriched by the downstream analyzers.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousDomain {
    pub base_domain: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_queries: usize,
    pub unique_subdomains: BTreeSet<String>,
    pub source_ips: BTreeSet<IpAddr>,
    flags: BTreeMap<FlagCategory, Vec<Flag>>,
    pub queries: Vec<DnsQuery>,
    /// Per-analyzer signed score contributions.
    pub scores: BTreeMap<String, f64>,
}

impl SuspiciousDomain {
    pub fn new(base_domain: String, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> Self {
        Self {
            base_domain,
            first_seen,
            last_seen,
            total_queries: 0,
            unique_subdomains: BTreeSet::new(),
            source_ips: BTreeSet::new(),
            flags: BTreeMap::new(),
            queries: Vec::new(),
            scores: BTreeMap::new(),
        }
    }

    /// Fold a query into the aggregate, maintaining the time bounds.
    pub fn add_query(&mut self, query: DnsQuery) {
        debug_assert_eq!(query.base_domain(), self.base_domain);
        let subdomain = query.subdomain();
        if !subdomain.is_empty() {
            self.unique_subdomains.insert(subdomain);
        }
        self.source_ips.insert(query.source_ip);
        if query.timestamp < self.first_seen {
            self.first_seen = query.timestamp;
        }
        if query.timestamp > self.last_seen {
            self.last_seen = query.timestamp;
        }
        self.queries.push(query);
        self.total_queries += 1;
    }

    /// Append a flag under its category. Flags are never removed.
    pub fn add_flag(&mut self, category: FlagCategory, flag: Flag) {
        self.flags.entry(category).or_default().push(flag);
    }

    /// Flags recorded under one category, in insertion order.
    pub fn flags(&self, category: FlagCategory) -> &[Flag] {
        self.flags.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All flags across categories, statistical first.
    pub fn all_flags(&self) -> Vec<&Flag> {
        self.flags.values().flatten().collect()
    }
}

/// Externally observable properties of a domain, produced by the web
/// collaborator. All fields are best-effort; failures land in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebsiteProfile {
    pub domain: String,

    // accessibility
    pub http_accessible: bool,
    pub https_accessible: bool,
    pub http_status: Option<u16>,
    pub https_status: Option<u16>,
    pub final_url: Option<String>,
    pub response_time: Option<f64>,

    // tls
    pub has_ssl: bool,
    pub valid_ssl: bool,
    pub ssl_issuer: Option<String>,
    pub ssl_subject: Option<String>,
    pub ssl_valid_from: Option<DateTime<Utc>>,
    pub ssl_valid_to: Option<DateTime<Utc>>,
    pub ssl_days_until_expiry: Option<i64>,

    // whois
    pub registrar: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub privacy_protected: bool,
    pub age_days: Option<i64>,

    // dns records by type name
    pub dns_records: BTreeMap<String, Vec<String>>,

    // page metadata
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub content_length: usize,
    pub language: Option<String>,
    pub charset: Option<String>,
    pub social_tags: BTreeMap<String, String>,
    pub links: Vec<String>,
    pub images: Vec<String>,

    // reputation
    pub blacklist: BTreeMap<String, bool>,
    pub social_presence: BTreeMap<String, bool>,

    pub errors: Vec<String>,
}

impl WebsiteProfile {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Self::default()
        }
    }
}
