//! Legitimacy scoring engine
//!
//! Takes everything the pipeline learned about a domain (statistical,
//! lexical, set and semantic flags, plus an optional web profile) and
//! produces a bounded legitimacy score, a categorical verdict and a
//! confidence. Scoring is a pure function of its input; the engine just
//! remembers the latest assessment per domain for report generation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::models::{Flag, WebsiteProfile};

/// Neutral starting point on the 0-100 scale.
const BASE_SCORE: i64 = 50;

/// Number of evidence facets an input can carry.
const FACET_COUNT: usize = 6;

/// Final verdict category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegitimacyLevel {
    Legitimate,
    Suspicious,
    LikelyFake,
    ConfirmedFake,
    Unknown,
}

impl LegitimacyLevel {
    pub const ALL: [LegitimacyLevel; 5] = [
        LegitimacyLevel::Legitimate,
        LegitimacyLevel::Suspicious,
        LegitimacyLevel::LikelyFake,
        LegitimacyLevel::ConfirmedFake,
        LegitimacyLevel::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegitimacyLevel::Legitimate => "legitimate",
            LegitimacyLevel::Suspicious => "suspicious",
            LegitimacyLevel::LikelyFake => "likely_fake",
            LegitimacyLevel::ConfirmedFake => "confirmed_fake",
            LegitimacyLevel::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LegitimacyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggested operator action for a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Allow,
    Monitor,
    Investigate,
    Block,
}

/// Ordered evidence trail behind a verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evidence {
    pub positive_indicators: Vec<String>,
    pub negative_indicators: Vec<String>,
    pub risk_factors: Vec<String>,
}

/// Everything the scorer consumes about one domain. Absent facets are
/// simply not scored; they never count against a domain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistical_flags: Option<Vec<Flag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_patterns: Option<Vec<Flag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_analysis: Option<Vec<Flag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_analysis: Option<Vec<Flag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_crawl_results: Option<WebsiteProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_history: Option<serde_json::Value>,
}

impl AnalysisInput {
    /// Number of facets that actually carry data.
    pub fn populated_facets(&self) -> usize {
        let flags_populated = |flags: &Option<Vec<Flag>>| {
            flags.as_ref().map_or(false, |f| !f.is_empty())
        };
        let history_populated = match &self.website_history {
            None => false,
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(serde_json::Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        };

        usize::from(flags_populated(&self.statistical_flags))
            + usize::from(flags_populated(&self.string_patterns))
            + usize::from(flags_populated(&self.set_analysis))
            + usize::from(flags_populated(&self.semantic_analysis))
            + usize::from(self.web_crawl_results.is_some())
            + usize::from(history_populated)
    }
}

/// Verdict for one domain.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub legitimacy_level: LegitimacyLevel,
    pub legitimacy_score: u8,
    pub confidence: f64,
    pub evidence: Evidence,
    pub recommendation: Recommendation,
    pub analysis_data: AnalysisInput,
}

/// Aggregate view over all stored assessments.
#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceSummary {
    pub total_domains_analyzed: usize,
    pub legitimacy_breakdown: BTreeMap<String, usize>,
    pub high_risk_domains: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Scoring engine with per-run assessment memory.
#[derive(Debug, Default)]
pub struct Intelligence {
    assessments: BTreeMap<String, Assessment>,
}

impl Intelligence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one domain and remember the result. Re-analyzing the same
    /// domain overwrites the stored assessment.
    pub fn analyze_domain(&mut self, domain: &str, input: AnalysisInput) -> Assessment {
        let assessment = score_domain(domain, input);
        debug!(
            "{}: level={} score={} confidence={:.2}",
            domain,
            assessment.legitimacy_level,
            assessment.legitimacy_score,
            assessment.confidence
        );
        self.assessments
            .insert(domain.to_string(), assessment.clone());
        assessment
    }

    /// Score a batch of domains in input order.
    pub fn bulk_analyze(&mut self, inputs: Vec<(String, AnalysisInput)>) -> Vec<Assessment> {
        inputs
            .into_iter()
            .map(|(domain, input)| self.analyze_domain(&domain, input))
            .collect()
    }

    pub fn assessments(&self) -> &BTreeMap<String, Assessment> {
        &self.assessments
    }

    /// Domains judged LIKELY_FAKE or CONFIRMED_FAKE.
    pub fn high_risk_domains(&self) -> Vec<String> {
        self.assessments
            .iter()
            .filter(|(_, a)| {
                matches!(
                    a.legitimacy_level,
                    LegitimacyLevel::LikelyFake | LegitimacyLevel::ConfirmedFake
                )
            })
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    /// Summary counts plus operator guidance derived from how often
    /// each negative indicator showed up.
    pub fn generate_report(&self) -> IntelligenceSummary {
        let mut breakdown: BTreeMap<String, usize> = LegitimacyLevel::ALL
            .iter()
            .map(|level| (level.as_str().to_string(), 0))
            .collect();
        for assessment in self.assessments.values() {
            if let Some(count) = breakdown.get_mut(assessment.legitimacy_level.as_str()) {
                *count += 1;
            }
        }

        IntelligenceSummary {
            total_domains_analyzed: self.assessments.len(),
            legitimacy_breakdown: breakdown,
            high_risk_domains: self.high_risk_domains(),
            recommendations: self.recommendations(),
        }
    }

    fn count_negative(&self, label: &str) -> usize {
        self.assessments
            .values()
            .filter(|a| a.evidence.negative_indicators.iter().any(|n| n == label))
            .count()
    }

    fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        if self.count_negative("high_entropy_subdomains") >= 3 {
            recommendations.push(
                "Tighten high-entropy thresholds and review flagged domains for DNS tunneling"
                    .to_string(),
            );
        }
        if self.count_negative("blacklisted") >= 1 {
            recommendations.push(
                "Block blacklisted domains at the resolver and audit the hosts that queried them"
                    .to_string(),
            );
        }
        if self.count_negative("single_use_pattern") >= 3 {
            recommendations.push(
                "Investigate possible domain-generation-algorithm activity across flagged domains"
                    .to_string(),
            );
        }
        if self.count_negative("suspicious_query_types") >= 3 {
            recommendations.push(
                "Audit TXT-heavy domains; bulk TXT lookups are a common exfiltration channel"
                    .to_string(),
            );
        }

        let high_risk = self.high_risk_domains();
        if !high_risk.is_empty() {
            recommendations.push(format!(
                "Prioritize investigation of {} high-risk domain(s)",
                high_risk.len()
            ));
        }

        recommendations
    }
}

/// Pure scoring function: same input, same verdict.
fn score_domain(domain: &str, input: AnalysisInput) -> Assessment {
    let facets = input.populated_facets();
    let confidence = (0.2 + 0.15 * facets as f64).min(1.0);

    if facets == 0 {
        // nothing to judge; reserved for explicitly empty input
        return Assessment {
            domain: domain.to_string(),
            timestamp: Utc::now(),
            legitimacy_level: LegitimacyLevel::Unknown,
            legitimacy_score: BASE_SCORE as u8,
            confidence,
            evidence: Evidence::default(),
            recommendation: Recommendation::Investigate,
            analysis_data: input,
        };
    }

    let empty: [Flag; 0] = [];
    let stat_flags: &[Flag] = input.statistical_flags.as_deref().unwrap_or(&empty);
    let string_flags: &[Flag] = input.string_patterns.as_deref().unwrap_or(&empty);
    let set_flags: &[Flag] = input.set_analysis.as_deref().unwrap_or(&empty);
    let semantic_flags: &[Flag] = input.semantic_analysis.as_deref().unwrap_or(&empty);
    let web = input.web_crawl_results.as_ref();

    let mut score = BASE_SCORE;
    let mut evidence = Evidence::default();

    // positive indicators
    if let Some(profile) = web {
        if profile.age_days.map_or(false, |days| days > 365) {
            score += 15;
            evidence.positive_indicators.push("domain_age>1y".to_string());
        }
        if profile.valid_ssl {
            score += 10;
            evidence.positive_indicators.push("valid_ssl".to_string());
        }
        if profile.content_length > 500 {
            score += 15;
            evidence
                .positive_indicators
                .push("active_site_content".to_string());
        }
        if profile.social_presence.values().any(|&present| present) {
            score += 10;
            evidence.positive_indicators.push("social_presence".to_string());
        }
    }
    if stat_flags.is_empty() {
        score += 10;
        evidence
            .positive_indicators
            .push("normal_dns_patterns".to_string());
    }
    if let Some(profile) = web {
        if profile.name_servers.len() >= 2 {
            score += 5;
            evidence.positive_indicators.push("established_ns".to_string());
        }
        if profile.content_length > 1000 {
            score += 5;
            evidence
                .positive_indicators
                .push("contact_info_signals".to_string());
        }
    }

    // negative indicators
    let mut blacklisted = false;
    if stat_flags.iter().any(Flag::is_high_entropy) {
        score -= 20;
        evidence
            .negative_indicators
            .push("high_entropy_subdomains".to_string());
    }
    if stat_flags.iter().any(Flag::is_high_frequency) {
        score -= 15;
        evidence
            .negative_indicators
            .push("excessive_query_frequency".to_string());
    }
    if stat_flags.iter().any(Flag::is_single_use) || set_flags.iter().any(Flag::is_single_use) {
        score -= 15;
        evidence
            .negative_indicators
            .push("single_use_pattern".to_string());
    }
    if let Some(profile) = web {
        if !profile.http_accessible && !profile.https_accessible {
            score -= 10;
            evidence.negative_indicators.push("no_web_presence".to_string());
        }
        if profile.age_days.map_or(false, |days| days < 90) {
            score -= 10;
            evidence
                .negative_indicators
                .push("recent_registration".to_string());
        }
        if profile.privacy_protected {
            score -= 5;
            evidence
                .negative_indicators
                .push("privacy_protected".to_string());
        }
    }
    if stat_flags.iter().any(Flag::is_txt_heavy) {
        score -= 10;
        evidence
            .negative_indicators
            .push("suspicious_query_types".to_string());
    }
    if let Some(profile) = web {
        if profile.blacklist.values().any(|&listed| listed) {
            score -= 30;
            blacklisted = true;
            evidence.negative_indicators.push("blacklisted".to_string());
        }
    }

    // raw analyzer flags become the risk-factor trail
    for flag in string_flags.iter().chain(set_flags).chain(semantic_flags) {
        evidence.risk_factors.push(flag.to_string());
    }

    let legitimacy_score = score.clamp(0, 100) as u8;

    let tunneling_signature = stat_flags.iter().any(Flag::is_txt_heavy)
        && stat_flags.iter().any(Flag::is_high_entropy);

    let (legitimacy_level, recommendation) = if blacklisted || tunneling_signature {
        (LegitimacyLevel::ConfirmedFake, Recommendation::Block)
    } else if legitimacy_score >= 75 {
        (LegitimacyLevel::Legitimate, Recommendation::Allow)
    } else if legitimacy_score >= 60 {
        (LegitimacyLevel::Suspicious, Recommendation::Monitor)
    } else if legitimacy_score >= 40 {
        (LegitimacyLevel::LikelyFake, Recommendation::Investigate)
    } else {
        (LegitimacyLevel::ConfirmedFake, Recommendation::Block)
    };

    Assessment {
        domain: domain.to_string(),
        timestamp: Utc::now(),
        legitimacy_level,
        legitimacy_score,
        confidence,
        evidence,
        recommendation,
        analysis_data: input,
    }
}
