//! Pipeline orchestrator
//!
//! Wires decoder -> extractor -> statistical filter -> enrichment
//! analyzers -> (optional) web collaborator -> scoring engine, and
//! assembles the final JSON-serializable report. This is the only
//! place that talks to the web collaborator; everything upstream works
//! on already-collected data.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::analyzers::{SemanticAnalyzer, SetAnalyzer, StringAnalyzer};
use crate::capture::PcapReader;
use crate::config::Config;
use crate::errors::PipelineError;
use crate::extractor::{DnsExtractor, ExtractorStats};
use crate::intelligence::{AnalysisInput, Assessment, Intelligence};
use crate::models::{DnsQuery, FlagCategory, SuspiciousDomain};
use crate::statistical::{FilterStats, StatisticalFilter};
use crate::web::WebAnalyzer;

/// The persisted analysis report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub total_domains_analyzed: usize,
    pub legitimacy_breakdown: BTreeMap<String, usize>,
    pub high_risk_domains: Vec<String>,
    pub recommendations: Vec<String>,
    pub extractor_stats: ExtractorStats,
    pub filter_stats: FilterStats,
    pub assessments: BTreeMap<String, Assessment>,
}

/// Run the whole detection pipeline over one capture file.
pub fn run_capture_pipeline(pcap_path: &Path, config: &Config) -> Result<Report, PipelineError> {
    let mut extractor = DnsExtractor::new();

    info!("reading capture file {}", pcap_path.display());
    let queries: Vec<DnsQuery> = {
        let reader = PcapReader::open(pcap_path)?;
        let mut queries = Vec::new();
        for record in reader {
            queries.extend(extractor.extract(&record));
        }
        queries
    };
    info!(
        "extracted {} DNS queries from {} packets",
        queries.len(),
        extractor.stats().total_packets
    );

    let mut filter = StatisticalFilter::new(config.statistical_thresholds.clone());
    let mut suspicious = filter.process_queries(&queries);

    let string_analyzer = StringAnalyzer::default();
    let set_analyzer = SetAnalyzer::default();
    let semantic_analyzer = SemanticAnalyzer::default();
    for domain in &mut suspicious {
        string_analyzer.analyze(domain);
        set_analyzer.analyze(domain);
        semantic_analyzer.analyze(domain);
    }

    let web = if config.pipeline.enable_web_checks {
        match WebAnalyzer::new() {
            Ok(analyzer) => Some(analyzer),
            Err(err) => {
                warn!("web checks disabled: {}", err);
                None
            }
        }
    } else {
        None
    };

    let mut brain = Intelligence::new();
    let mut web_checked = 0usize;
    for domain in &suspicious {
        let mut input = analysis_input(domain);
        if let Some(analyzer) = &web {
            if web_checked < config.pipeline.max_domains_for_web_checks {
                info!("collecting web profile for {}", domain.base_domain);
                input.web_crawl_results = Some(analyzer.collect_profile(&domain.base_domain));
                web_checked += 1;
            }
        }
        brain.analyze_domain(&domain.base_domain, input);
    }

    let summary = brain.generate_report();
    Ok(Report {
        total_domains_analyzed: summary.total_domains_analyzed,
        legitimacy_breakdown: summary.legitimacy_breakdown,
        high_risk_domains: summary.high_risk_domains,
        recommendations: summary.recommendations,
        extractor_stats: extractor.stats().clone(),
        filter_stats: filter.statistics(),
        assessments: brain.assessments().clone(),
    })
}

/// Package a suspicious domain's flags as scorer input.
fn analysis_input(domain: &SuspiciousDomain) -> AnalysisInput {
    AnalysisInput {
        statistical_flags: Some(domain.flags(FlagCategory::Statistical).to_vec()),
        string_patterns: Some(domain.flags(FlagCategory::String).to_vec()),
        set_analysis: Some(domain.flags(FlagCategory::Set).to_vec()),
        semantic_analysis: Some(domain.flags(FlagCategory::Semantic).to_vec()),
        web_crawl_results: None,
        website_history: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Flag;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_analysis_input_carries_all_flag_categories() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut domain = SuspiciousDomain::new("example.com".to_string(), start, start);
        domain.add_flag(FlagCategory::Statistical, Flag::TxtHeavy { ratio: 0.9 });
        domain.add_flag(FlagCategory::String, Flag::EncodingLikePatterns);
        domain.add_flag(FlagCategory::Set, Flag::ConsonantHeavyLabels);
        domain.add_flag(FlagCategory::Semantic, Flag::Keyword("pay".to_string()));

        let input = analysis_input(&domain);
        assert_eq!(input.statistical_flags.as_deref().unwrap().len(), 1);
        assert_eq!(input.string_patterns.as_deref().unwrap().len(), 1);
        assert_eq!(input.set_analysis.as_deref().unwrap().len(), 1);
        assert_eq!(input.semantic_analysis.as_deref().unwrap().len(), 1);
        assert!(input.web_crawl_results.is_none());
        assert!(input.website_history.is_none());
    }
}
