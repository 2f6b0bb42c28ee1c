//! Second-stage enrichment analyzers
//!
//! Each analyzer inspects a `SuspiciousDomain` produced by the
//! statistical filter and appends flags in its own category, plus a
//! signed score contribution. They only ever add evidence; nothing
//! upstream is mutated.

use log::debug;
use regex::Regex;

use crate::models::{Flag, FlagCategory, SuspiciousDomain};
use crate::strings::{
    count_sequential_pairs, detect_encoding_shape, extract_patterns,
};

/// Lexical structure analysis: shared templates, sequential generation
/// and encoding-shaped labels.
pub struct StringAnalyzer {
    max_edit_distance: usize,
}

impl StringAnalyzer {
    pub fn new(max_edit_distance: usize) -> Self {
        Self { max_edit_distance }
    }

    pub fn analyze(&self, item: &mut SuspiciousDomain) {
        // per-query order preserves temporal structure; fall back to the
        // unique set when no query carried a subdomain
        let mut subdomains: Vec<String> = item
            .queries
            .iter()
            .map(|q| q.subdomain())
            .filter(|s| !s.is_empty())
            .collect();
        if subdomains.is_empty() {
            subdomains = item.unique_subdomains.iter().cloned().collect();
        }

        let mut candidates = subdomains.clone();
        candidates.push(item.base_domain.clone());

        let patterns = extract_patterns(&candidates);
        if !patterns.common_substring.is_empty() {
            item.add_flag(
                FlagCategory::String,
                Flag::CommonSubstring(patterns.common_substring.clone()),
            );
        }
        if patterns
            .length_distribution
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
            > 30
        {
            item.add_flag(FlagCategory::String, Flag::LongLabelDistribution);
        }

        let pairs = count_sequential_pairs(&subdomains, self.max_edit_distance);
        if pairs >= 3 {
            item.add_flag(FlagCategory::String, Flag::SequentialGenerationPairs(pairs));
        }

        let encoding_hits: usize = candidates
            .iter()
            .map(|s| detect_encoding_shape(s).count())
            .sum();
        if encoding_hits >= 3 {
            item.add_flag(FlagCategory::String, Flag::EncodingLikePatterns);
        }

        let mut score = 0.0;
        let flags = item.flags(FlagCategory::String);
        if flags.iter().any(|f| matches!(f, Flag::EncodingLikePatterns)) {
            score -= 10.0;
        }
        if flags
            .iter()
            .any(|f| matches!(f, Flag::SequentialGenerationPairs(_)))
        {
            score -= 5.0;
        }
        item.scores.insert("string".to_string(), score);
        debug!("string analysis of {} scored {}", item.base_domain, score);
    }
}

impl Default for StringAnalyzer {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Set-cardinality analysis: churn ratios and DGA-ish label traits.
pub struct SetAnalyzer {
    min_unique_threshold: usize,
}

impl SetAnalyzer {
    pub fn new() -> Self {
        Self {
            min_unique_threshold: 10,
        }
    }

    pub fn analyze(&self, item: &mut SuspiciousDomain) {
        let subdomains: Vec<String> = if !item.unique_subdomains.is_empty() {
            item.unique_subdomains.iter().cloned().collect()
        } else {
            item.queries
                .iter()
                .map(|q| q.subdomain())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let total = if item.total_queries > 0 {
            item.total_queries
        } else {
            item.queries.len()
        };
        let unique = item.unique_subdomains.len().max(
            subdomains
                .iter()
                .collect::<std::collections::BTreeSet<_>>()
                .len(),
        );

        if total > 0 {
            let ratio = unique as f64 / total as f64;
            if ratio > 0.8 && unique >= self.min_unique_threshold {
                item.add_flag(FlagCategory::Set, Flag::HighCardinalityRatio(ratio));
            }
        }

        let mut counts: std::collections::BTreeMap<String, usize> =
            std::collections::BTreeMap::new();
        for query in &item.queries {
            let subdomain = query.subdomain();
            if !subdomain.is_empty() {
                *counts.entry(subdomain).or_insert(0) += 1;
            }
        }
        let single_use = counts.values().filter(|&&c| c == 1).count();
        if !counts.is_empty() {
            let ratio = single_use as f64 / counts.len() as f64;
            if ratio > 0.6 && single_use >= 5 {
                item.add_flag(FlagCategory::Set, Flag::SingleUseSubdomainsRatio(ratio));
            }
        }

        if !subdomains.is_empty() {
            let avg =
                subdomains.iter().map(|s| s.len()).sum::<usize>() as f64 / subdomains.len() as f64;
            if avg > 20.0 {
                item.add_flag(FlagCategory::Set, Flag::LongLabelsAvg(avg));
            }

            let consonant_heavy = subdomains
                .iter()
                .filter(|s| is_consonant_heavy(s))
                .count();
            if consonant_heavy as f64 / subdomains.len() as f64 > 0.5 {
                item.add_flag(FlagCategory::Set, Flag::ConsonantHeavyLabels);
            }
        }

        let mut score = 0.0;
        let flags = item.flags(FlagCategory::Set);
        if flags
            .iter()
            .any(|f| matches!(f, Flag::HighCardinalityRatio(_)))
        {
            score -= 10.0;
        }
        if flags
            .iter()
            .any(|f| matches!(f, Flag::SingleUseSubdomainsRatio(_)))
        {
            score -= 10.0;
        }
        if flags.iter().any(|f| matches!(f, Flag::LongLabelsAvg(_))) {
            score -= 5.0;
        }
        item.scores.insert("set".to_string(), score);
        debug!("set analysis of {} scored {}", item.base_domain, score);
    }
}

impl Default for SetAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// At least three consonants per vowel among the letters of a label.
/// Labels without letters are skipped; a missing vowel counts as one.
fn is_consonant_heavy(label: &str) -> bool {
    let mut vowels = 0usize;
    let mut consonants = 0usize;
    for ch in label.chars().filter(|c| c.is_ascii_alphabetic()) {
        match ch.to_ascii_lowercase() {
            'a' | 'e' | 'i' | 'o' | 'u' => vowels += 1,
            _ => consonants += 1,
        }
    }
    if vowels + consonants == 0 {
        return false;
    }
    consonants >= 3 * vowels.max(1)
}

/// Phishing-oriented reading of the base domain itself: luring
/// keywords, homoglyph runs and brand-plus-suffix label shapes.
pub struct SemanticAnalyzer {
    homoglyph: Regex,
    brand: Regex,
}

/// Keywords common in credential-luring domains.
const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "login", "update", "verify", "secure", "bank", "account", "reset", "wallet", "support",
    "invoice", "payment", "auth", "signin", "pay", "gift", "bonus",
];

const IMPERSONATED_BRANDS: &str = "google|apple|microsoft|amazon|facebook";

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self {
            homoglyph: Regex::new(r"[il1]{3,}").expect("valid homoglyph pattern"),
            brand: Regex::new(&format!(r"^({})[-_][a-z0-9]+", IMPERSONATED_BRANDS))
                .expect("valid brand pattern"),
        }
    }

    pub fn analyze(&self, item: &mut SuspiciousDomain) {
        let domain = item.base_domain.to_lowercase();
        let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();

        for word in SUSPICIOUS_KEYWORDS {
            for label in &labels {
                if label.contains(word) {
                    item.add_flag(FlagCategory::Semantic, Flag::Keyword((*word).to_string()));
                }
            }
        }

        if self.homoglyph.is_match(&domain) {
            item.add_flag(FlagCategory::Semantic, Flag::HomoglyphLikeSequence);
        }

        for label in &labels {
            if let Some(captures) = self.brand.captures(label) {
                item.add_flag(
                    FlagCategory::Semantic,
                    Flag::BrandImpersonation(captures[1].to_string()),
                );
            }
        }

        let mut score = 0.0;
        let flags = item.flags(FlagCategory::Semantic);
        if flags.iter().any(|f| matches!(f, Flag::Keyword(_))) {
            score -= 5.0;
        }
        if flags.iter().any(|f| matches!(f, Flag::BrandImpersonation(_))) {
            score -= 15.0;
        }
        item.scores.insert("semantic".to_string(), score);
        debug!("semantic analysis of {} scored {}", item.base_domain, score);
    }
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
