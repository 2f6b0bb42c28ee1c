//! Shannon entropy helpers
//!
//! Randomness of query labels is the single strongest tunneling signal:
//! encoded payloads and DGA output push character distributions toward
//! uniform, while human-chosen names stay far below the 4.0 bits/char
//! threshold used throughout the pipeline.

use std::collections::HashMap;

/// Threshold above which a string is considered machine-generated.
pub const HIGH_ENTROPY_THRESHOLD: f64 = 4.0;

/// Shannon entropy of a string over lower-cased character frequencies.
///
/// Returns 0.0 for the empty string.
pub fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut length = 0usize;
    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        *counts.entry(ch).or_insert(0) += 1;
        length += 1;
    }

    let length = length as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / length;
            -p * p.log2()
        })
        .sum()
}

/// Entropy of a domain name with the dots stripped out.
///
/// Separators are structural, not informational, so they are removed
/// before measuring.
pub fn domain_entropy(domain: &str) -> f64 {
    let clean: String = domain.chars().filter(|&c| c != '.').collect();
    shannon_entropy(&clean)
}

/// Entropy of a subdomain part. Empty subdomains score 0.0.
pub fn subdomain_entropy(subdomain: &str) -> f64 {
    if subdomain.is_empty() {
        return 0.0;
    }
    shannon_entropy(subdomain)
}

/// Whether a string crosses the randomness threshold.
pub fn is_high_entropy(text: &str, threshold: f64) -> bool {
    shannon_entropy(text) > threshold
}

/// Summary entropy statistics over a list of domains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntropyStats {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub high_entropy_count: usize,
}

/// Aggregate entropy statistics for a batch of domain names.
pub fn entropy_stats(domains: &[String]) -> EntropyStats {
    if domains.is_empty() {
        return EntropyStats::default();
    }

    let entropies: Vec<f64> = domains.iter().map(|d| domain_entropy(d)).collect();
    let sum: f64 = entropies.iter().sum();
    let max = entropies.iter().cloned().fold(f64::MIN, f64::max);
    let min = entropies.iter().cloned().fold(f64::MAX, f64::min);
    let high = entropies
        .iter()
        .filter(|&&e| e > HIGH_ENTROPY_THRESHOLD)
        .count();

    EntropyStats {
        count: domains.len(),
        mean: sum / entropies.len() as f64,
        max,
        min,
        high_entropy_count: high,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_has_zero_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn test_uniform_string_has_zero_entropy() {
        assert_eq!(shannon_entropy("aaaaaaaa"), 0.0);
    }

    #[test]
    fn test_two_symbol_string() {
        let e = shannon_entropy("abab");
        assert!((e - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_case_is_folded() {
        assert_eq!(shannon_entropy("AaAa"), 0.0);
    }

    #[test]
    fn test_random_looking_label_is_high_entropy() {
        // 36 distinct symbols: log2(36) ~ 5.17 bits/char
        let label = "abcdefghijklmnopqrstuvwxyz0123456789";
        assert!(is_high_entropy(label, HIGH_ENTROPY_THRESHOLD));
    }

    #[test]
    fn test_dictionary_word_is_low_entropy() {
        assert!(!is_high_entropy("mail", HIGH_ENTROPY_THRESHOLD));
        assert!(!is_high_entropy("www", HIGH_ENTROPY_THRESHOLD));
    }

    #[test]
    fn test_domain_entropy_strips_dots() {
        assert_eq!(domain_entropy("a.a.a.a"), shannon_entropy("aaaa"));
    }

    #[test]
    fn test_entropy_stats_empty() {
        let stats = entropy_stats(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.high_entropy_count, 0);
    }

    #[test]
    fn test_entropy_stats_counts_high_entropy_domains() {
        let domains = vec![
            "mail.example.com".to_string(),
            "abcdefghijklmnopqrstuvwxyz0123456789.t.xyz".to_string(),
        ];
        let stats = entropy_stats(&domains);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.high_entropy_count, 1);
        assert!(stats.max > stats.min);
    }
}
