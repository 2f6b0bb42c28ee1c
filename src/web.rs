//! External web collaborator
//!
//! Best-effort enrichment of flagged domains: HTTP reachability, TLS
//! verification, WHOIS, DNS records, page metadata, DNSBL reputation
//! and social-link discovery. Every call is bounded by a per-call
//! timeout and every failure is captured as an error string on the
//! profile; nothing here can abort the pipeline.
//!
//! DNS lookups ride on `hickory-resolver`; a dedicated tokio runtime is
//! kept alive for the analyzer's lifetime and driven synchronously via
//! `block_on`, keeping the rest of the pipeline free of async plumbing.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType as DnsRecordType;
use hickory_resolver::{Resolver, TokioResolver};
use log::debug;
use regex::Regex;
use reqwest::Url;

use crate::errors::PipelineError;
use crate::models::WebsiteProfile;

/// Default bound on any single outbound call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Record types gathered for the profile.
const PROFILE_RECORD_TYPES: [(DnsRecordType, &str); 6] = [
    (DnsRecordType::A, "A"),
    (DnsRecordType::AAAA, "AAAA"),
    (DnsRecordType::MX, "MX"),
    (DnsRecordType::NS, "NS"),
    (DnsRecordType::TXT, "TXT"),
    (DnsRecordType::CNAME, "CNAME"),
];

/// Domain blocklists queried over DNS.
const BLACKLIST_ZONES: [(&str, &str); 2] = [
    ("spamhaus_dbl", "dbl.spamhaus.org"),
    ("surbl", "multi.surbl.org"),
];

/// Social platforms looked for among homepage links.
const SOCIAL_PLATFORMS: [(&str, &str); 5] = [
    ("facebook", "facebook.com"),
    ("twitter", "twitter.com"),
    ("linkedin", "linkedin.com"),
    ("instagram", "instagram.com"),
    ("youtube", "youtube.com"),
];

const WHOIS_PRIVACY_INDICATORS: [&str; 7] = [
    "privacy",
    "private",
    "redacted",
    "whoisguard",
    "proxy",
    "domains by proxy",
    "perfect privacy",
];

const MAX_LINKS: usize = 50;
const MAX_IMAGES: usize = 20;

/// HTTP/HTTPS reachability of a domain.
#[derive(Debug, Clone, Default)]
pub struct Accessibility {
    pub http_accessible: bool,
    pub https_accessible: bool,
    pub http_status: Option<u16>,
    pub https_status: Option<u16>,
    pub final_url: Option<String>,
    pub response_time: Option<f64>,
    pub error: Option<String>,
}

/// TLS certificate posture.
#[derive(Debug, Clone, Default)]
pub struct SslInfo {
    pub has_ssl: bool,
    pub valid_ssl: bool,
    pub error: Option<String>,
}

/// WHOIS-derived registration facts.
#[derive(Debug, Clone, Default)]
pub struct WhoisInfo {
    pub registrar: Option<String>,
    pub creation_date: Option<chrono::DateTime<chrono::Utc>>,
    pub expiration_date: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_date: Option<chrono::DateTime<chrono::Utc>>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub privacy_protected: bool,
    pub age_days: Option<i64>,
    pub error: Option<String>,
}

/// Homepage metadata.
#[derive(Debug, Clone, Default)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub language: Option<String>,
    pub charset: Option<String>,
    pub content_length: usize,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub error: Option<String>,
}

/// Synchronous facade over all outbound enrichment.
pub struct WebAnalyzer {
    timeout: Duration,
    /// Verifies certificates; used to establish `valid_ssl`.
    strict_client: reqwest::blocking::Client,
    /// Accepts any certificate; used for reachability and scraping.
    lenient_client: reqwest::blocking::Client,
    runtime: tokio::runtime::Runtime,
    resolver: TokioResolver,
    whois_patterns: WhoisPatterns,
    html_patterns: HtmlPatterns,
}

struct WhoisPatterns {
    registrar: Regex,
    created: Regex,
    expires: Regex,
    updated: Regex,
    name_server: Regex,
    status: Regex,
}

struct HtmlPatterns {
    title: Regex,
    meta: Regex,
    charset: Regex,
    link: Regex,
    image: Regex,
}

impl WebAnalyzer {
    pub fn new() -> Result<Self, PipelineError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, PipelineError> {
        let user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

        let strict_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;
        let lenient_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;

        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| PipelineError::Enrichment(e.to_string()))?;
        let resolver = Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();

        Ok(Self {
            timeout,
            strict_client,
            lenient_client,
            runtime,
            resolver,
            whois_patterns: WhoisPatterns::new(),
            html_patterns: HtmlPatterns::new(),
        })
    }

    /// Probe HTTPS first, then HTTP; the first protocol that answers
    /// settles reachability.
    pub fn check_domain_accessibility(&self, domain: &str) -> Accessibility {
        let mut result = Accessibility::default();

        for scheme in ["https", "http"] {
            let url = format!("{}://{}/", scheme, domain);
            let started = Instant::now();
            match self.lenient_client.get(&url).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if scheme == "https" {
                        result.https_accessible = true;
                        result.https_status = Some(status);
                    } else {
                        result.http_accessible = true;
                        result.http_status = Some(status);
                    }
                    result.response_time = Some(started.elapsed().as_secs_f64());
                    result.final_url = Some(response.url().to_string());
                    break;
                }
                Err(err) => {
                    debug!("{} unreachable over {}: {}", domain, scheme, err);
                    result.error = Some(err.to_string());
                }
            }
        }

        result
    }

    /// A certificate being served at all sets `has_ssl`; surviving
    /// verification sets `valid_ssl`.
    pub fn get_ssl_certificate_info(&self, domain: &str) -> SslInfo {
        let url = format!("https://{}/", domain);
        let mut info = SslInfo::default();

        match self.lenient_client.get(&url).send() {
            Ok(_) => info.has_ssl = true,
            Err(err) => {
                info.error = Some(err.to_string());
                return info;
            }
        }
        info.valid_ssl = self.strict_client.get(&url).send().is_ok();
        info
    }

    /// Plain-text WHOIS over port 43 against the registry for the TLD.
    pub fn get_whois_info(&self, domain: &str) -> WhoisInfo {
        let clean = domain.trim_end_matches('.');
        let tld = clean.rsplit('.').next().unwrap_or_default();
        let server = whois_server_for(tld);

        match self.whois_query(&server, clean) {
            Ok(response) => self.parse_whois_response(&response),
            Err(err) => WhoisInfo {
                error: Some(err),
                ..WhoisInfo::default()
            },
        }
    }

    fn whois_query(&self, server: &str, domain: &str) -> Result<String, String> {
        let address = (server, 43)
            .to_socket_addrs()
            .map_err(|e| format!("{}: {}", server, e))?
            .next()
            .ok_or_else(|| format!("{}: no address", server))?;

        let mut stream =
            TcpStream::connect_timeout(&address, self.timeout).map_err(|e| e.to_string())?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| e.to_string())?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| e.to_string())?;
        stream
            .write_all(format!("{}\r\n", domain).as_bytes())
            .map_err(|e| e.to_string())?;

        let mut response = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
                // a registry that stops talking still gave us something
                Err(_) => break,
            }
        }
        Ok(String::from_utf8_lossy(&response).to_string())
    }

    fn parse_whois_response(&self, text: &str) -> WhoisInfo {
        let patterns = &self.whois_patterns;
        let mut info = WhoisInfo::default();

        info.registrar = patterns
            .registrar
            .captures(text)
            .map(|c| c[1].trim().to_string());
        info.creation_date = patterns
            .created
            .captures(text)
            .and_then(|c| parse_whois_datetime(c[1].trim()));
        info.expiration_date = patterns
            .expires
            .captures(text)
            .and_then(|c| parse_whois_datetime(c[1].trim()));
        info.updated_date = patterns
            .updated
            .captures(text)
            .and_then(|c| parse_whois_datetime(c[1].trim()));
        info.name_servers = patterns
            .name_server
            .captures_iter(text)
            .map(|c| c[1].trim().to_lowercase())
            .collect();
        info.status = patterns
            .status
            .captures_iter(text)
            .map(|c| c[1].trim().to_string())
            .collect();

        let lowered = text.to_lowercase();
        info.privacy_protected = WHOIS_PRIVACY_INDICATORS
            .iter()
            .any(|indicator| lowered.contains(indicator));

        if let Some(created) = info.creation_date {
            info.age_days = Some((chrono::Utc::now() - created).num_days());
        }

        info
    }

    /// Gather A/AAAA/MX/NS/TXT/CNAME records; missing types yield empty
    /// lists rather than errors.
    pub fn get_dns_records(&self, domain: &str) -> BTreeMap<String, Vec<String>> {
        let name = format!("{}.", domain.trim_end_matches('.'));
        let mut records = BTreeMap::new();

        for (record_type, type_name) in PROFILE_RECORD_TYPES {
            let values = self
                .lookup(&name, record_type)
                .unwrap_or_default();
            records.insert(type_name.to_string(), values);
        }

        records
    }

    fn lookup(&self, name: &str, record_type: DnsRecordType) -> Option<Vec<String>> {
        let outcome = self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, self.resolver.lookup(name, record_type)).await
        });

        match outcome {
            Ok(Ok(lookup)) => Some(lookup.iter().map(|rdata| rdata.to_string()).collect()),
            Ok(Err(err)) => {
                debug!("lookup {} {} failed: {}", name, record_type, err);
                None
            }
            Err(_) => {
                debug!("lookup {} {} timed out", name, record_type);
                None
            }
        }
    }

    /// Fetch the page at `url` and pull out title, meta tags and link
    /// targets.
    pub fn extract_page_metadata(&self, url: &str) -> PageMetadata {
        let response = match self.lenient_client.get(url).send() {
            Ok(response) => response,
            Err(err) => {
                return PageMetadata {
                    error: Some(err.to_string()),
                    ..PageMetadata::default()
                }
            }
        };

        let base = response.url().clone();
        match response.text() {
            Ok(body) => self.parse_page_html(&body, &base),
            Err(err) => PageMetadata {
                error: Some(err.to_string()),
                ..PageMetadata::default()
            },
        }
    }

    fn parse_page_html(&self, html: &str, base: &Url) -> PageMetadata {
        let patterns = &self.html_patterns;
        let mut meta = PageMetadata {
            content_length: html.len(),
            ..PageMetadata::default()
        };

        meta.title = patterns
            .title
            .captures(html)
            .map(|c| c[1].trim().to_string());
        meta.charset = patterns
            .charset
            .captures(html)
            .map(|c| c[1].to_string());

        for captures in patterns.meta.captures_iter(html) {
            let value = captures[2].to_string();
            match captures[1].to_lowercase().as_str() {
                "description" => meta.description = Some(value),
                "keywords" => meta.keywords = Some(value),
                "language" => meta.language = Some(value),
                _ => {}
            }
        }

        meta.links = patterns
            .link
            .captures_iter(html)
            .take(MAX_LINKS)
            .filter_map(|c| absolutize(base, &c[1]))
            .collect();
        meta.images = patterns
            .image
            .captures_iter(html)
            .take(MAX_IMAGES)
            .filter_map(|c| absolutize(base, &c[1]))
            .collect();

        meta
    }

    /// DNSBL reputation over public domain blocklists; listing requires
    /// a positive answer, anything else reads as clean.
    pub fn check_blacklist_status(&self, domain: &str) -> BTreeMap<String, bool> {
        let base = domain.trim_end_matches('.');
        let mut verdicts = BTreeMap::new();

        for (name, zone) in BLACKLIST_ZONES {
            let query = format!("{}.{}.", base, zone);
            let listed = self
                .lookup(&query, DnsRecordType::A)
                .map_or(false, |records| !records.is_empty());
            verdicts.insert(name.to_string(), listed);
        }

        verdicts
    }

    /// Platform links discovered on the domain's homepage.
    pub fn find_social_media_presence(&self, domain: &str) -> BTreeMap<String, bool> {
        let meta = self.extract_page_metadata(&format!("https://{}/", domain));
        social_presence_from_links(&meta.links)
    }

    /// Compose the full profile for one domain. Every sub-check is
    /// independent; failures accumulate in `errors`.
    pub fn collect_profile(&self, domain: &str) -> WebsiteProfile {
        let mut profile = WebsiteProfile::new(domain);

        let access = self.check_domain_accessibility(domain);
        profile.http_accessible = access.http_accessible;
        profile.https_accessible = access.https_accessible;
        profile.http_status = access.http_status;
        profile.https_status = access.https_status;
        profile.final_url = access.final_url.clone();
        profile.response_time = access.response_time;
        if let Some(err) = access.error {
            profile.errors.push(err);
        }

        let ssl = self.get_ssl_certificate_info(domain);
        profile.has_ssl = ssl.has_ssl;
        profile.valid_ssl = ssl.valid_ssl;
        if let Some(err) = ssl.error {
            profile.errors.push(err);
        }

        let whois = self.get_whois_info(domain);
        profile.registrar = whois.registrar;
        profile.creation_date = whois.creation_date;
        profile.expiration_date = whois.expiration_date;
        profile.updated_date = whois.updated_date;
        profile.name_servers = whois.name_servers;
        profile.status = whois.status;
        profile.privacy_protected = whois.privacy_protected;
        profile.age_days = whois.age_days;
        if let Some(err) = whois.error {
            profile.errors.push(err);
        }

        profile.dns_records = self.get_dns_records(domain);

        if profile.http_accessible || profile.https_accessible {
            let url = access
                .final_url
                .unwrap_or_else(|| format!("https://{}/", domain));
            let meta = self.extract_page_metadata(&url);
            profile.title = meta.title;
            profile.description = meta.description;
            profile.keywords = meta.keywords;
            profile.language = meta.language;
            profile.charset = meta.charset;
            profile.content_length = meta.content_length;
            profile.social_presence = social_presence_from_links(&meta.links);
            profile.links = meta.links;
            profile.images = meta.images;
            if let Some(err) = meta.error {
                profile.errors.push(err);
            }
        } else {
            profile.social_presence = SOCIAL_PLATFORMS
                .iter()
                .map(|(platform, _)| (platform.to_string(), false))
                .collect();
        }

        profile.blacklist = self.check_blacklist_status(domain);
        profile
    }
}

impl WhoisPatterns {
    fn new() -> Self {
        Self {
            registrar: Regex::new(r"(?im)^\s*registrar\s*:\s*(.+)$").expect("valid pattern"),
            created: Regex::new(r"(?im)^\s*(?:creation date|created(?: on)?|registered(?: on)?)\s*:\s*(.+)$")
                .expect("valid pattern"),
            expires: Regex::new(
                r"(?im)^\s*(?:registry expiry date|expiration date|expires(?: on)?|paid-till)\s*:\s*(.+)$",
            )
            .expect("valid pattern"),
            updated: Regex::new(r"(?im)^\s*(?:updated date|last updated(?: on)?|modified)\s*:\s*(.+)$")
                .expect("valid pattern"),
            name_server: Regex::new(r"(?im)^\s*(?:name server|nserver)\s*:\s*(\S+)")
                .expect("valid pattern"),
            status: Regex::new(r"(?im)^\s*(?:domain )?status\s*:\s*(.+)$").expect("valid pattern"),
        }
    }
}

impl HtmlPatterns {
    fn new() -> Self {
        Self {
            title: Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").expect("valid pattern"),
            meta: Regex::new(
                r#"(?is)<meta[^>]*name=["']([^"']+)["'][^>]*content=["']([^"']*)["'][^>]*>"#,
            )
            .expect("valid pattern"),
            charset: Regex::new(r#"(?i)<meta[^>]*charset=["']?([a-zA-Z0-9_\-]+)"#)
                .expect("valid pattern"),
            link: Regex::new(r#"(?i)<a[^>]*href=["']([^"']+)["']"#).expect("valid pattern"),
            image: Regex::new(r#"(?i)<img[^>]*src=["']([^"']+)["']"#).expect("valid pattern"),
        }
    }
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|url| url.to_string())
}

/// Map homepage link targets to known social platforms.
pub fn social_presence_from_links(links: &[String]) -> BTreeMap<String, bool> {
    SOCIAL_PLATFORMS
        .iter()
        .map(|(platform, host)| {
            let present = links
                .iter()
                .any(|link| link.to_lowercase().contains(host));
            (platform.to_string(), present)
        })
        .collect()
}

/// WHOIS registries disagree on date formats; try the usual suspects.
fn parse_whois_datetime(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn whois_server_for(tld: &str) -> String {
    match tld {
        "com" | "net" => "whois.verisign-grs.com".to_string(),
        "org" => "whois.pir.org".to_string(),
        "info" => "whois.nic.info".to_string(),
        other => format!("whois.nic.{}", other),
    }
}
