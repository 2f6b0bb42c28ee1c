//! dnsentinel: DNS covert-channel detection pipeline
//!
//! dnsentinel ingests captured network traffic, extracts DNS questions
//! and pushes them through a layered analytic pipeline that combines
//! statistical behavior, lexical structure, set cardinality and
//! semantic heuristics into a single legitimacy verdict per domain.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌─────────────┐
//! │  Capture │──▶│    DNS    │──▶│ Statistical │──▶│ String/Set/ │
//! │  Decoder │   │ Extractor │   │   Filter    │   │  Semantic   │
//! └──────────┘   └───────────┘   └─────────────┘   └──────┬──────┘
//!                                                         │
//!                              ┌──────────────┐   ┌───────▼──────┐
//!                              │ Intelligence │◀──│  (optional)  │
//!                              │   scoring    │   │  Web checks  │
//!                              └──────────────┘   └──────────────┘
//! ```
//!
//! Data flows strictly one way: frames become queries, queries become
//! per-domain aggregates, aggregates become assessments, assessments
//! become a report. No stage mutates upstream state.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dnsentinel::config::Config;
//! use dnsentinel::pipeline::run_capture_pipeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let report = run_capture_pipeline("traffic.pcap".as_ref(), &config)?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Command line
//!
//! ```bash
//! # Analyze a capture file
//! dnsentinel analyze traffic.pcap --out report.json
//!
//! # Capture 60 seconds of port-53 traffic with tshark, then analyze
//! dnsentinel capture -i eth0 -d 60
//! ```

pub mod analyzers;
pub mod capture;
pub mod config;
pub mod entropy;
pub mod errors;
pub mod extractor;
pub mod intelligence;
pub mod models;
pub mod pipeline;
pub mod statistical;
pub mod strings;
pub mod web;

// Re-export core types
pub use analyzers::{SemanticAnalyzer, SetAnalyzer, StringAnalyzer};
pub use capture::{PacketRecord, PcapReader};
pub use config::Config;
pub use errors::PipelineError;
pub use extractor::{DnsExtractor, ExtractorStats};
pub use intelligence::{
    AnalysisInput, Assessment, Intelligence, LegitimacyLevel, Recommendation,
};
pub use models::{DnsQuery, Flag, FlagCategory, RecordType, SuspiciousDomain, WebsiteProfile};
pub use pipeline::{run_capture_pipeline, Report};
pub use statistical::StatisticalFilter;
pub use web::WebAnalyzer;
