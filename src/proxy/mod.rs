//! Proxy module for collecting and validating proxies
//!
//! This module provides functionality for:
//! - Parsing proxy URLs and proxy list text
//! - Collecting proxies from files and remote listings into a deduplicating registry
//! - Probing an IP-echo endpoint directly and through each proxy
//! - Classifying proxies as anonymizing, transparent or dead with bounded concurrency

pub mod crawler;
pub mod models;
pub mod parser;
pub mod probe;
pub mod registry;
pub mod report;
pub mod source;
pub mod validator;

pub use crawler::{CrawlerConfig, ListSource, ProxyCrawler, ProxySource};
pub use models::{AddressKey, Protocol, ProxyAuth, ProxyRecord, RawProxyTuple};
pub use parser::ProxyParser;
pub use probe::{FailureKind, HttpOriginProbe, OriginProbe, ProbeFailure, ProbeResult, ProbeSuccess};
pub use registry::{IngestStats, ProxyRegistry};
pub use report::{ReportSummary, ValidationReport, ValidationResult, ValidationStatus};
pub use source::{FileSource, SourceAdapter, StaticSource};
pub use validator::{Baseline, ProxyValidator, ValidatorConfig};
