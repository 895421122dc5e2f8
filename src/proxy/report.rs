//! Validation results and the ordered report of a pass

use crate::proxy::models::ProxyRecord;
use crate::proxy::probe::{ProbeFailure, ProbeResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Verdict for one proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    /// Works and hides the caller's address
    LiveAnonymizing,
    /// Works but the echo endpoint still saw the caller's address
    LiveTransparent,
    Dead,
}

impl ValidationStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, ValidationStatus::Dead)
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::LiveAnonymizing => write!(f, "anonymizing"),
            ValidationStatus::LiveTransparent => write!(f, "transparent"),
            ValidationStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Outcome of validating one proxy in one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub record: ProxyRecord,
    pub status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeFailure>,
}

impl ValidationResult {
    /// Classify a probe outcome against the caller's true origin
    pub fn classify(record: ProxyRecord, outcome: ProbeResult, true_origin: &str) -> Self {
        match outcome {
            Ok(success) => {
                let status = if leaks_origin(&success.origin, true_origin) {
                    ValidationStatus::LiveTransparent
                } else {
                    ValidationStatus::LiveAnonymizing
                };
                Self {
                    record,
                    status,
                    latency_seconds: Some(success.latency_seconds),
                    observed_origin: Some(success.origin),
                    error: None,
                }
            }
            Err(failure) => Self::dead(record, failure),
        }
    }

    pub fn dead(record: ProxyRecord, failure: ProbeFailure) -> Self {
        Self {
            record,
            status: ValidationStatus::Dead,
            latency_seconds: None,
            observed_origin: None,
            error: Some(failure),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.observed_origin, self.latency_seconds, &self.error) {
            (Some(origin), Some(latency), _) => write!(
                f,
                "{} {} origin={} latency={:.3}s",
                self.record, self.status, origin, latency
            ),
            (_, _, Some(error)) => write!(f, "{} {} ({})", self.record, self.status, error),
            _ => write!(f, "{} {}", self.record, self.status),
        }
    }
}

/// Whether the observed origin exposes the true one
///
/// Echo services may report a forwarding chain such as `"1.1.1.1, 9.9.9.9"`,
/// and the direct baseline can be a chain too. Any hop shared by both counts
/// as a leak.
fn leaks_origin(observed: &str, true_origin: &str) -> bool {
    let true_hops: Vec<&str> = hops(true_origin).collect();
    hops(observed).any(|hop| true_hops.contains(&hop))
}

fn hops(origin: &str) -> impl Iterator<Item = &str> {
    origin.split(',').map(str::trim).filter(|hop| !hop.is_empty())
}

/// Per-status counts of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub anonymizing: usize,
    pub transparent: usize,
    pub dead: usize,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} proxies: {} anonymizing, {} transparent, {} dead",
            self.total, self.anonymizing, self.transparent, self.dead
        )
    }
}

/// Results of one validation pass, in the order the records were given
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub true_origin: String,
    /// `None` when the baseline was supplied rather than probed
    pub baseline_latency_seconds: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter()
    }

    pub fn with_status(&self, status: ValidationStatus) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    pub fn anonymizing(&self) -> impl Iterator<Item = &ValidationResult> {
        self.with_status(ValidationStatus::LiveAnonymizing)
    }

    pub fn transparent(&self) -> impl Iterator<Item = &ValidationResult> {
        self.with_status(ValidationStatus::LiveTransparent)
    }

    pub fn dead(&self) -> impl Iterator<Item = &ValidationResult> {
        self.with_status(ValidationStatus::Dead)
    }

    pub fn live(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_live())
    }

    pub fn summary(&self) -> ReportSummary {
        self.results.iter().fold(
            ReportSummary {
                total: self.results.len(),
                ..Default::default()
            },
            |mut summary, result| {
                match result.status {
                    ValidationStatus::LiveAnonymizing => summary.anonymizing += 1,
                    ValidationStatus::LiveTransparent => summary.transparent += 1,
                    ValidationStatus::Dead => summary.dead += 1,
                }
                summary
            },
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Protocol;
    use crate::proxy::probe::{FailureKind, ProbeSuccess};

    fn record(n: u8) -> ProxyRecord {
        ProxyRecord::new(format!("10.0.0.{n}"), 8080, Protocol::Http)
    }

    fn success(origin: &str) -> ProbeResult {
        Ok(ProbeSuccess {
            origin: origin.to_string(),
            latency_seconds: 0.25,
        })
    }

    #[test]
    fn test_classify() {
        let anon = ValidationResult::classify(record(1), success("1.1.1.1"), "9.9.9.9");
        assert_eq!(anon.status, ValidationStatus::LiveAnonymizing);
        assert_eq!(anon.observed_origin.as_deref(), Some("1.1.1.1"));
        assert_eq!(anon.latency_seconds, Some(0.25));
        assert!(anon.error.is_none());

        let transparent = ValidationResult::classify(record(2), success("9.9.9.9"), "9.9.9.9");
        assert_eq!(transparent.status, ValidationStatus::LiveTransparent);

        let dead = ValidationResult::classify(
            record(3),
            Err(ProbeFailure::bad_status(502)),
            "9.9.9.9",
        );
        assert_eq!(dead.status, ValidationStatus::Dead);
        assert!(dead.latency_seconds.is_none());
        assert!(dead.observed_origin.is_none());
        assert_eq!(dead.error.unwrap().kind, FailureKind::BadStatus);
    }

    #[test]
    fn test_forwarding_chain_with_true_origin_is_transparent() {
        let result = ValidationResult::classify(record(1), success("1.1.1.1, 9.9.9.9"), "9.9.9.9");
        assert_eq!(result.status, ValidationStatus::LiveTransparent);

        let result = ValidationResult::classify(record(1), success("1.1.1.1, 2.2.2.2"), "9.9.9.9");
        assert_eq!(result.status, ValidationStatus::LiveAnonymizing);
    }

    #[test]
    fn test_chained_baseline_matches_any_shared_hop() {
        let result = ValidationResult::classify(record(1), success("9.9.9.9"), "10.0.0.5, 9.9.9.9");
        assert_eq!(result.status, ValidationStatus::LiveTransparent);

        let result = ValidationResult::classify(record(1), success("1.1.1.1, 10.0.0.5"), "10.0.0.5, 9.9.9.9");
        assert_eq!(result.status, ValidationStatus::LiveTransparent);

        let result = ValidationResult::classify(record(1), success("1.1.1.1"), "10.0.0.5, 9.9.9.9");
        assert_eq!(result.status, ValidationStatus::LiveAnonymizing);
    }

    #[test]
    fn test_summary_and_views() {
        let now = Utc::now();
        let report = ValidationReport {
            true_origin: "9.9.9.9".to_string(),
            baseline_latency_seconds: Some(0.1),
            started_at: now,
            finished_at: now,
            results: vec![
                ValidationResult::classify(record(1), success("1.1.1.1"), "9.9.9.9"),
                ValidationResult::classify(record(2), success("9.9.9.9"), "9.9.9.9"),
                ValidationResult::dead(record(3), ProbeFailure::timeout(std::time::Duration::from_secs(1))),
                ValidationResult::classify(record(4), success("4.4.4.4"), "9.9.9.9"),
            ],
        };

        assert_eq!(
            report.summary(),
            ReportSummary {
                total: 4,
                anonymizing: 2,
                transparent: 1,
                dead: 1
            }
        );
        assert_eq!(report.live().count(), 3);
        let anonymizing: Vec<_> = report.anonymizing().map(|r| r.record.host()).collect();
        assert_eq!(anonymizing, ["10.0.0.1", "10.0.0.4"]);
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let now = Utc::now();
        let report = ValidationReport {
            true_origin: "9.9.9.9".to_string(),
            baseline_latency_seconds: None,
            started_at: now,
            finished_at: now,
            results: vec![ValidationResult::dead(record(1), ProbeFailure::bad_status(503))],
        };

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let result = &json["results"][0];
        assert_eq!(result["status"], "DEAD");
        assert_eq!(result["error"]["kind"], "BAD_STATUS");
        assert!(result.get("latency_seconds").is_none());
        assert_eq!(result["record"]["protocol"], "http");
    }

    #[test]
    fn test_result_display() {
        let live = ValidationResult::classify(record(1), success("1.1.1.1"), "9.9.9.9");
        assert_eq!(live.to_string(), "http://10.0.0.1:8080 anonymizing origin=1.1.1.1 latency=0.250s");

        let dead = ValidationResult::dead(record(2), ProbeFailure::bad_status(503));
        assert_eq!(dead.to_string(), "http://10.0.0.2:8080 dead (bad HTTP status: 503)");
    }
}
