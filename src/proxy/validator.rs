//! Proxy validator: bounded concurrent probing and anonymity classification

use crate::error::{Error, Result};
use crate::proxy::models::ProxyRecord;
use crate::proxy::probe::{HttpOriginProbe, OriginProbe, ProbeFailure, ProbeResult, DEFAULT_ECHO_URL};
use crate::proxy::report::{ValidationReport, ValidationResult};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default timeout for each probe in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of probes in flight
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Configuration for proxy validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Upper bound for each probe, connect and read included
    pub timeout: Duration,
    /// Maximum number of probes in flight
    pub concurrency: usize,
    /// IP-echo endpoint used by the default probe
    pub echo_url: String,
    /// Known true origin; skips the direct probe when set
    pub baseline: Option<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            echo_url: DEFAULT_ECHO_URL.to_string(),
            baseline: None,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_echo_url(mut self, url: String) -> Self {
        self.echo_url = url;
        self
    }

    pub fn with_baseline(mut self, origin: String) -> Self {
        self.baseline = Some(origin);
        self
    }
}

/// The caller's true origin for one pass
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub origin: String,
    /// `None` when the origin was supplied instead of probed
    pub latency_seconds: Option<f64>,
}

/// Validates proxies by comparing the origin seen through them with the caller's own
#[derive(Clone)]
pub struct ProxyValidator {
    config: ValidatorConfig,
    probe: Arc<dyn OriginProbe>,
}

impl ProxyValidator {
    /// Create a validator probing the configured echo endpoint over HTTP
    pub fn new(config: ValidatorConfig) -> Self {
        let probe = Arc::new(HttpOriginProbe::new(config.echo_url.clone()));
        Self { config, probe }
    }

    /// Create a validator with a custom probe
    pub fn with_probe(config: ValidatorConfig, probe: Arc<dyn OriginProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate every record; see [`ProxyValidator::validate_all_with_cancel`]
    pub async fn validate_all(&self, records: &[ProxyRecord]) -> Result<ValidationReport> {
        self.validate_all_with_cancel(records, CancellationToken::new()).await
    }

    /// Validate every record, stopping early if `cancel` fires
    ///
    /// The true origin is resolved once up front; if that fails the pass
    /// fails with [`Error::BaselineUnavailable`] and no results. Per-proxy
    /// failures never fail the pass. Results come back in input order.
    /// On cancellation no further probes start, in-flight ones are aborted
    /// and [`Error::Cancelled`] is returned.
    pub async fn validate_all_with_cancel(
        &self,
        records: &[ProxyRecord],
        cancel: CancellationToken,
    ) -> Result<ValidationReport> {
        self.check_config()?;
        let started_at = Utc::now();

        let baseline = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            baseline = self.resolve_baseline() => baseline?,
        };

        info!(
            proxies = records.len(),
            concurrency = self.config.concurrency,
            true_origin = %baseline.origin,
            "starting validation pass"
        );

        let true_origin: Arc<str> = Arc::from(baseline.origin.as_str());
        let results = self.fan_out(records, true_origin, &cancel).await?;

        let report = ValidationReport {
            true_origin: baseline.origin,
            baseline_latency_seconds: baseline.latency_seconds,
            started_at,
            finished_at: Utc::now(),
            results,
        };

        let summary = report.summary();
        info!(
            total = summary.total,
            anonymizing = summary.anonymizing,
            transparent = summary.transparent,
            dead = summary.dead,
            "validation pass finished"
        );

        Ok(report)
    }

    /// Validate a single proxy, returning the baseline used alongside the result
    pub async fn check_one(&self, record: &ProxyRecord) -> Result<(Baseline, ValidationResult)> {
        let baseline = self.resolve_baseline().await?;
        let outcome = probe_with_timeout(self.probe.as_ref(), record, self.config.timeout).await;
        let result = ValidationResult::classify(record.clone(), outcome, &baseline.origin);
        Ok((baseline, result))
    }

    /// The configured baseline, or the origin seen by a direct probe
    pub async fn resolve_baseline(&self) -> Result<Baseline> {
        if let Some(origin) = &self.config.baseline {
            return Ok(Baseline {
                origin: origin.trim().to_string(),
                latency_seconds: None,
            });
        }

        match self.probe.probe(None, self.config.timeout).await {
            Ok(success) => Ok(Baseline {
                origin: success.origin,
                latency_seconds: Some(success.latency_seconds),
            }),
            Err(failure) => {
                error!(error = %failure, "direct probe failed, cannot establish true origin");
                Err(Error::BaselineUnavailable(failure))
            }
        }
    }

    fn check_config(&self) -> Result<()> {
        check_concurrency(self.config.concurrency)
    }

    /// Run one probe task per record, at most `concurrency` at a time
    async fn fan_out(
        &self,
        records: &[ProxyRecord],
        true_origin: Arc<str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ValidationResult>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<ValidationResult>> = vec![None; records.len()];
        let mut pending = records.iter().cloned().enumerate().peekable();

        // Dropping `tasks` on any early return aborts whatever is still running.
        loop {
            if pending.peek().is_none() && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(in_flight = tasks.len(), "validation pass cancelled");
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((index, result)) => slots[index] = Some(result),
                    Err(e) => error!(error = %e, "probe task failed to join"),
                },
                Ok(permit) = Arc::clone(&semaphore).acquire_owned(), if pending.peek().is_some() => {
                    let Some((index, record)) = pending.next() else { continue };
                    let probe = Arc::clone(&self.probe);
                    let true_origin = Arc::clone(&true_origin);
                    let timeout = self.config.timeout;

                    tasks.spawn(async move {
                        let _permit = permit;
                        let outcome = AssertUnwindSafe(probe_with_timeout(probe.as_ref(), &record, timeout))
                            .catch_unwind()
                            .await;

                        let result = match outcome {
                            Ok(outcome) => ValidationResult::classify(record, outcome, &true_origin),
                            Err(panic) => {
                                let message = panic_message(panic.as_ref());
                                error!(proxy = %record, panic_message = %message, "probe panicked");
                                ValidationResult::dead(record, ProbeFailure::internal(message))
                            }
                        };
                        debug!(index, result = %result, "probe finished");
                        (index, result)
                    });
                }
            }
        }

        Ok(records
            .iter()
            .zip(slots)
            .map(|(record, slot)| {
                slot.unwrap_or_else(|| {
                    ValidationResult::dead(record.clone(), ProbeFailure::internal("probe task did not complete"))
                })
            })
            .collect())
    }
}

/// Reject a concurrency the permit semaphore cannot hold
pub(crate) fn check_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 || concurrency > Semaphore::MAX_PERMITS {
        return Err(Error::Config(format!(
            "concurrency must be between 1 and {}, got {concurrency}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(())
}

/// Probe through `record`, bounding the call even if the probe ignores its timeout
async fn probe_with_timeout(probe: &dyn OriginProbe, record: &ProxyRecord, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, probe.probe(Some(record), timeout)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeFailure::timeout(timeout)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
