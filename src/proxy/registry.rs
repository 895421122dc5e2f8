//! Deduplicating registry of collected proxies

use crate::proxy::models::{AddressKey, Protocol, ProxyRecord, RawProxyTuple};
use crate::proxy::source::SourceAdapter;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::ops::AddAssign;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Counters returned by an ingest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Records added to the registry
    pub inserted: usize,
    /// Tuples whose address key was already held
    pub duplicates: usize,
    /// Tuples skipped for an empty host, bad port or unknown protocol
    pub malformed: usize,
}

impl AddAssign for IngestStats {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.duplicates += rhs.duplicates;
        self.malformed += rhs.malformed;
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<ProxyRecord>,
    index: HashMap<AddressKey, usize>,
}

/// Ordered, deduplicated set of proxy records
///
/// Records are keyed by `(protocol, host, port)` and kept in first-seen
/// order. The first record ingested for a key wins; later duplicates never
/// change it.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    inner: RwLock<Inner>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize and insert raw tuples, skipping duplicates and malformed input
    pub fn ingest<I>(&self, tuples: I) -> IngestStats
    where
        I: IntoIterator<Item = RawProxyTuple>,
    {
        let mut stats = IngestStats::default();
        let mut inner = self.write();

        for tuple in tuples {
            let Some(record) = normalize(&tuple) else {
                debug!(host = %tuple.host, port = %tuple.port, protocol = %tuple.protocol, "skipping malformed proxy tuple");
                stats.malformed += 1;
                continue;
            };

            let key = record.address_key();
            if inner.index.contains_key(&key) {
                stats.duplicates += 1;
                continue;
            }

            let position = inner.records.len();
            inner.index.insert(key, position);
            inner.records.push(record);
            stats.inserted += 1;
        }

        stats
    }

    /// Fetch every source in turn and ingest what it produced
    ///
    /// A failing source is logged and skipped; an empty registry afterwards is
    /// a valid outcome.
    pub async fn ingest_sources(&self, sources: &[Box<dyn SourceAdapter>]) -> IngestStats {
        let mut total = IngestStats::default();

        for source in sources {
            match source.fetch().await {
                Ok(tuples) if tuples.is_empty() => {
                    warn!(source = source.name(), "source returned no proxies");
                }
                Ok(tuples) => {
                    let stats = self.ingest(tuples);
                    info!(
                        source = source.name(),
                        inserted = stats.inserted,
                        duplicates = stats.duplicates,
                        malformed = stats.malformed,
                        "ingested proxies"
                    );
                    total += stats;
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "failed to collect proxies from source");
                }
            }
        }

        info!(total = self.len(), "registry holds proxies");
        total
    }

    pub fn get(&self, key: &AddressKey) -> Option<ProxyRecord> {
        let inner = self.read();
        inner.index.get(key).map(|&i| inner.records[i].clone())
    }

    /// All records in first-seen order
    pub fn all(&self) -> Vec<ProxyRecord> {
        self.read().records.clone()
    }

    /// Canonical `protocol://host:port` keys in first-seen order
    pub fn addresses(&self) -> Vec<String> {
        self.read().records.iter().map(|r| r.to_string()).collect()
    }

    pub fn countries(&self) -> BTreeSet<String> {
        self.read()
            .records
            .iter()
            .filter_map(|r| r.country().map(str::to_string))
            .collect()
    }

    /// Immutable view for a validation pass; later ingests do not affect it
    pub fn snapshot(&self) -> Arc<[ProxyRecord]> {
        Arc::from(self.read().records.as_slice())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Writers validate before touching `Inner`, so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turn a raw tuple into a record, or `None` if it is malformed
fn normalize(tuple: &RawProxyTuple) -> Option<ProxyRecord> {
    let host = tuple.host.trim();
    if host.is_empty() {
        return None;
    }

    let port = tuple.port.trim().parse::<u16>().ok().filter(|p| *p != 0)?;

    let mut protocol: Protocol = tuple.protocol.parse().ok()?;
    if tuple.remote_dns {
        protocol = protocol.with_remote_dns();
    }

    let mut record = ProxyRecord::new(host, port, protocol);
    if let Some(auth) = &tuple.auth {
        record = record.with_auth(auth.username.clone(), auth.password.clone());
    }
    Some(match tuple.country.as_deref().map(str::trim) {
        Some(country) if !country.is_empty() => record.with_country(country),
        _ => record,
    })
}
