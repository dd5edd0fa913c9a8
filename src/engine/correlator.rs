//! Observation correlation and the canonical device store
//!
//! The store is arena-plus-indices: records live in slots addressed by
//! stable handles, and three identifier indexes (MAC, IPv4, IPv6) map onto
//! handles. Merging two records collapses one handle into another and
//! rewrites the absorbed handle's index entries, which keeps the
//! one-identifier-one-record invariant trivially checkable.
//!
//! All mutation happens on a single task; drivers deposit observations
//! into a bounded channel and never touch the store.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::classify;
use crate::engine::events::{EventBus, ScanEvent};
use crate::models::{DeviceRecord, Observation, ScanStats};
use crate::network::ipv6::parse_ipv6;
use crate::network::mac::normalize_mac;

/// Stable handle into the store's slot arena.
pub type Handle = usize;

/// Result of ingesting one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No identifier present; nothing stored.
    Ignored,
    Created { handle: Handle, enriched: bool },
    Updated { handle: Handle, enriched: bool },
}

/// Keyed device store with multi-identifier lookup.
#[derive(Default)]
pub struct DeviceStore {
    slots: Vec<Option<DeviceRecord>>,
    by_mac: HashMap<String, Handle>,
    by_ipv4: HashMap<Ipv4Addr, Handle>,
    by_ipv6: HashMap<String, Handle>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ingest one observation: find-or-create, merge, reindex, enrich.
    pub fn on_observation(&mut self, obs: &Observation) -> IngestOutcome {
        let obs = canonicalised(obs);
        if obs.is_anonymous() {
            return IngestOutcome::Ignored;
        }

        // Probe the indexes in identifier-preference order; the first hit
        // selects the surviving record, later hits are merge-equivalent
        // records to unify.
        let mut hits: Vec<Handle> = Vec::new();
        let push_hit = |handle: Option<&Handle>, hits: &mut Vec<Handle>| {
            if let Some(&h) = handle
                && !hits.contains(&h)
            {
                hits.push(h);
            }
        };
        if let Some(mac) = &obs.mac {
            push_hit(self.by_mac.get(mac), &mut hits);
        }
        if let Some(ipv4) = &obs.ipv4 {
            push_hit(self.by_ipv4.get(ipv4), &mut hits);
        }
        for info in &obs.ipv6 {
            push_hit(self.by_ipv6.get(&info.addr), &mut hits);
        }

        match hits.split_first() {
            None => {
                let mut record = DeviceRecord::from_observation(&obs);
                let enriched = classify::enrich(&mut record);
                let handle = self.insert(record);
                IngestOutcome::Created { handle, enriched }
            }
            Some((&primary, rest)) => {
                for &absorbed in rest {
                    self.collapse(primary, absorbed);
                }
                let mut enriched = false;
                if let Some(record) = self.slots[primary].as_mut() {
                    record.merge(&obs);
                    enriched = classify::enrich(record);
                }
                self.reindex(primary);
                IngestOutcome::Updated {
                    handle: primary,
                    enriched,
                }
            }
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&DeviceRecord> {
        self.slots.get(handle).and_then(|s| s.as_ref())
    }

    /// Snapshot of all live records.
    pub fn get_devices(&self) -> Vec<DeviceRecord> {
        self.slots.iter().flatten().cloned().collect()
    }

    pub fn get_by_mac(&self, mac: &str) -> Option<&DeviceRecord> {
        let canonical = normalize_mac(mac)?;
        self.by_mac.get(&canonical).and_then(|&h| self.get(h))
    }

    /// Lookup by textual IP of either family.
    pub fn get_by_ip(&self, ip: &str) -> Option<&DeviceRecord> {
        if let Ok(v4) = ip.parse::<Ipv4Addr>() {
            return self.by_ipv4.get(&v4).and_then(|&h| self.get(h));
        }
        let info = parse_ipv6(ip)?;
        self.by_ipv6.get(&info.addr).and_then(|&h| self.get(h))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_mac.clear();
        self.by_ipv4.clear();
        self.by_ipv6.clear();
    }

    /// IPv4 addresses of records that still lack a hostname.
    pub fn hostname_less_ipv4(&self) -> Vec<Ipv4Addr> {
        self.slots
            .iter()
            .flatten()
            .filter(|r| r.hostname.is_none())
            .filter_map(|r| r.ipv4)
            .collect()
    }

    /// Non-link-local IPv6 addresses known so far, for deep-scan targeting.
    pub fn ipv6_targets(&self) -> Vec<String> {
        use crate::models::Ipv6Kind;
        self.slots
            .iter()
            .flatten()
            .flat_map(|r| r.ipv6.iter())
            .filter(|info| matches!(info.kind, Ipv6Kind::Global | Ipv6Kind::UniqueLocal))
            .map(|info| info.addr.clone())
            .collect()
    }

    fn insert(&mut self, record: DeviceRecord) -> Handle {
        let handle = self.slots.len();
        self.slots.push(Some(record));
        self.reindex(handle);
        handle
    }

    /// Point every identifier of the record at its handle.
    fn reindex(&mut self, handle: Handle) {
        let Some(record) = self.slots[handle].as_ref() else {
            return;
        };
        let mac = record.mac.clone();
        let ipv4 = record.ipv4;
        let ipv6: Vec<String> = record.ipv6.iter().map(|i| i.addr.clone()).collect();

        if let Some(mac) = mac {
            self.by_mac.insert(mac, handle);
        }
        if let Some(ipv4) = ipv4 {
            self.by_ipv4.insert(ipv4, handle);
        }
        for addr in ipv6 {
            self.by_ipv6.insert(addr, handle);
        }
    }

    /// Unify two records: the absorbed slot is emptied and all of its
    /// index entries are rewritten onto the survivor.
    fn collapse(&mut self, survivor: Handle, absorbed: Handle) {
        debug_assert_ne!(survivor, absorbed);
        let Some(old) = self.slots[absorbed].take() else {
            return;
        };
        self.by_mac.retain(|_, h| *h != absorbed);
        self.by_ipv4.retain(|_, h| *h != absorbed);
        self.by_ipv6.retain(|_, h| *h != absorbed);

        if let Some(record) = self.slots[survivor].as_mut() {
            record.absorb(old);
        }
        self.reindex(survivor);
    }

    /// Check the store invariants; used by tests.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        use std::collections::HashSet;

        let mut macs = HashSet::new();
        let mut v4s = HashSet::new();
        let mut v6s = HashSet::new();

        for record in self.slots.iter().flatten() {
            assert!(record.has_identifier(), "record without identifier stored");
            assert!(record.first_seen <= record.last_seen);
            for service in &record.services {
                assert!(record.ports.contains(&service.port));
            }
            assert_eq!(record.confidence, classify::device_confidence(record));
            if let Some(mac) = &record.mac {
                assert!(macs.insert(mac.clone()), "duplicate MAC {}", mac);
            }
            if let Some(ipv4) = record.ipv4 {
                assert!(v4s.insert(ipv4), "duplicate IPv4 {}", ipv4);
            }
            let mut seen = HashSet::new();
            for info in &record.ipv6 {
                assert!(seen.insert(info.addr.clone()), "duplicate IPv6 in record");
                assert!(v6s.insert(info.addr.clone()), "duplicate IPv6 {}", info.addr);
            }
        }

        for (mac, &handle) in &self.by_mac {
            assert_eq!(self.get(handle).and_then(|r| r.mac.as_deref()), Some(mac.as_str()));
        }
        for (&ipv4, &handle) in &self.by_ipv4 {
            assert_eq!(self.get(handle).and_then(|r| r.ipv4), Some(ipv4));
        }
        for (addr, &handle) in &self.by_ipv6 {
            let record = self.get(handle).expect("live slot");
            assert!(record.ipv6.iter().any(|i| &i.addr == addr));
        }
    }
}

/// Canonicalise identifier spellings before probing the indexes.
fn canonicalised(obs: &Observation) -> Observation {
    let mut out = obs.clone();
    out.mac = obs.mac.as_deref().and_then(normalize_mac);
    out.ipv6 = obs
        .ipv6
        .iter()
        .filter_map(|info| {
            let mut parsed = parse_ipv6(&info.addr)?;
            if parsed.scope.is_none() {
                parsed.scope = info.scope.clone();
            }
            Some(parsed)
        })
        .collect();
    out
}

/// Queries served by the correlator task.
pub enum CorrelatorQuery {
    Snapshot(oneshot::Sender<Vec<DeviceRecord>>),
    ByMac(String, oneshot::Sender<Option<DeviceRecord>>),
    ByIp(String, oneshot::Sender<Option<DeviceRecord>>),
    HostnameLessIpv4(oneshot::Sender<Vec<Ipv4Addr>>),
    Ipv6Targets(oneshot::Sender<Vec<String>>),
    Stats(oneshot::Sender<ScanStats>),
    Clear(oneshot::Sender<()>),
}

/// Cloneable handle for querying the correlator task.
#[derive(Clone)]
pub struct CorrelatorHandle {
    tx: mpsc::Sender<CorrelatorQuery>,
}

impl CorrelatorHandle {
    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CorrelatorQuery,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        self.query(CorrelatorQuery::Snapshot).await.unwrap_or_default()
    }

    pub async fn get_by_mac(&self, mac: &str) -> Option<DeviceRecord> {
        self.query(|tx| CorrelatorQuery::ByMac(mac.to_string(), tx))
            .await
            .flatten()
    }

    pub async fn get_by_ip(&self, ip: &str) -> Option<DeviceRecord> {
        self.query(|tx| CorrelatorQuery::ByIp(ip.to_string(), tx))
            .await
            .flatten()
    }

    pub async fn hostname_less_ipv4(&self) -> Vec<Ipv4Addr> {
        self.query(CorrelatorQuery::HostnameLessIpv4)
            .await
            .unwrap_or_default()
    }

    pub async fn ipv6_targets(&self) -> Vec<String> {
        self.query(CorrelatorQuery::Ipv6Targets)
            .await
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> ScanStats {
        self.query(CorrelatorQuery::Stats).await.unwrap_or_default()
    }

    pub async fn clear(&self) {
        let _ = self.query(CorrelatorQuery::Clear).await;
    }
}

/// Spawn the single-owner correlator task.
///
/// The task consumes observations until the channel closes, then keeps
/// serving queries until every handle is dropped.
pub fn spawn_correlator(
    mut observations: mpsc::Receiver<Observation>,
    events: EventBus,
) -> (CorrelatorHandle, JoinHandle<()>) {
    let (query_tx, mut queries) = mpsc::channel::<CorrelatorQuery>(32);
    let handle = CorrelatorHandle { tx: query_tx };

    let task = tokio::spawn(async move {
        let mut store = DeviceStore::new();
        let mut observed: u64 = 0;
        let mut by_source: BTreeMap<String, u64> = BTreeMap::new();
        let mut observations_open = true;
        let mut queries_open = true;

        while observations_open || queries_open {
            tokio::select! {
                obs = observations.recv(), if observations_open => match obs {
                    Some(obs) => {
                        observed += 1;
                        *by_source.entry(obs.source.as_str().to_string()).or_insert(0) += 1;
                        ingest_and_publish(&mut store, &obs, &events);
                    }
                    None => observations_open = false,
                },
                query = queries.recv(), if queries_open => match query {
                    Some(query) => serve_query(&mut store, query, observed, &by_source),
                    None => queries_open = false,
                },
            }
        }
    });

    (handle, task)
}

fn ingest_and_publish(store: &mut DeviceStore, obs: &Observation, events: &EventBus) {
    match store.on_observation(obs) {
        IngestOutcome::Ignored => {}
        IngestOutcome::Created { handle, enriched } => {
            if let Some(record) = store.get(handle) {
                events.emit(ScanEvent::DeviceDiscovered(Box::new(record.clone())));
                if enriched {
                    events.emit(ScanEvent::DeviceEnriched(Box::new(record.clone())));
                }
            }
        }
        IngestOutcome::Updated { handle, enriched } => {
            if let Some(record) = store.get(handle) {
                events.emit(ScanEvent::DeviceUpdated(Box::new(record.clone())));
                if enriched {
                    events.emit(ScanEvent::DeviceEnriched(Box::new(record.clone())));
                }
            }
        }
    }
}

fn serve_query(
    store: &mut DeviceStore,
    query: CorrelatorQuery,
    observed: u64,
    by_source: &BTreeMap<String, u64>,
) {
    match query {
        CorrelatorQuery::Snapshot(tx) => {
            let _ = tx.send(store.get_devices());
        }
        CorrelatorQuery::ByMac(mac, tx) => {
            let _ = tx.send(store.get_by_mac(&mac).cloned());
        }
        CorrelatorQuery::ByIp(ip, tx) => {
            let _ = tx.send(store.get_by_ip(&ip).cloned());
        }
        CorrelatorQuery::HostnameLessIpv4(tx) => {
            let _ = tx.send(store.hostname_less_ipv4());
        }
        CorrelatorQuery::Ipv6Targets(tx) => {
            let _ = tx.send(store.ipv6_targets());
        }
        CorrelatorQuery::Stats(tx) => {
            let _ = tx.send(ScanStats {
                duration_ms: 0,
                observations: observed,
                devices: store.len(),
                observations_by_source: by_source.clone(),
            });
        }
        CorrelatorQuery::Clear(tx) => {
            store.clear();
            let _ = tx.send(());
        }
    }
}
