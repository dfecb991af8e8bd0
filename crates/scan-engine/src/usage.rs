//! Per-host usage totals over an object catalog.
//!
//! Everything here is pure arithmetic over [`LogicalObject`]s already
//! produced by an enumeration; no storage is read.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::enumerate::LogicalObject;

/// Bytes held by each host. Every distinct base key is counted once, so an
/// object with N alternates contributes its size a single time.
pub fn aggregate_by_host<'a, I>(objects: I) -> BTreeMap<String, u64>
where
    I: IntoIterator<Item = &'a LogicalObject>,
{
    let mut seen = HashSet::new();
    let mut totals = BTreeMap::new();
    for object in objects {
        if !seen.insert(object.key.base()) {
            continue;
        }
        *totals.entry(object.host.clone()).or_insert(0) += object.size;
    }
    totals
}

/// A host's share, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HostShare {
    pub of_capacity: f64,
    pub of_used: f64,
}

/// Shares of capacity and of used space per host. A zero denominator yields 0.
pub fn percentages(
    host_totals: &BTreeMap<String, u64>,
    total_capacity: u64,
    total_used: u64,
) -> BTreeMap<String, HostShare> {
    host_totals
        .iter()
        .map(|(host, &bytes)| {
            let share = HostShare {
                of_capacity: percent(bytes, total_capacity),
                of_used: percent(bytes, total_used),
            };
            (host.clone(), share)
        })
        .collect()
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Size and alternate count of one URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UrlCount {
    pub size: u64,
    pub alternates: usize,
}

/// Objects keyed by their request URL. Objects without a URL are left out.
pub fn url_counts<'a, I>(objects: I) -> BTreeMap<String, UrlCount>
where
    I: IntoIterator<Item = &'a LogicalObject>,
{
    let mut out: BTreeMap<String, UrlCount> = BTreeMap::new();
    for object in objects {
        let Some(url) = &object.url else { continue };
        let count = out.entry(url.to_string()).or_default();
        count.size = count.size.max(object.size);
        count.alternates += object.alternates;
    }
    out
}

/// Usage of one span (or several) against its capacity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageReport {
    pub capacity: u64,
    pub used: u64,
    pub objects: usize,
    pub hosts: BTreeMap<String, u64>,
    pub shares: BTreeMap<String, HostShare>,
}

impl UsageReport {
    pub fn build<'a, I>(objects: I, total_capacity: u64) -> Self
    where
        I: IntoIterator<Item = &'a LogicalObject>,
    {
        let objects: Vec<&LogicalObject> = objects.into_iter().collect();
        let hosts = aggregate_by_host(objects.iter().copied());
        let used = hosts.values().sum();
        let shares = percentages(&hosts, total_capacity, used);
        Self {
            capacity: total_capacity,
            used,
            objects: objects.len(),
            hosts,
            shares,
        }
    }

    /// Hosts ordered by bytes held, largest first.
    pub fn top_hosts(&self, n: usize) -> Vec<(&str, u64)> {
        let mut hosts: Vec<(&str, u64)> =
            self.hosts.iter().map(|(h, &b)| (h.as_str(), b)).collect();
        hosts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        hosts.truncate(n);
        hosts
    }
}
