//! Source-address allowlist.
//!
//! Copy-on-write: the current set lives behind an `Arc`, readers clone the
//! `Arc` and check against that snapshot, writers build a fresh set and swap
//! it in. A replacement is therefore never visible half-applied.

use netguard_core::{normalize_peer, LOOPBACK_V4, LOOPBACK_V6};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable view of the allowlist at one point in time.
pub type AllowlistSnapshot = Arc<HashSet<String>>;

/// Set of normalized addresses permitted through the gateway.
///
/// Always contains [`LOOPBACK_V4`] and [`LOOPBACK_V6`], whatever the caller
/// supplies.
#[derive(Debug)]
pub struct Allowlist {
    current: RwLock<AllowlistSnapshot>,
}

impl Allowlist {
    pub fn new<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            current: RwLock::new(Arc::new(build_set(ips))),
        }
    }

    /// Replace the whole set. Loopback entries are re-added.
    pub fn replace<I, S>(&self, ips: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = Arc::new(build_set(ips));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn snapshot(&self) -> AllowlistSnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check a normalized address against the current snapshot.
    pub fn contains(&self, address: &str) -> bool {
        self.snapshot().contains(address)
    }

    /// Sorted copy of the entries, for logging and display.
    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.snapshot().iter().cloned().collect();
        entries.sort();
        entries
    }
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

fn build_set<I, S>(ips: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set: HashSet<String> = ips
        .into_iter()
        .filter_map(|ip| normalize_peer(ip.as_ref()).map(str::to_string))
        .collect();
    set.insert(LOOPBACK_V4.to_string());
    set.insert(LOOPBACK_V6.to_string());
    set
}
