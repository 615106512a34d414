//! Diff between live firewall rules and the desired port set

use std::collections::{BTreeMap, BTreeSet};

use crate::reconcile::firewall::rules::{Family, FirewallRule};

/// TCP ports that must be reachable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredPortSet(BTreeSet<u16>);

impl DesiredPortSet {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self(ports.into_iter().filter(|p| *p > 0).collect())
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    /// Ascending
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One v4 and one v6 key per port
    pub fn keys(&self) -> impl Iterator<Item = ManagedRuleKey> + '_ {
        self.ports().flat_map(|port| {
            [Family::V4, Family::V6]
                .into_iter()
                .map(move |family| ManagedRuleKey { port, family })
        })
    }
}

impl FromIterator<u16> for DesiredPortSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// The unit the reconciler adds and removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedRuleKey {
    pub port: u16,
    pub family: Family,
}

/// Changes that converge the live rules to the desired set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallPlan {
    /// Rule numbers, highest first
    pub deletions: Vec<usize>,
    /// Ports to allow, ascending; `ufw allow` creates both families
    pub additions: Vec<u16>,
}

impl FirewallPlan {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.additions.is_empty()
    }
}

/// Compute the deletions and additions for `rules`
///
/// Only inbound allow rules are considered. A rule for a single TCP port whose
/// key is desired is kept, the lowest-numbered one when there are several.
/// With `prune_unmanaged`, every other inbound allow rule is deleted too.
pub fn plan(desired: &DesiredPortSet, rules: &[FirewallRule], prune_unmanaged: bool) -> FirewallPlan {
    let mut present: BTreeMap<ManagedRuleKey, Vec<usize>> = BTreeMap::new();
    let mut deletions: BTreeSet<usize> = BTreeSet::new();

    for rule in rules.iter().filter(|r| r.is_inbound_allow()) {
        let key = rule.tcp_port().map(|port| ManagedRuleKey {
            port,
            family: rule.family,
        });
        match key {
            Some(key) if desired.contains(key.port) => {
                present.entry(key).or_default().push(rule.number);
            }
            _ if prune_unmanaged => {
                deletions.insert(rule.number);
            }
            _ => {}
        }
    }

    for numbers in present.values_mut() {
        numbers.sort_unstable();
        deletions.extend(numbers.iter().skip(1).copied());
    }

    let additions: BTreeSet<u16> = desired
        .keys()
        .filter(|key| !present.contains_key(key))
        .map(|key| key.port)
        .collect();

    FirewallPlan {
        deletions: deletions.into_iter().rev().collect(),
        additions: additions.into_iter().collect(),
    }
}
