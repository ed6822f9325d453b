use std::collections::{BTreeMap, HashSet};

use crate::domain::ids::NodeName;
use crate::domain::resource_set::ResourceSet;

/// Mapping from a future timestamp to the set of nodes that free at that
/// instant, plus the special key `0` meaning "free now" (§3).
///
/// A `BTreeMap` keeps buckets ordered by timestamp, which is exactly the
/// iteration order [`DrainTable::earliest_time_with_at_least`] needs.
#[derive(Debug, Default, Clone)]
pub struct DrainTable {
    buckets: BTreeMap<i64, HashSet<NodeName>>,
}

impl DrainTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the table to `{0 -> all managed idle nodes}`, then moves
    /// nodes named in `running_end_times` out of bucket `0` and into the
    /// bucket for their job's end time, merging with whatever nodes are
    /// already in that bucket.
    ///
    /// Afterward: the sentinel `-1` bucket (if left over from a previous
    /// tick) is gone, every managed node appears in exactly one bucket, and
    /// no node appears twice.
    pub fn init_drain_times(&mut self, resources: &ResourceSet, running_end_times: &[(Vec<NodeName>, i64)]) {
        self.init_drain_times_for(resources.managed_names(), running_end_times);
    }

    /// Same as [`DrainTable::init_drain_times`] but scoped to an explicit
    /// node universe, rather than the whole fleet. The placement engine
    /// uses this to build a drain table scoped to a single equivalence
    /// class's node set.
    pub fn init_drain_times_for(&mut self, universe: impl IntoIterator<Item = NodeName>, running_end_times: &[(Vec<NodeName>, i64)]) {
        self.buckets.clear();

        let mut free_now: HashSet<NodeName> = universe.into_iter().collect();

        for (nodes, end_time) in running_end_times {
            for node in nodes {
                free_now.remove(node);
            }
            self.buckets.entry(*end_time).or_default().extend(nodes.iter().cloned());
        }

        self.buckets.entry(0).or_default().extend(free_now);
        self.buckets.remove(&-1);
    }

    /// The smallest key `t` such that the union of all buckets with key
    /// `<= t` has at least `n` nodes, or `None` if no such `t` exists.
    pub fn earliest_time_with_at_least(&self, n: usize) -> Option<i64> {
        let mut running_total = 0usize;

        for (&time, nodes) in self.buckets.iter() {
            running_total += nodes.len();
            if running_total >= n {
                return Some(time);
            }
        }

        None
    }

    /// All nodes in buckets with key `<= t`.
    pub fn nodes_free_by(&self, t: i64) -> HashSet<NodeName> {
        self.buckets.range(..=t).flat_map(|(_, nodes)| nodes.iter().cloned()).collect()
    }

    pub fn bucket(&self, time: i64) -> Option<&HashSet<NodeName>> {
        self.buckets.get(&time)
    }

    pub fn total_nodes(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    #[cfg(test)]
    pub fn buckets_for_test(&self) -> &BTreeMap<i64, HashSet<NodeName>> {
        &self.buckets
    }
}
