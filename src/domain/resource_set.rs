use std::collections::{HashMap, HashSet};

use bimap::BiMap;

use crate::domain::ids::{NodeId, NodeName};
use crate::domain::resource::{Resource, ResourceStatus};

/// The full fleet: every [`Resource`] the scheduler knows about, indexed by
/// both its name and its stable integer id.
///
/// This is plain data, not internally locked — callers reach it only
/// through the single fleet-wide lock, so giving it its own lock would
/// just invite double-locking.
#[derive(Debug, Default)]
pub struct ResourceSet {
    resources: HashMap<NodeId, Resource>,
    names: BiMap<NodeName, NodeId>,
}

/// A single clause of a [`ResourceSet::q_get`] predicate: an attribute key
/// and a glob-style pattern (`*` wildcard, or `lo-hi` for a numeric range)
/// that the attribute's value must match.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub key: String,
    pub pattern: String,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource, indexing it by both name and id. Never called by
    /// the placement engine or refresh loop: new fleet members are only
    /// ever introduced through explicit configuration, never discovered.
    pub fn add(&mut self, resource: Resource) {
        self.names.insert(resource.name.clone(), resource.id);
        self.resources.insert(resource.id, resource);
    }

    pub fn get_by_name(&self, name: &NodeName) -> Option<&Resource> {
        let id = self.names.get_by_left(name)?;
        self.resources.get(id)
    }

    pub fn get_by_name_mut(&mut self, name: &NodeName) -> Option<&mut Resource> {
        let id = self.names.get_by_left(name)?;
        self.resources.get_mut(id)
    }

    pub fn get_by_id(&self, id: NodeId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    pub fn get_by_id_mut(&mut self, id: NodeId) -> Option<&mut Resource> {
        self.resources.get_mut(&id)
    }

    pub fn name_for_id(&self, id: NodeId) -> Option<&NodeName> {
        self.names.get_by_right(&id)
    }

    pub fn id_for_name(&self, name: &NodeName) -> Option<NodeId> {
        self.names.get_by_left(name).copied()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn managed_names(&self) -> Vec<NodeName> {
        self.resources.values().filter(|r| r.is_managed()).map(|r| r.name.clone()).collect()
    }

    /// Every managed node currently idle, unreserved, and not blocked by a
    /// busy ancestor/descendant (§3). Order is not contractual.
    pub fn idle_nodes(&self) -> Vec<NodeName> {
        self.resources.values().filter(|r| r.is_managed() && r.is_idle() && !self.is_blocked(r.id)).map(|r| r.name.clone()).collect()
    }

    /// A resource's effective status is *blocked* when any ancestor or
    /// descendant is busy. Computed on demand rather than stored, so it can
    /// never drift out of sync with the neighbors it depends on.
    pub fn is_blocked(&self, id: NodeId) -> bool {
        let Some(resource) = self.resources.get(&id) else { return false };

        resource
            .parents
            .iter()
            .chain(resource.children.iter())
            .filter_map(|neighbor_id| self.resources.get(neighbor_id))
            .any(|neighbor| neighbor.status() == ResourceStatus::Busy)
    }

    /// Rewrites every resource's parent/child lists so they mention only
    /// currently-managed nodes, dropping dangling references to nodes that
    /// were removed from management since the relation was last built.
    pub fn update_relatives(&mut self) {
        let managed_ids: HashSet<NodeId> = self.resources.values().filter(|r| r.is_managed()).map(|r| r.id).collect();

        for resource in self.resources.values_mut() {
            resource.parents.retain(|id| managed_ids.contains(id));
            resource.children.retain(|id| managed_ids.contains(id));
        }
    }

    /// Filters managed resources by a conjunction of attribute predicates.
    /// Each [`QuerySpec`] pattern supports the `*` wildcard and `lo-hi`
    /// numeric ranges; result order is not contractual (callers that need
    /// order must sort explicitly.
    pub fn q_get(&self, specs: &[QuerySpec]) -> Vec<NodeName> {
        self.resources
            .values()
            .filter(|r| r.is_managed())
            .filter(|r| specs.iter().all(|spec| match r.attributes.get(&spec.key) {
                Some(value) => matches_pattern(&spec.pattern, value),
                None => false,
            }))
            .map(|r| r.name.clone())
            .collect()
    }
}

/// Matches `value` against a glob-style `pattern`: `*` matches anything,
/// `lo-hi` matches an integer value within an inclusive numeric range,
/// anything else is compared literally.
fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some((lo, hi)) = pattern.split_once('-') {
        if let (Ok(lo), Ok(hi), Ok(v)) = (lo.parse::<i64>(), hi.parse::<i64>(), value.parse::<i64>()) {
            return v >= lo && v <= hi;
        }
    }

    if pattern.contains('*') {
        return glob_to_literal_match(pattern, value);
    }

    pattern == value
}

/// Minimal `*`-only glob matcher: splits the pattern on `*` and checks the
/// resulting literal fragments appear in `value` in order, anchored at the
/// start/end when the pattern doesn't begin/end with `*`.
fn glob_to_literal_match(pattern: &str, value: &str) -> bool {
    let mut rest = value;
    let parts: Vec<&str> = pattern.split('*').collect();

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }

        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            if !rest.ends_with(part) {
                return false;
            }
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }

    true
}
