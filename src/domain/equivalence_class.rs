use std::collections::{HashMap, HashSet};

use union_find::{QuickUnionUf, UnionBySize, UnionFind};

use crate::domain::ids::{AdminReservationName, NodeName, Queue};
use crate::domain::resource::ResourceStatus;
use crate::domain::resource_set::ResourceSet;

/// The smallest set of queues and nodes such that no scheduling decision in
/// the class can affect another class (§3, §4.4).
///
/// `nodes` is kept on the emitted record so [`TESTABLE PROPERTY 3`] (pairwise
/// disjoint node sets across classes) can be checked directly; it is the
/// builder's *internal* per-node working sets — not this field — that get
/// discarded once classes are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClass {
    pub queues: Vec<Queue>,
    pub nodes: Vec<NodeName>,
    pub reservations: Vec<AdminReservationName>,
}

/// Partitions the active queue set into independent scheduling universes.
///
/// First pass groups nodes that share a queue using a union-find over node
/// indices (merging is O(α(n)) amortized rather than the repeated pairwise
/// rescans a naive fixpoint loop would need). Second pass folds in any
/// additional hardware adjacency (parent/child blocks) that the queue-based
/// grouping alone wouldn't have caught. Third pass attaches administrative
/// reservations whose node list intersects a class.
pub fn find_queue_equivalence_classes(
    resources: &ResourceSet,
    active_queues: &HashSet<Queue>,
    admin_reservations: &HashMap<AdminReservationName, Vec<NodeName>>,
) -> Vec<EquivalenceClass> {
    let candidates: Vec<_> = resources.iter().filter(|r| r.is_managed() && r.status() != ResourceStatus::Down).collect();

    let index_of: HashMap<NodeName, usize> = candidates.iter().enumerate().map(|(i, r)| (r.name.clone(), i)).collect();

    let mut dsu = QuickUnionUf::<UnionBySize>::new(candidates.len().max(1));
    let mut qn_per_node: Vec<HashSet<Queue>> = vec![HashSet::new(); candidates.len()];
    let mut queue_owner: HashMap<Queue, usize> = HashMap::new();

    for (i, r) in candidates.iter().enumerate() {
        let qn: HashSet<Queue> = r.queues.intersection(active_queues).cloned().collect();
        if qn.is_empty() {
            continue;
        }
        qn_per_node[i] = qn.clone();

        for q in &qn {
            match queue_owner.get(q) {
                Some(&owner) => dsu.union(i, owner),
                None => {
                    queue_owner.insert(q.clone(), i);
                }
            }
        }
    }

    // Hardware consolidation: merge any two schedulable nodes directly
    // related in the block hierarchy that both ended up in a class.
    for (i, r) in candidates.iter().enumerate() {
        if qn_per_node[i].is_empty() {
            continue;
        }
        for neighbor_id in r.parents.iter().chain(r.children.iter()) {
            if let Some(neighbor_name) = resources.name_for_id(*neighbor_id) {
                if let Some(&j) = index_of.get(neighbor_name) {
                    if !qn_per_node[j].is_empty() {
                        dsu.union(i, j);
                    }
                }
            }
        }
    }

    let mut groups: HashMap<usize, (HashSet<Queue>, HashSet<NodeName>)> = HashMap::new();

    for (i, r) in candidates.iter().enumerate() {
        if qn_per_node[i].is_empty() {
            continue;
        }
        let root = dsu.find(i);
        let entry = groups.entry(root).or_default();
        entry.0.extend(qn_per_node[i].iter().cloned());
        entry.1.insert(r.name.clone());
    }

    let mut classes: Vec<EquivalenceClass> = groups
        .into_values()
        .map(|(queues, nodes)| {
            let mut reservations: Vec<AdminReservationName> = admin_reservations
                .iter()
                .filter(|(_, res_nodes)| res_nodes.iter().any(|n| nodes.contains(n)))
                .map(|(name, _)| name.clone())
                .collect();
            reservations.sort();

            let mut queues: Vec<Queue> = queues.into_iter().collect();
            queues.sort();
            let mut nodes: Vec<NodeName> = nodes.into_iter().collect();
            nodes.sort();

            EquivalenceClass { queues, nodes, reservations }
        })
        .collect();

    // Deterministic emit order: (min queue name, min node name).
    classes.sort_by(|a, b| a.queues.first().cmp(&b.queues.first()).then_with(|| a.nodes.first().cmp(&b.nodes.first())));

    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::NodeId;
    use crate::domain::resource::Resource;

    fn node_with_queues(name: &str, id: i64, queues: &[&str]) -> Resource {
        let mut r = Resource::new(NodeName::new(name), NodeId(id), true);
        r.queues = queues.iter().map(|q| Queue::new(*q)).collect();
        r
    }

    #[test]
    fn classes_are_pairwise_disjoint_in_nodes() {
        let mut set = ResourceSet::new();
        set.add(node_with_queues("vs1", 1, &["default"]));
        set.add(node_with_queues("vs2", 2, &["default"]));
        set.add(node_with_queues("vs3", 3, &["batch"]));
        set.add(node_with_queues("vs4", 4, &["batch"]));

        let active = HashSet::from([Queue::new("default"), Queue::new("batch")]);
        let classes = find_queue_equivalence_classes(&set, &active, &HashMap::new());

        assert_eq!(classes.len(), 2);
        let all_nodes: Vec<&NodeName> = classes.iter().flat_map(|c| c.nodes.iter()).collect();
        let unique: HashSet<&NodeName> = all_nodes.iter().cloned().collect();
        assert_eq!(all_nodes.len(), unique.len());
    }

    #[test]
    fn shared_queue_merges_nodes_into_one_class() {
        let mut set = ResourceSet::new();
        set.add(node_with_queues("vs1", 1, &["default", "batch"]));
        set.add(node_with_queues("vs2", 2, &["batch"]));
        set.add(node_with_queues("vs3", 3, &["default"]));

        let active = HashSet::from([Queue::new("default"), Queue::new("batch")]);
        let classes = find_queue_equivalence_classes(&set, &active, &HashMap::new());

        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].nodes.len(), 3);
    }

    #[test]
    fn idempotent_for_identical_inputs() {
        let mut set = ResourceSet::new();
        set.add(node_with_queues("vs1", 1, &["default"]));
        set.add(node_with_queues("vs2", 2, &["default"]));

        let active = HashSet::from([Queue::new("default")]);
        let first = find_queue_equivalence_classes(&set, &active, &HashMap::new());
        let second = find_queue_equivalence_classes(&set, &active, &HashMap::new());

        assert_eq!(first, second);
    }

    #[test]
    fn admin_reservation_attached_to_intersecting_class() {
        let mut set = ResourceSet::new();
        set.add(node_with_queues("vs1", 1, &["default"]));

        let active = HashSet::from([Queue::new("default")]);
        let admin = HashMap::from([(AdminReservationName::new("res-a"), vec![NodeName::new("vs1")])]);
        let classes = find_queue_equivalence_classes(&set, &active, &admin);

        assert_eq!(classes[0].reservations, vec![AdminReservationName::new("res-a")]);
    }

    #[test]
    fn down_nodes_are_excluded() {
        let mut set = ResourceSet::new();
        let mut r = node_with_queues("vs1", 1, &["default"]);
        r.admin_set_status(ResourceStatus::Down);
        set.add(r);

        let active = HashSet::from([Queue::new("default")]);
        let classes = find_queue_equivalence_classes(&set, &active, &HashMap::new());
        assert!(classes.is_empty());
    }
}
