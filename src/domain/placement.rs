//! The placement engine (§4.5): Phase A (immediate run), Phase B (drain),
//! Phase C (backfill), run once per equivalence class per invocation.
//!
//! The engine never throws across its boundary (§7): every failure mode
//! degrades to an empty or partial result plus a log line, never a panic
//! or propagated `Error`.

use std::collections::HashMap;

use crate::domain::drain_table::DrainTable;
use crate::domain::ids::{JobId, NodeName};
use crate::domain::job::Job;
use crate::domain::reservation::ReservationTable;
use crate::domain::resource_set::ResourceSet;

/// What a single `find_job_location` call decided: which jobs got an
/// immediate placement, and which single node set (if any) was put on a
/// drain countdown for the head-of-queue job that couldn't run yet.
#[derive(Debug, Default, Clone)]
pub struct PlacementOutcome {
    pub placements: HashMap<JobId, Vec<NodeName>>,
    pub drain: Option<DrainDecision>,
}

#[derive(Debug, Clone)]
pub struct DrainDecision {
    pub jobid: JobId,
    pub until: i64,
    pub nodes: Vec<NodeName>,
}

/// Runs Phase A/B/C for one equivalence class.
///
/// `class_nodes` is the class's full node set (candidates, not just idle
/// ones). `jobs` must already be in score order (see
/// [`crate::domain::job::score_order`]) and scoped to this class's queues.
/// `end_times` are `(nodes, epoch_seconds)` pairs for currently-running
/// allocations anywhere in the class. `blocking` lists nodes the caller
/// has excluded from consideration this tick (e.g. held for maintenance).
///
/// Mutates `resources` in place: Phase A/C winners get a temporary
/// reservation of `temp_reservation_seconds`, and the Phase B drain
/// target's nodes get `drain_until`/`drain_jobid` stamped via
/// [`crate::domain::resource::Resource::mark_drain`].
///
/// Phase A stops at the first job it cannot place immediately — that job
/// becomes the single drain target for this class this tick (§4.5: "only
/// one drain target per class per invocation"). Lower-priority jobs are
/// not tried again until Phase C, where they may backfill into the idle
/// pool left over from Phase A as long as they finish before the drain
/// target's horizon.
pub fn find_job_location(
    class_nodes: &[NodeName],
    jobs: &[Job],
    end_times: &[(Vec<NodeName>, i64)],
    blocking: &[NodeName],
    resources: &mut ResourceSet,
    reservations: &ReservationTable,
    now: i64,
    temp_reservation_seconds: i64,
) -> PlacementOutcome {
    let class_size = class_nodes.len();

    let mut idle: Vec<NodeName> = class_nodes
        .iter()
        .filter(|n| !blocking.contains(n))
        .filter(|n| resources.get_by_name(n).is_some_and(|r| r.is_idle() && !resources.is_blocked(r.id)))
        .cloned()
        .collect();
    idle.sort();

    let mut placements: HashMap<JobId, Vec<NodeName>> = HashMap::new();
    let mut drain_target: Option<&Job> = None;

    // Phase A: immediate run, stopping at the first job that can't go.
    for job in jobs {
        if job_already_in_cleanup(reservations, job) || job.nodecount > class_size {
            continue;
        }

        if drain_target.is_some() {
            break;
        }

        if idle.len() >= job.nodecount {
            match allocate(&idle, job.nodecount) {
                Some(chosen) => {
                    apply_temporary_reservation(resources, &chosen, job, now + temp_reservation_seconds);
                    idle.retain(|n| !chosen.contains(n));
                    placements.insert(job.jobid.clone(), chosen);
                }
                None => log::warn!("first-fit allocator failed to pick {} nodes out of {} idle candidates", job.nodecount, idle.len()),
            }
        } else {
            drain_target = Some(job);
        }
    }

    if class_nodes.is_empty() {
        return PlacementOutcome { placements, drain: None };
    }

    // Phase B: drain.
    let mut drain_decision = None;

    if let Some(job) = drain_target {
        let remaining_universe: Vec<NodeName> = class_nodes.iter().filter(|n| !placed_anywhere(&placements, n)).cloned().collect();

        let mut table = DrainTable::new();
        table.init_drain_times_for(remaining_universe, end_times);

        if let Some(tp) = table.earliest_time_with_at_least(job.nodecount) {
            let nodes: Vec<NodeName> = table.nodes_free_by(tp).into_iter().collect();

            for node in &nodes {
                if let Some(resource) = resources.get_by_name_mut(node) {
                    resource.mark_drain(tp, job.jobid.clone(), job.score);
                }
            }

            drain_decision = Some(DrainDecision { jobid: job.jobid.clone(), until: tp, nodes });
        }
    }

    // Phase C: backfill, using whatever is left of the Phase A idle pool.
    // Only possible once Phase B has established a horizon (`tp`).
    if let Some(decision) = &drain_decision {
        let tp = decision.until;

        for job in jobs {
            if placements.contains_key(&job.jobid) {
                continue;
            }
            if drain_target.is_some_and(|d| d.jobid == job.jobid) {
                continue;
            }
            if job_already_in_cleanup(reservations, job) || job.nodecount > class_size {
                continue;
            }

            let fits_horizon = job.walltime_seconds() <= tp - now;
            if !fits_horizon {
                continue;
            }

            if idle.len() >= job.nodecount {
                if let Some(chosen) = allocate(&idle, job.nodecount) {
                    apply_temporary_reservation(resources, &chosen, job, now + temp_reservation_seconds);
                    idle.retain(|n| !chosen.contains(n));
                    placements.insert(job.jobid.clone(), chosen);
                    break;
                }
            }
        }
    }

    PlacementOutcome { placements, drain: drain_decision }
}

fn job_already_in_cleanup(reservations: &ReservationTable, job: &Job) -> bool {
    reservations.get(&job.jobid).is_some_and(|r| !r.is_dead())
}

fn placed_anywhere(placements: &HashMap<JobId, Vec<NodeName>>, node: &NodeName) -> bool {
    placements.values().any(|nodes| nodes.contains(node))
}

/// Built-in first-fit: takes the first `n` nodes off the (already sorted)
/// candidate list. Stands in for a bridge-delegated allocator (§4.5);
/// callers that want the vendor placement service to pick the final set
/// make that substitution at the reservation-controller boundary instead.
fn allocate(candidates: &[NodeName], n: usize) -> Option<Vec<NodeName>> {
    if candidates.len() < n {
        return None;
    }
    Some(candidates[..n].to_vec())
}

fn apply_temporary_reservation(resources: &mut ResourceSet, nodes: &[NodeName], job: &Job, until: i64) {
    for node in nodes {
        let Some(resource) = resources.get_by_name_mut(node) else {
            log::warn!("placement chose unknown node {:?} for job {:?}", node, job.jobid);
            continue;
        };

        if let Err(err) = resource.reserve(until, &job.user, &job.jobid) {
            log::warn!("failed to install temporary reservation on {:?} for job {:?}: {}", node, job.jobid, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{NodeId, Queue, User};
    use crate::domain::resource::{Resource, ResourceStatus};

    fn fleet(names: &[&str]) -> ResourceSet {
        let mut set = ResourceSet::new();
        for (i, name) in names.iter().enumerate() {
            set.add(Resource::new(NodeName::new(*name), NodeId(i as i64), true));
        }
        set
    }

    fn mark_busy(resources: &mut ResourceSet, name: &str) {
        resources.get_by_name_mut(&NodeName::new(name)).unwrap().set_status(ResourceStatus::Busy).unwrap();
    }

    fn job(id: &str, nodecount: usize, walltime_minutes: i64, score: i64) -> Job {
        Job::new(JobId::new(id), User::new("testuser"), Queue::new("default"), nodecount, walltime_minutes, score)
    }

    fn names(v: &[&str]) -> Vec<NodeName> {
        v.iter().map(|s| NodeName::new(*s)).collect()
    }

    #[test]
    fn s1_single_job_clean_fleet_gets_immediate_placement() {
        let mut resources = fleet(&["vs1", "vs2", "vs3", "vs4"]);
        let class_nodes = names(&["vs1", "vs2", "vs3", "vs4"]);
        let jobs = vec![job("1", 4, 10, 100)];
        let reservations = ReservationTable::new();

        let outcome = find_job_location(&class_nodes, &jobs, &[], &[], &mut resources, &reservations, 0, 300);

        let placed = outcome.placements.get(&JobId::new("1")).expect("job should be placed");
        assert_eq!(placed.len(), 4);
        assert!(outcome.drain.is_none());

        for n in &class_nodes {
            assert!(resources.get_by_name(n).unwrap().is_reserved());
        }
    }

    #[test]
    fn s2_all_down_class_is_empty_and_never_drains() {
        let mut resources = fleet(&["vs1", "vs2", "vs3", "vs4"]);
        for n in ["vs1", "vs2", "vs3", "vs4"] {
            resources.get_by_name_mut(&NodeName::new(n)).unwrap().admin_set_status(ResourceStatus::Down);
        }
        // An all-down class reduces to an empty node set from the
        // equivalence-class builder's perspective; the engine is handed
        // that empty slice directly.
        let class_nodes: Vec<NodeName> = Vec::new();
        let jobs = vec![job("1", 4, 10, 100)];
        let reservations = ReservationTable::new();

        let outcome = find_job_location(&class_nodes, &jobs, &[], &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.is_empty());
        assert!(outcome.drain.is_none());
    }

    #[test]
    fn s3_drain_for_head_marks_nodes_when_insufficient_idle() {
        let mut resources = fleet(&["vs1", "vs2", "vs3", "vs4"]);
        mark_busy(&mut resources, "vs1");
        let class_nodes = names(&["vs1", "vs2", "vs3", "vs4"]);
        let jobs = vec![job("x", 4, 10, 100)];
        let reservations = ReservationTable::new();

        let end_times = vec![(names(&["vs1"]), 600)];
        let outcome = find_job_location(&class_nodes, &jobs, &end_times, &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.is_empty());
        let decision = outcome.drain.expect("should compute a drain target");
        assert_eq!(decision.until, 600);
        assert_eq!(decision.jobid, JobId::new("x"));

        for n in ["vs1", "vs2", "vs3", "vs4"] {
            assert_eq!(resources.get_by_name(&NodeName::new(n)).unwrap().drain_until(), Some(600));
        }
    }

    #[test]
    fn s4_backfill_preserves_score_order_among_eligible_jobs() {
        let mut resources = fleet(&["vs1", "vs2"]);
        mark_busy(&mut resources, "vs1");
        let class_nodes = names(&["vs1", "vs2"]);

        let jobs = vec![job("high", 2, 12, 300), job("mid", 1, 1, 200), job("low", 1, 1, 100)];
        let reservations = ReservationTable::new();
        let end_times = vec![(names(&["vs1"]), 720)];

        let outcome = find_job_location(&class_nodes, &jobs, &end_times, &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.get(&JobId::new("high")).is_none());
        assert_eq!(outcome.placements.get(&JobId::new("mid")).map(|v| v.len()), Some(1));
        assert!(outcome.placements.get(&JobId::new("low")).is_none());
    }

    #[test]
    fn s5_backfill_rejected_when_walltime_exceeds_horizon() {
        let mut resources = fleet(&["vs1", "vs2"]);
        mark_busy(&mut resources, "vs1");
        let class_nodes = names(&["vs1", "vs2"]);

        let jobs = vec![job("big", 2, 10, 300), job("candidate", 1, 15, 200)];
        let reservations = ReservationTable::new();
        let end_times = vec![(names(&["vs1"]), 400)];

        let outcome = find_job_location(&class_nodes, &jobs, &end_times, &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.is_empty());
    }

    #[test]
    fn oversized_job_is_rejected_without_consuming_the_drain_slot() {
        let mut resources = fleet(&["vs1", "vs2"]);
        mark_busy(&mut resources, "vs1");
        let class_nodes = names(&["vs1", "vs2"]);

        let jobs = vec![job("oversized", 5, 10, 300), job("fits", 1, 10, 200)];
        let reservations = ReservationTable::new();

        let outcome = find_job_location(&class_nodes, &jobs, &[(names(&["vs1"]), 500)], &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.get(&JobId::new("oversized")).is_none());
        assert_eq!(outcome.placements.get(&JobId::new("fits")).map(|v| v.len()), Some(1));
        assert!(outcome.drain.is_none());
    }

    #[test]
    fn job_already_holding_a_reservation_is_skipped_not_retried() {
        let mut resources = fleet(&["vs1"]);
        let class_nodes = names(&["vs1"]);
        let jobs = vec![job("1", 1, 10, 100)];

        let mut reservations = ReservationTable::new();
        reservations.insert(crate::domain::reservation::Reservation::new_unconfirmed("alloc-1", JobId::new("1"), vec![NodeName::new("vs1")], 1000));

        let outcome = find_job_location(&class_nodes, &jobs, &[], &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.is_empty());
        assert!(outcome.drain.is_none());
    }

    #[test]
    fn node_blocked_by_a_busy_neighbor_is_not_treated_as_idle() {
        let mut resources = fleet(&["parent", "child"]);
        resources.get_by_id_mut(NodeId(0)).unwrap().children.insert(NodeId(1));
        resources.get_by_id_mut(NodeId(1)).unwrap().parents.insert(NodeId(0));
        mark_busy(&mut resources, "parent");

        let class_nodes = names(&["child"]);
        let jobs = vec![job("1", 1, 10, 100)];
        let reservations = ReservationTable::new();

        let outcome = find_job_location(&class_nodes, &jobs, &[], &[], &mut resources, &reservations, 0, 300);

        assert!(outcome.placements.is_empty());
    }
}
