//! The scheduler facade (§4.8): the only surface an RPC layer (out of
//! scope for this crate) would wire up. Every operation here is stateless
//! beyond its own fleet-lock acquisition — no facade method stashes
//! request-scoped state anywhere but the shared [`Fleet`] and the
//! [`ProcessGroupManager`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::domain::equivalence_class::{find_queue_equivalence_classes, EquivalenceClass};
use crate::domain::ids::{AdminReservationName, JobId, NodeName, Queue, User};
use crate::domain::job::{score_order, Job};
use crate::domain::placement;
use crate::domain::process_group::{ProcessGroupManager, ProcessGroupRecord};
use crate::domain::reservation::Reservation;
use crate::domain::reservation_controller::{self, ReservationController};
use crate::domain::resource::Resource;
use crate::error::{Error, Result};
use crate::fleet::Fleet;
use crate::refresh_loop;

/// Ties the fleet, the bridge, the reservation controller, and the
/// process-group manager together behind the operations in §6.2.
pub struct Scheduler<B: Bridge + ?Sized> {
    fleet: Fleet,
    bridge: Arc<B>,
    controller: ReservationController<B>,
    process_groups: ProcessGroupManager,
    config: Config,
}

impl<B: Bridge + ?Sized> Scheduler<B> {
    pub fn new(fleet: Fleet, bridge: Arc<B>, config: Config) -> Self {
        let controller = ReservationController::new(bridge.clone());
        Self { fleet, bridge, controller, process_groups: ProcessGroupManager::new(), config }
    }

    /// Spawns the background refresh loop against this scheduler's fleet
    /// and bridge, returning a handle the caller can use to force an
    /// out-of-band refresh or shut the loop down.
    pub fn spawn_refresh_loop(&self) -> refresh_loop::RefreshHandle
    where
        B: 'static,
    {
        refresh_loop::spawn(self.fleet.clone(), self.bridge.clone(), self.config.update_thread_timeout, self.config.temp_reservation_time)
    }

    /// `get_nodes`: the full node set, or just `node_ids` when given.
    pub async fn get_nodes(&self, node_ids: Option<&[NodeName]>) -> Vec<Resource> {
        let state = self.fleet.lock().await;
        match node_ids {
            None => state.resources.iter().cloned().collect(),
            Some(ids) => ids.iter().filter_map(|n| state.resources.get_by_name(n)).cloned().collect(),
        }
    }

    /// `find_queue_equivalence_classes`: partitions `active_queues`,
    /// caching the result on the fleet so a same-tick `find_job_location`
    /// call can resolve the node universe for the jobs it's handed.
    pub async fn find_queue_equivalence_classes(
        &self,
        active_queues: &HashSet<Queue>,
        admin_reservations: &HashMap<AdminReservationName, Vec<NodeName>>,
    ) -> Vec<EquivalenceClass> {
        let mut state = self.fleet.lock().await;
        let classes = find_queue_equivalence_classes(&state.resources, active_queues, admin_reservations);
        state.equivalence_classes = classes.clone();
        classes
    }

    /// `find_job_location`: `jobs` must already be scoped to one
    /// equivalence class (§4.5), the caller having obtained that scoping
    /// from a prior `find_queue_equivalence_classes` call. Rejects
    /// duplicate jobids with `DataCreation` before the placement engine
    /// ever sees them (§4.5 tie-break invariant; §7).
    pub async fn find_job_location(
        &self,
        jobs: Vec<Job>,
        end_times: Vec<(Vec<NodeName>, i64)>,
        blocking: Vec<NodeName>,
    ) -> Result<HashMap<JobId, Vec<NodeName>>> {
        reject_duplicate_jobids(&jobs)?;

        let mut jobs = jobs;
        score_order(&mut jobs);

        let mut state = self.fleet.lock().await;

        let job_queues: HashSet<Queue> = jobs.iter().map(|j| j.queue.clone()).collect();
        let class_nodes = class_nodes_for(&state.equivalence_classes, &job_queues)
            .unwrap_or_else(|| state.resources.managed_names());

        let now = now_epoch();
        let outcome = placement::find_job_location(
            &class_nodes,
            &jobs,
            &end_times,
            &blocking,
            &mut state.resources,
            &state.reservations,
            now,
            self.config.temp_reservation_time,
        );

        for (jobid, nodes) in &outcome.placements {
            let allocation_id = format!("local-{}", jobid);
            state.reservations.insert(Reservation::new_unconfirmed(allocation_id, jobid.clone(), nodes.clone(), now + self.config.temp_reservation_time));
        }

        Ok(outcome.placements)
    }

    /// `reserve_resources_until`: places, extends, or releases holds on
    /// `nodes` for `jobid` (§4.6). Pure fleet-lock mutation; no bridge call
    /// (the bridge-side mirroring lives in [`ReservationController`] and is
    /// driven from the refresh loop and process-group confirmation path).
    pub async fn reserve_resources_until(&self, nodes: &[NodeName], new_time: Option<i64>, user: &User, jobid: &JobId) -> bool {
        let mut state = self.fleet.lock().await;
        reservation_controller::reserve_resources_until(&mut state.resources, nodes, new_time, user, jobid)
    }

    /// `update_node_state`: runs one refresh cycle synchronously, for
    /// callers (or tests) that want an on-demand refresh rather than
    /// waiting on the background loop's ticker.
    pub async fn update_node_state(&self) -> Result<()> {
        refresh_loop::run_once(&self.fleet, self.bridge.as_ref(), &self.controller, self.config.temp_reservation_time)
            .await
            .map_err(|e| Error::BridgeUnavailable(e.to_string()))
    }

    /// `add_process_groups`: creates a `Starting` record per (jobid, node
    /// list) pair and returns the generated ids in the same order.
    pub fn add_process_groups(&self, specs: Vec<(JobId, Vec<NodeName>)>) -> Vec<crate::domain::ids::ProcessGroupId> {
        specs.into_iter().map(|(jobid, nodes)| self.process_groups.add_process_group(jobid, nodes)).collect()
    }

    pub fn get_process_groups(&self, jobid: Option<&JobId>) -> Vec<ProcessGroupRecord> {
        self.process_groups.get_process_groups(jobid)
    }

    pub async fn wait_process_groups(&self, ids: &[crate::domain::ids::ProcessGroupId]) {
        self.process_groups.wait_process_groups(ids).await
    }

    pub fn signal_process_groups(&self, ids: &[crate::domain::ids::ProcessGroupId], signal: impl Into<String>) -> usize {
        self.process_groups.signal_process_groups(ids, signal)
    }

    /// Bridges the forker's process-group confirmation callback (§4.9)
    /// into the matching `Reservation`'s `confirm` transition (§4.7),
    /// upholding testable property 2: `confirmed ⇒ process_group_handle
    /// is Some`.
    pub async fn confirm_process_group(&self, jobid: &JobId, id: &crate::domain::ids::ProcessGroupId, pgid: impl Into<String>) -> bool {
        if !self.process_groups.confirm(id, pgid) {
            return false;
        }

        let mut state = self.fleet.lock().await;
        match state.reservations.get_mut(jobid) {
            Some(reservation) => {
                reservation.confirm(id.clone());
                true
            }
            None => {
                log::warn!("process group {:?} confirmed but job {:?} has no tracked reservation", id, jobid);
                false
            }
        }
    }

    /// Tears down a job's reservation: releases local holds and mirrors
    /// the release to the bridge (§4.6).
    pub async fn release_job(&self, jobid: &JobId, user: &User) -> Result<()> {
        let mut state = self.fleet.lock().await;
        let crate::fleet::FleetState { resources, reservations, .. } = &mut *state;
        self.controller.release(resources, reservations, jobid, user).await
    }
}

fn reject_duplicate_jobids(jobs: &[Job]) -> Result<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        if !seen.insert(job.jobid.clone()) {
            return Err(Error::DataCreation(format!("duplicate jobid {:?} in a single find_job_location call", job.jobid)));
        }
    }
    Ok(())
}

fn class_nodes_for(classes: &[EquivalenceClass], job_queues: &HashSet<Queue>) -> Option<Vec<NodeName>> {
    if classes.is_empty() {
        return None;
    }

    let mut nodes: Vec<NodeName> = classes
        .iter()
        .filter(|c| c.queues.iter().any(|q| job_queues.contains(q)))
        .flat_map(|c| c.nodes.iter().cloned())
        .collect();

    if nodes.is_empty() {
        return None;
    }

    nodes.sort();
    nodes.dedup();
    Some(nodes)
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::memory::{node_spec, MemoryBridge};
    use crate::domain::ids::NodeId;
    use crate::domain::resource::Resource as DomainResource;
    use crate::domain::resource_set::ResourceSet;

    fn scheduler_with(names: &[&str]) -> Scheduler<MemoryBridge> {
        let mut set = ResourceSet::new();
        for (i, name) in names.iter().enumerate() {
            let mut r = DomainResource::new(NodeName::new(*name), NodeId(i as i64), true);
            r.queues.insert(Queue::new("default"));
            set.add(r);
        }
        let fleet = Fleet::new(set);
        let bridge = Arc::new(MemoryBridge::new(vec![]));
        Scheduler::new(fleet, bridge, Config::default())
    }

    fn job(id: &str, nodecount: usize, score: i64) -> Job {
        Job::new(JobId::new(id), User::new("testuser"), Queue::new("default"), nodecount, 10, score)
    }

    #[tokio::test]
    async fn find_job_location_falls_back_to_whole_fleet_without_cached_classes() {
        let scheduler = scheduler_with(&["vs1", "vs2", "vs3", "vs4"]);

        let placements = scheduler.find_job_location(vec![job("1", 4, 100)], vec![], vec![]).await.unwrap();

        assert_eq!(placements.get(&JobId::new("1")).map(|v| v.len()), Some(4));
    }

    #[tokio::test]
    async fn find_job_location_uses_cached_equivalence_class_scoping() {
        let scheduler = scheduler_with(&["vs1", "vs2"]);
        let active = HashSet::from([Queue::new("default")]);
        scheduler.find_queue_equivalence_classes(&active, &HashMap::new()).await;

        let placements = scheduler.find_job_location(vec![job("1", 2, 100)], vec![], vec![]).await.unwrap();
        assert_eq!(placements.get(&JobId::new("1")).map(|v| v.len()), Some(2));
    }

    #[tokio::test]
    async fn duplicate_jobid_is_rejected_before_placement_runs() {
        let scheduler = scheduler_with(&["vs1"]);
        let err = scheduler.find_job_location(vec![job("1", 1, 100), job("1", 1, 50)], vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, Error::DataCreation(_)));
    }

    #[tokio::test]
    async fn placement_leaves_an_unconfirmed_reservation_for_the_job() {
        let scheduler = scheduler_with(&["vs1"]);
        scheduler.find_job_location(vec![job("1", 1, 100)], vec![], vec![]).await.unwrap();

        let state = scheduler.fleet.lock().await;
        let reservation = state.reservations.get(&JobId::new("1")).expect("reservation should be tracked");
        assert_eq!(reservation.state, crate::domain::reservation::ReservationState::Unconfirmed);
    }

    #[tokio::test]
    async fn confirm_process_group_marks_matching_reservation_confirmed() {
        let scheduler = scheduler_with(&["vs1"]);
        scheduler.find_job_location(vec![job("1", 1, 100)], vec![], vec![]).await.unwrap();

        let id = scheduler.add_process_groups(vec![(JobId::new("1"), vec![NodeName::new("vs1")])]).remove(0);
        assert!(scheduler.confirm_process_group(&JobId::new("1"), &id, "999").await);

        let state = scheduler.fleet.lock().await;
        let reservation = state.reservations.get(&JobId::new("1")).unwrap();
        assert_eq!(reservation.state, crate::domain::reservation::ReservationState::Confirmed);
        assert_eq!(reservation.process_group_handle, Some(id));
    }

    #[tokio::test]
    async fn get_nodes_filters_by_requested_ids() {
        let scheduler = scheduler_with(&["vs1", "vs2"]);
        let nodes = scheduler.get_nodes(Some(&[NodeName::new("vs1")])).await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, NodeName::new("vs1"));
    }

    #[tokio::test]
    async fn update_node_state_runs_a_refresh_cycle_on_demand() {
        let mut set = ResourceSet::new();
        set.add(DomainResource::new(NodeName::new("vs1"), NodeId(0), true));
        let fleet = Fleet::new(set);
        let bridge = Arc::new(MemoryBridge::new(vec![node_spec("vs1", 0, "down", &["default"])]));
        let scheduler = Scheduler::new(fleet, bridge, Config::default());

        scheduler.update_node_state().await.unwrap();

        let nodes = scheduler.get_nodes(None).await;
        assert_eq!(nodes[0].status(), crate::domain::resource::ResourceStatus::Down);
    }
}
