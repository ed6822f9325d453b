//! `reserve_resources_until` (§4.6) and the bridge-facing half of the
//! reservation lifecycle: turning a placement into an unconfirmed
//! [`Reservation`], extending it before its bridge-side deadline, and
//! tearing it down once the process group it backs has exited.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::domain::ids::{JobId, NodeName, User};
use crate::domain::reservation::{Reservation, ReservationTable};
use crate::domain::resource_set::ResourceSet;
use crate::error::{Error, Result};

/// Pure fleet-lock mutation behind `reserve_resources_until` (§4.6): no
/// bridge I/O, so it can be called while already holding the exclusive
/// fleet lock.
///
/// `new_time = Some(t)` extends (or installs) a hold on every node in
/// `nodes` until `t`, returning `true` iff every node succeeded.
/// `new_time = None` releases the hold on every node, marking it
/// cleanup-pending; unreserved nodes are ignored, not errors.
pub fn reserve_resources_until(resources: &mut ResourceSet, nodes: &[NodeName], new_time: Option<i64>, user: &User, jobid: &JobId) -> bool {
    match new_time {
        Some(until) => {
            let mut all_ok = true;

            for node in nodes {
                match resources.get_by_name_mut(node) {
                    Some(resource) => {
                        if let Err(err) = resource.reserve(until, user, jobid) {
                            log::warn!("reserve_resources_until: {:?} failed for job {:?}: {}", node, jobid, err);
                            all_ok = false;
                        }
                    }
                    None => {
                        log::warn!("reserve_resources_until: unknown node {:?} for job {:?}", node, jobid);
                        all_ok = false;
                    }
                }
            }

            all_ok
        }
        None => {
            for node in nodes {
                match resources.get_by_name_mut(node) {
                    Some(resource) => {
                        resource.release(user, jobid, false);
                    }
                    None => log::info!("reserve_resources_until: release on unknown node {:?}; ignoring", node),
                }
            }

            true
        }
    }
}

/// Forces the hold on every node in `nodes` to clear for a reservation
/// the refresh loop has just declared dead (missed extension, or the
/// bridge no longer reports it). The reservation doesn't track which user
/// it was placed under, so ownership is bypassed (`force = true`) rather
/// than risk a mismatched-owner no-op leaving the node permanently held.
pub(crate) fn release_dead_holds(resources: &mut ResourceSet, jobid: &JobId, nodes: &[NodeName]) {
    for node in nodes {
        match resources.get_by_name_mut(node) {
            Some(resource) => {
                let owner = resource.hold().map(|h| h.owner_user.clone()).unwrap_or_else(|| User::new("unknown"));
                resource.release(&owner, jobid, true);
            }
            None => log::info!("release_dead_holds: unknown node {:?} for dead reservation of job {:?}; ignoring", node, jobid),
        }
    }
}

/// Drives the bridge-mirrored half of a reservation's lifecycle. Holds
/// only a bridge handle; all state it touches is passed in by the caller
/// under the exclusive fleet lock, so this type itself needs no lock of
/// its own.
pub struct ReservationController<B: Bridge + ?Sized> {
    bridge: Arc<B>,
}

impl<B: Bridge + ?Sized> ReservationController<B> {
    pub fn new(bridge: Arc<B>) -> Self {
        Self { bridge }
    }

    /// Asks the bridge to place `jobid` on `nodecount` nodes, and if it
    /// succeeds records the result as a fresh unconfirmed [`Reservation`]
    /// expiring at `now + temp_reservation_seconds`. Returns the placed
    /// node names, or `None` if the bridge declined.
    pub async fn place(
        &self,
        resources: &ResourceSet,
        table: &mut ReservationTable,
        user: &User,
        jobid: &JobId,
        nodecount: usize,
        attrs: &HashMap<String, String>,
        now: i64,
        temp_reservation_seconds: i64,
    ) -> Result<Option<Vec<NodeName>>> {
        let spec = self.bridge.reserve(user, jobid, nodecount, attrs).await.map_err(|e| Error::BridgeUnavailable(e.to_string()))?;

        let Some(spec) = spec else {
            return Ok(None);
        };

        let nodes: Vec<NodeName> = spec.node_ids.iter().filter_map(|id| resources.name_for_id(*id).cloned()).collect();

        if nodes.len() != spec.node_ids.len() {
            log::warn!("bridge reservation {} named nodes this core doesn't recognize; proceeding with the known subset", spec.reservation_id);
        }

        let reservation = Reservation::new_unconfirmed(spec.reservation_id, jobid.clone(), nodes.clone(), now + temp_reservation_seconds);
        table.insert(reservation);

        Ok(Some(nodes))
    }

    /// Called by the state-refresh loop each tick (§4.7): dead-letters any
    /// unconfirmed reservation that missed its extension deadline — releasing
    /// its nodes' holds in the same step, per §4.6's "otherwise it is
    /// considered dead and the local hold is released" — and pushes the
    /// deadline forward for everything still alive.
    pub fn extend_unconfirmed(&self, resources: &mut ResourceSet, table: &mut ReservationTable, now: i64, extension_seconds: i64) {
        let expired: Vec<JobId> = table.values().filter(|r| r.has_missed_extension(now)).map(|r| r.jobid.clone()).collect();

        for jobid in expired {
            if let Some(reservation) = table.get_mut(&jobid) {
                log::warn!("reservation for job {:?} missed its extension deadline; marking dead", jobid);
                release_dead_holds(resources, &jobid, &reservation.nodes);
                reservation.mark_dead();
            }
        }

        for reservation in table.values_mut() {
            if matches!(reservation.state, crate::domain::reservation::ReservationState::Unconfirmed) {
                reservation.extend(now + extension_seconds);
            }
        }
    }

    /// Tears a confirmed (or still-unconfirmed) reservation down: releases
    /// the local holds, then tells the bridge to release its side. The
    /// record is marked dead only once the bridge confirms zero residual
    /// claims, matching the `releasing -> dead` transition in §4.7.
    pub async fn release(&self, resources: &mut ResourceSet, table: &mut ReservationTable, jobid: &JobId, user: &User) -> Result<()> {
        let Some(reservation) = table.get_mut(jobid) else {
            return Ok(());
        };

        reservation.mark_releasing();
        let nodes = reservation.nodes.clone();
        let allocation_id = reservation.allocation_id.clone();

        reserve_resources_until(resources, &nodes, None, user, jobid);

        let result = self.bridge.release(&allocation_id).await.map_err(|e| Error::BridgeUnavailable(e.to_string()))?;

        if result.claims == 0 {
            if let Some(reservation) = table.get_mut(jobid) {
                reservation.mark_dead();
            }
        } else {
            log::info!("bridge reports {} residual claim(s) on {:?} after release", result.claims, allocation_id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::memory::{node_spec, MemoryBridge};
    use crate::domain::ids::{JobId, NodeId, Queue, User};
    use crate::domain::reservation::ReservationState;
    use crate::domain::resource::Resource;

    fn fleet(names: &[&str]) -> ResourceSet {
        let mut set = ResourceSet::new();
        for (i, name) in names.iter().enumerate() {
            set.add(Resource::new(NodeName::new(*name), NodeId(i as i64), true));
        }
        set
    }

    #[test]
    fn s6_extension_idempotence_single_hold_no_duplicate() {
        let mut resources = fleet(&["vs1"]);
        let user = User::new("u");
        let jobid = JobId::new("1");
        let nodes = vec![NodeName::new("vs1")];

        assert!(reserve_resources_until(&mut resources, &nodes, Some(1000), &user, &jobid));
        assert!(reserve_resources_until(&mut resources, &nodes, Some(1060), &user, &jobid));

        let hold = resources.get_by_name(&NodeName::new("vs1")).unwrap().hold().unwrap();
        assert_eq!(hold.until, 1060);
        assert_eq!(hold.owner_jobid, jobid);
    }

    #[test]
    fn release_clears_hold_and_marks_cleanup_pending() {
        let mut resources = fleet(&["vs1"]);
        let user = User::new("u");
        let jobid = JobId::new("1");
        let nodes = vec![NodeName::new("vs1")];

        reserve_resources_until(&mut resources, &nodes, Some(1000), &user, &jobid);
        reserve_resources_until(&mut resources, &nodes, None, &user, &jobid);

        let resource = resources.get_by_name(&NodeName::new("vs1")).unwrap();
        assert!(!resource.is_reserved());
        assert_eq!(resource.status(), crate::domain::resource::ResourceStatus::CleanupPending);
    }

    #[tokio::test]
    async fn place_records_unconfirmed_reservation_on_bridge_success() {
        let mut resources = fleet(&["vs1"]);
        let bridge = Arc::new(MemoryBridge::new(vec![node_spec("vs1", 0, "idle", &["default"])]));
        let controller = ReservationController::new(bridge);
        let mut table = ReservationTable::new();

        let placed = controller
            .place(&resources, &mut table, &User::new("u"), &JobId::new("1"), 1, &HashMap::new(), 0, 300)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(placed, vec![NodeName::new("vs1")]);
        let reservation = table.get(&JobId::new("1")).unwrap();
        assert_eq!(reservation.state, ReservationState::Unconfirmed);
    }

    #[test]
    fn extend_unconfirmed_dead_letters_missed_deadlines_and_releases_the_hold() {
        let mut resources = fleet(&["vs1"]);
        resources.get_by_name_mut(&NodeName::new("vs1")).unwrap().reserve(100, &User::new("u"), &JobId::new("1")).unwrap();

        let mut table = ReservationTable::new();
        table.insert(Reservation::new_unconfirmed("a", JobId::new("1"), vec![NodeName::new("vs1")], 100));

        let bridge = Arc::new(MemoryBridge::new(vec![]));
        let controller = ReservationController::new(bridge);
        controller.extend_unconfirmed(&mut resources, &mut table, 200, 300);

        assert!(table.get(&JobId::new("1")).unwrap().is_dead());

        let resource = resources.get_by_name(&NodeName::new("vs1")).unwrap();
        assert!(!resource.is_reserved());
        assert_eq!(resource.status(), crate::domain::resource::ResourceStatus::CleanupPending);
    }

    #[test]
    fn extend_unconfirmed_pushes_deadline_forward_when_still_alive() {
        let mut resources = fleet(&["vs1"]);
        let mut table = ReservationTable::new();
        table.insert(Reservation::new_unconfirmed("a", JobId::new("1"), vec![], 1000));

        let bridge = Arc::new(MemoryBridge::new(vec![]));
        let controller = ReservationController::new(bridge);
        controller.extend_unconfirmed(&mut resources, &mut table, 0, 300);

        assert_eq!(table.get(&JobId::new("1")).unwrap().expiration, 300);
    }
}
