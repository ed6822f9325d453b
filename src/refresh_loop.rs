//! The state-refresh loop (§4.7): a cancellable background task that
//! periodically pulls fleet inventory from the [`Bridge`], updates
//! hardware status, and reconciles bridge-side reservations against the
//! local [`ReservationTable`] — all under the single fleet lock, with the
//! bridge RPC itself kept outside it per the snapshot-and-reconcile
//! discipline in §5.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::bridge::Bridge;
use crate::domain::reservation_controller::{self, ReservationController};
use crate::domain::resource::ResourceStatus;
use crate::fleet::Fleet;

/// Handle used to ask a running refresh loop to tick immediately, and to
/// cancel it.
#[derive(Clone)]
pub struct RefreshHandle {
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl RefreshHandle {
    /// Wakes the loop ahead of its own ticker, without waiting for the
    /// current interval to elapse.
    pub fn request_refresh(&self) {
        self.wake.notify_one();
    }

    /// Cancels the loop after its current tick (if any) completes.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Spawns the refresh loop as a Tokio task and returns a handle to it.
/// `temp_reservation_seconds` is reused as the bridge-side extension
/// window for unconfirmed reservations (§4.6).
pub fn spawn<B: Bridge + ?Sized + 'static>(
    fleet: Fleet,
    bridge: Arc<B>,
    update_thread_timeout: i64,
    temp_reservation_seconds: i64,
) -> RefreshHandle {
    let wake = Arc::new(Notify::new());
    let shutdown = Arc::new(Notify::new());
    let handle = RefreshHandle { wake: wake.clone(), shutdown: shutdown.clone() };

    let controller = ReservationController::new(bridge.clone());
    let period = Duration::from_secs(update_thread_timeout.max(1) as u64);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately; consume it here.

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wake.notified() => {}
                _ = shutdown.notified() => {
                    log::info!("refresh loop shutting down");
                    break;
                }
            }

            if let Err(err) = run_once(&fleet, bridge.as_ref(), &controller, temp_reservation_seconds).await {
                log::warn!("refresh tick failed, will retry next cycle: {}", err);
            }
        }
    });

    handle
}

/// One refresh cycle (§4.7 steps 1-3): fetch outside the lock, reconcile
/// inside it.
pub(crate) async fn run_once<B: Bridge + ?Sized>(
    fleet: &Fleet,
    bridge: &B,
    controller: &ReservationController<B>,
    temp_reservation_seconds: i64,
) -> anyhow::Result<()> {
    let inventory = bridge.fetch_inventory(true).await?;
    let now = now_epoch();

    let mut state = fleet.lock().await;

    for node_spec in &inventory.nodes {
        let canonical = node_spec.state.to_uppercase();
        let Some(resource) = state.resources.get_by_name_mut(&node_spec.name) else {
            log::error!("refresh: bridge reports node {:?} but it is not in our node list", node_spec.name);
            continue;
        };

        match parse_bridge_status(&canonical) {
            Some(ResourceStatus::Down) => resource.admin_set_status(ResourceStatus::Down),
            Some(status) => {
                if let Err(err) = resource.set_status(status) {
                    log::warn!("refresh: could not apply status {:?} to {:?}: {}", canonical, node_spec.name, err);
                }
            }
            None => log::warn!("refresh: bridge reported unrecognized state {:?} for {:?}", canonical, node_spec.name),
        }
    }

    let bridge_alloc_ids: std::collections::HashSet<&str> = inventory.reservations.iter().map(|r| r.reservation_id.as_str()).collect();

    let dead_locally: Vec<_> = state
        .reservations
        .values()
        .filter(|r| !r.is_dead() && !bridge_alloc_ids.contains(r.allocation_id.as_str()))
        .map(|r| (r.jobid.clone(), r.nodes.clone()))
        .collect();

    for (jobid, nodes) in dead_locally {
        log::warn!("refresh: local reservation for job {:?} has no matching bridge record; marking dead and releasing its holds", jobid);
        reservation_controller::release_dead_holds(&mut state.resources, &jobid, &nodes);
        if let Some(reservation) = state.reservations.get_mut(&jobid) {
            reservation.mark_dead();
        }
    }

    controller.extend_unconfirmed(&mut state.resources, &mut state.reservations, now, temp_reservation_seconds);
    state.reservations.sweep_dead();

    Ok(())
}

fn parse_bridge_status(canonical: &str) -> Option<ResourceStatus> {
    match canonical {
        "IDLE" => Some(ResourceStatus::Idle),
        "ALLOCATED" => Some(ResourceStatus::Allocated),
        "BUSY" | "RUNNING" => Some(ResourceStatus::Busy),
        "CLEANUP" => Some(ResourceStatus::Cleanup),
        "CLEANUP-PENDING" | "CLEANUP_PENDING" => Some(ResourceStatus::CleanupPending),
        "DOWN" => Some(ResourceStatus::Down),
        _ => None,
    }
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::memory::{node_spec, MemoryBridge};
    use crate::domain::ids::{NodeId, NodeName};
    use crate::domain::resource::Resource;
    use crate::domain::resource_set::ResourceSet;

    fn fleet_with(names: &[&str]) -> Fleet {
        let mut set = ResourceSet::new();
        for (i, name) in names.iter().enumerate() {
            set.add(Resource::new(NodeName::new(*name), NodeId(i as i64), true));
        }
        Fleet::new(set)
    }

    #[tokio::test]
    async fn run_once_applies_uppercased_bridge_status() {
        let fleet = fleet_with(&["vs1"]);
        let bridge = Arc::new(MemoryBridge::new(vec![node_spec("vs1", 0, "down", &["default"])]));
        let controller = ReservationController::new(bridge.clone());

        run_once(&fleet, bridge.as_ref(), &controller, 300).await.unwrap();

        let state = fleet.lock().await;
        assert_eq!(state.resources.get_by_name(&NodeName::new("vs1")).unwrap().status(), ResourceStatus::Down);
    }

    #[tokio::test]
    async fn run_once_marks_reservation_dead_when_bridge_forgets_it() {
        let fleet = fleet_with(&["vs1"]);
        let bridge = Arc::new(MemoryBridge::new(vec![node_spec("vs1", 0, "idle", &["default"])]));
        let controller = ReservationController::new(bridge.clone());

        {
            let mut state = fleet.lock().await;
            state
                .resources
                .get_by_name_mut(&NodeName::new("vs1"))
                .unwrap()
                .reserve(1_000_000_000, &crate::domain::ids::User::new("u"), &crate::domain::ids::JobId::new("1"))
                .unwrap();
            state.reservations.insert(crate::domain::reservation::Reservation::new_unconfirmed(
                "gone",
                crate::domain::ids::JobId::new("1"),
                vec![NodeName::new("vs1")],
                1_000_000_000,
            ));
        }

        run_once(&fleet, bridge.as_ref(), &controller, 300).await.unwrap();

        let state = fleet.lock().await;
        assert!(state.reservations.get(&crate::domain::ids::JobId::new("1")).is_none());

        let resource = state.resources.get_by_name(&NodeName::new("vs1")).unwrap();
        assert!(!resource.is_reserved());
        assert_eq!(resource.status(), ResourceStatus::CleanupPending);
    }
}
