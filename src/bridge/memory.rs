use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::bridge::{Bridge, Inventory, NodeSpec, ReleaseResult, ResSpec};
use crate::domain::ids::{JobId, NodeId, NodeName, User};

/// Deterministic in-memory bridge used under `simulation_mode` and in
/// tests, standing in for the vendor placement service. Mirrors the shape
/// of the mock simulators used elsewhere in this family of crates, but
/// speaks the `Bridge` trait instead of a wall-clock facade.
pub struct MemoryBridge {
    state: Mutex<MemoryBridgeState>,
}

struct MemoryBridgeState {
    nodes: Vec<NodeSpec>,
    reservations: HashMap<String, ResSpec>,
    next_reservation_id: u64,
    fail_next_reserve: bool,
}

impl MemoryBridge {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self { state: Mutex::new(MemoryBridgeState { nodes, reservations: HashMap::new(), next_reservation_id: 0, fail_next_reserve: false }) }
    }

    /// Test hook: makes the next `reserve` call return `Ok(None)`,
    /// simulating a bridge-side placement rejection.
    pub fn fail_next_reserve(&self) {
        self.state.lock().unwrap().fail_next_reserve = true;
    }
}

#[async_trait]
impl Bridge for MemoryBridge {
    async fn fetch_inventory(&self, _resinfo: bool) -> anyhow::Result<Inventory> {
        let state = self.state.lock().unwrap();
        Ok(Inventory { nodes: state.nodes.clone(), reservations: state.reservations.values().cloned().collect() })
    }

    async fn reserve(&self, user: &User, jobid: &JobId, nodecount: usize, _attrs: &HashMap<String, String>) -> anyhow::Result<Option<ResSpec>> {
        let mut state = self.state.lock().unwrap();

        if state.fail_next_reserve {
            state.fail_next_reserve = false;
            return Ok(None);
        }

        let candidate_ids: Vec<NodeId> = state.nodes.iter().filter(|n| n.state == "idle").take(nodecount).map(|n| n.node_id).collect();

        if candidate_ids.len() < nodecount {
            return Ok(None);
        }

        state.next_reservation_id += 1;
        let reservation_id = format!("mem-res-{}", state.next_reservation_id);

        let spec = ResSpec {
            reservation_id: reservation_id.clone(),
            batch_id: jobid.clone(),
            node_ids: candidate_ids,
            user_name: user.as_str().to_string(),
            account_name: None,
            application_array: Vec::new(),
            pagg_id: None,
        };

        state.reservations.insert(reservation_id, spec.clone());
        Ok(Some(spec))
    }

    async fn release(&self, reservation_id: &str) -> anyhow::Result<ReleaseResult> {
        let mut state = self.state.lock().unwrap();
        state.reservations.remove(reservation_id);
        Ok(ReleaseResult { claims: 0 })
    }
}

#[allow(dead_code)]
pub fn node_spec(name: &str, id: i64, state: &str, queues: &[&str]) -> NodeSpec {
    NodeSpec { name: NodeName::new(name), node_id: NodeId(id), state: state.to_string(), queues: queues.iter().map(|q| q.to_string()).collect() }
}
