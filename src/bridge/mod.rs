//! The external placement service: a site-specific vendor bridge this core
//! consults but never bypasses — no hardware is ever picked without going
//! through a [`Bridge`] implementation.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::ids::{JobId, NodeId, NodeName, User};

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: NodeName,
    pub node_id: NodeId,
    pub state: String,
    pub queues: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResSpec {
    pub reservation_id: String,
    pub batch_id: JobId,
    pub node_ids: Vec<NodeId>,
    pub user_name: String,
    pub account_name: Option<String>,
    pub application_array: Vec<String>,
    pub pagg_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub nodes: Vec<NodeSpec>,
    pub reservations: Vec<ResSpec>,
}

#[derive(Debug, Clone)]
pub struct ReleaseResult {
    pub claims: i64,
}

/// Transport-agnostic boundary around the vendor placement service.
/// A bridge-wide failure must never propagate as a panic or an unhandled
/// error out of the placement/refresh paths — callers treat `Err` as
/// `BridgeUnavailable` and degrade gracefully.
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn fetch_inventory(&self, resinfo: bool) -> anyhow::Result<Inventory>;

    async fn reserve(&self, user: &User, jobid: &JobId, nodecount: usize, attrs: &HashMap<String, String>) -> anyhow::Result<Option<ResSpec>>;

    async fn release(&self, reservation_id: &str) -> anyhow::Result<ReleaseResult>;
}
