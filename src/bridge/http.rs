use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::bridge::{Bridge, Inventory, NodeSpec, ReleaseResult, ResSpec};
use crate::domain::ids::{JobId, NodeId, NodeName, User};

/// Production bridge implementation: talks to the vendor placement service
/// over HTTP/JSON, following the same `reqwest::Client` + bearer-token
/// header pattern used for the other RMS-facing bridges in this codebase.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct InventoryResponseNode {
    name: String,
    node_id: i64,
    state: String,
    #[serde(default)]
    queues: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryResponseReservation {
    reservation_id: String,
    batch_id: String,
    node_ids: Vec<i64>,
    user_name: String,
    account_name: Option<String>,
    #[serde(default, rename = "ApplicationArray")]
    application_array: Vec<String>,
    pagg_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryResponse {
    nodes: Vec<InventoryResponseNode>,
    reservations: Vec<InventoryResponseReservation>,
}

impl HttpBridge {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: Client::new() }
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    async fn fetch_inventory(&self, resinfo: bool) -> anyhow::Result<Inventory> {
        let url = format!("{}/inventory?resinfo={}", self.base_url, resinfo);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let parsed: InventoryResponse = response.json().await?;

        let nodes = parsed
            .nodes
            .into_iter()
            .map(|n| NodeSpec { name: NodeName::new(n.name), node_id: NodeId(n.node_id), state: n.state, queues: n.queues })
            .collect();

        let reservations = parsed
            .reservations
            .into_iter()
            .map(|r| ResSpec {
                reservation_id: r.reservation_id,
                batch_id: JobId::new(r.batch_id),
                node_ids: r.node_ids.into_iter().map(NodeId).collect(),
                user_name: r.user_name,
                account_name: r.account_name,
                application_array: r.application_array,
                pagg_id: r.pagg_id,
            })
            .collect();

        Ok(Inventory { nodes, reservations })
    }

    async fn reserve(&self, user: &User, jobid: &JobId, nodecount: usize, attrs: &HashMap<String, String>) -> anyhow::Result<Option<ResSpec>> {
        let url = format!("{}/reservations", self.base_url);
        let body = serde_json::json!({
            "user_name": user.as_str(),
            "batch_id": jobid.as_str(),
            "node_count": nodecount,
            "attrs": attrs,
        });

        let response = self.client.post(&url).json(&body).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND || response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(None);
        }

        let response = response.error_for_status()?;
        let parsed: Option<InventoryResponseReservation> = response.json().await?;

        Ok(parsed.map(|r| ResSpec {
            reservation_id: r.reservation_id,
            batch_id: JobId::new(r.batch_id),
            node_ids: r.node_ids.into_iter().map(NodeId).collect(),
            user_name: r.user_name,
            account_name: r.account_name,
            application_array: r.application_array,
            pagg_id: r.pagg_id,
        }))
    }

    async fn release(&self, reservation_id: &str) -> anyhow::Result<ReleaseResult> {
        let url = format!("{}/reservations/{}", self.base_url, reservation_id);
        let response = self.client.delete(&url).send().await?.error_for_status()?;

        #[derive(Deserialize)]
        struct ReleaseResponse {
            claims: i64,
        }

        let parsed: ReleaseResponse = response.json().await?;
        Ok(ReleaseResult { claims: parsed.claims })
    }
}
