//! Cluster snapshot collection.
//!
//! One snapshot joins three sources of truth: the runner registry, the node
//! inventory, and the placeholder pods driving the node autoscaler. All
//! classification happens here so the rest of the tick works on plain data.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client};
use std::collections::HashMap;

use crate::api::{AdminApi, Runner};
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::placeholder::{NODE_SELECTOR_KEY, PLACEHOLDER_POD_LABEL};

/// Everything a reconcile tick needs to know about the cluster.
///
/// `active_runners`, `deletable_runners`, and `idle_runners` partition
/// `runners`; `pending_placeholders` and `scheduled_placeholders` partition
/// the fetched placeholder pods.
#[derive(Debug, Default)]
pub struct ClusterState {
    pub runners: Vec<Runner>,
    pub active_runners: Vec<Runner>,
    pub deletable_runners: Vec<Runner>,
    pub idle_runners: Vec<Runner>,

    /// Runner domain (node IP) to runner. Empty domains are not indexed.
    pub runner_by_domain: HashMap<String, Runner>,

    pub pending_placeholders: Vec<Pod>,
    pub scheduled_placeholders: Vec<Pod>,

    pub nodes: Vec<Node>,
    /// Any address a node reports maps to that node's index in `nodes`.
    node_by_ip: HashMap<String, usize>,
    /// Names of schedulable nodes hosting a scheduled placeholder but no
    /// registered runner yet.
    pub nascent_nodes: Vec<String>,
}

impl ClusterState {
    /// Classify fetched inventory and build the join indexes.
    pub fn build(runners: Vec<Runner>, placeholders: Vec<Pod>, nodes: Vec<Node>) -> Self {
        let mut state = Self {
            runners,
            nodes,
            ..Self::default()
        };

        for runner in &state.runners {
            if !runner.domain.is_empty() {
                state
                    .runner_by_domain
                    .insert(runner.domain.clone(), runner.clone());
            }

            if runner.is_active() {
                state.active_runners.push(runner.clone());
            } else if runner.unschedulable {
                state.deletable_runners.push(runner.clone());
            } else {
                state.idle_runners.push(runner.clone());
            }
        }

        for pod in placeholders {
            if pod_node_name(&pod).is_empty() {
                state.pending_placeholders.push(pod);
            } else {
                state.scheduled_placeholders.push(pod);
            }
        }

        for (index, node) in state.nodes.iter().enumerate() {
            for address in node_addresses(node) {
                state.node_by_ip.insert(address, index);
            }
        }

        for node in &state.nodes {
            if node_is_unschedulable(node) {
                continue;
            }
            let has_runner = node_addresses(node)
                .iter()
                .any(|ip| state.runner_by_domain.contains_key(ip));
            if has_runner {
                continue;
            }
            let name = node_name(node);
            let hosts_placeholder = state
                .scheduled_placeholders
                .iter()
                .any(|pod| pod_node_name(pod) == name);
            if hosts_placeholder {
                state.nascent_nodes.push(name.to_string());
            }
        }

        state
    }

    /// Resolve a runner domain (or any node address) to its node.
    pub fn node_by_ip(&self, ip: &str) -> Option<&Node> {
        self.node_by_ip.get(ip).map(|&index| &self.nodes[index])
    }

    pub fn schedulable_node_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| !node_is_unschedulable(node))
            .count()
    }
}

/// Fetch runners, placeholder pods, and pool nodes, and classify them.
///
/// Any failed fetch aborts the tick; partial state is never published.
pub async fn snapshot(
    api: &AdminApi,
    client: &Client,
    cfg: &ManagerConfig,
) -> Result<ClusterState> {
    let runners = api.list_runners(&cfg.region_id).await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), &cfg.provider_namespace);
    let placeholders = pods
        .list(&ListParams::default().labels(&format!("app={PLACEHOLDER_POD_LABEL}")))
        .await?;

    let nodes: Api<Node> = Api::all(client.clone());
    let pool_nodes = nodes
        .list(&ListParams::default().labels(&format!("{NODE_SELECTOR_KEY}=true")))
        .await?;

    Ok(ClusterState::build(
        runners,
        placeholders.items,
        pool_nodes.items,
    ))
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

pub fn node_is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// Every address the node reports, internal and external alike.
pub fn node_addresses(node: &Node) -> Vec<String> {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .map(|addresses| {
            addresses
                .iter()
                .map(|address| address.address.clone())
                .collect()
        })
        .unwrap_or_default()
}

pub fn pod_node_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn classification_partitions_runners() {
        let runners = vec![
            Runner {
                id: "active".into(),
                current_allocated_cpu: 1.0,
                ..Runner::default()
            },
            Runner {
                id: "deletable".into(),
                unschedulable: true,
                ..Runner::default()
            },
            Runner {
                id: "idle".into(),
                ..Runner::default()
            },
            Runner {
                id: "active-unschedulable".into(),
                unschedulable: true,
                current_started_sandboxes: 2,
                ..Runner::default()
            },
        ];
        let state = ClusterState::build(runners, Vec::new(), Vec::new());

        assert_eq!(state.active_runners.len(), 2);
        assert_eq!(state.deletable_runners.len(), 1);
        assert_eq!(state.idle_runners.len(), 1);
        assert_eq!(
            state.active_runners.len() + state.deletable_runners.len() + state.idle_runners.len(),
            state.runners.len()
        );

        // Disjointness: no id shows up in two buckets.
        let mut ids: Vec<&str> = state
            .active_runners
            .iter()
            .chain(&state.deletable_runners)
            .chain(&state.idle_runners)
            .map(|r| r.id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), state.runners.len());
    }

    #[test]
    fn placeholders_split_by_scheduling() {
        let placeholders = vec![
            test_pod("pending-1", ""),
            test_pod("scheduled-1", "node-a"),
            test_pod("pending-2", ""),
        ];
        let state = ClusterState::build(Vec::new(), placeholders, Vec::new());
        assert_eq!(state.pending_placeholders.len(), 2);
        assert_eq!(state.scheduled_placeholders.len(), 1);
    }

    #[test]
    fn every_node_address_resolves() {
        let nodes = vec![test_node("node-a", "10.0.0.1", false, "8", "16Gi")];
        let state = ClusterState::build(Vec::new(), Vec::new(), nodes);
        assert!(state.node_by_ip("10.0.0.1").is_some());
        // The hostname address is indexed as well.
        assert!(state.node_by_ip("node-a").is_some());
        assert!(state.node_by_ip("10.9.9.9").is_none());
    }

    #[test]
    fn empty_runner_domains_are_not_indexed() {
        let runners = vec![idle_runner("no-domain", "", 4.0, 8.0)];
        let state = ClusterState::build(runners, Vec::new(), Vec::new());
        assert!(state.runner_by_domain.is_empty());
    }

    #[test]
    fn nascent_node_needs_placeholder_and_no_runner() {
        let nodes = vec![
            test_node("node-a", "10.0.0.1", false, "8", "16Gi"),
            test_node("node-b", "10.0.0.2", false, "8", "16Gi"),
            test_node("node-c", "10.0.0.3", false, "8", "16Gi"),
        ];
        let runners = vec![idle_runner("r-a", "10.0.0.1", 8.0, 16.0)];
        let placeholders = vec![
            test_pod("ph-a", "node-a"),
            test_pod("ph-b", "node-b"),
        ];
        let state = ClusterState::build(runners, placeholders, nodes);

        // node-a has a runner, node-c has no placeholder; only node-b is nascent.
        assert_eq!(state.nascent_nodes, vec!["node-b".to_string()]);
    }

    #[test]
    fn unschedulable_nodes_are_never_nascent() {
        let nodes = vec![test_node("node-a", "10.0.0.1", true, "8", "16Gi")];
        let placeholders = vec![test_pod("ph-a", "node-a")];
        let state = ClusterState::build(Vec::new(), placeholders, nodes);
        assert!(state.nascent_nodes.is_empty());
    }
}
