//! Aggregated capacity and allocation metrics for one tick.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::HashSet;
use tracing::warn;

use crate::state::{node_is_unschedulable, node_name, ClusterState};

/// Pool-wide resource totals.
///
/// CPU is in fractional cores, memory in GiB. Available totals may go
/// negative when the pool is over-allocated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceMetrics {
    pub total_cpu_capacity: f32,
    pub total_memory_gib_capacity: f32,
    pub total_allocated_cpu: f32,
    pub total_allocated_memory_gib: f32,
    pub total_available_cpu: f32,
    pub total_available_memory_gib: f32,
    pub avg_cpu_per_node: f32,
    pub avg_mem_per_node: f32,
}

impl ResourceMetrics {
    /// Aggregate capacity, allocation, and availability over a snapshot.
    ///
    /// Capacity prefers what runners report for themselves (the Docker
    /// cgroup view) and falls back to the node allocatable for schedulable
    /// nodes that have no registered runner, so freshly provisioned nodes
    /// count before their runner comes up. No node is counted twice.
    pub fn calculate(state: &ClusterState) -> Self {
        let mut metrics = Self::default();
        let mut nodes_with_runners: HashSet<&str> = HashSet::new();

        for runner in &state.runners {
            if runner.unschedulable {
                continue;
            }
            metrics.total_cpu_capacity += runner.cpu;
            metrics.total_memory_gib_capacity += runner.memory;
            if !runner.domain.is_empty() {
                if let Some(node) = state.node_by_ip(&runner.domain) {
                    nodes_with_runners.insert(node_name(node));
                }
            }
        }

        for node in &state.nodes {
            if node_is_unschedulable(node) || nodes_with_runners.contains(node_name(node)) {
                continue;
            }
            match node_allocatable(node) {
                Some((cpu, memory)) => {
                    metrics.total_cpu_capacity += cpu;
                    metrics.total_memory_gib_capacity += memory;
                }
                None => {
                    warn!(
                        node = %node_name(node),
                        "could not read allocatable resources, node skipped in capacity totals"
                    );
                }
            }
        }

        for runner in &state.active_runners {
            metrics.total_allocated_cpu += runner.current_allocated_cpu;
            metrics.total_allocated_memory_gib += runner.current_allocated_memory_gib;
        }

        metrics.total_available_cpu = metrics.total_cpu_capacity - metrics.total_allocated_cpu;
        metrics.total_available_memory_gib =
            metrics.total_memory_gib_capacity - metrics.total_allocated_memory_gib;

        let schedulable_nodes = state.schedulable_node_count();
        if schedulable_nodes > 0 {
            metrics.avg_cpu_per_node = metrics.total_cpu_capacity / schedulable_nodes as f32;
            metrics.avg_mem_per_node = metrics.total_memory_gib_capacity / schedulable_nodes as f32;
        }

        metrics
    }
}

/// Allocatable CPU (cores) and memory (GiB) reported by the kubelet.
pub fn node_allocatable(node: &Node) -> Option<(f32, f32)> {
    let allocatable = node.status.as_ref()?.allocatable.as_ref()?;
    let cpu = parse_quantity(allocatable.get("cpu")?)? as f32;
    let memory_bytes = parse_quantity(allocatable.get("memory")?)?;
    Some((cpu, (memory_bytes / f64::from(1 << 30)) as f32))
}

/// Parse a Kubernetes resource quantity into its base unit (cores for CPU,
/// bytes for memory). Handles plain numbers plus the binary (Ki..Ei) and
/// decimal (n..E) suffixes.
fn parse_quantity(quantity: &Quantity) -> Option<f64> {
    let text = quantity.0.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier: f64 = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => f64::powi(1024.0, 4),
        "Pi" => f64::powi(1024.0, 5),
        "Ei" => f64::powi(1024.0, 6),
        _ => return None,
    };

    Some(value * multiplier)
}
