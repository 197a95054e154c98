//! Scale-up decisions and the scale-down safety filter.

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::metrics::{node_allocatable, ResourceMetrics};
use crate::state::{node_name, pod_node_name, ClusterState};

/// The scale-up predicates, evaluated once per tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleSignals {
    pub utilization_high: bool,
    pub cpu_utilization_pct: f32,
    pub mem_utilization_pct: f32,
    pub idle_buffer_low: bool,
    pub cpu_idle_low: bool,
    pub mem_idle_low: bool,
}

impl ScaleSignals {
    pub fn evaluate(
        metrics: &ResourceMetrics,
        cfg: &ManagerConfig,
        idle_runners: usize,
        nascent_nodes: usize,
    ) -> Self {
        let max_pct = cfg.max_resource_utilization_percent as f32;

        let mut cpu_utilization_pct = 0.0;
        let mut cpu_high = false;
        if metrics.total_cpu_capacity > 0.0 {
            cpu_utilization_pct =
                metrics.total_allocated_cpu / metrics.total_cpu_capacity * 100.0;
            cpu_high = cpu_utilization_pct > max_pct;
        }

        let mut mem_utilization_pct = 0.0;
        let mut mem_high = false;
        if metrics.total_memory_gib_capacity > 0.0 {
            mem_utilization_pct =
                metrics.total_allocated_memory_gib / metrics.total_memory_gib_capacity * 100.0;
            mem_high = mem_utilization_pct > max_pct;
        }

        Self {
            utilization_high: cpu_high || mem_high,
            cpu_utilization_pct,
            mem_utilization_pct,
            idle_buffer_low: ((idle_runners + nascent_nodes) as i32) < cfg.min_idle_runners,
            cpu_idle_low: metrics.total_available_cpu < cfg.min_idle_cpu as f32,
            mem_idle_low: metrics.total_available_memory_gib < cfg.min_idle_memory as f32,
        }
    }

    /// Scale-up fires if any predicate holds.
    pub fn scale_up_needed(&self) -> bool {
        self.utilization_high || self.idle_buffer_low || self.cpu_idle_low || self.mem_idle_low
    }
}

/// How many nodes the tick wants, and how many new placeholders that means
/// once in-flight ones are accounted for.
#[derive(Debug, Clone, Copy)]
pub struct ScaleUpPlan {
    pub nodes_needed: i32,
    pub nodes_to_create: i32,
}

impl ScaleUpPlan {
    /// Turn the fired predicates into a node count.
    ///
    /// Each deficit is converted to nodes via the average per-node capacity
    /// and the largest deficit wins. Pending placeholders absorb the need
    /// first so a scale-up that is still provisioning is not re-ordered.
    pub fn compute(
        signals: &ScaleSignals,
        metrics: &ResourceMetrics,
        cfg: &ManagerConfig,
        idle_runners: usize,
        nascent_nodes: usize,
        pending_placeholders: usize,
    ) -> Self {
        let mut nodes_needed = 0i32;

        if signals.cpu_idle_low && metrics.avg_cpu_per_node > 0.0 {
            let deficit = cfg.min_idle_cpu as f32 - metrics.total_available_cpu;
            nodes_needed = nodes_needed.max((deficit / metrics.avg_cpu_per_node).ceil() as i32);
        }
        if signals.mem_idle_low && metrics.avg_mem_per_node > 0.0 {
            let deficit = cfg.min_idle_memory as f32 - metrics.total_available_memory_gib;
            nodes_needed = nodes_needed.max((deficit / metrics.avg_mem_per_node).ceil() as i32);
        }
        if signals.idle_buffer_low {
            nodes_needed =
                nodes_needed.max(cfg.min_idle_runners - (idle_runners + nascent_nodes) as i32);
        }

        // Utilization alone justifies one node even when no deficit math fires.
        if signals.utilization_high && nodes_needed == 0 {
            nodes_needed = 1;
        }

        Self {
            nodes_needed,
            nodes_to_create: nodes_needed - pending_placeholders as i32,
        }
    }
}

/// Placeholder pods that can be deleted without violating the idle minimums.
///
/// Candidates are checked in registry order against the pre-tick totals;
/// the totals are deliberately not updated between candidates, which is
/// conservative but can never talk itself below the minimums.
pub fn scale_down_candidates<'a>(
    state: &'a ClusterState,
    metrics: &ResourceMetrics,
    cfg: &ManagerConfig,
) -> Vec<&'a Pod> {
    let mut batch = Vec::new();

    for runner in &state.deletable_runners {
        if runner.domain.is_empty() {
            warn!(runner = %runner.name, "deletable runner has no domain, skipping");
            continue;
        }

        let Some(node) = state.node_by_ip(&runner.domain) else {
            warn!(
                runner = %runner.name,
                domain = %runner.domain,
                "no node found for deletable runner, skipping"
            );
            continue;
        };
        let name = node_name(node);

        let Some((node_cpu, node_memory)) = node_allocatable(node) else {
            warn!(node = %name, "could not read allocatable resources, skipping scale-down check");
            continue;
        };

        let hypothetical_cpu = metrics.total_available_cpu - node_cpu;
        let hypothetical_memory = metrics.total_available_memory_gib - node_memory;

        let mut safe = true;
        if hypothetical_cpu < cfg.min_idle_cpu as f32 {
            info!(
                node = %name,
                domain = %runner.domain,
                would_be = hypothetical_cpu,
                minimum = cfg.min_idle_cpu,
                "scale-down would violate the CPU idle minimum, skipping"
            );
            safe = false;
        }
        if hypothetical_memory < cfg.min_idle_memory as f32 {
            info!(
                node = %name,
                domain = %runner.domain,
                would_be = hypothetical_memory,
                minimum = cfg.min_idle_memory,
                "scale-down would violate the memory idle minimum, skipping"
            );
            safe = false;
        }
        if !safe {
            continue;
        }

        match state
            .scheduled_placeholders
            .iter()
            .find(|pod| pod_node_name(pod) == name)
        {
            Some(pod) => {
                info!(
                    pod = %pod.metadata.name.as_deref().unwrap_or_default(),
                    node = %name,
                    domain = %runner.domain,
                    "placeholder pod selected for scale-down"
                );
                batch.push(pod);
            }
            None => {
                warn!(
                    node = %name,
                    domain = %runner.domain,
                    "no scheduled placeholder pod on node for deletable runner, skipping"
                );
            }
        }
    }

    batch
}
