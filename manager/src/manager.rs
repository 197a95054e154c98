//! The reconcile loop.
//!
//! One tick runs the full pipeline serially: snapshot, aggregate, decide,
//! act. Nothing survives a tick except the configuration and the clients,
//! and the next tick never starts before this one's side effects finished.

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::api::AdminApi;
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::metrics::ResourceMetrics;
use crate::placeholder::{create_placeholder_pod, delete_placeholder_pod};
use crate::scale::{scale_down_candidates, ScaleSignals, ScaleUpPlan};
use crate::state::{snapshot, ClusterState};

/// How often the reconcile loop runs.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Run the reconcile loop until the task is dropped.
///
/// A failed tick is logged and abandoned; the next tick is the retry.
pub async fn run(cfg: ManagerConfig, api: AdminApi, client: Client) {
    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick fires immediately; wait a full period instead
    // so the pool settles before the first decision.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        info!("running reconcile tick");
        if let Err(error) = reconcile(&cfg, &api, &client).await {
            error!(%error, "reconcile tick failed");
        }
    }
}

async fn reconcile(cfg: &ManagerConfig, api: &AdminApi, client: &Client) -> Result<()> {
    let state = snapshot(api, client, cfg).await?;
    let metrics = ResourceMetrics::calculate(&state);
    log_cluster_state(&state, &metrics);

    let signals = ScaleSignals::evaluate(
        &metrics,
        cfg,
        state.idle_runners.len(),
        state.nascent_nodes.len(),
    );
    let pods: Api<Pod> = Api::namespaced(client.clone(), &cfg.provider_namespace);

    let needs_scale_up = signals.scale_up_needed();
    if needs_scale_up && handle_scale_up(&pods, cfg, &state, &metrics, &signals).await {
        // A scale-up was ordered; leave scale-down to a later tick.
        return Ok(());
    }

    handle_scale_down(&pods, cfg, &state, &metrics, needs_scale_up).await;
    Ok(())
}

fn log_cluster_state(state: &ClusterState, metrics: &ResourceMetrics) {
    info!(
        runners = state.runners.len(),
        active = state.active_runners.len(),
        idle = state.idle_runners.len(),
        deletable = state.deletable_runners.len(),
        nodes = state.nodes.len(),
        nascent = state.nascent_nodes.len(),
        pending_placeholders = state.pending_placeholders.len(),
        scheduled_placeholders = state.scheduled_placeholders.len(),
        "cluster state"
    );
    info!(
        cpu_capacity = metrics.total_cpu_capacity,
        mem_capacity_gib = metrics.total_memory_gib_capacity,
        cpu_allocated = metrics.total_allocated_cpu,
        mem_allocated_gib = metrics.total_allocated_memory_gib,
        cpu_available = metrics.total_available_cpu,
        mem_available_gib = metrics.total_available_memory_gib,
        "aggregated resources"
    );
    info!(
        avg_cpu_per_node = metrics.avg_cpu_per_node,
        avg_mem_per_node = metrics.avg_mem_per_node,
        "average node capacity"
    );
}

/// Order new placeholder pods for the computed deficit. Returns whether any
/// pods were ordered this tick.
async fn handle_scale_up(
    pods: &Api<Pod>,
    cfg: &ManagerConfig,
    state: &ClusterState,
    metrics: &ResourceMetrics,
    signals: &ScaleSignals,
) -> bool {
    info!(
        utilization_high = signals.utilization_high,
        cpu_utilization_pct = signals.cpu_utilization_pct,
        mem_utilization_pct = signals.mem_utilization_pct,
        idle_buffer_low = signals.idle_buffer_low,
        cpu_idle_low = signals.cpu_idle_low,
        mem_idle_low = signals.mem_idle_low,
        "scale-up conditions met"
    );

    let plan = ScaleUpPlan::compute(
        signals,
        metrics,
        cfg,
        state.idle_runners.len(),
        state.nascent_nodes.len(),
        state.pending_placeholders.len(),
    );

    if plan.nodes_to_create <= 0 {
        info!(
            nodes_needed = plan.nodes_needed,
            in_flight = state.pending_placeholders.len(),
            "scale-up covered by in-flight placeholders, waiting for nodes to provision"
        );
        return false;
    }

    info!(
        nodes_to_create = plan.nodes_to_create,
        nodes_needed = plan.nodes_needed,
        in_flight = state.pending_placeholders.len(),
        "triggering scale-up"
    );
    for _ in 0..plan.nodes_to_create {
        if let Err(error) = create_placeholder_pod(pods, &cfg.provider_namespace).await {
            error!(%error, "failed to create placeholder pod for scale-up");
        }
    }
    true
}

/// Cancel unjustified pending placeholders, then release nodes whose
/// runners are deletable and whose removal keeps the idle minimums intact.
async fn handle_scale_down(
    pods: &Api<Pod>,
    cfg: &ManagerConfig,
    state: &ClusterState,
    metrics: &ResourceMetrics,
    needs_scale_up: bool,
) {
    if !needs_scale_up && !state.pending_placeholders.is_empty() {
        info!(
            pending = state.pending_placeholders.len(),
            "no scale-up needed, deleting pending placeholder pods"
        );
        for pod in &state.pending_placeholders {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            delete_placeholder_pod(pods, name).await;
        }
    }

    if state.deletable_runners.is_empty() {
        info!("no deletable runners found for scale-down");
        return;
    }

    info!(
        deletable = state.deletable_runners.len(),
        "considering scale-down"
    );
    let batch = scale_down_candidates(state, metrics, cfg);
    if batch.is_empty() {
        info!("no safe-to-delete placeholder pods identified for scale-down");
        return;
    }

    for pod in &batch {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        delete_placeholder_pod(pods, name).await;
    }
    info!(deleted = batch.len(), "initiated placeholder deletion for scale-down");
}
