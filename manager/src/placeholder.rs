//! Placeholder pod lifecycle.
//!
//! A placeholder reserves one full node: while Pending it forces the
//! cluster autoscaler to provision a node, and once Scheduled its deletion
//! releases the node for downstream reclamation.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, PostParams};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tracing::{error, info};

use crate::error::Result;

/// `app` label value identifying placeholder pods.
pub const PLACEHOLDER_POD_LABEL: &str = "daytona-runner-placeholder";

/// Node label selecting sandbox-capable pool nodes.
pub const NODE_SELECTOR_KEY: &str = "daytona-sandbox-c";

/// Taint placed on pool nodes; placeholders must tolerate it.
pub const TAINT_KEY: &str = "sandbox";

/// Create one placeholder pod with a fresh random name.
pub async fn create_placeholder_pod(pods: &Api<Pod>, namespace: &str) -> Result<Pod> {
    let pod_name = format!("{PLACEHOLDER_POD_LABEL}-{}", random_suffix(8));
    info!(pod = %pod_name, namespace = %namespace, "creating placeholder pod");

    let pod = placeholder_pod(namespace, &pod_name)?;
    let created = pods.create(&PostParams::default(), &pod).await?;
    info!(pod = %pod_name, "created placeholder pod");
    Ok(created)
}

/// Delete a placeholder pod by name. NotFound is fine; anything else is
/// logged and swallowed so a batch keeps going.
pub async fn delete_placeholder_pod(pods: &Api<Pod>, name: &str) {
    match pods.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!(pod = %name, "deleted placeholder pod"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            info!(pod = %name, "placeholder pod already gone");
        }
        Err(e) => error!(pod = %name, error = %e, "failed to delete placeholder pod"),
    }
}

/// Build the placeholder pod manifest.
///
/// The required anti-affinity spreads placeholders one per node, and the
/// node selector plus toleration pin them to the sandbox pool. The pause
/// container keeps the pod Running once scheduled.
fn placeholder_pod(namespace: &str, pod_name: &str) -> Result<Pod> {
    let pod = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod_name,
            "namespace": namespace,
            "labels": { "app": PLACEHOLDER_POD_LABEL }
        },
        "spec": {
            "affinity": {
                "podAntiAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": [{
                        "labelSelector": {
                            "matchExpressions": [{
                                "key": "app",
                                "operator": "In",
                                "values": [PLACEHOLDER_POD_LABEL]
                            }]
                        },
                        "topologyKey": "kubernetes.io/hostname"
                    }]
                }
            },
            "nodeSelector": { (NODE_SELECTOR_KEY): "true" },
            "tolerations": [{
                "key": TAINT_KEY,
                "operator": "Equal",
                "value": "true",
                "effect": "NoExecute"
            }],
            "containers": [{
                "name": "pause",
                "image": "rancher/pause:3.6"
            }],
            "restartPolicy": "Never"
        }
    }))?;
    Ok(pod)
}

fn random_suffix(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .take(length)
        .collect()
}
