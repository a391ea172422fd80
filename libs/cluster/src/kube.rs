//! REST client for the cluster API.
//!
//! Only the few core/v1 endpoints this system needs are covered; objects are
//! built as JSON documents rather than typed API structs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ClusterError;
use crate::types::{ExecutionUnitSpec, NodeCondition, NodeEvent, UnitPhase};
use crate::{ExecutionUnits, Nodes};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Where and how to reach the cluster API.
#[derive(Debug, Clone, Default)]
pub struct KubeConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// PEM encoded CA bundle to trust in addition to the system roots.
    pub ca_pem: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl KubeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Configuration from the service account mounted into every unit.
    pub fn in_cluster() -> Result<Self, ClusterError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ClusterError::Config("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = read(&dir.join("token"))?;
        let ca_pem = read(&dir.join("ca.crt"))?;

        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };
        Ok(Self {
            base_url: format!("https://{}:{}", host, port),
            token: Some(String::from_utf8_lossy(&token).trim().to_string()),
            ca_pem: Some(ca_pem),
            timeout: Some(Duration::from_secs(30)),
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ClusterError> {
    std::fs::read(path).map_err(|source| ClusterError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Cluster API client.
#[derive(Clone)]
pub struct KubeClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(config: KubeConfig) -> Result<Self, ClusterError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout.unwrap_or(Duration::from_secs(30)));
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url,
            token: config.token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "cluster api request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn pod_path(namespace: &str, name: &str) -> String {
        format!("/api/v1/namespaces/{}/pods/{}", namespace, name)
    }
}

async fn check(
    response: Response,
    kind: &'static str,
    name: &str,
) -> Result<Response, ClusterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::CONFLICT => Err(ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        }),
        StatusCode::NOT_FOUND => Err(ClusterError::NotFound {
            kind,
            name: name.to_string(),
        }),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(ClusterError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Pod manifest for an execution unit.
pub fn pod_manifest(spec: &ExecutionUnitSpec) -> Value {
    let volumes: Vec<Value> = spec
        .host_mounts
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "hostPath": { "path": m.path, "type": "DirectoryOrCreate" },
            })
        })
        .collect();
    let volume_mounts: Vec<Value> = spec
        .host_mounts
        .iter()
        .map(|m| {
            let mut mount = json!({ "name": m.name, "mountPath": m.path });
            if m.bidirectional {
                mount["mountPropagation"] = json!("Bidirectional");
            }
            mount
        })
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
        },
        "spec": {
            "restartPolicy": "Never",
            "nodeName": spec.node_name,
            "tolerations": [{ "operator": "Exists" }],
            "containers": [{
                "name": spec.container_name,
                "image": spec.image,
                "imagePullPolicy": spec.pull_policy.as_str(),
                "args": spec.args,
                "securityContext": { "privileged": spec.privileged },
                "volumeMounts": volume_mounts,
                "resources": {
                    "requests": {
                        "cpu": spec.resources.cpu_request,
                        "memory": spec.resources.memory_request,
                    },
                    "limits": {
                        "cpu": spec.resources.cpu_limit,
                        "memory": spec.resources.memory_limit,
                    },
                },
            }],
            "volumes": volumes,
        },
    })
}

/// Strategic merge patch writing one node condition.
pub fn condition_patch(condition: &NodeCondition) -> Value {
    let at = condition
        .last_heartbeat
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    json!({
        "status": {
            "conditions": [{
                "type": condition.kind,
                "status": condition.status.as_str(),
                "reason": condition.reason,
                "message": condition.message,
                "lastHeartbeatTime": at,
                "lastTransitionTime": at,
            }]
        }
    })
}

/// core/v1 Event attached to a node.
pub fn event_manifest(event: &NodeEvent) -> Value {
    let at = event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or_default();
    json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": {
            "name": format!("{}.{:x}", event.node_name, nanos),
            "namespace": event.namespace,
        },
        "involvedObject": {
            "kind": "Node",
            "name": event.node_name,
            "uid": event.node_name,
            "namespace": "",
        },
        "reason": event.reason,
        "message": event.message,
        "type": event.event_type.as_str(),
        "source": { "component": event.source, "host": event.node_name },
        "firstTimestamp": at,
        "lastTimestamp": at,
        "count": 1,
    })
}

#[derive(Debug, Deserialize)]
struct PodStatusView {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

#[async_trait]
impl ExecutionUnits for KubeClient {
    async fn create_unit(&self, spec: &ExecutionUnitSpec) -> Result<(), ClusterError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/namespaces/{}/pods", spec.namespace),
            )
            .json(&pod_manifest(spec))
            .send()
            .await?;
        check(response, "pod", &spec.name).await?;
        Ok(())
    }

    async fn unit_phase(&self, namespace: &str, name: &str) -> Result<UnitPhase, ClusterError> {
        let response = self
            .request(reqwest::Method::GET, &Self::pod_path(namespace, name))
            .send()
            .await?;
        let pod: PodStatusView = check(response, "pod", name).await?.json().await?;
        Ok(UnitPhase::parse(&pod.status.phase))
    }

    async fn unit_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
    ) -> Result<String, ClusterError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("{}/log", Self::pod_path(namespace, name)),
            )
            .query(&[("container", container)])
            .send()
            .await?;
        Ok(check(response, "pod", name).await?.text().await?)
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let response = self
            .request(reqwest::Method::DELETE, &Self::pod_path(namespace, name))
            .send()
            .await?;
        check(response, "pod", name).await?;
        Ok(())
    }
}

#[async_trait]
impl Nodes for KubeClient {
    async fn node_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/v1/nodes/{}", name))
            .send()
            .await?;
        match check(response, "node", name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn cordon(&self, name: &str) -> Result<(), ClusterError> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/api/v1/nodes/{}", name))
            .header("Content-Type", "application/merge-patch+json")
            .body(json!({ "spec": { "unschedulable": true } }).to_string())
            .send()
            .await?;
        check(response, "node", name).await?;
        Ok(())
    }

    async fn set_condition(
        &self,
        name: &str,
        condition: &NodeCondition,
    ) -> Result<(), ClusterError> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/api/v1/nodes/{}/status", name),
            )
            .header("Content-Type", "application/strategic-merge-patch+json")
            .body(condition_patch(condition).to_string())
            .send()
            .await?;
        check(response, "node", name).await?;
        Ok(())
    }

    async fn record_event(&self, event: &NodeEvent) -> Result<(), ClusterError> {
        let manifest = event_manifest(event);
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/namespaces/{}/events", event.namespace),
            )
            .json(&manifest)
            .send()
            .await?;
        check(response, "event", &event.reason).await?;
        Ok(())
    }
}
