//! HTTP implementation of the control endpoint

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::types::{ComponentWorkerInfo, NfvInfo, PcapInfo, ProcessInfo};
use super::{ControlEndpoint, EndpointProvider};
use crate::crd::{ClassifierType, WorkerKind};
use crate::planner::Operation;
use crate::retry::{retry_with_backoff, RetryConfig, Sleeper};
use crate::Error;

/// Method, path and body of one REST call
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the base URL, starting with `/v1/`
    pub path: String,
    /// JSON body, if any
    pub body: Option<Value>,
}

impl EndpointRequest {
    fn put(path: String, body: Value) -> Self {
        Self {
            method: Method::PUT,
            path,
            body: Some(body),
        }
    }

    fn delete(path: String) -> Self {
        Self {
            method: Method::DELETE,
            path,
            body: None,
        }
    }

    /// Mutations are retried, deletions are single-attempt
    pub fn is_retried(&self) -> bool {
        self.method == Method::PUT || self.method == Method::POST
    }
}

/// Translate an operation into the spp-ctl REST call that performs it
pub fn request_for(kind: WorkerKind, sec_id: u32, op: &Operation) -> EndpointRequest {
    let base = format!("/v1/{}/{}", kind.api_segment(), sec_id);
    match op {
        Operation::AddResource(port) => EndpointRequest::put(
            format!("{base}/ports"),
            json!({"action": "add", "port": port}),
        ),
        Operation::DelResource(port) => EndpointRequest::put(
            format!("{base}/ports"),
            json!({"action": "del", "port": port}),
        ),
        Operation::AddPatch(patch) => EndpointRequest::put(
            format!("{base}/patches"),
            json!({"src": patch.src, "dst": patch.dst}),
        ),
        Operation::ClearPatches => EndpointRequest::delete(format!("{base}/patches")),
        Operation::Forward(toggle) => EndpointRequest::put(
            format!("{base}/forward"),
            json!({"action": toggle.to_string()}),
        ),
        Operation::AddComponent(component) => EndpointRequest {
            method: Method::POST,
            path: format!("{base}/components"),
            body: Some(json!({
                "name": component.name,
                "core": component.core,
                "type": component.type_,
            })),
        },
        Operation::DelComponent(name) => {
            EndpointRequest::delete(format!("{base}/components/{name}"))
        }
        Operation::AttachPort {
            component,
            dir,
            port,
        } => {
            let mut body = json!({
                "action": "attach",
                "port": port.port,
                "dir": dir.to_string(),
            });
            if port.vlan.is_tagging() {
                body["vlan"] = json!({
                    "operation": port.vlan.operation.to_string(),
                    "id": port.vlan.id,
                    "pcp": port.vlan.pcp,
                });
            }
            EndpointRequest::put(format!("{base}/components/{component}/ports"), body)
        }
        Operation::DetachPort {
            component,
            dir,
            port,
        } => EndpointRequest::put(
            format!("{base}/components/{component}/ports"),
            json!({"action": "detach", "port": port.port, "dir": dir.to_string()}),
        ),
        Operation::AddClassifierEntry(entry) | Operation::DelClassifierEntry(entry) => {
            let action = if matches!(op, Operation::AddClassifierEntry(_)) {
                "add"
            } else {
                "del"
            };
            let mut body = json!({
                "action": action,
                "type": entry.match_type.to_string(),
                "mac_address": entry.mac,
                "port": entry.port,
            });
            if let (ClassifierType::Vlan, Some(id)) = (entry.match_type, entry.vlan_id) {
                body["vlan"] = json!(id);
            }
            EndpointRequest::put(format!("{base}/classifier_table"), body)
        }
        Operation::Capture(toggle) => EndpointRequest::put(
            format!("{base}/capture"),
            json!({"action": toggle.to_string()}),
        ),
    }
}

/// spp-ctl client over HTTP
pub struct HttpControlEndpoint {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpControlEndpoint {
    /// Client for the spp-ctl at `base_url` (`http://host:port`)
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        retry: RetryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry,
            sleeper,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "control endpoint unreachable");
                return None;
            }
        };
        if response.status() == StatusCode::NOT_FOUND {
            debug!(url = %url, "not found on control endpoint");
            return None;
        }
        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "control endpoint read failed");
            return None;
        }
        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url = %url, error = %e, "control endpoint returned an unexpected body");
                None
            }
        }
    }

    async fn send(&self, request: &EndpointRequest) -> Result<(), Error> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::endpoint(format!("{} {url}: {e}", request.method)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(Error::endpoint(format!(
            "{} {url}: {status} {detail}",
            request.method
        )))
    }

    async fn execute(&self, request: EndpointRequest) -> bool {
        let outcome = if request.is_retried() {
            retry_with_backoff(&self.retry, &request.path, self.sleeper.as_ref(), || {
                self.send(&request)
            })
            .await
        } else {
            self.send(&request).await
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "control endpoint call failed");
                false
            }
        }
    }
}

#[async_trait]
impl ControlEndpoint for HttpControlEndpoint {
    async fn processes(&self) -> Option<Vec<ProcessInfo>> {
        self.get("/v1/processes").await
    }

    async fn observe_nfv(&self, sec_id: u32) -> Option<NfvInfo> {
        self.get(&format!("/v1/nfvs/{sec_id}")).await
    }

    async fn observe_components(
        &self,
        kind: WorkerKind,
        sec_id: u32,
    ) -> Option<ComponentWorkerInfo> {
        self.get(&format!("/v1/{}/{sec_id}", kind.api_segment()))
            .await
    }

    async fn observe_pcap(&self, sec_id: u32) -> Option<PcapInfo> {
        self.get(&format!("/v1/pcaps/{sec_id}")).await
    }

    async fn apply(&self, kind: WorkerKind, sec_id: u32, op: &Operation) -> bool {
        self.execute(request_for(kind, sec_id, op)).await
    }

    async fn announce_removal(&self, kind: WorkerKind, sec_id: u32) -> bool {
        self.execute(EndpointRequest::delete(format!(
            "/v1/{}/{sec_id}",
            kind.api_segment()
        )))
        .await
    }
}

/// Builds [`HttpControlEndpoint`]s sharing one connection pool
pub struct HttpEndpointProvider {
    client: reqwest::Client,
    rest_port: u16,
    retry: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpEndpointProvider {
    /// Create a provider; `timeout` bounds every request
    pub fn new(
        rest_port: u16,
        timeout: Duration,
        retry: RetryConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::endpoint(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            rest_port,
            retry,
            sleeper,
        })
    }
}

impl EndpointProvider for HttpEndpointProvider {
    fn connect(&self, vip: &str) -> Arc<dyn ControlEndpoint> {
        Arc::new(HttpControlEndpoint::new(
            self.client.clone(),
            format!("http://{}:{}", vip, self.rest_port),
            self.retry.clone(),
            self.sleeper.clone(),
        ))
    }
}
