//! Homeserver provisioning
//!
//! Test cases ask a [`ServerProvisioner`] for the servers their scenario
//! runs against. The production implementation talks to homerunner, which
//! starts complement images on demand; configured overrides short-circuit
//! that with fixed, already-running servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use trafficlight_common::{Error, Result, ServerType};

/// A provisioned homeserver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeServer {
    pub server_name: String,
    /// Client-server API base URL as seen from the orchestrator host
    pub cs_api: String,
}

impl HomeServer {
    pub fn new(server_name: impl Into<String>, cs_api: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            cs_api: cs_api.into(),
        }
    }

    /// The API URL as seen from inside an emulator or container
    pub fn docker_url(&self) -> String {
        self.cs_api.replace("localhost", "10.0.2.2")
    }
}

/// Creates and releases the servers a test case needs
#[async_trait]
pub trait ServerProvisioner: Send + Sync {
    /// Create the servers for `server_type`, in the order the type lists them
    async fn create(&self, test_case_id: &str, server_type: ServerType) -> Result<Vec<HomeServer>>;

    /// Release servers once their test case is finished
    async fn release(&self, _servers: &[HomeServer]) {}
}

/// Homerunner-backed provisioner
pub struct HomerunnerClient {
    base_url: String,
    overrides: HashMap<String, Vec<HomeServer>>,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl HomerunnerClient {
    pub fn new(base_url: impl Into<String>, overrides: HashMap<String, Vec<HomeServer>>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            overrides,
            http_client: reqwest::Client::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn generate_homeserver(&self, image: &str) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        json!({
            "Name": format!("trafficlight{}", id),
            "Users": [],
            "Rooms": [],
            "BaseImageURI": image,
        })
    }

    /// Blueprint request for the given images.
    ///
    /// The top-level image is deliberately invalid so complement refuses any
    /// homeserver that lacks its own `BaseImageURI`.
    fn blueprint(&self, test_case_id: &str, images: &[&str]) -> Value {
        let homeservers: Vec<Value> = images
            .iter()
            .map(|image| self.generate_homeserver(image))
            .collect();
        json!({
            "base_image_uri": "INVALID_NAME",
            "blueprint": {
                "Name": test_case_id,
                "Homeservers": homeservers,
            },
        })
    }

    async fn create_complement(&self, test_case_id: &str, images: &[&str]) -> Result<Vec<HomeServer>> {
        let request = self.blueprint(test_case_id, images);
        let url = format!("{}/create", self.base_url);
        debug!("Requesting homeservers from {}: {}", url, request);

        let resp = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provisioning(format!("homerunner request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provisioning(format!("homerunner returned {}: {}", status, body)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Provisioning(format!("homerunner response unreadable: {}", e)))?;

        parse_homeservers(&request, &body)
    }
}

/// Match each requested homeserver to the `BaseURL` homerunner reports for it
fn parse_homeservers(request: &Value, response: &Value) -> Result<Vec<HomeServer>> {
    let requested = request["blueprint"]["Homeservers"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    requested
        .iter()
        .map(|homeserver| {
            let name = homeserver["Name"].as_str().unwrap_or_default();
            let cs_api = response["homeservers"][name]["BaseURL"]
                .as_str()
                .ok_or_else(|| {
                    Error::Provisioning(format!("homerunner did not report a BaseURL for {}", name))
                })?;
            Ok(HomeServer::new(name, cs_api))
        })
        .collect()
}

#[async_trait]
impl ServerProvisioner for HomerunnerClient {
    async fn create(&self, test_case_id: &str, server_type: ServerType) -> Result<Vec<HomeServer>> {
        if let Some(servers) = self.overrides.get(server_type.name()) {
            info!("Using {} override servers for {}", servers.len(), server_type);
            return Ok(servers.clone());
        }

        let images = server_type.images();
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let servers = self.create_complement(test_case_id, &images).await?;
        info!(
            "Provisioned {} for {}: {:?}",
            server_type,
            test_case_id,
            servers.iter().map(|s| s.cs_api.as_str()).collect::<Vec<_>>()
        );
        Ok(servers)
    }
}
