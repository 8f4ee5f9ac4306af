//! Puter API client for worker lifecycle.
//!
//! The puter CLI has no worker subcommands, so these calls bypass the bridge
//! and go straight to the Puter HTTP API, authenticated with the bearer
//! token read from the local puter-cli config. Worker operations ride the
//! platform's driver-call endpoint; worker source files are staged with a
//! plain `/write`.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_ORIGIN: &str = "https://api.puter.com";

const WORKERS_INTERFACE: &str = "puter-workers";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Puter API returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// A deployed worker as reported by the Puter API. Fields beyond the ones we
/// care about are carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// HTTP client for the Puter API, constructed once at startup and handed to
/// the router state explicitly so tests can substitute a fake.
pub struct PuterClient {
    http: reqwest::Client,
    origin: String,
    token: String,
}

impl PuterClient {
    pub fn new(token: String, origin: String) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            origin,
            token,
        })
    }

    async fn driver_call(&self, method: &str, args: Value) -> Result<Value, WorkerError> {
        let res = self
            .http
            .post(format!("{}/drivers/call", self.origin))
            .bearer_auth(&self.token)
            .json(&json!({
                "interface": WORKERS_INTERFACE,
                "method": method,
                "args": args,
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(WorkerError::Api { status, body });
        }

        let body: Value = res.json().await?;
        // Driver responses wrap the payload in a "result" field.
        Ok(body.get("result").cloned().unwrap_or(body))
    }

    /// Write a file into the account's cloud drive. Used to stage worker
    /// source before deployment.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), WorkerError> {
        let res = self
            .http
            .post(format!(
                "{}/write?path={}",
                self.origin,
                urlencoding::encode(path)
            ))
            .bearer_auth(&self.token)
            .body(content.to_string())
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(WorkerError::Api { status, body });
        }
        Ok(())
    }

    /// Deploy a worker from a previously written source file.
    pub async fn create_worker(&self, name: &str, file_path: &str) -> Result<Worker, WorkerError> {
        let result = self
            .driver_call("create", json!({ "name": name, "filePath": file_path }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>, WorkerError> {
        let result = self.driver_call("list", json!({})).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(result)?)
    }

    /// Fetch one worker. `Ok(None)` when the API reports no such worker.
    pub async fn get_worker(&self, name: &str) -> Result<Option<Worker>, WorkerError> {
        let result = self.driver_call("get", json!({ "name": name })).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    pub async fn delete_worker(&self, name: &str) -> Result<(), WorkerError> {
        self.driver_call("delete", json!({ "name": name })).await?;
        Ok(())
    }
}
