//! HTTP client for end-to-end tests
//!
//! Plays the workflow engine's side of the webhook contract. When routes or
//! payloads change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn get_home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn catalog_result(&self, apply_id: &str, result: &str) -> Response {
        self.post(
            "/v1/workflow/catalog/result",
            json!({"apply_id": apply_id, "result": result}),
        )
        .await
    }

    pub async fn catalog_process(&self, body: serde_json::Value) -> Response {
        self.post("/v1/workflow/catalog/process", body).await
    }

    pub async fn download_result(&self, apply_id: &str, result: &str) -> Response {
        self.post(
            "/v1/workflow/download/result",
            json!({"apply_id": apply_id, "result": result}),
        )
        .await
    }

    pub async fn download_process(&self, body: serde_json::Value) -> Response {
        self.post("/v1/workflow/download/process", body).await
    }

    pub async fn proc_def_deleted(&self, proc_def_keys: &[&str]) -> Response {
        self.post(
            "/v1/workflow/proc-def-deleted",
            json!({ "proc_def_keys": proc_def_keys }),
        )
        .await
    }
}
