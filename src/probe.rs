use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(4))
        .no_proxy()
        .build()
        .context("Failed to build HTTP client")
}

/// Check that a running service answers `GET /health` with `{"status":"ok"}`
pub async fn check_health(client: &Client, endpoint: &str) -> Result<()> {
    let url = format!("{}/health", endpoint.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    if !resp.status().is_success() {
        bail!("health endpoint returned {}", resp.status());
    }

    let health: HealthResponse = resp
        .json()
        .await
        .context("Health endpoint returned an unexpected body")?;
    if health.status != "ok" {
        bail!("service reported status {:?}", health.status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthy_service() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "ok"}"#)
            .create_async()
            .await;

        let client = build_http_client().unwrap();
        check_health(&client, &format!("{}/", server.url())).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let client = build_http_client().unwrap();
        let err = check_health(&client, &server.url()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_unexpected_status_value() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status": "degraded"}"#)
            .create_async()
            .await;

        let client = build_http_client().unwrap();
        let err = check_health(&client, &server.url()).await.unwrap_err();
        assert!(err.to_string().contains("degraded"));
    }

    #[tokio::test]
    async fn test_non_json_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("fine")
            .create_async()
            .await;

        let client = build_http_client().unwrap();
        let err = check_health(&client, &server.url()).await.unwrap_err();
        assert!(err.to_string().contains("unexpected body"));
    }
}
