// Blocking HTTP helpers shared by the upstream fetchers. Callers on the async
// side run these through `spawn_blocking`.

use crate::error::{BoardError, Result};
use reqwest::blocking;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub fn create_http_client(timeout: Duration) -> Result<blocking::Client> {
    blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to create HTTP client: {}", e)))
}

/// GETs `url` and decodes the JSON body.
pub fn get_json<T: DeserializeOwned>(
    client: &blocking::Client,
    source: &str,
    url: &str,
    query: &[(&str, String)],
) -> Result<T> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to fetch {}: {}", source, e)))?;

    if !response.status().is_success() {
        return Err(BoardError::from_status(source, response.status()));
    }

    let body = response
        .text()
        .map_err(|e| BoardError::UpstreamUnavailable(format!("Failed to read {} response: {}", source, e)))?;

    serde_json::from_str(&body)
        .map_err(|e| BoardError::DecodeError(format!("Failed to parse {} response: {}", source, e)))
}
