use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{ApiConfig, Config};

use super::types::{CancelTarget, LiveStatus, Page};
use super::SyncApi;

/// HTTP client for the sync service's REST API.
#[derive(Clone)]
pub struct ApiClient {
  http: Client,
  base: Url,
  token: Option<String>,
  api: ApiConfig,
}

#[derive(Serialize)]
struct PageQuery<'a> {
  page: u32,
  limit: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  search: Option<&'a str>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.url, e))?;

    let http = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: Config::get_api_token(),
      api: config.clone(),
    })
  }

  /// Host (and port) of the service, for display
  pub fn host(&self) -> String {
    match (self.base.host_str(), self.base.port()) {
      (Some(host), Some(port)) => format!("{}:{}", host, port),
      (Some(host), None) => host.to_string(),
      _ => self.base.to_string(),
    }
  }

  fn url(&self, path: &str) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      self.base.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| eyre!("Invalid endpoint {}: {}", joined, e))
  }

  /// Endpoint with one more path segment appended, percent-encoded.
  fn url_with_segment(&self, path: &str, segment: &str) -> Result<Url> {
    let mut url = self.url(path)?;
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Endpoint {} cannot take a path segment", path))?
      .pop_if_empty()
      .push(segment);
    Ok(url)
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn check(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(path, %status, body = %body.chars().take(256).collect::<String>(), "API error response");
    Err(eyre!("{} returned {}", path, status))
  }

  /// Performs a GET request with query parameters and deserializes the JSON response.
  async fn get_json<T, Q>(&self, path: &str, query: &Q) -> Result<T>
  where
    T: DeserializeOwned,
    Q: Serialize + ?Sized,
  {
    let request = self.authorize(self.http.get(self.url(path)?).query(query));
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    Self::check(path, response)
      .await?
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }

  /// Performs a POST request with an empty body.
  async fn post(&self, path: &str, url: Url) -> Result<()> {
    let request = self.authorize(self.http.post(url));
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    Self::check(path, response).await?;
    Ok(())
  }

  /// Fetch one page of a paginated resource, e.g. "processed" or "lists".
  pub async fn get_page<T: DeserializeOwned>(
    &self,
    resource: &str,
    page: u32,
    limit: u32,
    search: Option<&str>,
  ) -> Result<Page<T>> {
    let path = format!(
      "{}/{}",
      self.api.resource_prefix.trim_end_matches('/'),
      resource
    );
    self
      .get_json(&path, &PageQuery {
        page,
        limit,
        search,
      })
      .await
  }

  /// Open the server-sent event stream. The caller owns the response body.
  pub async fn open_events(&self) -> Result<Response> {
    let path = &self.api.events_path;
    // The stream is long-lived, so the per-request timeout must not apply
    let request = self.authorize(
      self
        .http
        .get(self.url(path)?)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .timeout(Duration::from_secs(60 * 60 * 24 * 365)),
    );
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to open event stream: {}", e))?;
    Self::check(path, response).await
  }
}

impl SyncApi for ApiClient {
  async fn live_status(&self) -> Result<LiveStatus> {
    self.get_json(&self.api.status_path, &()).await
  }

  async fn trigger_sync(&self) -> Result<()> {
    let path = &self.api.trigger_path;
    self.post(path, self.url(path)?).await
  }

  async fn cancel_sync(&self, target: CancelTarget) -> Result<()> {
    let path = &self.api.cancel_path;
    self
      .post(path, self.url_with_segment(path, target.path_segment())?)
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(url: &str) -> ApiClient {
    ApiClient::new(&ApiConfig {
      url: url.to_string(),
      ..ApiConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn test_url_joining() {
    let api = client("http://localhost:4222/");
    assert_eq!(
      api.url("/api/sync/status/live").unwrap().as_str(),
      "http://localhost:4222/api/sync/status/live"
    );

    let api = client("https://example.com/listsync");
    assert_eq!(
      api.url("api/processed").unwrap().as_str(),
      "https://example.com/listsync/api/processed"
    );
  }

  #[test]
  fn test_cancel_segment_is_encoded() {
    let api = client("http://localhost:4222");
    assert_eq!(
      api.url_with_segment("/api/sync/cancel", "current").unwrap().as_str(),
      "http://localhost:4222/api/sync/cancel/current"
    );
    assert_eq!(
      api.url_with_segment("/api/sync/cancel/", "run 7/b?x").unwrap().as_str(),
      "http://localhost:4222/api/sync/cancel/run%207%2Fb%3Fx"
    );
  }

  #[test]
  fn test_host() {
    assert_eq!(client("http://localhost:4222").host(), "localhost:4222");
    assert_eq!(client("https://sync.example.com/x").host(), "sync.example.com");
  }

  #[test]
  fn test_rejects_invalid_url() {
    assert!(ApiClient::new(&ApiConfig {
      url: "not a url".to_string(),
      ..ApiConfig::default()
    })
    .is_err());
  }
}
