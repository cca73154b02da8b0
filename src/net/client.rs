use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::types::{Request, RequestMode, Response, ResponseType};
use crate::config::WorkerConfig;

/// A network request that produced no response at all.
///
/// HTTP error statuses are not failures; they arrive as a [`Response`].
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network request to {url} failed: {message}")]
  Network { url: String, message: String },

  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("failed to read response body from {url}: {message}")]
  Body { url: String, message: String },
}

/// Network fetch capability provided by the host.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Fetcher backed by a `reqwest` client, bound to the worker's origin.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(config: &WorkerConfig, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin.clone(),
    })
  }

  fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  /// Response type as seen from the worker's origin.
  fn classify(&self, mode: RequestMode, final_url: &Url) -> ResponseType {
    if self.is_same_origin(final_url) {
      return ResponseType::Basic;
    }
    match mode {
      RequestMode::NoCors => ResponseType::Opaque,
      _ => ResponseType::Cors,
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();

    if request.mode == RequestMode::SameOrigin && !self.is_same_origin(&request.url) {
      return Err(FetchError::Network {
        url,
        message: "cross-origin request in same-origin mode".to_string(),
      });
    }

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        FetchError::Timeout { url: url.clone() }
      } else {
        FetchError::Network {
          url: url.clone(),
          message: e.to_string(),
        }
      }
    })?;

    let final_url = response.url().clone();
    let response_type = self.classify(request.mode, &final_url);
    if response_type == ResponseType::Opaque {
      return Ok(Response::opaque(Some(final_url.to_string())));
    }

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response.bytes().await.map_err(|e| FetchError::Body {
      url: url.clone(),
      message: e.to_string(),
    })?;

    let mut snapshot = Response::new(status, body)
      .with_type(response_type)
      .with_url(final_url.as_str());
    snapshot.headers = headers;
    Ok(snapshot)
  }
}
