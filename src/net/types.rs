//! Request and response snapshots exchanged between the worker, the network
//! and the cache partitions.

use bytes::Bytes;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// How a request was issued, which decides the response type of a
/// cross-origin answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Cross-origin requests fail outright
  SameOrigin,
  /// Cross-origin responses are readable (`cors` type)
  Cors,
  /// Cross-origin responses are opaque
  #[default]
  NoCors,
}

impl RequestMode {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "same-origin" => Some(Self::SameOrigin),
      "cors" => Some(Self::Cors),
      "no-cors" => Some(Self::NoCors),
      _ => None,
    }
  }
}

/// An intercepted network request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain `GET` for the given URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      headers: Vec::new(),
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Canonical identity of this request inside a cache partition.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Canonical request identity: upper-case method plus absolute URL without
/// its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_uppercase(),
      url: url.to_string(),
    }
  }

  /// Identity of a `GET` for the given URL.
  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// Only `GET` entries may be matched or stored.
  pub fn is_get(&self) -> bool {
    self.method == Method::GET.as_str()
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Where a response came from relative to the requesting origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response obtained in CORS mode
  Cors,
  /// Cross-origin response with hidden status, headers and body
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

impl fmt::Display for ResponseType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A fully buffered response snapshot.
///
/// The body is an immutable `Bytes` buffer, so a clone is an independent
/// copy that can be stored while the other is handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub response_type: ResponseType,
  /// Final URL after redirects, if known
  pub url: Option<String>,
}

impl Response {
  /// A same-origin response with the given status and body.
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      status_text: reason_phrase(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      url: None,
    }
  }

  /// An opaque cross-origin response: status 0, no headers, no body.
  pub fn opaque(url: Option<String>) -> Self {
    Self {
      status: 0,
      status_text: String::new(),
      headers: Vec::new(),
      body: Bytes::new(),
      response_type: ResponseType::Opaque,
      url,
    }
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  #[allow(dead_code)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

fn reason_phrase(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_drops_fragment() {
    let a = RequestKey::get(&url("http://localhost:8000/page#top"));
    let b = RequestKey::get(&url("http://localhost:8000/page"));
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_key_distinguishes_method_and_query() {
    let get = RequestKey::get(&url("http://localhost:8000/api?x=1"));
    let post = RequestKey::new(&Method::POST, &url("http://localhost:8000/api?x=1"));
    let other = RequestKey::get(&url("http://localhost:8000/api?x=2"));

    assert_ne!(get.cache_hash(), post.cache_hash());
    assert_ne!(get.cache_hash(), other.cache_hash());
    assert!(get.is_get());
    assert!(!post.is_get());
  }

  #[test]
  fn test_response_ok_range() {
    assert!(Response::new(200, "").ok());
    assert!(Response::new(204, "").ok());
    assert!(!Response::new(304, "").ok());
    assert!(!Response::new(404, "").ok());
    assert!(!Response::opaque(None).ok());
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = Response::new(200, "x").with_header("Content-Type", "text/css");
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_response_type_parse() {
    for t in [ResponseType::Basic, ResponseType::Cors, ResponseType::Opaque] {
      assert_eq!(ResponseType::parse(t.as_str()), Some(t));
    }
    assert_eq!(ResponseType::parse("error"), None);
  }
}
