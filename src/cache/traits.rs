//! Core types shared by the storage backends and the worker.

use chrono::{DateTime, Utc};

use crate::net::Response;

/// A response snapshot read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}

/// Lifecycle position persisted alongside a partition, so a restarted host
/// resumes a version where the last run left it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartitionState {
  /// Created, precache not committed
  #[default]
  Pending,
  /// Every manifest entry committed; waiting for activation
  Installed,
  /// Activation completed; this version serves fetches
  Active,
}

impl PartitionState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Installed => "installed",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(Self::Pending),
      "installed" => Some(Self::Installed),
      "active" => Some(Self::Active),
      _ => None,
    }
  }
}

/// Result of an intercepted fetch, including where the response came from.
#[derive(Debug, Clone)]
pub struct FetchResult {
  pub response: Response,
  pub source: ResponseSource,
}

impl FetchResult {
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::OfflineFallback,
    }
  }

  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from the current partition without touching the network
  Cache,
  /// Fetched from the network (and stored if eligible)
  Network,
  /// Network unavailable, serving the offline page
  OfflineFallback,
  /// Worker not active yet; the network answered without the cache
  Passthrough,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Cache => "cache",
      Self::Network => "network",
      Self::OfflineFallback => "offline-fallback",
      Self::Passthrough => "passthrough",
    }
  }
}
