//! Partition-scoped cache operations used by the worker.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use super::traits::PartitionState;
use crate::net::{Fetcher, Request, RequestKey, Response, ResponseType};

/// View of one named partition inside a storage backend.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  partition: String,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>, partition: impl Into<String>) -> Self {
    Self {
      storage,
      partition: partition.into(),
    }
  }

  pub fn partition(&self) -> &str {
    &self.partition
  }

  #[allow(dead_code)]
  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn mark(&self, state: PartitionState) -> Result<()> {
    debug!(partition = %self.partition, state = state.as_str(), "marking partition");
    self.storage.set_state(&self.partition, state)
  }

  /// Stored response for the given identity. Only `GET` entries are matched.
  pub fn lookup(&self, key: &RequestKey) -> Result<Option<Response>> {
    if !key.is_get() {
      return Ok(None);
    }
    Ok(
      self
        .storage
        .get(&self.partition, key)?
        .map(|cached| cached.response),
    )
  }

  /// Write one response under the given identity.
  pub fn store(&self, key: &RequestKey, response: &Response) -> Result<()> {
    self.storage.put(&self.partition, key, response)
  }

  /// Fetch every request concurrently and store all of them at once.
  ///
  /// Fails without writing anything if any fetch fails or any response is
  /// not a 2xx. The partition is created by the same write, so a failed
  /// precache never leaves one behind.
  pub async fn precache(&self, requests: &[Request], fetcher: &dyn Fetcher) -> Result<usize> {
    let fetches = requests.iter().map(|request| async move {
      let response = fetcher
        .fetch(request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;

      if !response.ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }

      debug!(url = %request.url, status = response.status, "precached");
      Ok::<_, color_eyre::Report>((request.key(), response))
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&self.partition, &entries)?;

    Ok(entries.len())
  }

  /// Delete every partition other than this one.
  ///
  /// A failed deletion is logged and skipped. Returns the names deleted.
  pub fn prune_stale(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();

    for name in self.storage.names()? {
      if name == self.partition {
        continue;
      }

      info!(partition = %name, "deleting stale cache");
      match self.storage.delete(&name) {
        Ok(true) => deleted.push(name),
        Ok(false) => debug!(partition = %name, "stale cache already gone"),
        Err(e) => warn!(partition = %name, error = %e, "failed to delete stale cache"),
      }
    }

    Ok(deleted)
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      partition: self.partition.clone(),
    }
  }
}

/// Whether a network response may be written to the cache.
pub fn is_cacheable(request: &Request, response: &Response) -> bool {
  response.status == 200
    && response.response_type == ResponseType::Basic
    && request.key().is_get()
}
