use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::event::{EventOutcome, WorkerEvent, WorkerState};
use super::pending::PendingWork;
use crate::cache::{is_cacheable, CacheLayer, CacheStorage, FetchResult, PartitionState};
use crate::config::WorkerConfig;
use crate::net::{Fetcher, Request, RequestKey, Response};
use crate::notify::{Notification, Notifier};

/// Cache lifecycle manager for one worker version.
///
/// All durable state lives in the storage backend. The only in-memory state
/// is the lifecycle position, so concurrent fetch events never share
/// anything except the partition they read and write.
pub struct CacheWorker<S: CacheStorage> {
  config: WorkerConfig,
  cache: CacheLayer<S>,
  fetcher: Arc<dyn Fetcher>,
  notifier: Arc<dyn Notifier>,
  offline_key: RequestKey,
  state: Mutex<WorkerState>,
  pending: PendingWork,
}

impl<S: CacheStorage + 'static> CacheWorker<S> {
  /// A freshly registered version that still has to install.
  pub fn new(
    config: WorkerConfig,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    Self::with_state(config, storage, fetcher, notifier, WorkerState::Parsed)
  }

  /// A version the host is restarting. It resumes from the state persisted
  /// with its partition; a version that never finished installing starts over.
  pub fn wake(
    config: WorkerConfig,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let state = match storage.state(&config.version)? {
      Some(PartitionState::Active) => WorkerState::Ready,
      Some(PartitionState::Installed) => WorkerState::Installed,
      Some(PartitionState::Pending) | None => WorkerState::Parsed,
    };
    debug!(version = %config.version, state = state.as_str(), "woken");
    Self::with_state(config, storage, fetcher, notifier, state)
  }

  fn with_state(
    config: WorkerConfig,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    state: WorkerState,
  ) -> Result<Self> {
    let offline_key = config.offline_key()?;
    let cache = CacheLayer::new(storage, config.version.clone());

    Ok(Self {
      config,
      cache,
      fetcher,
      notifier,
      offline_key,
      state: Mutex::new(state),
      pending: PendingWork::new(),
    })
  }

  pub fn version(&self) -> &str {
    self.cache.partition()
  }

  pub fn state(&self) -> WorkerState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  /// Work the host must wait for before tearing this worker down.
  pub fn pending(&self) -> &PendingWork {
    &self.pending
  }

  fn set_state(&self, next: WorkerState) {
    match self.state.lock() {
      Ok(mut state) => *state = next,
      Err(poisoned) => *poisoned.into_inner() = next,
    }
  }

  /// Move to `next` if the current state is one of `allowed`.
  fn transition(
    &self,
    action: &str,
    allowed: &[WorkerState],
    next: WorkerState,
  ) -> Result<WorkerState> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let current = *state;
    if !allowed.contains(&current) {
      return Err(eyre!(
        "Cannot {} worker {} while it is {}",
        action,
        self.cache.partition(),
        current.as_str()
      ));
    }

    *state = next;
    Ok(current)
  }

  /// Route a host event to its handler.
  ///
  /// The event counts as pending work until its handler finishes.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    let _token = self.pending.acquire();
    debug!(
      event = event.name(),
      version = %self.version(),
      state = self.state().as_str(),
      "dispatching event"
    );

    match event {
      WorkerEvent::Install => self
        .install()
        .await
        .map(|cached| EventOutcome::Installed { cached }),
      WorkerEvent::Activate => self
        .activate()
        .await
        .map(|deleted| EventOutcome::Activated { deleted }),
      WorkerEvent::FetchIntercept(request) => {
        self.handle_fetch(request).await.map(EventOutcome::Responded)
      }
      WorkerEvent::Push(payload) => Ok(EventOutcome::Notified(
        self.handle_push(payload.as_deref()).await,
      )),
    }
  }

  /// Precache every manifest entry into this version's partition.
  ///
  /// On any failure nothing is stored and the worker becomes redundant.
  pub async fn install(&self) -> Result<usize> {
    self.transition("install", &[WorkerState::Parsed], WorkerState::Installing)?;
    info!(version = %self.version(), "installing");

    let result = async {
      let requests = self.config.manifest_requests()?;
      info!(assets = requests.len(), "caching assets");
      let cached = self.cache.precache(&requests, self.fetcher.as_ref()).await?;
      self.cache.mark(PartitionState::Installed)?;
      Ok::<_, color_eyre::Report>(cached)
    }
    .await;

    match result {
      Ok(cached) => {
        self.set_state(WorkerState::Installed);
        info!(version = %self.version(), cached, "installed");
        Ok(cached)
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        warn!(version = %self.version(), error = %e, "install failed");
        Err(e.wrap_err(format!("Install of {} failed", self.version())))
      }
    }
  }

  /// Delete every partition that is not the current version, then record
  /// this version as active.
  ///
  /// Safe to repeat: a second run finds nothing stale.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let previous = self.transition(
      "activate",
      &[WorkerState::Installed, WorkerState::Ready],
      WorkerState::Activating,
    )?;
    info!(version = %self.version(), "activating");

    let result = self
      .cache
      .prune_stale()
      .and_then(|deleted| self.cache.mark(PartitionState::Active).map(|()| deleted));

    match result {
      Ok(deleted) => {
        self.set_state(WorkerState::Ready);
        info!(version = %self.version(), deleted = deleted.len(), "activated");
        Ok(deleted)
      }
      Err(e) => {
        self.set_state(previous);
        Err(e.wrap_err(format!("Activation of {} failed", self.version())))
      }
    }
  }

  /// Answer an intercepted request cache-first.
  ///
  /// 1. Serve a stored response if there is one
  /// 2. Otherwise fetch; store eligible responses in the background
  /// 3. On network failure serve the offline page, or propagate the failure
  pub async fn handle_fetch(&self, request: Request) -> Result<FetchResult> {
    if self.state() != WorkerState::Ready {
      debug!(url = %request.url, "worker not active, passing through");
      let response = self.fetcher.fetch(&request).await?;
      return Ok(FetchResult::passthrough(response));
    }

    let key = request.key();
    if let Some(response) = self.lookup(key.clone()).await? {
      debug!(%key, "cache hit");
      return Ok(FetchResult::from_cache(response));
    }

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        if is_cacheable(&request, &response) {
          self.store_in_background(key, response.clone());
        } else {
          debug!(
            %key,
            status = response.status,
            response_type = %response.response_type,
            "response not cacheable"
          );
        }
        Ok(FetchResult::from_network(response))
      }
      Err(e) => {
        warn!(%key, error = %e, "network fetch failed");
        match self.lookup(self.offline_key.clone()).await {
          Ok(Some(fallback)) => Ok(FetchResult::offline(fallback)),
          Ok(None) => Err(e.into()),
          Err(lookup_err) => {
            warn!(error = %lookup_err, "offline page lookup failed");
            Err(e.into())
          }
        }
      }
    }
  }

  /// Read from the current partition on the blocking pool, so a read waiting
  /// on the storage lock never stalls other events.
  async fn lookup(&self, key: RequestKey) -> Result<Option<Response>> {
    let cache = self.cache.clone();
    tokio::task::spawn_blocking(move || cache.lookup(&key))
      .await
      .map_err(|e| eyre!("Cache lookup task failed: {}", e))?
  }

  /// Write a response without holding up its delivery.
  fn store_in_background(&self, key: RequestKey, response: Response) {
    let cache = self.cache.clone();
    let token = self.pending.acquire();

    tokio::task::spawn_blocking(move || {
      let _token = token;
      match cache.store(&key, &response) {
        Ok(()) => debug!(%key, partition = cache.partition(), "stored"),
        Err(e) => warn!(%key, error = %e, "failed to store response"),
      }
    });
  }

  /// Show a notification for a push payload. Display failures are logged only.
  pub async fn handle_push(&self, payload: Option<&str>) -> Notification {
    let notification = self.config.notification_for(payload);
    if let Err(e) = self.notifier.show(&notification).await {
      warn!(error = %e, "failed to show notification");
    }
    notification
  }
}
