//! Resource service façade.
//!
//! Wires the coordinator, the two store tiers, and the decoder behind one
//! entry point. Hosts call [`ResourceService::load`] and watch the returned
//! request's state channel; everything else (store lookups, delayed
//! downloads, decode, memory-cache population) happens behind it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use bridge_traits::decoder::{DecodeSource, DecodedResource, Decoder};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::transport::Transport;
use core_loader::{
    DownloadCoordinator, LoadError, LoadEvent, LoadOutcome, LoadSpec, ObserverHandle, ObserverId,
    ResourceKey,
};
use core_runtime::config::LoaderConfig;
use core_runtime::events::EventBus;
use core_store::{CachedPayload, MemoryStore, RecordStore};

use crate::error::Result;
use crate::options::{FetchPolicy, LoadOptions, LoadedResource, LoadingState};

/// Everything the service needs, provided explicitly by the host.
pub struct ResourceDependencies {
    pub transport: Arc<dyn Transport>,
    pub records: Arc<dyn RecordStore>,
    pub fs: Arc<dyn FileSystemAccess>,
    pub decoder: Arc<dyn Decoder>,
    pub event_bus: EventBus,
    pub config: LoaderConfig,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct ResourceService {
    coordinator: DownloadCoordinator,
    records: Arc<dyn RecordStore>,
    fs: Arc<dyn FileSystemAccess>,
    decoder: Arc<dyn Decoder>,
    memory: Arc<MemoryStore>,
    event_bus: EventBus,
    config: LoaderConfig,
}

impl ResourceService {
    /// Create a service from explicit dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn new(deps: ResourceDependencies) -> Result<Self> {
        deps.config.validate()?;

        let memory = Arc::new(
            MemoryStore::new(deps.config.memory_cache_max_bytes)
                .with_event_bus(deps.event_bus.clone()),
        );
        let coordinator = DownloadCoordinator::spawn(
            deps.transport,
            deps.records.clone(),
            deps.fs.clone(),
            deps.event_bus.clone(),
            deps.config.clone(),
        );

        Ok(Self {
            coordinator,
            records: deps.records,
            fs: deps.fs,
            decoder: deps.decoder,
            memory,
            event_bus: deps.event_bus,
            config: deps.config,
        })
    }

    /// Start loading a resource.
    ///
    /// Returns immediately with a request handle whose state channel moves
    /// from `Initial` through `InProgress` to `Success` or `Failure`.
    pub async fn load(&self, url: &str, options: LoadOptions) -> Result<ResourceRequest> {
        let key = match &options.identifier {
            Some(identifier) => ResourceKey::new(identifier.as_str()),
            None => ResourceKey::new(url),
        };

        if options.policy.uses_store() {
            if let Some(hit) = self.memory.get(key.as_str()).await {
                debug!(key = %key, "Serving request from memory store");
                return Ok(ResourceRequest::completed(
                    key,
                    LoadingState::Success(LoadedResource {
                        bytes: Some(hit.bytes),
                        file: None,
                        decoded: hit.decoded,
                        max_pixel_size: options.max_pixel_size,
                        from_cache: true,
                    }),
                ));
            }
        }

        if options.policy == FetchPolicy::ReturnStoreDontLoad {
            return self.load_from_disk_only(key, &options).await;
        }

        let (watch_tx, watch_rx) = watch::channel(LoadingState::Initial);
        let (observer, events) = ObserverHandle::new();
        let observer_id = observer.id;
        let observer_sender = observer.sender.clone();
        self.coordinator.attach(key.clone(), observer)?;

        let ctx = FinishContext {
            decoder: self.decoder.clone(),
            memory: self.memory.clone(),
            fs: self.fs.clone(),
            key: key.clone(),
            decode: options.decode,
            max_pixel_size: options.max_pixel_size,
            expires_at: self.expires_at(options.ttl),
        };
        tokio::spawn(drive_request(events, watch_tx, ctx));

        let mut spec = LoadSpec::new(url)
            .stream_to_disk(options.stream_to_disk)
            .skip_store(!options.policy.uses_store());
        if let Some(ttl) = options.ttl {
            spec = spec.ttl(ttl);
        }
        for (name, value) in &options.headers {
            spec = spec.header(name.as_str(), value.as_str());
        }

        match options.policy.download_delay() {
            None => self.coordinator.load(key.clone(), spec)?,
            Some(delay) => {
                // Hold the download back; a cancel during the delay never
                // touches the network, and the memory store gets a second
                // chance in case a concurrent request finished meanwhile.
                let coordinator = self.coordinator.clone();
                let memory = self.memory.clone();
                let second_lookup = self.config.second_store_lookup && options.policy.uses_store();
                let delayed_key = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // All interest may have been withdrawn during the delay;
                    // in that case the network is never touched.
                    if !coordinator.contains_entry(&delayed_key).await {
                        debug!(key = %delayed_key, "Delayed download dropped, no observers left");
                        return;
                    }
                    if second_lookup {
                        if let Some(hit) = memory.get(delayed_key.as_str()).await {
                            debug!(key = %delayed_key, "Second store lookup satisfied request");
                            observer_sender
                                .send(LoadEvent::Completed(LoadOutcome {
                                    bytes: Some(hit.bytes),
                                    file: None,
                                    from_cache: true,
                                }))
                                .ok();
                            coordinator.detach(delayed_key, observer_id).ok();
                            return;
                        }
                    }
                    coordinator.load(delayed_key, spec).ok();
                });
            }
        }

        Ok(ResourceRequest {
            key,
            observer_id: Some(observer_id),
            coordinator: Some(self.coordinator.clone()),
            states: watch_rx,
        })
    }

    /// Cancel the load for a key outright, failing all of its requests.
    pub fn cancel(&self, url: &str) -> Result<()> {
        self.coordinator.cancel(ResourceKey::new(url))?;
        Ok(())
    }

    /// Drop one key from both store tiers.
    pub async fn remove_cached(&self, url: &str) -> Result<()> {
        let key = ResourceKey::new(url);
        self.memory.remove(key.as_str()).await;
        self.records.delete(key.as_str()).await?;
        Ok(())
    }

    /// Drop everything from both store tiers.
    pub async fn remove_all(&self) -> Result<()> {
        self.memory.clear().await;
        self.records.delete_all().await?;
        Ok(())
    }

    /// Sweep expired disk records. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        Ok(self.records.delete_expired().await?)
    }

    /// The bus carrying transfer and cache events.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    async fn load_from_disk_only(
        &self,
        key: ResourceKey,
        options: &LoadOptions,
    ) -> Result<ResourceRequest> {
        let state = match self.records.query(key.as_str()).await? {
            Some(record) => {
                let path = self.records.resolve_path(&record);
                match self.fs.read_file(&path).await {
                    Ok(bytes) => {
                        let ctx = FinishContext {
                            decoder: self.decoder.clone(),
                            memory: self.memory.clone(),
                            fs: self.fs.clone(),
                            key: key.clone(),
                            decode: options.decode,
                            max_pixel_size: options.max_pixel_size,
                            expires_at: record.expires_at,
                        };
                        ctx.finalize(LoadOutcome {
                            bytes: Some(bytes),
                            file: Some(path),
                            from_cache: true,
                        })
                        .await
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Store record unreadable");
                        LoadingState::Failure(LoadError::InconsistentCache(e.to_string()))
                    }
                }
            }
            None => LoadingState::Failure(LoadError::NotCached),
        };
        Ok(ResourceRequest::completed(key, state))
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.or(self.config.record_ttl_default)
            .map(|ttl| chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64)
    }
}

/// Handle to one load request.
pub struct ResourceRequest {
    key: ResourceKey,
    observer_id: Option<ObserverId>,
    coordinator: Option<DownloadCoordinator>,
    states: watch::Receiver<LoadingState>,
}

impl ResourceRequest {
    fn completed(key: ResourceKey, state: LoadingState) -> Self {
        let (_tx, states) = watch::channel(state);
        Self {
            key,
            observer_id: None,
            coordinator: None,
            states,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// A receiver over the request's state changes.
    pub fn states(&self) -> watch::Receiver<LoadingState> {
        self.states.clone()
    }

    /// The most recent state.
    pub fn current(&self) -> LoadingState {
        self.states.borrow().clone()
    }

    /// Wait for the terminal state.
    pub async fn wait(&mut self) -> LoadingState {
        loop {
            let state = self.states.borrow().clone();
            if state.is_terminal() {
                return state;
            }
            if self.states.changed().await.is_err() {
                return self.states.borrow().clone();
            }
        }
    }

    /// Withdraw interest. When this was the last request for the key, the
    /// underlying download is cancelled.
    pub fn detach(&self) {
        if let (Some(coordinator), Some(id)) = (&self.coordinator, self.observer_id) {
            coordinator.detach(self.key.clone(), id).ok();
        }
    }
}

struct FinishContext {
    decoder: Arc<dyn Decoder>,
    memory: Arc<MemoryStore>,
    fs: Arc<dyn FileSystemAccess>,
    key: ResourceKey,
    decode: bool,
    max_pixel_size: Option<u32>,
    expires_at: Option<i64>,
}

impl FinishContext {
    /// Turn a coordinator outcome into the terminal state: materialize
    /// bytes, decode when asked, and populate the memory store.
    async fn finalize(&self, outcome: LoadOutcome) -> LoadingState {
        let bytes = match (&outcome.bytes, &outcome.file) {
            (Some(bytes), _) => Some(bytes.clone()),
            (None, Some(path)) => match self.fs.read_file(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Could not read persisted payload");
                    None
                }
            },
            (None, None) => None,
        };

        let decoded: Option<Arc<dyn DecodedResource>> = if self.decode {
            let Some(bytes) = bytes.clone() else {
                return LoadingState::Failure(LoadError::Decode(
                    "no payload bytes available to decode".to_string(),
                ));
            };
            let decoder = self.decoder.clone();
            let result =
                tokio::task::spawn_blocking(move || decoder.open(DecodeSource::Bytes(bytes)))
                    .await;
            match result {
                Ok(Ok(resource)) => Some(Arc::from(resource)),
                Ok(Err(e)) => return LoadingState::Failure(LoadError::Decode(e.to_string())),
                Err(e) => return LoadingState::Failure(LoadError::Decode(e.to_string())),
            }
        } else {
            None
        };

        if let Some(bytes) = &bytes {
            let mut payload = CachedPayload::new(bytes.clone());
            payload.expires_at = self.expires_at;
            if let Some(decoded) = &decoded {
                payload = payload.with_decoded(decoded.clone());
            }
            self.memory.put(self.key.as_str(), payload).await;
        }

        LoadingState::Success(LoadedResource {
            bytes,
            file: outcome.file,
            decoded,
            max_pixel_size: self.max_pixel_size,
            from_cache: outcome.from_cache,
        })
    }
}

async fn drive_request(
    mut events: mpsc::UnboundedReceiver<LoadEvent>,
    watch_tx: watch::Sender<LoadingState>,
    ctx: FinishContext,
) {
    while let Some(event) = events.recv().await {
        match event {
            LoadEvent::Progress { received, expected } => {
                watch_tx.send_replace(LoadingState::InProgress { received, expected });
            }
            LoadEvent::Partial(_) => {}
            LoadEvent::Completed(outcome) => {
                let state = ctx.finalize(outcome).await;
                watch_tx.send_replace(state);
                return;
            }
            LoadEvent::Failed(error) => {
                watch_tx.send_replace(LoadingState::Failure(error));
                return;
            }
        }
    }
    // The observer channel closed without a terminal event; the request was
    // detached or the coordinator went away.
    watch_tx.send_replace(LoadingState::Failure(LoadError::Cancelled));
}
