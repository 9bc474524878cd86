//! Download Coordinator
//!
//! One task owns the registry of in-flight loads. All mutation funnels
//! through its command channel, so per-key state needs no locking and
//! observer bookkeeping can never race a transfer event.
//!
//! Coordination rules:
//! - One entry per key. Concurrent loads for the same key coalesce onto the
//!   same entry and its observers all receive the same events (single-flight).
//! - The disk store is consulted before the network. A valid record short-
//!   circuits the transfer entirely.
//! - Retryable transport failures are retried transparently with exponential
//!   backoff. Observers hear about a failure only when retries are exhausted.
//! - Detaching the last observer cancels the transfer. Cancellation is
//!   acknowledged asynchronously; a reload arriving meanwhile is parked and
//!   replayed once the old attempt confirms it stopped.
//! - Events are tagged with the attempt number that produced them; events
//!   from a superseded attempt are dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::transport::{
    TransferDestination, TransferEvent, TransferHandle, TransferRequest, Transport,
    TransportFailure,
};
use core_runtime::config::LoaderConfig;
use core_runtime::events::{EventBus, LoaderEvent};
use core_store::{RecordStore, StoreRecord};

use crate::error::LoadError;
use crate::key::ResourceKey;
use crate::observer::{LoadEvent, LoadOutcome, ObserverHandle, ObserverId};
use crate::state::EntryState;

/// What to fetch for a key, and how.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub url: String,
    pub headers: HashMap<String, String>,
    /// TTL for the persisted record. Falls back to the configured default.
    pub ttl: Option<Duration>,
    /// Stream the body to a file instead of accumulating it in memory.
    pub stream_to_disk: bool,
    /// Skip the disk pre-check and always hit the network.
    pub skip_store: bool,
}

impl LoadSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            ttl: None,
            stream_to_disk: false,
            skip_store: false,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stream_to_disk(mut self, enabled: bool) -> Self {
        self.stream_to_disk = enabled;
        self
    }

    pub fn skip_store(mut self, enabled: bool) -> Self {
        self.skip_store = enabled;
        self
    }
}

enum Command {
    Attach {
        key: ResourceKey,
        observer: ObserverHandle,
    },
    Detach {
        key: ResourceKey,
        id: ObserverId,
    },
    Load {
        key: ResourceKey,
        spec: LoadSpec,
    },
    Cancel {
        key: ResourceKey,
    },
    ContainsEntry {
        key: ResourceKey,
        reply: oneshot::Sender<bool>,
    },
    QueryState {
        key: ResourceKey,
        reply: oneshot::Sender<Option<EntryState>>,
    },
    Transfer {
        key: ResourceKey,
        attempt: u32,
        event: TransferEvent,
    },
    StartAttempt {
        key: ResourceKey,
        attempt: u32,
    },
    Shutdown,
}

struct Entry {
    state: EntryState,
    spec: Option<LoadSpec>,
    observers: Vec<ObserverHandle>,
    /// Attempt generation. Events tagged with another generation are stale.
    attempt: u32,
    retries_done: u32,
    handle: Option<TransferHandle>,
    buffer: BytesMut,
    received: u64,
    expected: Option<u64>,
    temp_file: Option<PathBuf>,
    /// Reload requested while a cancellation was still being acknowledged.
    pending_reload: Option<LoadSpec>,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: EntryState::Initial,
            spec: None,
            observers: Vec::new(),
            attempt: 0,
            retries_done: 0,
            handle: None,
            buffer: BytesMut::new(),
            received: 0,
            expected: None,
            temp_file: None,
            pending_reload: None,
        }
    }

    fn transition(&mut self, key: &ResourceKey, next: EntryState) -> bool {
        if self.state.can_transition(next) {
            debug!(key = %key, from = %self.state, to = %next, "Entry state transition");
            self.state = next;
            true
        } else {
            warn!(key = %key, from = %self.state, to = %next, "Rejected entry state transition");
            false
        }
    }

    fn notify_all(&self, event: LoadEvent) {
        for observer in &self.observers {
            observer.notify(event.clone());
        }
    }

    fn reset_attempt_buffers(&mut self) {
        self.buffer = BytesMut::new();
        self.received = 0;
        self.expected = None;
        self.temp_file = None;
    }
}

/// Handle to the coordinator task. Cheap to clone; all clones talk to the
/// same registry.
#[derive(Clone)]
pub struct DownloadCoordinator {
    tx: mpsc::UnboundedSender<Command>,
}

impl DownloadCoordinator {
    /// Spawn the coordinator task with its collaborators.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        records: Arc<dyn RecordStore>,
        fs: Arc<dyn FileSystemAccess>,
        event_bus: EventBus,
        config: LoaderConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = CoordinatorTask {
            transport,
            records,
            fs,
            event_bus,
            config,
            entries: HashMap::new(),
            tx: tx.clone(),
        };
        tokio::spawn(task.run(rx));
        Self { tx }
    }

    /// Attach an observer to a key, creating the entry if needed.
    ///
    /// The observer receives every subsequent event for the key until it
    /// detaches or a terminal event arrives.
    pub fn attach(&self, key: ResourceKey, observer: ObserverHandle) -> Result<(), LoadError> {
        self.send(Command::Attach { key, observer })
    }

    /// Detach an observer. Detaching the last observer cancels the load.
    pub fn detach(&self, key: ResourceKey, id: ObserverId) -> Result<(), LoadError> {
        self.send(Command::Detach { key, id })
    }

    /// Request a load. Coalesces with any in-flight load for the same key.
    pub fn load(&self, key: ResourceKey, spec: LoadSpec) -> Result<(), LoadError> {
        self.send(Command::Load { key, spec })
    }

    /// Cancel a load outright, failing all attached observers.
    pub fn cancel(&self, key: ResourceKey) -> Result<(), LoadError> {
        self.send(Command::Cancel { key })
    }

    /// Whether the registry currently holds an entry for the key.
    pub async fn contains_entry(&self, key: &ResourceKey) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .send(Command::ContainsEntry {
                key: key.clone(),
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Current state of the entry for a key, if one exists.
    pub async fn entry_state(&self, key: &ResourceKey) -> Option<EntryState> {
        let (reply, rx) = oneshot::channel();
        if self
            .send(Command::QueryState {
                key: key.clone(),
                reply,
            })
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Stop the coordinator, cancelling every in-flight transfer.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown).ok();
    }

    fn send(&self, command: Command) -> Result<(), LoadError> {
        self.tx
            .send(command)
            .map_err(|_| LoadError::CoordinatorGone)
    }
}

struct CoordinatorTask {
    transport: Arc<dyn Transport>,
    records: Arc<dyn RecordStore>,
    fs: Arc<dyn FileSystemAccess>,
    event_bus: EventBus,
    config: LoaderConfig,
    entries: HashMap<ResourceKey, Entry>,
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("Download coordinator started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Attach { key, observer } => self.handle_attach(key, observer),
                Command::Detach { key, id } => self.handle_detach(key, id),
                Command::Load { key, spec } => self.handle_load(key, spec).await,
                Command::Cancel { key } => self.handle_cancel(key),
                Command::ContainsEntry { key, reply } => {
                    reply.send(self.entries.contains_key(&key)).ok();
                }
                Command::QueryState { key, reply } => {
                    reply.send(self.entries.get(&key).map(|e| e.state)).ok();
                }
                Command::Transfer {
                    key,
                    attempt,
                    event,
                } => self.handle_transfer_event(key, attempt, event).await,
                Command::StartAttempt { key, attempt } => {
                    self.handle_start_attempt(key, attempt).await
                }
                Command::Shutdown => break,
            }
        }
        for (key, entry) in self.entries.drain() {
            if let Some(handle) = entry.handle {
                debug!(key = %key, "Cancelling transfer on shutdown");
                handle.cancel();
            }
        }
        info!("Download coordinator stopped");
    }

    fn handle_attach(&mut self, key: ResourceKey, observer: ObserverHandle) {
        let entry = self.entries.entry(key.clone()).or_insert_with(Entry::new);
        if entry.observers.iter().any(|o| o.id == observer.id) {
            debug!(key = %key, observer = %observer.id, "Duplicate attach ignored");
            return;
        }
        debug!(key = %key, observer = %observer.id, "Observer attached");
        entry.observers.push(observer);
    }

    fn handle_detach(&mut self, key: ResourceKey, id: ObserverId) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        let before = entry.observers.len();
        entry.observers.retain(|o| o.id != id);
        if entry.observers.len() == before {
            debug!(key = %key, observer = %id, "Detach for unknown observer ignored");
            return;
        }
        debug!(key = %key, observer = %id, "Observer detached");

        let state = entry.state;
        if entry.observers.is_empty() {
            if state.is_active() {
                self.begin_cancel(&key, false);
            } else if state == EntryState::Initial {
                // Nothing was ever scheduled; drop the idle entry so it
                // cannot linger in the registry.
                debug!(key = %key, "Removing idle entry after last observer detached");
                self.entries.remove(&key);
            }
        }
    }

    fn handle_cancel(&mut self, key: ResourceKey) {
        if self.entries.contains_key(&key) {
            self.begin_cancel(&key, true);
        }
    }

    /// Start cancelling an entry. With `notify`, attached observers receive a
    /// terminal `Failed(Cancelled)` before being dropped.
    fn begin_cancel(&mut self, key: &ResourceKey, notify: bool) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if notify {
            entry.notify_all(LoadEvent::Failed(LoadError::Cancelled));
        }
        entry.observers.clear();

        match entry.handle.take() {
            Some(handle) => {
                // The transfer acknowledges with its terminal event; the
                // entry lingers in Cancelling until then.
                handle.cancel();
                entry.transition(key, EntryState::Cancelling);
            }
            None => {
                // Nothing in flight (pre-check or retry timer pending); the
                // entry can be torn down immediately.
                entry.transition(key, EntryState::Cancelling);
                self.finish_cancelled(key);
            }
        }
    }

    fn finish_cancelled(&mut self, key: &ResourceKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if !entry.transition(key, EntryState::Cancelled) {
            return;
        }
        self.event_bus
            .emit(LoaderEvent::TransferCancelled {
                key: key.to_string(),
            })
            .ok();

        let pending = self
            .entries
            .get_mut(key)
            .and_then(|e| e.pending_reload.take());
        let survivors = match self.entries.remove(key) {
            Some(entry) => entry.observers,
            None => Vec::new(),
        };

        if let Some(spec) = pending {
            if survivors.is_empty() {
                debug!(key = %key, "Dropping parked reload, no observers remain");
                return;
            }
            // A reload arrived while we were cancelling. Start over with a
            // fresh entry, keeping observers that attached in the meantime.
            let mut entry = Entry::new();
            entry.observers = survivors;
            self.entries.insert(key.clone(), entry);
            self.tx
                .send(Command::Load {
                    key: key.clone(),
                    spec,
                })
                .ok();
        }
    }

    async fn handle_load(&mut self, key: ResourceKey, spec: LoadSpec) {
        let entry = self.entries.entry(key.clone()).or_insert_with(Entry::new);
        match entry.state {
            EntryState::Initial => {
                entry.spec = Some(spec);
                if entry.transition(&key, EntryState::Scheduled) {
                    self.start_load(&key).await;
                }
            }
            EntryState::Scheduled | EntryState::Loading | EntryState::Finishing => {
                // Single-flight: the in-progress load serves this request.
                // The longest-lived caller's TTL wins on the persisted record.
                debug!(key = %key, state = %entry.state, "Load coalesced with in-flight entry");
                if let Some(existing) = entry.spec.as_mut() {
                    existing.ttl = match (existing.ttl, spec.ttl) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                }
            }
            EntryState::Cancelling => {
                debug!(key = %key, "Reload parked until cancellation is acknowledged");
                entry.pending_reload = Some(spec);
            }
            EntryState::Finished | EntryState::Failed | EntryState::Cancelled => {
                // Terminal entries leave the registry immediately, so this
                // indicates a bookkeeping bug rather than a caller error.
                warn!(key = %key, state = %entry.state, "Load against terminal entry ignored");
            }
        }
    }

    /// Disk pre-check, then the network if the store cannot serve the key.
    async fn start_load(&mut self, key: &ResourceKey) {
        let skip_store = self
            .entries
            .get(key)
            .and_then(|e| e.spec.as_ref())
            .map(|s| s.skip_store)
            .unwrap_or(false);
        if skip_store {
            self.start_network_attempt(key).await;
            return;
        }

        match self.records.query(key.as_str()).await {
            Ok(Some(record)) => {
                let path = self.records.resolve_path(&record);
                match self.fs.read_file(&path).await {
                    Ok(bytes) => {
                        debug!(key = %key, bytes = bytes.len(), "Serving payload from disk store");
                        self.finish_success(key, Some(bytes), Some(path), true);
                        return;
                    }
                    Err(e) => {
                        // The record said the file was there. Drop the record
                        // and fetch fresh.
                        warn!(key = %key, error = %e, "Store record unreadable, refetching");
                        self.records.delete(key.as_str()).await.ok();
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Disk pre-check failed, falling back to network");
            }
        }
        self.start_network_attempt(key).await;
    }

    async fn start_network_attempt(&mut self, key: &ResourceKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let Some(spec) = entry.spec.clone() else {
            warn!(key = %key, "Attempt requested without a load spec");
            return;
        };

        entry.attempt += 1;
        entry.reset_attempt_buffers();
        let attempt = entry.attempt;

        let destination = if spec.stream_to_disk {
            match self.temp_destination(key).await {
                Ok(path) => TransferDestination::OnDisk(path),
                Err(e) => {
                    warn!(key = %key, error = %e, "Temp file unavailable, buffering in memory");
                    TransferDestination::InMemory
                }
            }
        } else {
            TransferDestination::InMemory
        };

        let mut request = TransferRequest::new(spec.url.as_str())
            .destination(destination)
            .timeout(self.config.download_timeout)
            .header("User-Agent", self.config.user_agent.as_str());
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = match self.transport.start_transfer(request, events_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_attempt(key, TransportFailure::fatal(e.to_string()))
                    .await;
                return;
            }
        };

        // Pump transfer events into the command channel, tagged with the
        // attempt that produced them.
        let tx = self.tx.clone();
        let pump_key = key.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if tx
                    .send(Command::Transfer {
                        key: pump_key.clone(),
                        attempt,
                        event,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        let entry = match self.entries.get_mut(key) {
            Some(entry) => entry,
            None => {
                handle.cancel();
                return;
            }
        };
        entry.handle = Some(handle);
        entry.transition(key, EntryState::Loading);

        self.event_bus
            .emit(LoaderEvent::TransferStarted {
                key: key.to_string(),
                attempt,
            })
            .ok();
    }

    async fn temp_destination(&self, key: &ResourceKey) -> Result<PathBuf, LoadError> {
        let cache_dir = self
            .fs
            .get_cache_directory()
            .await
            .map_err(|e| LoadError::Persist(e.to_string()))?;
        let tmp_dir = cache_dir.join("partial");
        self.fs
            .create_dir_all(&tmp_dir)
            .await
            .map_err(|e| LoadError::Persist(e.to_string()))?;
        Ok(tmp_dir.join(format!("{}.part", core_store::file_name_for_key(key.as_str()))))
    }

    async fn handle_transfer_event(
        &mut self,
        key: ResourceKey,
        attempt: u32,
        event: TransferEvent,
    ) {
        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(key = %key, "Transfer event for unknown entry dropped");
            return;
        };
        if entry.attempt != attempt {
            debug!(
                key = %key,
                event_attempt = attempt,
                current_attempt = entry.attempt,
                "Stale transfer event dropped"
            );
            return;
        }

        if entry.state == EntryState::Cancelling {
            // Only the terminal acknowledgement matters now.
            if matches!(event, TransferEvent::Completed | TransferEvent::Failed(_)) {
                self.finish_cancelled(&key);
            }
            return;
        }

        match event {
            TransferEvent::ResponseReceived { status, headers } => {
                entry.expected = headers
                    .get("content-length")
                    .or_else(|| headers.get("Content-Length"))
                    .and_then(|v| v.parse().ok());
                debug!(key = %key, status, expected = ?entry.expected, "Response received");
            }
            TransferEvent::BytesReceived(chunk) => {
                entry.received += chunk.len() as u64;
                entry.buffer.extend_from_slice(&chunk);
                entry.notify_all(LoadEvent::Partial(chunk));
                let (received, expected) = (entry.received, entry.expected);
                entry.notify_all(LoadEvent::Progress { received, expected });
                self.event_bus
                    .emit(LoaderEvent::TransferProgress {
                        key: key.to_string(),
                        received,
                        expected,
                    })
                    .ok();
            }
            TransferEvent::BytesWritten { total, expected } => {
                entry.received = total;
                entry.expected = expected.or(entry.expected);
                let expected = entry.expected;
                entry.notify_all(LoadEvent::Progress {
                    received: total,
                    expected,
                });
                self.event_bus
                    .emit(LoaderEvent::TransferProgress {
                        key: key.to_string(),
                        received: total,
                        expected,
                    })
                    .ok();
            }
            TransferEvent::FileReady(path) => {
                entry.temp_file = Some(path);
            }
            TransferEvent::Completed => {
                if entry.transition(&key, EntryState::Finishing) {
                    self.finish_attempt(&key).await;
                }
            }
            TransferEvent::Failed(failure) => {
                self.fail_attempt(&key, failure).await;
            }
        }
    }

    /// Persist and deliver a completed attempt.
    async fn finish_attempt(&mut self, key: &ResourceKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.handle = None;
        let spec = entry.spec.clone();
        let temp_file = entry.temp_file.take();
        // An in-memory transfer with an empty body is still a delivered
        // payload; only a disk-streamed transfer leaves the buffer
        // legitimately empty.
        let bytes = if temp_file.is_some() && entry.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut entry.buffer).freeze())
        };

        let ttl = spec
            .as_ref()
            .and_then(|s| s.ttl)
            .or(self.config.record_ttl_default);
        let mut record = StoreRecord::new(key.as_str());
        if let Some(ttl) = ttl {
            record = record.with_ttl(ttl);
        }
        if let Some(spec) = &spec {
            record = record.with_original_url(spec.url.as_str());
        }
        let final_path = self.records.resolve_path(&record);

        // Persisting is best-effort. A failure here downgrades the result to
        // a network-only delivery, it never fails the load.
        let persisted_file = match (temp_file, &bytes) {
            (Some(temp), _) => match self.persist_file(&temp, &final_path, &record).await {
                Ok(()) => Some(final_path),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to persist downloaded file");
                    None
                }
            },
            (None, Some(bytes)) => match self.persist_bytes(bytes, &final_path, &record).await {
                Ok(()) => Some(final_path),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to persist payload");
                    None
                }
            },
            (None, None) => None,
        };

        // A disk-streamed payload that failed to persist has no bytes either;
        // that is the one case a completed transfer turns into a failure.
        if bytes.is_none() && persisted_file.is_none() {
            let Some(entry) = self.entries.get_mut(key) else {
                return;
            };
            entry.transition(key, EntryState::Failed);
            entry.notify_all(LoadEvent::Failed(LoadError::Persist(
                "downloaded file could not be promoted into the store".to_string(),
            )));
            let attempts = entry.retries_done + 1;
            self.event_bus
                .emit(LoaderEvent::TransferFailed {
                    key: key.to_string(),
                    message: "persist failed".to_string(),
                    attempts,
                })
                .ok();
            self.entries.remove(key);
            return;
        }

        self.finish_success(key, bytes, persisted_file, false);
    }

    async fn persist_file(
        &self,
        temp: &PathBuf,
        final_path: &PathBuf,
        record: &StoreRecord,
    ) -> Result<(), LoadError> {
        self.fs
            .rename(temp, final_path)
            .await
            .map_err(|e| LoadError::Persist(e.to_string()))?;
        self.records
            .create(record)
            .await
            .map_err(|e| LoadError::Persist(e.to_string()))
    }

    async fn persist_bytes(
        &self,
        bytes: &Bytes,
        final_path: &PathBuf,
        record: &StoreRecord,
    ) -> Result<(), LoadError> {
        self.fs
            .write_file(final_path, bytes.clone())
            .await
            .map_err(|e| LoadError::Persist(e.to_string()))?;
        self.records
            .create(record)
            .await
            .map_err(|e| LoadError::Persist(e.to_string()))
    }

    /// Deliver a payload to every observer and retire the entry.
    fn finish_success(
        &mut self,
        key: &ResourceKey,
        bytes: Option<Bytes>,
        file: Option<PathBuf>,
        from_cache: bool,
    ) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.state != EntryState::Finishing && !entry.transition(key, EntryState::Finishing) {
            return;
        }

        let byte_count = bytes.as_ref().map(|b| b.len() as u64);
        entry.notify_all(LoadEvent::Completed(LoadOutcome {
            bytes,
            file,
            from_cache,
        }));
        entry.transition(key, EntryState::Finished);

        self.event_bus
            .emit(LoaderEvent::TransferCompleted {
                key: key.to_string(),
                from_cache,
                bytes: byte_count,
            })
            .ok();
        self.entries.remove(key);
    }

    /// Retry a retryable failure until the budget runs out, then fail the
    /// entry for good.
    async fn fail_attempt(&mut self, key: &ResourceKey, failure: TransportFailure) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.handle = None;

        if failure.retryable && entry.retries_done < self.config.max_retries {
            entry.retries_done += 1;
            if entry.transition(key, EntryState::Scheduled) {
                let delay = self.config.retry_base_delay * 2u32.pow(entry.retries_done - 1);
                debug!(
                    key = %key,
                    retry = entry.retries_done,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Retrying after transport failure"
                );
                let tx = self.tx.clone();
                let timer_key = key.clone();
                let expected_attempt = entry.attempt;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    tx.send(Command::StartAttempt {
                        key: timer_key,
                        attempt: expected_attempt,
                    })
                    .ok();
                });
                return;
            }
        }

        let attempts = entry.retries_done + 1;
        warn!(key = %key, attempts, error = %failure, "Load failed");
        entry.transition(key, EntryState::Failed);
        entry.notify_all(LoadEvent::Failed(LoadError::Transport {
            message: failure.message.clone(),
            retryable: failure.retryable,
        }));
        self.event_bus
            .emit(LoaderEvent::TransferFailed {
                key: key.to_string(),
                message: failure.message,
                attempts,
            })
            .ok();
        self.entries.remove(key);
    }

    async fn handle_start_attempt(&mut self, key: ResourceKey, attempt: u32) {
        let Some(entry) = self.entries.get(&key) else {
            return;
        };
        // The timer raced a reload or cancellation; only act if the entry is
        // still the one that scheduled it.
        if entry.state != EntryState::Scheduled || entry.attempt != attempt {
            debug!(key = %key, "Stale retry timer ignored");
            return;
        }
        self.start_network_attempt(&key).await;
    }
}
