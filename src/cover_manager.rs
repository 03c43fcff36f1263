//! Cover lookup pipeline: one dispatcher thread owning every state
//! transition, and three worker pools doing the blocking work.
//!
//! Requests move by value. The dispatcher hands a [`CoverRequest`] to a pool
//! job, the job sends it back with [`DispatchMessage::Advance`], and the
//! dispatcher decides the next stage. Lookups for the same identity that
//! arrive while one is in flight join it as extra listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::album_key::AlbumKey;
use crate::blob_store::BlobStore;
use crate::cover_ledger::CoverLedger;
use crate::cover_request::{CoverRequest, CoverSizing, CoverState};
use crate::decode_worker::decode_cover;
use crate::fetch_worker::{fetch_cover, FetchContext};
use crate::image_pipeline::CoverDecoder;
use crate::protocol::{same_listener, CoverListener};
use crate::providers::ProviderList;
use crate::transport::CoverTransport;
use crate::worker_pool::WorkerPool;

const CACHE_POOL_SIZE: usize = 1;
const PRIORITY_POOL_SIZE: usize = 1;
const BULK_POOL_SIZE: usize = 2;

/// Queued bulk network fetches at which fresh low-priority lookups are shed.
pub const BULK_BACKLOG_LIMIT: usize = 20;

/// Collaborators the pipeline is built from.
pub struct CoverManagerParts {
    pub providers: ProviderList,
    pub transport: Arc<dyn CoverTransport>,
    pub decoder: Arc<dyn CoverDecoder>,
    pub blob_store: Arc<dyn BlobStore>,
}

/// Messages consumed by the dispatcher thread.
pub enum DispatchMessage {
    Submit(CoverRequest),
    /// A worker finished its stage and returns the request.
    Advance(CoverRequest),
    Shutdown,
}

/// State shared between the caller-facing handle and the dispatcher.
struct SharedState {
    ledger: Arc<Mutex<CoverLedger>>,
    providers: RwLock<Arc<ProviderList>>,
    blob_store: Arc<dyn BlobStore>,
    in_flight: AtomicUsize,
    flush_lock: Mutex<()>,
}

impl SharedState {
    fn ledger(&self) -> MutexGuard<'_, CoverLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn providers(&self) -> Arc<ProviderList> {
        Arc::clone(&self.providers.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Writes both persisted maps if they changed. Snapshots are taken and
    /// written under `flush_lock` so an older snapshot never lands last.
    fn flush(&self) {
        let _flushing = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.ledger().take_snapshot();
        if let Some(snapshot) = snapshot {
            snapshot.persist(self.blob_store.as_ref());
            debug!("Flushed cover state");
        }
    }
}

/// Handle on a running cover pipeline. Dropping it closes the pipeline.
pub struct CoverManager {
    shared: Arc<SharedState>,
    sender: Option<Sender<DispatchMessage>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl CoverManager {
    /// Loads persisted state and starts the dispatcher and worker pools.
    pub fn open(parts: CoverManagerParts) -> Result<Self, String> {
        let CoverManagerParts {
            providers,
            transport,
            decoder,
            blob_store,
        } = parts;

        let ledger = Arc::new(Mutex::new(CoverLedger::load(blob_store.as_ref())));
        info!("Opening cover pipeline with providers {:?}", providers);
        let shared = Arc::new(SharedState {
            ledger: Arc::clone(&ledger),
            providers: RwLock::new(Arc::new(providers)),
            blob_store,
            in_flight: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
        });

        let cache_pool = WorkerPool::new("cover-cache", CACHE_POOL_SIZE)?;
        let priority_pool = WorkerPool::new("cover-priority", PRIORITY_POOL_SIZE)?;
        let bulk_pool = WorkerPool::new("cover-bulk", BULK_POOL_SIZE)?;
        let fetch_context = FetchContext { ledger, transport };

        let (sender, receiver) = mpsc::channel();
        let mut dispatcher = Dispatcher {
            receiver,
            sender: sender.clone(),
            shared: Arc::clone(&shared),
            in_flight: HashMap::new(),
            fetch_context,
            decoder,
            cache_pool,
            priority_pool,
            bulk_pool,
        };
        let handle = thread::Builder::new()
            .name("cover-dispatcher".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|err| format!("failed to spawn cover dispatcher: {err}"))?;

        Ok(Self {
            shared,
            sender: Some(sender),
            dispatcher: Some(handle),
        })
    }

    /// Queues a lookup. The outcome arrives through `listener`.
    pub fn submit(
        &self,
        key: AlbumKey,
        sizing: CoverSizing,
        priority: bool,
        parent_directory: Option<String>,
        listener: Arc<dyn CoverListener>,
    ) {
        let request = CoverRequest::new(
            key,
            sizing,
            priority,
            parent_directory,
            self.shared.providers(),
            Arc::clone(&listener),
        );
        let Some(sender) = self.sender.as_ref() else {
            listener.on_not_found(&request.key);
            return;
        };
        if let Err(mpsc::SendError(message)) = sender.send(DispatchMessage::Submit(request)) {
            if let DispatchMessage::Submit(request) = message {
                warn!("Cover pipeline is closed, dropping lookup for {}", request.key);
                listener.on_not_found(&request.key);
            }
        }
    }

    /// Forgets everything known about `key` and deletes its cached copy.
    /// A lookup already in flight is left alone.
    pub fn clear(&self, key: &AlbumKey) {
        self.shared.ledger().forget(key);
        let providers = self.shared.providers();
        if let Some(store) = providers.cache_store() {
            if let Err(err) = store.delete(key) {
                warn!("Cannot delete cached cover for {}: {}", key, err);
            }
        }
        info!("Cleared cover state for {}", key);
        self.flush_if_idle();
    }

    /// Deletes every cached cover and empties all three caches.
    pub fn clear_all(&self) {
        self.shared.ledger().reset();
        let providers = self.shared.providers();
        let deleted = providers.cache_store().map_or(0, |store| store.clear());
        info!("Cleared all cover state ({} cached covers deleted)", deleted);
        self.flush_if_idle();
    }

    /// Blacklists the location `key` last resolved to and evicts its cached
    /// copy. Local files and unknown identities are left untouched.
    pub fn mark_rejected(&self, key: &AlbumKey) {
        let rejected = self.shared.ledger().reject_current(key);
        let Some(location) = rejected else {
            debug!("Nothing to reject for {}", key);
            return;
        };
        let providers = self.shared.providers();
        if let Some(store) = providers.cache_store() {
            if let Err(err) = store.delete(key) {
                warn!("Cannot evict cached cover for {}: {}", key, err);
            }
        }
        info!("Rejected cover location for {}: {}", key, location);
        self.flush_if_idle();
    }

    /// Replaces the provider list for lookups submitted from now on.
    pub fn set_providers(&self, providers: ProviderList) {
        info!("Cover providers changed to {:?}", providers);
        let mut current = self
            .shared
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(providers);
    }

    pub fn resolved_location(&self, key: &AlbumKey) -> Option<String> {
        self.shared.ledger().resolved_location(key).map(str::to_string)
    }

    pub fn is_blacklisted(&self, key: &AlbumKey, location: &str) -> bool {
        let volatile = self.shared.providers().volatile_prefixes();
        self.shared.ledger().is_blacklisted(key, location, &volatile)
    }

    pub fn is_known_not_found(&self, key: &AlbumKey) -> bool {
        self.shared.ledger().is_known_not_found(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Stops the dispatcher, drains the worker pools and flushes state.
    /// Lookups still in flight end as not found.
    pub fn close(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let _ = sender.send(DispatchMessage::Shutdown);
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                warn!("Cover dispatcher panicked");
            }
        }
        self.shared.flush();
        info!("Cover pipeline closed");
    }

    fn flush_if_idle(&self) {
        if self.in_flight_count() == 0 {
            self.shared.flush();
        }
    }
}

impl Drop for CoverManager {
    fn drop(&mut self) {
        self.close();
    }
}

struct InFlightEntry {
    listeners: Vec<Arc<dyn CoverListener>>,
    priority: bool,
    state: CoverState,
}

struct Dispatcher {
    receiver: Receiver<DispatchMessage>,
    sender: Sender<DispatchMessage>,
    shared: Arc<SharedState>,
    in_flight: HashMap<AlbumKey, InFlightEntry>,
    fetch_context: FetchContext,
    decoder: Arc<dyn CoverDecoder>,
    cache_pool: WorkerPool,
    priority_pool: WorkerPool,
    bulk_pool: WorkerPool,
}

impl Dispatcher {
    fn run(&mut self) {
        while let Ok(message) = self.receiver.recv() {
            match message {
                DispatchMessage::Submit(request) => self.on_submit(request),
                DispatchMessage::Advance(request) => self.on_advance(request),
                DispatchMessage::Shutdown => break,
            }
        }
        self.shutdown();
    }

    fn on_submit(&mut self, mut request: CoverRequest) {
        let Some(listener) = request.listener.take() else {
            return;
        };

        if let Some(entry) = self.in_flight.get_mut(&request.key) {
            entry.priority |= request.priority;
            if !entry
                .listeners
                .iter()
                .any(|existing| same_listener(existing, &listener))
            {
                if entry.state == CoverState::WebFetch {
                    listener.on_started(&request.key);
                }
                entry.listeners.push(listener);
            }
            debug!(
                "Joined in-flight cover lookup for {} ({:?})",
                request.key, entry.state
            );
            return;
        }

        self.in_flight.insert(
            request.key.clone(),
            InFlightEntry {
                listeners: vec![listener],
                priority: request.priority,
                state: CoverState::New,
            },
        );
        self.publish_in_flight();

        if !request.key.is_valid() || self.shared.ledger().is_known_not_found(&request.key) {
            debug!("Cover for {} is known to be missing", request.key);
            request.state = CoverState::NotFound;
            self.finish(request);
            return;
        }

        request.state = CoverState::CacheFetch;
        self.dispatch_fetch(request);
    }

    fn on_advance(&mut self, mut request: CoverRequest) {
        let Some(entry) = self.in_flight.get(&request.key) else {
            warn!("Dropping cover request for {} with no listeners", request.key);
            return;
        };
        request.priority |= entry.priority;

        match request.state {
            CoverState::CacheFetch => {
                if request.has_cover_bytes() {
                    request.state = CoverState::CreateBitmap;
                    self.dispatch_decode(request);
                } else {
                    request.state = CoverState::WebFetch;
                    request.last_provider = None;
                    self.notify_started(&request.key);
                    self.dispatch_fetch(request);
                }
            }
            CoverState::WebFetch => {
                if request.has_cover_bytes() {
                    request.state = CoverState::CreateBitmap;
                    self.dispatch_decode(request);
                } else {
                    request.state = CoverState::NotFound;
                    self.finish(request);
                }
            }
            CoverState::CreateBitmap => {
                if request.images.is_some() {
                    request.state = CoverState::Found;
                    self.finish(request);
                } else if request
                    .last_provider
                    .is_some_and(|index| request.providers.is_last(index))
                {
                    debug!(
                        "Cover from {} for {} failed to decode, retrying",
                        request.last_provider_name(),
                        request.key
                    );
                    request.state = CoverState::WebFetch;
                    request.cover_bytes = None;
                    self.dispatch_fetch(request);
                } else {
                    request.state = CoverState::NotFound;
                    self.finish(request);
                }
            }
            other => {
                warn!("Cover request for {} returned in state {:?}", request.key, other);
                request.state = CoverState::NotFound;
                self.finish(request);
            }
        }
    }

    fn set_entry_state(&mut self, key: &AlbumKey, state: CoverState) {
        if let Some(entry) = self.in_flight.get_mut(key) {
            entry.state = state;
        }
    }

    fn notify_started(&self, key: &AlbumKey) {
        if let Some(entry) = self.in_flight.get(key) {
            for listener in &entry.listeners {
                listener.on_started(key);
            }
        }
    }

    fn dispatch_fetch(&mut self, mut request: CoverRequest) {
        if self.is_bulk_backlogged(&request) {
            warn!("Too many cover requests queued, giving up on {}", request.key);
            request.given_up = true;
            request.state = CoverState::NotFound;
            self.finish(request);
            return;
        }

        let key = request.key.clone();
        self.set_entry_state(&key, request.state);
        let pool = match request.state {
            CoverState::CacheFetch => &self.cache_pool,
            _ if request.priority => &self.priority_pool,
            _ => &self.bulk_pool,
        };
        debug!("Fetching cover for {} ({:?})", key, request.state);

        let context = self.fetch_context.clone();
        let sender = self.sender.clone();
        let queued = pool.execute(move || {
            let mut request = request;
            fetch_cover(&mut request, &context);
            let _ = sender.send(DispatchMessage::Advance(request));
        });
        if let Err(err) = queued {
            warn!("Cannot queue cover fetch for {}: {}", key, err);
            self.abandon(&key);
        }
    }

    /// A lookup entering the network tier for the first time without priority
    /// is shed while the bulk pool already has a full queue. Decode retries
    /// carry a cursor and are never shed.
    fn is_bulk_backlogged(&self, request: &CoverRequest) -> bool {
        request.state == CoverState::WebFetch
            && !request.priority
            && request.last_provider.is_none()
            && self.bulk_pool.pending() >= BULK_BACKLOG_LIMIT
    }

    fn dispatch_decode(&mut self, request: CoverRequest) {
        let key = request.key.clone();
        self.set_entry_state(&key, request.state);
        debug!(
            "Decoding cover for {} from {}",
            key,
            request.last_provider_name()
        );

        let decoder = Arc::clone(&self.decoder);
        let sender = self.sender.clone();
        let queued = self.cache_pool.execute(move || {
            let mut request = request;
            decode_cover(&mut request, decoder.as_ref());
            let _ = sender.send(DispatchMessage::Advance(request));
        });
        if let Err(err) = queued {
            warn!("Cannot queue cover decode for {}: {}", key, err);
            self.abandon(&key);
        }
    }

    fn finish(&mut self, mut request: CoverRequest) {
        let listeners = self
            .in_flight
            .remove(&request.key)
            .map(|entry| entry.listeners)
            .unwrap_or_default();
        self.publish_in_flight();

        match (request.state, request.images.take()) {
            (CoverState::Found, Some(images)) => {
                debug!(
                    "Cover found for {} with {}",
                    request.key,
                    request.last_provider_name()
                );
                let copies: Vec<_> = listeners
                    .iter()
                    .skip(1)
                    .map(|_| images.duplicate())
                    .collect();
                let mut listeners = listeners.iter();
                if let Some(first) = listeners.next() {
                    first.on_found(&request.key, images);
                }
                for (listener, copy) in listeners.zip(copies) {
                    listener.on_found(&request.key, copy);
                }
            }
            _ => {
                if request.key.is_valid()
                    && !request.given_up
                    && request.parent_directory.is_some()
                {
                    self.shared.ledger().mark_not_found(&request.key);
                }
                debug!("No cover found for {}", request.key);
                for listener in &listeners {
                    listener.on_not_found(&request.key);
                }
            }
        }

        if self.in_flight.is_empty() {
            self.shared.flush();
        }
    }

    /// Ends a lookup whose request was lost to a stopped pool.
    fn abandon(&mut self, key: &AlbumKey) {
        if let Some(entry) = self.in_flight.remove(key) {
            for listener in &entry.listeners {
                listener.on_not_found(key);
            }
        }
        self.publish_in_flight();
    }

    fn publish_in_flight(&self) {
        self.shared
            .in_flight
            .store(self.in_flight.len(), Ordering::SeqCst);
    }

    fn shutdown(&mut self) {
        self.cache_pool.shutdown();
        self.priority_pool.shutdown();
        self.bulk_pool.shutdown();
        let pending: Vec<AlbumKey> = self.in_flight.keys().cloned().collect();
        if !pending.is_empty() {
            info!("Closing with {} cover lookups unfinished", pending.len());
        }
        for key in pending {
            self.abandon(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{CoverManager, CoverManagerParts, BULK_BACKLOG_LIMIT, BULK_POOL_SIZE};
    use crate::album_key::AlbumKey;
    use crate::blob_store::{BlobStore, MemoryBlobStore};
    use crate::cover_ledger::COVERS_BLOB;
    use crate::cover_request::CoverSizing;
    use crate::image_pipeline::testing::png_bytes;
    use crate::image_pipeline::ImageCrateDecoder;
    use crate::protocol::{CoverEvent, CoverListener};
    use crate::providers::testing::ScriptedProvider;
    use crate::providers::{CoverProvider, DiskCoverCache, ProviderList};
    use crate::transport::testing::MockTransport;
    use crate::transport::CoverTransport;

    const WAIT: Duration = Duration::from_secs(10);

    fn open(
        providers: Vec<Arc<dyn CoverProvider>>,
        transport: Arc<dyn CoverTransport>,
        blob_store: Arc<dyn BlobStore>,
    ) -> CoverManager {
        CoverManager::open(CoverManagerParts {
            providers: ProviderList::new(providers),
            transport,
            decoder: Arc::new(ImageCrateDecoder),
            blob_store,
        })
        .expect("pipeline should open")
    }

    fn listener() -> (Arc<dyn CoverListener>, Receiver<CoverEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(tx), rx)
    }

    fn outcome(rx: &Receiver<CoverEvent>) -> CoverEvent {
        loop {
            let event = rx.recv_timeout(WAIT).expect("lookup should finish");
            if event.is_terminal() {
                return event;
            }
        }
    }

    fn lookup(
        manager: &CoverManager,
        key: &AlbumKey,
        directory: Option<&str>,
    ) -> CoverEvent {
        let (listener, rx) = listener();
        manager.submit(
            key.clone(),
            CoverSizing::native(),
            false,
            directory.map(str::to_string),
            listener,
        );
        outcome(&rx)
    }

    /// Blocks network downloads until released.
    struct GatedTransport {
        inner: MockTransport,
        gate: Mutex<Receiver<()>>,
    }

    impl CoverTransport for GatedTransport {
        fn read_local(&self, path: &str) -> Result<Option<Vec<u8>>, String> {
            self.inner.read_local(path)
        }

        fn download(&self, url: &str) -> Result<Option<Vec<u8>>, String> {
            let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = gate.recv_timeout(WAIT);
            self.inner.download(url)
        }
    }

    #[test]
    fn test_concurrent_lookups_share_one_pipeline() {
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]));
        let (release, gate) = mpsc::channel();
        let transport = GatedTransport {
            inner: MockTransport::new().with("http://a/cover.png", png_bytes(6, 6)),
            gate: Mutex::new(gate),
        };
        let manager = open(
            vec![web.clone()],
            Arc::new(transport),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Pixies", "Doolittle");

        let (first, first_rx) = listener();
        let (second, second_rx) = listener();
        manager.submit(key.clone(), CoverSizing::native(), false, None, first);
        manager.submit(key.clone(), CoverSizing::native(), true, None, second);

        for rx in [&first_rx, &second_rx] {
            let started = rx.recv_timeout(WAIT).expect("started event");
            assert!(matches!(started, CoverEvent::Started(_)));
        }
        assert_eq!(manager.in_flight_count(), 1);
        release.send(()).expect("release download");

        let (CoverEvent::Found { images: a, .. }, CoverEvent::Found { images: b, .. }) =
            (outcome(&first_rx), outcome(&second_rx))
        else {
            panic!("both listeners should get the cover");
        };
        assert!(!Arc::ptr_eq(&a.primary, &b.primary));
        assert_eq!(a.primary.width(), b.primary.width());
        assert_eq!(web.calls(), 1);
    }

    #[test]
    fn test_full_bulk_queue_sheds_new_lookups_without_negative_caching() {
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]));
        let (release, gate) = mpsc::channel::<()>();
        let transport = GatedTransport {
            inner: MockTransport::new().with("http://a/cover.png", png_bytes(2, 2)),
            gate: Mutex::new(gate),
        };
        let manager = open(
            vec![web.clone()],
            Arc::new(transport),
            Arc::new(MemoryBlobStore::new()),
        );
        let submit = |album: String, priority: bool| {
            let (listener, rx) = listener();
            manager.submit(
                AlbumKey::new("Swans", album.as_str()),
                CoverSizing::native(),
                priority,
                Some(format!("Swans/{album}")),
                listener,
            );
            rx
        };

        let running: Vec<_> = (0..BULK_POOL_SIZE)
            .map(|index| submit(format!("Running {index}"), false))
            .collect();
        let deadline = Instant::now() + WAIT;
        while web.calls() < BULK_POOL_SIZE && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(web.calls(), BULK_POOL_SIZE);

        let queued: Vec<_> = (0..BULK_BACKLOG_LIMIT)
            .map(|index| submit(format!("Queued {index}"), false))
            .collect();
        for rx in &queued {
            let started = rx.recv_timeout(WAIT).expect("started event");
            assert!(matches!(started, CoverEvent::Started(_)));
        }

        let shed = AlbumKey::new("Swans", "Shed");
        let shed_rx = submit("Shed".to_string(), false);
        assert!(matches!(outcome(&shed_rx), CoverEvent::NotFound(_)));
        assert_eq!(web.calls(), BULK_POOL_SIZE);
        assert!(!manager.is_known_not_found(&shed));

        let urgent_rx = submit("Urgent".to_string(), true);
        drop(release);

        for rx in running.iter().chain(&queued).chain([&urgent_rx]) {
            assert!(matches!(outcome(rx), CoverEvent::Found { .. }));
        }
        assert_eq!(web.calls(), BULK_POOL_SIZE + BULK_BACKLOG_LIMIT + 1);
    }

    #[test]
    fn test_invalid_identity_is_not_found_without_io() {
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]));
        let manager = open(
            vec![web.clone()],
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBlobStore::new()),
        );

        let event = lookup(&manager, &AlbumKey::new("  ", "Loveless"), Some("dir"));
        assert!(matches!(event, CoverEvent::NotFound(_)));
        assert_eq!(web.calls(), 0);
        assert!(!manager.is_known_not_found(&AlbumKey::new("  ", "Loveless")));
    }

    #[test]
    fn test_second_lookup_is_served_from_disk_cache() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = Arc::new(DiskCoverCache::new(dir.path().to_path_buf()));
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]));
        let transport =
            Arc::new(MockTransport::new().with("http://a/cover.png", png_bytes(12, 12)));
        let manager = open(
            vec![cache.clone(), web.clone()],
            transport.clone(),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Talk Talk", "Spirit of Eden");

        assert!(matches!(lookup(&manager, &key, None), CoverEvent::Found { .. }));
        assert_eq!(web.calls(), 1);
        assert!(cache.cover_path(&key).exists());
        assert_eq!(
            manager.resolved_location(&key).as_deref(),
            Some("http://a/cover.png")
        );

        assert!(matches!(lookup(&manager, &key, None), CoverEvent::Found { .. }));
        assert_eq!(web.calls(), 1);
        assert_eq!(
            transport
                .requested()
                .iter()
                .filter(|location| location.as_str() == "http://a/cover.png")
                .count(),
            1
        );
    }

    #[test]
    fn test_rejected_location_is_never_proposed_again() {
        let first = Arc::new(ScriptedProvider::remote("first", &["http://a/wrong.png"]));
        let second = Arc::new(ScriptedProvider::remote("second", &["http://b/right.png"]));
        let transport = Arc::new(
            MockTransport::new()
                .with("http://a/wrong.png", png_bytes(4, 4))
                .with("http://b/right.png", png_bytes(5, 5)),
        );
        let manager = open(
            vec![first, second],
            transport.clone(),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Yo La Tengo", "Painful");

        assert!(matches!(lookup(&manager, &key, None), CoverEvent::Found { .. }));
        manager.mark_rejected(&key);
        assert!(manager.is_blacklisted(&key, "http://a/wrong.png"));
        assert!(manager.resolved_location(&key).is_none());

        let CoverEvent::Found { images, .. } = lookup(&manager, &key, None) else {
            panic!("second provider should supply the cover");
        };
        assert_eq!(images.primary.width(), 5);
        assert_eq!(
            manager.resolved_location(&key).as_deref(),
            Some("http://b/right.png")
        );
        let wrong_requests = transport
            .requested()
            .iter()
            .filter(|location| location.as_str() == "http://a/wrong.png")
            .count();
        assert_eq!(wrong_requests, 1);
    }

    #[test]
    fn test_rejecting_a_local_file_is_a_no_op() {
        let dir = tempfile::tempdir().expect("temp dir");
        let manager = open(
            vec![Arc::new(ScriptedProvider::remote("web", &[]))],
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Can", "Tago Mago");
        let local = dir.path().join("cover.jpg").to_string_lossy().into_owned();
        manager.shared.ledger().record_location(&key, &local);

        manager.mark_rejected(&key);
        assert_eq!(manager.resolved_location(&key), Some(local.clone()));
        assert!(!manager.is_blacklisted(&key, &local));
    }

    #[test]
    fn test_exhausted_lookup_is_negative_cached_until_cleared() {
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/missing.png"]));
        let manager = open(
            vec![web.clone()],
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Galaxie 500", "On Fire");

        assert!(matches!(
            lookup(&manager, &key, Some("Galaxie 500/On Fire")),
            CoverEvent::NotFound(_)
        ));
        assert!(manager.is_known_not_found(&key));
        assert_eq!(web.calls(), 1);

        assert!(matches!(
            lookup(&manager, &key, Some("Galaxie 500/On Fire")),
            CoverEvent::NotFound(_)
        ));
        assert_eq!(web.calls(), 1);

        manager.clear(&key);
        assert!(!manager.is_known_not_found(&key));
        lookup(&manager, &key, Some("Galaxie 500/On Fire"));
        assert_eq!(web.calls(), 2);
    }

    #[test]
    fn test_lookups_without_directory_hint_are_not_negative_cached() {
        let web = Arc::new(ScriptedProvider::remote("web", &[]));
        let manager = open(
            vec![web],
            Arc::new(MockTransport::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Codeine", "Frigid Stars");
        assert!(matches!(lookup(&manager, &key, None), CoverEvent::NotFound(_)));
        assert!(!manager.is_known_not_found(&key));
    }

    #[test]
    fn test_clear_forgets_every_trace_of_an_identity() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = Arc::new(DiskCoverCache::new(dir.path().to_path_buf()));
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]));
        let manager = open(
            vec![cache.clone(), web.clone()],
            Arc::new(MockTransport::new().with("http://a/cover.png", png_bytes(3, 3))),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Seefeel", "Quique");

        lookup(&manager, &key, None);
        manager.mark_rejected(&key);
        assert!(manager.is_blacklisted(&key, "http://a/cover.png"));

        manager.clear(&key);
        assert!(manager.resolved_location(&key).is_none());
        assert!(!manager.is_blacklisted(&key, "http://a/cover.png"));
        assert!(!cache.cover_path(&key).exists());

        assert!(matches!(lookup(&manager, &key, None), CoverEvent::Found { .. }));
        assert_eq!(web.calls(), 2);
    }

    #[test]
    fn test_clear_all_empties_caches_and_cover_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = Arc::new(DiskCoverCache::new(dir.path().to_path_buf()));
        let web = Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]));
        let manager = open(
            vec![cache.clone(), web],
            Arc::new(MockTransport::new().with("http://a/cover.png", png_bytes(3, 3))),
            Arc::new(MemoryBlobStore::new()),
        );
        let found = AlbumKey::new("Duster", "Stratosphere");
        let missing = AlbumKey::new("Duster", "Contemporary Movement");

        lookup(&manager, &found, None);
        manager
            .shared
            .ledger()
            .mark_not_found(&missing);

        manager.clear_all();
        assert!(manager.resolved_location(&found).is_none());
        assert!(!manager.is_known_not_found(&missing));
        assert!(!cache.cover_path(&found).exists());
    }

    #[test]
    fn test_undecodable_cover_from_mid_list_provider_ends_the_lookup() {
        let broken = Arc::new(ScriptedProvider::remote("broken", &["http://a/broken.png"]));
        let spare = Arc::new(ScriptedProvider::remote("spare", &["http://b/cover.png"]));
        let manager = open(
            vec![broken, spare.clone()],
            Arc::new(
                MockTransport::new()
                    .with("http://a/broken.png", b"garbage".to_vec())
                    .with("http://b/cover.png", png_bytes(2, 2)),
            ),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Disco Inferno", "D.I. Go Pop");

        assert!(matches!(lookup(&manager, &key, None), CoverEvent::NotFound(_)));
        assert_eq!(spare.calls(), 0);
    }

    #[test]
    fn test_undecodable_cover_from_last_provider_retries_then_gives_up() {
        let broken = Arc::new(ScriptedProvider::remote("broken", &["http://a/broken.png"]));
        let manager = open(
            vec![broken.clone()],
            Arc::new(MockTransport::new().with("http://a/broken.png", b"garbage".to_vec())),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Bark Psychosis", "Hex");

        assert!(matches!(
            lookup(&manager, &key, Some("Bark Psychosis/Hex")),
            CoverEvent::NotFound(_)
        ));
        assert_eq!(broken.calls(), 1);
        assert!(manager.is_known_not_found(&key));
    }

    #[test]
    fn test_provider_changes_apply_to_new_lookups() {
        let old = Arc::new(ScriptedProvider::remote("old", &[]));
        let new = Arc::new(ScriptedProvider::remote("new", &["http://n/cover.png"]));
        let manager = open(
            vec![old.clone()],
            Arc::new(MockTransport::new().with("http://n/cover.png", png_bytes(2, 2))),
            Arc::new(MemoryBlobStore::new()),
        );
        let key = AlbumKey::new("Slint", "Spiderland");

        assert!(matches!(lookup(&manager, &key, None), CoverEvent::NotFound(_)));
        manager.set_providers(ProviderList::new(vec![new.clone()]));
        assert!(matches!(lookup(&manager, &key, None), CoverEvent::Found { .. }));
        assert_eq!(old.calls(), 1);
        assert_eq!(new.calls(), 1);
    }

    #[test]
    fn test_state_is_persisted_and_reloaded_across_sessions() {
        let store: Arc<MemoryBlobStore> = Arc::new(MemoryBlobStore::new());
        let key = AlbumKey::new("Mazzy Star", "So Tonight That I Might See");
        {
            let mut manager = open(
                vec![Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]))],
                Arc::new(MockTransport::new().with("http://a/cover.png", png_bytes(2, 2))),
                store.clone(),
            );
            lookup(&manager, &key, None);
            manager.close();
        }
        assert!(store.load(COVERS_BLOB).expect("load").is_some());

        let manager = open(
            vec![Arc::new(ScriptedProvider::remote("web", &[]))],
            Arc::new(MockTransport::new()),
            store,
        );
        assert_eq!(
            manager.resolved_location(&key).as_deref(),
            Some("http://a/cover.png")
        );
    }

    #[test]
    fn test_closed_pipeline_answers_not_found() {
        let mut manager = open(
            vec![Arc::new(ScriptedProvider::remote("web", &["http://a/cover.png"]))],
            Arc::new(MockTransport::new().with("http://a/cover.png", png_bytes(2, 2))),
            Arc::new(MemoryBlobStore::new()),
        );
        manager.close();
        let event = lookup(&manager, &AlbumKey::new("Hood", "Cold House"), None);
        assert!(matches!(event, CoverEvent::NotFound(_)));
    }
}
