//! The sync session: owns one replica and the feed that keeps it current.

use crate::config::SessionConfig;
use crate::coordinator::{Disposition, InitializationCoordinator};
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notifier, ReplicaNotification};
use crate::source::{FeedHandle, FeedMessage, Sources};
use crate::state::{SessionState, SessionStats};
use livereplica_core::{ApplyOutcome, ChangeEvent, Document, DocumentId, ReplicaStore};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// State shared between the session handle and its task.
struct Shared {
    id: Uuid,
    collection: String,
    store: RwLock<ReplicaStore>,
    stats: RwLock<SessionStats>,
    error: RwLock<Option<SyncError>>,
    state: watch::Sender<SessionState>,
    notifier: Notifier,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state changed");
            self.notifier.publish(ReplicaNotification::StateChanged(state));
        }
    }

    fn record_error(&self, err: &SyncError) {
        self.stats.write().last_error = Some(err.to_string());
        *self.error.write() = Some(err.clone());
    }

    fn record_outcome(&self, outcome: &ApplyOutcome) {
        {
            let mut stats = self.stats.write();
            if outcome.is_mutation() {
                stats.events_applied += 1;
            } else if matches!(outcome, ApplyOutcome::Skipped { .. }) {
                stats.events_skipped += 1;
            }
        }
        if let Some(notification) = ReplicaNotification::from_outcome(outcome) {
            self.notifier.publish(notification);
        }
    }
}

/// A live, ordered replica of one collection.
///
/// The session runs as a single tokio task. That task is the only writer
/// of the replica; the handle reads it under a shared lock.
///
/// # Lifecycle
///
/// 1. `ensure_exists` on the collection
/// 2. subscribe to the feed
/// 3. query the snapshot while buffering feed events
/// 4. load the snapshot and drain the buffer
/// 5. apply feed events as they arrive until stopped
///
/// Feed errors are logged, counted and published; they do not end the
/// session. There is no reconnect: once the feed ends or is invalidated,
/// a new session must be started.
pub struct SyncSession {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// Starts a session and waits until it is live.
    ///
    /// If the session fails before going live it is stopped and the error
    /// returned.
    pub async fn start(config: SessionConfig, sources: Sources) -> SyncResult<Self> {
        let session = Self::spawn(config, sources)?;
        if let Err(err) = session.ready().await {
            session.stop().await;
            return Err(err);
        }
        Ok(session)
    }

    /// Spawns the session task and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: SessionConfig, sources: Sources) -> SyncResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| SyncError::Task(err.to_string()))?;

        let (state, _) = watch::channel(SessionState::Initializing);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            collection: config.collection.clone(),
            store: RwLock::new(ReplicaStore::new(
                config.collection.clone(),
                config.sort_key.clone(),
            )),
            stats: RwLock::new(SessionStats::default()),
            error: RwLock::new(None),
            state,
            notifier: Notifier::default(),
        });

        let span = info_span!(
            "sync_session",
            collection = %shared.collection,
            session_id = %shared.id
        );
        let worker = Worker {
            shared: Arc::clone(&shared),
            coordinator: InitializationCoordinator::new(config.limit),
            config,
            sources,
            shutdown: shutdown_rx,
            feed: None,
        };
        let task = runtime.spawn(worker.run().instrument(span));

        Ok(Self {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Waits until the snapshot is loaded and the buffer drained.
    ///
    /// Returns an error if the session failed, was invalidated or was
    /// stopped before that point.
    pub async fn ready(&self) -> SyncResult<()> {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|state| !state.is_initializing()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };

        match state {
            SessionState::Live | SessionState::Disconnected => Ok(()),
            SessionState::Stopped => Err(SyncError::Stopped),
            SessionState::Invalidated | SessionState::Failed => Err(self
                .error()
                .unwrap_or_else(|| SyncError::Task(format!("session ended in state {state}")))),
            SessionState::Initializing | SessionState::Draining => Err(SyncError::Task(
                "session task exited before going live".into(),
            )),
        }
    }

    /// Stops the session.
    ///
    /// Safe to call in any state and more than once. When it returns the
    /// feed has been closed and no further event will be applied.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        match task {
            Some(task) => {
                if let Err(err) = task.await {
                    error!(collection = %self.shared.collection, error = %err, "session task aborted");
                    let err = SyncError::Task(err.to_string());
                    self.shared.record_error(&err);
                    self.shared.set_state(SessionState::Failed);
                }
            }
            None => {
                let mut rx = self.shared.state.subscribe();
                let _ = rx.wait_for(|state| state.is_terminal()).await;
            }
        }
    }

    /// Returns the session ID used in logs.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Returns the replicated collection.
    pub fn collection(&self) -> &str {
        &self.shared.collection
    }

    /// Subscribes to replica notifications from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ReplicaNotification> {
        self.shared.notifier.subscribe()
    }

    /// Returns a copy of the replica in sort order.
    pub fn documents(&self) -> Vec<Document> {
        self.shared.store.read().documents().to_vec()
    }

    /// Returns a copy of one document.
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.shared.store.read().get_by_id(id).cloned()
    }

    /// Returns the number of replicated documents.
    pub fn len(&self) -> usize {
        self.shared.store.read().len()
    }

    /// Returns true if the replica is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.store.read().is_empty()
    }

    /// Locks the replica for reading.
    ///
    /// The session cannot apply events while the guard is held.
    pub fn replica(&self) -> RwLockReadGuard<'_, ReplicaStore> {
        self.shared.store.read()
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Returns session statistics.
    pub fn stats(&self) -> SessionStats {
        self.shared.stats.read().clone()
    }

    /// Returns the error that ended the session, if any.
    pub fn error(&self) -> Option<SyncError> {
        self.shared.error.read().clone()
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("id", &self.shared.id)
            .field("collection", &self.shared.collection)
            .field("state", &self.state())
            .finish()
    }
}

/// Why the session task ended.
enum Exit {
    Stopped,
    FeedEnded,
    Invalidated,
    Failed(SyncError),
}

struct Worker {
    shared: Arc<Shared>,
    config: SessionConfig,
    sources: Sources,
    coordinator: InitializationCoordinator,
    shutdown: watch::Receiver<bool>,
    feed: Option<Box<dyn FeedHandle>>,
}

impl Worker {
    async fn run(mut self) {
        let mut guard = TaskGuard {
            shared: Arc::clone(&self.shared),
            finished: false,
        };
        info!(sort_key = %self.config.sort_key, limit = self.config.limit, "starting session");
        let exit = self.drive().await;

        if let Some(mut feed) = self.feed.take() {
            feed.close().await;
            debug!("feed closed");
        }

        self.finish(exit);
        guard.finished = true;
    }

    async fn drive(&mut self) -> Exit {
        let collection = self.config.collection.clone();

        let ensured = {
            let collections = Arc::clone(&self.sources.collections);
            until_shutdown(&mut self.shutdown, collections.ensure_exists(&collection)).await
        };
        match ensured {
            None => return Exit::Stopped,
            Some(Err(err)) => return Exit::Failed(err),
            Some(Ok(())) => debug!("collection ensured"),
        }

        let subscribed = {
            let feed = Arc::clone(&self.sources.feed);
            until_shutdown(&mut self.shutdown, feed.subscribe(&collection)).await
        };
        match subscribed {
            None => return Exit::Stopped,
            Some(Err(err)) => return Exit::Failed(err),
            Some(Ok(handle)) => {
                debug!("feed subscribed");
                self.feed = Some(handle);
            }
        }

        let snapshot = Arc::clone(&self.sources.snapshot);
        let sort = self.config.sort_spec();
        let query = snapshot.query(&collection, &sort, self.config.limit);
        tokio::pin!(query);

        let mut feed_open = true;
        let documents = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return Exit::Stopped,
                result = &mut query => match result {
                    Ok(documents) => break documents,
                    Err(err) => return Exit::Failed(err),
                },
                message = next_message(&mut self.feed), if feed_open => match message {
                    Some(FeedMessage::Change(event)) => {
                        if let Some(exit) = self.on_change(event) {
                            return exit;
                        }
                    }
                    Some(FeedMessage::Error(message)) => self.on_feed_error(message),
                    None => {
                        debug!("feed ended before snapshot completed");
                        feed_open = false;
                    }
                },
            }
        };

        if let Some(exit) = self.load_and_drain(documents) {
            return exit;
        }
        if !feed_open {
            return Exit::FeedEnded;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return Exit::Stopped,
                message = next_message(&mut self.feed) => match message {
                    Some(FeedMessage::Change(event)) => {
                        if let Some(exit) = self.on_change(event) {
                            return exit;
                        }
                    }
                    Some(FeedMessage::Error(message)) => self.on_feed_error(message),
                    None => return Exit::FeedEnded,
                },
            }
        }
    }

    fn load_and_drain(&mut self, documents: Vec<Document>) -> Option<Exit> {
        self.shared.set_state(SessionState::Draining);

        let shared = Arc::clone(&self.shared);
        let mut store = shared.store.write();

        let load = match self.coordinator.complete_snapshot(&mut store, documents) {
            Ok(load) => load,
            Err(err) => return Some(Exit::Failed(err)),
        };
        info!(documents = load.loaded, "snapshot loaded");
        shared.stats.write().snapshot_documents = load.loaded as u64;
        shared
            .notifier
            .publish(ReplicaNotification::SnapshotLoaded { count: load.loaded });

        let report = match self
            .coordinator
            .drain(&mut store, |outcome| shared.record_outcome(outcome))
        {
            Ok(report) => report,
            Err(err) => return Some(Exit::Failed(err)),
        };
        drop(store);

        if report.invalidated {
            return Some(Exit::Invalidated);
        }

        shared.stats.write().live_since = Some(Instant::now());
        shared.set_state(SessionState::Live);
        info!(
            applied = report.applied,
            skipped = report.skipped,
            "session live"
        );
        None
    }

    fn on_change(&mut self, event: ChangeEvent) -> Option<Exit> {
        self.shared.stats.write().events_received += 1;

        let result = {
            let mut store = self.shared.store.write();
            self.coordinator.on_event(&mut store, event)
        };

        match result {
            Ok(Disposition::Buffered) => {
                self.shared.stats.write().events_buffered += 1;
                None
            }
            Ok(Disposition::Applied(outcome)) => {
                self.shared.record_outcome(&outcome);
                (outcome == ApplyOutcome::Invalidated).then_some(Exit::Invalidated)
            }
            Err(err) if err.is_fatal() => Some(Exit::Failed(err)),
            Err(err) => {
                warn!(error = %err, "change rejected");
                self.shared.stats.write().last_error = Some(err.to_string());
                None
            }
        }
    }

    fn on_feed_error(&self, message: String) {
        warn!(error = %message, "feed error");
        {
            let mut stats = self.shared.stats.write();
            stats.feed_errors += 1;
            stats.last_error = Some(SyncError::feed(message.clone()).to_string());
        }
        self.shared
            .notifier
            .publish(ReplicaNotification::FeedError { message });
    }

    fn finish(&self, exit: Exit) {
        let shared = &self.shared;
        match exit {
            Exit::Stopped => {
                info!("session stopped");
                shared.set_state(SessionState::Stopped);
            }
            Exit::FeedEnded => {
                warn!("feed ended; replica no longer updated");
                shared.notifier.publish(ReplicaNotification::FeedEnded);
                shared.set_state(SessionState::Disconnected);
            }
            Exit::Invalidated => {
                warn!("feed invalidated; a new session is required");
                shared.record_error(&SyncError::Invalidated {
                    collection: shared.collection.clone(),
                });
                shared.set_state(SessionState::Invalidated);
            }
            Exit::Failed(err) => {
                error!(error = %err, "session failed");
                shared.record_error(&err);
                shared.notifier.publish(ReplicaNotification::Failed {
                    message: err.to_string(),
                });
                shared.set_state(SessionState::Failed);
            }
        }
    }
}

/// Moves the session to `Failed` if the task is torn down before
/// [`Worker::finish`] ran, which happens when it panics or is aborted.
struct TaskGuard {
    shared: Arc<Shared>,
    finished: bool,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = if std::thread::panicking() {
            error!(collection = %self.shared.collection, "session task panicked");
            "session task panicked"
        } else {
            warn!(collection = %self.shared.collection, "session task ended before finishing");
            "session task ended before finishing"
        };
        let err = SyncError::Task(message.into());
        self.shared.record_error(&err);
        self.shared.notifier.publish(ReplicaNotification::Failed {
            message: err.to_string(),
        });
        self.shared.set_state(SessionState::Failed);
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn until_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    future: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown) => None,
        output = future => Some(output),
    }
}

async fn next_message(feed: &mut Option<Box<dyn FeedHandle>>) -> Option<FeedMessage> {
    match feed {
        Some(handle) => handle.next().await,
        None => None,
    }
}
