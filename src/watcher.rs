//! Filesystem watcher and indexing worker pool.
//!
//! The watch loop consumes an [`EventStream`] from an [`EventSource`], feeds
//! every relevant path through the [`Debouncer`], and hands expired paths to
//! a pool of at most `workers` concurrent processing passes. Passes for the
//! same path are serialized by the [`Indexer`]'s per-path locks.
//!
//! ```text
//! EventSource ──► watch loop ──► Debouncer ──(Due)──► worker pool ──► Indexer::process
//!                     ▲
//!   WatchControl ─────┘ (enqueue, shutdown)
//! ```
//!
//! Progress is published as a [`WatcherStatus`] on a `tokio::sync::watch`
//! channel. Indexing failures are counted and logged; they never stop the
//! loop.

use anyhow::Result;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::WatcherConfig;
use crate::debounce::Debouncer;
use crate::indexer::{Indexer, PassOutcome};
use crate::models::EventKind;
use crate::paths::{normalize_relative, relative_to};

const EVENT_BUFFER: usize = 1024;

/// A raw filesystem notification. `path` may be absolute (under the root)
/// or already root-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: EventKind,
}

/// Infinite, non-restartable sequence of filesystem events.
pub struct EventStream {
    rx: mpsc::Receiver<FsEvent>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl EventStream {
    pub fn from_receiver(rx: mpsc::Receiver<FsEvent>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` alive for as long as the stream is.
    pub fn with_guard(rx: mpsc::Receiver<FsEvent>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            rx,
            _guard: Some(guard),
        }
    }

    pub async fn next(&mut self) -> Option<FsEvent> {
        self.rx.recv().await
    }
}

/// Produces the event stream for a root directory.
pub trait EventSource: Send {
    fn subscribe(&mut self, root: &Path) -> Result<EventStream>;
}

/// OS notifications via `notify`'s recommended backend.
pub struct NotifySource {
    poll_interval: Duration,
}

impl NotifySource {
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }
}

impl EventSource for NotifySource {
    fn subscribe(&mut self, root: &Path) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for fs_event in map_notify_event(&event) {
                        let _ = tx.blocking_send(fs_event);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "watcher error"),
            },
            NotifyConfig::default().with_poll_interval(self.poll_interval),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for changes");
        Ok(EventStream::with_guard(rx, Box::new(watcher)))
    }
}

fn map_notify_event(event: &Event) -> Vec<FsEvent> {
    use notify::EventKind as K;
    let kind = match event.kind {
        K::Create(_) => EventKind::Created,
        K::Modify(_) | K::Any => EventKind::Modified,
        K::Remove(_) => EventKind::Deleted,
        K::Access(_) | K::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|path| FsEvent {
            path: path.clone(),
            kind,
        })
        .collect()
}

/// Events pushed through an `mpsc` channel; the sender side is returned by
/// [`ChannelSource::new`]. Lets another producer (or a test) drive the
/// watcher.
pub struct ChannelSource {
    rx: Option<mpsc::Receiver<FsEvent>>,
}

impl ChannelSource {
    pub fn new() -> (Self, mpsc::Sender<FsEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self { rx: Some(rx) }, tx)
    }
}

impl EventSource for ChannelSource {
    fn subscribe(&mut self, _root: &Path) -> Result<EventStream> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("channel source already subscribed"))?;
        Ok(EventStream::from_receiver(rx))
    }
}

// ============ Status & control ============

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WatcherStatus {
    pub running: bool,
    /// Paths waiting out their debounce window.
    pub pending: usize,
    /// Passes currently executing or waiting for a worker.
    pub in_flight: usize,
    pub passes_completed: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
enum WatchCommand {
    Enqueue(String, EventKind),
    Shutdown,
}

/// Cloneable handle for feeding and observing a running watcher.
#[derive(Clone)]
pub struct WatchControl {
    commands: mpsc::UnboundedSender<WatchCommand>,
    status: watch::Receiver<WatcherStatus>,
}

impl WatchControl {
    /// Queue a path as if a notification had arrived for it.
    pub fn enqueue(&self, path: &str, kind: EventKind) -> bool {
        self.commands
            .send(WatchCommand::Enqueue(path.to_string(), kind))
            .is_ok()
    }

    pub fn status(&self) -> WatcherStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatcherStatus> {
        self.status.clone()
    }
}

pub struct WatcherHandle {
    control: WatchControl,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn control(&self) -> WatchControl {
        self.control.clone()
    }

    /// Stop intake, cancel pending timers and wait for in-flight passes.
    pub async fn shutdown(self) {
        let _ = self.control.commands.send(WatchCommand::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "watch loop panicked");
        }
    }
}

/// Subscribe to `source` and start the watch loop.
///
/// With `startup_scan`, the loop first reconciles the tree against the
/// registry and queues every stale, new or orphaned path.
pub fn spawn_watcher(
    indexer: Arc<Indexer>,
    mut source: Box<dyn EventSource>,
    config: &WatcherConfig,
    startup_scan: bool,
) -> Result<WatcherHandle> {
    let stream = source.subscribe(indexer.root())?;
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(WatcherStatus {
        running: true,
        ..WatcherStatus::default()
    });

    let watch_loop = WatchLoop {
        indexer,
        window: Duration::from_millis(config.debounce_ms),
        workers: config.workers.max(1),
        status: Arc::new(status_tx),
    };
    let task = tokio::spawn(watch_loop.run(stream, command_rx, startup_scan));

    Ok(WatcherHandle {
        control: WatchControl {
            commands: command_tx,
            status: status_rx,
        },
        task,
    })
}

struct WatchLoop {
    indexer: Arc<Indexer>,
    window: Duration,
    workers: usize,
    status: Arc<watch::Sender<WatcherStatus>>,
}

impl WatchLoop {
    async fn run(
        self,
        mut stream: EventStream,
        mut commands: mpsc::UnboundedReceiver<WatchCommand>,
        startup_scan: bool,
    ) {
        let (mut debouncer, mut due_rx) = Debouncer::new(self.window);
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut in_flight = JoinSet::new();

        if startup_scan {
            match self.indexer.reconcile().await {
                Ok(events) => {
                    tracing::info!(queued = events.len(), "startup scan finished");
                    for (path, kind) in events {
                        debouncer.notify(&path, kind);
                    }
                }
                Err(e) => tracing::error!(error = %e, "startup scan failed"),
            }
            self.publish_pending(debouncer.len());
        }

        let mut stream_open = true;
        loop {
            tokio::select! {
                event = stream.next(), if stream_open => match event {
                    Some(event) => {
                        if let Some(path) = self.relevant_path(&event.path) {
                            debouncer.notify(&path, event.kind);
                            self.publish_pending(debouncer.len());
                        }
                    }
                    None => {
                        tracing::warn!("event stream closed");
                        stream_open = false;
                    }
                },
                Some(due) = due_rx.recv() => {
                    if let Some(event) = debouncer.accept(due) {
                        self.publish_pending(debouncer.len());
                        self.dispatch(&mut in_flight, permits.clone(), event.path, event.event_type);
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                command = commands.recv() => match command {
                    Some(WatchCommand::Enqueue(path, kind)) => {
                        debouncer.notify(&path, kind);
                        self.publish_pending(debouncer.len());
                    }
                    Some(WatchCommand::Shutdown) | None => break,
                },
            }
        }

        let dropped = debouncer.cancel_all();
        tracing::info!(dropped, in_flight = in_flight.len(), "watcher stopping");
        while in_flight.join_next().await.is_some() {}
        self.status.send_modify(|s| {
            s.running = false;
            s.pending = 0;
            s.in_flight = 0;
        });
    }

    fn relevant_path(&self, path: &Path) -> Option<String> {
        let rel = if path.is_absolute() {
            relative_to(self.indexer.root(), path)?
        } else {
            normalize_relative(&path.to_string_lossy()).ok()?
        };
        self.indexer.filter().matches(&rel).then_some(rel)
    }

    fn publish_pending(&self, pending: usize) {
        self.status.send_if_modified(|s| {
            let changed = s.pending != pending;
            s.pending = pending;
            changed
        });
    }

    fn dispatch(
        &self,
        in_flight: &mut JoinSet<()>,
        permits: Arc<Semaphore>,
        path: String,
        kind: EventKind,
    ) {
        let indexer = self.indexer.clone();
        let status = self.status.clone();
        status.send_modify(|s| s.in_flight += 1);

        in_flight.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            tracing::debug!(path = %path, event = ?kind, "processing");
            let result = indexer.process(&path).await;
            status.send_modify(|s| {
                s.in_flight = s.in_flight.saturating_sub(1);
                match result {
                    Ok(PassOutcome::Indexed { .. } | PassOutcome::Removed) => s.passes_completed += 1,
                    Ok(PassOutcome::Ignored | PassOutcome::Unsupported) => {}
                    Err(e) => {
                        s.failures += 1;
                        s.last_error = Some(format!("{path}: {e}"));
                    }
                }
            });
        });
    }
}
