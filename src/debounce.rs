//! Per-path debouncing.
//!
//! Each path with a pending notification owns a [`DebounceTimer`]. Every new
//! notification for the path calls [`DebounceTimer::reset`], which cancels
//! the running timer and starts a fresh one, so a burst of writes ends in a
//! single expiry once the path has been quiet for the whole window.
//!
//! Expiries are delivered as [`Due`] messages on a channel rather than as
//! callbacks, so the watch loop can `select!` over them. Each reset bumps a
//! generation number; a `Due` that was already in flight when its timer was
//! reset carries a stale generation and is dropped by [`Debouncer::accept`].

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::{EventKind, PendingEvent};

/// Timer expiry for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Due {
    pub path: String,
    generation: u64,
}

/// A restartable one-shot timer.
pub struct DebounceTimer {
    window: Duration,
    task: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new(window: Duration) -> Self {
        Self { window, task: None }
    }

    /// Cancel any running countdown and start a new one that sends `due`
    /// on `tx` after the window.
    pub fn reset(&mut self, due: Due, tx: mpsc::UnboundedSender<Due>) {
        self.cancel();
        let window = self.window;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = tx.send(due);
        }));
    }

    /// Stop the countdown. No-op when none is running.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Slot {
    event: PendingEvent,
    timer: DebounceTimer,
    generation: u64,
}

/// The set of paths in `PendingDebounce`.
pub struct Debouncer {
    window: Duration,
    pending: HashMap<String, Slot>,
    next_generation: u64,
    due_tx: mpsc::UnboundedSender<Due>,
}

impl Debouncer {
    /// A debouncer and the receiver its expiries arrive on.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<Due>) {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        (
            Self {
                window,
                pending: HashMap::new(),
                next_generation: 0,
                due_tx,
            },
            due_rx,
        )
    }

    /// Record a notification for `path`, (re)starting its timer.
    ///
    /// The pending event keeps the most recent kind and timestamp.
    pub fn notify(&mut self, path: &str, kind: EventKind) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let now = Instant::now();

        let slot = self.pending.entry(path.to_string()).or_insert_with(|| Slot {
            event: PendingEvent {
                path: path.to_string(),
                event_type: kind,
                last_seen: now,
            },
            timer: DebounceTimer::new(self.window),
            generation,
        });
        slot.event.event_type = kind;
        slot.event.last_seen = now;
        slot.generation = generation;
        slot.timer.reset(
            Due {
                path: path.to_string(),
                generation,
            },
            self.due_tx.clone(),
        );
    }

    /// Consume an expiry. Returns the pending event if `due` is current,
    /// `None` if the path was reset or cancelled after the timer fired.
    pub fn accept(&mut self, due: Due) -> Option<PendingEvent> {
        match self.pending.get(&due.path) {
            Some(slot) if slot.generation == due.generation => {
                self.pending.remove(&due.path).map(|slot| slot.event)
            }
            _ => None,
        }
    }

    /// Drop the pending event for `path`. Returns whether one existed.
    pub fn cancel(&mut self, path: &str) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Drop every pending event. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
