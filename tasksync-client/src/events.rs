//! Event callbacks for the sync client
//!
//! Events are generated wherever the client does work (mutations, reconcile
//! cycles, connectivity changes, live snapshots) and queued. Registered
//! callbacks only run when the host calls `process_events()`, so callbacks
//! execute on the host's thread at a moment it chooses.
//!
//! # Example
//!
//! ```rust,no_run
//! use tasksync_client::events::{EventDispatcher, SyncEvent};
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher.register_callback(|event| {
//!     if let SyncEvent::SyncCompleted { tasks_confirmed, .. } = event {
//!         println!("{} tasks confirmed", tasks_confirmed);
//!     }
//! });
//! dispatcher.process_events();
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tasksync_core::{QueueEntryId, TaskId, TaskStatus};

/// Event categories, used to filter callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskIdPromoted,
    SyncStarted,
    SyncCompleted,
    SyncError,
    NeedsResolution,
    ConnectivityChanged,
    SnapshotApplied,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A task was created locally. `queued` is true when the remote has not
    /// confirmed it yet.
    TaskCreated {
        id: TaskId,
        title: String,
        queued: bool,
    },
    TaskUpdated {
        id: TaskId,
        status: TaskStatus,
        queued: bool,
    },
    TaskDeleted {
        id: TaskId,
        queued: bool,
    },
    /// A temporary id was replaced by the id the remote store assigned.
    TaskIdPromoted {
        temporary: TaskId,
        remote: TaskId,
    },
    SyncStarted,
    SyncCompleted {
        tasks_confirmed: usize,
        changes_replayed: usize,
        failed: usize,
    },
    SyncError {
        message: String,
    },
    /// A queue entry exhausted its retries and needs the user to decide.
    NeedsResolution {
        entry: QueueEntryId,
        task_id: TaskId,
        last_error: String,
    },
    ConnectivityChanged {
        online: bool,
    },
    SnapshotApplied {
        task_count: usize,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SyncEvent::TaskCreated { .. } => EventType::TaskCreated,
            SyncEvent::TaskUpdated { .. } => EventType::TaskUpdated,
            SyncEvent::TaskDeleted { .. } => EventType::TaskDeleted,
            SyncEvent::TaskIdPromoted { .. } => EventType::TaskIdPromoted,
            SyncEvent::SyncStarted => EventType::SyncStarted,
            SyncEvent::SyncCompleted { .. } => EventType::SyncCompleted,
            SyncEvent::SyncError { .. } => EventType::SyncError,
            SyncEvent::NeedsResolution { .. } => EventType::NeedsResolution,
            SyncEvent::ConnectivityChanged { .. } => EventType::ConnectivityChanged,
            SyncEvent::SnapshotApplied { .. } => EventType::SnapshotApplied,
        }
    }
}

struct CallbackEntry {
    callback: Box<dyn Fn(SyncEvent) + Send>,
    event_filter: Option<EventType>,
}

/// Queues events from any task or thread and hands them to callbacks on
/// `process_events()`.
pub struct EventDispatcher {
    callbacks: Mutex<Vec<CallbackEntry>>,
    event_queue: Mutex<mpsc::Receiver<SyncEvent>>,
    event_sender: Mutex<mpsc::Sender<SyncEvent>>,
    queued: AtomicUsize,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            callbacks: Mutex::new(Vec::new()),
            event_queue: Mutex::new(receiver),
            event_sender: Mutex::new(sender),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(SyncEvent) + Send + 'static,
    {
        self.callbacks.lock().push(CallbackEntry {
            callback: Box::new(callback),
            event_filter: None,
        });
    }

    /// Register a callback that only receives events of `event_filter`.
    pub fn register_filtered<F>(&self, callback: F, event_filter: EventType)
    where
        F: Fn(SyncEvent) + Send + 'static,
    {
        self.callbacks.lock().push(CallbackEntry {
            callback: Box::new(callback),
            event_filter: Some(event_filter),
        });
    }

    pub fn emit(&self, event: SyncEvent) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.event_sender.lock().send(event).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Failed to queue event - receiver may have been dropped");
        }
    }

    /// Deliver every queued event to the matching callbacks. Returns the number
    /// of events processed; events queued with no callback registered are
    /// dropped.
    pub fn process_events(&self) -> usize {
        let queue = self.event_queue.lock();
        let callbacks = self.callbacks.lock();

        let mut processed_count = 0;
        while let Ok(event) = queue.try_recv() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            let event_type = event.event_type();
            for entry in callbacks.iter() {
                if entry.event_filter.map_or(true, |f| f == event_type) {
                    (entry.callback)(event.clone());
                }
            }
            processed_count += 1;
        }
        processed_count
    }

    /// Number of events waiting for `process_events()`.
    pub fn pending_event_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
