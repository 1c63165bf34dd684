pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod effects;
pub mod events;
pub mod monitor;
pub mod pipeline;
pub mod projection;
pub mod queries;
pub mod reconciler;
pub mod remote;
pub mod storage;
pub mod websocket;

pub use cache::LocalCache;
pub use client::{QueueStatus, TaskClient, TaskClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, RetryPolicy};
pub use effects::{CalendarProvider, NotificationScheduler, ReminderHandle, SideEffects};
pub use events::{EventDispatcher, EventType, SyncEvent};
pub use monitor::{AppLifecycle, SyncTrigger};
pub use reconciler::{ReconcileReport, UnresolvedEntry};
pub use remote::{RemoteStore, Subscription};
pub use storage::{MemoryStorage, SqliteStorage, Storage};
pub use websocket::WebSocketRemote;
