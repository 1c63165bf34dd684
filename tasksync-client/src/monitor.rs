use crate::events::{EventDispatcher, SyncEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppLifecycle {
    #[default]
    Foreground,
    Background,
}

/// Why a reconcile cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    Foregrounded,
    Interval,
    Manual,
}

/// Turns raw signal values into triggers. Only a transition into reachable or
/// into foreground produces a trigger; repeating the current value does not.
#[derive(Debug, Clone)]
pub struct TransitionDetector {
    online: bool,
    lifecycle: AppLifecycle,
}

impl TransitionDetector {
    pub fn new(online: bool, lifecycle: AppLifecycle) -> Self {
        Self { online, lifecycle }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn connectivity(&mut self, online: bool) -> Option<SyncTrigger> {
        let restored = online && !self.online;
        self.online = online;
        restored.then_some(SyncTrigger::ConnectivityRestored)
    }

    pub fn lifecycle(&mut self, lifecycle: AppLifecycle) -> Option<SyncTrigger> {
        let foregrounded =
            lifecycle == AppLifecycle::Foreground && self.lifecycle == AppLifecycle::Background;
        self.lifecycle = lifecycle;
        foregrounded.then_some(SyncTrigger::Foregrounded)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Watch connectivity and lifecycle and forward a trigger for every
/// transition. Ends when both signals are closed or the trigger receiver is
/// dropped.
pub fn spawn_monitor(
    mut connectivity: watch::Receiver<bool>,
    mut lifecycle: watch::Receiver<AppLifecycle>,
    triggers: mpsc::Sender<SyncTrigger>,
    resync_interval: Option<Duration>,
    events: Arc<EventDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut detector = TransitionDetector::new(
            *connectivity.borrow_and_update(),
            *lifecycle.borrow_and_update(),
        );
        let mut ticker = resync_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut connectivity_open = true;
        let mut lifecycle_open = true;

        tracing::info!("MONITOR: Started (online: {})", detector.is_online());

        loop {
            let trigger = tokio::select! {
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    let was_online = detector.is_online();
                    let trigger = detector.connectivity(online);
                    if online != was_online {
                        tracing::info!("MONITOR: Connectivity changed, online: {}", online);
                        events.emit(SyncEvent::ConnectivityChanged { online });
                    }
                    trigger
                }
                changed = lifecycle.changed(), if lifecycle_open => {
                    if changed.is_err() {
                        lifecycle_open = false;
                        continue;
                    }
                    let state = *lifecycle.borrow_and_update();
                    tracing::debug!("MONITOR: App lifecycle {:?}", state);
                    detector.lifecycle(state)
                }
                _ = next_tick(&mut ticker), if ticker.is_some() => {
                    detector.is_online().then_some(SyncTrigger::Interval)
                }
                else => break,
            };

            if let Some(trigger) = trigger {
                tracing::info!("MONITOR: Requesting reconcile ({:?})", trigger);
                if triggers.send(trigger).await.is_err() {
                    break;
                }
            }
        }

        tracing::warn!("MONITOR: Stopped");
    })
}
