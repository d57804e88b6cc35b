//! Screen-lock coordination: presence transitions in, lock actions out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::{BackendError, PresenceSource, SessionBackend};
use crate::events::{Notification, NotificationBus};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Subscribe(#[from] BackendError),
}

/// At most one of these exists per coordinator instance. Owns the
/// countdown task counting down to the delayed lock.
struct PendingLock {
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl PendingLock {
    fn cancel(self) {
        // Flag first so an in-flight tick observes cancellation before
        // publishing, then abort the task at its next await point.
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Subscribes to presence and lock-state change streams and drives the
/// lock/unlock decision state machine.
///
/// The cached lock state is written only from backend-originated change
/// events; lock and unlock requests issued here never touch it.
pub struct Coordinator<B: SessionBackend> {
    backend: Arc<B>,
    presence: Arc<dyn PresenceSource>,
    bus: NotificationBus,
    absent_timeout: Duration,
    locked: AtomicBool,
    pending: Mutex<Option<PendingLock>>,
}

impl<B: SessionBackend> Coordinator<B> {
    pub fn new(
        backend: Arc<B>,
        presence: Arc<dyn PresenceSource>,
        bus: NotificationBus,
        absent_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            presence,
            bus,
            absent_timeout,
            locked: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    /// Cached mirror of the backend's lock state, for display only.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Register on both event streams and spawn the event loop.
    ///
    /// Fails only if the lock-state subscription itself fails; backend
    /// reachability is not otherwise validated.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>, CoordinatorError> {
        let mut active_rx = self.backend.subscribe_active_changed().await?;
        let mut presence_rx = self.presence.subscribe();

        Ok(tokio::spawn(async move {
            let mut presence_open = true;
            let mut active_open = true;
            loop {
                tokio::select! {
                    event = presence_rx.recv(), if presence_open => match event {
                        Some(present) => self.on_presence(present),
                        None => presence_open = false,
                    },
                    event = active_rx.recv(), if active_open => match event {
                        Some(active) => self.on_active_changed(active),
                        None => active_open = false,
                    },
                    else => break,
                }
            }
            tracing::debug!("coordinator event loop finished");
        }))
    }

    fn on_presence(&self, present: bool) {
        tracing::debug!(present, "presence event");
        if present {
            self.clear_pending();
            self.bus.publish(Notification::Presence(true));
            self.bus.publish(Notification::Countdown(None));
            if self.locked.load(Ordering::SeqCst) {
                let backend = Arc::clone(&self.backend);
                // Detached: an unlock failure self-corrects on the next
                // authoritative ActiveChanged event.
                tokio::spawn(async move {
                    if let Err(err) = backend.set_active(false).await {
                        tracing::warn!(error = %err, "unlock request failed");
                    }
                });
            }
        } else {
            self.bus.publish(Notification::Presence(false));
            self.arm_pending();
        }
    }

    fn on_active_changed(&self, active: bool) {
        self.locked.store(active, Ordering::SeqCst);
        self.bus.publish(Notification::Lock(active));
    }

    fn clear_pending(&self) {
        let taken = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(pending) = taken {
            pending.cancel();
        }
    }

    /// Replace any outstanding countdown with a fresh one. Swap happens
    /// under the slot lock so racing absence events still leave exactly
    /// one timer.
    fn arm_pending(&self) {
        let deadline = Instant::now() + self.absent_timeout;
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = run_countdown(
            deadline,
            Arc::clone(&self.backend),
            self.bus.clone(),
            Arc::clone(&cancelled),
        );

        let mut slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.cancel();
        }
        *slot = Some(PendingLock {
            handle: tokio::spawn(task),
            cancelled,
        });
    }
}

impl<B: SessionBackend> Drop for Coordinator<B> {
    fn drop(&mut self) {
        self.clear_pending();
    }
}

/// Count down to `deadline` in at-most one-second ticks, then issue the
/// lock request. The terminal `Countdown(None)` is published from a drop
/// guard so every exit path clears the countdown, aborts included.
async fn run_countdown<B: SessionBackend>(
    deadline: Instant,
    backend: Arc<B>,
    bus: NotificationBus,
    cancelled: Arc<AtomicBool>,
) {
    let _clear = CountdownClear { bus: bus.clone() };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        bus.publish(Notification::Countdown(Some(remaining.as_secs().max(1))));
        tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
    }

    if cancelled.load(Ordering::SeqCst) {
        return;
    }
    if let Err(err) = backend.lock().await {
        tracing::warn!(error = %err, "lock request failed");
    }
}

struct CountdownClear {
    bus: NotificationBus,
}

impl Drop for CountdownClear {
    fn drop(&mut self) {
        self.bus.publish(Notification::Countdown(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InhibitCookie, InhibitGuard, NullPresenceSource};
    use crate::events::NotificationReceiver;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Records calls and echoes authoritative ActiveChanged events back
    /// to subscribers, the way the real locker does.
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        active_txs: Mutex<Vec<mpsc::UnboundedSender<bool>>>,
        uninhibits: AtomicUsize,
        idle: u64,
        fail_subscribe: bool,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                active_txs: Mutex::new(Vec::new()),
                uninhibits: AtomicUsize::new(0),
                idle: 0,
                fail_subscribe: false,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn echo_active(&self, active: bool) {
            for tx in self.active_txs.lock().unwrap().iter() {
                let _ = tx.send(active);
            }
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn lock(&self) -> Result<(), BackendError> {
            self.record("lock");
            self.echo_active(true);
            Ok(())
        }

        async fn set_active(&self, active: bool) -> Result<(), BackendError> {
            self.record(&format!("set_active:{active}"));
            self.echo_active(active);
            Ok(())
        }

        async fn idle_time(&self) -> Result<u64, BackendError> {
            Ok(self.idle)
        }

        async fn inhibit(&self, _reason: &str) -> Result<InhibitCookie, BackendError> {
            self.record("inhibit");
            Ok(InhibitCookie(7))
        }

        async fn uninhibit(&self, _cookie: InhibitCookie) -> Result<(), BackendError> {
            self.uninhibits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe_active_changed(
            &self,
        ) -> Result<mpsc::UnboundedReceiver<bool>, BackendError> {
            if self.fail_subscribe {
                return Err(BackendError::Subscribe("no session bus".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.active_txs.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    struct FakePresence {
        listeners: Mutex<Vec<mpsc::UnboundedSender<bool>>>,
    }

    impl FakePresence {
        fn new() -> Self {
            Self {
                listeners: Mutex::new(Vec::new()),
            }
        }

        fn emit(&self, present: bool) {
            for tx in self.listeners.lock().unwrap().iter() {
                let _ = tx.send(present);
            }
        }
    }

    impl PresenceSource for FakePresence {
        fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.listeners.lock().unwrap().push(tx);
            rx
        }
    }

    fn drain(rx: &mut NotificationReceiver) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn setup(
        absent_timeout: Duration,
    ) -> (
        Arc<FakeBackend>,
        Arc<FakePresence>,
        Arc<Coordinator<FakeBackend>>,
        NotificationReceiver,
        JoinHandle<()>,
    ) {
        let backend = Arc::new(FakeBackend::new());
        let presence = Arc::new(FakePresence::new());
        let bus = NotificationBus::new();
        let (_id, rx) = bus.subscribe();
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&backend),
            Arc::clone(&presence) as Arc<dyn PresenceSource>,
            bus,
            absent_timeout,
        ));
        let task = Arc::clone(&coordinator).start().await.unwrap();
        (backend, presence, coordinator, rx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn lock_fires_after_uninterrupted_absence() {
        let (backend, presence, _coordinator, mut rx, _task) =
            setup(Duration::from_millis(10)).await;

        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let calls = backend.calls();
        assert_eq!(calls.iter().filter(|c| *c == "lock").count(), 1);

        let events = drain(&mut rx);
        assert!(events.contains(&Notification::Presence(false)));
        assert!(events
            .iter()
            .any(|e| matches!(e, Notification::Countdown(Some(_)))));
        assert!(events.contains(&Notification::Lock(true)));
        // The countdown is cleared after firing.
        let last_countdown = events
            .iter()
            .rev()
            .find(|e| matches!(e, Notification::Countdown(_)));
        assert_eq!(last_countdown, Some(&Notification::Countdown(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn return_before_timeout_cancels_lock() {
        let (backend, presence, _coordinator, mut rx, _task) =
            setup(Duration::from_millis(50)).await;

        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        presence.emit(true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(backend.calls().is_empty());

        let events = drain(&mut rx);
        assert!(events.contains(&Notification::Presence(true)));
        // No countdown tick may follow the clear emitted on return.
        let presence_true_at = events
            .iter()
            .position(|e| *e == Notification::Presence(true))
            .unwrap();
        assert!(!events[presence_true_at..]
            .iter()
            .any(|e| matches!(e, Notification::Countdown(Some(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_absence_restarts_countdown() {
        let (backend, presence, _coordinator, _rx, _task) =
            setup(Duration::from_millis(50)).await;

        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Identical event is not deduplicated: it replaces the timer and
        // the countdown starts over.
        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            backend.calls().iter().filter(|c| *c == "lock").count(),
            1,
            "one absence period, one lock"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_requested_on_return_while_locked() {
        let (backend, presence, coordinator, mut rx, _task) =
            setup(Duration::from_millis(10)).await;

        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.is_locked());

        presence.emit(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let calls = backend.calls();
        assert!(calls.contains(&"set_active:false".to_string()));
        assert!(!coordinator.is_locked());
        // The final lock notification comes from the backend's own echo.
        let last_lock = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, Notification::Lock(_)))
            .last();
        assert_eq!(last_lock, Some(Notification::Lock(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_every_second() {
        let (backend, presence, _coordinator, mut rx, _task) =
            setup(Duration::from_secs(3)).await;

        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(3100)).await;

        let ticks: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Notification::Countdown(Some(secs)) => Some(secs),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![3, 2, 1]);
        assert_eq!(backend.calls().iter().filter(|c| *c == "lock").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_state_cache_follows_backend_events_only() {
        let (backend, _presence, coordinator, mut rx, _task) =
            setup(Duration::from_secs(30)).await;

        assert!(!coordinator.is_locked());
        backend.echo_active(true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(coordinator.is_locked());
        assert_eq!(drain(&mut rx), vec![Notification::Lock(true)]);

        backend.echo_active(false);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!coordinator.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn null_presence_source_still_tracks_lock_state() {
        let backend = Arc::new(FakeBackend::new());
        let bus = NotificationBus::new();
        let (_id, mut rx) = bus.subscribe();
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&backend),
            Arc::new(NullPresenceSource) as Arc<dyn PresenceSource>,
            bus,
            Duration::from_secs(30),
        ));
        let _task = Arc::clone(&coordinator).start().await.unwrap();

        // The presence stream ends immediately; backend events still flow.
        backend.echo_active(true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(coordinator.is_locked());
        assert_eq!(drain(&mut rx), vec![Notification::Lock(true)]);
    }

    #[tokio::test]
    async fn start_propagates_subscription_failure() {
        let mut backend = FakeBackend::new();
        backend.fail_subscribe = true;
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(backend),
            Arc::new(FakePresence::new()) as Arc<dyn PresenceSource>,
            NotificationBus::new(),
            Duration::from_secs(30),
        ));
        assert!(coordinator.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_coordinator_still_releases_inhibition_once() {
        let (backend, presence, _coordinator, _rx, task) =
            setup(Duration::from_secs(30)).await;

        let guard = InhibitGuard::acquire(Arc::clone(&backend), "presence watch")
            .await
            .unwrap();

        presence.emit(false);
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Tear the coordinator down mid-countdown.
        task.abort();
        guard.release().await.unwrap();

        assert_eq!(backend.uninhibits.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls().iter().filter(|c| *c == "lock").count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_guard_releases_inhibition_once() {
        let backend = Arc::new(FakeBackend::new());
        let guard = InhibitGuard::acquire(Arc::clone(&backend), "presence watch")
            .await
            .unwrap();
        assert_eq!(guard.cookie(), Some(InhibitCookie(7)));

        drop(guard);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(backend.uninhibits.load(Ordering::SeqCst), 1);
    }
}
