//! Trait seams for the desktop session backend and the presence signal.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("session backend call failed: {0}")]
    Call(String),
    #[error("lock-state subscription failed: {0}")]
    Subscribe(String),
}

/// Opaque token for a held "do not auto-lock" request. Returned by
/// [`SessionBackend::inhibit`] and passed back exactly once to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InhibitCookie(pub u32);

/// Desktop session service: lock/unlock, idle query, lock inhibition, and
/// an authoritative stream of lock-state change events.
///
/// Calls may be issued concurrently from independent components over a
/// shared connection; implementations must treat each call as an
/// independent request/response exchange.
#[async_trait]
pub trait SessionBackend: Send + Sync + 'static {
    /// Engage the screen locker.
    async fn lock(&self) -> Result<(), BackendError>;

    /// Set the locker active (`true`) or release it (`false`).
    async fn set_active(&self, active: bool) -> Result<(), BackendError>;

    /// Seconds since the last user input.
    async fn idle_time(&self) -> Result<u64, BackendError>;

    async fn inhibit(&self, reason: &str) -> Result<InhibitCookie, BackendError>;

    async fn uninhibit(&self, cookie: InhibitCookie) -> Result<(), BackendError>;

    /// Register for lock-state change events. The returned stream is the
    /// only authoritative source of lock state; consumers never infer it
    /// from their own lock/unlock calls.
    async fn subscribe_active_changed(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<bool>, BackendError>;
}

/// Source of presence transitions. Delivery is at-least-once and not
/// deduplicated; consumers must tolerate repeated identical events.
pub trait PresenceSource: Send + Sync {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool>;
}

/// Presence source that never emits.
pub struct NullPresenceSource;

impl PresenceSource for NullPresenceSource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        // The sender is dropped immediately; the stream just ends.
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }
}

/// Holds a session-wide lock inhibition for the lifetime of the process.
///
/// Release happens exactly once: explicitly through [`release`], or as a
/// best-effort detached call from `Drop` on abandoned exit paths.
///
/// [`release`]: InhibitGuard::release
pub struct InhibitGuard<B: SessionBackend> {
    backend: Arc<B>,
    cookie: Option<InhibitCookie>,
}

impl<B: SessionBackend> InhibitGuard<B> {
    pub async fn acquire(backend: Arc<B>, reason: &str) -> Result<Self, BackendError> {
        let cookie = backend.inhibit(reason).await?;
        tracing::info!(cookie = cookie.0, "lock inhibition acquired");
        Ok(Self {
            backend,
            cookie: Some(cookie),
        })
    }

    pub fn cookie(&self) -> Option<InhibitCookie> {
        self.cookie
    }

    /// Consume the guard and release the cookie.
    pub async fn release(mut self) -> Result<(), BackendError> {
        match self.cookie.take() {
            Some(cookie) => {
                tracing::info!(cookie = cookie.0, "releasing lock inhibition");
                self.backend.uninhibit(cookie).await
            }
            None => Ok(()),
        }
    }
}

impl<B: SessionBackend> Drop for InhibitGuard<B> {
    fn drop(&mut self) {
        if let Some(cookie) = self.cookie.take() {
            let backend = Arc::clone(&self.backend);
            // Drop cannot await; hand the release to the runtime if one
            // is still running.
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = backend.uninhibit(cookie).await {
                            tracing::warn!(error = %err, "uninhibit on drop failed");
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(cookie = cookie.0, "inhibition cookie leaked: no runtime at drop");
                }
            }
        }
    }
}
