//! zbus client for `org.freedesktop.ScreenSaver`.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use vigil_core::{BackendError, InhibitCookie, SessionBackend};
use zbus::Connection;

/// Application name reported to the screen saver service on inhibit.
pub const APP_NAME: &str = "vigild";

#[zbus::proxy(
    interface = "org.freedesktop.ScreenSaver",
    default_service = "org.freedesktop.ScreenSaver",
    default_path = "/org/freedesktop/ScreenSaver"
)]
trait ScreenSaver {
    /// Engage the screen locker.
    fn lock(&self) -> zbus::Result<()>;

    /// Set the locker active or release it. Returns whether the request
    /// took effect; we only care that the call was delivered.
    fn set_active(&self, active: bool) -> zbus::Result<bool>;

    /// Seconds of session idle time.
    fn get_session_idle_time(&self) -> zbus::Result<u32>;

    fn inhibit(&self, application_name: &str, reason_for_inhibit: &str) -> zbus::Result<u32>;

    fn un_inhibit(&self, cookie: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn active_changed(&self, active: bool) -> zbus::Result<()>;
}

/// Session-bus client for the desktop screen locker.
#[derive(Clone)]
pub struct ScreenSaverClient {
    proxy: ScreenSaverProxy<'static>,
}

impl ScreenSaverClient {
    /// Connect to the session bus and bind the screen saver proxy.
    pub async fn connect() -> Result<Self, zbus::Error> {
        let conn = Connection::session().await?;
        Self::with_connection(&conn).await
    }

    /// Bind the proxy on an existing connection. The connection may be
    /// shared with other services on the same bus.
    pub async fn with_connection(conn: &Connection) -> Result<Self, zbus::Error> {
        Ok(Self {
            proxy: ScreenSaverProxy::new(conn).await?,
        })
    }
}

fn call_error(err: zbus::Error) -> BackendError {
    BackendError::Call(err.to_string())
}

#[async_trait]
impl SessionBackend for ScreenSaverClient {
    async fn lock(&self) -> Result<(), BackendError> {
        self.proxy.lock().await.map_err(call_error)
    }

    async fn set_active(&self, active: bool) -> Result<(), BackendError> {
        self.proxy
            .set_active(active)
            .await
            .map(|_| ())
            .map_err(call_error)
    }

    async fn idle_time(&self) -> Result<u64, BackendError> {
        self.proxy
            .get_session_idle_time()
            .await
            .map(u64::from)
            .map_err(call_error)
    }

    async fn inhibit(&self, reason: &str) -> Result<InhibitCookie, BackendError> {
        self.proxy
            .inhibit(APP_NAME, reason)
            .await
            .map(InhibitCookie)
            .map_err(call_error)
    }

    async fn uninhibit(&self, cookie: InhibitCookie) -> Result<(), BackendError> {
        self.proxy.un_inhibit(cookie.0).await.map_err(call_error)
    }

    async fn subscribe_active_changed(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<bool>, BackendError> {
        let mut stream = self
            .proxy
            .receive_active_changed()
            .await
            .map_err(|e| BackendError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(signal) = stream.next().await {
                match signal.args() {
                    Ok(args) => {
                        if tx.send(*args.active()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed ActiveChanged signal")
                    }
                }
            }
            tracing::debug!("ActiveChanged signal stream closed");
        });
        Ok(rx)
    }
}
