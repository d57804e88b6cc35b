//! D-Bus surface for the Vigil presence daemon.
//!
//! Bus name: org.freedesktop.Vigil1
//! Object path: /org/freedesktop/Vigil1

use std::sync::Arc;

use vigil_core::{Coordinator, Notification, NotificationReceiver, TrainingScheduler};
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::Connection;

use crate::presence::ReportedPresenceSource;
use crate::training::CommandTrainer;
use crate::whitelist::WhitelistStore;

use vigil_session::ScreenSaverClient;

pub const BUS_NAME: &str = "org.freedesktop.Vigil1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Vigil1";

type Scheduler = TrainingScheduler<ScreenSaverClient, CommandTrainer>;

/// D-Bus interface for the Vigil presence daemon.
pub struct VigilService {
    coordinator: Arc<Coordinator<ScreenSaverClient>>,
    scheduler: Option<Arc<Scheduler>>,
    presence: Arc<ReportedPresenceSource>,
    whitelist: Arc<WhitelistStore>,
}

impl VigilService {
    pub fn new(
        coordinator: Arc<Coordinator<ScreenSaverClient>>,
        scheduler: Option<Arc<Scheduler>>,
        presence: Arc<ReportedPresenceSource>,
        whitelist: Arc<WhitelistStore>,
    ) -> Self {
        Self {
            coordinator,
            scheduler,
            presence,
            whitelist,
        }
    }
}

#[interface(name = "org.freedesktop.Vigil1")]
impl VigilService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let users = self.whitelist.users().map(|u| u.len()).unwrap_or(0);
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "locked": self.coordinator.is_locked(),
            "training": self.scheduler.as_ref().map(|s| s.is_running()).unwrap_or(false),
            "training_configured": self.scheduler.is_some(),
            "users": users,
        })
        .to_string())
    }

    /// Run training if forced or the session is idle past the threshold.
    /// Returns whether training ran.
    async fn train(&self, force: bool) -> zbus::fdo::Result<bool> {
        tracing::info!(force, "train requested");
        let Some(scheduler) = &self.scheduler else {
            return Err(zbus::fdo::Error::NotSupported(
                "no training command configured".into(),
            ));
        };
        scheduler
            .maybe_train(force)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Feed for an out-of-process presence detector.
    async fn report_presence(&self, present: bool) {
        tracing::debug!(present, "presence reported over bus");
        self.presence.report(present);
    }

    /// Add a name to the authorized-user whitelist.
    async fn add_user(&self, name: &str) -> zbus::fdo::Result<()> {
        self.whitelist
            .add_user(name)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove a name from the authorized-user whitelist.
    async fn remove_user(&self, name: &str) -> zbus::fdo::Result<()> {
        self.whitelist
            .remove_user(name)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// List whitelisted names as a JSON array.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let users = self
            .whitelist
            .users()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&users).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    #[zbus(signal)]
    async fn presence_changed(emitter: &SignalEmitter<'_>, present: bool) -> zbus::Result<()>;

    /// Seconds until the pending lock fires; -1 clears the countdown.
    #[zbus(signal)]
    async fn countdown_changed(emitter: &SignalEmitter<'_>, seconds: i64) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn lock_changed(emitter: &SignalEmitter<'_>, locked: bool) -> zbus::Result<()>;
}

/// Re-emit coordinator notifications as D-Bus signals for UI layers.
pub async fn forward_notifications(conn: Connection, mut notifications: NotificationReceiver) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(err) => {
            tracing::warn!(error = %err, "cannot emit notification signals");
            return;
        }
    };
    while let Some(event) = notifications.recv().await {
        let result = match event {
            Notification::Presence(present) => {
                VigilService::presence_changed(&emitter, present).await
            }
            Notification::Countdown(seconds) => {
                let encoded = seconds.map(|s| s as i64).unwrap_or(-1);
                VigilService::countdown_changed(&emitter, encoded).await
            }
            Notification::Lock(locked) => VigilService::lock_changed(&emitter, locked).await,
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "signal emission failed");
        }
    }
}
