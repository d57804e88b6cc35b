use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vigil_core::{Coordinator, InhibitGuard, NotificationBus, PresenceSource, TrainingScheduler};
use vigil_session::ScreenSaverClient;

mod config;
mod dbus_interface;
mod presence;
mod training;
mod whitelist;

use config::Config;
use dbus_interface::{forward_notifications, VigilService, BUS_NAME, OBJECT_PATH};
use presence::{CommandProbe, ReportedPresenceSource, ScanPresenceSource};
use training::CommandTrainer;
use whitelist::WhitelistStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = Config::load().context("loading configuration")?;
    config
        .ensure_camera_dirs()
        .context("creating dataset directories")?;

    let conn = zbus::Connection::session()
        .await
        .context("connecting to session bus")?;
    let backend = Arc::new(
        ScreenSaverClient::with_connection(&conn)
            .await
            .context("binding screen saver proxy")?,
    );

    // Held for the whole session: vigild owns locking decisions, so the
    // desktop's own idle auto-lock stays suspended until we exit.
    let guard = InhibitGuard::acquire(Arc::clone(&backend), "presence-based locking active")
        .await
        .context("inhibiting desktop auto-lock")?;

    let whitelist = Arc::new(
        WhitelistStore::new(config.model.clone(), config.state_dir.clone())
            .context("opening whitelist store")?,
    );
    if whitelist.is_hash_mismatch() {
        tracing::warn!("model weights changed since last whitelist write; re-encrypting");
        if let Err(err) = whitelist.reencrypt() {
            tracing::warn!(error = %err, "whitelist re-encryption failed");
        }
    }

    // All presence lands on one hub: D-Bus reports always, the optional
    // in-process probe when configured.
    let hub = Arc::new(ReportedPresenceSource::new());
    let scanner = config
        .probe_command
        .as_deref()
        .and_then(CommandProbe::new)
        .map(|probe| {
            Arc::new(ScanPresenceSource::new(
                Arc::new(probe),
                Duration::from_secs_f64(config.present_interval),
                Duration::from_secs_f64(config.absent_interval),
            ))
        });
    if let Some(scanner) = &scanner {
        tracing::info!("presence probe enabled");
        let mut transitions = scanner.subscribe();
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            while let Some(present) = transitions.recv().await {
                hub.report(present);
            }
        });
    }

    let bus = NotificationBus::new();
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&backend),
        Arc::clone(&hub) as Arc<dyn PresenceSource>,
        bus.clone(),
        Duration::from_secs_f64(config.absent_timeout),
    ));
    let coordinator_task = Arc::clone(&coordinator)
        .start()
        .await
        .context("subscribing to lock-state changes")?;

    let scheduler = CommandTrainer::from_config(&config).map(|trainer| {
        Arc::new(TrainingScheduler::new(
            Arc::clone(&backend),
            Arc::new(trainer),
            config.idle_threshold,
        ))
    });

    let service = VigilService::new(
        Arc::clone(&coordinator),
        scheduler.clone(),
        Arc::clone(&hub),
        Arc::clone(&whitelist),
    );
    conn.object_server()
        .at(OBJECT_PATH, service)
        .await
        .context("registering object path")?;
    conn.request_name(BUS_NAME)
        .await
        .context("claiming bus name")?;
    tracing::info!(bus = BUS_NAME, "D-Bus service registered");

    let (_subscriber, notifications) = bus.subscribe();
    let forwarder = tokio::spawn(forward_notifications(conn.clone(), notifications));

    let train_loop = scheduler.map(|scheduler| {
        let interval = Duration::from_secs_f64(config.train_poll_interval);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match scheduler.maybe_train(false).await {
                    Ok(true) => tracing::info!("idle training run completed"),
                    Ok(false) => {}
                    Err(err) => tracing::warn!(error = %err, "idle training attempt failed"),
                }
            }
        })
    });
    if train_loop.is_none() {
        tracing::info!("no training command configured; idle training disabled");
    }

    tracing::info!("vigild ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("vigild shutting down");

    if let Some(handle) = train_loop {
        handle.abort();
    }
    forwarder.abort();
    coordinator_task.abort();
    if let Some(scanner) = &scanner {
        scanner.stop().await;
    }
    guard
        .release()
        .await
        .map_err(|err| anyhow::anyhow!("releasing lock inhibition: {err}"))?;

    Ok(())
}
