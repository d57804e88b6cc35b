//! Presence sources: externally reported and probe-polling.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil_core::PresenceSource;

/// One scan of the outside world: is an authorized user visible right
/// now? The camera/detector stack lives behind this seam.
#[async_trait]
pub trait PresenceProbe: Send + Sync + 'static {
    async fn scan(&self) -> bool;
}

/// Presence fed by out-of-process reports (the D-Bus surface).
#[derive(Default)]
pub struct ReportedPresenceSource {
    listeners: Mutex<Vec<mpsc::UnboundedSender<bool>>>,
}

impl ReportedPresenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fan a reported observation out to every subscriber. Reports are
    /// forwarded as-is: no deduplication, no ordering beyond arrival.
    pub fn report(&self, present: bool) {
        let mut subs = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(present).is_ok());
    }
}

impl PresenceSource for ReportedPresenceSource {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

/// Polls a probe and emits presence transitions with hysteresis: slow
/// scans while a user is present, faster scans while nobody is seen.
///
/// Polling starts lazily on the first subscription and only transitions
/// are emitted.
pub struct ScanPresenceSource<P: PresenceProbe> {
    probe: Arc<P>,
    present_interval: Duration,
    absent_interval: Duration,
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<bool>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: PresenceProbe> ScanPresenceSource<P> {
    pub fn new(probe: Arc<P>, present_interval: Duration, absent_interval: Duration) -> Self {
        Self {
            probe,
            present_interval,
            absent_interval,
            listeners: Arc::new(Mutex::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    /// Stop background polling. Stopping is a normal control path.
    pub async fn stop(&self) {
        let taken = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = taken {
            task.abort();
            let _ = task.await;
        }
    }

    fn ensure_polling(&self) {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let probe = Arc::clone(&self.probe);
        let listeners = Arc::clone(&self.listeners);
        let present_interval = self.present_interval;
        let absent_interval = self.absent_interval;
        *slot = Some(tokio::spawn(async move {
            let mut present = false;
            loop {
                let seen = probe.scan().await;
                if seen != present {
                    present = seen;
                    tracing::info!(present, "presence transition");
                    let mut subs = listeners.lock().unwrap_or_else(|e| e.into_inner());
                    subs.retain(|tx| tx.send(present).is_ok());
                }
                let interval = if present {
                    present_interval
                } else {
                    absent_interval
                };
                tokio::time::sleep(interval).await;
            }
        }));
    }
}

impl<P: PresenceProbe> PresenceSource for ScanPresenceSource<P> {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        self.ensure_polling();
        rx
    }
}

impl<P: PresenceProbe> Drop for ScanPresenceSource<P> {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// Probe that shells out to a configured command; exit status 0 means an
/// authorized user is in view.
pub struct CommandProbe {
    command: Vec<String>,
}

impl CommandProbe {
    pub fn new(command_line: &str) -> Option<Self> {
        let command: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
        if command.is_empty() {
            return None;
        }
        Some(Self { command })
    }
}

#[async_trait]
impl PresenceProbe for CommandProbe {
    async fn scan(&self) -> bool {
        let result = tokio::process::Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) => status.success(),
            Err(err) => {
                tracing::warn!(error = %err, "presence probe failed to run");
                false
            }
        }
    }
}
