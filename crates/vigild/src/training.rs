//! Training job execution and dataset bookkeeping.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use vigil_core::{TrainError, TrainingJob};

use crate::config::Config;

/// Runs the configured external training command, then records the
/// produced weights digest and dataset metadata.
pub struct CommandTrainer {
    command: Vec<String>,
    dataset: PathBuf,
    model: PathBuf,
    epochs: u32,
    batch: u32,
    profile_hash: Option<PathBuf>,
}

impl CommandTrainer {
    /// Returns `None` when no training command is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let command: Vec<String> = config
            .train_command
            .as_deref()?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            return None;
        }
        Some(Self {
            command,
            dataset: config.dataset.clone(),
            model: config.model.clone(),
            epochs: config.epochs,
            batch: config.batch,
            profile_hash: config.profile_hash.clone(),
        })
    }

    /// Manifest consumed by the external trainer: dataset root plus the
    /// class names the capture tooling labels with.
    fn write_manifest(&self) -> Result<PathBuf, TrainError> {
        std::fs::create_dir_all(&self.dataset)?;
        let path = self.dataset.join("dataset.yaml");
        let contents = format!(
            "path: {}\ntrain: images\nval: images\nnames: [face, body]\n",
            self.dataset.display()
        );
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    fn update_profile_hash(&self) -> Result<(), TrainError> {
        let Some(hash_path) = &self.profile_hash else {
            return Ok(());
        };
        if !self.model.exists() {
            tracing::warn!(model = %self.model.display(), "no weights after training; profile hash not updated");
            return Ok(());
        }
        let digest = Sha256::digest(std::fs::read(&self.model)?);
        std::fs::write(hash_path, format!("{digest:x}"))?;
        Ok(())
    }

    fn mark_epoch(&self) -> Result<(), TrainError> {
        let meta_path = self.dataset.join("metadata.json");
        let mut data: serde_json::Value = std::fs::read_to_string(&meta_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| serde_json::json!({}));
        data["last_trained_epoch"] = self.epochs.into();
        data["trained_at"] = Utc::now().to_rfc3339().into();
        let text = serde_json::to_string(&data).map_err(|e| TrainError::Failed(e.to_string()))?;
        std::fs::write(&meta_path, text)?;
        Ok(())
    }
}

#[async_trait]
impl TrainingJob for CommandTrainer {
    async fn run(&self) -> Result<(), TrainError> {
        let manifest = self.write_manifest()?;

        tracing::info!(
            command = %self.command.join(" "),
            epochs = self.epochs,
            batch = self.batch,
            "launching trainer"
        );
        let status = tokio::process::Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg("--data")
            .arg(&manifest)
            .arg("--epochs")
            .arg(self.epochs.to_string())
            .arg("--batch")
            .arg(self.batch.to_string())
            .arg("--model")
            .arg(&self.model)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(TrainError::Failed(format!("trainer exited with {status}")));
        }

        self.update_profile_hash()?;
        self.mark_epoch()?;
        tracing::info!("training run finished");
        Ok(())
    }
}
