//! Encrypted whitelist of authorized user profiles.
//!
//! Profiles are a JSON name list sealed with AES-256-GCM. The key is
//! derived from the SHA-512 of the active model weights combined with a
//! per-host secret, so the store is unreadable off-host and tied to the
//! model that produced it. A sidecar hash file records the model digest
//! used at write time, so a model swap is detectable and the store can
//! be re-encrypted without losing profiles.

use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum WhitelistError {
    #[error("whitelist io: {0}")]
    Io(#[from] std::io::Error),
    #[error("whitelist serialization: {0}")]
    Json(#[from] serde_json::Error),
    #[error("whitelist decryption failed (wrong key or corrupt store)")]
    Crypto,
    #[error("whitelist store truncated")]
    Truncated,
}

/// Encrypted profile store keyed by model weights and a host secret.
pub struct WhitelistStore {
    model_path: PathBuf,
    store_file: PathBuf,
    hash_file: PathBuf,
    secret_file: PathBuf,
}

impl WhitelistStore {
    pub fn new(model_path: PathBuf, state_dir: PathBuf) -> Result<Self, WhitelistError> {
        std::fs::create_dir_all(&state_dir)?;
        Ok(Self {
            model_path,
            store_file: state_dir.join("whitelist.json"),
            hash_file: state_dir.join("whitelist.hash"),
            secret_file: state_dir.join("host-secret"),
        })
    }

    pub fn add_user(&self, name: &str) -> Result<(), WhitelistError> {
        let mut profiles = self.read()?;
        if !profiles.iter().any(|p| p == name) {
            profiles.push(name.to_string());
            self.write(&profiles)?;
            tracing::info!(user = name, "added user to whitelist");
        }
        Ok(())
    }

    pub fn remove_user(&self, name: &str) -> Result<(), WhitelistError> {
        let mut profiles = self.read()?;
        let before = profiles.len();
        profiles.retain(|p| p != name);
        if profiles.len() != before {
            self.write(&profiles)?;
            tracing::info!(user = name, "removed user from whitelist");
        }
        Ok(())
    }

    pub fn users(&self) -> Result<Vec<String>, WhitelistError> {
        self.read()
    }

    /// Whether the active model differs from the one the store was
    /// sealed with.
    pub fn is_hash_mismatch(&self) -> bool {
        let Ok(stored) = std::fs::read_to_string(&self.hash_file) else {
            return false;
        };
        match self.model_hash() {
            Ok(current) => stored.trim() != current,
            Err(_) => false,
        }
    }

    /// Re-seal the store under the current model hash, decrypting with
    /// the recorded one so a model update keeps existing profiles.
    pub fn reencrypt(&self) -> Result<(), WhitelistError> {
        if !self.store_file.exists() {
            return Ok(());
        }
        let profiles = self.read()?;
        self.write(&profiles)
    }

    // -- key handling --------------------------------------------------

    fn model_hash(&self) -> Result<String, WhitelistError> {
        let data = std::fs::read(&self.model_path)?;
        Ok(format!("{:x}", Sha512::digest(&data)))
    }

    /// Per-host secret: two UUIDs, regenerated whenever the file is
    /// missing or malformed.
    fn host_hash(&self) -> Result<String, WhitelistError> {
        let valid = std::fs::read_to_string(&self.secret_file)
            .ok()
            .map(|text| {
                let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
                lines.len() == 2 && lines.iter().all(|l| l.trim().parse::<uuid::Uuid>().is_ok())
            })
            .unwrap_or(false);
        if !valid {
            std::fs::write(
                &self.secret_file,
                format!("{}\n{}\n", uuid::Uuid::new_v4(), uuid::Uuid::new_v4()),
            )?;
        }
        let secret = std::fs::read_to_string(&self.secret_file)?;
        Ok(format!("{:x}", Sha512::digest(secret.as_bytes())))
    }

    fn derive_key(model_hash: &str, host_hash: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(model_hash.as_bytes());
        hasher.update(host_hash.as_bytes());
        hasher.finalize().into()
    }

    // -- persistence ---------------------------------------------------

    fn write(&self, profiles: &[String]) -> Result<(), WhitelistError> {
        let model_hash = self.model_hash()?;
        let key = Self::derive_key(&model_hash, &self.host_hash()?);
        let cipher = Aes256Gcm::new(&key.into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = serde_json::to_vec(profiles)?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| WhitelistError::Crypto)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        std::fs::write(&self.store_file, sealed)?;
        std::fs::write(&self.hash_file, &model_hash)?;
        Ok(())
    }

    fn read(&self) -> Result<Vec<String>, WhitelistError> {
        if !self.store_file.exists() {
            return Ok(Vec::new());
        }
        let sealed = std::fs::read(&self.store_file)?;
        if sealed.len() < NONCE_LEN {
            return Err(WhitelistError::Truncated);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        // Decrypt with the hash recorded at write time, so the store
        // stays readable after a model swap until re-encrypted.
        let current_hash = self.model_hash()?;
        let stored_hash = std::fs::read_to_string(&self.hash_file)
            .map(|h| h.trim().to_string())
            .unwrap_or_else(|_| current_hash.clone());

        let key = Self::derive_key(&stored_hash, &self.host_hash()?);
        let cipher = Aes256Gcm::new(&key.into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| WhitelistError::Crypto)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
