//! Encrypted secret storage, rotation bookkeeping, and the audit log
//! (spec.md §4.J).

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use tracing::info;

use crate::error::{SecretManagerError, SecretManagerResult};
use crate::master::MasterKey;

/// Default rotation period, 90 days.
pub const DEFAULT_ROTATION_PERIOD_SECS: i64 = 90 * 24 * 60 * 60;
/// Warning threshold before rotation is due, 7 days.
pub const DEFAULT_ROTATION_WARNING_SECS: i64 = 7 * 24 * 60 * 60;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A single encrypted secret, carrying the fields spec.md §4.J names:
/// `(ciphertext, iv, authTag, createdAt, expiresAt, rotationCount,
/// lastRotatedAt)`.
#[derive(Debug, Clone)]
pub struct StoredSecret {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_LEN],
    pub auth_tag: [u8; TAG_LEN],
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub rotation_count: u32,
    pub last_rotated_at: Option<i64>,
}

/// One audit record: `(key, action, actor, timestamp)`. Every read, write,
/// rotation, and token generation appends one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub key: String,
    pub action: AuditAction,
    pub actor: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Write,
    Read,
    Rotate,
    TokenIssued,
}

/// AEAD-encrypted secret store keyed by a master key derived from a
/// configured master password (spec.md §4.J). Every mutation and read
/// writes an [`AuditEntry`].
pub struct SecretManager {
    cipher: Aes256Gcm,
    rotation_period_secs: i64,
    rotation_warning_secs: i64,
    secrets: Mutex<HashMap<String, StoredSecret>>,
    audit_log: Mutex<Vec<AuditEntry>>,
}

impl SecretManager {
    pub fn new(master_key: MasterKey) -> Self {
        Self::with_rotation_policy(master_key, DEFAULT_ROTATION_PERIOD_SECS, DEFAULT_ROTATION_WARNING_SECS)
    }

    pub fn with_rotation_policy(master_key: MasterKey, rotation_period_secs: i64, rotation_warning_secs: i64) -> Self {
        let cipher = Aes256Gcm::new_from_slice(&master_key.0).expect("master key is exactly 32 bytes");
        Self {
            cipher,
            rotation_period_secs,
            rotation_warning_secs,
            secrets: Mutex::new(HashMap::new()),
            audit_log: Mutex::new(Vec::new()),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> SecretManagerResult<([u8; NONCE_LEN], Vec<u8>, [u8; TAG_LEN])> {
        let mut iv = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);
        let mut combined = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SecretManagerError::EncryptionFailed("aead failure".into()))?;
        let tag_start = combined.len() - TAG_LEN;
        let tag_bytes = combined.split_off(tag_start);
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&tag_bytes);
        Ok((iv, combined, auth_tag))
    }

    fn decrypt(&self, secret: &StoredSecret) -> SecretManagerResult<Vec<u8>> {
        let nonce = Nonce::from_slice(&secret.iv);
        let mut combined = secret.ciphertext.clone();
        combined.extend_from_slice(&secret.auth_tag);
        self.cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|_| SecretManagerError::DecryptionFailed("aead failure".into()))
    }

    fn audit(&self, key: &str, action: AuditAction, actor: &str) {
        self.audit_log.lock().expect("audit log lock poisoned").push(AuditEntry {
            key: key.to_string(),
            action,
            actor: actor.to_string(),
            timestamp: anchor_core::time::now_secs(),
        });
    }

    /// Encrypts and stores `plaintext` under `key`, overwriting any prior
    /// value. `ttl_secs` sets `expiresAt` if provided.
    pub fn put_secret(&self, key: &str, plaintext: &[u8], actor: &str, ttl_secs: Option<i64>) -> SecretManagerResult<()> {
        let (iv, ciphertext, auth_tag) = self.encrypt(plaintext)?;
        let now = anchor_core::time::now_secs();
        let stored = StoredSecret {
            ciphertext,
            iv,
            auth_tag,
            created_at: now,
            expires_at: ttl_secs.map(|ttl| now + ttl),
            rotation_count: 0,
            last_rotated_at: None,
        };
        self.secrets.lock().expect("secrets lock poisoned").insert(key.to_string(), stored);
        self.audit(key, AuditAction::Write, actor);
        info!(key, actor, "secret-manager: secret written");
        Ok(())
    }

    /// Decrypts and returns the secret under `key`. Errors if absent or
    /// past `expiresAt`.
    pub fn get_secret(&self, key: &str, actor: &str) -> SecretManagerResult<Vec<u8>> {
        let stored = {
            let secrets = self.secrets.lock().expect("secrets lock poisoned");
            secrets
                .get(key)
                .cloned()
                .ok_or_else(|| SecretManagerError::NotFound(key.to_string()))?
        };
        if let Some(expires_at) = stored.expires_at {
            if anchor_core::time::now_secs() >= expires_at {
                return Err(SecretManagerError::Expired(key.to_string()));
            }
        }
        let plaintext = self.decrypt(&stored)?;
        self.audit(key, AuditAction::Read, actor);
        Ok(plaintext)
    }

    /// Re-encrypts `key` with `new_plaintext`, incrementing `rotationCount`
    /// and stamping `lastRotatedAt`. Errors if the key does not exist yet —
    /// rotation operates on an existing secret, `put_secret` creates one.
    pub fn rotate_secret(&self, key: &str, new_plaintext: &[u8], actor: &str) -> SecretManagerResult<()> {
        let (iv, ciphertext, auth_tag) = self.encrypt(new_plaintext)?;
        let now = anchor_core::time::now_secs();
        let mut secrets = self.secrets.lock().expect("secrets lock poisoned");
        let existing = secrets
            .get_mut(key)
            .ok_or_else(|| SecretManagerError::NotFound(key.to_string()))?;
        existing.ciphertext = ciphertext;
        existing.iv = iv;
        existing.auth_tag = auth_tag;
        existing.rotation_count += 1;
        existing.last_rotated_at = Some(now);
        drop(secrets);
        self.audit(key, AuditAction::Rotate, actor);
        info!(key, actor, "secret-manager: secret rotated");
        Ok(())
    }

    /// `true` once the secret is within [`Self`]'s rotation warning window
    /// of its rotation period (spec.md §4.J: "warning threshold 7 days").
    pub fn needs_rotation_warning(&self, key: &str) -> SecretManagerResult<bool> {
        let secrets = self.secrets.lock().expect("secrets lock poisoned");
        let stored = secrets.get(key).ok_or_else(|| SecretManagerError::NotFound(key.to_string()))?;
        let baseline = stored.last_rotated_at.unwrap_or(stored.created_at);
        let age = anchor_core::time::now_secs() - baseline;
        Ok(age >= self.rotation_period_secs - self.rotation_warning_secs)
    }

    /// Records a token-issuance audit entry; called by [`crate::token`].
    pub(crate) fn audit_token_issued(&self, base_user: &str, actor: &str) {
        self.audit(base_user, AuditAction::TokenIssued, actor);
    }

    /// Snapshot of the audit log, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().expect("audit log lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MasterKey;

    fn manager() -> SecretManager {
        SecretManager::new(MasterKey::derive("test-master-password", b"fixed-salt", 100_000))
    }

    #[test]
    fn round_trips_a_secret() {
        let mgr = manager();
        mgr.put_secret("db-password", b"hunter2", "ops", None).unwrap();
        let plaintext = mgr.get_secret("db-password", "worker").unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn expired_secret_is_rejected() {
        let mgr = manager();
        mgr.put_secret("short-lived", b"value", "ops", Some(-1)).unwrap();
        let err = mgr.get_secret("short-lived", "worker");
        assert!(matches!(err, Err(SecretManagerError::Expired(_))));
    }

    #[test]
    fn rotation_increments_count_and_changes_ciphertext() {
        let mgr = manager();
        mgr.put_secret("api-key", b"v1", "ops", None).unwrap();
        mgr.rotate_secret("api-key", b"v2", "ops").unwrap();
        let plaintext = mgr.get_secret("api-key", "worker").unwrap();
        assert_eq!(plaintext, b"v2");

        let secrets = mgr.secrets.lock().unwrap();
        let stored = secrets.get("api-key").unwrap();
        assert_eq!(stored.rotation_count, 1);
        assert!(stored.last_rotated_at.is_some());
    }

    #[test]
    fn rotating_an_unknown_key_fails() {
        let mgr = manager();
        let err = mgr.rotate_secret("never-written", b"v1", "ops");
        assert!(matches!(err, Err(SecretManagerError::NotFound(_))));
    }

    #[test]
    fn every_operation_appends_an_audit_entry() {
        let mgr = manager();
        mgr.put_secret("k", b"v", "alice", None).unwrap();
        mgr.get_secret("k", "bob").unwrap();
        mgr.rotate_secret("k", b"v2", "alice").unwrap();

        let log = mgr.audit_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].action, AuditAction::Write);
        assert_eq!(log[1].action, AuditAction::Read);
        assert_eq!(log[2].action, AuditAction::Rotate);
    }

    #[test]
    fn needs_rotation_warning_is_false_for_a_freshly_written_secret() {
        let mgr = manager();
        mgr.put_secret("k", b"v", "ops", None).unwrap();
        assert!(!mgr.needs_rotation_warning("k").unwrap());
    }
}
