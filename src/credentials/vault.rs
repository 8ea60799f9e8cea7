//! Encrypted on-disk token storage.
//!
//! Each token identity maps to one file, `<identity>.enc`, holding only the
//! envelope: base64 of `version || nonce || AES-256-GCM(record JSON)`. The
//! identity is bound as associated data, so a file copied under another
//! identity fails authentication just like a file sealed with a rotated key.
//!
//! Writes go to a temporary file which is synced and then renamed over the
//! target, so a crash mid-write never leaves a half-written envelope behind.

use super::{validate_identity, EncryptionKey, TokenRecord};
use crate::error::{BoardError, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use parking_lot::Mutex;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroize;

const ENVELOPE_VERSION: u8 = 1;
const FILE_EXTENSION: &str = "enc";

/// Outcome of reading a token identity from the vault.
#[derive(Debug)]
pub enum VaultRead {
    Found(TokenRecord),
    /// No file exists for the identity.
    Absent,
    /// A file exists but does not decrypt to a usable record
    /// (rotated key, tampering, truncation).
    Corrupt,
}

impl VaultRead {
    /// Converts the outcome into a result, mapping the two recoverable
    /// states onto their error kinds.
    pub fn into_result(self, token_identity: &str) -> Result<TokenRecord> {
        match self {
            VaultRead::Found(record) => Ok(record),
            VaultRead::Absent => Err(BoardError::VaultAbsent(token_identity.to_string())),
            VaultRead::Corrupt => Err(BoardError::VaultCorrupt(token_identity.to_string())),
        }
    }
}

/// File-per-identity encrypted token store.
pub struct Vault {
    dir: PathBuf,
    key: LessSafeKey,
    rng: SystemRandom,
    identity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Vault {
    /// Opens a vault rooted at `dir`. The key is consumed; only the derived
    /// cipher state is retained.
    pub fn new(dir: impl Into<PathBuf>, key: EncryptionKey) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key.as_bytes())
            .map_err(|_| BoardError::Config("Vault key rejected by cipher".to_string()))?;

        Ok(Self {
            dir: dir.into(),
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
            identity_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the envelope file for an identity.
    pub fn path_for(&self, token_identity: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", token_identity, FILE_EXTENSION))
    }

    fn identity_lock(&self, token_identity: &str) -> Arc<Mutex<()>> {
        self.identity_locks
            .lock()
            .entry(token_identity.to_string())
            .or_default()
            .clone()
    }

    pub fn read(&self, token_identity: &str) -> Result<VaultRead> {
        validate_identity(token_identity)?;
        let lock = self.identity_lock(token_identity);
        let _guard = lock.lock();

        let path = self.path_for(token_identity);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No vault entry for {}", token_identity);
                crate::metrics::record_vault_read("absent");
                return Ok(VaultRead::Absent);
            }
            Err(e) => return Err(BoardError::Io(e)),
        };

        match self.open(token_identity, &contents) {
            Some(record) => {
                crate::metrics::record_vault_read("found");
                Ok(VaultRead::Found(record))
            }
            None => {
                warn!(
                    "Vault entry {} failed to decrypt (rotated key or corruption)",
                    path.display()
                );
                crate::metrics::record_vault_read("corrupt");
                Ok(VaultRead::Corrupt)
            }
        }
    }

    /// Seals and atomically replaces the identity's envelope.
    pub fn write(&self, token_identity: &str, record: &TokenRecord) -> Result<()> {
        validate_identity(token_identity)?;
        let envelope = self.seal(token_identity, record)?;

        let lock = self.identity_lock(token_identity);
        let _guard = lock.lock();

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(token_identity);
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", token_identity, FILE_EXTENSION));

        let result = write_private(&temp_path, envelope.as_bytes())
            .and_then(|_| fs::rename(&temp_path, &path));

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(BoardError::Io(e));
        }

        debug!("Sealed token for {} into {}", token_identity, path.display());
        Ok(())
    }

    fn seal(&self, token_identity: &str, record: &TokenRecord) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| BoardError::Internal("System RNG unavailable".to_string()))?;

        let mut in_out = serde_json::to_vec(record)?;
        let sealed = self.key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(token_identity.as_bytes()),
            &mut in_out,
        );
        if sealed.is_err() {
            in_out.zeroize();
            return Err(BoardError::Internal("Token encryption failed".to_string()));
        }

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&in_out);

        Ok(URL_SAFE.encode(envelope))
    }

    /// Returns `None` for anything that is not an authentic, well-formed record.
    fn open(&self, token_identity: &str, contents: &[u8]) -> Option<TokenRecord> {
        let text = std::str::from_utf8(contents).ok()?;
        let mut envelope = URL_SAFE.decode(text.trim()).ok()?;

        if envelope.len() <= 1 + NONCE_LEN || envelope[0] != ENVELOPE_VERSION {
            return None;
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&envelope[1..1 + NONCE_LEN]);

        let record = {
            let ciphertext = &mut envelope[1 + NONCE_LEN..];
            let plaintext = self
                .key
                .open_in_place(
                    Nonce::assume_unique_for_key(nonce_bytes),
                    Aad::from(token_identity.as_bytes()),
                    ciphertext,
                )
                .ok()?;
            serde_json::from_slice::<TokenRecord>(plaintext).ok()
        };
        envelope.zeroize();

        record.filter(|r| !r.access_token().is_empty())
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
