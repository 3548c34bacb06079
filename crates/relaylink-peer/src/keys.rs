//! Local private key storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{PeerError, Result};

/// Length of a hex-encoded private key.
pub const PRIVATE_KEY_HEX_LEN: usize = 64;

/// Persistent slot holding the local private key.
pub trait KeyStore: Send + Sync {
    /// Stored key, `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<String>>;

    fn store(&self, private_key: &str) -> Result<()>;
}

/// Key store kept in process memory.
#[derive(Default)]
pub struct MemoryKeyStore {
    key: Mutex<Option<String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.key.lock().clone())
    }

    fn store(&self, private_key: &str) -> Result<()> {
        *self.key.lock() = Some(private_key.to_string());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("key", &self.key.lock().as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Key store backed by a single file holding the hex key.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let key = contents.trim();
                Ok((!key.is_empty()).then(|| key.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, private_key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format!("{private_key}\n"))?;
        restrict_permissions(&self.path)?;
        debug!(path = %self.path.display(), "private key written");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Store `private_key`, or a freshly generated one when `None`.
///
/// Supplied keys must be 64 hex characters; they are stored lowercase.
/// Returns the stored key.
pub fn set_private_key(store: &dyn KeyStore, private_key: Option<&str>) -> Result<String> {
    let key = match private_key {
        Some(key) => validate_private_key(key)?,
        None => generate_private_key(),
    };
    store.store(&key)?;
    info!(generated = private_key.is_none(), "private key set");
    Ok(key)
}

/// Read the stored private key.
pub fn private_key(store: &dyn KeyStore) -> Result<Option<String>> {
    store.load()
}

/// Read the stored private key, generating and storing one if absent.
pub fn private_key_or_generate(store: &dyn KeyStore) -> Result<String> {
    match store.load()? {
        Some(key) => Ok(key),
        None => set_private_key(store, None),
    }
}

/// 32 random bytes, hex-encoded.
pub fn generate_private_key() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Check that `key` is 64 hex characters and normalize it to lowercase.
pub fn validate_private_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.len() != PRIVATE_KEY_HEX_LEN {
        return Err(PeerError::InvalidKey(format!(
            "expected {PRIVATE_KEY_HEX_LEN} hex characters, got {}",
            key.len()
        )));
    }
    hex::decode(key).map_err(|err| PeerError::InvalidKey(err.to_string()))?;
    Ok(key.to_ascii_lowercase())
}
