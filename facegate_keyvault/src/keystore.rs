//! KeyStore - device identity, paired server key and access token
//!
//! Everything the secure channel needs lives here. Loaded values are cached
//! in memory; once loaded they are never regenerated behind the caller's
//! back. The only generation that ever happens is the device key pair on
//! first run.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use p256::PublicKey;
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{KeyVaultError, Result};
use crate::keys::{decode_public_key, encode_public_key, DeviceKeyPair};
use crate::storage::{FileStorage, SecretStorage};

/// Storage item names
pub mod items {
    pub const DEVICE_PRIVATE: &str = "device_private.pem";
    pub const DEVICE_PUBLIC: &str = "device_public.hex";
    pub const SERVER_PUBLIC: &str = "server_public.hex";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REGISTRATION: &str = "registration.json";
}

/// Server-side identity of this terminal, recorded at pairing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub device_id: String,
    pub server_url: Option<String>,
    pub paired_at: DateTime<Utc>,
}

#[derive(Default)]
struct Cache {
    device: Option<Arc<DeviceKeyPair>>,
    server: Option<PublicKey>,
}

pub struct KeyStore {
    storage: Box<dyn SecretStorage>,
    cache: RwLock<Cache>,
    /// Serializes first-run key generation
    init_lock: Mutex<()>,
}

impl KeyStore {
    /// Open a file-backed keystore in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Ok(Self::with_storage(Box::new(FileStorage::open(dir)?)))
    }

    pub fn with_storage(storage: Box<dyn SecretStorage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(Cache::default()),
            init_lock: Mutex::new(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DEVICE KEY PAIR
    // ═══════════════════════════════════════════════════════════════════════

    /// Return the device key pair, generating and persisting it on first use.
    pub fn get_or_create_device_keypair(&self) -> Result<Arc<DeviceKeyPair>> {
        if let Some(kp) = self.cache.read().device.clone() {
            return Ok(kp);
        }

        let _guard = self.init_lock.lock();
        if let Some(kp) = self.load_device_keypair()? {
            return Ok(kp);
        }

        let kp = DeviceKeyPair::generate();
        let pem = kp.to_pkcs8_pem()?;
        self.storage.put(items::DEVICE_PRIVATE, pem.as_bytes())?;
        self.storage
            .put(items::DEVICE_PUBLIC, kp.public_hex().as_bytes())?;

        tracing::info!(client_id = %kp.client_id(), "generated device key pair");

        let kp = Arc::new(kp);
        self.cache.write().device = Some(Arc::clone(&kp));
        Ok(kp)
    }

    /// Return the device key pair if one has been persisted. Never generates.
    pub fn device_keypair(&self) -> Result<Option<Arc<DeviceKeyPair>>> {
        if let Some(kp) = self.cache.read().device.clone() {
            return Ok(Some(kp));
        }
        self.load_device_keypair()
    }

    fn load_device_keypair(&self) -> Result<Option<Arc<DeviceKeyPair>>> {
        let Some(pem) = self.storage.get(items::DEVICE_PRIVATE)? else {
            return Ok(None);
        };
        let pem = String::from_utf8(pem)
            .map_err(|_| KeyVaultError::CorruptKey("device private key is not UTF-8".into()))?;
        let kp = DeviceKeyPair::from_pkcs8_pem(&pem)?;

        match self.read_string(items::DEVICE_PUBLIC)? {
            Some(stored) if stored.trim().eq_ignore_ascii_case(kp.public_hex()) => {}
            Some(_) => {
                return Err(KeyVaultError::CorruptKey(
                    "device public key does not match private key".into(),
                ))
            }
            None => {
                tracing::warn!("device public key missing, re-deriving from private key");
                self.storage
                    .put(items::DEVICE_PUBLIC, kp.public_hex().as_bytes())?;
            }
        }

        let kp = Arc::new(kp);
        self.cache.write().device = Some(Arc::clone(&kp));
        Ok(Some(kp))
    }

    /// Client identifier derived from the device public key.
    pub fn client_id(&self) -> Result<Option<String>> {
        Ok(self.device_keypair()?.map(|kp| kp.client_id()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SERVER PUBLIC KEY
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist the paired server's public key (raw point bytes).
    pub fn set_server_public_key(&self, bytes: &[u8]) -> Result<()> {
        let public = crate::keys::public_key_from_bytes(bytes)?;
        self.store_server_key(public)
    }

    /// Persist the paired server's public key given as hex.
    pub fn set_server_public_key_hex(&self, encoded: &str) -> Result<()> {
        let public = decode_public_key(encoded)?;
        self.store_server_key(public)
    }

    fn store_server_key(&self, public: PublicKey) -> Result<()> {
        self.storage
            .put(items::SERVER_PUBLIC, encode_public_key(&public).as_bytes())?;
        self.cache.write().server = Some(public);
        Ok(())
    }

    /// Raw uncompressed bytes of the server public key, if stored.
    pub fn get_server_public_key(&self) -> Result<Option<Vec<u8>>> {
        let Some(hex_str) = self.read_string(items::SERVER_PUBLIC)? else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| KeyVaultError::CorruptKey(format!("server public key: {e}")))?;
        Ok(Some(bytes))
    }

    /// Parsed server public key, if stored and valid.
    pub fn server_public_key(&self) -> Result<Option<PublicKey>> {
        if let Some(public) = self.cache.read().server {
            return Ok(Some(public));
        }

        let Some(hex_str) = self.read_string(items::SERVER_PUBLIC)? else {
            return Ok(None);
        };
        let public = decode_public_key(&hex_str)
            .map_err(|e| KeyVaultError::CorruptKey(format!("server public key: {e}")))?;
        self.cache.write().server = Some(public);
        Ok(Some(public))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESS TOKEN / REGISTRATION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_access_token(&self, token: &str) -> Result<()> {
        self.storage.put(items::ACCESS_TOKEN, token.as_bytes())
    }

    pub fn access_token(&self) -> Result<Option<SecretString>> {
        Ok(self
            .read_string(items::ACCESS_TOKEN)?
            .map(|token| SecretString::new(token.into_boxed_str())))
    }

    pub fn set_registration(&self, registration: &Registration) -> Result<()> {
        let json = serde_json::to_vec_pretty(registration)?;
        self.storage.put(items::REGISTRATION, &json)
    }

    pub fn registration(&self) -> Result<Option<Registration>> {
        match self.storage.get(items::REGISTRATION)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PAIRING STATE
    // ═══════════════════════════════════════════════════════════════════════

    /// True iff device private key, device public key and a valid server
    /// public key are all present.
    pub fn is_paired(&self) -> bool {
        let device = match self.device_keypair() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "device key unavailable");
                false
            }
        };
        if !device {
            return false;
        }

        match self.storage.get(items::DEVICE_PUBLIC) {
            Ok(Some(_)) => {}
            _ => return false,
        }

        match self.server_public_key() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "server public key unusable");
                false
            }
        }
    }

    /// Forget the server key, token and registration. The device key pair
    /// survives so the terminal can pair again with the same identity.
    pub fn clear_pairing(&self) -> Result<()> {
        self.storage.remove(items::SERVER_PUBLIC)?;
        self.storage.remove(items::ACCESS_TOKEN)?;
        self.storage.remove(items::REGISTRATION)?;
        self.cache.write().server = None;
        tracing::info!("pairing state cleared");
        Ok(())
    }

    /// Token presence without exposing it.
    pub fn has_access_token(&self) -> bool {
        matches!(self.access_token(), Ok(Some(token)) if !token.expose_secret().is_empty())
    }

    fn read_string(&self, name: &str) -> Result<Option<String>> {
        match self.storage.get(name)? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| KeyVaultError::CorruptKey(format!("{name} is not UTF-8"))),
            None => Ok(None),
        }
    }
}

/// Default keystore directory: `<local data dir>/facegate/keys`.
pub fn default_keyvault_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("facegate")
        .join("keys")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tempfile::tempdir;

    fn memory_store() -> KeyStore {
        KeyStore::with_storage(Box::new(MemoryStorage::new()))
    }

    #[test]
    fn test_first_run_generates_once() {
        let store = memory_store();
        assert!(store.device_keypair().unwrap().is_none());

        let kp1 = store.get_or_create_device_keypair().unwrap();
        let kp2 = store.get_or_create_device_keypair().unwrap();
        assert_eq!(kp1.public_hex(), kp2.public_hex());
        assert_eq!(store.client_id().unwrap().unwrap(), kp1.client_id());
    }

    #[test]
    fn test_key_survives_reopen() {
        let dir = tempdir().unwrap();
        let public = {
            let store = KeyStore::open(dir.path()).unwrap();
            store.get_or_create_device_keypair().unwrap().public_hex().to_string()
        };

        let reopened = KeyStore::open(dir.path()).unwrap();
        let kp = reopened.device_keypair().unwrap().unwrap();
        assert_eq!(kp.public_hex(), public);
    }

    #[test]
    fn test_corrupt_private_key_is_not_regenerated() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(items::DEVICE_PRIVATE), b"garbage").unwrap();

        let store = KeyStore::open(dir.path()).unwrap();
        let err = store.get_or_create_device_keypair().unwrap_err();
        assert!(err.is_corruption());

        // Still garbage on disk: nothing was overwritten
        let on_disk = std::fs::read(dir.path().join(items::DEVICE_PRIVATE)).unwrap();
        assert_eq!(on_disk, b"garbage");
    }

    #[test]
    fn test_missing_public_half_is_rederived() {
        let dir = tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let public = store.get_or_create_device_keypair().unwrap().public_hex().to_string();
        std::fs::remove_file(dir.path().join(items::DEVICE_PUBLIC)).unwrap();

        let reopened = KeyStore::open(dir.path()).unwrap();
        let kp = reopened.device_keypair().unwrap().unwrap();
        assert_eq!(kp.public_hex(), public);
        let stored = std::fs::read_to_string(dir.path().join(items::DEVICE_PUBLIC)).unwrap();
        assert_eq!(stored, public);
    }

    #[test]
    fn test_mismatched_public_half_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.get_or_create_device_keypair().unwrap();
        let other = DeviceKeyPair::generate();
        std::fs::write(dir.path().join(items::DEVICE_PUBLIC), other.public_hex()).unwrap();

        let reopened = KeyStore::open(dir.path()).unwrap();
        assert!(reopened.device_keypair().unwrap_err().is_corruption());
    }

    #[test]
    fn test_is_paired_requires_all_parts() {
        let store = memory_store();
        assert!(!store.is_paired());

        store.get_or_create_device_keypair().unwrap();
        assert!(!store.is_paired());

        let server = DeviceKeyPair::generate();
        store.set_server_public_key(&server.public_bytes()).unwrap();
        assert!(store.is_paired());

        assert_eq!(
            store.get_server_public_key().unwrap().unwrap(),
            server.public_bytes()
        );
    }

    #[test]
    fn test_invalid_server_key_rejected() {
        let store = memory_store();
        assert!(store.set_server_public_key(&[0x04; 65]).is_err());
        assert!(store.set_server_public_key_hex("0411").is_err());
        assert!(store.get_server_public_key().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_server_key_means_unpaired() {
        let dir = tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.get_or_create_device_keypair().unwrap();
        std::fs::write(dir.path().join(items::SERVER_PUBLIC), "04deadbeef").unwrap();
        assert!(!store.is_paired());
    }

    #[test]
    fn test_access_token_and_registration() {
        let store = memory_store();
        assert!(store.access_token().unwrap().is_none());
        assert!(!store.has_access_token());

        store.set_access_token("tok-1").unwrap();
        assert_eq!(store.access_token().unwrap().unwrap().expose_secret(), "tok-1");
        assert!(store.has_access_token());

        let reg = Registration {
            device_id: "term-7".into(),
            server_url: Some("https://backend.example".into()),
            paired_at: Utc::now(),
        };
        store.set_registration(&reg).unwrap();
        assert_eq!(store.registration().unwrap().unwrap(), reg);
    }

    #[test]
    fn test_clear_pairing_keeps_identity() {
        let store = memory_store();
        let kp = store.get_or_create_device_keypair().unwrap();
        let server = DeviceKeyPair::generate();
        store.set_server_public_key_hex(server.public_hex()).unwrap();
        store.set_access_token("tok").unwrap();
        assert!(store.is_paired());

        store.clear_pairing().unwrap();
        assert!(!store.is_paired());
        assert!(store.access_token().unwrap().is_none());
        assert_eq!(
            store.device_keypair().unwrap().unwrap().public_hex(),
            kp.public_hex()
        );
    }
}
