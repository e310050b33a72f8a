//! Persisted gateway settings.
//!
//! [`GwSettings`] implements [`SettingsPort`] on top of any [`StoragePort`],
//! under the `gw` namespace:
//!
//! | Key    | Meaning             | Default                       |
//! |--------|---------------------|-------------------------------|
//! | `name` | gateway name        | `esp32gw`                     |
//! | `pass` | admin password      | `admin`                       |
//! | `aes`  | shared AES-128 key  | random, generated on first load |
//!
//! Values are stored as UTF-8 text; the key as 32 hex digits. With a
//! file-backed store the generated key is reused across restarts. Unreadable or
//! invalid stored values fall back to the defaults with a warning.

use log::{info, warn};

use super::utils::is_valid_setting;
use crate::app::ports::{ConfigError, SettingsPort, StorageError, StoragePort};
use crate::crypto::{self, Key};

pub const SETTINGS_NAMESPACE: &str = "gw";

const KEY_NAME: &str = "name";
const KEY_PASS: &str = "pass";
const KEY_AES: &str = "aes";

pub const DEFAULT_NAME: &str = "esp32gw";
pub const DEFAULT_PASSWORD: &str = "admin";

pub struct GwSettings<S: StoragePort> {
    storage: S,
    name: String,
    password: String,
    key: Key,
}

impl<S: StoragePort> GwSettings<S> {
    /// Load settings, generating and persisting an AES key on first boot.
    pub fn load(mut storage: S) -> Result<Self, ConfigError> {
        let name = read_valid(&storage, KEY_NAME).unwrap_or_else(|| DEFAULT_NAME.to_owned());
        let password =
            read_valid(&storage, KEY_PASS).unwrap_or_else(|| DEFAULT_PASSWORD.to_owned());

        let stored_key = read_text(&storage, KEY_AES).and_then(|hex| crypto::parse_key(&hex).ok());
        let key = match stored_key {
            Some(key) => key,
            None => {
                if storage.exists(SETTINGS_NAMESPACE, KEY_AES) {
                    warn!("SETTINGS: stored AES key unreadable, regenerating");
                }
                let key = crypto::generate_key();
                let hex = crypto::to_hex(&key);
                storage.write(SETTINGS_NAMESPACE, KEY_AES, hex.as_bytes())?;
                info!("SETTINGS: generated AES key {}", hex);
                key
            }
        };

        info!("SETTINGS: loaded (name={})", name);
        Ok(Self {
            storage,
            name,
            password,
            key,
        })
    }

    pub fn set_device_name(&mut self, name: &str) -> Result<(), ConfigError> {
        if !is_valid_setting(name) {
            return Err(ConfigError::ValidationFailed(
                "name must be 1–32 printable ASCII characters",
            ));
        }
        self.storage
            .write(SETTINGS_NAMESPACE, KEY_NAME, name.as_bytes())?;
        self.name = name.to_owned();
        Ok(())
    }

    pub fn set_admin_password(&mut self, password: &str) -> Result<(), ConfigError> {
        if !is_valid_setting(password) {
            return Err(ConfigError::ValidationFailed(
                "password must be 1–32 printable ASCII characters",
            ));
        }
        self.storage
            .write(SETTINGS_NAMESPACE, KEY_PASS, password.as_bytes())?;
        self.password = password.to_owned();
        info!("SETTINGS: admin password changed");
        Ok(())
    }

    /// Replace the shared key. `key_hex` must be exactly 32 hex digits.
    pub fn set_aes_key_hex(&mut self, key_hex: &str) -> Result<(), ConfigError> {
        let key = crypto::parse_key(key_hex)
            .map_err(|_| ConfigError::ValidationFailed("aes key must be 32 hex digits"))?;
        self.storage
            .write(SETTINGS_NAMESPACE, KEY_AES, crypto::to_hex(&key).as_bytes())?;
        self.key = key;
        info!("SETTINGS: AES key replaced");
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: StoragePort> SettingsPort for GwSettings<S> {
    fn aes_key(&self) -> Key {
        self.key
    }

    fn admin_password(&self) -> &str {
        &self.password
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

fn read_text<S: StoragePort>(storage: &S, key: &str) -> Option<String> {
    let mut buf = [0u8; 64];
    match storage.read(SETTINGS_NAMESPACE, key, &mut buf) {
        Ok(len) => String::from_utf8(buf[..len].to_vec()).ok(),
        Err(StorageError::NotFound) => None,
        Err(e) => {
            warn!("SETTINGS: reading {} failed: {}", key, e);
            None
        }
    }
}

fn read_valid<S: StoragePort>(storage: &S, key: &str) -> Option<String> {
    let value = read_text(storage, key)?;
    if is_valid_setting(&value) {
        Some(value)
    } else {
        warn!("SETTINGS: stored {} is invalid, using default", key);
        None
    }
}
