//! NVS-style storage adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] over a key-value map,
//! namespaced as `namespace::key`. Values are opaque blobs; the gateway
//! config is stored as a postcard blob under `gw::cfg`.
//!
//! [`NvsAdapter::new`] keeps the map in memory only. [`NvsAdapter::open`]
//! backs it with a file: the whole map is postcard-encoded and rewritten on
//! every change through a temporary file and a rename, so a crash leaves
//! either the old or the new image on disk.
//!
//! Config is validated before it is persisted. A stored blob that fails to
//! decode is reported as [`ConfigError::Corrupted`] rather than silently
//! replaced.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::GatewayConfig;

const CONFIG_NAMESPACE: &str = "gw";
const CONFIG_KEY: &str = "cfg";

/// Largest blob a single key may hold.
const MAX_BLOB_SIZE: usize = 4000;

/// On-disk image: every `(composite key, value)` pair.
type Image = Vec<(String, Vec<u8>)>;

pub struct NvsAdapter {
    store: RefCell<HashMap<String, Vec<u8>>>,
    path: Option<PathBuf>,
}

impl NvsAdapter {
    pub fn new() -> Self {
        info!("NvsAdapter: in-memory backend");
        Self {
            store: RefCell::new(HashMap::new()),
            path: None,
        }
    }

    /// Open (or create on first write) the file-backed store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let store = match fs::read(&path) {
            Ok(bytes) => {
                let image: Image = postcard::from_bytes(&bytes).map_err(|_| {
                    warn!("NvsAdapter: {} is not a storage image", path.display());
                    StorageError::IoError
                })?;
                image.into_iter().collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("NvsAdapter: reading {} failed: {}", path.display(), e);
                return Err(StorageError::IoError);
            }
        };
        info!(
            "NvsAdapter: file backend {} ({} keys)",
            path.display(),
            store.len()
        );
        Ok(Self {
            store: RefCell::new(store),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrite the backing file, if any, from the current map.
    fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut image: Image = self
            .store
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        image.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let bytes = postcard::to_allocvec(&image).map_err(|_| StorageError::IoError)?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|e| {
                warn!("NvsAdapter: writing {} failed: {}", path.display(), e);
                StorageError::IoError
            })
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Remove every key in `namespace` (factory reset of one subsystem).
    pub fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        let prefix = format!("{}::", namespace);
        self.store
            .borrow_mut()
            .retain(|k: &String, _: &mut Vec<u8>| !k.starts_with(&prefix));
        self.flush()
    }
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Config validation ────────────────────────────────────────

pub fn validate_config(cfg: &GatewayConfig) -> Result<(), ConfigError> {
    if cfg.ws_bind_addr.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "ws_bind_addr must not be empty",
        ));
    }
    if cfg.ws_port == 0 {
        return Err(ConfigError::ValidationFailed("ws_port must be 1–65535"));
    }
    if !(0x0004..=0x4000).contains(&cfg.scan.interval) {
        return Err(ConfigError::ValidationFailed(
            "scan.interval must be 0x0004–0x4000",
        ));
    }
    if cfg.scan.window < 0x0004 || cfg.scan.window > cfg.scan.interval {
        return Err(ConfigError::ValidationFailed(
            "scan.window must be 0x0004–scan.interval",
        ));
    }
    if !(1..=60).contains(&cfg.rearm_window_secs) {
        return Err(ConfigError::ValidationFailed(
            "rearm_window_secs must be 1–60",
        ));
    }
    if !(10..=5000).contains(&cfg.stop_settle_timeout_ms) {
        return Err(ConfigError::ValidationFailed(
            "stop_settle_timeout_ms must be 10–5000",
        ));
    }
    if !(1..=10).contains(&cfg.connect_attempts) {
        return Err(ConfigError::ValidationFailed(
            "connect_attempts must be 1–10",
        ));
    }
    if !(100..=10_000).contains(&cfg.connect_backoff_ms) {
        return Err(ConfigError::ValidationFailed(
            "connect_backoff_ms must be 100–10000",
        ));
    }
    if !(1..=100).contains(&cfg.poll_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "poll_interval_ms must be 1–100",
        ));
    }
    Ok(())
}

/// Overlay `BLEGW_BIND_ADDR` and `BLEGW_WS_PORT` from `lookup`, then
/// validate the result. Stored config is checked here too, since a blob
/// written by another build never went through [`ConfigPort::save`].
pub fn overlay_config(
    cfg: &mut GatewayConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(addr) = lookup("BLEGW_BIND_ADDR") {
        let mut bind = heapless::String::new();
        bind.push_str(&addr)
            .map_err(|()| ConfigError::ValidationFailed("BLEGW_BIND_ADDR too long"))?;
        cfg.ws_bind_addr = bind;
    }
    if let Some(port) = lookup("BLEGW_WS_PORT") {
        cfg.ws_port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::ValidationFailed("BLEGW_WS_PORT must be a port number"))?;
    }
    validate_config(cfg)
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        if let Some(bytes) = self.store.borrow().get(&key) {
            let cfg: GatewayConfig =
                postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
            info!("NvsAdapter: loaded config ({} bytes)", bytes.len());
            Ok(cfg)
        } else {
            info!("NvsAdapter: no stored config, using defaults");
            Ok(GatewayConfig::default())
        }
    }

    fn save(&mut self, config: &GatewayConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes =
            postcard::to_allocvec(config).map_err(|_| ConfigError::Storage(StorageError::IoError))?;
        self.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let composite = Self::composite_key(namespace, key);
        match self.store.borrow().get(&composite) {
            Some(data) if data.len() > buf.len() => Err(StorageError::BufferTooSmall),
            Some(data) => {
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }
        let composite = Self::composite_key(namespace, key);
        let previous = self.store.borrow_mut().insert(composite.clone(), data.to_vec());
        if let Err(e) = self.flush() {
            let mut store = self.store.borrow_mut();
            match previous {
                Some(old) => store.insert(composite, old),
                None => store.remove(&composite),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        if self.store.borrow_mut().remove(&composite).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        let composite = Self::composite_key(namespace, key);
        self.store.borrow().contains_key(&composite)
    }
}
