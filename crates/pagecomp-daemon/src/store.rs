// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Durable per-site settings store.
//!
//! The whole site-key → settings mapping lives in one JSON document under
//! [`SETTINGS_STORAGE_KEY`]. It is read once when the store opens; every
//! mutation writes the full document through to the backend before the
//! in-memory cache changes, then notifies subscribers.

use pagecomp_ipc::{CompressorSettings, RawSettings, SiteKey};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Storage key of the settings document.
pub const SETTINGS_STORAGE_KEY: &str = "compressorSettings";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Write rejected by storage backend: {0}")]
    WriteRejected(String),
}

/// Generic durable key-value storage.
pub trait DurableStore: Send {
    /// Read the document stored under `name`, if any.
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the document stored under `name`.
    fn save(&mut self, name: &str, value: &Value) -> Result<(), StoreError>;
}

/// One JSON file per storage key inside a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!("Settings storage directory: {:?}", dir);
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl DurableStore for JsonFileStore {
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Keep the unreadable copy aside; the next save starts fresh.
                let backup = path.with_extension("json.bak");
                warn!("Unreadable settings document {:?} ({}), moved to {:?}", path, e, backup);
                fs::rename(&path, &backup)?;
                Ok(None)
            }
        }
    }

    fn save(&mut self, name: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        trace!("Wrote {:?}", path);
        Ok(())
    }
}

/// In-memory storage. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<HashMap<String, Value>>>,
    reject_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a document.
    pub fn with_document(self, name: &str, value: Value) -> Self {
        self.documents.lock().insert(name.to_string(), value);
        self
    }

    /// Current contents of a document.
    pub fn snapshot(&self, name: &str) -> Option<Value> {
        self.documents.lock().get(name).cloned()
    }

    /// Make subsequent writes fail, as a full or broken disk would.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::Relaxed);
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.snapshot(name))
    }

    fn save(&mut self, name: &str, value: &Value) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::Relaxed) {
            return Err(StoreError::WriteRejected(name.to_string()));
        }
        self.documents.lock().insert(name.to_string(), value.clone());
        Ok(())
    }
}

/// Change notification emitted after a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    Updated {
        key: SiteKey,
        settings: CompressorSettings,
    },
    /// The entry is gone; `settings` are the defaults now in effect.
    Removed {
        key: SiteKey,
        settings: CompressorSettings,
    },
}

impl SettingsChange {
    pub fn key(&self) -> &SiteKey {
        match self {
            SettingsChange::Updated { key, .. } | SettingsChange::Removed { key, .. } => key,
        }
    }

    pub fn settings(&self) -> CompressorSettings {
        match self {
            SettingsChange::Updated { settings, .. } | SettingsChange::Removed { settings, .. } => {
                *settings
            }
        }
    }
}

/// Validated, write-through cache of per-site settings.
pub struct SettingsStore {
    backend: Box<dyn DurableStore>,
    cache: BTreeMap<SiteKey, CompressorSettings>,
    changes: broadcast::Sender<SettingsChange>,
}

impl SettingsStore {
    /// Load the settings document and validate every entry.
    pub fn open(backend: impl DurableStore + 'static) -> Result<Self, StoreError> {
        let cache = match backend.load(SETTINGS_STORAGE_KEY)? {
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(key, raw)| (SiteKey::new(key.as_str()), CompressorSettings::from_raw(raw)))
                .collect(),
            Some(other) => {
                warn!(
                    "Ignoring malformed settings document (expected an object, got {})",
                    json_kind(&other)
                );
                BTreeMap::new()
            }
            None => {
                debug!("No settings document found, starting empty");
                BTreeMap::new()
            }
        };

        info!("Loaded settings for {} sites", cache.len());

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            backend: Box::new(backend),
            cache,
            changes,
        })
    }

    /// Settings for `key`, or the defaults when nothing is stored.
    pub fn get(&self, key: &SiteKey) -> CompressorSettings {
        self.cache.get(key).copied().unwrap_or_default()
    }

    pub fn contains(&self, key: &SiteKey) -> bool {
        self.cache.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SiteKey> {
        self.cache.keys()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Validate, persist and cache settings for `key`.
    ///
    /// Returns the settings as stored. If the durable write fails the cache
    /// is left untouched and no change is emitted.
    pub fn put(&mut self, key: SiteKey, raw: &RawSettings) -> Result<CompressorSettings, StoreError> {
        let settings = raw.validate();

        let mut next = self.cache.clone();
        next.insert(key.clone(), settings);
        self.persist(&next)?;
        self.cache = next;

        debug!("Stored settings for {}", key);
        self.notify(SettingsChange::Updated { key, settings });
        Ok(settings)
    }

    /// Delete the entry for `key`; later reads return the defaults.
    pub fn remove(&mut self, key: &SiteKey) -> Result<CompressorSettings, StoreError> {
        let defaults = CompressorSettings::default();
        if !self.cache.contains_key(key) {
            trace!("No stored settings for {}, nothing to remove", key);
            return Ok(defaults);
        }

        let mut next = self.cache.clone();
        next.remove(key);
        self.persist(&next)?;
        self.cache = next;

        debug!("Removed settings for {}", key);
        self.notify(SettingsChange::Removed {
            key: key.clone(),
            settings: defaults,
        });
        Ok(defaults)
    }

    /// Receive a [`SettingsChange`] for every committed mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.changes.subscribe()
    }

    /// Release the store at shutdown.
    pub fn close(self) {
        info!("Settings store closed with {} sites", self.cache.len());
    }

    fn persist(&mut self, entries: &BTreeMap<SiteKey, CompressorSettings>) -> Result<(), StoreError> {
        let document: Map<String, Value> = entries
            .iter()
            .map(|(key, settings)| (key.as_str().to_string(), settings.to_value()))
            .collect();

        self.backend
            .save(SETTINGS_STORAGE_KEY, &Value::Object(document))
            .map_err(|e| {
                warn!("Failed to persist settings document: {}", e);
                e
            })
    }

    fn notify(&self, change: SettingsChange) {
        if self.changes.send(change).is_err() {
            trace!("No settings subscribers");
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario_settings() -> Value {
        json!({
            "enabled": true,
            "threshold": -24,
            "ratio": 4,
            "attack": 5,
            "release": 50,
            "outputGain": 0,
        })
    }

    #[test]
    fn test_unknown_key_yields_defaults() {
        let store = SettingsStore::open(MemoryStore::new()).unwrap();
        assert_eq!(store.get(&SiteKey::from("nowhere.example")), CompressorSettings::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_clamps_and_writes_through() {
        let backend = MemoryStore::new();
        let mut store = SettingsStore::open(backend.clone()).unwrap();
        let key = SiteKey::from("example.com");

        let stored = store
            .put(key.clone(), &RawSettings(json!({ "enabled": true, "ratio": 50 })))
            .unwrap();
        assert_eq!(stored.ratio, 20.0);
        assert_eq!(store.get(&key), stored);

        let document = backend.snapshot(SETTINGS_STORAGE_KEY).unwrap();
        assert_eq!(document["example.com"]["ratio"], json!(20.0));
        assert_eq!(document["example.com"]["enabled"], json!(true));
    }

    #[test]
    fn test_reopen_merges_defaults_over_old_records() {
        let backend = MemoryStore::new().with_document(
            SETTINGS_STORAGE_KEY,
            json!({
                "example.com": scenario_settings(),
                "old.example": { "enabled": true, "threshold": -30 },
            }),
        );
        let store = SettingsStore::open(backend).unwrap();

        let example = store.get(&SiteKey::from("example.com"));
        assert!(example.enabled);
        assert_eq!(example.ratio, 4.0);
        assert_eq!(example.attack_ms, 5.0);
        assert_eq!(example.release_ms, 50.0);

        let old = store.get(&SiteKey::from("old.example"));
        assert_eq!(old.threshold_db, -30.0);
        assert_eq!(old.ratio, CompressorSettings::default().ratio);
    }

    #[test]
    fn test_malformed_document_is_ignored() {
        let backend = MemoryStore::new().with_document(SETTINGS_STORAGE_KEY, json!([1, 2, 3]));
        let store = SettingsStore::open(backend).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{}.json", SETTINGS_STORAGE_KEY));
        fs::write(&path, r#"{ "example.com": {"ratio": 4,"#).unwrap();

        let mut store = SettingsStore::open(JsonFileStore::new(dir.path()).unwrap()).unwrap();
        assert!(store.is_empty());
        assert!(!path.exists());

        let backup = dir.path().join(format!("{}.json.bak", SETTINGS_STORAGE_KEY));
        assert_eq!(
            fs::read_to_string(&backup).unwrap(),
            r#"{ "example.com": {"ratio": 4,"#
        );

        store
            .put(SiteKey::from("example.com"), &RawSettings(scenario_settings()))
            .unwrap();
        let reopened = SettingsStore::open(JsonFileStore::new(dir.path()).unwrap()).unwrap();
        assert_eq!(reopened.get(&SiteKey::from("example.com")).ratio, 4.0);
    }

    #[test]
    fn test_remove_reverts_to_defaults_and_notifies() {
        let mut store = SettingsStore::open(MemoryStore::new()).unwrap();
        let key = SiteKey::from("example.com");
        store.put(key.clone(), &RawSettings(scenario_settings())).unwrap();

        let mut changes = store.subscribe();
        let defaults = store.remove(&key).unwrap();

        assert_eq!(defaults, CompressorSettings::default());
        assert_eq!(store.get(&key), CompressorSettings::default());
        assert!(!store.contains(&key));
        assert_eq!(
            changes.try_recv().unwrap(),
            SettingsChange::Removed {
                key,
                settings: CompressorSettings::default()
            }
        );
    }

    #[test]
    fn test_remove_absent_key_is_silent() {
        let mut store = SettingsStore::open(MemoryStore::new()).unwrap();
        let mut changes = store.subscribe();

        store.remove(&SiteKey::from("never.example")).unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_failed_write_leaves_cache_untouched() {
        let backend = MemoryStore::new();
        let mut store = SettingsStore::open(backend.clone()).unwrap();
        let key = SiteKey::from("example.com");
        let mut changes = store.subscribe();

        backend.set_reject_writes(true);
        let result = store.put(key.clone(), &RawSettings(scenario_settings()));

        assert!(matches!(result, Err(StoreError::WriteRejected(_))));
        assert_eq!(store.get(&key), CompressorSettings::default());
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_put_notifies_subscribers() {
        let mut store = SettingsStore::open(MemoryStore::new()).unwrap();
        let mut changes = store.subscribe();
        let key = SiteKey::from("example.com");

        let stored = store.put(key.clone(), &RawSettings(scenario_settings())).unwrap();

        let change = changes.try_recv().unwrap();
        assert_eq!(change.key(), &key);
        assert_eq!(change.settings(), stored);
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = SiteKey::from("file:///srv/media/index.html");

        {
            let mut store = SettingsStore::open(JsonFileStore::new(dir.path()).unwrap()).unwrap();
            store.put(key.clone(), &RawSettings(scenario_settings())).unwrap();
            store.close();
        }

        let store = SettingsStore::open(JsonFileStore::new(dir.path()).unwrap()).unwrap();
        let settings = store.get(&key);
        assert!(settings.enabled);
        assert_eq!(settings.threshold_db, -24.0);
        assert!(dir.path().join("compressorSettings.json").exists());
    }
}
