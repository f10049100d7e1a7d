// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PageComp background coordinator.
//!
//! Owns the durable per-site settings store and brokers every settings read,
//! write and live push between UI panels and page content contexts.

pub mod bridge;
pub mod config;
pub mod service;
pub mod store;

pub use config::{ConfigError, ConfigManager, DaemonConfig};
pub use service::{spawn, Coordinator, CoordinatorHandle, HostEvent};
pub use store::{
    DurableStore, JsonFileStore, MemoryStore, SettingsChange, SettingsStore, StoreError,
    SETTINGS_STORAGE_KEY,
};
