// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Messages exchanged between the coordinator, pages and panels.

use crate::settings::{CompressorSettings, RawSettings};
use crate::site_key::{SiteKey, TabId};
use serde::{Deserialize, Serialize};

/// Requests handled by the background coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    /// Read the settings stored for a site.
    GetSettings { key: SiteKey },
    /// Persist settings for a site and push them to a tab.
    UpdateSettings {
        key: SiteKey,
        tab_id: TabId,
        settings: RawSettings,
    },
    /// Forget a site's settings and push the defaults to a tab.
    ResetSettings { key: SiteKey, tab_id: TabId },
    /// Sent by a freshly loaded page; the sender identifies the tab.
    RequestInitialSettings {},
}

impl Request {
    /// Wire name of the operation, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetSettings { .. } => "GET_SETTINGS",
            Request::UpdateSettings { .. } => "UPDATE_SETTINGS",
            Request::ResetSettings { .. } => "RESET_SETTINGS",
            Request::RequestInitialSettings {} => "REQUEST_INITIAL_SETTINGS",
        }
    }
}

/// Result of an UPDATE_SETTINGS request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl UpdateOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            warning: None,
        }
    }

    /// Persisted, but something downstream did not go through.
    pub fn with_warning(warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::ok()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            warning: None,
        }
    }
}

/// Coordinator responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Settings { settings: CompressorSettings },
    Update(UpdateOutcome),
}

impl Response {
    pub fn settings(settings: CompressorSettings) -> Self {
        Response::Settings { settings }
    }

    pub fn into_settings(self) -> Option<CompressorSettings> {
        match self {
            Response::Settings { settings } => Some(settings),
            Response::Update(_) => None,
        }
    }

    pub fn into_update(self) -> Option<UpdateOutcome> {
        match self {
            Response::Update(outcome) => Some(outcome),
            Response::Settings { .. } => None,
        }
    }
}

/// Messages delivered to a page's content context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    /// Coordinator push after a settings change for the page's site.
    SettingsUpdated { settings: CompressorSettings },
    /// A panel opened and wants live levels.
    StartLevelMonitoring,
    /// The panel went away.
    StopLevelMonitoring,
}

impl PageMessage {
    pub fn name(&self) -> &'static str {
        match self {
            PageMessage::SettingsUpdated { .. } => "SETTINGS_UPDATED",
            PageMessage::StartLevelMonitoring => "START_LEVEL_MONITORING",
            PageMessage::StopLevelMonitoring => "STOP_LEVEL_MONITORING",
        }
    }
}

/// Page acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReply {
    pub success: bool,
}

/// Live levels streamed from a page to an open panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterUpdate {
    pub tab_id: TabId,
    /// Output level in dB (floored at -60).
    pub level: f32,
    /// Gain reduction in dB, non-negative.
    pub reduction: f32,
}

/// Identity of the context that sent a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSender {
    pub tab: Option<TabId>,
    pub address: Option<String>,
}

impl MessageSender {
    /// A sender outside any tab (panel, bridge).
    pub fn extension() -> Self {
        Self::default()
    }

    pub fn page(tab: TabId, address: Option<String>) -> Self {
        Self {
            tab: Some(tab),
            address,
        }
    }
}
