// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed client for the messaging coordinator.

use pagecomp_ipc::{
    CompressorSettings, RawSettings, Request, RequestPort, Response, SiteKey, TabId, Unreachable,
    UpdateOutcome,
};
use thiserror::Error;
use tracing::debug;

/// Errors talking to the coordinator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Coordinator unreachable: {0}")]
    Unreachable(#[from] Unreachable),
    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),
    #[error("Coordinator refused: {0}")]
    Rejected(String),
}

/// Request/response wrapper over a [`RequestPort`].
#[derive(Clone)]
pub struct CoordinatorClient {
    port: RequestPort,
}

impl CoordinatorClient {
    pub fn new(port: RequestPort) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &RequestPort {
        &self.port
    }

    /// Settings stored for `key`, or the defaults.
    pub async fn get_settings(&self, key: &SiteKey) -> Result<CompressorSettings, ClientError> {
        debug!("Fetching settings for {}", key);
        self.port
            .request(Request::GetSettings { key: key.clone() })
            .await?
            .into_settings()
            .ok_or(ClientError::UnexpectedResponse("GET_SETTINGS"))
    }

    /// Persist `settings` for `key` and push them to `tab`.
    ///
    /// A failed live push is reported as a warning in the outcome, not as
    /// an error.
    pub async fn update_settings(
        &self,
        key: &SiteKey,
        tab: TabId,
        settings: impl Into<RawSettings>,
    ) -> Result<UpdateOutcome, ClientError> {
        debug!("Updating settings for {} (tab {})", key, tab);
        self.port
            .request(Request::UpdateSettings {
                key: key.clone(),
                tab_id: tab,
                settings: settings.into(),
            })
            .await?
            .into_update()
            .ok_or(ClientError::UnexpectedResponse("UPDATE_SETTINGS"))
    }

    /// Forget `key` and push the defaults to `tab`. Returns the defaults.
    ///
    /// A coordinator that could not forget the key answers with a failed
    /// outcome, surfaced as [`ClientError::Rejected`].
    pub async fn reset_settings(
        &self,
        key: &SiteKey,
        tab: TabId,
    ) -> Result<CompressorSettings, ClientError> {
        debug!("Resetting settings for {} (tab {})", key, tab);
        let response = self
            .port
            .request(Request::ResetSettings {
                key: key.clone(),
                tab_id: tab,
            })
            .await?;

        match response {
            Response::Settings { settings } => Ok(settings),
            Response::Update(UpdateOutcome {
                success: false,
                error,
                ..
            }) => Err(ClientError::Rejected(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Response::Update(_) => Err(ClientError::UnexpectedResponse("RESET_SETTINGS")),
        }
    }

    /// Settings for the page this port's sender describes.
    pub async fn request_initial_settings(&self) -> Result<CompressorSettings, ClientError> {
        self.port
            .request(Request::RequestInitialSettings {})
            .await?
            .into_settings()
            .ok_or(ClientError::UnexpectedResponse("REQUEST_INITIAL_SETTINGS"))
    }
}
