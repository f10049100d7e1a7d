// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! UI panel controller.
//!
//! Holds what the panel would render: the active tab's site key, the
//! settings being edited, the latest meter reading and a transient status
//! line. All writes go through the coordinator.

use crate::client::{ClientError, CoordinatorClient};
use crate::relay::MeterRelay;
use pagecomp_ipc::{
    resolve_or_synthetic, CompressorSettings, MeterUpdate, PagePort, SiteKey, TabId,
    UpdateOutcome,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct Panel {
    tab: TabId,
    key: SiteKey,
    client: CoordinatorClient,
    relay: MeterRelay,
    meters: broadcast::Receiver<MeterUpdate>,
    settings: CompressorSettings,
    last_meter: Option<MeterUpdate>,
    status: Option<String>,
}

impl Panel {
    /// Open the panel on `tab` showing `address`.
    ///
    /// Falls back to defaults with a status message if the coordinator does
    /// not answer. Level monitoring starts when `page` is given.
    pub async fn open(
        tab: TabId,
        address: Option<&str>,
        client: CoordinatorClient,
        page: Option<&PagePort>,
        meters: broadcast::Receiver<MeterUpdate>,
    ) -> Self {
        let key = resolve_or_synthetic(address, tab);
        info!("Panel opened for tab {} ({})", tab, key);

        let mut panel = Self {
            tab,
            key,
            client,
            relay: MeterRelay::new(),
            meters,
            settings: CompressorSettings::default(),
            last_meter: None,
            status: None,
        };

        match panel.client.get_settings(&panel.key).await {
            Ok(settings) => panel.settings = settings,
            Err(e) => {
                warn!("Panel could not load settings for {}: {}", panel.key, e);
                panel.status = Some(format!("Could not load settings: {}", e));
            }
        }

        if let Some(page) = page {
            if panel.relay.start(page).await.is_err() {
                debug!("No live levels for tab {}", tab);
            }
        }

        panel
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn key(&self) -> &SiteKey {
        &self.key
    }

    pub fn settings(&self) -> CompressorSettings {
        self.settings
    }

    /// Transient message for the user, if the last action had one.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_monitoring(&self) -> bool {
        self.relay.is_active()
    }

    /// Save new settings for the site and apply them to the tab.
    pub async fn update(&mut self, settings: CompressorSettings) -> Result<UpdateOutcome, ClientError> {
        let settings = settings.clamped();
        self.status = None;

        let outcome = match self.client.update_settings(&self.key, self.tab, settings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.status = Some(format!("Could not save settings: {}", e));
                return Err(e);
            }
        };

        if outcome.success {
            self.settings = settings;
            self.status = outcome.warning.clone();
        } else {
            self.status = Some(format!(
                "Could not save settings: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            ));
        }
        Ok(outcome)
    }

    pub async fn set_enabled(&mut self, enabled: bool) -> Result<UpdateOutcome, ClientError> {
        self.update(CompressorSettings {
            enabled,
            ..self.settings
        })
        .await
    }

    /// Forget the site's settings.
    pub async fn reset(&mut self) -> Result<CompressorSettings, ClientError> {
        self.status = None;
        match self.client.reset_settings(&self.key, self.tab).await {
            Ok(defaults) => {
                self.settings = defaults;
                Ok(defaults)
            }
            Err(e) => {
                self.status = Some(format!("Could not reset settings: {}", e));
                Err(e)
            }
        }
    }

    /// Drain pending meter updates and return the newest one for this tab.
    pub fn poll_meters(&mut self) -> Option<MeterUpdate> {
        loop {
            match self.meters.try_recv() {
                Ok(update) if update.tab_id == self.tab => self.last_meter = Some(update),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    debug!("Panel skipped {} meter updates", missed);
                }
                Err(_) => break,
            }
        }
        self.last_meter
    }

    /// Stop level monitoring and close.
    pub async fn close(mut self) {
        let _ = self.relay.stop().await;
        debug!("Panel for tab {} closed", self.tab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecomp_ipc::{channel, Request, Response, DEFAULT_MESSAGE_TIMEOUT};

    fn closed_client() -> CoordinatorClient {
        let (port, inbox) = channel::<Request, Response>(DEFAULT_MESSAGE_TIMEOUT);
        drop(inbox);
        CoordinatorClient::new(port)
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_shows_defaults_and_status() {
        let (_meter_tx, meters) = broadcast::channel(4);
        let panel = Panel::open(
            TabId(3),
            Some("https://example.com/"),
            closed_client(),
            None,
            meters,
        )
        .await;

        assert_eq!(panel.key().as_str(), "example.com");
        assert_eq!(panel.settings(), CompressorSettings::default());
        assert!(panel.status().unwrap().starts_with("Could not load settings"));
        assert!(!panel.is_monitoring());
    }

    #[tokio::test]
    async fn test_refused_reset_keeps_settings_and_sets_status() {
        let stored = CompressorSettings {
            ratio: 6.0,
            ..CompressorSettings::default()
        };
        let (port, mut inbox) = channel::<Request, Response>(DEFAULT_MESSAGE_TIMEOUT);
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                let reply = match envelope.message {
                    Request::GetSettings { .. } => Response::settings(stored),
                    _ => Response::Update(UpdateOutcome::failed("read-only storage")),
                };
                envelope.responder.respond(reply);
            }
        });

        let (_meter_tx, meters) = broadcast::channel(4);
        let mut panel = Panel::open(
            TabId(4),
            Some("https://example.com/"),
            CoordinatorClient::new(port),
            None,
            meters,
        )
        .await;
        assert_eq!(panel.settings(), stored);

        assert!(panel.reset().await.is_err());
        assert_eq!(panel.settings(), stored);
        assert!(panel.status().unwrap().starts_with("Could not reset settings"));
        assert!(panel.status().unwrap().contains("read-only storage"));
    }

    #[tokio::test]
    async fn test_key_falls_back_to_synthetic() {
        let (_meter_tx, meters) = broadcast::channel(4);
        let panel = Panel::open(TabId(9), Some("about:blank"), closed_client(), None, meters).await;
        assert_eq!(panel.key(), &SiteKey::synthetic(TabId(9)));
    }

    #[tokio::test]
    async fn test_poll_meters_filters_by_tab() {
        let (meter_tx, meters) = broadcast::channel(8);
        let mut panel = Panel::open(TabId(1), None, closed_client(), None, meters).await;

        meter_tx
            .send(MeterUpdate {
                tab_id: TabId(1),
                level: -20.0,
                reduction: 2.0,
            })
            .unwrap();
        meter_tx
            .send(MeterUpdate {
                tab_id: TabId(2),
                level: -5.0,
                reduction: 9.0,
            })
            .unwrap();

        let latest = panel.poll_meters().unwrap();
        assert_eq!(latest.tab_id, TabId(1));
        assert_eq!(latest.level, -20.0);
        assert_eq!(panel.poll_meters(), Some(latest));
    }
}
