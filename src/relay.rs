// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Metering relay: a panel's subscription to one page's live levels.

use pagecomp_ipc::{Delivered, PageMessage, PagePort, PushOutcome};
use tracing::{debug, warn};

/// Starts and stops level monitoring on at most one page at a time.
///
/// Dropping an active relay enqueues a stop without waiting, which covers a
/// panel that disappears without calling [`MeterRelay::stop`].
#[derive(Default)]
pub struct MeterRelay {
    page: Option<PagePort>,
}

impl MeterRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.page.is_some()
    }

    /// Subscribe to `page`. A repeated start on the same page is a no-op;
    /// a start on another page stops the previous one first.
    pub async fn start(&mut self, page: &PagePort) -> PushOutcome {
        if let Some(current) = &self.page {
            if current.same_destination(page) {
                return Ok(Delivered);
            }
            let _ = self.stop().await;
        }

        match page.request(PageMessage::StartLevelMonitoring).await {
            Ok(_) => {
                debug!("Level monitoring subscribed");
                self.page = Some(page.clone());
                Ok(Delivered)
            }
            Err(e) => {
                warn!("Could not start level monitoring: {}", e);
                Err(e)
            }
        }
    }

    /// Unsubscribe. Does nothing when not subscribed.
    pub async fn stop(&mut self) -> PushOutcome {
        let Some(page) = self.page.take() else {
            return Ok(Delivered);
        };

        let outcome = page
            .request(PageMessage::StopLevelMonitoring)
            .await
            .map(|_| Delivered);
        match &outcome {
            Ok(_) => debug!("Level monitoring unsubscribed"),
            Err(e) => debug!("Stop monitoring not delivered: {}", e),
        }
        outcome
    }
}

impl Drop for MeterRelay {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.send(PageMessage::StopLevelMonitoring) {
                debug!("Page already gone on relay drop: {}", e);
            }
        }
    }
}
