// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Page runtime: the content context of one loaded page.
//!
//! A single task owns the page's [`AudioGraphManager`] and reacts to
//! document events, coordinator pushes and meter subscriptions. Level
//! sampling only runs while a panel is subscribed.

use crate::audio::AudioGraphManager;
use crate::client::CoordinatorClient;
use crate::dom::DomEvent;
use pagecomp_ipc::{Envelope, Inbox, MeterUpdate, PageMessage, PagePort, PageReply, TabId};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Default metering period.
pub const DEFAULT_METER_INTERVAL: Duration = Duration::from_millis(100);

/// State of one page's content context.
pub struct PageRuntime {
    tab: TabId,
    graph: AudioGraphManager,
    coordinator: CoordinatorClient,
    meters: broadcast::Sender<MeterUpdate>,
    meter_interval: Duration,
    monitor: Option<Interval>,
}

/// Host-side handle to a running page.
pub struct PageHandle {
    tab: TabId,
    dom: mpsc::UnboundedSender<DomEvent>,
    port: PagePort,
    task: JoinHandle<()>,
}

impl PageHandle {
    pub fn tab(&self) -> TabId {
        self.tab
    }

    /// Port for messages into the page.
    pub fn port(&self) -> &PagePort {
        &self.port
    }

    /// Deliver a document event. Returns false if the page is gone.
    pub fn dispatch(&self, event: DomEvent) -> bool {
        self.dom.send(event).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the page down immediately, as a navigation or tab close does.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl PageRuntime {
    /// `coordinator` must be stamped with this page's sender.
    pub fn new(
        tab: TabId,
        graph: AudioGraphManager,
        coordinator: CoordinatorClient,
        meters: broadcast::Sender<MeterUpdate>,
        meter_interval: Duration,
    ) -> Self {
        Self {
            tab,
            graph,
            coordinator,
            meters,
            meter_interval,
            monitor: None,
        }
    }

    /// Start the page task. `port` must lead to `inbox`.
    pub fn spawn(self, port: PagePort, inbox: Inbox<PageMessage, PageReply>) -> PageHandle {
        let (dom, dom_events) = mpsc::unbounded_channel();
        let tab = self.tab;
        let task = tokio::spawn(self.run(dom_events, inbox));

        PageHandle {
            tab,
            dom,
            port,
            task,
        }
    }

    async fn run(
        mut self,
        mut dom_events: mpsc::UnboundedReceiver<DomEvent>,
        mut inbox: Inbox<PageMessage, PageReply>,
    ) {
        match self.coordinator.request_initial_settings().await {
            Ok(settings) => {
                debug!("Tab {} starting with {:?}", self.tab, settings);
                self.graph.set_settings(settings);
            }
            Err(e) => warn!("Tab {} keeps default settings: {}", self.tab, e),
        }

        loop {
            tokio::select! {
                biased;

                event = dom_events.recv() => match event {
                    Some(event) => self.handle_dom_event(event),
                    None => break,
                },
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle_message(envelope),
                    None => break,
                },
                _ = next_tick(&mut self.monitor) => self.emit_meter(),
            }
        }

        debug!("Page runtime for tab {} stopped", self.tab);
    }

    fn handle_dom_event(&mut self, event: DomEvent) {
        trace!("Tab {} DOM event {:?}", self.tab, event);
        match event {
            DomEvent::MediaAdded(element) => self.graph.discover(element),
            DomEvent::MediaRemoved(element) | DomEvent::MediaError(element) => {
                self.graph.detach(element)
            }
            DomEvent::MediaPlay(element) => self.graph.on_play(element),
            DomEvent::MediaPause(element) => self.graph.on_pause(element),
            DomEvent::UserGesture => self.graph.on_gesture(),
        }
    }

    fn handle_message(&mut self, envelope: Envelope<PageMessage, PageReply>) {
        trace!("Tab {} received {}", self.tab, envelope.message.name());

        match envelope.message {
            PageMessage::SettingsUpdated { settings } => self.graph.set_settings(settings),
            PageMessage::StartLevelMonitoring => {
                if self.monitor.is_none() {
                    info!("Tab {} level monitoring started", self.tab);
                    let mut ticker =
                        interval_at(Instant::now() + self.meter_interval, self.meter_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    self.monitor = Some(ticker);
                }
            }
            PageMessage::StopLevelMonitoring => {
                if self.monitor.take().is_some() {
                    info!("Tab {} level monitoring stopped", self.tab);
                }
            }
        }

        envelope.responder.respond(PageReply { success: true });
    }

    fn emit_meter(&mut self) {
        let Some(metrics) = self.graph.sample_metrics() else {
            return;
        };

        let update = MeterUpdate {
            tab_id: self.tab,
            level: metrics.peak_level_db,
            reduction: metrics.max_reduction_db,
        };
        if self.meters.send(update).is_err() {
            trace!("No panel listening for tab {} meters", self.tab);
        }
    }
}

async fn next_tick(monitor: &mut Option<Interval>) {
    match monitor {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
