// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-process host runtime.
//!
//! Plays the part of the browser: owns the coordinator, tracks tabs and
//! the page loaded in each, forwards document events, opens panels and
//! carries meter updates from pages to panels.

use crate::audio::{AudioGraphManager, AudioPlatform};
use crate::client::CoordinatorClient;
use crate::dom::DomEvent;
use crate::page::{PageHandle, PageRuntime, DEFAULT_METER_INTERVAL};
use crate::panel::Panel;
use pagecomp_daemon::{service, CoordinatorHandle, DaemonConfig, SettingsStore};
use pagecomp_ipc::{channel, MessageSender, MeterUpdate, PagePort, TabId, DEFAULT_MESSAGE_TIMEOUT};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered meter updates per panel before it starts lagging.
const METER_CHANNEL_CAPACITY: usize = 64;

/// Timing knobs for a host.
#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    pub messaging_timeout: Duration,
    pub meter_interval: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            messaging_timeout: DEFAULT_MESSAGE_TIMEOUT,
            meter_interval: DEFAULT_METER_INTERVAL,
        }
    }
}

impl From<&DaemonConfig> for HostOptions {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            messaging_timeout: config.messaging_timeout(),
            meter_interval: config.meter_interval(),
        }
    }
}

struct Tab {
    address: Option<String>,
    page: PageHandle,
}

pub struct Host {
    coordinator: CoordinatorHandle,
    coordinator_task: JoinHandle<()>,
    tabs: HashMap<TabId, Tab>,
    next_tab: u32,
    meters: broadcast::Sender<MeterUpdate>,
    options: HostOptions,
}

impl Host {
    /// Start a coordinator over `store`. Must be called inside a tokio
    /// runtime.
    pub fn start(store: SettingsStore, options: HostOptions) -> Self {
        let (coordinator, coordinator_task) = service::spawn(store, options.messaging_timeout);
        let (meters, _) = broadcast::channel(METER_CHANNEL_CAPACITY);
        info!("Host started");

        Self {
            coordinator,
            coordinator_task,
            tabs: HashMap::new(),
            next_tab: 1,
            meters,
            options,
        }
    }

    /// Open a tab and load `address` into it.
    pub fn open_tab(&mut self, address: Option<&str>, platform: Box<dyn AudioPlatform>) -> TabId {
        let tab = TabId(self.next_tab);
        self.next_tab += 1;

        let address = address.map(str::to_string);
        let page = self.launch_page(tab, address.clone(), platform);
        self.tabs.insert(tab, Tab { address, page });
        debug!("Opened tab {}", tab);
        tab
    }

    /// Load a new page into an existing tab. Returns false for an unknown tab.
    pub fn navigate(
        &mut self,
        tab: TabId,
        address: Option<&str>,
        platform: Box<dyn AudioPlatform>,
    ) -> bool {
        let Some(old) = self.tabs.remove(&tab) else {
            warn!("Cannot navigate unknown tab {}", tab);
            return false;
        };
        old.page.shutdown();

        let address = address.map(str::to_string);
        let page = self.launch_page(tab, address.clone(), platform);
        self.tabs.insert(tab, Tab { address, page });
        debug!("Tab {} navigated", tab);
        true
    }

    /// Forward a document event to the tab's page.
    pub fn dispatch_dom(&self, tab: TabId, event: DomEvent) -> bool {
        match self.tabs.get(&tab) {
            Some(entry) => entry.page.dispatch(event),
            None => false,
        }
    }

    pub fn page_port(&self, tab: TabId) -> Option<&PagePort> {
        self.tabs.get(&tab).map(|entry| entry.page.port())
    }

    pub fn address(&self, tab: TabId) -> Option<&str> {
        self.tabs.get(&tab).and_then(|entry| entry.address.as_deref())
    }

    pub fn tabs(&self) -> impl Iterator<Item = TabId> + '_ {
        self.tabs.keys().copied()
    }

    /// Close the tab and wait until the coordinator has cleaned up after it.
    pub async fn close_tab(&mut self, tab: TabId) {
        if let Some(entry) = self.tabs.remove(&tab) {
            entry.page.shutdown();
        }
        self.coordinator.tab_closed(tab).await;
        debug!("Closed tab {}", tab);
    }

    /// Open the UI panel on `tab`.
    pub async fn open_panel(&self, tab: TabId) -> Panel {
        Panel::open(
            tab,
            self.address(tab),
            self.client(),
            self.page_port(tab),
            self.meters.subscribe(),
        )
        .await
    }

    /// A coordinator client speaking as the extension itself.
    pub fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(self.coordinator.port(MessageSender::extension()))
    }

    /// Tear down every page and stop the coordinator.
    pub async fn shutdown(self) {
        let Host {
            coordinator,
            coordinator_task,
            tabs,
            ..
        } = self;

        for (_, entry) in tabs {
            entry.page.shutdown();
        }
        drop(coordinator);

        if let Err(e) = coordinator_task.await {
            warn!("Coordinator task ended abnormally: {}", e);
        }
        info!("Host stopped");
    }

    fn launch_page(
        &self,
        tab: TabId,
        address: Option<String>,
        platform: Box<dyn AudioPlatform>,
    ) -> PageHandle {
        let (port, inbox) = channel(self.options.messaging_timeout);
        // Announce before the page can ask for its initial settings.
        self.coordinator.page_attached(tab, address.clone(), port.clone());

        let client = CoordinatorClient::new(self.coordinator.port(MessageSender::page(tab, address)));
        let runtime = PageRuntime::new(
            tab,
            AudioGraphManager::new(platform),
            client,
            self.meters.clone(),
            self.options.meter_interval,
        );
        runtime.spawn(port, inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{MockNode, MockPlatform, SharedMockGraph};
    use crate::dom::ElementId;
    use pagecomp_daemon::{MemoryStore, SETTINGS_STORAGE_KEY};
    use pagecomp_ipc::{CompressorSettings, PageMessage, SiteKey};

    fn host_with(store: MemoryStore) -> Host {
        let store = SettingsStore::open(store).unwrap();
        Host::start(store, HostOptions::default())
    }

    fn open(host: &mut Host, address: Option<&str>) -> (TabId, SharedMockGraph) {
        let (platform, graph) = MockPlatform::new();
        (host.open_tab(address, Box::new(platform)), graph)
    }

    /// Round-trip through the page so everything queued before is handled.
    async fn sync_page(host: &Host, tab: TabId) {
        host.page_port(tab)
            .unwrap()
            .request(PageMessage::StopLevelMonitoring)
            .await
            .unwrap();
    }

    fn scenario() -> CompressorSettings {
        CompressorSettings {
            enabled: true,
            threshold_db: -30.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 100.0,
            output_gain_db: 3.0,
        }
    }

    fn routes_through_compressor(graph: &SharedMockGraph, element: ElementId) -> bool {
        let graph = graph.lock();
        let source = graph.source_of(element).unwrap();
        let compressor = graph.node_of(MockNode::Compressor).unwrap();
        graph.outputs(source) == vec![compressor]
    }

    #[tokio::test]
    async fn test_settings_follow_site_into_new_tab() {
        let mut host = host_with(MemoryStore::new());
        let (first, first_graph) = open(&mut host, Some("https://example.com/watch?v=1"));
        host.dispatch_dom(first, DomEvent::MediaPlay(ElementId(1)));
        sync_page(&host, first).await;

        let mut panel = host.open_panel(first).await;
        assert_eq!(panel.key().as_str(), "example.com");
        let outcome = panel.update(scenario()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.warning, None);
        assert!(routes_through_compressor(&first_graph, ElementId(1)));
        panel.close().await;

        let (second, second_graph) = open(&mut host, Some("http://EXAMPLE.com/other"));
        host.dispatch_dom(second, DomEvent::MediaPlay(ElementId(7)));
        sync_page(&host, second).await;

        assert!(routes_through_compressor(&second_graph, ElementId(7)));
        let params = second_graph.lock().compressor_params.unwrap();
        assert_eq!(params.ratio, 4.0);
        assert!((params.release_secs - 0.1).abs() < 1e-6);

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_reaches_other_tab_on_same_site() {
        let mut host = host_with(MemoryStore::new());
        let (first, _first_graph) = open(&mut host, Some("https://example.com/a"));
        let (second, second_graph) = open(&mut host, Some("https://example.com/b"));
        host.dispatch_dom(second, DomEvent::MediaPlay(ElementId(1)));
        sync_page(&host, first).await;
        sync_page(&host, second).await;
        assert!(!routes_through_compressor(&second_graph, ElementId(1)));

        let mut panel = host.open_panel(first).await;
        panel.set_enabled(true).await.unwrap();
        sync_page(&host, second).await;

        assert!(routes_through_compressor(&second_graph, ElementId(1)));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_for_closed_tab_warns_but_persists() {
        let mut host = host_with(MemoryStore::new());
        let (tab, _graph) = open(&mut host, Some("https://example.com/"));
        host.close_tab(tab).await;

        let client = host.client();
        let key = SiteKey::new("example.com");
        let outcome = client.update_settings(&key, tab, scenario()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.warning.unwrap().contains("not updated live"));

        assert_eq!(client.get_settings(&key).await.unwrap(), scenario());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_closing_tab_drops_synthetic_settings() {
        let backend = MemoryStore::new();
        let mut host = host_with(backend.clone());
        let (tab, _graph) = open(&mut host, None);

        let mut panel = host.open_panel(tab).await;
        assert_eq!(panel.key(), &SiteKey::synthetic(tab));
        panel.set_enabled(true).await.unwrap();

        let document = backend.snapshot(SETTINGS_STORAGE_KEY).unwrap();
        assert!(document.get("tab-1").is_some());

        host.close_tab(tab).await;
        let document = backend.snapshot(SETTINGS_STORAGE_KEY).unwrap();
        assert!(document.get("tab-1").is_none());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_restores_defaults_on_page() {
        let mut host = host_with(MemoryStore::new());
        let (tab, graph) = open(&mut host, Some("https://example.com/"));
        host.dispatch_dom(tab, DomEvent::MediaPlay(ElementId(1)));

        let mut panel = host.open_panel(tab).await;
        panel.update(scenario()).await.unwrap();
        assert!(routes_through_compressor(&graph, ElementId(1)));

        let defaults = panel.reset().await.unwrap();
        assert_eq!(defaults, CompressorSettings::default());
        assert!(!routes_through_compressor(&graph, ElementId(1)));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_denied_pipeline_retries_on_next_gesture() {
        let mut host = host_with(MemoryStore::new());
        let (tab, graph) = open(&mut host, Some("https://example.com/"));
        graph.lock().deny_pipelines = 1;

        host.dispatch_dom(tab, DomEvent::MediaAdded(ElementId(1)));
        host.dispatch_dom(tab, DomEvent::UserGesture);
        sync_page(&host, tab).await;
        assert_eq!(graph.lock().pipelines_created, 0);
        assert!(graph.lock().source_of(ElementId(1)).is_none());

        host.dispatch_dom(tab, DomEvent::MediaPlay(ElementId(1)));
        sync_page(&host, tab).await;
        assert_eq!(graph.lock().pipelines_created, 1);
        assert!(graph.lock().source_of(ElementId(1)).is_some());
        host.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panel_receives_levels_while_playing() {
        let mut host = host_with(MemoryStore::new());
        let (tab, graph) = open(&mut host, Some("https://example.com/"));
        graph.lock().reduction_db = -4.0;
        host.dispatch_dom(tab, DomEvent::MediaPlay(ElementId(1)));

        let mut panel = host.open_panel(tab).await;
        assert!(panel.is_monitoring());

        tokio::time::sleep(Duration::from_millis(250)).await;
        sync_page(&host, tab).await;

        let update = panel.poll_meters().unwrap();
        assert_eq!(update.tab_id, tab);
        assert_eq!(update.reduction, 4.0);
        host.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_levels_when_nothing_plays() {
        let mut host = host_with(MemoryStore::new());
        let (tab, _graph) = open(&mut host, Some("https://example.com/"));
        host.dispatch_dom(tab, DomEvent::MediaAdded(ElementId(1)));
        host.dispatch_dom(tab, DomEvent::UserGesture);

        let mut panel = host.open_panel(tab).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(panel.poll_meters(), None);
        panel.close().await;
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_navigation_rebinds_tab() {
        let mut host = host_with(MemoryStore::new());
        let (tab, _graph) = open(&mut host, Some("https://example.com/"));
        host.client()
            .update_settings(&SiteKey::new("other.org"), TabId(99), scenario())
            .await
            .unwrap();

        let (platform, graph) = MockPlatform::new();
        assert!(host.navigate(tab, Some("https://other.org/"), Box::new(platform)));
        host.dispatch_dom(tab, DomEvent::MediaPlay(ElementId(2)));
        sync_page(&host, tab).await;

        assert_eq!(host.address(tab), Some("https://other.org/"));
        assert!(routes_through_compressor(&graph, ElementId(2)));
        host.shutdown().await;
    }
}
