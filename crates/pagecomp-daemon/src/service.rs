// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Messaging coordinator: the background context that owns the settings
//! store and routes settings to live pages.
//!
//! The coordinator runs as a single task. Store mutations and push enqueues
//! happen inline, in the order requests arrive, so the last write for a key
//! wins and each page sees its pushes in order. Waiting for a page to
//! acknowledge a push happens in a spawned task; a page that is gone never
//! stalls the loop, and a failed push never rolls back a persisted write.

use crate::store::{SettingsChange, SettingsStore};
use futures::future::join_all;
use pagecomp_ipc::{
    channel, resolve, resolve_or_synthetic, CompressorSettings, Envelope, Inbox, MessageSender,
    PageMessage, PagePort, PageReply, PendingReply, RawSettings, Request, RequestPort, Response,
    SiteKey, TabId, Unreachable, UpdateOutcome,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Tab lifecycle notifications from the host runtime.
#[derive(Debug)]
pub enum HostEvent {
    /// A page's content context started in `tab` and listens on `port`.
    PageAttached {
        tab: TabId,
        address: Option<String>,
        port: PagePort,
    },
    /// The tab is gone. `done` fires once cleanup is committed.
    TabClosed {
        tab: TabId,
        done: Option<oneshot::Sender<()>>,
    },
}

/// What the coordinator knows about a live tab.
#[derive(Debug, Default)]
struct TabEntry {
    port: Option<PagePort>,
    key: Option<SiteKey>,
    /// Last settings queued to or handed to the page.
    applied: Option<CompressorSettings>,
}

/// Why a push is being made; decides the response once the page answers.
#[derive(Debug, Clone, Copy)]
enum PushPurpose {
    Update,
    Reset,
}

/// Result of the synchronous part of a request.
enum Dispatch {
    Ready(Response),
    AfterPush {
        tab: TabId,
        purpose: PushPurpose,
        settings: CompressorSettings,
        push: Result<PendingReply<PageReply>, Unreachable>,
    },
}

/// The coordinator's state. Consumed by [`Coordinator::run`].
pub struct Coordinator {
    store: SettingsStore,
    tabs: HashMap<TabId, TabEntry>,
}

/// Handle for talking to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    requests: RequestPort,
    host: mpsc::UnboundedSender<HostEvent>,
}

impl CoordinatorHandle {
    /// A request port stamped with `sender`.
    pub fn port(&self, sender: MessageSender) -> RequestPort {
        self.requests.with_sender(sender)
    }

    /// Report a newly loaded page.
    pub fn page_attached(&self, tab: TabId, address: Option<String>, port: PagePort) {
        self.send_host_event(HostEvent::PageAttached { tab, address, port });
    }

    /// Report a closed tab and wait until its cleanup is committed.
    pub async fn tab_closed(&self, tab: TabId) {
        let (done, committed) = oneshot::channel();
        self.send_host_event(HostEvent::TabClosed {
            tab,
            done: Some(done),
        });
        if committed.await.is_err() {
            warn!("Coordinator stopped before tab {} cleanup was confirmed", tab);
        }
    }

    fn send_host_event(&self, event: HostEvent) {
        if self.host.send(event).is_err() {
            warn!("Coordinator is not running; host event dropped");
        }
    }
}

/// Start a coordinator task owning `store`.
pub fn spawn(store: SettingsStore, timeout: Duration) -> (CoordinatorHandle, JoinHandle<()>) {
    let (requests, inbox) = channel(timeout);
    let (host, host_events) = mpsc::unbounded_channel();

    let coordinator = Coordinator::new(store);
    let task = tokio::spawn(coordinator.run(inbox, host_events));

    (CoordinatorHandle { requests, host }, task)
}

impl Coordinator {
    pub fn new(store: SettingsStore) -> Self {
        Self {
            store,
            tabs: HashMap::new(),
        }
    }

    /// Process requests, host events and store changes until the host goes
    /// away.
    pub async fn run(
        mut self,
        mut requests: Inbox<Request, Response>,
        mut host_events: mpsc::UnboundedReceiver<HostEvent>,
    ) {
        let mut changes = self.store.subscribe();
        info!("Coordinator ready");

        loop {
            tokio::select! {
                biased;

                event = host_events.recv() => match event {
                    Some(event) => self.handle_host_event(event),
                    None => {
                        debug!("Host channel closed");
                        break;
                    }
                },

                change = changes.recv() => match change {
                    Ok(change) => self.fan_out(change),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} settings changes; pages will converge on reload", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                Some(envelope) = requests.recv() => self.dispatch(envelope),
            }
        }

        self.store.close();
        info!("Coordinator stopped");
    }

    fn dispatch(&mut self, envelope: Envelope<Request, Response>) {
        let Envelope {
            id,
            sender,
            message,
            responder,
        } = envelope;
        trace!("Request {} {} from {:?}", id, message.name(), sender);

        let dispatch = match message {
            Request::GetSettings { key } => Dispatch::Ready(self.handle_get_settings(&key)),
            Request::UpdateSettings {
                key,
                tab_id,
                settings,
            } => self.handle_update_settings(key, tab_id, &settings),
            Request::ResetSettings { key, tab_id } => self.handle_reset_settings(&key, tab_id),
            Request::RequestInitialSettings {} => {
                Dispatch::Ready(self.handle_request_initial_settings(&sender))
            }
        };

        match dispatch {
            Dispatch::Ready(response) => responder.respond(response),
            Dispatch::AfterPush {
                tab,
                purpose,
                settings,
                push,
            } => {
                tokio::spawn(async move {
                    let outcome = match push {
                        Ok(pending) => pending.delivered().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = &outcome {
                        warn!("Settings push to tab {} not delivered: {}", tab, e);
                    }

                    let response = match purpose {
                        PushPurpose::Update => Response::Update(match outcome {
                            Ok(_) => UpdateOutcome::ok(),
                            Err(e) => UpdateOutcome::with_warning(format!(
                                "Settings saved, but tab {} was not updated live: {}",
                                tab, e
                            )),
                        }),
                        PushPurpose::Reset => Response::settings(settings),
                    };
                    responder.respond(response);
                });
            }
        }
    }

    /// GET_SETTINGS.
    pub fn handle_get_settings(&self, key: &SiteKey) -> Response {
        Response::settings(self.store.get(key))
    }

    /// UPDATE_SETTINGS: persist, then push to the tab.
    fn handle_update_settings(&mut self, key: SiteKey, tab: TabId, raw: &RawSettings) -> Dispatch {
        let settings = match self.store.put(key.clone(), raw) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to save settings for {}: {}", key, e);
                return Dispatch::Ready(Response::Update(UpdateOutcome::failed(e.to_string())));
            }
        };

        info!("Updated settings for {} (tab {})", key, tab);
        self.bind_tab(tab, &key);
        Dispatch::AfterPush {
            tab,
            purpose: PushPurpose::Update,
            settings,
            push: self.push_settings(tab, settings),
        }
    }

    /// RESET_SETTINGS: forget the site, push defaults to the tab.
    ///
    /// If the removal cannot be persisted nothing is pushed and the caller
    /// gets `{success: false, error}`; the stored settings stay in force.
    fn handle_reset_settings(&mut self, key: &SiteKey, tab: TabId) -> Dispatch {
        let defaults = match self.store.remove(key) {
            Ok(defaults) => defaults,
            Err(e) => {
                error!("Failed to remove settings for {}: {}", key, e);
                return Dispatch::Ready(Response::Update(UpdateOutcome::failed(e.to_string())));
            }
        };

        info!("Reset settings for {} (tab {})", key, tab);
        self.bind_tab(tab, key);
        Dispatch::AfterPush {
            tab,
            purpose: PushPurpose::Reset,
            settings: defaults,
            push: self.push_settings(tab, defaults),
        }
    }

    /// REQUEST_INITIAL_SETTINGS: resolve the sender's key and answer with
    /// its current settings.
    pub fn handle_request_initial_settings(&mut self, sender: &MessageSender) -> Response {
        let address = sender.address.as_deref();

        let Some(tab) = sender.tab else {
            let settings = address
                .and_then(resolve)
                .map(|key| self.store.get(&key))
                .unwrap_or_default();
            return Response::settings(settings);
        };

        let key = resolve_or_synthetic(address, tab);
        let settings = self.store.get(&key);
        debug!("Initial settings for tab {} ({})", tab, key);

        // Only attached pages are tracked; a bare sender must not leave an entry.
        if let Some(entry) = self.tabs.get_mut(&tab) {
            entry.key = Some(key);
            entry.applied = Some(settings);
        }
        Response::settings(settings)
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::PageAttached { tab, address, port } => {
                let key = resolve_or_synthetic(address.as_deref(), tab);
                debug!("Page attached in tab {} ({})", tab, key);

                let entry = self.tabs.entry(tab).or_default();
                entry.port = Some(port);
                entry.key = Some(key);
                entry.applied = None;
            }
            HostEvent::TabClosed { tab, done } => {
                self.handle_tab_closed(tab);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Forget the tab and drop its synthetic settings entry.
    pub fn handle_tab_closed(&mut self, tab: TabId) {
        self.tabs.remove(&tab);

        let key = SiteKey::synthetic(tab);
        if self.store.contains(&key) {
            match self.store.remove(&key) {
                Ok(_) => info!("Dropped per-tab settings {} after tab closed", key),
                Err(e) => error!("Failed to drop per-tab settings {}: {}", key, e),
            }
        }
        debug!("Tab {} closed", tab);
    }

    /// Push a store change to every other live tab showing the same site.
    fn fan_out(&mut self, change: SettingsChange) {
        let settings = change.settings();
        let mut pending = Vec::new();

        for (tab, entry) in self.tabs.iter_mut() {
            if entry.key.as_ref() != Some(change.key()) || entry.applied == Some(settings) {
                continue;
            }
            let Some(port) = entry.port.as_ref() else {
                continue;
            };

            match port.send(PageMessage::SettingsUpdated { settings }) {
                Ok(reply) => {
                    entry.applied = Some(settings);
                    pending.push((*tab, reply));
                }
                Err(e) => {
                    debug!("Tab {} is gone ({}), dropping its port", tab, e);
                    entry.port = None;
                }
            }
        }

        if pending.is_empty() {
            return;
        }

        debug!("Fanning out {} settings to {} tabs", change.key(), pending.len());
        tokio::spawn(async move {
            let results = join_all(
                pending
                    .into_iter()
                    .map(|(tab, reply)| async move { (tab, reply.delivered().await) }),
            )
            .await;

            for (tab, outcome) in results {
                if let Err(e) = outcome {
                    warn!("Same-site push to tab {} not delivered: {}", tab, e);
                }
            }
        });
    }

    /// Enqueue a SETTINGS_UPDATED push to `tab`.
    fn push_settings(
        &mut self,
        tab: TabId,
        settings: CompressorSettings,
    ) -> Result<PendingReply<PageReply>, Unreachable> {
        let Some(entry) = self.tabs.get_mut(&tab) else {
            return Err(Unreachable::NoListener);
        };
        let Some(port) = entry.port.as_ref() else {
            return Err(Unreachable::NoListener);
        };

        match port.send(PageMessage::SettingsUpdated { settings }) {
            Ok(reply) => {
                entry.applied = Some(settings);
                Ok(reply)
            }
            Err(e) => {
                entry.port = None;
                Err(e)
            }
        }
    }

    /// Record which site a live tab is showing.
    fn bind_tab(&mut self, tab: TabId, key: &SiteKey) {
        if let Some(entry) = self.tabs.get_mut(&tab) {
            if entry.key.as_ref() != Some(key) {
                debug!("Tab {} now bound to {}", tab, key);
                entry.key = Some(key.clone());
            }
        }
    }
}
