// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-page audio graph lifecycle.
//!
//! # Topology
//!
//! ```text
//! enabled:   [source] → [compressor] → [gain] → [analyser] → [destination]
//! disabled:  [source] ─────────────────────────────────────→ [destination]
//! ```
//!
//! The compressor → gain → analyser → destination chain is shared by every
//! element on the page and wired once. Only each element's source is
//! re-pointed on enable/disable, and it is always fully disconnected first so
//! an element never plays through both paths.
//!
//! The pipeline cannot exist before the page sees a user gesture, so the
//! manager is a small state machine: elements found while waiting are
//! queued and attached on activation.

use crate::audio::meter::{level_db, reduction_db, rms_from_bytes, PageMetrics};
use crate::audio::platform::{
    AudioError, AudioPipeline, AudioPlatform, CompressorParams, NodeId, ANALYSER_FRAME_LEN,
};
use crate::dom::ElementId;
use pagecomp_ipc::CompressorSettings;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, trace, warn};

/// Node handles for one attached media element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaNodeChain {
    pub source: NodeId,
    pub compressor: NodeId,
    pub gain: NodeId,
    pub analyser: NodeId,
    pub connected_through_compressor: bool,
}

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphPhase {
    Uninitialized,
    AwaitingGesture,
    Active,
}

struct SharedChain {
    pipeline: Box<dyn AudioPipeline>,
    compressor: NodeId,
    gain: NodeId,
    analyser: NodeId,
}

enum PipelineState {
    Uninitialized,
    AwaitingGesture,
    Active(SharedChain),
}

/// Owns a page's pipeline and the element → chain table.
pub struct AudioGraphManager {
    platform: Box<dyn AudioPlatform>,
    state: PipelineState,
    settings: CompressorSettings,
    /// Discovered before activation, in discovery order.
    queued: Vec<ElementId>,
    chains: HashMap<ElementId, MediaNodeChain>,
    /// Elements that must never be attached again.
    detached: HashSet<ElementId>,
    playing: HashSet<ElementId>,
    frame: Vec<u8>,
}

impl AudioGraphManager {
    pub fn new(platform: Box<dyn AudioPlatform>) -> Self {
        Self {
            platform,
            state: PipelineState::Uninitialized,
            settings: CompressorSettings::default(),
            queued: Vec::new(),
            chains: HashMap::new(),
            detached: HashSet::new(),
            playing: HashSet::new(),
            frame: vec![0; ANALYSER_FRAME_LEN],
        }
    }

    pub fn phase(&self) -> GraphPhase {
        match self.state {
            PipelineState::Uninitialized => GraphPhase::Uninitialized,
            PipelineState::AwaitingGesture => GraphPhase::AwaitingGesture,
            PipelineState::Active(_) => GraphPhase::Active,
        }
    }

    pub fn settings(&self) -> CompressorSettings {
        self.settings
    }

    pub fn chain(&self, element: ElementId) -> Option<&MediaNodeChain> {
        self.chains.get(&element)
    }

    pub fn attached_count(&self) -> usize {
        self.chains.len()
    }

    pub fn queued(&self) -> &[ElementId] {
        &self.queued
    }

    pub fn is_detached(&self, element: ElementId) -> bool {
        self.detached.contains(&element)
    }

    /// A media element was found in the document.
    pub fn discover(&mut self, element: ElementId) {
        if self.detached.contains(&element) {
            debug!("Ignoring {}: permanently detached", element);
            return;
        }
        if self.chains.contains_key(&element) || self.queued.contains(&element) {
            return;
        }

        match self.state {
            PipelineState::Uninitialized => {
                self.state = PipelineState::AwaitingGesture;
                self.queued.push(element);
                debug!("Queued {} until a user gesture", element);
            }
            PipelineState::AwaitingGesture => {
                self.queued.push(element);
                debug!("Queued {} until a user gesture", element);
            }
            PipelineState::Active(_) => self.attach(element),
        }
    }

    /// The user interacted with the page; try to bring the pipeline up.
    pub fn on_gesture(&mut self) {
        if matches!(self.state, PipelineState::Active(_)) {
            return;
        }

        match self.build_shared_chain() {
            Ok(shared) => {
                info!("Audio pipeline active");
                self.state = PipelineState::Active(shared);
                self.apply_params();

                for element in std::mem::take(&mut self.queued) {
                    self.attach(element);
                }
            }
            Err(e) => {
                warn!("Audio pipeline not available yet: {}", e);
                self.state = PipelineState::AwaitingGesture;
            }
        }
    }

    /// An element started playing; this is also a gesture, even when the
    /// element itself is detached.
    pub fn on_play(&mut self, element: ElementId) {
        if !self.detached.contains(&element) {
            self.discover(element);
            self.playing.insert(element);
        }
        self.on_gesture();
    }

    pub fn on_pause(&mut self, element: ElementId) {
        self.playing.remove(&element);
    }

    /// The element left the document or failed; release it for good.
    pub fn detach(&mut self, element: ElementId) {
        self.playing.remove(&element);
        self.queued.retain(|queued| *queued != element);

        if let Some(chain) = self.chains.remove(&element) {
            if let PipelineState::Active(shared) = &mut self.state {
                shared.pipeline.disconnect(chain.source);
            }
            debug!("Detached {}", element);
        }
        self.detached.insert(element);
    }

    /// Apply new settings to the live graph without rebuilding it.
    pub fn set_settings(&mut self, settings: CompressorSettings) {
        let settings = settings.clamped();
        let toggled = settings.enabled != self.settings.enabled;
        self.settings = settings;

        if !matches!(self.state, PipelineState::Active(_)) {
            trace!("Settings stored; pipeline not active yet");
            return;
        }

        self.apply_params();
        if toggled {
            info!(
                "Compression {}",
                if settings.enabled { "enabled" } else { "bypassed" }
            );
        }
        self.rewire_all();
    }

    /// Sample level and reduction across playing elements.
    ///
    /// Returns `None` when nothing is playing.
    pub fn sample_metrics(&mut self) -> Option<PageMetrics> {
        let PipelineState::Active(shared) = &self.state else {
            return None;
        };

        let mut metrics: Option<PageMetrics> = None;
        for element in &self.playing {
            let Some(chain) = self.chains.get(element) else {
                continue;
            };

            let written = shared.pipeline.read_time_domain(chain.analyser, &mut self.frame);
            let reading = PageMetrics {
                peak_level_db: level_db(rms_from_bytes(&self.frame[..written])),
                max_reduction_db: reduction_db(shared.pipeline.reduction_db(chain.compressor)),
            };
            metrics = Some(match metrics {
                Some(current) => current.max(reading),
                None => reading,
            });
        }
        metrics
    }

    fn build_shared_chain(&mut self) -> Result<SharedChain, AudioError> {
        let mut pipeline = self.platform.create_pipeline()?;
        let compressor = pipeline.create_compressor()?;
        let gain = pipeline.create_gain()?;
        let analyser = pipeline.create_analyser()?;

        pipeline.connect(compressor, gain)?;
        pipeline.connect(gain, analyser)?;
        let destination = pipeline.destination();
        pipeline.connect(analyser, destination)?;

        Ok(SharedChain {
            pipeline,
            compressor,
            gain,
            analyser,
        })
    }

    fn attach(&mut self, element: ElementId) {
        let PipelineState::Active(shared) = &mut self.state else {
            return;
        };

        let source = match shared.pipeline.create_media_source(element) {
            Ok(source) => source,
            Err(e) => {
                warn!("Cannot attach {}: {}", element, e);
                self.detached.insert(element);
                self.playing.remove(&element);
                return;
            }
        };

        let mut chain = MediaNodeChain {
            source,
            compressor: shared.compressor,
            gain: shared.gain,
            analyser: shared.analyser,
            connected_through_compressor: false,
        };
        if let Err(e) = wire(shared.pipeline.as_mut(), &mut chain, self.settings.enabled) {
            warn!("Failed to wire {}: {}", element, e);
        }

        debug!(
            "Attached {} ({})",
            element,
            if chain.connected_through_compressor { "compressed" } else { "bypass" }
        );
        self.chains.insert(element, chain);
    }

    fn rewire_all(&mut self) {
        let PipelineState::Active(shared) = &mut self.state else {
            return;
        };
        let enabled = self.settings.enabled;

        for (element, chain) in self.chains.iter_mut() {
            if chain.connected_through_compressor == enabled {
                continue;
            }
            if let Err(e) = wire(shared.pipeline.as_mut(), chain, enabled) {
                warn!("Failed to rewire {}: {}", element, e);
            }
        }
    }

    fn apply_params(&mut self) {
        let PipelineState::Active(shared) = &mut self.state else {
            return;
        };
        let s = &self.settings;

        let params = CompressorParams {
            threshold_db: s.threshold_db,
            ratio: s.ratio,
            attack_secs: s.attack_secs(),
            release_secs: s.release_secs(),
        };
        shared.pipeline.set_compressor_params(shared.compressor, &params);
        shared.pipeline.set_gain(shared.gain, s.output_gain_linear());
        trace!("Applied compressor params {:?}, gain {:.1} dB", params, s.output_gain_db);
    }
}

/// Point an element's source at the compressor or straight at the output.
fn wire(
    pipeline: &mut dyn AudioPipeline,
    chain: &mut MediaNodeChain,
    through_compressor: bool,
) -> Result<(), AudioError> {
    pipeline.disconnect(chain.source);
    chain.connected_through_compressor = false;

    let target = if through_compressor {
        chain.compressor
    } else {
        pipeline.destination()
    };
    pipeline.connect(chain.source, target)?;
    chain.connected_through_compressor = through_compressor;
    Ok(())
}
