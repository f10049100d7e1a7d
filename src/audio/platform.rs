// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The platform audio capability the graph manager drives.
//!
//! The compressor DSP, media sources and analysers all belong to the host
//! platform; this crate only creates nodes, wires them and sets parameters.
//! Node handles are plain ids owned by the pipeline that issued them.

use crate::dom::ElementId;
use thiserror::Error;

/// Samples in one analyser time-domain frame.
pub const ANALYSER_FRAME_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum AudioError {
    /// No pipeline can exist yet, e.g. before a user gesture.
    #[error("Audio capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("Node operation failed: {0}")]
    NodeFailed(String),
}

/// Handle to a node inside an [`AudioPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Compressor parameters in the units the platform node takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

/// Factory for page-level pipelines.
pub trait AudioPlatform: Send {
    /// Create the page's pipeline. Fails until the platform allows it.
    fn create_pipeline(&mut self) -> Result<Box<dyn AudioPipeline>, AudioError>;
}

/// A live page-level audio graph.
pub trait AudioPipeline: Send {
    /// The speakers.
    fn destination(&self) -> NodeId;

    /// Wrap a media element. The platform allows this once per element.
    fn create_media_source(&mut self, element: ElementId) -> Result<NodeId, AudioError>;

    fn create_compressor(&mut self) -> Result<NodeId, AudioError>;

    fn create_gain(&mut self) -> Result<NodeId, AudioError>;

    fn create_analyser(&mut self) -> Result<NodeId, AudioError>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), AudioError>;

    /// Remove every outgoing connection of `node`.
    fn disconnect(&mut self, node: NodeId);

    fn set_compressor_params(&mut self, compressor: NodeId, params: &CompressorParams);

    /// Linear gain factor.
    fn set_gain(&mut self, gain: NodeId, value: f32);

    /// Current gain reduction as reported by the node (zero or negative dB).
    fn reduction_db(&self, compressor: NodeId) -> f32;

    /// Latest time-domain frame as unsigned bytes centred on 128.
    /// Returns the number of samples written.
    fn read_time_domain(&self, analyser: NodeId, out: &mut [u8]) -> usize;
}
