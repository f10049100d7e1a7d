// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audio subsystem - per-page compressor graph and metering.

pub mod graph;
pub mod meter;
pub mod platform;

#[cfg(test)]
pub(crate) mod mock;

pub use graph::{AudioGraphManager, GraphPhase, MediaNodeChain};
pub use meter::PageMetrics;
pub use platform::{AudioError, AudioPipeline, AudioPlatform, CompressorParams, NodeId};
