// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Recording audio platform for tests.
//!
//! Every node and connection is mirrored into a shared [`MockGraph`] so tests
//! can inspect wiring after the platform has been handed to a manager.

use crate::audio::platform::{AudioError, AudioPipeline, AudioPlatform, CompressorParams, NodeId};
use crate::dom::ElementId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockNode {
    Destination,
    Source(ElementId),
    Compressor,
    Gain,
    Analyser,
}

#[derive(Debug, Default)]
pub struct MockGraph {
    pub pipelines_created: usize,
    /// Pipeline creations still to refuse.
    pub deny_pipelines: usize,
    pub nodes: HashMap<NodeId, MockNode>,
    pub connections: BTreeSet<(NodeId, NodeId)>,
    pub sourced_elements: HashSet<ElementId>,
    pub compressor_params: Option<CompressorParams>,
    pub compressor_writes: usize,
    pub gain: Option<f32>,
    pub reduction_db: f32,
    pub frame: Vec<u8>,
}

impl MockGraph {
    pub fn node_of(&self, kind: MockNode) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
    }

    pub fn source_of(&self, element: ElementId) -> Option<NodeId> {
        self.node_of(MockNode::Source(element))
    }

    /// Outgoing connections of `node`.
    pub fn outputs(&self, node: NodeId) -> Vec<NodeId> {
        self.connections
            .iter()
            .filter(|(from, _)| *from == node)
            .map(|(_, to)| *to)
            .collect()
    }

    pub fn count_nodes(&self, kind: MockNode) -> usize {
        self.nodes.values().filter(|k| **k == kind).count()
    }
}

pub type SharedMockGraph = Arc<Mutex<MockGraph>>;

pub struct MockPlatform {
    graph: SharedMockGraph,
}

impl MockPlatform {
    pub fn new() -> (Self, SharedMockGraph) {
        let graph = SharedMockGraph::default();
        graph.lock().frame = vec![128; 64];
        (
            Self {
                graph: graph.clone(),
            },
            graph,
        )
    }
}

impl AudioPlatform for MockPlatform {
    fn create_pipeline(&mut self) -> Result<Box<dyn AudioPipeline>, AudioError> {
        let mut graph = self.graph.lock();
        if graph.deny_pipelines > 0 {
            graph.deny_pipelines -= 1;
            return Err(AudioError::CapabilityUnavailable(
                "no user activation".to_string(),
            ));
        }
        graph.pipelines_created += 1;

        let destination = NodeId(0);
        graph.nodes.insert(destination, MockNode::Destination);
        Ok(Box::new(MockPipeline {
            graph: self.graph.clone(),
            destination,
            next_id: 1,
        }))
    }
}

struct MockPipeline {
    graph: SharedMockGraph,
    destination: NodeId,
    next_id: u32,
}

impl MockPipeline {
    fn add(&mut self, kind: MockNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.graph.lock().nodes.insert(id, kind);
        id
    }
}

impl AudioPipeline for MockPipeline {
    fn destination(&self) -> NodeId {
        self.destination
    }

    fn create_media_source(&mut self, element: ElementId) -> Result<NodeId, AudioError> {
        if !self.graph.lock().sourced_elements.insert(element) {
            return Err(AudioError::NodeFailed(format!(
                "{} already has a source node",
                element
            )));
        }
        Ok(self.add(MockNode::Source(element)))
    }

    fn create_compressor(&mut self) -> Result<NodeId, AudioError> {
        Ok(self.add(MockNode::Compressor))
    }

    fn create_gain(&mut self) -> Result<NodeId, AudioError> {
        Ok(self.add(MockNode::Gain))
    }

    fn create_analyser(&mut self) -> Result<NodeId, AudioError> {
        Ok(self.add(MockNode::Analyser))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), AudioError> {
        let mut graph = self.graph.lock();
        if !graph.nodes.contains_key(&from) || !graph.nodes.contains_key(&to) {
            return Err(AudioError::NodeFailed(format!(
                "unknown node in {:?} -> {:?}",
                from, to
            )));
        }
        graph.connections.insert((from, to));
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) {
        self.graph.lock().connections.retain(|(from, _)| *from != node);
    }

    fn set_compressor_params(&mut self, _compressor: NodeId, params: &CompressorParams) {
        let mut graph = self.graph.lock();
        graph.compressor_params = Some(*params);
        graph.compressor_writes += 1;
    }

    fn set_gain(&mut self, _gain: NodeId, value: f32) {
        self.graph.lock().gain = Some(value);
    }

    fn reduction_db(&self, _compressor: NodeId) -> f32 {
        self.graph.lock().reduction_db
    }

    fn read_time_domain(&self, _analyser: NodeId, out: &mut [u8]) -> usize {
        let graph = self.graph.lock();
        let n = graph.frame.len().min(out.len());
        out[..n].copy_from_slice(&graph.frame[..n]);
        n
    }
}
