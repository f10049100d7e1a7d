// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Document events the page runtime reacts to.
//!
//! The host's initial scan and mutation observer report media elements;
//! element identity is stable for the lifetime of the element instance.

use std::fmt;

/// Identity of one media element instance in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media#{}", self.0)
    }
}

/// Something happened in the page's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    /// Found by the initial scan or added to the document later.
    MediaAdded(ElementId),
    /// Removed from the document.
    MediaRemoved(ElementId),
    /// Playback failed.
    MediaError(ElementId),
    /// Started playing. Counts as a user gesture.
    MediaPlay(ElementId),
    /// Paused or ended.
    MediaPause(ElementId),
    /// A click or key press anywhere in the page.
    UserGesture,
}
