// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PageComp page and panel side.
//!
//! Per-page compressor graphs driven by coordinator pushes, the level
//! metering relay, the UI panel controller and an in-process host that
//! wires them to the background coordinator.

pub mod audio;
pub mod client;
pub mod dom;
pub mod host;
pub mod page;
pub mod panel;
pub mod relay;

pub use client::{ClientError, CoordinatorClient};
pub use dom::{DomEvent, ElementId};
pub use host::{Host, HostOptions};
pub use page::{PageHandle, PageRuntime};
pub use panel::Panel;
pub use relay::MeterRelay;
