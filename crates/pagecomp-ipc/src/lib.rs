// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared IPC types for PageComp.
//!
//! This crate defines the settings model, site keys and the message protocol
//! spoken between the background coordinator, per-page content contexts and
//! the UI panel, plus the in-process request/response transport they use.

pub mod protocol;
pub mod settings;
pub mod site_key;
pub mod transport;

pub use protocol::{
    MessageSender, MeterUpdate, PageMessage, PageReply, Request, Response, UpdateOutcome,
};
pub use settings::{CompressorSettings, RawSettings};
pub use site_key::{resolve, resolve_or_synthetic, SiteKey, TabId};
pub use transport::{
    channel, Delivered, Envelope, Inbox, PendingReply, Port, PushOutcome, Responder,
    Unreachable, DEFAULT_MESSAGE_TIMEOUT,
};

/// Port into the background coordinator.
pub type RequestPort = Port<Request, Response>;

/// Port into a page's content context.
pub type PagePort = Port<PageMessage, PageReply>;
