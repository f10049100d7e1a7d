// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Site keys and the rules that derive them from page addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;
use url::Url;

/// Schemes whose pages are keyed by hostname.
const NETWORK_SCHEMES: &[&str] = &["http", "https", "ws", "wss", "ftp"];

/// Prefix of keys synthesized for tabs without a stable address.
const SYNTHETIC_PREFIX: &str = "tab-";

/// Browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key that scopes stored settings: a hostname, a full `file:` address,
/// or `tab-<id>` for pages with no stable address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteKey(String);

impl SiteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Per-tab fallback key.
    pub fn synthetic(tab: TabId) -> Self {
        Self(format!("{}{}", SYNTHETIC_PREFIX, tab.0))
    }

    /// The tab this key was synthesized for, if it is a synthetic key.
    pub fn synthetic_tab(&self) -> Option<TabId> {
        self.0
            .strip_prefix(SYNTHETIC_PREFIX)
            .and_then(|id| id.parse().ok())
            .map(TabId)
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic_tab().is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SiteKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Derive the site key for a page address.
///
/// Network pages map to their hostname, local files to the full address.
/// Internal and blank pages have no stable key and yield `None`.
pub fn resolve(address: &str) -> Option<SiteKey> {
    let parsed = match Url::parse(address) {
        Ok(url) => url,
        Err(e) => {
            trace!("Unparsable page address {:?}: {}", address, e);
            return None;
        }
    };

    match parsed.scheme() {
        scheme if NETWORK_SCHEMES.contains(&scheme) => parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .map(|host| SiteKey::new(host.to_ascii_lowercase())),
        "file" => Some(SiteKey::new(address)),
        _ => None,
    }
}

/// Derive the site key for a tab, falling back to the tab's synthetic key.
pub fn resolve_or_synthetic(address: Option<&str>, tab: TabId) -> SiteKey {
    address
        .and_then(resolve)
        .unwrap_or_else(|| SiteKey::synthetic(tab))
}
