// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! JSON-lines bridge: one request object in, one response object out.

use crate::service::CoordinatorHandle;
use pagecomp_ipc::{MessageSender, Request, TabId, UpdateOutcome};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Bridge-only line telling the coordinator a tab is gone.
pub const TAB_CLOSED: &str = "TAB_CLOSED";

/// Answer one bridge line.
///
/// Optional `tabId`/`address` fields stand in for the sender identity a
/// browser would attach to REQUEST_INITIAL_SETTINGS. A `TAB_CLOSED` line
/// with a `tabId` runs the same cleanup as a closed browser tab.
pub async fn handle_line(coordinator: &CoordinatorHandle, line: &str) -> String {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Malformed bridge line: {}", e);
            return failure(format!("malformed JSON: {}", e));
        }
    };

    let tab = value
        .get("tabId")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .map(TabId);

    if value.get("type").and_then(Value::as_str) == Some(TAB_CLOSED) {
        let Some(tab) = tab else {
            return failure("TAB_CLOSED needs a tabId".to_string());
        };
        info!("Bridge reported tab {} closed", tab);
        coordinator.tab_closed(tab).await;
        return encode(&UpdateOutcome::ok());
    }

    let sender = MessageSender {
        tab,
        address: value.get("address").and_then(Value::as_str).map(str::to_string),
    };

    let request: Request = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            warn!("Unknown bridge request: {}", e);
            return failure(format!("invalid request: {}", e));
        }
    };
    debug!("Bridge request {}", request.name());

    match coordinator.port(sender).request(request).await {
        Ok(response) => encode(&response),
        Err(e) => failure(format!("coordinator unavailable: {}", e)),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| failure(format!("failed to encode response: {}", e)))
}

fn failure(message: String) -> String {
    serde_json::to_string(&UpdateOutcome::failed(message))
        .unwrap_or_else(|_| r#"{"success":false}"#.to_string())
}
