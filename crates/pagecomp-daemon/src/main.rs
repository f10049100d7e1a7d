// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PageComp Daemon - settings coordinator with a JSON-lines bridge.
//!
//! Runs the coordinator over the on-disk settings document and answers one
//! request per stdin line with one response per stdout line (see
//! [`bridge`]). Logs go to stderr.

use pagecomp_daemon::{bridge, config, service, JsonFileStore, SettingsStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration before logging so the filter can come from it
    let config_manager = config::ConfigManager::new()?;
    let daemon_config = config_manager.load_config().unwrap_or_default();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&daemon_config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("PageComp Daemon starting...");

    let storage_dir = config_manager.storage_dir(&daemon_config);
    let store = SettingsStore::open(JsonFileStore::new(&storage_dir)?)?;
    info!("Settings document in {:?}", storage_dir);

    let (coordinator, coordinator_task) =
        service::spawn(store, daemon_config.messaging_timeout());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    info!("PageComp Daemon ready");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed, shutting down...");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read request: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = bridge::handle_line(&coordinator, &line).await;
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
        }
    }

    // Dropping the last handle stops the coordinator loop
    drop(coordinator);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), coordinator_task).await;

    info!("PageComp Daemon stopped");
    Ok(())
}
