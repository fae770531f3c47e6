// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use exchange_client_rs::{
    cfg::{cli::resolve_config_path, config::ExchangeClientConfig, logger::init_logger},
    client::{
        facade::ExchangeClient,
        memory_accountant::{NoopMemoryListener, SystemMemoryUsageListener},
    },
    models::location::Location,
};
use tracing::info;

/// Drains one exchange client to completion, mirroring the teacher's
/// login/keepalive/logout demo loop: wire everything up, run it, report a
/// summary.
#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml")?;

    let cfg = resolve_config_path("config/exchange.yaml")
        .and_then(ExchangeClientConfig::load_from_file)
        .context("failed to resolve or load exchange client config")?;

    let locations: Vec<Location> = std::env::args()
        .skip(1)
        .map(Location::from)
        .collect();
    if locations.is_empty() {
        info!("no shuffle source URLs given on the command line; exiting with an empty run");
    }

    let http_client = reqwest::Client::new();
    let memory_listener: Arc<dyn SystemMemoryUsageListener> = Arc::new(NoopMemoryListener);
    let executor = tokio::runtime::Handle::current();

    let client = ExchangeClient::new(&cfg, http_client, memory_listener, executor);

    for location in locations {
        client.add_location(location).context("add_location failed")?;
    }
    client.no_more_locations();

    let poll_timeout = cfg.runtime.poll_timeout;
    let mut pages = 0u64;
    let mut bytes = 0u64;
    loop {
        match client.get_next_page(poll_timeout).await {
            Ok(Some(page)) => {
                pages += 1;
                bytes += page.retained_size_in_bytes;
            }
            Ok(None) => {
                if client.is_finished().unwrap_or(false) {
                    break;
                }
                // Timed out without a page and without being finished yet;
                // keep polling (spec §4.6 `get_next_page` boundary behavior).
            }
            Err(err) => {
                client.close();
                return Err(err.into());
            }
        }
    }

    let status = client.status();
    info!(
        pages,
        bytes,
        average_bytes_per_request = status.average_bytes_per_request,
        "exchange drained"
    );
    client.close();
    Ok(())
}
