// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use exchange_client_rs::{
    client::{
        facade::ExchangeClient,
        memory_accountant::{CountingMemoryListener, NoopMemoryListener, SystemMemoryUsageListener},
    },
    models::location::Location,
};

use super::common::{encode_frame, serve_connection_refused, serve_once, test_config};

/// End-to-end scenario 1 (spec §8 "Happy path"), run over a real HTTP
/// round-trip against a one-shot mock server rather than a stub sub-client.
#[tokio::test]
async fn single_endpoint_delivers_one_page_end_to_end() {
    let body = encode_frame(30, 40, b"hello");
    let url = serve_once(body, true).await;

    let listener = Arc::new(CountingMemoryListener::new());
    let client = ExchangeClient::new(
        &test_config(),
        reqwest::Client::new(),
        listener.clone() as Arc<dyn SystemMemoryUsageListener>,
        tokio::runtime::Handle::current(),
    );
    client
        .add_location(Location::new(url))
        .expect("add_location succeeds");
    client.no_more_locations();

    let page = client
        .get_next_page(Duration::from_secs(5))
        .await
        .expect("get_next_page succeeds")
        .expect("page delivered");
    assert_eq!(page.retained_size_in_bytes, 40);
    assert_eq!(page.payload.as_ref(), b"hello");

    let drained = client
        .get_next_page(Duration::from_secs(5))
        .await
        .expect("get_next_page succeeds");
    assert!(drained.is_none());
    assert!(client.is_finished().expect("is_finished succeeds"));
    assert_eq!(listener.total(), 0);

    client.close();
}

/// Two independent endpoints, each delivering one page; no ordering is
/// guaranteed across sources (spec §5 Ordering guarantees), only that both
/// pages eventually arrive and the client reaches `is_finished`.
#[tokio::test]
async fn two_endpoints_each_deliver_one_page() {
    let url_a = serve_once(encode_frame(10, 15, b"a"), true).await;
    let url_b = serve_once(encode_frame(20, 25, b"b"), true).await;

    let client = ExchangeClient::new(
        &test_config(),
        reqwest::Client::new(),
        Arc::new(NoopMemoryListener) as Arc<dyn SystemMemoryUsageListener>,
        tokio::runtime::Handle::current(),
    );
    client.add_location(Location::new(url_a)).expect("add a");
    client.add_location(Location::new(url_b)).expect("add b");
    client.no_more_locations();

    let mut pages = 0;
    let mut total_retained = 0u64;
    loop {
        match client
            .get_next_page(Duration::from_secs(5))
            .await
            .expect("get_next_page succeeds")
        {
            Some(page) => {
                pages += 1;
                total_retained += page.retained_size_in_bytes;
            }
            None => {
                if client.is_finished().expect("is_finished succeeds") {
                    break;
                }
            }
        }
    }
    assert_eq!(pages, 2);
    assert_eq!(total_retained, 40);
    client.close();
}

/// A sub-client that never gets a response escalates via `client_failed`
/// after exhausting its retry envelope, and the failure surfaces on the next
/// poll (spec §7 Error handling design).
#[tokio::test]
async fn unreachable_endpoint_surfaces_transport_failure() {
    let url = serve_connection_refused().await;

    let client = ExchangeClient::new(
        &test_config(),
        reqwest::Client::new(),
        Arc::new(NoopMemoryListener) as Arc<dyn SystemMemoryUsageListener>,
        tokio::runtime::Handle::current(),
    );
    client.add_location(Location::new(url)).expect("add_location");
    client.no_more_locations();

    // `get_next_page` only rechecks `failure` once its wait completes (spec
    // §4.7), so give the retry envelope (2 retries, <=~65ms backoff each)
    // room to exhaust without making the test slow.
    let result = client.get_next_page(Duration::from_millis(500)).await;
    assert!(result.is_err(), "expected the transport failure to surface");
    assert!(client.poll_page().is_err());
}
