#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared fixtures for pokekit integration tests

use httpmock::prelude::*;
use pokekit::{Poke, PokeConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const API: &str = "/api/v2";

pub fn config(server: &MockServer) -> PokeConfig {
    PokeConfig::for_testing(server.url(API))
}

pub fn poke(server: &MockServer) -> Poke {
    Poke::from_config(config(server)).unwrap()
}

pub fn reference(server: &MockServer, name: &str, path: &str) -> Value {
    json!({"name": name, "url": server.url(format!("{API}/{path}/"))})
}

/// Mock one page of `/api/v2/{endpoint}` with `total` generated items.
pub fn mock_list_page<'a>(
    server: &'a MockServer,
    endpoint: &str,
    total: u64,
    limit: u64,
    offset: u64,
) -> httpmock::Mock<'a> {
    let end = (offset + limit).min(total);
    let results: Vec<Value> = (offset..end)
        .map(|i| reference(server, &format!("{endpoint}-{}", i + 1), &format!("{endpoint}/{}", i + 1)))
        .collect();
    let page_url = |offset: u64| {
        server.url(format!("{API}/{endpoint}?offset={offset}&limit={limit}"))
    };
    let next = (end < total).then(|| page_url(end));
    let previous = (offset > 0).then(|| page_url(offset.saturating_sub(limit)));
    let body = json!({"count": total, "next": next, "previous": previous, "results": results});

    let path = format!("{API}/{endpoint}");
    server.mock(move |when, then| {
        when.method(GET)
            .path(path)
            .query_param("limit", limit.to_string())
            .query_param("offset", offset.to_string());
        then.status(200).json_body(body);
    })
}

/// Response headers promising 100 bytes followed by only part of the body.
pub const PARTIAL_REPLY: &str =
    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"id\":";

pub const COMPLETE_REPLY: &str =
    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 9\r\n\r\n{\"id\":25}";

/// Raw TCP server for wire-level failures httpmock cannot produce.
///
/// The n-th connection gets `replies[n]` (the last one repeats) and is held
/// open for its delay. Returns the API base URL and a connection counter.
pub async fn raw_server(replies: Vec<(&'static str, Duration)>) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}{API}", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let (reply, hold) = replies[n.min(replies.len() - 1)];
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                if socket.read(&mut buf).await.is_err()
                    || socket.write_all(reply.as_bytes()).await.is_err()
                {
                    return;
                }
                tokio::time::sleep(hold).await;
            });
        }
    });

    (base, connections)
}
