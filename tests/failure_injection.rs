//! Failure injection tests for the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

mod common;

#[tokio::test]
async fn test_backend_errors_are_relayed_not_retried() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let backend = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                (503, "Service Unavailable".into())
            } else {
                (200, "Success".into())
            }
        }
    })
    .await;

    let proxy = common::start_proxy(common::proxy_config(&[backend])).await;
    let client = common::client();

    let res = client.get(proxy.url("/")).send().await.expect("Proxy unreachable");
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "Service Unavailable");
    assert_eq!(call_count.load(Ordering::SeqCst), 1, "5xx must not be retried");
    assert!(proxy.registry.all()[0].is_healthy());

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_buffered_post_is_replayed_on_connect_failure() {
    let seen = Arc::new(Mutex::new(Vec::<(String, Vec<u8>)>::new()));
    let record = seen.clone();
    let echo = common::start_request_aware_backend(move |head, body| {
        let record = record.clone();
        async move {
            record.lock().unwrap().push((head, body));
            (200, "stored".into())
        }
    })
    .await;

    let proxy = common::start_proxy(common::proxy_config(&[common::refused_addr(), echo])).await;
    let client = common::client();

    let res = client
        .post(proxy.url("/items?id=7"))
        .header("x-trace", "abc")
        .body("{\"name\":\"widget\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (head, body) = &seen[0];
    assert!(head.starts_with("POST /items?id=7 HTTP/1.1"));
    assert_eq!(common::header_value(head, "x-trace"), Some("abc"));
    assert_eq!(common::header_value(head, "x-forwarded-for"), Some("127.0.0.1"));
    assert!(common::header_value(head, "x-request-id").is_some());
    assert_eq!(body, b"{\"name\":\"widget\"}");
}

#[tokio::test]
async fn test_no_retry_budget_returns_bad_gateway() {
    let mut config = common::proxy_config(&[common::refused_addr(), common::refused_addr()]);
    config.retries.max_retries = 0;
    let proxy = common::start_proxy(config).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_health_check_eviction() {
    let b1 = common::start_mock_backend("b1").await;

    let b2_healthy = Arc::new(AtomicBool::new(true));
    let b2h = b2_healthy.clone();
    let b2 = common::start_programmable_backend(move || {
        let b2h = b2h.clone();
        async move {
            if b2h.load(Ordering::SeqCst) {
                (200, "b2".into())
            } else {
                (500, "dead".into())
            }
        }
    })
    .await;

    let mut config = common::proxy_config(&[b1, b2]);
    config.health_check.active_enabled = true;
    config.health_check.interval_secs = 1;
    config.health_check.unhealthy_threshold = 2;
    config.health_check.healthy_threshold = 1;
    config.health_check.cooldown_secs = 0;
    config.retries.max_retries = 0;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let mut b1_hits = 0;
    let mut b2_hits = 0;
    for _ in 0..20 {
        if let Ok(res) = client.get(proxy.url("/")).send().await {
            if let Ok(body) = res.text().await {
                if body == "b1" {
                    b1_hits += 1;
                }
                if body == "b2" {
                    b2_hits += 1;
                }
            }
        }
    }
    assert!(b1_hits > 0, "b1 should have hits (got {})", b1_hits);
    assert!(b2_hits > 0, "b2 should have hits (got {})", b2_hits);

    b2_healthy.store(false, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!proxy.registry.all()[1].is_healthy());

    b1_hits = 0;
    b2_hits = 0;
    for _ in 0..10 {
        if let Ok(res) = client.get(proxy.url("/")).send().await {
            let body = res.text().await.unwrap();
            if body == "b1" {
                b1_hits += 1;
            }
            if body == "dead" {
                b2_hits += 1;
            }
        }
    }
    assert_eq!(b1_hits, 10, "Only b1 should be hit after b2 eviction");
    assert_eq!(b2_hits, 0, "b2 should have 0 hits after eviction");

    b2_healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(proxy.registry.all()[1].is_healthy(), "probe success should restore b2");
}

#[tokio::test]
async fn test_max_connections_limit() {
    let backend = common::start_programmable_backend(move || async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        (200, "slow".into())
    })
    .await;

    let mut config = common::proxy_config(&[backend]);
    config.backends[0].max_connections = 2;
    config.backends[0].queue_depth = 0;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let t1 = tokio::spawn(client.get(proxy.url("/")).send());
    let t2 = tokio::spawn(client.get(proxy.url("/")).send());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let res3 = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(
        res3.status(),
        StatusCode::SERVICE_UNAVAILABLE,
        "Should be rejected when max_connections hit"
    );

    assert_eq!(t1.await.unwrap().unwrap().status(), StatusCode::OK);
    assert_eq!(t2.await.unwrap().unwrap().status(), StatusCode::OK);
    assert!(proxy.registry.all()[0].is_healthy(), "saturation is not a backend fault");
}

#[tokio::test]
async fn test_saturated_requests_wait_in_queue() {
    let backend = common::start_programmable_backend(move || async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        (200, "slow".into())
    })
    .await;

    let mut config = common::proxy_config(&[backend]);
    config.backends[0].max_connections = 1;
    config.backends[0].queue_depth = 1;
    config.timeouts.queue_ms = 2000;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let first = tokio::spawn(client.get(proxy.url("/")).send());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = client.get(proxy.url("/")).send().await.unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(first.await.unwrap().unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reload_replaces_backend_list() {
    let a = common::start_mock_backend("A").await;
    let b = common::start_mock_backend("B").await;
    let proxy = common::start_proxy(common::proxy_config(&[a])).await;
    let client = common::client();

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "A");

    let mut reloaded = common::proxy_config(&[b]);
    proxy.config_updates.send(reloaded.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "B");

    // An invalid list is rejected and the current one kept.
    reloaded.backends.clear();
    proxy.config_updates.send(reloaded).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(proxy.registry.all().len(), 1);
}

#[tokio::test]
async fn test_aborted_upload_is_not_a_backend_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = common::read_request_head(&mut socket).await;
        let _ = head_tx.send(());
        let mut buf = [0u8; 4096];
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    let mut config = common::proxy_config(&[backend_addr]);
    config.health_check.unhealthy_threshold = 1;
    let proxy = common::start_proxy(config).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(
            b"POST /upload HTTP/1.1\r\nHost: test\r\nTransfer-Encoding: chunked\r\n\r\n4\r\ndata\r\n",
        )
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), head_rx)
        .await
        .expect("upload never reached the backend")
        .unwrap();
    drop(client);

    let stats = proxy.dispatcher.stats();
    let deadline = Instant::now() + Duration::from_secs(2);
    while stats.snapshot().client_disconnects == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stats.snapshot().client_disconnects, 1);
    assert_eq!(stats.snapshot().retries, 0);

    let backend = proxy.registry.all()[0].clone();
    assert!(backend.is_healthy(), "aborted upload must not mark the backend down");
    assert_eq!(backend.failed_requests(), 0);
    assert_eq!(backend.consecutive_failures(), 0);
    assert_eq!(backend.active_connections(), 0);
}

#[tokio::test]
async fn test_stalled_response_body_is_cut_off() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = common::read_request_head(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
            .await;
        // Keep the connection open without sending the rest.
        let _ = release_rx.await;
    });

    let mut config = common::proxy_config(&[backend_addr]);
    config.timeouts.read_idle_ms = 300;
    config.health_check.unhealthy_threshold = 1;
    config.health_check.cooldown_secs = 60;
    let proxy = common::start_proxy(config).await;

    let start = Instant::now();
    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.is_err(), "truncated body must end in an error");
    assert!(start.elapsed() < Duration::from_secs(5));

    let backend = proxy.registry.all()[0].clone();
    assert_eq!(backend.active_connections(), 0);
    assert!(!backend.is_healthy(), "stalled body counts as a timeout");
    assert_eq!(backend.failed_requests(), 1);
    let _ = release_tx.send(());
}
