use std::{io::Read as _, sync::Arc, time::Duration};

use flate2::read::GzDecoder;
use rama::{
    http::{
        BodyExtractExt as _, StatusCode,
        body::util::BodyExt as _,
        header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE},
        service::client::HttpClientExt as _,
    },
};
use tokio::time::Instant;

use crate::{
    bid::{BidEndpoint, BidStats},
    config::TuningConfig,
    test::e2e,
};

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bid_echoes_request() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.client();

    for index in 0..e2e::runtime::LISTENER_COUNT {
        let start = Instant::now();
        let resp = client
            .post(runtime.bid_url_for(index))
            .body(r#"{"id":"abc123","imp":[{"id":"1"}],"tmax":25}"#)
            .send()
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(resp.headers().get(CONTENT_ENCODING).is_none());
        assert!(elapsed >= Duration::from_millis(26), "elapsed: {elapsed:?}");

        let value: serde_json::Value = resp.try_into_json().await.unwrap();
        assert_eq!(value["id"], "abc123", "listener #{index}");
        assert_eq!(value["upstream"], "rust");
        assert_eq!(value["echo_tmax"], 25);
        assert_eq!(value["took_ms"], 26);
        assert_eq!(value["blob"], "x".repeat(64));
        assert!(value["ts"].as_i64().unwrap() > 0);
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bid_malformed_body() {
    let runtime = e2e::runtime::get().await;

    for body in ["", "not-json-at-all", r#"{"tmax":"soon","id":7}"#] {
        let resp = runtime
            .client()
            .post(runtime.bid_url())
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "body: {body:?}");

        let value: serde_json::Value = resp.try_into_json().await.unwrap();
        assert_eq!(value["id"], "", "body: {body:?}");
        assert_eq!(value["echo_tmax"], 300, "body: {body:?}");
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_ping() {
    let runtime = e2e::runtime::get().await;

    let resp = runtime.client().get(runtime.ping_url()).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.try_into_string().await.unwrap().is_empty());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unknown_route() {
    let runtime = e2e::runtime::get().await;

    let resp = runtime
        .client()
        .get(format!("http://{}/nope", runtime.bid_socket_addrs()[0]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bids_are_delayed_concurrently() {
    const REQUESTS: usize = 16;

    let runtime = e2e::runtime::get().await;
    let client = runtime.client();

    let start = Instant::now();
    let mut set = tokio::task::JoinSet::new();
    for i in 0..REQUESTS {
        let client = client.clone();
        let url = runtime.bid_url_for(i % e2e::runtime::LISTENER_COUNT);
        set.spawn(async move {
            let resp = client
                .post(url)
                .body(format!(r#"{{"id":"c-{i}","tmax":400}}"#))
                .send()
                .await
                .unwrap();
            let value: serde_json::Value = resp.try_into_json().await.unwrap();
            assert_eq!(value["id"], format!("c-{i}"));
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    // serialized this would take REQUESTS * 401ms
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(401), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "elapsed: {elapsed:?}");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bid_client_gone_before_response() {
    let runtime = e2e::runtime::get().await;

    let result = runtime
        .client_with_timeout(Duration::from_millis(100))
        .post(runtime.bid_url())
        .body(r#"{"id":"gone","tmax":2000}"#)
        .send()
        .await;
    assert!(result.is_err());

    // listener keeps serving after the aborted bid
    let resp = runtime
        .client()
        .post(runtime.bid_url())
        .body(r#"{"id":"next","tmax":5}"#)
        .send()
        .await
        .unwrap();
    let value: serde_json::Value = resp.try_into_json().await.unwrap();
    assert_eq!(value["id"], "next");
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bid_client_gone_is_aborted_by_server() {
    let endpoint = Arc::new(BidEndpoint::new(&TuningConfig {
        late_fraction: 1.0,
        late_span_ms: Some(0),
        blob_bytes: 64,
        ..Default::default()
    }));
    let (runtime, _shutdown) = e2e::runtime::spawn_listener(endpoint.clone()).await;

    let start = Instant::now();
    let result = runtime
        .client_with_timeout(Duration::from_millis(100))
        .post(runtime.bid_url())
        .body(r#"{"id":"gone","tmax":2000}"#)
        .send()
        .await;
    assert!(result.is_err());

    // the bid would only be answered after 2001ms
    while endpoint.stats().aborted == 0 {
        assert!(
            start.elapsed() < Duration::from_millis(1000),
            "stats: {:?}",
            endpoint.stats()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        endpoint.stats(),
        BidStats {
            responded: 0,
            aborted: 1,
        }
    );

    // same listener keeps answering
    let resp = runtime
        .client()
        .post(runtime.bid_url())
        .body(r#"{"id":"next","tmax":5}"#)
        .send()
        .await
        .unwrap();
    let value: serde_json::Value = resp.try_into_json().await.unwrap();
    assert_eq!(value["id"], "next");
    assert_eq!(endpoint.stats().aborted, 1);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bid_gzip_negotiation() {
    let runtime = e2e::runtime::spawn_with_args(&["--gzip", "--upstream", "gz"]).await;
    let client = runtime.client();

    let resp = client
        .post(runtime.bid_url())
        .header(ACCEPT_ENCODING, "gzip")
        .body(r#"{"id":"zip","tmax":10}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CONTENT_ENCODING).unwrap(), "gzip");

    let compressed = resp.into_body().collect().await.unwrap().to_bytes();
    let mut plain = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut plain)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&plain).unwrap();
    assert_eq!(value["id"], "zip");
    assert_eq!(value["upstream"], "gz");

    // no gzip without the client asking for it
    let resp = client
        .post(runtime.bid_url())
        .body(r#"{"id":"plain","tmax":10}"#)
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get(CONTENT_ENCODING).is_none());
    let value: serde_json::Value = resp.try_into_json().await.unwrap();
    assert_eq!(value["id"], "plain");
}
