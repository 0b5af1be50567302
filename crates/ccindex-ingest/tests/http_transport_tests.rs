//! HTTPS transport tests against a local mock server

mod common;

use ccindex_ingest::cancel::CancellationController;
use ccindex_ingest::catalog::SqliteCatalog;
use ccindex_ingest::executor::RetryPolicy;
use ccindex_ingest::listing::Listings;
use ccindex_ingest::pipeline::Pipeline;
use ccindex_ingest::registry::RegistrySource;
use ccindex_ingest::transport::{DataLocator, HttpStore, RemoteStore, TransportError};
use ccindex_ingest::RunStatus;
use common::{data_path, gzip_lines, init_tracing, parquet_file, SCHEMA_2013, TABLE};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{header, method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

const BODY: &[u8] = b"0123456789abcdef";

fn store() -> HttpStore {
    HttpStore::new(Duration::from_secs(5)).unwrap()
}

async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_get_returns_body() {
    let server = MockServer::start().await;
    serve(&server, "/object", ResponseTemplate::new(200).set_body_bytes(BODY)).await;

    let bytes = store()
        .get(&format!("{}/object", server.uri()))
        .await
        .unwrap();
    assert_eq!(bytes, BODY);
}

#[tokio::test]
async fn test_get_suffix_sends_range_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/object"))
        .and(header("range", "bytes=-4"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(&BODY[12..]))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = store()
        .get_suffix(&format!("{}/object", server.uri()), 4)
        .await
        .unwrap();
    assert_eq!(bytes, b"cdef");
}

#[tokio::test]
async fn test_get_suffix_tails_full_response() {
    let server = MockServer::start().await;
    serve(&server, "/object", ResponseTemplate::new(200).set_body_bytes(BODY)).await;

    let bytes = store()
        .get_suffix(&format!("{}/object", server.uri()), 6)
        .await
        .unwrap();
    assert_eq!(bytes, b"abcdef");
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    for status in [403, 404, 429, 500, 503] {
        serve(&server, &format!("/status/{}", status), ResponseTemplate::new(status)).await;
    }
    let store = store();
    let url = |status: u16| format!("{}/status/{}", server.uri(), status);

    for status in [403, 429, 503] {
        match store.get(&url(status)).await {
            Err(TransportError::Throttled { status: got, .. }) => assert_eq!(got, status),
            other => panic!("HTTP {} gave {:?}", status, other),
        }
    }
    assert!(matches!(
        store.get(&url(404)).await,
        Err(TransportError::NotFound(_))
    ));
    assert!(matches!(
        store.get_suffix(&url(500), 8).await,
        Err(TransportError::Status { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_unreachable_host_is_a_request_error() {
    let err = store()
        .get("http://127.0.0.1:1/object")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Request { .. }));
    assert!(!err.is_throttled());
}

#[tokio::test]
async fn test_pipeline_over_http_retries_throttled_file() {
    init_tracing();
    let server = MockServer::start().await;
    let crawl = "CC-MAIN-2017-04";
    let paths: Vec<String> = (0..3).map(|i| data_path(crawl, i)).collect();

    serve(
        &server,
        "/collinfo.json",
        ResponseTemplate::new(200).set_body_string(format!(
            r#"[{{"id": "{}", "name": "January 2017 Index"}}, {{"id": "CC-MAIN-2012"}}]"#,
            crawl
        )),
    )
    .await;
    serve(
        &server,
        &format!("/crawl-data/{}/cc-index-table.paths.gz", crawl),
        ResponseTemplate::new(200).set_body_bytes(gzip_lines(&paths)),
    )
    .await;

    // The second file is throttled once before it is served.
    Mock::given(method("GET"))
        .and(path(format!("/{}", paths[1])))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/cc-index/.*\.parquet$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(parquet_file(SCHEMA_2013, 4)))
        .mount(&server)
        .await;

    let http: Arc<HttpStore> = Arc::new(store());
    let base = format!("{}/", server.uri());
    let catalog = Arc::new(SqliteCatalog::in_memory(http.clone()).await.unwrap());
    let pipeline = Pipeline::new(
        catalog.clone(),
        Listings::new(http, base.clone()),
        DataLocator::new(base.clone()),
        RegistrySource::Remote(format!("{}collinfo.json", base)),
        TABLE,
    )
    .with_retry_policy(RetryPolicy::new(Duration::from_millis(10)));

    let report = pipeline.run(CancellationController::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.registered(), 3);
    assert_eq!(report.retries(), 1);
    assert_eq!(catalog.record_count(TABLE).await.unwrap(), 12);
}
