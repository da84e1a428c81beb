//! Accession seeding: registry pagination, CSV import and idempotency

mod common;

use common::{init_test_tracing, search_page, test_config, test_constants};
use pis_common::checksum::compute_checksum;
use pis_pipeline::extract::accessions::{AccessionManager, ACCESSION, REGISTRY_PAGE};
use pis_pipeline::models::{is_valid_accession, AccessionSource};
use pis_pipeline::sources::{RetryingClient, UniProtRegistry};
use pis_pipeline::store::MemoryGraphStore;
use pis_pipeline::PipelineError;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Two registry pages: P10000..P10002, then P10003..P10004
async fn mount_two_pages(server: &MockServer) {
    let next = format!(
        "<{}/uniprotkb/search?cursor=page2&size=3>; rel=\"next\"",
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/uniprotkb/search"))
        .and(query_param("cursor", "page2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(search_page(&["P10003", "P10004"])),
        )
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/uniprotkb/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(search_page(&["P10000", "P10001", "P10002"])),
        )
        .mount(server)
        .await;
}

fn manager(
    server: &MockServer,
    store: Arc<MemoryGraphStore>,
    limit: Option<usize>,
) -> AccessionManager {
    let config = test_config(limit);
    let http = Arc::new(RetryingClient::new(&config.http).unwrap());
    let registry = Arc::new(UniProtRegistry::new(http, test_constants(server).registry));
    AccessionManager::new(store, registry, &config)
}

#[tokio::test]
async fn test_registry_run_twice_stores_each_code_once() {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let store = Arc::new(MemoryGraphStore::new());

    let first = manager(&server, store.clone(), None).start().await.unwrap();
    assert_eq!(first.counts(ACCESSION).created, 5);

    let second = manager(&server, store.clone(), None).start().await.unwrap();
    assert_eq!(second.counts(ACCESSION).created, 0);
    assert_eq!(second.counts(ACCESSION).unchanged, 5);

    let accessions = store.accessions().await;
    assert_eq!(accessions.len(), 5);
    assert!(accessions.iter().all(|a| is_valid_accession(&a.code)));
    assert!(accessions
        .iter()
        .all(|a| a.source == AccessionSource::Registry));
}

#[tokio::test]
async fn test_limit_caps_registry_records() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let store = Arc::new(MemoryGraphStore::new());
    let report = manager(&server, store.clone(), Some(4))
        .start()
        .await
        .unwrap();

    assert_eq!(report.counts(ACCESSION).created, 4);
    assert_eq!(store.accessions().await.len(), 4);
}

#[tokio::test]
async fn test_registry_and_csv_overlap_without_duplicates() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let mut csv = NamedTempFile::new().unwrap();
    writeln!(csv, "accession,organism").unwrap();
    writeln!(csv, "P10001,human").unwrap();
    writeln!(csv, "P10004,human").unwrap();
    writeln!(csv, "Q20000,mouse").unwrap();
    writeln!(csv, "not-an-accession,mouse").unwrap();
    writeln!(csv, "Q20001,rat").unwrap();

    let store = Arc::new(MemoryGraphStore::new());
    let report = manager(&server, store.clone(), None)
        .with_csv(Some(csv.path().to_path_buf()))
        .start()
        .await
        .unwrap();

    let counts = report.counts(ACCESSION);
    assert_eq!(counts.created, 7);
    assert_eq!(counts.unchanged, 2);
    assert_eq!(counts.skipped, 1);

    let accessions = store.accessions().await;
    assert_eq!(accessions.len(), 7);

    let mut codes: Vec<&str> = accessions.iter().map(|a| a.code.as_str()).collect();
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), 7);

    // The registry saw the overlapping codes first
    let p10001 = accessions.iter().find(|a| a.code == "P10001").unwrap();
    assert_eq!(p10001.source, AccessionSource::Registry);
    let q20000 = accessions.iter().find(|a| a.code == "Q20000").unwrap();
    assert_eq!(q20000.source, AccessionSource::Csv);
}

#[tokio::test]
async fn test_headerless_csv_uses_first_column() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uniprotkb/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(&[])))
        .mount(&server)
        .await;

    let mut csv = NamedTempFile::new().unwrap();
    writeln!(csv, "A0A023GPI8").unwrap();
    writeln!(csv, " P69905 ").unwrap();
    writeln!(csv).unwrap();

    let store = Arc::new(MemoryGraphStore::new());
    let report = manager(&server, store.clone(), None)
        .with_csv(Some(csv.path().to_path_buf()))
        .start()
        .await
        .unwrap();

    assert_eq!(report.counts(ACCESSION).created, 2);
    assert!(store.accessions().await.iter().any(|a| a.code == "P69905"));
}

#[tokio::test]
async fn test_failed_page_stops_pagination_and_keeps_earlier_pages() {
    let server = MockServer::start().await;
    let next = format!(
        "<{}/uniprotkb/search?cursor=page2&size=3>; rel=\"next\"",
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/uniprotkb/search"))
        .and(query_param("cursor", "page2"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/uniprotkb/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(search_page(&["P10000", "P10001", "P10002"])),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryGraphStore::new());
    let report = manager(&server, store.clone(), None).start().await.unwrap();

    assert_eq!(report.counts(ACCESSION).created, 3);
    assert_eq!(report.counts(REGISTRY_PAGE).failed, 1);
    assert_eq!(store.accessions().await.len(), 3);
}

#[tokio::test]
async fn test_pinned_checksum_guards_csv_import() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uniprotkb/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(&[])))
        .mount(&server)
        .await;

    let mut csv = NamedTempFile::new().unwrap();
    writeln!(csv, "P69905").unwrap();
    let actual = compute_checksum(&mut File::open(csv.path()).unwrap()).unwrap();

    let store = Arc::new(MemoryGraphStore::new());
    let err = manager(&server, store.clone(), None)
        .with_csv(Some(csv.path().to_path_buf()))
        .with_csv_checksum(Some("0".repeat(64)))
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Common(_)));
    assert!(store.accessions().await.is_empty());

    let report = manager(&server, store.clone(), None)
        .with_csv(Some(csv.path().to_path_buf()))
        .with_csv_checksum(Some(actual))
        .start()
        .await
        .unwrap();
    assert_eq!(report.counts(ACCESSION).created, 1);
}

#[tokio::test]
async fn test_limit_is_one_budget_for_registry_and_csv() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let mut csv = NamedTempFile::new().unwrap();
    for code in ["Q20000", "Q20001", "Q20002", "Q20003", "Q20004"] {
        writeln!(csv, "{}", code).unwrap();
    }

    // Three from the registry's first page leave nothing for the CSV
    let store = Arc::new(MemoryGraphStore::new());
    let report = manager(&server, store.clone(), Some(3))
        .with_csv(Some(csv.path().to_path_buf()))
        .start()
        .await
        .unwrap();
    assert_eq!(report.counts(ACCESSION).created, 3);
    let accessions = store.accessions().await;
    assert_eq!(accessions.len(), 3);
    assert!(accessions
        .iter()
        .all(|a| a.source == AccessionSource::Registry));

    // Seven: five from the registry, two from the CSV
    let store = Arc::new(MemoryGraphStore::new());
    manager(&server, store.clone(), Some(7))
        .with_csv(Some(csv.path().to_path_buf()))
        .start()
        .await
        .unwrap();
    let accessions = store.accessions().await;
    assert_eq!(accessions.len(), 7);
    assert_eq!(
        accessions
            .iter()
            .filter(|a| a.source == AccessionSource::Csv)
            .count(),
        2
    );
}
