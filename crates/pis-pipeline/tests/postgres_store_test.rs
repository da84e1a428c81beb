//! PgGraphStore against a real PostgreSQL
//!
//! These tests require Docker. Run with:
//!
//! ```bash
//! cargo test -p pis-pipeline --test postgres_store_test -- --ignored --nocapture
//! ```

mod common;

use anyhow::Result;
use common::{init_test_tracing, state_type_spec, test_config, trace, BackendMode, FakeBackend};
use pis_pipeline::embedding::{Structure3DiManager, EMBEDDING};
use pis_pipeline::models::{
    AccessionFilter, AccessionSource, ChainDraft, ComputedEmbedding, ProteinDraft,
    ResolutionStatus, StateDraft, StructureBundle, StructureStatus, StructureStub, UpsertOutcome,
};
use pis_pipeline::store::{EntityGraphStore, PgGraphStore};
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

async fn start_store() -> Result<(ContainerAsync<Postgres>, PgGraphStore)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
    let store = PgGraphStore::new(pool);
    store.migrate().await?;
    Ok((container, store))
}

fn bundle(pdb_id: &str, chains: &[(&str, &str)]) -> StructureBundle {
    StructureBundle {
        pdb_id: pdb_id.to_string(),
        protein_id: None,
        title: Some(format!("TEST {}", pdb_id)),
        method: Some("X-RAY DIFFRACTION".to_string()),
        resolution: Some(2.0),
        chains: chains
            .iter()
            .map(|(label, residues)| ChainDraft {
                label: label.to_string(),
                residues: Some(residues.to_string()),
                states: vec![StateDraft {
                    model: 1,
                    ca_trace: trace(residues.len()),
                }],
            })
            .collect(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_natural_key_upserts() -> Result<()> {
    init_test_tracing();
    let (_container, store) = start_store().await?;

    let first = store.upsert_accession("P12345", AccessionSource::Registry).await?;
    let again = store.upsert_accession("P12345", AccessionSource::Csv).await?;
    assert_eq!(first.outcome, UpsertOutcome::Created);
    assert_eq!(again.outcome, UpsertOutcome::Unchanged);
    assert_eq!(first.id, again.id);
    assert!(store.upsert_accession("bad!", AccessionSource::Csv).await.is_err());

    let seq = store.upsert_sequence("MKTAYIAKQR").await?;
    let same = store.upsert_sequence("mktay iakqr\n").await?;
    assert_eq!(seq.id, same.id);
    assert_eq!(same.outcome, UpsertOutcome::Unchanged);

    let mut draft = ProteinDraft {
        accession: "P12345".to_string(),
        entry_name: "TEST_HUMAN".to_string(),
        description: None,
        gene_name: None,
        organism: Some("Homo sapiens".to_string()),
        taxonomy_id: Some(9606),
        sequence_id: Some(seq.id),
    };
    let protein = store.upsert_protein(&draft).await?;
    assert_eq!(protein.outcome, UpsertOutcome::Created);
    assert_eq!(store.upsert_protein(&draft).await?.outcome, UpsertOutcome::Unchanged);
    draft.description = Some("Test protein".to_string());
    assert_eq!(store.upsert_protein(&draft).await?.outcome, UpsertOutcome::Updated);

    store.link_accession("P12345", protein.id).await?;
    store
        .mark_accession("P12345", ResolutionStatus::Resolved)
        .await?;
    assert!(store
        .list_accessions(AccessionFilter::Pending, None)
        .await?
        .is_empty());

    let counts = store.counts().await?;
    assert_eq!(counts.accessions, 1);
    assert_eq!(counts.sequences, 1);
    assert_eq!(counts.proteins, 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_structure_bundle_and_claims() -> Result<()> {
    init_test_tracing();
    let (_container, store) = start_store().await?;

    store
        .upsert_structure_stub(&StructureStub {
            pdb_id: "1abc".to_string(),
            protein_id: None,
            method: None,
            resolution: None,
        })
        .await?;
    assert_eq!(store.list_structure_stubs(None).await?.len(), 1);

    let summary = store
        .store_structure(&bundle("1ABC", &[("A", "MKVG"), ("B", "MKVG")]))
        .await?;
    assert_eq!(summary.status, StructureStatus::Complete);
    assert_eq!(summary.chains, 2);
    assert_eq!(summary.sequences_created, 1);
    assert!(store.list_structure_stubs(None).await?.is_empty());

    // Re-storing the same bundle adds nothing
    store
        .store_structure(&bundle("1ABC", &[("A", "MKVG"), ("B", "MKVG")]))
        .await?;
    let counts = store.counts().await?;
    assert_eq!(counts.chains, 2);
    assert_eq!(counts.states, 2);

    let embedding_type = store.register_embedding_type(&state_type_spec()).await?;
    let lease = Duration::from_secs(1);

    let a = store
        .claim_missing_embeddings(&embedding_type, 1, "worker-a", lease)
        .await?;
    let b = store
        .claim_missing_embeddings(&embedding_type, 10, "worker-b", lease)
        .await?;
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_ne!(a[0].source_id(), b[0].source_id());
    assert!(store
        .claim_missing_embeddings(&embedding_type, 10, "worker-c", lease)
        .await?
        .is_empty());

    let persisted = store
        .persist_embeddings(
            &embedding_type,
            &[ComputedEmbedding {
                source_id: a[0].source_id(),
                vector: vec![0.5, 0.25],
            }],
        )
        .await?;
    assert_eq!(persisted, 1);

    // worker-b's lease runs out and the entity becomes claimable again
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let reclaimed = store
        .claim_missing_embeddings(&embedding_type, 10, "worker-c", lease)
        .await?;
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].source_id(), b[0].source_id());

    store
        .release_claims(&embedding_type, "worker-c", &[b[0].source_id()])
        .await?;
    assert_eq!(store.find_missing_embeddings(&embedding_type, 10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_3di_manager_on_postgres() -> Result<()> {
    init_test_tracing();
    let (_container, store) = start_store().await?;
    for i in 0..4 {
        store
            .store_structure(&bundle(&format!("{}XYZ", i), &[("A", "MKVGA")]))
            .await?;
    }

    let store = Arc::new(store);
    let backend = Arc::new(FakeBackend::new(BackendMode::Healthy));
    let manager = || {
        Structure3DiManager::new(store.clone(), backend.clone(), &test_config(None))
            .with_catalog(&[state_type_spec()])
    };

    let first = manager().start().await?;
    assert_eq!(first.counts(EMBEDDING).created, 4);
    let second = manager().start().await?;
    assert_eq!(second.counts(EMBEDDING).created, 0);
    assert_eq!(store.counts().await?.embeddings, 4);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_embedding_rows_need_an_existing_source() -> Result<()> {
    init_test_tracing();
    let (_container, store) = start_store().await?;
    store
        .store_structure(&bundle("5FKY", &[("A", "MKVGA")]))
        .await?;
    let state_type = store.register_embedding_type(&state_type_spec()).await?;
    let state_id = store
        .find_missing_embeddings(&state_type, 1)
        .await?
        .first()
        .map(|input| input.source_id())
        .expect("one state");

    let insert = |source_kind: &'static str, source_id: i64| {
        sqlx::query(
            "INSERT INTO embeddings (source_kind, source_id, embedding_type_id, vector)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(source_kind)
        .bind(source_id)
        .bind(state_type.id)
        .bind(vec![0.5f32])
        .execute(store.pool())
    };

    // No state row with this id, and a state id is not a sequence id
    assert!(insert("state", state_id + 1000).await.is_err());
    assert!(insert("sequence", state_id + 1000).await.is_err());
    insert("state", state_id).await?;

    let claim = sqlx::query(
        "INSERT INTO embedding_claims
             (source_kind, source_id, embedding_type_id, worker_id, lease_expires_at)
         VALUES ('state', $1, $2, 'worker-a', NOW())",
    )
    .bind(state_id + 1000)
    .bind(state_type.id)
    .execute(store.pool())
    .await;
    assert!(claim.is_err());

    assert_eq!(store.counts().await?.embeddings, 1);
    Ok(())
}
