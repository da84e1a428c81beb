//! Entity graph storage
//!
//! Every write is a natural-key upsert reporting whether a row was created,
//! updated or left untouched, so any stage can be re-run without duplicating
//! the graph. Embedding selection goes through claim/lease rows: a live lease
//! hides an entity from every other worker until it is persisted, released or
//! the lease expires.
//!
//! Two implementations share this contract:
//! - [`PgGraphStore`] (PostgreSQL via sqlx)
//! - [`MemoryGraphStore`] (in-process arena, used by tests and local runs)

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{
    Accession, AccessionFilter, AccessionSource, ComputedEmbedding, Embedding, EmbeddingInput,
    EmbeddingType, EmbeddingTypeSpec, EntityId, GoEvidence, GoTermDraft, GraphCounts,
    ProteinDraft, ResolutionStatus, SourceKind, Structure, StructureBundle, StructureStatus,
    StructureStub, StructureWriteSummary, Upserted,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryGraphStore;
pub use postgres::PgGraphStore;

#[async_trait]
pub trait EntityGraphStore: Send + Sync {
    // ------------------------------------------------------------------
    // Accessions
    // ------------------------------------------------------------------

    /// Insert an accession code; an existing code is never modified.
    async fn upsert_accession(&self, code: &str, source: AccessionSource) -> Result<Upserted>;

    async fn accession_exists(&self, code: &str) -> Result<bool>;

    /// Point an accession at its protein, creating the accession when absent
    async fn link_accession(&self, code: &str, protein_id: EntityId) -> Result<()>;

    async fn mark_accession(&self, code: &str, status: ResolutionStatus) -> Result<()>;

    /// Accessions in insertion order
    async fn list_accessions(
        &self,
        filter: AccessionFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Accession>>;

    // ------------------------------------------------------------------
    // Proteins, sequences, GO
    // ------------------------------------------------------------------

    /// Keyed by the checksum of the normalized residues
    async fn upsert_sequence(&self, residues: &str) -> Result<Upserted>;

    async fn sequence_exists(&self, checksum: &str) -> Result<bool>;

    async fn upsert_protein(&self, protein: &ProteinDraft) -> Result<Upserted>;

    async fn upsert_go_term(&self, term: &GoTermDraft) -> Result<Upserted>;

    /// Insert-if-absent on `(protein, go_term)`; existing evidence is kept.
    async fn insert_annotation(
        &self,
        protein_id: EntityId,
        go_term_id: EntityId,
        evidence: &GoEvidence,
    ) -> Result<Upserted>;

    // ------------------------------------------------------------------
    // Structures
    // ------------------------------------------------------------------

    /// Create a `stub` structure, or fill in fields the stored row lacks
    async fn upsert_structure_stub(&self, stub: &StructureStub) -> Result<Upserted>;

    async fn list_structure_stubs(&self, limit: Option<usize>) -> Result<Vec<Structure>>;

    async fn mark_structure(&self, pdb_id: &str, status: StructureStatus) -> Result<()>;

    /// Write a structure with its chains, chain sequences and states
    /// atomically. Nothing of the bundle is visible unless all of it is.
    async fn store_structure(&self, bundle: &StructureBundle) -> Result<StructureWriteSummary>;

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    /// Register a catalog entry; an existing name is returned as stored.
    async fn register_embedding_type(&self, spec: &EmbeddingTypeSpec) -> Result<EmbeddingType>;

    async fn embedding_types(&self, kind: SourceKind) -> Result<Vec<EmbeddingType>>;

    /// Eligible entities without an embedding of this type (read only, ignores leases)
    async fn find_missing_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        batch_size: usize,
    ) -> Result<Vec<EmbeddingInput>>;

    /// Atomically lease up to `batch_size` eligible, unembedded and
    /// unclaimed entities to `worker`
    async fn claim_missing_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        batch_size: usize,
        worker: &str,
        lease: Duration,
    ) -> Result<Vec<EmbeddingInput>>;

    /// Insert-if-absent every item and drop the matching claims, in one
    /// transaction. Returns the number of embeddings created.
    async fn persist_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        items: &[ComputedEmbedding],
    ) -> Result<usize>;

    async fn release_claims(
        &self,
        embedding_type: &EmbeddingType,
        worker: &str,
        source_ids: &[EntityId],
    ) -> Result<()>;

    async fn list_embeddings(&self, embedding_type: &EmbeddingType) -> Result<Vec<Embedding>>;

    async fn counts(&self) -> Result<GraphCounts>;
}

/// Upper-case PDB id as stored
pub fn normalize_pdb_id(pdb_id: &str) -> String {
    pdb_id.trim().to_ascii_uppercase()
}
