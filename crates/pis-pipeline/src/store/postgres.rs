//! PostgreSQL entity graph
//!
//! Natural-key upserts use `INSERT ... ON CONFLICT ... DO UPDATE ... WHERE
//! ... IS DISTINCT FROM ... RETURNING id, (xmax = 0)`: a returned row tells
//! created from updated, no row means the stored data was identical and the
//! id is read back with a plain SELECT.
//!
//! Claims are taken with `FOR UPDATE SKIP LOCKED` on the source rows and an
//! upsert into `embedding_claims` that only overwrites expired leases, so two
//! workers racing on the same entity can never both get it.

use async_trait::async_trait;
use pis_common::checksum::{normalize_residues, sequence_checksum};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

use super::{normalize_pdb_id, EntityGraphStore};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    is_valid_accession, Accession, AccessionFilter, AccessionSource, ComputedEmbedding,
    Embedding, EmbeddingInput, EmbeddingType, EmbeddingTypeSpec, EntityId, GoEvidence,
    GoTermDraft, GraphCounts, ProteinDraft, ResolutionStatus, SourceKind, Structure,
    StructureBundle, StructureStatus, StructureStub, StructureWriteSummary, Upserted,
};

/// Seconds to wait for a pooled connection
pub const ACQUIRE_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct AccessionRow {
    id: i64,
    code: String,
    source: String,
    protein_id: Option<i64>,
    uniprot_status: String,
}

impl From<AccessionRow> for Accession {
    fn from(row: AccessionRow) -> Self {
        Accession {
            id: row.id,
            code: row.code,
            source: AccessionSource::from(row.source),
            protein_id: row.protein_id,
            uniprot_status: ResolutionStatus::from(row.uniprot_status),
        }
    }
}

#[derive(Debug, FromRow)]
struct StructureRow {
    id: i64,
    pdb_id: String,
    protein_id: Option<i64>,
    title: Option<String>,
    method: Option<String>,
    resolution: Option<f64>,
    status: String,
}

impl From<StructureRow> for Structure {
    fn from(row: StructureRow) -> Self {
        Structure {
            id: row.id,
            pdb_id: row.pdb_id,
            protein_id: row.protein_id,
            title: row.title,
            method: row.method,
            resolution: row.resolution,
            status: StructureStatus::from(row.status),
        }
    }
}

#[derive(Debug, FromRow)]
struct EmbeddingTypeRow {
    id: i64,
    name: String,
    source_kind: String,
    model_name: String,
    description: Option<String>,
}

impl From<EmbeddingTypeRow> for EmbeddingType {
    fn from(row: EmbeddingTypeRow) -> Self {
        EmbeddingType {
            id: row.id,
            name: row.name,
            source_kind: SourceKind::from(row.source_kind),
            model_name: row.model_name,
            description: row.description,
        }
    }
}

#[derive(Debug, FromRow)]
struct StateInputRow {
    id: i64,
    structure_id: i64,
    pdb_id: String,
    label: String,
    model: i32,
    ca_trace: Json<Vec<[f32; 3]>>,
}

#[derive(Debug, FromRow)]
struct EmbeddingRow {
    id: i64,
    source_kind: String,
    source_id: i64,
    embedding_type_id: i64,
    vector: Vec<f32>,
}

/// Split an `ON CONFLICT ... RETURNING id, (xmax = 0)` result
fn returned_outcome(row: Option<(i64, bool)>) -> Option<Upserted> {
    row.map(|(id, inserted)| {
        if inserted {
            Upserted::created(id)
        } else {
            Upserted::updated(id)
        }
    })
}

/// Ids of entities eligible for `$1` (embedding type id) without an embedding yet
fn eligible_ids_sql(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Sequence => {
            r#"
            SELECT s.id
            FROM sequences s
            WHERE NOT EXISTS (
                SELECT 1 FROM embeddings e
                WHERE e.source_kind = 'sequence'
                  AND e.source_id = s.id
                  AND e.embedding_type_id = $1
            )
            "#
        }
        SourceKind::State => {
            r#"
            SELECT s.id
            FROM states s
            JOIN structures st ON st.id = s.structure_id
            JOIN chains c ON c.id = s.chain_id
            WHERE st.status = 'complete'
              AND NOT EXISTS (
                SELECT 1 FROM embeddings e
                WHERE e.source_kind = 'state'
                  AND e.source_id = s.id
                  AND e.embedding_type_id = $1
            )
            "#
        }
    }
}

async fn upsert_sequence_on(conn: &mut PgConnection, residues: &str) -> Result<Upserted> {
    let residues = normalize_residues(residues);
    if residues.is_empty() {
        return Err(PipelineError::malformed("sequence", "empty residue string"));
    }
    let checksum = sequence_checksum(&residues);

    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO sequences (checksum, residues, length)
        VALUES ($1, $2, $3)
        ON CONFLICT (checksum) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&checksum)
    .bind(&residues)
    .bind(residues.len() as i32)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = inserted {
        return Ok(Upserted::created(id));
    }

    let id: i64 = sqlx::query_scalar("SELECT id FROM sequences WHERE checksum = $1")
        .bind(&checksum)
        .fetch_one(&mut *conn)
        .await?;
    Ok(Upserted::unchanged(id))
}

/// PostgreSQL [`EntityGraphStore`]
#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from the `DB_*` settings
    pub async fn connect(config: &PipelineConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect_with(config.connect_options())
            .await?;

        info!(
            host = %config.db_host,
            database = %config.db_name,
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_inputs(
        &self,
        kind: SourceKind,
        ids: &[EntityId],
    ) -> Result<Vec<EmbeddingInput>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        match kind {
            SourceKind::Sequence => {
                let rows: Vec<(i64, String)> = sqlx::query_as(
                    "SELECT id, residues FROM sequences WHERE id = ANY($1) ORDER BY id",
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;

                Ok(rows
                    .into_iter()
                    .map(|(sequence_id, residues)| EmbeddingInput::Sequence {
                        sequence_id,
                        residues,
                    })
                    .collect())
            }
            SourceKind::State => {
                let rows: Vec<StateInputRow> = sqlx::query_as(
                    r#"
                    SELECT s.id, s.structure_id, st.pdb_id, c.label, s.model, s.ca_trace
                    FROM states s
                    JOIN structures st ON st.id = s.structure_id
                    JOIN chains c ON c.id = s.chain_id
                    WHERE s.id = ANY($1)
                    ORDER BY s.id
                    "#,
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;

                Ok(rows
                    .into_iter()
                    .map(|row| EmbeddingInput::State {
                        state_id: row.id,
                        structure_id: row.structure_id,
                        pdb_id: row.pdb_id,
                        chain_label: row.label,
                        model: row.model,
                        ca_trace: row.ca_trace.0,
                    })
                    .collect())
            }
        }
    }
}

#[async_trait]
impl EntityGraphStore for PgGraphStore {
    async fn upsert_accession(&self, code: &str, source: AccessionSource) -> Result<Upserted> {
        if !is_valid_accession(code) {
            return Err(PipelineError::malformed(code, "invalid accession code"));
        }

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO accessions (code, source)
            VALUES ($1, $2)
            ON CONFLICT (code) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(code)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(Upserted::created(id));
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM accessions WHERE code = $1")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(Upserted::unchanged(id))
    }

    async fn accession_exists(&self, code: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accessions WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn link_accession(&self, code: &str, protein_id: EntityId) -> Result<()> {
        if !is_valid_accession(code) {
            return Err(PipelineError::malformed(code, "invalid accession code"));
        }

        sqlx::query(
            r#"
            INSERT INTO accessions (code, source, protein_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
            SET protein_id = EXCLUDED.protein_id
            WHERE accessions.protein_id IS DISTINCT FROM EXCLUDED.protein_id
            "#,
        )
        .bind(code)
        .bind(AccessionSource::Uniprot.as_str())
        .bind(protein_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_accession(&self, code: &str, status: ResolutionStatus) -> Result<()> {
        let result = sqlx::query("UPDATE accessions SET uniprot_status = $2 WHERE code = $1")
            .bind(code)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!("unknown accession {}", code)));
        }
        Ok(())
    }

    async fn list_accessions(
        &self,
        filter: AccessionFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Accession>> {
        let rows: Vec<AccessionRow> = sqlx::query_as(
            r#"
            SELECT id, code, source, protein_id, uniprot_status
            FROM accessions
            WHERE $1 OR uniprot_status = 'pending'
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(filter == AccessionFilter::All)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Accession::from).collect())
    }

    async fn upsert_sequence(&self, residues: &str) -> Result<Upserted> {
        let mut conn = self.pool.acquire().await?;
        upsert_sequence_on(&mut *conn, residues).await
    }

    async fn sequence_exists(&self, checksum: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sequences WHERE checksum = $1)")
                .bind(checksum)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn upsert_protein(&self, protein: &ProteinDraft) -> Result<Upserted> {
        let returned: Option<(i64, bool)> = sqlx::query_as(
            r#"
            INSERT INTO proteins (
                accession, entry_name, description, gene_name,
                organism, taxonomy_id, sequence_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (accession) DO UPDATE SET
                entry_name = EXCLUDED.entry_name,
                description = EXCLUDED.description,
                gene_name = EXCLUDED.gene_name,
                organism = EXCLUDED.organism,
                taxonomy_id = EXCLUDED.taxonomy_id,
                sequence_id = EXCLUDED.sequence_id,
                updated_at = NOW()
            WHERE (proteins.entry_name, proteins.description, proteins.gene_name,
                   proteins.organism, proteins.taxonomy_id, proteins.sequence_id)
                IS DISTINCT FROM
                  (EXCLUDED.entry_name, EXCLUDED.description, EXCLUDED.gene_name,
                   EXCLUDED.organism, EXCLUDED.taxonomy_id, EXCLUDED.sequence_id)
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(&protein.accession)
        .bind(&protein.entry_name)
        .bind(&protein.description)
        .bind(&protein.gene_name)
        .bind(&protein.organism)
        .bind(protein.taxonomy_id)
        .bind(protein.sequence_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(upserted) = returned_outcome(returned) {
            return Ok(upserted);
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM proteins WHERE accession = $1")
            .bind(&protein.accession)
            .fetch_one(&self.pool)
            .await?;
        Ok(Upserted::unchanged(id))
    }

    async fn upsert_go_term(&self, term: &GoTermDraft) -> Result<Upserted> {
        let category = term.category.map(|c| c.code());
        let returned: Option<(i64, bool)> = sqlx::query_as(
            r#"
            INSERT INTO go_terms (go_id, name, category)
            VALUES ($1, $2, $3)
            ON CONFLICT (go_id) DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category
            WHERE (go_terms.name, go_terms.category)
                IS DISTINCT FROM (EXCLUDED.name, EXCLUDED.category)
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(&term.go_id)
        .bind(&term.name)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(upserted) = returned_outcome(returned) {
            return Ok(upserted);
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM go_terms WHERE go_id = $1")
            .bind(&term.go_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Upserted::unchanged(id))
    }

    async fn insert_annotation(
        &self,
        protein_id: EntityId,
        go_term_id: EntityId,
        evidence: &GoEvidence,
    ) -> Result<Upserted> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO protein_go_annotations (protein_id, go_term_id, evidence_code, assigned_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (protein_id, go_term_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(protein_id)
        .bind(go_term_id)
        .bind(&evidence.evidence_code)
        .bind(&evidence.assigned_by)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(Upserted::created(id));
        }

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM protein_go_annotations WHERE protein_id = $1 AND go_term_id = $2",
        )
        .bind(protein_id)
        .bind(go_term_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Upserted::unchanged(id))
    }

    async fn upsert_structure_stub(&self, stub: &StructureStub) -> Result<Upserted> {
        let pdb_id = normalize_pdb_id(&stub.pdb_id);
        let returned: Option<(i64, bool)> = sqlx::query_as(
            r#"
            INSERT INTO structures (pdb_id, protein_id, method, resolution, status)
            VALUES ($1, $2, $3, $4, 'stub')
            ON CONFLICT (pdb_id) DO UPDATE SET
                protein_id = COALESCE(structures.protein_id, EXCLUDED.protein_id),
                method = COALESCE(structures.method, EXCLUDED.method),
                resolution = COALESCE(structures.resolution, EXCLUDED.resolution),
                updated_at = NOW()
            WHERE (structures.protein_id IS NULL AND EXCLUDED.protein_id IS NOT NULL)
               OR (structures.method IS NULL AND EXCLUDED.method IS NOT NULL)
               OR (structures.resolution IS NULL AND EXCLUDED.resolution IS NOT NULL)
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(&pdb_id)
        .bind(stub.protein_id)
        .bind(&stub.method)
        .bind(stub.resolution)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(upserted) = returned_outcome(returned) {
            return Ok(upserted);
        }

        let id: i64 = sqlx::query_scalar("SELECT id FROM structures WHERE pdb_id = $1")
            .bind(&pdb_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Upserted::unchanged(id))
    }

    async fn list_structure_stubs(&self, limit: Option<usize>) -> Result<Vec<Structure>> {
        let rows: Vec<StructureRow> = sqlx::query_as(
            r#"
            SELECT id, pdb_id, protein_id, title, method, resolution, status
            FROM structures
            WHERE status = 'stub'
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Structure::from).collect())
    }

    async fn mark_structure(&self, pdb_id: &str, status: StructureStatus) -> Result<()> {
        let pdb_id = normalize_pdb_id(pdb_id);
        let result = sqlx::query(
            "UPDATE structures SET status = $2, updated_at = NOW() WHERE pdb_id = $1",
        )
        .bind(&pdb_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!("unknown structure {}", pdb_id)));
        }
        Ok(())
    }

    async fn store_structure(&self, bundle: &StructureBundle) -> Result<StructureWriteSummary> {
        let pdb_id = normalize_pdb_id(&bundle.pdb_id);
        let status = bundle.status();
        let mut tx = self.pool.begin().await?;

        let structure_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO structures (pdb_id, protein_id, title, method, resolution, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (pdb_id) DO UPDATE SET
                protein_id = COALESCE(structures.protein_id, EXCLUDED.protein_id),
                title = COALESCE(EXCLUDED.title, structures.title),
                method = COALESCE(EXCLUDED.method, structures.method),
                resolution = COALESCE(EXCLUDED.resolution, structures.resolution),
                status = EXCLUDED.status,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&pdb_id)
        .bind(bundle.protein_id)
        .bind(&bundle.title)
        .bind(&bundle.method)
        .bind(bundle.resolution)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut summary = StructureWriteSummary {
            structure_id,
            status,
            chains: 0,
            states: 0,
            sequences_created: 0,
        };

        for chain in &bundle.chains {
            if chain.label.is_empty() {
                // Dropping the transaction rolls back the structure row
                return Err(PipelineError::malformed(&pdb_id, "chain without label"));
            }

            let sequence_id = match chain.residues.as_deref().filter(|r| !r.is_empty()) {
                Some(residues) => {
                    let upserted = upsert_sequence_on(&mut *tx, residues).await?;
                    if upserted.is_created() {
                        summary.sequences_created += 1;
                    }
                    Some(upserted.id)
                }
                None => None,
            };

            let chain_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO chains (structure_id, label, sequence_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (structure_id, label) DO UPDATE SET
                    sequence_id = COALESCE(EXCLUDED.sequence_id, chains.sequence_id)
                RETURNING id
                "#,
            )
            .bind(structure_id)
            .bind(&chain.label)
            .bind(sequence_id)
            .fetch_one(&mut *tx)
            .await?;
            summary.chains += 1;

            for state in &chain.states {
                sqlx::query(
                    r#"
                    INSERT INTO states (structure_id, chain_id, model, residue_count, ca_trace)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (structure_id, chain_id, model) DO UPDATE SET
                        residue_count = EXCLUDED.residue_count,
                        ca_trace = EXCLUDED.ca_trace
                    "#,
                )
                .bind(structure_id)
                .bind(chain_id)
                .bind(state.model)
                .bind(state.ca_trace.len() as i32)
                .bind(Json(&state.ca_trace))
                .execute(&mut *tx)
                .await?;
                summary.states += 1;
            }
        }

        tx.commit().await?;

        debug!(
            pdb_id = %pdb_id,
            status = status.as_str(),
            chains = summary.chains,
            states = summary.states,
            "Structure bundle committed"
        );

        Ok(summary)
    }

    async fn register_embedding_type(&self, spec: &EmbeddingTypeSpec) -> Result<EmbeddingType> {
        sqlx::query(
            r#"
            INSERT INTO embedding_types (name, source_kind, model_name, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&spec.name)
        .bind(spec.source_kind.as_str())
        .bind(&spec.model_name)
        .bind(&spec.description)
        .execute(&self.pool)
        .await?;

        let row: EmbeddingTypeRow = sqlx::query_as(
            "SELECT id, name, source_kind, model_name, description FROM embedding_types WHERE name = $1",
        )
        .bind(&spec.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn embedding_types(&self, kind: SourceKind) -> Result<Vec<EmbeddingType>> {
        let rows: Vec<EmbeddingTypeRow> = sqlx::query_as(
            r#"
            SELECT id, name, source_kind, model_name, description
            FROM embedding_types
            WHERE source_kind = $1
            ORDER BY id
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EmbeddingType::from).collect())
    }

    async fn find_missing_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        batch_size: usize,
    ) -> Result<Vec<EmbeddingInput>> {
        let sql = format!(
            "{} ORDER BY s.id LIMIT $2",
            eligible_ids_sql(embedding_type.source_kind)
        );
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(embedding_type.id)
            .bind(batch_size as i64)
            .fetch_all(&self.pool)
            .await?;

        self.load_inputs(embedding_type.source_kind, &ids).await
    }

    async fn claim_missing_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        batch_size: usize,
        worker: &str,
        lease: Duration,
    ) -> Result<Vec<EmbeddingInput>> {
        let sql = format!(
            r#"
            WITH candidates AS (
                {eligible}
                  AND NOT EXISTS (
                    SELECT 1 FROM embedding_claims ec
                    WHERE ec.source_kind = $5
                      AND ec.source_id = s.id
                      AND ec.embedding_type_id = $1
                      AND ec.lease_expires_at > NOW()
                )
                ORDER BY s.id
                LIMIT $2
                FOR UPDATE OF s SKIP LOCKED
            )
            INSERT INTO embedding_claims
                (source_kind, source_id, embedding_type_id, worker_id, lease_expires_at)
            SELECT $5, id, $1, $3, NOW() + make_interval(secs => $4)
            FROM candidates
            ON CONFLICT (source_kind, source_id, embedding_type_id) DO UPDATE SET
                worker_id = EXCLUDED.worker_id,
                lease_expires_at = EXCLUDED.lease_expires_at
            WHERE embedding_claims.lease_expires_at <= NOW()
            RETURNING source_id
            "#,
            eligible = eligible_ids_sql(embedding_type.source_kind)
        );

        let mut ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(embedding_type.id)
            .bind(batch_size as i64)
            .bind(worker)
            .bind(lease.as_secs_f64())
            .bind(embedding_type.source_kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        ids.sort_unstable();

        self.load_inputs(embedding_type.source_kind, &ids).await
    }

    async fn persist_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        items: &[ComputedEmbedding],
    ) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let kind = embedding_type.source_kind;
        let ids: Vec<i64> = items
            .iter()
            .map(|i| i.source_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.pool.begin().await?;

        let eligible_sql = match kind {
            SourceKind::Sequence => "SELECT COUNT(*) FROM sequences WHERE id = ANY($1)",
            SourceKind::State => {
                r#"
                SELECT COUNT(*)
                FROM states s
                JOIN structures st ON st.id = s.structure_id
                WHERE s.id = ANY($1) AND st.status = 'complete'
                "#
            }
        };
        let eligible: i64 = sqlx::query_scalar(eligible_sql)
            .bind(ids.as_slice())
            .fetch_one(&mut *tx)
            .await?;
        if eligible as usize != ids.len() {
            return Err(PipelineError::Store(format!(
                "{} of {} {} sources are not eligible for embedding",
                ids.len() - eligible as usize,
                ids.len(),
                kind.as_str()
            )));
        }

        let mut created = 0usize;
        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO embeddings (source_kind, source_id, embedding_type_id, vector)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (source_kind, source_id, embedding_type_id) DO NOTHING
                "#,
            )
            .bind(kind.as_str())
            .bind(item.source_id)
            .bind(embedding_type.id)
            .bind(item.vector.as_slice())
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected() as usize;
        }

        sqlx::query(
            r#"
            DELETE FROM embedding_claims
            WHERE source_kind = $1 AND embedding_type_id = $2 AND source_id = ANY($3)
            "#,
        )
        .bind(kind.as_str())
        .bind(embedding_type.id)
        .bind(ids.as_slice())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn release_claims(
        &self,
        embedding_type: &EmbeddingType,
        worker: &str,
        source_ids: &[EntityId],
    ) -> Result<()> {
        if source_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            DELETE FROM embedding_claims
            WHERE source_kind = $1
              AND embedding_type_id = $2
              AND worker_id = $3
              AND source_id = ANY($4)
            "#,
        )
        .bind(embedding_type.source_kind.as_str())
        .bind(embedding_type.id)
        .bind(worker)
        .bind(source_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_embeddings(&self, embedding_type: &EmbeddingType) -> Result<Vec<Embedding>> {
        let rows: Vec<EmbeddingRow> = sqlx::query_as(
            r#"
            SELECT id, source_kind, source_id, embedding_type_id, vector
            FROM embeddings
            WHERE embedding_type_id = $1
            ORDER BY id
            "#,
        )
        .bind(embedding_type.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Embedding {
                id: row.id,
                source_kind: SourceKind::from(row.source_kind),
                source_id: row.source_id,
                embedding_type_id: row.embedding_type_id,
                vector: row.vector,
            })
            .collect())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM accessions),
                (SELECT COUNT(*) FROM proteins),
                (SELECT COUNT(*) FROM sequences),
                (SELECT COUNT(*) FROM structures),
                (SELECT COUNT(*) FROM chains),
                (SELECT COUNT(*) FROM states),
                (SELECT COUNT(*) FROM go_terms),
                (SELECT COUNT(*) FROM protein_go_annotations),
                (SELECT COUNT(*) FROM embeddings)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(GraphCounts {
            accessions: row.0 as usize,
            proteins: row.1 as usize,
            sequences: row.2 as usize,
            structures: row.3 as usize,
            chains: row.4 as usize,
            states: row.5 as usize,
            go_terms: row.6 as usize,
            annotations: row.7 as usize,
            embeddings: row.8 as usize,
        })
    }
}
