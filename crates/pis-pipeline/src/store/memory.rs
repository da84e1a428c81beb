//! In-memory entity graph
//!
//! Index-based arena behind a single async mutex. Each operation holds the
//! lock for its whole duration, which gives the same atomicity the Postgres
//! store gets from transactions: a claim is a check-and-insert under the lock
//! and a structure bundle becomes visible all at once.

use async_trait::async_trait;
use pis_common::checksum::{normalize_residues, sequence_checksum};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{normalize_pdb_id, EntityGraphStore};
use crate::error::{PipelineError, Result};
use crate::models::{
    is_valid_accession, Accession, AccessionFilter, AccessionSource, Chain, ComputedEmbedding,
    Embedding, EmbeddingInput, EmbeddingType, EmbeddingTypeSpec, EntityId, GoEvidence,
    GoTermDraft, GraphCounts, Protein, ProteinDraft, ResolutionStatus, Sequence, SourceKind,
    State, Structure, StructureBundle, StructureStatus, StructureStub, StructureWriteSummary,
    Upserted,
};

type ClaimKey = (SourceKind, EntityId, EntityId);

#[derive(Debug, Clone)]
struct Lease {
    worker: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct StoredGoTerm {
    id: EntityId,
    draft: GoTermDraft,
}

#[derive(Debug, Clone)]
struct StoredAnnotation {
    id: EntityId,
    protein_id: EntityId,
    go_term_id: EntityId,
    #[allow(dead_code)]
    evidence: GoEvidence,
}

#[derive(Debug, Default)]
struct Graph {
    next_id: EntityId,
    accessions: Vec<Accession>,
    accession_index: HashMap<String, usize>,
    proteins: Vec<Protein>,
    protein_index: HashMap<String, usize>,
    sequences: Vec<Sequence>,
    sequence_index: HashMap<String, usize>,
    go_terms: Vec<StoredGoTerm>,
    go_term_index: HashMap<String, usize>,
    annotations: Vec<StoredAnnotation>,
    structures: Vec<Structure>,
    structure_index: HashMap<String, usize>,
    chains: Vec<Chain>,
    states: Vec<State>,
    embedding_types: Vec<EmbeddingType>,
    embeddings: Vec<Embedding>,
    embedding_index: HashMap<ClaimKey, usize>,
    claims: HashMap<ClaimKey, Lease>,
}

impl Graph {
    fn next_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }

    fn accession_mut(&mut self, code: &str) -> Option<&mut Accession> {
        let idx = *self.accession_index.get(code)?;
        self.accessions.get_mut(idx)
    }

    fn insert_accession(&mut self, code: &str, source: AccessionSource) -> Result<Upserted> {
        if !is_valid_accession(code) {
            return Err(PipelineError::malformed(code, "invalid accession code"));
        }
        if let Some(&idx) = self.accession_index.get(code) {
            return Ok(Upserted::unchanged(self.accessions[idx].id));
        }
        let id = self.next_id();
        self.accession_index
            .insert(code.to_string(), self.accessions.len());
        self.accessions.push(Accession {
            id,
            code: code.to_string(),
            source,
            protein_id: None,
            uniprot_status: ResolutionStatus::Pending,
        });
        Ok(Upserted::created(id))
    }

    fn insert_sequence(&mut self, residues: &str) -> Result<Upserted> {
        let residues = normalize_residues(residues);
        if residues.is_empty() {
            return Err(PipelineError::malformed("sequence", "empty residue string"));
        }
        let checksum = sequence_checksum(&residues);
        if let Some(&idx) = self.sequence_index.get(&checksum) {
            return Ok(Upserted::unchanged(self.sequences[idx].id));
        }
        let id = self.next_id();
        self.sequence_index.insert(checksum.clone(), self.sequences.len());
        self.sequences.push(Sequence {
            id,
            checksum,
            residues,
        });
        Ok(Upserted::created(id))
    }

    fn structure_by_id(&self, id: EntityId) -> Option<&Structure> {
        self.structures.iter().find(|s| s.id == id)
    }

    fn has_embedding(&self, key: &ClaimKey) -> bool {
        self.embedding_index.contains_key(key)
    }

    fn is_leased(&self, key: &ClaimKey, now: Instant) -> bool {
        self.claims
            .get(key)
            .is_some_and(|lease| lease.expires_at > now)
    }

    /// Eligible inputs for a type in id order, before any lease filtering
    fn eligible_inputs(&self, embedding_type: &EmbeddingType) -> Vec<EmbeddingInput> {
        match embedding_type.source_kind {
            SourceKind::Sequence => self
                .sequences
                .iter()
                .map(|s| EmbeddingInput::Sequence {
                    sequence_id: s.id,
                    residues: s.residues.clone(),
                })
                .collect(),
            SourceKind::State => self
                .states
                .iter()
                .filter_map(|state| {
                    let structure = self.structure_by_id(state.structure_id)?;
                    if structure.status != StructureStatus::Complete {
                        return None;
                    }
                    let chain = self.chains.iter().find(|c| c.id == state.chain_id)?;
                    Some(EmbeddingInput::State {
                        state_id: state.id,
                        structure_id: structure.id,
                        pdb_id: structure.pdb_id.clone(),
                        chain_label: chain.label.clone(),
                        model: state.model,
                        ca_trace: state.ca_trace.clone(),
                    })
                })
                .collect(),
        }
    }

    fn source_exists(&self, kind: SourceKind, source_id: EntityId) -> bool {
        match kind {
            SourceKind::Sequence => self.sequences.iter().any(|s| s.id == source_id),
            SourceKind::State => self.states.iter().any(|state| {
                state.id == source_id
                    && self
                        .structure_by_id(state.structure_id)
                        .is_some_and(|s| s.status == StructureStatus::Complete)
            }),
        }
    }
}

/// In-process [`EntityGraphStore`]
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: Mutex<Graph>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn accessions(&self) -> Vec<Accession> {
        self.graph.lock().await.accessions.clone()
    }

    pub async fn proteins(&self) -> Vec<Protein> {
        self.graph.lock().await.proteins.clone()
    }

    pub async fn sequences(&self) -> Vec<Sequence> {
        self.graph.lock().await.sequences.clone()
    }

    pub async fn structures(&self) -> Vec<Structure> {
        self.graph.lock().await.structures.clone()
    }

    pub async fn chains(&self) -> Vec<Chain> {
        self.graph.lock().await.chains.clone()
    }

    pub async fn states(&self) -> Vec<State> {
        self.graph.lock().await.states.clone()
    }

    /// Number of live leases for an embedding type
    pub async fn active_claims(&self, embedding_type_id: EntityId) -> usize {
        let graph = self.graph.lock().await;
        let now = Instant::now();
        graph
            .claims
            .iter()
            .filter(|((_, _, ty), lease)| *ty == embedding_type_id && lease.expires_at > now)
            .count()
    }
}

#[async_trait]
impl EntityGraphStore for MemoryGraphStore {
    async fn upsert_accession(&self, code: &str, source: AccessionSource) -> Result<Upserted> {
        self.graph.lock().await.insert_accession(code, source)
    }

    async fn accession_exists(&self, code: &str) -> Result<bool> {
        Ok(self.graph.lock().await.accession_index.contains_key(code))
    }

    async fn link_accession(&self, code: &str, protein_id: EntityId) -> Result<()> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        if !graph.proteins.iter().any(|p| p.id == protein_id) {
            return Err(PipelineError::Store(format!(
                "cannot link {} to unknown protein {}",
                code, protein_id
            )));
        }
        graph.insert_accession(code, AccessionSource::Uniprot)?;
        if let Some(accession) = graph.accession_mut(code) {
            accession.protein_id = Some(protein_id);
        }
        Ok(())
    }

    async fn mark_accession(&self, code: &str, status: ResolutionStatus) -> Result<()> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        match graph.accession_mut(code) {
            Some(accession) => {
                accession.uniprot_status = status;
                Ok(())
            }
            None => Err(PipelineError::Store(format!("unknown accession {}", code))),
        }
    }

    async fn list_accessions(
        &self,
        filter: AccessionFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Accession>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .accessions
            .iter()
            .filter(|a| match filter {
                AccessionFilter::Pending => a.uniprot_status == ResolutionStatus::Pending,
                AccessionFilter::All => true,
            })
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn upsert_sequence(&self, residues: &str) -> Result<Upserted> {
        self.graph.lock().await.insert_sequence(residues)
    }

    async fn sequence_exists(&self, checksum: &str) -> Result<bool> {
        Ok(self.graph.lock().await.sequence_index.contains_key(checksum))
    }

    async fn upsert_protein(&self, protein: &ProteinDraft) -> Result<Upserted> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        if let Some(seq_id) = protein.sequence_id {
            if !graph.sequences.iter().any(|s| s.id == seq_id) {
                return Err(PipelineError::Store(format!("unknown sequence {}", seq_id)));
            }
        }
        if let Some(&idx) = graph.protein_index.get(&protein.accession) {
            let stored = &mut graph.proteins[idx];
            if stored.fields == *protein {
                return Ok(Upserted::unchanged(stored.id));
            }
            stored.fields = protein.clone();
            return Ok(Upserted::updated(stored.id));
        }
        let id = graph.next_id();
        let idx = graph.proteins.len();
        graph.protein_index.insert(protein.accession.clone(), idx);
        graph.proteins.push(Protein {
            id,
            fields: protein.clone(),
        });
        Ok(Upserted::created(id))
    }

    async fn upsert_go_term(&self, term: &GoTermDraft) -> Result<Upserted> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        if let Some(&idx) = graph.go_term_index.get(&term.go_id) {
            let stored = &mut graph.go_terms[idx];
            if stored.draft == *term {
                return Ok(Upserted::unchanged(stored.id));
            }
            stored.draft = term.clone();
            return Ok(Upserted::updated(stored.id));
        }
        let id = graph.next_id();
        let idx = graph.go_terms.len();
        graph.go_term_index.insert(term.go_id.clone(), idx);
        graph.go_terms.push(StoredGoTerm {
            id,
            draft: term.clone(),
        });
        Ok(Upserted::created(id))
    }

    async fn insert_annotation(
        &self,
        protein_id: EntityId,
        go_term_id: EntityId,
        evidence: &GoEvidence,
    ) -> Result<Upserted> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        if let Some(existing) = graph
            .annotations
            .iter()
            .find(|a| a.protein_id == protein_id && a.go_term_id == go_term_id)
        {
            return Ok(Upserted::unchanged(existing.id));
        }
        let id = graph.next_id();
        graph.annotations.push(StoredAnnotation {
            id,
            protein_id,
            go_term_id,
            evidence: evidence.clone(),
        });
        Ok(Upserted::created(id))
    }

    async fn upsert_structure_stub(&self, stub: &StructureStub) -> Result<Upserted> {
        let pdb_id = normalize_pdb_id(&stub.pdb_id);
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        if let Some(&idx) = graph.structure_index.get(&pdb_id) {
            let stored = &mut graph.structures[idx];
            let mut changed = false;
            if stored.protein_id.is_none() && stub.protein_id.is_some() {
                stored.protein_id = stub.protein_id;
                changed = true;
            }
            if stored.method.is_none() && stub.method.is_some() {
                stored.method = stub.method.clone();
                changed = true;
            }
            if stored.resolution.is_none() && stub.resolution.is_some() {
                stored.resolution = stub.resolution;
                changed = true;
            }
            return Ok(if changed {
                Upserted::updated(stored.id)
            } else {
                Upserted::unchanged(stored.id)
            });
        }
        let id = graph.next_id();
        let idx = graph.structures.len();
        graph.structure_index.insert(pdb_id.clone(), idx);
        graph.structures.push(Structure {
            id,
            pdb_id,
            protein_id: stub.protein_id,
            title: None,
            method: stub.method.clone(),
            resolution: stub.resolution,
            status: StructureStatus::Stub,
        });
        Ok(Upserted::created(id))
    }

    async fn list_structure_stubs(&self, limit: Option<usize>) -> Result<Vec<Structure>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .structures
            .iter()
            .filter(|s| s.status == StructureStatus::Stub)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn mark_structure(&self, pdb_id: &str, status: StructureStatus) -> Result<()> {
        let pdb_id = normalize_pdb_id(pdb_id);
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        let idx = *graph
            .structure_index
            .get(&pdb_id)
            .ok_or_else(|| PipelineError::Store(format!("unknown structure {}", pdb_id)))?;
        graph.structures[idx].status = status;
        Ok(())
    }

    async fn store_structure(&self, bundle: &StructureBundle) -> Result<StructureWriteSummary> {
        let pdb_id = normalize_pdb_id(&bundle.pdb_id);
        let status = bundle.status();
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;

        // Validate everything before the first write so a rejected bundle
        // leaves the graph untouched.
        for chain in &bundle.chains {
            if chain.label.is_empty() {
                return Err(PipelineError::malformed(&pdb_id, "chain without label"));
            }
        }

        let structure_id = match graph.structure_index.get(&pdb_id).copied() {
            Some(idx) => {
                let stored = &mut graph.structures[idx];
                stored.title = bundle.title.clone().or(stored.title.take());
                stored.method = bundle.method.clone().or(stored.method.take());
                stored.resolution = bundle.resolution.or(stored.resolution);
                stored.protein_id = stored.protein_id.or(bundle.protein_id);
                stored.status = status;
                stored.id
            }
            None => {
                let id = graph.next_id();
                let idx = graph.structures.len();
                graph.structure_index.insert(pdb_id.clone(), idx);
                graph.structures.push(Structure {
                    id,
                    pdb_id: pdb_id.clone(),
                    protein_id: bundle.protein_id,
                    title: bundle.title.clone(),
                    method: bundle.method.clone(),
                    resolution: bundle.resolution,
                    status,
                });
                id
            }
        };

        let mut summary = StructureWriteSummary {
            structure_id,
            status,
            chains: 0,
            states: 0,
            sequences_created: 0,
        };

        for chain in &bundle.chains {
            let sequence_id = match chain.residues.as_deref().filter(|r| !r.is_empty()) {
                Some(residues) => {
                    let upserted = graph.insert_sequence(residues)?;
                    if upserted.is_created() {
                        summary.sequences_created += 1;
                    }
                    Some(upserted.id)
                }
                None => None,
            };

            let chain_id = match graph
                .chains
                .iter_mut()
                .find(|c| c.structure_id == structure_id && c.label == chain.label)
            {
                Some(existing) => {
                    existing.sequence_id = sequence_id.or(existing.sequence_id);
                    existing.id
                }
                None => {
                    let id = graph.next_id();
                    graph.chains.push(Chain {
                        id,
                        structure_id,
                        label: chain.label.clone(),
                        sequence_id,
                    });
                    id
                }
            };
            summary.chains += 1;

            for state in &chain.states {
                match graph.states.iter_mut().find(|s| {
                    s.structure_id == structure_id && s.chain_id == chain_id && s.model == state.model
                }) {
                    Some(existing) => existing.ca_trace = state.ca_trace.clone(),
                    None => {
                        let id = graph.next_id();
                        graph.states.push(State {
                            id,
                            structure_id,
                            chain_id,
                            model: state.model,
                            ca_trace: state.ca_trace.clone(),
                        });
                    }
                }
                summary.states += 1;
            }
        }

        Ok(summary)
    }

    async fn register_embedding_type(&self, spec: &EmbeddingTypeSpec) -> Result<EmbeddingType> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        if let Some(existing) = graph.embedding_types.iter().find(|t| t.name == spec.name) {
            return Ok(existing.clone());
        }
        let id = graph.next_id();
        let embedding_type = EmbeddingType {
            id,
            name: spec.name.clone(),
            source_kind: spec.source_kind,
            model_name: spec.model_name.clone(),
            description: spec.description.clone(),
        };
        graph.embedding_types.push(embedding_type.clone());
        Ok(embedding_type)
    }

    async fn embedding_types(&self, kind: SourceKind) -> Result<Vec<EmbeddingType>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .embedding_types
            .iter()
            .filter(|t| t.source_kind == kind)
            .cloned()
            .collect())
    }

    async fn find_missing_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        batch_size: usize,
    ) -> Result<Vec<EmbeddingInput>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .eligible_inputs(embedding_type)
            .into_iter()
            .filter(|input| {
                !graph.has_embedding(&(input.source_kind(), input.source_id(), embedding_type.id))
            })
            .take(batch_size)
            .collect())
    }

    async fn claim_missing_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        batch_size: usize,
        worker: &str,
        lease: Duration,
    ) -> Result<Vec<EmbeddingInput>> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        let now = Instant::now();
        let claimed: Vec<EmbeddingInput> = graph
            .eligible_inputs(embedding_type)
            .into_iter()
            .filter(|input| {
                let key = (input.source_kind(), input.source_id(), embedding_type.id);
                !graph.has_embedding(&key) && !graph.is_leased(&key, now)
            })
            .take(batch_size)
            .collect();

        for input in &claimed {
            graph.claims.insert(
                (input.source_kind(), input.source_id(), embedding_type.id),
                Lease {
                    worker: worker.to_string(),
                    expires_at: now + lease,
                },
            );
        }
        Ok(claimed)
    }

    async fn persist_embeddings(
        &self,
        embedding_type: &EmbeddingType,
        items: &[ComputedEmbedding],
    ) -> Result<usize> {
        let kind = embedding_type.source_kind;
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;

        if let Some(orphan) = items.iter().find(|i| !graph.source_exists(kind, i.source_id)) {
            return Err(PipelineError::Store(format!(
                "{} {} is not an eligible embedding source",
                kind.as_str(),
                orphan.source_id
            )));
        }

        let mut created = 0;
        for item in items {
            let key = (kind, item.source_id, embedding_type.id);
            graph.claims.remove(&key);
            if graph.has_embedding(&key) {
                continue;
            }
            let id = graph.next_id();
            graph.embedding_index.insert(key, graph.embeddings.len());
            graph.embeddings.push(Embedding {
                id,
                source_kind: kind,
                source_id: item.source_id,
                embedding_type_id: embedding_type.id,
                vector: item.vector.clone(),
            });
            created += 1;
        }
        Ok(created)
    }

    async fn release_claims(
        &self,
        embedding_type: &EmbeddingType,
        worker: &str,
        source_ids: &[EntityId],
    ) -> Result<()> {
        let mut guard = self.graph.lock().await;
        let graph = &mut *guard;
        for source_id in source_ids {
            let key = (embedding_type.source_kind, *source_id, embedding_type.id);
            if graph.claims.get(&key).is_some_and(|l| l.worker == worker) {
                graph.claims.remove(&key);
            }
        }
        Ok(())
    }

    async fn list_embeddings(&self, embedding_type: &EmbeddingType) -> Result<Vec<Embedding>> {
        let graph = self.graph.lock().await;
        Ok(graph
            .embeddings
            .iter()
            .filter(|e| e.embedding_type_id == embedding_type.id)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let graph = self.graph.lock().await;
        Ok(GraphCounts {
            accessions: graph.accessions.len(),
            proteins: graph.proteins.len(),
            sequences: graph.sequences.len(),
            structures: graph.structures.len(),
            chains: graph.chains.len(),
            states: graph.states.len(),
            go_terms: graph.go_terms.len(),
            annotations: graph.annotations.len(),
            embeddings: graph.embeddings.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChainDraft, GoCategory, StateDraft};

    fn protein(accession: &str, seq: Option<EntityId>) -> ProteinDraft {
        ProteinDraft {
            accession: accession.to_string(),
            entry_name: format!("{}_HUMAN", accession),
            description: Some("Kinase".to_string()),
            gene_name: None,
            organism: Some("Homo sapiens".to_string()),
            taxonomy_id: Some(9606),
            sequence_id: seq,
        }
    }

    fn bundle(pdb_id: &str, chains: &[(&str, Option<&str>, usize)]) -> StructureBundle {
        StructureBundle {
            pdb_id: pdb_id.to_string(),
            protein_id: None,
            title: Some("TEST".to_string()),
            method: Some("X-RAY DIFFRACTION".to_string()),
            resolution: Some(2.0),
            chains: chains
                .iter()
                .map(|(label, residues, models)| ChainDraft {
                    label: label.to_string(),
                    residues: residues.map(str::to_string),
                    states: (1..=*models as i32)
                        .map(|model| StateDraft {
                            model,
                            ca_trace: vec![[1.0, 2.0, 3.0]],
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    async fn state_type(store: &MemoryGraphStore) -> EmbeddingType {
        store
            .register_embedding_type(&EmbeddingTypeSpec {
                name: "3di".to_string(),
                source_kind: SourceKind::State,
                model_name: "foldseek".to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_accession_upsert_is_idempotent() {
        let store = MemoryGraphStore::new();
        let first = store.upsert_accession("P12345", AccessionSource::Registry).await.unwrap();
        let second = store.upsert_accession("P12345", AccessionSource::Csv).await.unwrap();

        assert!(first.is_created());
        assert_eq!(second, Upserted::unchanged(first.id));
        let stored = store.accessions().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, AccessionSource::Registry);

        assert!(store
            .upsert_accession("BAD", AccessionSource::Registry)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sequence_dedup_by_checksum() {
        let store = MemoryGraphStore::new();
        let a = store.upsert_sequence("MKTAYIAK").await.unwrap();
        let b = store.upsert_sequence("mkta yiak\n").await.unwrap();

        assert!(a.is_created());
        assert_eq!(b, Upserted::unchanged(a.id));
        assert!(store.sequence_exists(&sequence_checksum("MKTAYIAK")).await.unwrap());
        assert_eq!(store.counts().await.unwrap().sequences, 1);
    }

    #[tokio::test]
    async fn test_protein_upsert_outcomes() {
        let store = MemoryGraphStore::new();
        let created = store.upsert_protein(&protein("P12345", None)).await.unwrap();
        let same = store.upsert_protein(&protein("P12345", None)).await.unwrap();

        let mut changed = protein("P12345", None);
        changed.description = Some("Updated kinase".to_string());
        let updated = store.upsert_protein(&changed).await.unwrap();

        assert_eq!(same, Upserted::unchanged(created.id));
        assert_eq!(updated, Upserted::updated(created.id));
        assert_eq!(store.proteins().await[0].fields.description.as_deref(), Some("Updated kinase"));

        assert!(store.upsert_protein(&protein("Q99999", Some(404))).await.is_err());
    }

    #[tokio::test]
    async fn test_annotation_insert_if_absent() {
        let store = MemoryGraphStore::new();
        let p = store.upsert_protein(&protein("P12345", None)).await.unwrap();
        let term = store
            .upsert_go_term(&GoTermDraft {
                go_id: "GO:0005524".to_string(),
                name: Some("ATP binding".to_string()),
                category: Some(GoCategory::MolecularFunction),
            })
            .await
            .unwrap();

        let first = store
            .insert_annotation(p.id, term.id, &GoEvidence::default())
            .await
            .unwrap();
        let second = store
            .insert_annotation(
                p.id,
                term.id,
                &GoEvidence {
                    evidence_code: Some("IEA".to_string()),
                    assigned_by: Some("InterPro".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.id, second.id);
        // Drawn from the same id space as every other entity
        assert_ne!(first.id, p.id);
        assert_ne!(first.id, term.id);
        assert_eq!(store.counts().await.unwrap().annotations, 1);
    }

    #[tokio::test]
    async fn test_store_structure_dedups_chain_sequences() {
        let store = MemoryGraphStore::new();
        store
            .upsert_structure_stub(&StructureStub {
                pdb_id: "1abc".to_string(),
                protein_id: None,
                method: None,
                resolution: None,
            })
            .await
            .unwrap();

        let summary = store
            .store_structure(&bundle("1ABC", &[("A", Some("MKV"), 2), ("B", Some("MKV"), 2)]))
            .await
            .unwrap();

        assert_eq!(summary.status, StructureStatus::Complete);
        assert_eq!((summary.chains, summary.states, summary.sequences_created), (2, 4, 1));
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.structures, counts.chains, counts.states, counts.sequences), (1, 2, 4, 1));
        assert!(store.list_structure_stubs(None).await.unwrap().is_empty());

        // Re-storing the same bundle touches nothing new
        store
            .store_structure(&bundle("1ABC", &[("A", Some("MKV"), 2), ("B", Some("MKV"), 2)]))
            .await
            .unwrap();
        assert_eq!(store.counts().await.unwrap(), counts);
    }

    #[tokio::test]
    async fn test_incomplete_structures_are_not_embeddable() {
        let store = MemoryGraphStore::new();
        let ty = state_type(&store).await;
        store.store_structure(&bundle("2XYZ", &[("A", None, 0)])).await.unwrap();
        store.store_structure(&bundle("3XYZ", &[("A", None, 1)])).await.unwrap();

        let missing = store.find_missing_embeddings(&ty, 10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert!(matches!(&missing[0], EmbeddingInput::State { pdb_id, .. } if pdb_id == "3XYZ"));
    }

    #[tokio::test]
    async fn test_claims_are_exclusive_until_released() {
        let store = MemoryGraphStore::new();
        let ty = state_type(&store).await;
        store.store_structure(&bundle("1ABC", &[("A", None, 3)])).await.unwrap();

        let lease = Duration::from_secs(60);
        let a = store.claim_missing_embeddings(&ty, 2, "w1", lease).await.unwrap();
        let b = store.claim_missing_embeddings(&ty, 2, "w2", lease).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert!(a.iter().all(|x| b.iter().all(|y| x.source_id() != y.source_id())));

        // Another worker's release is ignored
        let ids: Vec<EntityId> = a.iter().map(|i| i.source_id()).collect();
        store.release_claims(&ty, "w2", &ids).await.unwrap();
        assert_eq!(store.active_claims(ty.id).await, 3);

        store.release_claims(&ty, "w1", &ids).await.unwrap();
        let again = store.claim_missing_embeddings(&ty, 5, "w3", lease).await.unwrap();
        assert_eq!(again.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_reclaimable() {
        let store = MemoryGraphStore::new();
        let ty = state_type(&store).await;
        store.store_structure(&bundle("1ABC", &[("A", None, 1)])).await.unwrap();

        let lease = Duration::from_secs(30);
        assert_eq!(store.claim_missing_embeddings(&ty, 1, "w1", lease).await.unwrap().len(), 1);
        assert!(store.claim_missing_embeddings(&ty, 1, "w2", lease).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.claim_missing_embeddings(&ty, 1, "w2", lease).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_is_insert_if_absent_and_checks_source() {
        let store = MemoryGraphStore::new();
        let ty = state_type(&store).await;
        store.store_structure(&bundle("1ABC", &[("A", None, 1)])).await.unwrap();
        let claimed = store
            .claim_missing_embeddings(&ty, 1, "w1", Duration::from_secs(60))
            .await
            .unwrap();
        let item = ComputedEmbedding {
            source_id: claimed[0].source_id(),
            vector: vec![0.1, 0.2],
        };

        assert_eq!(store.persist_embeddings(&ty, &[item.clone()]).await.unwrap(), 1);
        assert_eq!(store.persist_embeddings(&ty, &[item]).await.unwrap(), 0);
        assert_eq!(store.active_claims(ty.id).await, 0);
        assert!(store.find_missing_embeddings(&ty, 10).await.unwrap().is_empty());

        let orphan = ComputedEmbedding {
            source_id: 9_999,
            vector: vec![0.0],
        };
        assert!(store.persist_embeddings(&ty, &[orphan]).await.is_err());
        assert_eq!(store.counts().await.unwrap().embeddings, 1);
    }
}
