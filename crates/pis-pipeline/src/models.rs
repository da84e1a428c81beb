//! Entity graph data model
//!
//! Natural keys: `Accession.code`, `Protein.accession`, `Sequence.checksum`,
//! `Structure.pdb_id`, `(structure, label)` for chains,
//! `(structure, chain, model)` for states, `GoTerm.go_id`,
//! `(protein, go_term)` for annotations, `EmbeddingType.name` and
//! `(source_kind, source_id, embedding_type)` for embeddings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Surrogate key of every stored entity
pub type EntityId = i64;

#[allow(clippy::expect_used)]
static ACCESSION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{6,10}$").expect("accession pattern compiles"));

/// Accession codes are 6 to 10 ASCII alphanumerics.
pub fn is_valid_accession(code: &str) -> bool {
    ACCESSION_CODE.is_match(code)
}

/// Outcome of a natural-key upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Identical data was already stored; nothing was written
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: EntityId,
    pub outcome: UpsertOutcome,
}

impl Upserted {
    pub fn created(id: EntityId) -> Self {
        Self { id, outcome: UpsertOutcome::Created }
    }

    pub fn updated(id: EntityId) -> Self {
        Self { id, outcome: UpsertOutcome::Updated }
    }

    pub fn unchanged(id: EntityId) -> Self {
        Self { id, outcome: UpsertOutcome::Unchanged }
    }

    pub fn is_created(&self) -> bool {
        self.outcome == UpsertOutcome::Created
    }
}

// ============================================================================
// Accessions
// ============================================================================

/// Where an accession code entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessionSource {
    Registry,
    Csv,
    /// Discovered as the primary accession of a UniProt record
    Uniprot,
}

impl AccessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessionSource::Registry => "registry",
            AccessionSource::Csv => "csv",
            AccessionSource::Uniprot => "uniprot",
        }
    }
}

impl From<String> for AccessionSource {
    fn from(s: String) -> Self {
        match s.as_str() {
            "csv" => AccessionSource::Csv,
            "uniprot" => AccessionSource::Uniprot,
            _ => AccessionSource::Registry,
        }
    }
}

/// Per-accession UniProt resolution flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
    Unresolved,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Unresolved => "unresolved",
        }
    }
}

impl From<String> for ResolutionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "resolved" => ResolutionStatus::Resolved,
            "unresolved" => ResolutionStatus::Unresolved,
            _ => ResolutionStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accession {
    pub id: EntityId,
    pub code: String,
    pub source: AccessionSource,
    pub protein_id: Option<EntityId>,
    pub uniprot_status: ResolutionStatus,
}

/// Which accessions the UniProt stage should visit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessionFilter {
    /// Only accessions that were never resolved
    Pending,
    All,
}

// ============================================================================
// Proteins, sequences, GO
// ============================================================================

/// Canonical protein fields; `accession` is the natural key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProteinDraft {
    pub accession: String,
    pub entry_name: String,
    pub description: Option<String>,
    pub gene_name: Option<String>,
    pub organism: Option<String>,
    pub taxonomy_id: Option<i64>,
    pub sequence_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protein {
    pub id: EntityId,
    #[serde(flatten)]
    pub fields: ProteinDraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: EntityId,
    pub checksum: String,
    pub residues: String,
}

/// GO aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoCategory {
    #[serde(rename = "P")]
    BiologicalProcess,
    #[serde(rename = "F")]
    MolecularFunction,
    #[serde(rename = "C")]
    CellularComponent,
}

impl GoCategory {
    pub fn code(&self) -> &'static str {
        match self {
            GoCategory::BiologicalProcess => "P",
            GoCategory::MolecularFunction => "F",
            GoCategory::CellularComponent => "C",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "P" => Some(GoCategory::BiologicalProcess),
            "F" => Some(GoCategory::MolecularFunction),
            "C" => Some(GoCategory::CellularComponent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoTermDraft {
    pub go_id: String,
    pub name: Option<String>,
    pub category: Option<GoCategory>,
}

/// Evidence attached to a protein/GO term pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoEvidence {
    pub evidence_code: Option<String>,
    pub assigned_by: Option<String>,
}

// ============================================================================
// Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureStatus {
    /// Known from a cross-reference, coordinates not fetched yet
    Stub,
    Complete,
    /// Fetched but no chain could be resolved; never embedded
    Incomplete,
}

impl StructureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureStatus::Stub => "stub",
            StructureStatus::Complete => "complete",
            StructureStatus::Incomplete => "incomplete",
        }
    }
}

impl From<String> for StructureStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "complete" => StructureStatus::Complete,
            "incomplete" => StructureStatus::Incomplete,
            _ => StructureStatus::Stub,
        }
    }
}

/// Structure reference found in a UniProt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureStub {
    pub pdb_id: String,
    pub protein_id: Option<EntityId>,
    pub method: Option<String>,
    pub resolution: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub id: EntityId,
    pub pdb_id: String,
    pub protein_id: Option<EntityId>,
    pub title: Option<String>,
    pub method: Option<String>,
    pub resolution: Option<f64>,
    pub status: StructureStatus,
}

/// One (model, chain) coordinate set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDraft {
    pub model: i32,
    /// C-alpha coordinates in residue order
    pub ca_trace: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDraft {
    pub label: String,
    /// One-letter polymer sequence, when residues could be mapped
    pub residues: Option<String>,
    pub states: Vec<StateDraft>,
}

/// Everything the store writes for one structure, in one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBundle {
    pub pdb_id: String,
    pub protein_id: Option<EntityId>,
    pub title: Option<String>,
    pub method: Option<String>,
    pub resolution: Option<f64>,
    pub chains: Vec<ChainDraft>,
}

impl StructureBundle {
    /// A structure is complete once at least one chain carries a state.
    pub fn status(&self) -> StructureStatus {
        if self.chains.iter().any(|c| !c.states.is_empty()) {
            StructureStatus::Complete
        } else {
            StructureStatus::Incomplete
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureWriteSummary {
    pub structure_id: EntityId,
    pub status: StructureStatus,
    pub chains: usize,
    pub states: usize,
    pub sequences_created: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: EntityId,
    pub structure_id: EntityId,
    pub label: String,
    pub sequence_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: EntityId,
    pub structure_id: EntityId,
    pub chain_id: EntityId,
    pub model: i32,
    pub ca_trace: Vec<[f32; 3]>,
}

// ============================================================================
// Embeddings
// ============================================================================

/// Entity kind an embedding type is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sequence,
    State,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sequence => "sequence",
            SourceKind::State => "state",
        }
    }
}

impl From<String> for SourceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "state" => SourceKind::State,
            _ => SourceKind::Sequence,
        }
    }
}

/// Catalog entry as declared in the constants file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingTypeSpec {
    pub name: String,
    pub source_kind: SourceKind,
    pub model_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingType {
    pub id: EntityId,
    pub name: String,
    pub source_kind: SourceKind,
    pub model_name: String,
    pub description: Option<String>,
}

/// A selected source entity, fully materialized for the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingInput {
    Sequence {
        sequence_id: EntityId,
        residues: String,
    },
    State {
        state_id: EntityId,
        structure_id: EntityId,
        pdb_id: String,
        chain_label: String,
        model: i32,
        ca_trace: Vec<[f32; 3]>,
    },
}

impl EmbeddingInput {
    pub fn source_id(&self) -> EntityId {
        match self {
            EmbeddingInput::Sequence { sequence_id, .. } => *sequence_id,
            EmbeddingInput::State { state_id, .. } => *state_id,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match self {
            EmbeddingInput::Sequence { .. } => SourceKind::Sequence,
            EmbeddingInput::State { .. } => SourceKind::State,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedEmbedding {
    pub source_id: EntityId,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: EntityId,
    pub source_kind: SourceKind,
    pub source_id: EntityId,
    pub embedding_type_id: EntityId,
    pub vector: Vec<f32>,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    pub accessions: usize,
    pub proteins: usize,
    pub sequences: usize,
    pub structures: usize,
    pub chains: usize,
    pub states: usize,
    pub go_terms: usize,
    pub annotations: usize,
    pub embeddings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accession_format() {
        assert!(is_valid_accession("P12345"));
        assert!(is_valid_accession("A0A023GPI8"));
        assert!(!is_valid_accession("P1234"));
        assert!(!is_valid_accession("A0A023GPI81"));
        assert!(!is_valid_accession("P12-45"));
        assert!(!is_valid_accession(" P12345"));
    }

    #[test]
    fn test_bundle_status() {
        let mut bundle = StructureBundle {
            pdb_id: "1ABC".to_string(),
            protein_id: None,
            title: None,
            method: None,
            resolution: None,
            chains: vec![ChainDraft {
                label: "A".to_string(),
                residues: None,
                states: vec![],
            }],
        };
        assert_eq!(bundle.status(), StructureStatus::Incomplete);

        bundle.chains[0].states.push(StateDraft {
            model: 1,
            ca_trace: vec![[0.0, 0.0, 0.0]],
        });
        assert_eq!(bundle.status(), StructureStatus::Complete);
    }
}
