//! Shared fixtures for pipeline integration tests
//!
//! Upstream APIs are served by `wiremock`, the graph lives in
//! [`MemoryGraphStore`] and the embedding model is a [`FakeBackend`].

#![allow(dead_code)]

use async_trait::async_trait;
use pis_pipeline::config::{
    Constants, PdbConstants, PipelineConfig, RegistryConstants, UniProtConstants,
};
use pis_pipeline::embedding::{BackendError, EmbeddingBackend, ItemOutcome};
use pis_pipeline::models::{
    ChainDraft, EmbeddingInput, EmbeddingType, EmbeddingTypeSpec, EntityId, SourceKind,
    StateDraft, StructureBundle,
};
use pis_pipeline::store::{EntityGraphStore, MemoryGraphStore};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wiremock::MockServer;

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pis_pipeline=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Valid configuration with fast retries; no database is contacted
pub fn test_config(limit: Option<usize>) -> PipelineConfig {
    let yaml = r#"
DB_USERNAME: test
DB_PASSWORD: test
DB_HOST: localhost
DB_PORT: 5432
DB_NAME: pis_test
constants: constants.yaml
http:
  timeout_secs: 5
  max_attempts: 2
  base_delay_ms: 10
  max_delay_ms: 50
extraction:
  workers: 2
embedding:
  workers: 2
  batch_size: 4
  lease_secs: 60
"#;
    PipelineConfig::from_yaml(yaml)
        .expect("test config is valid")
        .with_limit_execution(limit)
}

/// Constants pointing every upstream at the mock server
pub fn test_constants(server: &MockServer) -> Constants {
    Constants {
        registry: RegistryConstants {
            search_url: format!("{}/uniprotkb/search", server.uri()),
            query: "(reviewed:true)".to_string(),
            page_size: 3,
        },
        uniprot: UniProtConstants {
            base_url: format!("{}/uniprotkb", server.uri()),
        },
        pdb: PdbConstants {
            download_url: format!("{}/download", server.uri()),
        },
        embedding_types: vec![
            EmbeddingTypeSpec {
                name: "esm2-test".to_string(),
                source_kind: SourceKind::Sequence,
                model_name: "esm2".to_string(),
                description: None,
            },
            EmbeddingTypeSpec {
                name: "3di-test".to_string(),
                source_kind: SourceKind::State,
                model_name: "foldseek-3di".to_string(),
                description: None,
            },
        ],
    }
}

pub fn state_type_spec() -> EmbeddingTypeSpec {
    EmbeddingTypeSpec {
        name: "3di-test".to_string(),
        source_kind: SourceKind::State,
        model_name: "foldseek-3di".to_string(),
        description: None,
    }
}

pub fn sequence_type_spec() -> EmbeddingTypeSpec {
    EmbeddingTypeSpec {
        name: "esm2-test".to_string(),
        source_kind: SourceKind::Sequence,
        model_name: "esm2".to_string(),
        description: None,
    }
}

// ============================================================================
// UniProt fixtures
// ============================================================================

/// Registry search page body
pub fn search_page(codes: &[&str]) -> Value {
    json!({
        "results": codes
            .iter()
            .map(|code| json!({"primaryAccession": code}))
            .collect::<Vec<_>>()
    })
}

/// Minimal UniProtKB entry with one GO term and the given PDB references
pub fn uniprot_entry(accession: &str, sequence: &str, pdb_ids: &[&str]) -> Value {
    let mut xrefs = vec![json!({
        "database": "GO",
        "id": "GO:0005739",
        "properties": [
            {"key": "GoTerm", "value": "C:mitochondrion"},
            {"key": "GoEvidenceType", "value": "IEA:UniProtKB-SubCell"}
        ]
    })];
    for pdb_id in pdb_ids {
        xrefs.push(json!({
            "database": "PDB",
            "id": pdb_id,
            "properties": [
                {"key": "Method", "value": "X-ray"},
                {"key": "Resolution", "value": "2.00 A"},
                {"key": "Chains", "value": "A=1-3"}
            ]
        }));
    }

    json!({
        "entryType": "UniProtKB reviewed (Swiss-Prot)",
        "primaryAccession": accession,
        "uniProtkbId": format!("TEST_{}", accession),
        "proteinDescription": {
            "recommendedName": {"fullName": {"value": format!("Protein {}", accession)}}
        },
        "genes": [{"geneName": {"value": "TST"}}],
        "organism": {"scientificName": "Homo sapiens", "taxonId": 9606},
        "sequence": {"value": sequence},
        "uniProtKBCrossReferences": xrefs
    })
}

// ============================================================================
// PDB fixtures
// ============================================================================

const THREE_LETTER: &[(char, &str)] = &[
    ('A', "ALA"),
    ('C', "CYS"),
    ('G', "GLY"),
    ('K', "LYS"),
    ('M', "MET"),
    ('V', "VAL"),
];

fn residue_name(code: char) -> &'static str {
    THREE_LETTER
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or("UNK")
}

/// PDB-format file with one model and one C-alpha per residue
pub fn pdb_file(pdb_id: &str, chains: &[(&str, &str)]) -> String {
    let mut text = format!(
        "HEADER    TEST PROTEIN                            01-JAN-00   {}\n\
         TITLE     TEST STRUCTURE {}\n\
         EXPDTA    X-RAY DIFFRACTION\n\
         REMARK   2 RESOLUTION.    2.00 ANGSTROMS.\n",
        pdb_id, pdb_id
    );
    let mut serial = 1;
    for (label, residues) in chains {
        for (idx, code) in residues.chars().enumerate() {
            let x = idx as f32 * 3.8;
            text.push_str(&format!(
                "ATOM  {:>5}  CA  {:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00           C\n",
                serial,
                residue_name(code),
                label,
                idx + 1,
                x,
                1.0,
                2.0
            ));
            serial += 1;
        }
    }
    text.push_str("END\n");
    text
}

// ============================================================================
// Graph seeding
// ============================================================================

/// C-alpha trace long enough for a 3Di embedding
pub fn trace(len: usize) -> Vec<[f32; 3]> {
    (0..len).map(|i| [i as f32 * 3.8, 0.0, 0.0]).collect()
}

/// Store `n` complete structures, each with one chain and one state
pub async fn seed_states(store: &MemoryGraphStore, n: usize) -> Vec<String> {
    let residues = ["MKV", "GAC", "VVK", "KMA", "CGV", "AAK", "MMG", "GKV"];
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let pdb_id = format!("{}T{:02}", i % 10, i);
        store
            .store_structure(&StructureBundle {
                pdb_id: pdb_id.clone(),
                protein_id: None,
                title: None,
                method: Some("X-ray".to_string()),
                resolution: Some(2.0),
                chains: vec![ChainDraft {
                    label: "A".to_string(),
                    residues: Some(residues[i % residues.len()].to_string()),
                    states: vec![StateDraft {
                        model: 1,
                        ca_trace: trace(3),
                    }],
                }],
            })
            .await
            .expect("seed structure");
        ids.push(pdb_id);
    }
    ids
}

// ============================================================================
// Embedding backend double
// ============================================================================

#[derive(Debug, Clone)]
pub enum BackendMode {
    /// Every item embeds
    Healthy,
    /// Every call fails as a whole
    Down,
    /// Items whose source id is listed fail individually
    FailItems(HashSet<EntityId>),
}

/// Deterministic backend recording every source id it was asked about
pub struct FakeBackend {
    mode: Mutex<BackendMode>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    seen: Mutex<Vec<EntityId>>,
}

impl FakeBackend {
    pub fn new(mode: BackendMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Sleep inside every call so concurrent workers interleave
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_mode(&self, mode: BackendMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn seen(&self) -> Vec<EntityId> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for FakeBackend {
    async fn compute(
        &self,
        _embedding_type: &EmbeddingType,
        inputs: &[EmbeddingInput],
    ) -> Result<Vec<ItemOutcome>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mode = self.mode.lock().unwrap().clone();
        if let BackendMode::Down = mode {
            return Err(BackendError::Unreachable("connection refused".to_string()));
        }

        self.seen
            .lock()
            .unwrap()
            .extend(inputs.iter().map(EmbeddingInput::source_id));

        Ok(inputs
            .iter()
            .map(|input| match &mode {
                BackendMode::FailItems(ids) if ids.contains(&input.source_id()) => {
                    ItemOutcome::Failed("model rejected input".to_string())
                }
                _ => ItemOutcome::Embedded(vec![input.source_id() as f32, 1.0, 2.0]),
            })
            .collect())
    }
}
