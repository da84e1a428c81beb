//! Sequence embeddings, computed once per deduplicated Sequence row.

use std::sync::Arc;

use super::{EmbeddingBackend, EmbeddingManager};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{EmbeddingInput, EmbeddingTypeSpec, SourceKind};
use crate::report::StageReport;
use crate::store::EntityGraphStore;

pub fn check_sequence_input(input: &EmbeddingInput) -> Option<String> {
    let EmbeddingInput::Sequence { residues, .. } = input else {
        return Some("not a sequence input".to_string());
    };
    if residues.is_empty() {
        return Some("empty sequence".to_string());
    }
    residues
        .chars()
        .find(|c| !c.is_ascii_uppercase())
        .map(|c| format!("unexpected residue '{}'", c))
}

pub struct SequenceEmbeddingManager {
    inner: EmbeddingManager,
}

impl SequenceEmbeddingManager {
    pub fn new(
        store: Arc<dyn EntityGraphStore>,
        backend: Arc<dyn EmbeddingBackend>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            inner: EmbeddingManager::new(
                store,
                backend,
                SourceKind::Sequence,
                "embed-sequences",
                config,
            )
            .with_input_check(check_sequence_input),
        }
    }

    pub fn with_catalog(self, catalog: &[EmbeddingTypeSpec]) -> Self {
        Self {
            inner: self.inner.with_catalog(catalog),
        }
    }

    /// Tune the underlying manager (limit, workers, batch size, lease)
    pub fn configure(self, f: impl FnOnce(EmbeddingManager) -> EmbeddingManager) -> Self {
        Self { inner: f(self.inner) }
    }

    pub async fn start(&self) -> Result<StageReport> {
        self.inner.start().await
    }
}
