//! 3Di embeddings over structure states
//!
//! The structural alphabet is derived from the C-alpha trace of one chain in
//! one model. Only states of `complete` structures are ever selected by the
//! store; the input check below rejects traces too short to describe any
//! local geometry.

use std::sync::Arc;

use super::{EmbeddingBackend, EmbeddingManager};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{EmbeddingInput, EmbeddingTypeSpec, SourceKind};
use crate::report::StageReport;
use crate::store::EntityGraphStore;

/// Residues needed to form the first backbone angle
pub const MIN_TRACE_RESIDUES: usize = 3;

pub fn check_state_input(input: &EmbeddingInput) -> Option<String> {
    let EmbeddingInput::State {
        ca_trace,
        pdb_id,
        chain_label,
        model,
        ..
    } = input
    else {
        return Some("not a state input".to_string());
    };

    if ca_trace.len() < MIN_TRACE_RESIDUES {
        return Some(format!(
            "{}/{}/{}: {} C-alpha atoms, need at least {}",
            pdb_id,
            chain_label,
            model,
            ca_trace.len(),
            MIN_TRACE_RESIDUES
        ));
    }
    if ca_trace.iter().flatten().any(|v| !v.is_finite()) {
        return Some(format!("{}/{}/{}: non-finite coordinate", pdb_id, chain_label, model));
    }
    None
}

pub struct Structure3DiManager {
    inner: EmbeddingManager,
}

impl Structure3DiManager {
    pub fn new(
        store: Arc<dyn EntityGraphStore>,
        backend: Arc<dyn EmbeddingBackend>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            inner: EmbeddingManager::new(store, backend, SourceKind::State, "embed-3di", config)
                .with_input_check(check_state_input),
        }
    }

    pub fn with_catalog(self, catalog: &[EmbeddingTypeSpec]) -> Self {
        Self {
            inner: self.inner.with_catalog(catalog),
        }
    }

    pub fn configure(self, f: impl FnOnce(EmbeddingManager) -> EmbeddingManager) -> Self {
        Self { inner: f(self.inner) }
    }

    pub async fn start(&self) -> Result<StageReport> {
        self.inner.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(trace: Vec<[f32; 3]>) -> EmbeddingInput {
        EmbeddingInput::State {
            state_id: 1,
            structure_id: 1,
            pdb_id: "1ABC".to_string(),
            chain_label: "A".to_string(),
            model: 1,
            ca_trace: trace,
        }
    }

    #[test]
    fn test_short_traces_are_rejected() {
        let ok = state(vec![[0.0, 0.0, 0.0], [3.8, 0.0, 0.0], [7.6, 0.0, 0.0]]);
        assert_eq!(check_state_input(&ok), None);

        let short = state(vec![[0.0, 0.0, 0.0], [3.8, 0.0, 0.0]]);
        assert!(check_state_input(&short)
            .unwrap()
            .contains("1ABC/A/1: 2 C-alpha atoms"));

        let nan = state(vec![[0.0, 0.0, 0.0], [f32::NAN, 0.0, 0.0], [7.6, 0.0, 0.0]]);
        assert!(check_state_input(&nan).is_some());
    }
}
