//! PDB structure extraction
//!
//! Materializes `stub` structures created from UniProt cross-references.
//! Every coordinate file becomes one [`StructureBundle`]: one chain per chain
//! label, the chain's polymer sequence and one state per (model, chain). The
//! bundle is written in a single transaction.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    ChainDraft, StateDraft, Structure, StructureBundle, StructureStatus, UpsertOutcome,
};
use crate::report::StageReport;
use crate::sources::{PdbEntry, StructureSource};
use crate::store::EntityGraphStore;

pub const STRUCTURE: &str = "structure";
pub const CHAIN: &str = "chain";
pub const STATE: &str = "state";
pub const SEQUENCE: &str = "sequence";

/// Group a parsed entry by chain label.
///
/// The chain sequence comes from the first model the chain appears in;
/// chains without any C-alpha atom are dropped.
pub fn build_bundle(stub: &Structure, entry: PdbEntry) -> StructureBundle {
    let mut chains: Vec<ChainDraft> = Vec::new();

    for model in entry.models {
        for chain in model.chains {
            if chain.ca_trace.is_empty() {
                continue;
            }
            let idx = match chains.iter().position(|c| c.label == chain.label) {
                Some(idx) => idx,
                None => {
                    chains.push(ChainDraft {
                        label: chain.label.clone(),
                        residues: Some(chain.residues.clone()).filter(|r| !r.is_empty()),
                        states: Vec::new(),
                    });
                    chains.len() - 1
                }
            };
            if chains[idx].states.iter().any(|s| s.model == model.number) {
                continue;
            }
            chains[idx].states.push(StateDraft {
                model: model.number,
                ca_trace: chain.ca_trace,
            });
        }
    }

    StructureBundle {
        pdb_id: stub.pdb_id.clone(),
        protein_id: stub.protein_id,
        title: entry.title,
        method: entry.method.or_else(|| stub.method.clone()),
        resolution: entry.resolution.or(stub.resolution),
        chains,
    }
}

pub struct PdbExtractor {
    store: Arc<dyn EntityGraphStore>,
    source: Arc<dyn StructureSource>,
    limit: Option<usize>,
    workers: usize,
}

impl PdbExtractor {
    pub fn new(
        store: Arc<dyn EntityGraphStore>,
        source: Arc<dyn StructureSource>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            source,
            limit: config.limit_execution,
            workers: config.extraction.workers.max(1),
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub async fn start(&self) -> Result<StageReport> {
        let stubs = self.store.list_structure_stubs(self.limit).await?;

        info!(
            structures = stubs.len(),
            workers = self.workers,
            "Starting PDB extraction"
        );

        let results: Vec<Result<StageReport>> = stream::iter(stubs)
            .map(|stub| self.process_structure(stub))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut report = StageReport::new("pdb");
        for result in results {
            report.merge(result?);
        }

        info!(%report, "PDB extraction finished");
        Ok(report)
    }

    async fn process_structure(&self, stub: Structure) -> Result<StageReport> {
        let mut report = StageReport::new("pdb");
        let pdb_id = stub.pdb_id.as_str();

        let entry = match self.source.fetch_structure(pdb_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(pdb_id = %pdb_id, "Structure not found, marking incomplete");
                self.store
                    .mark_structure(pdb_id, StructureStatus::Incomplete)
                    .await?;
                report.fail(STRUCTURE, format!("{}: not found", pdb_id));
                return Ok(report);
            }
            Err(e @ (PipelineError::MalformedRecord { .. } | PipelineError::Upstream { .. })) => {
                warn!(pdb_id = %pdb_id, error = %e, "Unusable coordinate file, marking incomplete");
                self.store
                    .mark_structure(pdb_id, StructureStatus::Incomplete)
                    .await?;
                report.skip(STRUCTURE, e.to_string());
                return Ok(report);
            }
            Err(e) if e.is_record_level() => {
                warn!(pdb_id = %pdb_id, error = %e, "Structure fetch failed, keeping stub");
                report.fail(STRUCTURE, format!("{}: {}", pdb_id, e));
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let bundle = build_bundle(&stub, entry);
        let summary = match self.store.store_structure(&bundle).await {
            Ok(summary) => summary,
            Err(e) if e.is_record_level() => {
                warn!(pdb_id = %pdb_id, error = %e, "Structure bundle rejected");
                self.store
                    .mark_structure(pdb_id, StructureStatus::Incomplete)
                    .await?;
                report.skip(STRUCTURE, e.to_string());
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        if summary.status == StructureStatus::Incomplete {
            warn!(pdb_id = %pdb_id, "No chain could be resolved, structure stored as incomplete");
            report.fail(STRUCTURE, format!("{}: no resolvable chains", pdb_id));
            return Ok(report);
        }

        report.record(STRUCTURE, UpsertOutcome::Updated);
        report.entry(CHAIN).created += summary.chains as u64;
        report.entry(STATE).created += summary.states as u64;
        report.entry(SEQUENCE).created += summary.sequences_created as u64;

        debug!(
            pdb_id = %pdb_id,
            chains = summary.chains,
            states = summary.states,
            "Structure materialized"
        );
        Ok(report)
    }
}
