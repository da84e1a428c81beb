//! UniProt extraction
//!
//! For every pending accession the extractor fetches the UniProtKB entry and
//! writes, in dependency order:
//!
//! 1. the canonical sequence (deduplicated by checksum)
//! 2. the protein, then the accession → protein links
//! 3. GO terms and protein/term annotations
//! 4. `stub` structures for each PDB cross-reference
//! 5. the accession's `resolved` flag
//!
//! The flag is written last, so an interrupted run picks the accession up
//! again and the upserts above turn into no-ops.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    is_valid_accession, Accession, AccessionFilter, GoEvidence, GoTermDraft, ProteinDraft,
    ResolutionStatus, StructureStub, UpsertOutcome,
};
use crate::report::StageReport;
use crate::sources::{ProteinSource, UniProtRecord};
use crate::store::EntityGraphStore;

pub const ACCESSION: &str = "accession";
pub const SEQUENCE: &str = "sequence";
pub const PROTEIN: &str = "protein";
pub const GO_TERM: &str = "go_term";
pub const ANNOTATION: &str = "annotation";
pub const STRUCTURE: &str = "structure";

pub struct UniProtExtractor {
    store: Arc<dyn EntityGraphStore>,
    source: Arc<dyn ProteinSource>,
    limit: Option<usize>,
    workers: usize,
    reprocess_all: bool,
}

impl UniProtExtractor {
    pub fn new(
        store: Arc<dyn EntityGraphStore>,
        source: Arc<dyn ProteinSource>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            source,
            limit: config.limit_execution,
            workers: config.extraction.workers.max(1),
            reprocess_all: config.extraction.reprocess_all,
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
        let filter = if self.reprocess_all {
            AccessionFilter::All
        } else {
            AccessionFilter::Pending
        };
        let accessions = self.store.list_accessions(filter, self.limit).await?;

        info!(
            accessions = accessions.len(),
            workers = self.workers,
            reprocess_all = self.reprocess_all,
            "Starting UniProt extraction"
        );

        let results: Vec<Result<StageReport>> = stream::iter(accessions)
            .map(|accession| self.process_accession(accession))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut report = StageReport::new("uniprot");
        for result in results {
            report.merge(result?);
        }

        info!(%report, "UniProt extraction finished");
        Ok(report)
    }

    /// Fetch and store one accession. Only storage failures are returned as
    /// errors; fetch and record problems end up in the report.
    async fn process_accession(&self, accession: Accession) -> Result<StageReport> {
        let mut report = StageReport::new("uniprot");
        let code = accession.code.as_str();

        let record = match self.source.fetch_protein(code).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(accession = %code, "Accession not found in UniProt");
                self.store
                    .mark_accession(code, ResolutionStatus::Unresolved)
                    .await?;
                report.fail(ACCESSION, format!("{}: not found", code));
                return Ok(report);
            }
            Err(e @ PipelineError::Upstream { .. }) => {
                warn!(accession = %code, error = %e, "UniProt rejected accession");
                self.store
                    .mark_accession(code, ResolutionStatus::Unresolved)
                    .await?;
                report.fail(ACCESSION, format!("{}: {}", code, e));
                return Ok(report);
            }
            Err(e @ PipelineError::MalformedRecord { .. }) => {
                warn!(accession = %code, error = %e, "Skipping malformed UniProt entry");
                report.skip(ACCESSION, e.to_string());
                return Ok(report);
            }
            Err(e) if e.is_record_level() => {
                warn!(accession = %code, error = %e, "UniProt fetch failed, leaving accession pending");
                report.fail(ACCESSION, format!("{}: {}", code, e));
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        match self.store_record(&accession, &record, &mut report).await {
            Ok(()) => {}
            Err(e @ PipelineError::MalformedRecord { .. }) => {
                warn!(accession = %code, error = %e, "Skipping UniProt entry that cannot be stored");
                report.skip(ACCESSION, format!("{}: {}", code, e));
                return Ok(report);
            }
            Err(e) => return Err(e),
        }

        self.store
            .mark_accession(code, ResolutionStatus::Resolved)
            .await?;
        report.record(ACCESSION, UpsertOutcome::Updated);

        debug!(
            accession = %code,
            protein = %record.accession,
            go_terms = record.go_terms.len(),
            structures = record.structures.len(),
            "Accession resolved"
        );
        Ok(report)
    }

    async fn store_record(
        &self,
        accession: &Accession,
        record: &UniProtRecord,
        report: &mut StageReport,
    ) -> Result<()> {
        let sequence_id = match record.sequence.as_deref() {
            Some(residues) => {
                let upserted = self.store.upsert_sequence(residues).await?;
                report.record(SEQUENCE, upserted.outcome);
                Some(upserted.id)
            }
            None => None,
        };

        let protein = self
            .store
            .upsert_protein(&ProteinDraft {
                accession: record.accession.clone(),
                entry_name: record.entry_name.clone(),
                description: record.description.clone(),
                gene_name: record.gene_name.clone(),
                organism: record.organism.clone(),
                taxonomy_id: record.taxonomy_id,
                sequence_id,
            })
            .await?;
        report.record(PROTEIN, protein.outcome);

        self.store.link_accession(&accession.code, protein.id).await?;

        // The entry may answer for a merged or secondary accession
        if record.accession != accession.code && is_valid_accession(&record.accession) {
            self.store.link_accession(&record.accession, protein.id).await?;
            self.store
                .mark_accession(&record.accession, ResolutionStatus::Resolved)
                .await?;
        }

        for secondary in &record.secondary_accessions {
            if secondary != &accession.code && self.store.accession_exists(secondary).await? {
                self.store.link_accession(secondary, protein.id).await?;
            }
        }

        for go in &record.go_terms {
            let term = self
                .store
                .upsert_go_term(&GoTermDraft {
                    go_id: go.go_id.clone(),
                    name: go.name.clone(),
                    category: go.category,
                })
                .await?;
            report.record(GO_TERM, term.outcome);

            let annotation = self
                .store
                .insert_annotation(
                    protein.id,
                    term.id,
                    &GoEvidence {
                        evidence_code: go.evidence_code.clone(),
                        assigned_by: go.assigned_by.clone(),
                    },
                )
                .await?;
            report.record(ANNOTATION, annotation.outcome);
        }

        for reference in &record.structures {
            let stub = self
                .store
                .upsert_structure_stub(&StructureStub {
                    pdb_id: reference.pdb_id.clone(),
                    protein_id: Some(protein.id),
                    method: reference.method.clone(),
                    resolution: reference.resolution,
                })
                .await?;
            report.record(STRUCTURE, stub.outcome);
        }

        Ok(())
    }
}
