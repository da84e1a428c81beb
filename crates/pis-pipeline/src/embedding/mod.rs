//! Embedding computation
//!
//! Each batch moves through `Selected → Computing → Persisted | Failed`:
//!
//! - **Selected**: entities are leased with `claim_missing_embeddings`, so two
//!   workers (or two processes) never compute the same pair.
//! - **Computing**: the backend returns one outcome per input. A failed item
//!   keeps its lease until the end of the run and is released afterwards, so
//!   the next run retries it.
//! - **Persisted**: successful vectors are inserted-if-absent in one
//!   transaction that also drops their leases.
//!
//! A [`BackendError`] releases the batch, persists nothing and stops every
//! worker of the run.

pub mod backend;
pub mod sequence;
pub mod structure_3di;

pub use backend::{BackendError, EmbeddingBackend, HttpEmbeddingBackend, ItemOutcome};
pub use sequence::SequenceEmbeddingManager;
pub use structure_3di::Structure3DiManager;

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::{
    ComputedEmbedding, EmbeddingInput, EmbeddingType, EmbeddingTypeSpec, EntityId, SourceKind,
};
use crate::report::StageReport;
use crate::store::EntityGraphStore;

/// Report entity for embedding rows
pub const EMBEDDING: &str = "embedding";

/// Pre-flight check run on every claimed input; `Some(reason)` fails the item
/// without sending it to the backend.
pub type InputCheck = fn(&EmbeddingInput) -> Option<String>;

/// `{hostname}-{uuid}` prefix shared by the workers of one manager
fn worker_prefix() -> String {
    let host = hostname::get()
        .unwrap_or_else(|_| "unknown".into())
        .to_string_lossy()
        .to_string();
    format!("{}-{}", host, Uuid::new_v4().simple())
}

/// Take up to `want` units from the shared limit budget
fn reserve(budget: &AtomicUsize, want: usize) -> usize {
    let mut granted = 0;
    let _ = budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
        granted = left.min(want);
        Some(left - granted)
    });
    granted
}

/// Source-kind agnostic embedding manager
pub struct EmbeddingManager {
    store: Arc<dyn EntityGraphStore>,
    backend: Arc<dyn EmbeddingBackend>,
    source_kind: SourceKind,
    stage: &'static str,
    catalog: Vec<EmbeddingTypeSpec>,
    check: Option<InputCheck>,
    limit: Option<usize>,
    workers: usize,
    batch_size: usize,
    lease: Duration,
    worker_prefix: String,
}

impl EmbeddingManager {
    pub fn new(
        store: Arc<dyn EntityGraphStore>,
        backend: Arc<dyn EmbeddingBackend>,
        source_kind: SourceKind,
        stage: &'static str,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            backend,
            source_kind,
            stage,
            catalog: Vec::new(),
            check: None,
            limit: config.limit_execution,
            workers: config.embedding.workers.max(1),
            batch_size: config.embedding.batch_size.max(1),
            lease: config.embedding.lease(),
            worker_prefix: worker_prefix(),
        }
    }

    /// Embedding types to register before the run; specs of another source
    /// kind are ignored.
    pub fn with_catalog(mut self, catalog: &[EmbeddingTypeSpec]) -> Self {
        self.catalog = catalog
            .iter()
            .filter(|spec| spec.source_kind == self.source_kind)
            .cloned()
            .collect();
        self
    }

    pub fn with_input_check(mut self, check: InputCheck) -> Self {
        self.check = Some(check);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub async fn register_catalog(&self) -> Result<Vec<EmbeddingType>> {
        let mut registered = Vec::with_capacity(self.catalog.len());
        for spec in &self.catalog {
            registered.push(self.store.register_embedding_type(spec).await?);
        }
        Ok(registered)
    }

    /// Compute every missing embedding of this manager's source kind.
    ///
    /// The limit budget is shared across embedding types and workers.
    pub async fn start(&self) -> Result<StageReport> {
        self.register_catalog().await?;
        let types = self.store.embedding_types(self.source_kind).await?;

        let mut report = StageReport::new(self.stage);
        if types.is_empty() {
            warn!(
                source_kind = self.source_kind.as_str(),
                "No embedding types registered, nothing to do"
            );
            return Ok(report);
        }

        let budget = AtomicUsize::new(self.limit.unwrap_or(usize::MAX));

        for embedding_type in &types {
            info!(
                embedding_type = %embedding_type.name,
                workers = self.workers,
                batch_size = self.batch_size,
                "Computing embeddings"
            );

            let outcome = self.run_type(embedding_type, &budget, &mut report).await;
            if let Err(e) = outcome {
                warn!(
                    embedding_type = %embedding_type.name,
                    error = %e,
                    %report,
                    "Embedding run aborted"
                );
                return Err(e);
            }

            if budget.load(Ordering::SeqCst) == 0 {
                debug!(limit = ?self.limit, "Embedding limit reached");
                break;
            }
        }

        info!(%report, "Embedding stage finished");
        Ok(report)
    }

    async fn run_type(
        &self,
        embedding_type: &EmbeddingType,
        budget: &AtomicUsize,
        report: &mut StageReport,
    ) -> Result<()> {
        let aborted = AtomicBool::new(false);

        let results = join_all(
            (0..self.workers).map(|n| self.worker_loop(embedding_type, n, budget, &aborted)),
        )
        .await;

        let mut first_error = None;
        for (worker_report, outcome) in results {
            report.merge(worker_report);
            if let Err(e) = outcome {
                // Backend outages win over follow-up store errors
                let replace = first_error.is_none()
                    || matches!(e, PipelineError::BackendUnavailable(_));
                if replace {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn worker_loop(
        &self,
        embedding_type: &EmbeddingType,
        n: usize,
        budget: &AtomicUsize,
        aborted: &AtomicBool,
    ) -> (StageReport, Result<()>) {
        let worker = format!("{}-{}", self.worker_prefix, n);
        let mut report = StageReport::new(self.stage);
        let mut held: Vec<EntityId> = Vec::new();

        let outcome = loop {
            if aborted.load(Ordering::SeqCst) {
                break Ok(());
            }

            let want = reserve(budget, self.batch_size);
            if want == 0 {
                break Ok(());
            }

            let batch = match self
                .store
                .claim_missing_embeddings(embedding_type, want, &worker, self.lease)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    budget.fetch_add(want, Ordering::SeqCst);
                    aborted.store(true, Ordering::SeqCst);
                    break Err(e);
                }
            };
            if batch.len() < want {
                budget.fetch_add(want - batch.len(), Ordering::SeqCst);
            }
            if batch.is_empty() {
                break Ok(());
            }

            match self
                .process_batch(embedding_type, &worker, batch, &mut report, &mut held)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    aborted.store(true, Ordering::SeqCst);
                    break Err(e);
                }
            }
        };

        if !held.is_empty() {
            debug!(worker = %worker, items = held.len(), "Releasing failed items");
            if let Err(e) = self
                .store
                .release_claims(embedding_type, &worker, &held)
                .await
            {
                warn!(
                    worker = %worker,
                    error = %e,
                    "Could not release failed items, leases will expire"
                );
            }
        }

        (report, outcome)
    }

    async fn process_batch(
        &self,
        embedding_type: &EmbeddingType,
        worker: &str,
        batch: Vec<EmbeddingInput>,
        report: &mut StageReport,
        held: &mut Vec<EntityId>,
    ) -> Result<()> {
        let mut inputs = Vec::with_capacity(batch.len());
        for input in batch {
            match self.check.and_then(|check| check(&input)) {
                Some(reason) => {
                    report.fail(
                        EMBEDDING,
                        format!("{} {}: {}", embedding_type.name, input.source_id(), reason),
                    );
                    held.push(input.source_id());
                }
                None => inputs.push(input),
            }
        }
        if inputs.is_empty() {
            return Ok(());
        }

        let ids: Vec<EntityId> = inputs.iter().map(EmbeddingInput::source_id).collect();

        let outcomes = match self.backend.compute(embedding_type, &inputs).await {
            Ok(outcomes) if outcomes.len() == inputs.len() => outcomes,
            Ok(outcomes) => {
                self.release_batch(embedding_type, worker, &ids).await?;
                return Err(BackendError::InvalidResponse(format!(
                    "expected {} outcomes, got {}",
                    inputs.len(),
                    outcomes.len()
                ))
                .into());
            }
            Err(e) => {
                warn!(
                    embedding_type = %embedding_type.name,
                    items = ids.len(),
                    error = %e,
                    "Backend failed, releasing batch"
                );
                self.release_batch(embedding_type, worker, &ids).await?;
                return Err(e.into());
            }
        };

        let mut computed = Vec::with_capacity(inputs.len());
        for (input, outcome) in inputs.iter().zip(outcomes) {
            match outcome {
                ItemOutcome::Embedded(vector) => computed.push(ComputedEmbedding {
                    source_id: input.source_id(),
                    vector,
                }),
                ItemOutcome::Failed(reason) => {
                    debug!(
                        embedding_type = %embedding_type.name,
                        source_id = input.source_id(),
                        reason = %reason,
                        "Item failed"
                    );
                    report.fail(
                        EMBEDDING,
                        format!("{} {}: {}", embedding_type.name, input.source_id(), reason),
                    );
                    held.push(input.source_id());
                }
            }
        }

        if computed.is_empty() {
            return Ok(());
        }

        let created = match self.store.persist_embeddings(embedding_type, &computed).await {
            Ok(created) => created,
            Err(e) => {
                let pending: Vec<EntityId> = computed.iter().map(|c| c.source_id).collect();
                if let Err(release) = self
                    .store
                    .release_claims(embedding_type, worker, &pending)
                    .await
                {
                    warn!(error = %release, "Could not release unpersisted items");
                }
                return Err(e);
            }
        };

        let counts = report.entry(EMBEDDING);
        counts.created += created as u64;
        counts.unchanged += (computed.len() - created) as u64;

        debug!(
            embedding_type = %embedding_type.name,
            worker = %worker,
            persisted = created,
            "Batch persisted"
        );
        Ok(())
    }

    async fn release_batch(
        &self,
        embedding_type: &EmbeddingType,
        worker: &str,
        ids: &[EntityId],
    ) -> Result<()> {
        self.store.release_claims(embedding_type, worker, ids).await
    }
}
