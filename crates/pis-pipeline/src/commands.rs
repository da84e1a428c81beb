//! Stage wiring shared by the `pis` binary and the end-to-end tests

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{Constants, PipelineConfig};
use crate::embedding::{
    EmbeddingBackend, HttpEmbeddingBackend, SequenceEmbeddingManager, Structure3DiManager,
};
use crate::error::Result;
use crate::extract::{AccessionManager, PdbExtractor, UniProtExtractor};
use crate::report::StageReport;
use crate::sources::{RcsbClient, RetryingClient, UniProtClient, UniProtRegistry};
use crate::store::EntityGraphStore;

/// Everything a stage needs: configuration, the graph and upstream clients
pub struct Pipeline {
    config: PipelineConfig,
    constants: Constants,
    store: Arc<dyn EntityGraphStore>,
    http: Arc<RetryingClient>,
    backend: Option<Arc<dyn EmbeddingBackend>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        constants: Constants,
        store: Arc<dyn EntityGraphStore>,
    ) -> Result<Self> {
        let http = Arc::new(RetryingClient::new(&config.http)?);
        Ok(Self {
            config,
            constants,
            store,
            http,
            backend: None,
        })
    }

    /// Use this backend instead of the configured model server
    pub fn with_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityGraphStore> {
        &self.store
    }

    fn backend(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        match &self.backend {
            Some(backend) => Ok(backend.clone()),
            None => Ok(Arc::new(HttpEmbeddingBackend::from_settings(
                &self.config.embedding,
            )?)),
        }
    }

    pub async fn accessions(&self, csv: Option<PathBuf>) -> Result<StageReport> {
        let registry = Arc::new(UniProtRegistry::new(
            self.http.clone(),
            self.constants.registry.clone(),
        ));
        let mut manager = AccessionManager::new(self.store.clone(), registry, &self.config);
        if csv.is_some() {
            manager = manager.with_csv(csv);
        }
        manager.start().await.map(StageReport::finished)
    }

    pub async fn uniprot(&self) -> Result<StageReport> {
        let source = Arc::new(UniProtClient::new(
            self.http.clone(),
            self.constants.uniprot.clone(),
        ));
        UniProtExtractor::new(self.store.clone(), source, &self.config)
            .start()
            .await
            .map(StageReport::finished)
    }

    pub async fn pdb(&self) -> Result<StageReport> {
        let source = Arc::new(RcsbClient::new(self.http.clone(), self.constants.pdb.clone()));
        PdbExtractor::new(self.store.clone(), source, &self.config)
            .start()
            .await
            .map(StageReport::finished)
    }

    pub async fn embed_sequences(&self) -> Result<StageReport> {
        SequenceEmbeddingManager::new(self.store.clone(), self.backend()?, &self.config)
            .with_catalog(&self.constants.embedding_types)
            .start()
            .await
            .map(StageReport::finished)
    }

    pub async fn embed_3di(&self) -> Result<StageReport> {
        Structure3DiManager::new(self.store.clone(), self.backend()?, &self.config)
            .with_catalog(&self.constants.embedding_types)
            .start()
            .await
            .map(StageReport::finished)
    }

    /// Every stage in dependency order; stops at the first stage error
    pub async fn run_all(&self) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(5);
        reports.push(self.accessions(None).await?);
        reports.push(self.uniprot().await?);
        reports.push(self.pdb().await?);
        reports.push(self.embed_sequences().await?);
        reports.push(self.embed_3di().await?);

        let counts = self.store.counts().await?;
        info!(?counts, "Pipeline run finished");
        Ok(reports)
    }
}
