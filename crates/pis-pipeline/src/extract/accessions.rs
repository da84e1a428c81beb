//! Accession seeding
//!
//! Accessions enter the graph from two places: the paged registry search and
//! a bulk CSV import. Both go through the same natural-key upsert, so a code
//! seen in both sources is stored once, with the source that saw it first.

use pis_common::checksum::{compute_checksum, verify_file_checksum};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{is_valid_accession, AccessionSource};
use crate::report::StageReport;
use crate::sources::AccessionRegistry;
use crate::store::EntityGraphStore;

/// Report entity for accession rows
pub const ACCESSION: &str = "accession";

/// Report entity for registry pages that could not be fetched
pub const REGISTRY_PAGE: &str = "registry_page";

/// CSV column holding the accession code when a header is present
pub const CSV_ACCESSION_COLUMN: &str = "accession";

pub struct AccessionManager {
    store: Arc<dyn EntityGraphStore>,
    registry: Arc<dyn AccessionRegistry>,
    limit: Option<usize>,
    csv_path: Option<PathBuf>,
    csv_sha256: Option<String>,
}

impl AccessionManager {
    pub fn new(
        store: Arc<dyn EntityGraphStore>,
        registry: Arc<dyn AccessionRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            limit: config.limit_execution,
            csv_path: config.accessions_csv.clone(),
            csv_sha256: config.accessions_csv_sha256.clone(),
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_csv(mut self, path: Option<PathBuf>) -> Self {
        self.csv_path = path;
        self
    }

    pub fn with_csv_checksum(mut self, sha256: Option<String>) -> Self {
        self.csv_sha256 = sha256;
        self
    }

    /// Registry pages first, then the configured CSV import. The limit is one
    /// budget for the whole run; the CSV gets what the registry left over.
    pub async fn start(&self) -> Result<StageReport> {
        let (mut report, taken) = self.fetch_registry(self.limit).await?;

        if let Some(path) = &self.csv_path {
            let remaining = self.limit.map(|limit| limit.saturating_sub(taken));
            if remaining == Some(0) {
                info!(path = %path.display(), "Accession limit used up, skipping CSV import");
            } else {
                let (csv_report, _) = self.import_csv(path, remaining).await?;
                report.merge(csv_report);
            }
        }

        info!(%report, "Accession stage finished");
        Ok(report)
    }

    /// Page through the registry until it is exhausted or the limit is hit.
    ///
    /// A page that still fails after retries ends pagination: the cursor for
    /// the following page is only known from the failed one. Records stored
    /// before the failure stay.
    pub async fn fetch_accessions_from_api(&self) -> Result<StageReport> {
        Ok(self.fetch_registry(self.limit).await?.0)
    }

    async fn fetch_registry(&self, limit: Option<usize>) -> Result<(StageReport, usize)> {
        let mut report = StageReport::new("accessions");
        let mut cursor: Option<String> = None;
        let mut seen = 0usize;
        let mut pages = 0usize;

        'pages: loop {
            let page = match self.registry.fetch_page(cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) if e.is_record_level() => {
                    warn!(page = pages + 1, error = %e, "Registry page failed, stopping pagination");
                    report.fail(REGISTRY_PAGE, format!("page {}: {}", pages + 1, e));
                    break;
                }
                Err(e) => return Err(e),
            };
            pages += 1;

            for record in page.items {
                if limit.is_some_and(|limit| seen >= limit) {
                    debug!(?limit, "Accession limit reached");
                    break 'pages;
                }
                seen += 1;
                self.upsert_code(&record.code, AccessionSource::Registry, &mut report)
                    .await?;
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(pages, records = seen, "Registry pagination finished");
        Ok((report, seen))
    }

    /// Import accession codes from a CSV file.
    ///
    /// When a checksum is pinned the file is verified first and a mismatch
    /// aborts the import. The header row is optional. When the first row has an `accession`
    /// column that column is used, otherwise the first column of every row.
    pub async fn load_accessions_from_csv(&self, path: &Path) -> Result<StageReport> {
        Ok(self.import_csv(path, self.limit).await?.0)
    }

    async fn import_csv(
        &self,
        path: &Path,
        limit: Option<usize>,
    ) -> Result<(StageReport, usize)> {
        let mut report = StageReport::new("accessions");

        match &self.csv_sha256 {
            Some(expected) => {
                verify_file_checksum(path, expected)?;
                info!(path = %path.display(), sha256 = %expected, "Importing verified accession CSV");
            }
            None => {
                let checksum = compute_checksum(&mut File::open(path)?)?;
                info!(path = %path.display(), sha256 = %checksum, "Importing accessions from CSV");
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut column = 0usize;
        let mut seen = 0usize;

        for (row, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(row = row + 1, error = %e, "Unreadable CSV row");
                    report.skip(ACCESSION, format!("row {}: {}", row + 1, e));
                    continue;
                }
            };

            if row == 0 {
                if let Some(idx) = record
                    .iter()
                    .position(|f| f.eq_ignore_ascii_case(CSV_ACCESSION_COLUMN))
                {
                    column = idx;
                    continue;
                }
            }

            let Some(code) = record.get(column).filter(|c| !c.is_empty()) else {
                continue;
            };

            if limit.is_some_and(|limit| seen >= limit) {
                debug!(?limit, "Accession limit reached");
                break;
            }
            seen += 1;
            self.upsert_code(code, AccessionSource::Csv, &mut report).await?;
        }

        info!(path = %path.display(), records = seen, "CSV import finished");
        Ok((report, seen))
    }

    async fn upsert_code(
        &self,
        code: &str,
        source: AccessionSource,
        report: &mut StageReport,
    ) -> Result<()> {
        let code = code.trim();
        if !is_valid_accession(code) {
            warn!(accession = %code, source = source.as_str(), "Rejected invalid accession code");
            report.skip(ACCESSION, format!("invalid accession code '{}'", code));
            return Ok(());
        }

        let upserted = self.store.upsert_accession(code, source).await?;
        report.record(ACCESSION, upserted.outcome);
        Ok(())
    }
}
