//! RCSB coordinate download adapter

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::http::RetryingClient;
use super::pdb_format::parse_pdb;
use super::{PdbEntry, StructureSource};
use crate::config::PdbConstants;
use crate::error::Result;

pub struct RcsbClient {
    client: Arc<RetryingClient>,
    constants: PdbConstants,
}

impl RcsbClient {
    pub fn new(client: Arc<RetryingClient>, constants: PdbConstants) -> Self {
        Self { client, constants }
    }

    /// `{download_url}/{ID}.pdb`
    pub fn entry_url(&self, pdb_id: &str) -> String {
        format!(
            "{}/{}.pdb",
            self.constants.download_url.trim_end_matches('/'),
            pdb_id.trim().to_ascii_uppercase()
        )
    }
}

#[async_trait]
impl StructureSource for RcsbClient {
    async fn fetch_structure(&self, pdb_id: &str) -> Result<Option<PdbEntry>> {
        let url = self.entry_url(pdb_id);
        let Some(fetched) = self.client.get(&url).await? else {
            return Ok(None);
        };

        let entry = parse_pdb(pdb_id, &fetched.body)?;
        debug!(
            pdb_id = %entry.id,
            models = entry.models.len(),
            bytes = fetched.body.len(),
            "Parsed coordinate file"
        );
        Ok(Some(entry))
    }
}
