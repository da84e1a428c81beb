//! External record sources
//!
//! Each upstream database sits behind a small async trait so managers can be
//! driven by the real HTTP adapters or by test doubles:
//!
//! | Trait | Adapter | Upstream |
//! |---|---|---|
//! | [`AccessionRegistry`] | [`UniProtRegistry`] | UniProtKB search (paged) |
//! | [`ProteinSource`] | [`UniProtClient`] | UniProtKB entry JSON |
//! | [`StructureSource`] | [`RcsbClient`] | RCSB coordinate files |
//!
//! `Ok(None)` always means the upstream answered "not found".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::GoCategory;

pub mod http;
pub mod pdb;
pub mod pdb_format;
pub mod uniprot;

pub use http::{RetryPolicy, RetryingClient};
pub use pdb::RcsbClient;
pub use uniprot::{UniProtClient, UniProtRegistry};

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the following page; `None` on the last page
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessionRecord {
    pub code: String,
}

/// GO cross-reference of a UniProt entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoReference {
    pub go_id: String,
    pub name: Option<String>,
    pub category: Option<GoCategory>,
    pub evidence_code: Option<String>,
    pub assigned_by: Option<String>,
}

/// PDB cross-reference of a UniProt entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdbReference {
    pub pdb_id: String,
    pub method: Option<String>,
    pub resolution: Option<f64>,
    /// Chain/range mapping as published, e.g. `A/B=1-430`
    pub chains: Option<String>,
}

/// Canonical fields extracted from a UniProtKB entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniProtRecord {
    pub accession: String,
    pub secondary_accessions: Vec<String>,
    pub entry_name: String,
    pub description: Option<String>,
    pub gene_name: Option<String>,
    pub organism: Option<String>,
    pub taxonomy_id: Option<i64>,
    pub sequence: Option<String>,
    pub go_terms: Vec<GoReference>,
    pub structures: Vec<PdbReference>,
}

/// C-alpha trace of one chain within one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdbChain {
    pub label: String,
    /// One-letter residues in coordinate order
    pub residues: String,
    pub ca_trace: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdbModel {
    pub number: i32,
    pub chains: Vec<PdbChain>,
}

/// Parsed coordinate entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdbEntry {
    pub id: String,
    pub title: Option<String>,
    pub method: Option<String>,
    pub resolution: Option<f64>,
    pub models: Vec<PdbModel>,
}

#[async_trait]
pub trait AccessionRegistry: Send + Sync {
    /// Fetch the page at `cursor` (`None` for the first page)
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<AccessionRecord>>;
}

#[async_trait]
pub trait ProteinSource: Send + Sync {
    async fn fetch_protein(&self, accession: &str) -> Result<Option<UniProtRecord>>;
}

#[async_trait]
pub trait StructureSource: Send + Sync {
    async fn fetch_structure(&self, pdb_id: &str) -> Result<Option<PdbEntry>>;
}
