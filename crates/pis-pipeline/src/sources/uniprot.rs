//! UniProtKB REST adapters
//!
//! - [`UniProtRegistry`] pages through `/uniprotkb/search` (JSON,
//!   `fields=accession`). The next cursor is the URL in the
//!   `Link: <...>; rel="next"` response header.
//! - [`UniProtClient`] fetches `/uniprotkb/{accession}.json` and extracts the
//!   canonical protein fields plus GO and PDB cross-references.

use async_trait::async_trait;
use pis_common::checksum::normalize_residues;
use regex::Regex;
use reqwest::header::LINK;
use reqwest::Url;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use super::http::RetryingClient;
use super::{
    AccessionRecord, AccessionRegistry, GoReference, Page, PdbReference, ProteinSource,
    UniProtRecord,
};
use crate::config::{RegistryConstants, UniProtConstants};
use crate::error::{PipelineError, Result};
use crate::models::GoCategory;

#[allow(clippy::expect_used)]
static NEXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("link pattern compiles"));

/// Extract the `rel="next"` target from a `Link` header value
pub fn next_link(header: &str) -> Option<String> {
    NEXT_LINK
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    primary_accession: Option<String>,
}

pub struct UniProtRegistry {
    client: Arc<RetryingClient>,
    constants: RegistryConstants,
}

impl UniProtRegistry {
    pub fn new(client: Arc<RetryingClient>, constants: RegistryConstants) -> Self {
        Self { client, constants }
    }

    /// URL of the first search page
    pub fn first_page_url(&self) -> Result<String> {
        let url = Url::parse_with_params(
            &self.constants.search_url,
            &[
                ("query", self.constants.query.as_str()),
                ("format", "json"),
                ("fields", "accession"),
                ("size", &self.constants.page_size.to_string()),
            ],
        )
        .map_err(|e| {
            PipelineError::Config(format!(
                "invalid registry search_url '{}': {}",
                self.constants.search_url, e
            ))
        })?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl AccessionRegistry for UniProtRegistry {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page<AccessionRecord>> {
        let url = match cursor {
            Some(next) => next.to_string(),
            None => self.first_page_url()?,
        };

        let fetched = self
            .client
            .get(&url)
            .await?
            .ok_or_else(|| PipelineError::Upstream {
                url: url.clone(),
                status: 404,
            })?;

        let response: SearchResponse = serde_json::from_str(&fetched.body)
            .map_err(|e| PipelineError::malformed(&url, format!("search response: {}", e)))?;

        let next = fetched
            .headers
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(next_link);

        let items: Vec<AccessionRecord> = response
            .results
            .into_iter()
            .filter_map(|hit| hit.primary_accession)
            .map(|code| AccessionRecord { code })
            .collect();

        debug!(url = %url, records = items.len(), has_next = next.is_some(), "Fetched registry page");

        Ok(Page { items, next })
    }
}

// ============================================================================
// Entry client
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryJson {
    #[serde(default)]
    entry_type: Option<String>,
    primary_accession: Option<String>,
    #[serde(default)]
    secondary_accessions: Vec<String>,
    #[serde(rename = "uniProtkbId")]
    uniprotkb_id: Option<String>,
    #[serde(default)]
    protein_description: Option<ProteinDescriptionJson>,
    #[serde(default)]
    genes: Vec<GeneJson>,
    #[serde(default)]
    organism: Option<OrganismJson>,
    #[serde(default)]
    sequence: Option<SequenceJson>,
    #[serde(default, rename = "uniProtKBCrossReferences")]
    cross_references: Vec<CrossReferenceJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProteinDescriptionJson {
    recommended_name: Option<NameJson>,
    #[serde(default)]
    submission_names: Vec<NameJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameJson {
    full_name: Option<ValueJson>,
}

#[derive(Debug, Deserialize)]
struct ValueJson {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneJson {
    gene_name: Option<ValueJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganismJson {
    scientific_name: Option<String>,
    taxon_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SequenceJson {
    value: String,
}

#[derive(Debug, Deserialize)]
struct CrossReferenceJson {
    database: String,
    id: String,
    #[serde(default)]
    properties: Vec<PropertyJson>,
}

#[derive(Debug, Deserialize)]
struct PropertyJson {
    key: String,
    value: String,
}

impl CrossReferenceJson {
    fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
            .filter(|v| !v.is_empty() && *v != "-")
    }
}

/// `"1.60 A"` → `1.6`; `"-"` and unparsable values → `None`
fn parse_resolution(value: &str) -> Option<f64> {
    value.split_whitespace().next()?.parse().ok()
}

/// `"C:mitochondrion"` → (CellularComponent, "mitochondrion")
fn parse_go_term(value: &str) -> (Option<GoCategory>, Option<String>) {
    match value.split_once(':') {
        Some((code, name)) => match GoCategory::from_code(code) {
            Some(category) => (Some(category), Some(name.to_string())),
            None => (None, Some(value.to_string())),
        },
        None => (None, Some(value.to_string())),
    }
}

/// `"IEA:UniProtKB-SubCell"` → ("IEA", "UniProtKB-SubCell")
fn parse_go_evidence(value: &str) -> (Option<String>, Option<String>) {
    match value.split_once(':') {
        Some((code, source)) => (Some(code.to_string()), Some(source.to_string())),
        None => (Some(value.to_string()), None),
    }
}

/// Turn a UniProtKB entry document into a [`UniProtRecord`].
///
/// Returns `Ok(None)` for inactive (obsolete or merged) entries.
pub fn parse_entry(body: &str) -> Result<Option<UniProtRecord>> {
    let entry: EntryJson = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed("uniprot entry", e.to_string()))?;

    if entry
        .entry_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("inactive"))
    {
        return Ok(None);
    }

    let accession = entry
        .primary_accession
        .ok_or_else(|| PipelineError::malformed("uniprot entry", "missing primaryAccession"))?;
    let entry_name = entry
        .uniprotkb_id
        .ok_or_else(|| PipelineError::malformed(&accession, "missing uniProtkbId"))?;

    let description = entry.protein_description.and_then(|d| {
        d.recommended_name
            .and_then(|n| n.full_name)
            .or_else(|| d.submission_names.into_iter().find_map(|n| n.full_name))
            .map(|v| v.value)
    });

    let gene_name = entry
        .genes
        .into_iter()
        .find_map(|g| g.gene_name)
        .map(|v| v.value);

    let (organism, taxonomy_id) = match entry.organism {
        Some(o) => (o.scientific_name, o.taxon_id),
        None => (None, None),
    };

    let mut go_terms = Vec::new();
    let mut structures = Vec::new();
    for xref in &entry.cross_references {
        match xref.database.as_str() {
            "GO" => {
                let (category, name) = xref.property("GoTerm").map(parse_go_term).unwrap_or_default();
                let (evidence_code, assigned_by) = xref
                    .property("GoEvidenceType")
                    .map(parse_go_evidence)
                    .unwrap_or_default();
                go_terms.push(GoReference {
                    go_id: xref.id.clone(),
                    name,
                    category,
                    evidence_code,
                    assigned_by,
                });
            }
            "PDB" => structures.push(PdbReference {
                pdb_id: xref.id.to_ascii_uppercase(),
                method: xref.property("Method").map(str::to_string),
                resolution: xref.property("Resolution").and_then(parse_resolution),
                chains: xref.property("Chains").map(str::to_string),
            }),
            _ => {}
        }
    }

    Ok(Some(UniProtRecord {
        accession,
        secondary_accessions: entry.secondary_accessions,
        entry_name,
        description,
        gene_name,
        organism,
        taxonomy_id,
        sequence: entry
            .sequence
            .map(|s| s.value)
            .filter(|s| !normalize_residues(s).is_empty()),
        go_terms,
        structures,
    }))
}

pub struct UniProtClient {
    client: Arc<RetryingClient>,
    constants: UniProtConstants,
}

impl UniProtClient {
    pub fn new(client: Arc<RetryingClient>, constants: UniProtConstants) -> Self {
        Self { client, constants }
    }

    pub fn entry_url(&self, accession: &str) -> String {
        format!(
            "{}/{}.json",
            self.constants.base_url.trim_end_matches('/'),
            accession
        )
    }
}

#[async_trait]
impl ProteinSource for UniProtClient {
    async fn fetch_protein(&self, accession: &str) -> Result<Option<UniProtRecord>> {
        let url = self.entry_url(accession);
        match self.client.get(&url).await? {
            Some(fetched) => parse_entry(&fetched.body).map_err(|e| match e {
                PipelineError::MalformedRecord { reason, .. } => {
                    PipelineError::malformed(accession, reason)
                }
                other => other,
            }),
            None => Ok(None),
        }
    }
}
