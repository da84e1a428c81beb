//! Configuration management
//!
//! Two documents drive a run:
//!
//! - the pipeline config (YAML, overridable with `PIS_*` environment
//!   variables): database connection, `limit_execution`, worker counts;
//! - the constants file it points to: upstream endpoints and the embedding
//!   type catalog.
//!
//! Invalid configuration is fatal before any stage starts.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::models::{EmbeddingTypeSpec, SourceKind};

// ============================================================================
// Defaults
// ============================================================================

/// Default PostgreSQL port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default maximum database connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default attempts per request (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default first backoff delay in milliseconds; doubles on each retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Upper bound for any single backoff or `Retry-After` wait.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default concurrent fetches per extraction stage.
pub const DEFAULT_EXTRACTION_WORKERS: usize = 4;

/// Default concurrent embedding workers.
pub const DEFAULT_EMBEDDING_WORKERS: usize = 2;

/// Default entities per embedding batch.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;

/// Default claim lease in seconds.
pub const DEFAULT_LEASE_SECS: u64 = 600;

/// Default embedding backend request timeout in seconds.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 300;

/// Default location of the pipeline config.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

// ============================================================================
// Pipeline configuration
// ============================================================================

/// The `config` crate lowercases keys, so the `DB_*` names written in the YAML
/// land on the `db_*` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub db_username: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default)]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default)]
    pub db_name: String,

    /// Path to the constants YAML
    #[serde(default)]
    pub constants: PathBuf,

    /// Caps records/entities processed per stage run
    #[serde(default)]
    pub limit_execution: Option<usize>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Bulk accession import consumed by `AccessionManager::start`
    #[serde(default)]
    pub accessions_csv: Option<PathBuf>,

    /// Expected SHA-256 of `accessions_csv`; the import is refused on mismatch
    #[serde(default)]
    pub accessions_csv_sha256: Option<String>,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub extraction: ExtractionSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,
}

fn default_db_port() -> u16 {
    DEFAULT_DB_PORT
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub workers: usize,
    /// Re-extract accessions that were already resolved
    pub reprocess_all: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_EXTRACTION_WORKERS,
            reprocess_all: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub lease_secs: u64,
    /// Model server for `HttpEmbeddingBackend`
    pub backend_url: Option<String>,
    pub backend_timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_EMBEDDING_WORKERS,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            lease_secs: DEFAULT_LEASE_SECS,
            backend_url: None,
            backend_timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
        }
    }
}

impl EmbeddingSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl PipelineConfig {
    /// Load from a YAML file layered with `PIS_*` environment variables
    /// (`PIS_DB_HOST`, `PIS_EMBEDDING__BATCH_SIZE`, ...), then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(environment())
            .build()?;

        let mut config: PipelineConfig = settings.try_deserialize()?;
        config.resolve_constants_path(path);
        config.validate()?;

        tracing::debug!(
            config = %path.display(),
            db_host = %config.db_host,
            db_name = %config.db_name,
            limit_execution = ?config.limit_execution,
            "Pipeline configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate an in-memory YAML document (no environment layer)
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;

        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// A relative `constants` path is taken relative to the config file.
    fn resolve_constants_path(&mut self, config_path: &Path) {
        if self.constants.is_relative() && !self.constants.exists() {
            if let Some(dir) = config_path.parent() {
                let candidate = dir.join(&self.constants);
                if candidate.exists() {
                    self.constants = candidate;
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("DB_USERNAME", &self.db_username),
            ("DB_HOST", &self.db_host),
            ("DB_NAME", &self.db_name),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::Config(format!("{} must be set", key)));
            }
        }

        if self.db_port == 0 {
            return Err(PipelineError::Config("DB_PORT must be greater than 0".to_string()));
        }

        if self.constants.as_os_str().is_empty() {
            return Err(PipelineError::Config("constants path must be set".to_string()));
        }

        if self.max_connections == 0 {
            return Err(PipelineError::Config(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.http.max_attempts == 0 {
            return Err(PipelineError::Config(
                "http.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.extraction.workers == 0 || self.embedding.workers == 0 {
            return Err(PipelineError::Config("worker counts must be greater than 0".to_string()));
        }

        if self.embedding.batch_size == 0 {
            return Err(PipelineError::Config(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.db_password.is_empty() {
            tracing::warn!("DB_PASSWORD is empty - relying on trust or peer authentication");
        }

        Ok(())
    }

    /// PostgreSQL connection options from the `DB_*` fields. Credentials are
    /// passed as-is, never through a URL.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_username)
            .database(&self.db_name);
        if self.db_password.is_empty() {
            options
        } else {
            options.password(&self.db_password)
        }
    }

    pub fn with_limit_execution(mut self, limit: Option<usize>) -> Self {
        if limit.is_some() {
            self.limit_execution = limit;
        }
        self
    }

    /// Load the constants file this config points to
    pub fn load_constants(&self) -> Result<Constants> {
        Constants::load(&self.constants)
    }
}

fn environment() -> Environment {
    Environment::with_prefix("PIS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

// ============================================================================
// Constants
// ============================================================================

/// Upstream endpoints and the embedding type catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constants {
    #[serde(default)]
    pub registry: RegistryConstants,
    #[serde(default)]
    pub uniprot: UniProtConstants,
    #[serde(default)]
    pub pdb: PdbConstants,
    #[serde(default = "default_embedding_types")]
    pub embedding_types: Vec<EmbeddingTypeSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConstants {
    /// UniProtKB search endpoint
    pub search_url: String,
    /// UniProt query language expression selecting the accessions to seed
    pub query: String,
    pub page_size: usize,
}

impl Default for RegistryConstants {
    fn default() -> Self {
        Self {
            search_url: "https://rest.uniprot.org/uniprotkb/search".to_string(),
            query: "(structure_3d:true) AND (reviewed:true)".to_string(),
            page_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniProtConstants {
    /// Entry endpoint; `{base_url}/{accession}.json`
    pub base_url: String,
}

impl Default for UniProtConstants {
    fn default() -> Self {
        Self {
            base_url: "https://rest.uniprot.org/uniprotkb".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdbConstants {
    /// Coordinate download endpoint; `{download_url}/{PDB_ID}.pdb`
    pub download_url: String,
}

impl Default for PdbConstants {
    fn default() -> Self {
        Self {
            download_url: "https://files.rcsb.org/download".to_string(),
        }
    }
}

fn default_embedding_types() -> Vec<EmbeddingTypeSpec> {
    vec![
        EmbeddingTypeSpec {
            name: "esm2-t6-8m".to_string(),
            source_kind: SourceKind::Sequence,
            model_name: "facebook/esm2_t6_8M_UR50D".to_string(),
            description: Some("ESM-2 mean-pooled residue embedding".to_string()),
        },
        EmbeddingTypeSpec {
            name: "3di-v1".to_string(),
            source_kind: SourceKind::State,
            model_name: "foldseek-3di".to_string(),
            description: Some("3Di structural alphabet per state".to_string()),
        },
    ]
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            registry: RegistryConstants::default(),
            uniprot: UniProtConstants::default(),
            pdb: PdbConstants::default(),
            embedding_types: default_embedding_types(),
        }
    }
}

impl Constants {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read constants '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let constants: Constants = serde_yaml::from_str(yaml)?;
        constants.validate()?;
        Ok(constants)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.page_size == 0 {
            return Err(PipelineError::Config(
                "registry.page_size must be greater than 0".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for spec in &self.embedding_types {
            if spec.name.trim().is_empty() {
                return Err(PipelineError::Config("embedding type name cannot be empty".to_string()));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate embedding type '{}'",
                    spec.name
                )));
            }
        }

        Ok(())
    }
}
