//! Extraction stages
//!
//! ```text
//! AccessionManager  -> accessions (registry pages, CSV)
//! UniProtExtractor  -> proteins, sequences, GO terms, annotations, structure stubs
//! PdbExtractor      -> structures, chains, chain sequences, states
//! ```
//!
//! Each `start()` is safe to re-invoke: already stored records are matched
//! by natural key and only missing or changed data is written.

pub mod accessions;
pub mod pdb;
pub mod uniprot;

pub use accessions::AccessionManager;
pub use pdb::PdbExtractor;
pub use uniprot::UniProtExtractor;
