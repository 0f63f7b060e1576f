// SIRENE domain module
//
// The INSEE SIRENE register publishes two monthly stock files:
// - StockUniteLegale: one row per legal unit, keyed by SIREN (9 digits)
// - StockEtablissement: one row per establishment, keyed by SIRET (14 digits)
//
// Both are large UTF-8 CSV files with camelCase headers. This module only
// knows how to turn one row into a typed entity; reading and persistence live
// in the pipeline module.

pub mod fields;
pub mod models;
pub mod normalizer;

pub use fields::PartialDatePolicy;
pub use models::{EntityKind, Establishment, LegalUnit, SireneRecord};
pub use normalizer::{FieldOptions, FromRawRecord, RawPayloadMode, RecordNormalizer};

/// Reference chunk size for both stock files
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// PostgreSQL accepts at most this many bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;
