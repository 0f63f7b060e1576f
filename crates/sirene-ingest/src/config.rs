//! Ingestion configuration
//!
//! Loaded from `SIRENE_*` environment variables (a `.env` file is read by the
//! binary), or assembled with [`IngestConfig::builder`]. CLI flags override
//! individual values after loading.

use std::collections::HashMap;

use crate::error::{IngestError, Result};
use crate::pipeline::reader::ReaderOptions;
use crate::sirene::models::max_columns;
use crate::sirene::{FieldOptions, PartialDatePolicy, RawPayloadMode, DEFAULT_CHUNK_SIZE, MAX_BIND_PARAMS};

/// Settings shared by every ingestion job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Records per chunk (one transaction each)
    pub chunk_size: usize,
    pub reader: ReaderOptions,
    pub fields: FieldOptions,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            reader: ReaderOptions::default(),
            fields: FieldOptions::default(),
        }
    }
}

impl IngestConfig {
    /// Largest chunk whose upsert stays under PostgreSQL's bind limit
    pub fn max_chunk_size() -> usize {
        MAX_BIND_PARAMS / max_columns()
    }

    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let chunk_size = parsed_var("SIRENE_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size);

        let delimiter = match std::env::var("SIRENE_DELIMITER") {
            Ok(value) => parse_delimiter(&value)?,
            Err(_) => defaults.reader.delimiter,
        };

        // Set but empty disables quoting
        let quote = match std::env::var("SIRENE_QUOTE") {
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(single_byte("SIRENE_QUOTE", &value)?),
            Err(_) => defaults.reader.quote,
        };

        let header_lines =
            parsed_var("SIRENE_HEADER_LINES")?.unwrap_or(defaults.reader.header_lines);

        let encoding =
            std::env::var("SIRENE_ENCODING").unwrap_or_else(|_| defaults.reader.encoding.clone());

        let column_overrides = match std::env::var("SIRENE_COLUMNS") {
            Ok(value) => parse_column_overrides(&value)?,
            Err(_) => HashMap::new(),
        };

        let partial_dates = match std::env::var("SIRENE_PARTIAL_DATES") {
            Ok(value) => value.parse::<PartialDatePolicy>().map_err(IngestError::Config)?,
            Err(_) => PartialDatePolicy::default(),
        };

        let raw_payload = match std::env::var("SIRENE_RAW_PAYLOAD") {
            Ok(value) => value.parse::<RawPayloadMode>().map_err(IngestError::Config)?,
            Err(_) => RawPayloadMode::default(),
        };

        let config = Self {
            chunk_size,
            reader: ReaderOptions {
                delimiter,
                quote,
                header_lines,
                encoding,
                column_overrides,
            },
            fields: FieldOptions {
                partial_dates,
                raw_payload,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::config("SIRENE_CHUNK_SIZE must be greater than 0"));
        }

        let max = Self::max_chunk_size();
        if self.chunk_size > max {
            return Err(IngestError::config(format!(
                "SIRENE_CHUNK_SIZE {} exceeds {max}, the largest chunk a single upsert can bind",
                self.chunk_size
            )));
        }

        self.reader.validate()
    }
}

/// `,`, `;`, `|`, or a tab written as `\t` or `tab`
pub fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        other => single_byte("SIRENE_DELIMITER", other.trim()),
    }
}

/// A set variable must parse; an unset one is `None`
fn parsed_var(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            IngestError::config(format!("{name} must be a non-negative integer, got '{value}'"))
        }),
        Err(_) => Ok(None),
    }
}

fn single_byte(name: &str, value: &str) -> Result<u8> {
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(IngestError::config(format!(
            "{name} must be a single ASCII character, got '{value}'"
        ))),
    }
}

/// `canonical=source` pairs separated by commas
fn parse_column_overrides(value: &str) -> Result<HashMap<String, String>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((canonical, source)) if !canonical.trim().is_empty() && !source.trim().is_empty() => {
                Ok((canonical.trim().to_string(), source.trim().to_string()))
            }
            _ => Err(IngestError::config(format!(
                "SIRENE_COLUMNS entry '{pair}' is not of the form canonical=source"
            ))),
        })
        .collect()
}

/// Builder for [`IngestConfig`]
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.config.reader.delimiter = delimiter;
        self
    }

    pub fn quote(mut self, quote: Option<u8>) -> Self {
        self.config.reader.quote = quote;
        self
    }

    pub fn header_lines(mut self, header_lines: usize) -> Self {
        self.config.reader.header_lines = header_lines;
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.config.reader.encoding = encoding.into();
        self
    }

    pub fn column_override(mut self, canonical: impl Into<String>, source: impl Into<String>) -> Self {
        self.config
            .reader
            .column_overrides
            .insert(canonical.into(), source.into());
        self
    }

    pub fn partial_dates(mut self, policy: PartialDatePolicy) -> Self {
        self.config.fields.partial_dates = policy;
        self
    }

    pub fn raw_payload(mut self, mode: RawPayloadMode) -> Self {
        self.config.fields.raw_payload = mode;
        self
    }

    pub fn build(self) -> Result<IngestConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
