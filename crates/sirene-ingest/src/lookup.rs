//! Single-record lookup against the remote SIRENE registry
//!
//! Independent from the bulk pipeline: fetches one unit or establishment by
//! its natural key and hands back the raw JSON body untouched.

use reqwest::header::ACCEPT;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sirene::fields;

pub const DEFAULT_BASE_URL: &str = "https://api.insee.fr/api-sirene/3.11";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Invalid {kind} '{value}'")]
    InvalidIdentifier { kind: &'static str, value: String },

    /// The registry answered with a non-success status
    #[error("Registry returned {status} - {body}")]
    Remote {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LookupConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, LookupError> {
        let config = Self {
            base_url: std::env::var("SIRENE_LOOKUP_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timeout_secs: std::env::var("SIRENE_LOOKUP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LookupError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(LookupError::Config(format!(
                "SIRENE_LOOKUP_BASE_URL must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(LookupError::Config(
                "SIRENE_LOOKUP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP client for `/siren/{siren}` and `/siret/{siret}`
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(config: LookupConfig) -> Result<Self, LookupError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("sirene-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Raw JSON for one legal unit
    pub async fn unite_legale(&self, siren: &str) -> Result<String, LookupError> {
        let siren = identifier("siren", siren, 9)?;
        self.fetch(&format!("{}/siren/{siren}", self.base_url)).await
    }

    /// Raw JSON for one establishment
    pub async fn etablissement(&self, siret: &str) -> Result<String, LookupError> {
        let siret = identifier("siret", siret, 14)?;
        self.fetch(&format!("{}/siret/{siret}", self.base_url)).await
    }

    async fn fetch(&self, url: &str) -> Result<String, LookupError> {
        debug!(url, "Registry lookup");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(url, %status, "Registry lookup failed");
            return Err(LookupError::Remote { status, body });
        }

        Ok(body)
    }
}

fn identifier(kind: &'static str, value: &str, len: usize) -> Result<String, LookupError> {
    fields::digits(Some(value), len).ok_or_else(|| LookupError::InvalidIdentifier {
        kind,
        value: value.to_string(),
    })
}
