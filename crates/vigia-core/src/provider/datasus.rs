//! Client for the DATASUS open-data API.
//!
//! Serves the national SIM, SINAN and SINASC record sets as JSON. Extracts
//! are published per state, so responses are filtered down to the configured
//! municipality on the column each system keys on (`CODMUNOCOR` for
//! mortality, `ID_MUNICIP` for notifications, `CODMUNNASC` for births).

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::{HealthDataProvider, ProviderError};
use crate::models::{DataTable, HealthSystem, Value};

// ============================================================================
// Constants
// ============================================================================

/// Base URL for the DATASUS open-data API.
const BASE_URL: &str = "https://apidadosabertos.saude.gov.br";

/// HTTP request timeout in seconds.
/// Extract queries are slow server-side; 30s still fails fast enough for a
/// weekly batch job.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

fn resource_path(system: HealthSystem) -> &'static str {
    match system {
        HealthSystem::Sim => "sim/obitos",
        HealthSystem::Sinan => "sinan/notificacoes",
        HealthSystem::Sinasc => "sinasc/nascidos-vivos",
    }
}

/// API client for the DATASUS open-data service.
/// Clone is cheap - reqwest::Client shares its connection pool via Arc.
#[derive(Clone)]
pub struct DatasusClient {
    client: Client,
    base_url: String,
}

impl DatasusClient {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (mirrors, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_records(&self, url: &str) -> Result<Vec<serde_json::Value>, ProviderError> {
        let mut backoff = INITIAL_BACKOFF_MS;
        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(ProviderError::from_reqwest)?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES
            {
                warn!(url, attempt, "rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff *= 2;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(status, &body));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            return Ok(extract_records(body));
        }
        Err(ProviderError::RateLimited)
    }
}

/// Record sets arrive either as a bare array or wrapped in a single object
/// key (`{"registros": [...]}`), depending on the resource.
fn extract_records(body: serde_json::Value) -> Vec<serde_json::Value> {
    match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                serde_json::Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Municipality codes appear as integers or strings depending on the
/// extract.
fn is_municipality(cell: &Value, code: u32) -> bool {
    match cell {
        Value::Int(i) => *i == i64::from(code),
        Value::Text(s) => s.trim() == code.to_string(),
        _ => false,
    }
}

impl HealthDataProvider for DatasusClient {
    async fn fetch(
        &self,
        system: HealthSystem,
        municipality: u32,
        year: i32,
    ) -> Result<DataTable, ProviderError> {
        let url = format!(
            "{}/{}?codigo_uf={}&ano={}",
            self.base_url,
            resource_path(system),
            municipality / 100_000,
            year
        );
        debug!(system = %system, municipality, year, "fetching dataset");

        let records = self.get_records(&url).await?;
        let table = DataTable::from_json_records(&records);

        let column = system.municipality_column();
        let table = match table.column_index(column) {
            Some(idx) => table.filtered(|row| is_municipality(&row[idx], municipality)),
            None => {
                // Some resources are already municipality-scoped and drop
                // the code column from the extract.
                warn!(system = %system, column, "municipality column absent, keeping all rows");
                table
            }
        };

        debug!(
            system = %system,
            year,
            records = table.record_count(),
            "dataset fetched"
        );
        Ok(table)
    }
}
