//! Client for the IBGE localities and mesh APIs.
//!
//! Supplies the geographic reference data the dashboard's map layers
//! consume: municipality metadata and GeoJSON boundary meshes.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::ProviderError;

/// Base URL for the IBGE localities API.
const LOCALIDADES_BASE_URL: &str = "https://servicodados.ibge.gov.br/api/v1/localidades";

/// Base URL for the IBGE municipal-mesh API (boundary geometry).
const MALHAS_BASE_URL: &str = "https://servicodados.ibge.gov.br/api/v3/malhas";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Municipality record from the localities API.
#[derive(Debug, Clone, Deserialize)]
pub struct MunicipalityInfo {
    pub id: u32,
    pub nome: String,
}

/// Clone is cheap - reqwest::Client shares its connection pool via Arc.
#[derive(Clone)]
pub struct IbgeClient {
    client: Client,
}

impl IbgeClient {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// Reference data for a municipality by IBGE code.
    pub async fn municipality_info(&self, code: u32) -> Result<MunicipalityInfo, ProviderError> {
        let url = format!("{LOCALIDADES_BASE_URL}/municipios/{code}");
        self.get_json(&url).await
    }

    /// Boundary mesh for a municipality, as consumed by map layers.
    pub async fn fetch_boundaries(&self, code: u32) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{MALHAS_BASE_URL}/municipios/{code}?formato=application/json");
        debug!(code, "fetching municipality boundaries");
        self.get_json(&url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}
