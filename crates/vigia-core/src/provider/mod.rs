//! External data-provider interfaces and clients.

mod datasus;
mod error;
mod ibge;

pub use datasus::DatasusClient;
pub use error::ProviderError;
pub use ibge::{IbgeClient, MunicipalityInfo};

use std::future::Future;

use crate::models::{DataTable, HealthSystem};

/// A source of municipal health datasets.
///
/// The update orchestrator is generic over this trait so the refresh
/// protocol can be exercised against a stub provider in tests.
pub trait HealthDataProvider {
    /// Fetch one (system, municipality, year) dataset.
    fn fetch(
        &self,
        system: HealthSystem,
        municipality: u32,
        year: i32,
    ) -> impl Future<Output = Result<DataTable, ProviderError>> + Send;
}
