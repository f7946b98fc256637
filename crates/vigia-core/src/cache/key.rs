//! Dataset key derivation.
//!
//! A key identifies one (system, municipality, year) partition of health
//! data, optionally narrowed by a partition label (a SINAN disease, for
//! example). The derived id is filesystem-safe and deterministic: the same
//! triple always yields the same id, distinct triples always differ.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::HealthSystem;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub system: HealthSystem,
    pub municipality: u32,
    pub year: i32,
    pub partition: Option<String>,
}

impl DatasetKey {
    pub fn new(system: HealthSystem, municipality: u32, year: i32) -> Self {
        Self {
            system,
            municipality,
            year,
            partition: None,
        }
    }

    /// Narrow the key to a sub-partition, e.g. a single notifiable disease.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// The cache id for this key, e.g. `sim_2601201_2023` or
    /// `sinan_2601201_2023_dengue`.
    ///
    /// Siglas contain no separator and the numeric fields are fixed, so two
    /// distinct (system, municipality, year) triples can never collide.
    pub fn id(&self) -> String {
        let base = format!(
            "{}_{}_{}",
            self.system.sigla(),
            self.municipality,
            self.year
        );
        match &self.partition {
            Some(p) => format!("{}_{}", base, sanitize(p)),
            None => base,
        }
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Lowercase the partition label and collapse anything that is not
/// alphanumeric into `_` so it can never escape the cache directory.
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
