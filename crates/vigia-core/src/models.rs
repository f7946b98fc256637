//! Domain types shared across the pipeline.
//!
//! `DataTable` is the tabular payload every provider returns and the cache
//! persists: an ordered set of columns plus rows of scalar values. The
//! health-data systems themselves are closed enums with their publication
//! metadata attached.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single cell in a dataset row.
///
/// Untagged so the on-disk encoding stays the natural scalar, not an enum
/// wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Convert a JSON scalar; non-scalar values are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Row whose width does not match the table's column count.
#[derive(Debug, Error)]
#[error("row has {got} values but the table has {expected} columns")]
pub struct RowWidthError {
    pub expected: usize,
    pub got: usize,
}

/// An ordered tabular dataset: fixed columns, rows of scalars.
///
/// Rows always have exactly one value per column; the constructors enforce
/// it, so an in-memory table is well-formed by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Internal constructor for call sites whose row widths are fixed by
    /// construction (the demo generator, JSON record conversion).
    pub(crate) fn from_rows_unchecked(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), RowWidthError> {
        if row.len() != self.columns.len() {
            return Err(RowWidthError {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Append a column holding the same value in every row.
    pub fn push_constant_column(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn record_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Whether every row matches the column count. Always true for tables
    /// built through the public constructors; checked on deserialized
    /// payloads, where a mismatch is a corruption signal.
    pub fn is_well_formed(&self) -> bool {
        self.rows.iter().all(|r| r.len() == self.columns.len())
    }

    /// Build a table from a JSON array of flat record objects.
    ///
    /// Columns are the sorted union of the record keys so the layout is
    /// deterministic regardless of response ordering; missing fields become
    /// [`Value::Null`].
    pub fn from_json_records(records: &[serde_json::Value]) -> Self {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for record in records {
            if let Some(map) = record.as_object() {
                names.extend(map.keys().map(String::as_str));
            }
        }
        let columns: Vec<String> = names.into_iter().map(str::to_string).collect();

        let rows: Vec<Vec<Value>> = records
            .iter()
            .filter_map(|r| r.as_object())
            .map(|map| {
                columns
                    .iter()
                    .map(|c| map.get(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self::from_rows_unchecked(columns, rows)
    }

    /// Rows matching `keep`, with the same column layout.
    pub fn filtered(&self, keep: impl Fn(&[Value]) -> bool) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

/// Provenance of a cached dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSource {
    /// Fetched from the real upstream provider.
    ExternalProvider,
    /// Generated under demonstration mode. Never authoritative; consumers
    /// must surface this flag whenever the data is shown.
    Synthetic,
}

impl DataSource {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, DataSource::Synthetic)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::ExternalProvider => write!(f, "external-provider"),
            DataSource::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// The national health-data systems the dashboard tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSystem {
    /// Sistema de Informação sobre Mortalidade (deaths)
    Sim,
    /// Sistema de Informação de Agravos de Notificação (notifiable diseases)
    Sinan,
    /// Sistema de Informações sobre Nascidos Vivos (live births)
    Sinasc,
}

impl HealthSystem {
    pub const ALL: [HealthSystem; 3] = [HealthSystem::Sim, HealthSystem::Sinan, HealthSystem::Sinasc];

    /// Short lowercase identifier, used in dataset keys.
    pub fn sigla(&self) -> &'static str {
        match self {
            HealthSystem::Sim => "sim",
            HealthSystem::Sinan => "sinan",
            HealthSystem::Sinasc => "sinasc",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HealthSystem::Sim => "Sistema de Informação sobre Mortalidade",
            HealthSystem::Sinan => "Sistema de Informação de Agravos de Notificação",
            HealthSystem::Sinasc => "Sistema de Informações sobre Nascidos Vivos",
        }
    }

    /// Calendar years the national extracts are published for.
    pub fn available_years(&self) -> RangeInclusive<i32> {
        match self {
            HealthSystem::Sim => 1996..=2024,
            HealthSystem::Sinan => 2001..=2024,
            HealthSystem::Sinasc => 1994..=2024,
        }
    }

    /// Column carrying the municipality code in this system's extracts.
    /// Mortality keys on the municipality of occurrence, notifications on
    /// the notifying municipality, births on the municipality of birth.
    pub fn municipality_column(&self) -> &'static str {
        match self {
            HealthSystem::Sim => "CODMUNOCOR",
            HealthSystem::Sinan => "ID_MUNICIP",
            HealthSystem::Sinasc => "CODMUNNASC",
        }
    }
}

impl fmt::Display for HealthSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthSystem::Sim => write!(f, "SIM"),
            HealthSystem::Sinan => write!(f, "SINAN"),
            HealthSystem::Sinasc => write!(f, "SINASC"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
