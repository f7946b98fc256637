//! Core library for the vigia epidemiological-surveillance pipeline.
//!
//! This crate provides the data plumbing behind the municipal dashboard:
//! - Typed tabular datasets fetched from the national health-data systems
//!   (SIM mortality, SINAN notifiable diseases, SINASC live births)
//! - A durable, access-restricted on-disk cache with per-entry metadata
//! - An update orchestrator that refreshes every configured dataset on a
//!   weekly cadence with per-key failure isolation
//! - A demonstration mode that substitutes clearly-flagged synthetic data
//!
//! # Cache layout
//!
//! Each dataset key owns two artifacts under a single owner-only directory:
//! a MessagePack payload (`<key>.mpk`) and a JSON metadata sidecar
//! (`<key>_meta.json`) recording timestamp, provenance, record count and
//! column names. The payload format carries data only; deserializing it can
//! never execute code.

pub mod cache;
pub mod demo;
pub mod models;
pub mod provider;
pub mod settings;
pub mod update;

// Re-export the main types at crate root
pub use cache::{CacheEntry, CacheError, CacheMetadata, CacheStore, DatasetKey};
pub use models::{DataSource, DataTable, HealthSystem, Value};
pub use provider::{DatasusClient, HealthDataProvider, IbgeClient, ProviderError};
pub use settings::Settings;
pub use update::{RunSummary, UpdateCadence, UpdateRunner};
