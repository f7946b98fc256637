//! Scheduled refresh of every configured dataset.
//!
//! One run attempts every (system, year) dataset independently: a failed
//! key is logged, recorded in the run summary and its cached entry left
//! untouched; the run always continues to the next key. Only a run where
//! every attempted key fails is escalated, and even then the process stays
//! alive and retries on the next cycle.

mod cadence;

pub use cadence::UpdateCadence;

use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::{error, info, warn};

use crate::cache::{CacheStore, DatasetKey};
use crate::demo;
use crate::models::{DataSource, HealthSystem};
use crate::provider::HealthDataProvider;
use crate::settings::Settings;

// ============================================================================
// Constants
// ============================================================================

/// Runs kept in the in-memory history.
/// Enough for a quarter of weekly cycles without unbounded growth.
const MAX_HISTORY: usize = 16;

// ============================================================================
// Run summary
// ============================================================================

/// One dataset key that failed within a run, with the reason it failed.
#[derive(Debug, Clone)]
pub struct FailedKey {
    pub key: String,
    pub reason: String,
}

/// Result of one complete refresh run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    /// Keys outside a system's published year range; not attempted.
    pub skipped: usize,
    pub failed: Vec<FailedKey>,
    pub total_records: usize,
    /// Entries removed by the post-run retention pass.
    pub pruned: usize,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    /// Every attempted key failed. Escalated in the logs; the next
    /// scheduled cycle is the retry.
    pub fn is_total_failure(&self) -> bool {
        self.succeeded == 0 && !self.failed.is_empty()
    }
}

enum KeyOutcome {
    Succeeded { records: usize },
    Failed { reason: String },
    Skipped,
}

// ============================================================================
// Runner
// ============================================================================

/// Drives refresh runs against a provider and the cache store.
///
/// Demonstration mode is explicit construction-time state (seeded from
/// [`Settings::demo_mode`]), not an ambient global: when enabled, fetches
/// are replaced wholesale by the synthetic generator and every entry is
/// tagged [`DataSource::Synthetic`]. When disabled, provider failures are
/// reported as failures - there is no code path that substitutes synthetic
/// data for a real error.
pub struct UpdateRunner<P> {
    provider: P,
    cache: CacheStore,
    settings: Settings,
    demo_mode: bool,
    history: Vec<RunSummary>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

impl<P: HealthDataProvider> UpdateRunner<P> {
    pub fn new(provider: P, cache: CacheStore, settings: Settings) -> Self {
        let demo_mode = settings.demo_mode;
        Self {
            provider,
            cache,
            settings,
            demo_mode,
            history: Vec::new(),
            last_run: None,
            next_run: None,
        }
    }

    pub fn set_demo_mode(&mut self, enabled: bool) {
        if enabled && !self.demo_mode {
            warn!("demonstration mode enabled; refreshed datasets will be synthetic");
        }
        self.demo_mode = enabled;
    }

    pub fn demo_mode(&self) -> bool {
        self.demo_mode
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn history(&self) -> &[RunSummary] {
        &self.history
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    /// Every dataset key a run covers: systems x municipality x year range.
    pub fn dataset_keys(&self) -> Vec<DatasetKey> {
        let years = self.settings.update.year_range(Utc::now().year());
        let code = self.settings.municipality.ibge_code;
        let mut keys = Vec::with_capacity(HealthSystem::ALL.len() * years.len());
        for system in HealthSystem::ALL {
            for &year in &years {
                keys.push(DatasetKey::new(system, code, year));
            }
        }
        keys
    }

    /// Run one complete refresh cycle and return its summary.
    pub async fn run_once(&mut self) -> RunSummary {
        let started_at = Utc::now();
        let keys = self.dataset_keys();
        info!(
            datasets = keys.len(),
            demo = self.demo_mode,
            "starting refresh run"
        );

        let mut succeeded = 0;
        let mut skipped = 0;
        let mut total_records = 0;
        let mut failed = Vec::new();

        for key in &keys {
            match self.refresh_key(key).await {
                KeyOutcome::Succeeded { records } => {
                    succeeded += 1;
                    total_records += records;
                }
                KeyOutcome::Skipped => skipped += 1,
                KeyOutcome::Failed { reason } => {
                    warn!(key = %key, reason = %reason, "dataset refresh failed; keeping existing entry");
                    failed.push(FailedKey {
                        key: key.id(),
                        reason,
                    });
                }
            }
        }

        // Retention pass; never fatal to the run
        let retention = Duration::days(self.settings.update.retention_days);
        let pruned = match self.cache.prune_older_than(retention) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "cache prune failed");
                0
            }
        };

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            succeeded,
            skipped,
            failed,
            total_records,
            pruned,
        };

        if summary.is_total_failure() {
            error!(
                failed = summary.failed.len(),
                "every dataset failed this run; keeping existing cache, will retry next cycle"
            );
        } else {
            info!(
                succeeded,
                failed = summary.failed.len(),
                skipped,
                records = total_records,
                pruned,
                "refresh run finished"
            );
        }

        self.last_run = Some(summary.finished_at);
        self.history.push(summary.clone());
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
        summary
    }

    /// Refresh a single key. Failures are contained here; nothing an
    /// individual key does can abort the run.
    async fn refresh_key(&mut self, key: &DatasetKey) -> KeyOutcome {
        if !key.system.available_years().contains(&key.year) {
            return KeyOutcome::Skipped;
        }

        let (table, source) = if self.demo_mode {
            (
                demo::generate(key.system, &self.settings.municipality, key.year),
                DataSource::Synthetic,
            )
        } else {
            match self
                .provider
                .fetch(key.system, key.municipality, key.year)
                .await
            {
                Ok(table) => (table, DataSource::ExternalProvider),
                Err(e) => {
                    return KeyOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        if table.is_empty() {
            return KeyOutcome::Failed {
                reason: "provider returned no records".to_string(),
            };
        }

        match self.cache.put(&key.id(), &table, source) {
            Ok(entry) => {
                info!(
                    key = %key,
                    records = entry.metadata.record_count,
                    source = %source,
                    "dataset cached"
                );
                KeyOutcome::Succeeded {
                    records: entry.metadata.record_count,
                }
            }
            Err(e) => KeyOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Resident scheduler: run immediately, then once per cadence firing.
    /// Each firing is a complete, isolated run; a total failure only means
    /// waiting for the next one.
    pub async fn run_scheduled(&mut self, cadence: UpdateCadence) {
        info!(weekday = ?cadence.weekday, time = %cadence.time, "update scheduler started");
        loop {
            self.run_once().await;

            let next = cadence.next_after(Utc::now());
            self.next_run = Some(next);
            info!(next = %next, "next scheduled refresh");

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataTable, Value};
    use crate::provider::ProviderError;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider stub: fails configured (system, year) pairs, records calls.
    struct StubProvider {
        fail: HashSet<(HealthSystem, i32)>,
        fail_all: bool,
        empty: bool,
        calls: Mutex<Vec<(HealthSystem, i32)>>,
    }

    impl StubProvider {
        fn ok() -> Self {
            Self {
                fail: HashSet::new(),
                fail_all: false,
                empty: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_all() -> Self {
            Self {
                fail_all: true,
                ..Self::ok()
            }
        }

        fn failing(pairs: &[(HealthSystem, i32)]) -> Self {
            Self {
                fail: pairs.iter().copied().collect(),
                ..Self::ok()
            }
        }

        fn calls(&self) -> Vec<(HealthSystem, i32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HealthDataProvider for &StubProvider {
        async fn fetch(
            &self,
            system: HealthSystem,
            _municipality: u32,
            year: i32,
        ) -> Result<DataTable, ProviderError> {
            self.calls.lock().unwrap().push((system, year));
            if self.fail_all || self.fail.contains(&(system, year)) {
                return Err(ProviderError::Unavailable("stubbed outage".to_string()));
            }
            if self.empty {
                return Ok(DataTable::new(vec!["ano".to_string()]));
            }
            let mut table = DataTable::new(vec!["ano".to_string(), "valor".to_string()]);
            table
                .push_row(vec![Value::Int(i64::from(year)), Value::Int(1)])
                .unwrap();
            Ok(table)
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        // Short year span keeps runs small; 2022-2024 are published for
        // every system
        settings.update.start_year = 2022;
        settings
    }

    fn runner<'a>(
        provider: &'a StubProvider,
        dir: &TempDir,
        settings: Settings,
    ) -> UpdateRunner<&'a StubProvider> {
        let cache = CacheStore::open(dir.path().join("cache")).unwrap();
        UpdateRunner::new(provider, cache, settings)
    }

    /// Keys of a run that fall inside their system's published years.
    fn attempted_keys(r: &UpdateRunner<&StubProvider>) -> Vec<DatasetKey> {
        r.dataset_keys()
            .into_iter()
            .filter(|k| k.system.available_years().contains(&k.year))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_run_caches_every_attempted_key() {
        let provider = StubProvider::ok();
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&provider, &dir, test_settings());

        let all = runner.dataset_keys();
        let expected = attempted_keys(&runner);
        let summary = runner.run_once().await;

        assert_eq!(summary.succeeded, expected.len());
        assert_eq!(summary.skipped, all.len() - expected.len());
        assert!(summary.failed.is_empty());
        assert!(!summary.is_total_failure());
        for key in expected {
            let entry = runner.cache().get(&key.id()).unwrap().unwrap();
            assert!(!entry.is_synthetic());
        }
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let bad = (HealthSystem::Sim, 2022);
        let provider = StubProvider::failing(&[bad]);
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&provider, &dir, test_settings());

        // Seed the failing key so we can observe it surviving the run
        let bad_key = DatasetKey::new(bad.0, runner.dataset_keys()[0].municipality, bad.1);
        let mut seeded = DataTable::new(vec!["ano".to_string()]);
        seeded.push_row(vec![Value::Int(1999)]).unwrap();
        let before = runner
            .cache()
            .put(&bad_key.id(), &seeded, DataSource::ExternalProvider)
            .unwrap();

        let expected = attempted_keys(&runner);
        let summary = runner.run_once().await;

        assert_eq!(summary.succeeded, expected.len() - 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].key, bad_key.id());
        assert!(!summary.is_total_failure());

        // The failed key's previous entry is untouched
        let after = runner.cache().get(&bad_key.id()).unwrap().unwrap();
        assert_eq!(after.data, seeded);
        assert_eq!(after.metadata.timestamp, before.metadata.timestamp);
    }

    #[tokio::test]
    async fn test_total_failure_preserves_cache_and_runner() {
        let provider = StubProvider::failing_all();
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&provider, &dir, test_settings());

        let summary = runner.run_once().await;
        assert!(summary.is_total_failure());
        assert_eq!(summary.succeeded, 0);
        assert!(runner.cache().list_keys().unwrap().is_empty());

        // The runner keeps working for the next cycle
        let again = runner.run_once().await;
        assert!(again.is_total_failure());
        assert_eq!(runner.history().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_results_count_as_failures() {
        let mut provider = StubProvider::ok();
        provider.empty = true;
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&provider, &dir, test_settings());

        let expected = attempted_keys(&runner);
        let summary = runner.run_once().await;
        assert_eq!(summary.failed.len(), expected.len());
        assert!(summary
            .failed
            .iter()
            .all(|f| f.reason.contains("no records")));
    }

    #[tokio::test]
    async fn test_out_of_range_years_are_skipped() {
        let provider = StubProvider::ok();
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings();
        // A start year no system publishes yet
        settings.update.start_year = Utc::now().year() + 1;
        let mut runner = runner(&provider, &dir, settings);

        // run_once still succeeds with nothing attempted
        let summary = runner.run_once().await;
        assert_eq!(summary.attempted(), 0);
        assert!(!summary.is_total_failure());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_demo_mode_never_touches_provider() {
        let provider = StubProvider::failing_all();
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings();
        settings.demo_mode = true;
        let mut runner = runner(&provider, &dir, settings);

        let expected = attempted_keys(&runner);
        let summary = runner.run_once().await;

        assert_eq!(summary.succeeded, expected.len());
        assert!(provider.calls().is_empty(), "provider must not be called");
        for key in expected {
            let entry = runner.cache().get(&key.id()).unwrap().unwrap();
            assert!(entry.is_synthetic());
        }
    }

    #[tokio::test]
    async fn test_failures_surface_when_demo_mode_off() {
        // The same outage that demo mode would paper over must be reported
        // as a failure when demo mode is disabled.
        let provider = StubProvider::failing_all();
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&provider, &dir, test_settings());
        assert!(!runner.demo_mode());

        let summary = runner.run_once().await;
        assert!(summary.is_total_failure());
        assert!(summary
            .failed
            .iter()
            .all(|f| f.reason.contains("stubbed outage")));
        // Nothing synthetic was written behind the caller's back
        assert!(runner.cache().list_keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_demo_mode_toggles_at_runtime() {
        let provider = StubProvider::failing_all();
        let dir = TempDir::new().unwrap();
        let mut runner = runner(&provider, &dir, test_settings());

        runner.set_demo_mode(true);
        let summary = runner.run_once().await;
        assert!(!summary.is_total_failure());
        assert!(summary.failed.is_empty());

        runner.set_demo_mode(false);
        let summary = runner.run_once().await;
        assert!(summary.is_total_failure());
    }
}
