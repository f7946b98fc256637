//! Runtime settings for the pipeline.
//!
//! Settings are stored as JSON under the user config directory and default
//! to the Arcoverde/PE deployment the dashboard was built for. The cache
//! directory can be redirected with the `VIGIA_CACHE_DIR` environment
//! variable, which takes precedence over the settings file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache/log directory paths
const APP_NAME: &str = "vigia";

/// Settings file name
const SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the cache directory location
const CACHE_DIR_ENV: &str = "VIGIA_CACHE_DIR";

/// The municipality this deployment serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Municipality {
    pub name: String,
    pub uf: String,
    pub ibge_code: u32,
    pub uf_code: u8,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for Municipality {
    fn default() -> Self {
        Self {
            name: "Arcoverde".to_string(),
            uf: "PE".to_string(),
            ibge_code: 2_601_201,
            uf_code: 26,
            latitude: -8.4182,
            longitude: -37.0538,
        }
    }
}

/// Refresh cadence and retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// First calendar year covered by a refresh run.
    pub start_year: i32,
    /// Weekday the scheduled refresh fires on ("sunday"/"domingo", ...).
    pub weekday: String,
    /// Time of day the scheduled refresh fires at, "HH:MM" UTC.
    pub time: String,
    /// Cache entries older than this are pruned after each run.
    pub retention_days: i64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            start_year: 2020,
            weekday: "sunday".to_string(),
            time: "03:00".to_string(),
            retention_days: 90,
        }
    }
}

impl UpdateSettings {
    /// Calendar years one refresh run covers, from the configured start
    /// through the current year.
    pub fn year_range(&self, current_year: i32) -> Vec<i32> {
        (self.start_year..=current_year).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub municipality: Municipality,
    #[serde(default)]
    pub update: UpdateSettings,
    /// Demonstration mode: replace provider fetches with synthetic data.
    /// Off by default; synthetic data is only ever produced when this is
    /// explicitly enabled.
    #[serde(default)]
    pub demo_mode: bool,
    /// Explicit cache directory; overrides the platform default but not the
    /// environment variable.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::read_from(Self::settings_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.write_to(Self::settings_path()?)
    }

    fn read_from(path: PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse settings file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn write_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    fn settings_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(SETTINGS_FILE))
    }

    /// Resolve the cache directory: environment override, then the explicit
    /// setting, then the platform cache directory.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("could not find local data directory"))?;
        Ok(data_dir.join(APP_NAME).join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_describe_arcoverde() {
        let settings = Settings::default();
        assert_eq!(settings.municipality.ibge_code, 2_601_201);
        assert_eq!(settings.municipality.uf, "PE");
        assert!(!settings.demo_mode);
        assert_eq!(settings.update.weekday, "sunday");
        assert_eq!(settings.update.retention_days, 90);
    }

    #[test]
    fn test_year_range_is_inclusive() {
        let update = UpdateSettings {
            start_year: 2021,
            ..UpdateSettings::default()
        };
        assert_eq!(update.year_range(2023), vec![2021, 2022, 2023]);
        assert!(update.year_range(2019).is_empty());
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.demo_mode = true;
        settings.update.start_year = 2018;
        settings.write_to(path.clone()).unwrap();

        let loaded = Settings::read_from(path).unwrap();
        assert!(loaded.demo_mode);
        assert_eq!(loaded.update.start_year, 2018);
        assert_eq!(loaded.municipality.name, "Arcoverde");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = Settings::read_from(dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.municipality.ibge_code, 2_601_201);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"demo_mode": true}"#).unwrap();

        let loaded = Settings::read_from(path).unwrap();
        assert!(loaded.demo_mode);
        assert_eq!(loaded.update.start_year, 2020);
    }
}
