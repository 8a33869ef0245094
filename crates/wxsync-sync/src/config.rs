//! Configuration loading: an optional YAML file plus environment overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use wxsync_core::CityId;
use wxsync_fetch::ApiConfig;
use wxsync_normalize::{CatalogueError, CitySelector};
use wxsync_store::{RangeFilter, StoreConfig, StoreError};

pub const DEFAULT_CONFIG_FILE: &str = "wxsync.yaml";

const KNOWN_UNITS: [&str; 3] = ["standard", "metric", "imperial"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("no api key configured (set api.api_key or WXSYNC_API_KEY)")]
    MissingApiKey,
    #[error("unknown unit system {0:?}, expected one of standard, metric, imperial")]
    InvalidUnits(String),
    #[error("no cities configured (set cities or WXSYNC_CITY_IDS)")]
    NoCities,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub fetch_cron: String,
    pub filter_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fetch_cron: "0 0 * * * *".to_string(),
            filter_cron: "0 15 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub store: StoreConfig,
    pub cities: Vec<CitySelector>,
    /// Provider `city.list.json`, needed only for cities given by name.
    pub catalogue_path: Option<PathBuf>,
    pub range_filter: RangeFilter,
    pub schedule: ScheduleConfig,
}

impl SyncConfig {
    /// Load `path`, else `WXSYNC_CONFIG`, else `wxsync.yaml` if present, then
    /// apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("WXSYNC_CONFIG").ok().map(PathBuf::from));
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_yaml_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Override file values with any non-empty variables returned by `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WXSYNC_API_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = get("WXSYNC_API_KEY") {
            self.api.api_key = v;
        }
        if let Some(v) = get("WXSYNC_UNITS") {
            self.api.units = v;
        }
        if let Some(v) = get("WXSYNC_CITY_IDS") {
            self.cities = parse_city_ids(&v)?
                .into_iter()
                .map(CitySelector::Id)
                .collect();
        }
        if let Some(v) = get("DATABASE_URL") {
            self.store.url = Some(v);
        }
        if let Some(v) = get("WXSYNC_DB_HOST") {
            self.store.host = v;
        }
        if let Some(v) = get("WXSYNC_DB_PORT") {
            self.store.port = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "WXSYNC_DB_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("WXSYNC_DB_NAME") {
            self.store.database = v;
        }
        if let Some(v) = get("WXSYNC_DB_USER") {
            self.store.user = v;
        }
        if let Some(v) = get("WXSYNC_DB_PASSWORD") {
            self.store.password = v;
        }
        Ok(())
    }

    /// Everything the fetch pipeline needs before it makes any request.
    pub fn validate_fetch(&self) -> Result<(), ConfigError> {
        if self.api.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if !KNOWN_UNITS.contains(&self.api.units.as_str()) {
            return Err(ConfigError::InvalidUnits(self.api.units.clone()));
        }
        if self.cities.is_empty() {
            return Err(ConfigError::NoCities);
        }
        self.store.validate()?;
        Ok(())
    }

    pub fn validate_filter(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.range_filter.validate()?;
        Ok(())
    }

    pub fn needs_catalogue(&self) -> bool {
        self.cities
            .iter()
            .any(|c| matches!(c, CitySelector::Named { .. }))
    }
}

fn parse_city_ids(raw: &str) -> Result<Vec<CityId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map(CityId)
                .map_err(|_| ConfigError::InvalidEnv {
                    var: "WXSYNC_CITY_IDS",
                    value: raw.to_string(),
                })
        })
        .collect()
}
