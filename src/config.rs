use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::codec::RecordFormat;
use crate::domain::BoundingBox;
use crate::error::GlmError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "glm-agg.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub window_capacity: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub source: Option<SourceEntry>,
    #[serde(default)]
    pub format: Option<RecordFormat>,
    #[serde(default)]
    pub event_dimension: Option<String>,
    #[serde(default)]
    pub longitude_variable: Option<String>,
    #[serde(default)]
    pub latitude_variable: Option<String>,
    #[serde(default)]
    pub drop_dimensions: Option<Vec<String>>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub staging_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub multiplier_ms: Option<u64>,
    #[serde(default)]
    pub min_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SourceEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub base_url: String,
    pub product: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://noaa-goes16.s3.amazonaws.com".to_string(),
            product: "GLM-L2-LCFA".to_string(),
        }
    }
}

/// Names inside a decoded record that the filter and merger work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub event_dimension: String,
    pub longitude_variable: String,
    pub latitude_variable: String,
    pub drop_dimensions: Vec<String>,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            event_dimension: "number_of_flashes".to_string(),
            longitude_variable: "flash_lon".to_string(),
            latitude_variable: "flash_lat".to_string(),
            drop_dimensions: default_drop_dimensions(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bbox: BoundingBox,
    pub window_capacity: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub source: SourceConfig,
    pub format: RecordFormat,
    pub layout: RecordLayout,
    pub output_dir: Utf8PathBuf,
    pub staging_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `glm-agg.json` from the working directory when no
    /// path is given. A missing default file means "use defaults".
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GlmError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GlmError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GlmError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GlmError> {
        let bbox = config.bbox.unwrap_or_default();
        bbox.validate()?;

        let window_capacity = config.window_capacity.unwrap_or(30);
        if window_capacity == 0 {
            return Err(GlmError::InvalidConfig(
                "window_capacity must be at least 1".to_string(),
            ));
        }
        let workers = config.workers.unwrap_or(5);
        if workers == 0 {
            return Err(GlmError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }

        let retry = resolve_retry(config.retry.unwrap_or_default())?;

        let defaults = SourceConfig::default();
        let source = match config.source {
            Some(entry) => SourceConfig {
                base_url: entry.base_url.unwrap_or(defaults.base_url),
                product: entry.product.unwrap_or(defaults.product),
            },
            None => defaults,
        };
        let source = SourceConfig {
            base_url: source.base_url.trim_end_matches('/').to_string(),
            product: source.product.trim_matches('/').to_string(),
        };
        if source.product.is_empty() {
            return Err(GlmError::InvalidConfig("source.product is empty".to_string()));
        }

        let layout_defaults = RecordLayout::default();
        let layout = RecordLayout {
            event_dimension: config
                .event_dimension
                .unwrap_or(layout_defaults.event_dimension),
            longitude_variable: config
                .longitude_variable
                .unwrap_or(layout_defaults.longitude_variable),
            latitude_variable: config
                .latitude_variable
                .unwrap_or(layout_defaults.latitude_variable),
            drop_dimensions: config
                .drop_dimensions
                .unwrap_or(layout_defaults.drop_dimensions),
        };
        if layout.drop_dimensions.contains(&layout.event_dimension) {
            return Err(GlmError::InvalidConfig(format!(
                "event dimension {} cannot also be dropped",
                layout.event_dimension
            )));
        }

        let output_dir = Utf8PathBuf::from(
            config
                .output_dir
                .unwrap_or_else(|| "data/goes16/aggregated_glm_files".to_string()),
        );
        let staging_dir = match config.staging_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_staging_dir()?,
        };

        Ok(ResolvedConfig {
            bbox,
            window_capacity,
            workers,
            retry,
            source,
            format: config.format.unwrap_or_default(),
            layout,
            output_dir,
            staging_dir,
        })
    }
}

fn resolve_retry(entry: RetryEntry) -> Result<RetryPolicy, GlmError> {
    let defaults = RetryPolicy::default();
    let policy = RetryPolicy {
        max_attempts: entry.max_attempts.unwrap_or(defaults.max_attempts),
        multiplier: entry
            .multiplier_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.multiplier),
        min_delay: entry
            .min_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.min_delay),
        max_delay: entry
            .max_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay),
    };
    if policy.max_attempts == 0 {
        return Err(GlmError::InvalidConfig(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if policy.min_delay > policy.max_delay {
        return Err(GlmError::InvalidConfig(
            "retry.min_delay_ms exceeds retry.max_delay_ms".to_string(),
        ));
    }
    Ok(policy)
}

pub fn default_drop_dimensions() -> Vec<String> {
    vec!["number_of_events".to_string(), "number_of_groups".to_string()]
}

fn default_staging_dir() -> Result<Utf8PathBuf, GlmError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("glm-aggregator").join("staging"))
                .ok()
        })
        .ok_or_else(|| GlmError::Filesystem("unable to resolve cache directory".to_string()))
}
