use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GlmError;
use crate::record::Dataset;

pub mod json;
#[cfg(feature = "netcdf")]
pub mod nc;

pub use json::JsonCodec;

/// Reads one staged file into a dataset. Implementations own any file
/// handle only for the duration of the call.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Dataset, GlmError>;
}

/// Serializes a merged dataset, keeping dimensions, variables and
/// attributes.
pub trait ArtifactWriter: Send + Sync {
    fn extension(&self) -> &'static str;
    fn write(&self, path: &Path, dataset: &Dataset) -> Result<(), GlmError>;
}

pub trait RecordCodec: RecordDecoder + ArtifactWriter {}

impl<T: RecordDecoder + ArtifactWriter> RecordCodec for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Json,
    Netcdf,
}

impl Default for RecordFormat {
    fn default() -> Self {
        if cfg!(feature = "netcdf") {
            RecordFormat::Netcdf
        } else {
            RecordFormat::Json
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFormat::Json => write!(f, "json"),
            RecordFormat::Netcdf => write!(f, "netcdf"),
        }
    }
}

pub fn codec_for(format: RecordFormat) -> Result<Box<dyn RecordCodec>, GlmError> {
    match format {
        RecordFormat::Json => Ok(Box::new(JsonCodec)),
        #[cfg(feature = "netcdf")]
        RecordFormat::Netcdf => Ok(Box::new(nc::NetcdfCodec)),
        #[cfg(not(feature = "netcdf"))]
        RecordFormat::Netcdf => Err(GlmError::UnsupportedFormat(format.to_string())),
    }
}

/// Picks the codec from an artifact's file extension.
pub fn codec_for_path(path: &Path) -> Result<Box<dyn RecordCodec>, GlmError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => codec_for(RecordFormat::Json),
        Some("nc") => codec_for(RecordFormat::Netcdf),
        other => Err(GlmError::UnsupportedFormat(format!(
            "unknown artifact extension {:?}",
            other.unwrap_or("")
        ))),
    }
}
