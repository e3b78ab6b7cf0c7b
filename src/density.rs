use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

use crate::codec::codec_for_path;
use crate::config::RecordLayout;
use crate::domain::BoundingBox;
use crate::error::GlmError;
use crate::record::Dataset;

/// Occurrence counts on a regular grid over a bounding box.
///
/// `counts[row][col]` holds latitude bin `row` and longitude bin `col`.
/// Bins are half-open except the last one on each axis, which also takes
/// points sitting exactly on the upper edge. Points outside the box are
/// not counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCounts {
    pub bbox: BoundingBox,
    pub divisions: usize,
    pub lon_edges: Vec<f64>,
    pub lat_edges: Vec<f64>,
    pub counts: Vec<Vec<u64>>,
    pub total: u64,
    pub max: u64,
}

impl GridCounts {
    pub fn compute(bbox: BoundingBox, divisions: usize, lons: &[f64], lats: &[f64]) -> Self {
        let divisions = divisions.max(1);
        let mut counts = vec![vec![0u64; divisions]; divisions];
        for (lon, lat) in lons.iter().zip(lats) {
            let col = bin(*lon, bbox.lon_min, bbox.lon_max, divisions);
            let row = bin(*lat, bbox.lat_min, bbox.lat_max, divisions);
            if let (Some(row), Some(col)) = (row, col) {
                counts[row][col] += 1;
            }
        }
        let total = counts.iter().flatten().sum();
        let max = counts.iter().flatten().copied().max().unwrap_or(0);
        Self {
            bbox,
            divisions,
            lon_edges: edges(bbox.lon_min, bbox.lon_max, divisions),
            lat_edges: edges(bbox.lat_min, bbox.lat_max, divisions),
            counts,
            total,
            max,
        }
    }

    /// Reads the occurrence coordinates of a merged artifact.
    pub fn from_dataset(
        dataset: &Dataset,
        layout: &RecordLayout,
        bbox: BoundingBox,
        divisions: usize,
    ) -> Result<Self, String> {
        let (lons, lats) = coordinates(dataset, layout)?;
        Ok(Self::compute(bbox, divisions, lons, lats))
    }

    /// Counts the occurrences of every artifact under `paths` together.
    /// Directories contribute each `.json` and `.nc` file they hold.
    pub fn from_artifacts(
        paths: &[Utf8PathBuf],
        layout: &RecordLayout,
        bbox: BoundingBox,
        divisions: usize,
    ) -> Result<Self, GlmError> {
        let artifacts = artifact_paths(paths)?;
        if artifacts.is_empty() {
            return Err(GlmError::Filesystem(format!(
                "no artifacts found under {}",
                paths
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        let mut lons = Vec::new();
        let mut lats = Vec::new();
        for path in &artifacts {
            let dataset = codec_for_path(path.as_std_path())?.decode(path.as_std_path())?;
            let (lon, lat) = coordinates(&dataset, layout).map_err(|message| GlmError::Decode {
                path: path.clone().into_std_path_buf(),
                message,
            })?;
            debug!(artifact = %path, occurrences = lon.len(), "artifact loaded");
            lons.extend_from_slice(lon);
            lats.extend_from_slice(lat);
        }
        Ok(Self::compute(bbox, divisions, &lons, &lats))
    }
}

/// Expands directories into the artifacts they hold, sorted by name. Plain
/// file paths are kept as given.
pub fn artifact_paths(paths: &[Utf8PathBuf]) -> Result<Vec<Utf8PathBuf>, GlmError> {
    let mut artifacts = Vec::new();
    for path in paths {
        if !path.is_dir() {
            artifacts.push(path.clone());
            continue;
        }
        let entries = path
            .read_dir_utf8()
            .map_err(|err| GlmError::Filesystem(format!("{path}: {err}")))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| GlmError::Filesystem(format!("{path}: {err}")))?;
            if is_artifact(entry.path()) {
                found.push(entry.path().to_path_buf());
            }
        }
        found.sort();
        artifacts.extend(found);
    }
    Ok(artifacts)
}

fn is_artifact(path: &Utf8Path) -> bool {
    path.is_file() && matches!(path.extension(), Some("json" | "nc"))
}

fn coordinates<'a>(
    dataset: &'a Dataset,
    layout: &RecordLayout,
) -> Result<(&'a [f64], &'a [f64]), String> {
    let lons = dataset
        .variable(&layout.longitude_variable)
        .ok_or_else(|| format!("missing variable {}", layout.longitude_variable))?;
    let lats = dataset
        .variable(&layout.latitude_variable)
        .ok_or_else(|| format!("missing variable {}", layout.latitude_variable))?;
    if lons.values.len() != lats.values.len() {
        return Err(format!(
            "{} has {} values but {} has {}",
            layout.longitude_variable,
            lons.values.len(),
            layout.latitude_variable,
            lats.values.len()
        ));
    }
    Ok((&lons.values, &lats.values))
}

fn edges(min: f64, max: f64, divisions: usize) -> Vec<f64> {
    let width = (max - min) / divisions as f64;
    (0..=divisions)
        .map(|step| {
            if step == divisions {
                max
            } else {
                min + width * step as f64
            }
        })
        .collect()
}

fn bin(value: f64, min: f64, max: f64, divisions: usize) -> Option<usize> {
    if !value.is_finite() || value < min || value > max {
        return None;
    }
    if value == max {
        return Some(divisions - 1);
    }
    let width = (max - min) / divisions as f64;
    let index = ((value - min) / width) as usize;
    Some(index.min(divisions - 1))
}
