use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::codec::ArtifactWriter;
use crate::config::RecordLayout;
use crate::domain::{Bucket, ObjectKey};
use crate::error::GlmError;
use crate::record::{AttributeValue, Dataset, EventRecord, Variable};
use crate::window::{CompletedWindow, WindowTrigger};

pub const OCCURRENCE_DIMENSION: &str = "occurrence";
pub const RECORD_DIMENSION: &str = "record";
pub const RECORD_TIME_VARIABLE: &str = "record_time";
pub const OCCURRENCE_RECORD_VARIABLE: &str = "occurrence_record";

/// Merged content of one completed window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedArtifact {
    pub bucket: Bucket,
    pub sequence: usize,
    pub trigger: WindowTrigger,
    pub source_slots: usize,
    pub record_count: usize,
    pub occurrence_count: usize,
    pub source_objects: Vec<ObjectKey>,
    #[serde(skip)]
    pub dataset: Dataset,
}

#[derive(Debug, Clone)]
pub struct Merger {
    layout: RecordLayout,
    output_dir: Utf8PathBuf,
}

impl Merger {
    pub fn new(layout: RecordLayout, output_dir: Utf8PathBuf) -> Self {
        Self { layout, output_dir }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn artifact_path(&self, bucket: &Bucket, sequence: usize, extension: &str) -> Utf8PathBuf {
        self.output_dir
            .join(bucket.artifact_file_name(sequence, extension))
    }

    /// Concatenates the window's kept records along the occurrence axis.
    /// Returns `None` when every slot is a placeholder.
    pub fn merge(&self, window: &CompletedWindow) -> Result<Option<MergedArtifact>, GlmError> {
        let mut kept = window
            .slots
            .iter()
            .filter_map(|slot| slot.result.record().map(|record| (slot.index, record)))
            .collect::<Vec<_>>();
        if kept.is_empty() {
            return Ok(None);
        }
        kept.sort_by_key(|(index, record)| (record.key.start_time(), *index));
        let records = kept.into_iter().map(|(_, record)| record).collect::<Vec<_>>();

        let shape_err = |message: String| GlmError::ConcatenationShape {
            bucket: window.bucket.to_string(),
            window: window.sequence,
            message,
        };
        let dataset = self.concatenate(&records).map_err(shape_err)?;
        let occurrence_count = dataset.dimension_len(OCCURRENCE_DIMENSION).unwrap_or(0);

        let mut artifact = MergedArtifact {
            bucket: window.bucket,
            sequence: window.sequence,
            trigger: window.trigger,
            source_slots: window.source_slots(),
            record_count: records.len(),
            occurrence_count,
            source_objects: records.iter().map(|record| record.key.clone()).collect(),
            dataset,
        };
        annotate(&mut artifact);
        Ok(Some(artifact))
    }

    fn concatenate(&self, records: &[&EventRecord]) -> Result<Dataset, String> {
        let event_dim = self.layout.event_dimension.as_str();
        let trimmed = records
            .iter()
            .map(|record| record.dataset.without_dimensions(&self.layout.drop_dimensions))
            .collect::<Vec<_>>();
        let first = &trimmed[0];

        let names = first.variables.keys().cloned().collect::<BTreeSet<_>>();
        for (record, dataset) in records.iter().zip(&trimmed) {
            let other = dataset.variables.keys().cloned().collect::<BTreeSet<_>>();
            if let Some(name) = names.symmetric_difference(&other).next() {
                return Err(format!(
                    "variable {name} is not present in every record (first mismatch in {})",
                    record.key.file_name()
                ));
            }
        }

        let event_counts = records
            .iter()
            .map(|record| record.event_count(&self.layout))
            .collect::<Vec<_>>();
        let occurrences: usize = event_counts.iter().sum();

        let mut merged = Dataset::default();
        for (name, len) in &first.dimensions {
            if name != event_dim {
                merged.dimensions.insert(name.clone(), *len);
            }
        }
        merged
            .dimensions
            .insert(OCCURRENCE_DIMENSION.to_string(), occurrences);
        merged
            .dimensions
            .insert(RECORD_DIMENSION.to_string(), records.len());

        for name in &names {
            let template = &first.variables[name];
            let reference_shape = first.shape_of(template)?;
            let per_event = template.dimensions.first().map(String::as_str) == Some(event_dim);
            if template.dimensions.iter().skip(1).any(|dim| dim == event_dim) {
                return Err(format!(
                    "variable {name} uses {event_dim} as an inner dimension"
                ));
            }

            let mut values = Vec::new();
            for (record, dataset) in records.iter().zip(&trimmed) {
                let variable = &dataset.variables[name];
                let shape = dataset.shape_of(variable)?;
                let compatible = if per_event {
                    variable.dimensions.first() == template.dimensions.first()
                        && variable.dimensions[1..] == template.dimensions[1..]
                        && shape[1..] == reference_shape[1..]
                } else {
                    variable.dimensions == template.dimensions && shape == reference_shape
                };
                if !compatible {
                    return Err(format!(
                        "variable {name} has shape {shape:?} in {} but {reference_shape:?} in {}",
                        record.key.file_name(),
                        records[0].key.file_name()
                    ));
                }
                values.extend_from_slice(&variable.values);
            }

            let leading = if per_event {
                OCCURRENCE_DIMENSION
            } else {
                RECORD_DIMENSION
            };
            let skip = usize::from(per_event);
            let mut dimensions = vec![leading.to_string()];
            dimensions.extend(template.dimensions.iter().skip(skip).cloned());
            merged.variables.insert(
                name.clone(),
                Variable {
                    dimensions,
                    values,
                    attributes: template.attributes.clone(),
                },
            );
        }

        let mut record_time = Variable::new(
            &[RECORD_DIMENSION],
            records
                .iter()
                .map(|record| record.key.start_time().and_utc().timestamp_millis() as f64 / 1000.0)
                .collect(),
        );
        record_time.attributes.insert(
            "units".to_string(),
            "seconds since 1970-01-01 00:00:00 UTC".into(),
        );
        merged
            .variables
            .insert(RECORD_TIME_VARIABLE.to_string(), record_time);

        let occurrence_record = event_counts
            .iter()
            .enumerate()
            .flat_map(|(record, count)| std::iter::repeat_n(record as f64, *count))
            .collect();
        merged.variables.insert(
            OCCURRENCE_RECORD_VARIABLE.to_string(),
            Variable::new(&[OCCURRENCE_DIMENSION], occurrence_record),
        );

        merged.attributes = first.attributes.clone();
        merged.validate()?;
        Ok(merged)
    }

    /// Writes the artifact next to its final path and renames it into
    /// place. Failures are not retried.
    pub fn write<W>(&self, artifact: &MergedArtifact, writer: &W) -> Result<Utf8PathBuf, GlmError>
    where
        W: ArtifactWriter + ?Sized,
    {
        let path = self.artifact_path(&artifact.bucket, artifact.sequence, writer.extension());
        let write_err = |message: String| GlmError::ArtifactWrite {
            path: path.clone().into_std_path_buf(),
            message,
        };
        fs::create_dir_all(self.output_dir.as_std_path())
            .map_err(|err| write_err(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".glm-agg-")
            .suffix(&format!(".{}", writer.extension()))
            .tempfile_in(self.output_dir.as_std_path())
            .map_err(|err| write_err(err.to_string()))?;
        writer.write(temp.path(), &artifact.dataset)?;
        temp.persist(path.as_std_path())
            .map_err(|err| write_err(err.to_string()))?;
        info!(
            bucket = %artifact.bucket,
            window = artifact.sequence,
            records = artifact.record_count,
            occurrences = artifact.occurrence_count,
            path = %path,
            "wrote merged artifact"
        );
        Ok(path)
    }
}

fn annotate(artifact: &mut MergedArtifact) {
    let attributes: &mut BTreeMap<String, AttributeValue> = &mut artifact.dataset.attributes;
    attributes.insert("bucket".to_string(), artifact.bucket.to_string().into());
    attributes.insert(
        "window_sequence".to_string(),
        (artifact.sequence as f64).into(),
    );
    attributes.insert(
        "source_slots".to_string(),
        (artifact.source_slots as f64).into(),
    );
    attributes.insert(
        "source_objects".to_string(),
        artifact
            .source_objects
            .iter()
            .map(ObjectKey::file_name)
            .collect::<Vec<_>>()
            .join(",")
            .into(),
    );
}
