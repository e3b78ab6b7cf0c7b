use std::fs;
use std::path::Path;

use crate::codec::{ArtifactWriter, RecordDecoder};
use crate::error::GlmError;
use crate::record::Dataset;

/// Datasets as pretty-printed JSON. Used for mirrored or synthetic records
/// and for builds without netCDF support.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl RecordDecoder for JsonCodec {
    fn decode(&self, path: &Path) -> Result<Dataset, GlmError> {
        let decode_err = |message: String| GlmError::Decode {
            path: path.to_path_buf(),
            message,
        };
        let bytes = fs::read(path).map_err(|err| decode_err(err.to_string()))?;
        if bytes.is_empty() {
            return Err(decode_err("empty file".to_string()));
        }
        let dataset: Dataset =
            serde_json::from_slice(&bytes).map_err(|err| decode_err(err.to_string()))?;
        dataset.validate().map_err(decode_err)?;
        Ok(dataset)
    }
}

impl ArtifactWriter for JsonCodec {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn write(&self, path: &Path, dataset: &Dataset) -> Result<(), GlmError> {
        let write_err = |message: String| GlmError::ArtifactWrite {
            path: path.to_path_buf(),
            message,
        };
        let content =
            serde_json::to_vec_pretty(dataset).map_err(|err| write_err(err.to_string()))?;
        fs::write(path, content).map_err(|err| write_err(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::record::Variable;

    #[test]
    fn empty_file_is_a_decode_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("empty.json");
        fs::write(&path, b"").unwrap();

        let err = JsonCodec.decode(&path).unwrap_err();
        assert_matches!(err, GlmError::Decode { .. });
    }

    #[test]
    fn written_artifact_decodes_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("artifact.json");
        let mut dataset = Dataset::default();
        dataset.dimensions.insert("occurrence".to_string(), 2);
        dataset.variables.insert(
            "flash_lat".to_string(),
            Variable::new(&["occurrence"], vec![-22.9, -23.0]),
        );
        dataset
            .attributes
            .insert("bucket".to_string(), "2023-11-18T14".into());

        JsonCodec.write(&path, &dataset).unwrap();
        assert_eq!(JsonCodec.decode(&path).unwrap(), dataset);
    }
}
