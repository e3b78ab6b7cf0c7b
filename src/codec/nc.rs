use std::path::Path;

use netcdf::AttributeValue as NcValue;
use netcdf::types::{IntType, NcVariableType};
use tracing::debug;

use crate::codec::{ArtifactWriter, RecordDecoder};
use crate::error::GlmError;
use crate::record::{AttributeValue, Dataset, Variable};

/// GLM Level-2 files and merged artifacts as netCDF. Numeric variables are
/// read as `f64` and unpacked, so artifacts hold physical values as doubles;
/// text-typed variables are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfCodec;

impl RecordDecoder for NetcdfCodec {
    fn decode(&self, path: &Path) -> Result<Dataset, GlmError> {
        let decode_err = |message: String| GlmError::Decode {
            path: path.to_path_buf(),
            message,
        };
        let file = netcdf::open(path).map_err(|err| decode_err(err.to_string()))?;

        let mut dataset = Dataset::default();
        for dim in file.dimensions() {
            dataset.dimensions.insert(dim.name(), dim.len());
        }
        for attr in file.attributes() {
            if let Some(value) = attr.value().ok().and_then(convert_attribute) {
                dataset.attributes.insert(attr.name().to_string(), value);
            }
        }
        for var in file.variables() {
            let name = var.name();
            let values = match var.get_values::<f64, _>(..) {
                Ok(values) => values,
                Err(err) => {
                    debug!(variable = %name, error = %err, "skipping non-numeric variable");
                    continue;
                }
            };
            let mut variable = Variable {
                dimensions: var.dimensions().iter().map(|dim| dim.name()).collect(),
                values,
                attributes: Default::default(),
            };
            for attr in var.attributes() {
                if let Some(value) = attr.value().ok().and_then(convert_attribute) {
                    variable.attributes.insert(attr.name().to_string(), value);
                }
            }
            variable.unpack(integer_bits(&var.vartype()));
            dataset.variables.insert(name, variable);
        }
        drop(file);

        dataset.validate().map_err(decode_err)?;
        Ok(dataset)
    }
}

impl ArtifactWriter for NetcdfCodec {
    fn extension(&self) -> &'static str {
        "nc"
    }

    fn write(&self, path: &Path, dataset: &Dataset) -> Result<(), GlmError> {
        let write_err = |err: netcdf::Error| GlmError::ArtifactWrite {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        let mut file = netcdf::create(path).map_err(write_err)?;
        for (name, len) in &dataset.dimensions {
            file.add_dimension(name, *len).map_err(write_err)?;
        }
        for (name, value) in &dataset.attributes {
            file.add_attribute(name, to_nc_value(value))
                .map_err(write_err)?;
        }
        for (name, variable) in &dataset.variables {
            let dims = variable
                .dimensions
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>();
            let mut var = file.add_variable::<f64>(name, &dims).map_err(write_err)?;
            for (attr_name, value) in &variable.attributes {
                var.put_attribute(attr_name, to_nc_value(value))
                    .map_err(write_err)?;
            }
            var.put_values(&variable.values, ..).map_err(write_err)?;
        }
        Ok(())
    }
}

fn integer_bits(kind: &NcVariableType) -> Option<u32> {
    match kind {
        NcVariableType::Int(IntType::I8 | IntType::U8) => Some(8),
        NcVariableType::Int(IntType::I16 | IntType::U16) => Some(16),
        NcVariableType::Int(IntType::I32 | IntType::U32) => Some(32),
        NcVariableType::Int(IntType::I64 | IntType::U64) => Some(64),
        _ => None,
    }
}

fn convert_attribute(value: NcValue) -> Option<AttributeValue> {
    let numbers = match value {
        NcValue::Str(text) => return Some(AttributeValue::Text(text)),
        NcValue::Strs(texts) => return Some(AttributeValue::Text(texts.join(","))),
        NcValue::Double(v) => vec![v],
        NcValue::Doubles(v) => v,
        NcValue::Float(v) => vec![f64::from(v)],
        NcValue::Floats(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Int(v) => vec![f64::from(v)],
        NcValue::Ints(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Uint(v) => vec![f64::from(v)],
        NcValue::Uints(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Short(v) => vec![f64::from(v)],
        NcValue::Shorts(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Ushort(v) => vec![f64::from(v)],
        NcValue::Ushorts(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Schar(v) => vec![f64::from(v)],
        NcValue::Schars(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Uchar(v) => vec![f64::from(v)],
        NcValue::Uchars(v) => v.into_iter().map(f64::from).collect(),
        NcValue::Longlong(v) => vec![v as f64],
        NcValue::Longlongs(v) => v.into_iter().map(|x| x as f64).collect(),
        NcValue::Ulonglong(v) => vec![v as f64],
        NcValue::Ulonglongs(v) => v.into_iter().map(|x| x as f64).collect(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(AttributeValue::Numbers(numbers))
}

fn to_nc_value(value: &AttributeValue) -> NcValue {
    match value {
        AttributeValue::Text(text) => NcValue::Str(text.clone()),
        AttributeValue::Numbers(numbers) if numbers.len() == 1 => NcValue::Double(numbers[0]),
        AttributeValue::Numbers(numbers) => NcValue::Doubles(numbers.clone()),
    }
}
