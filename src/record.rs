use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RecordLayout;
use crate::domain::ObjectKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Numbers(vec![value])
    }
}

/// A named array: dimension names outermost first, values in row-major
/// order. Scalars have no dimensions and exactly one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub values: Vec<f64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Variable {
    pub fn new(dimensions: &[&str], values: Vec<f64>) -> Self {
        Self {
            dimensions: dimensions.iter().map(|dim| dim.to_string()).collect(),
            values,
            attributes: BTreeMap::new(),
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self::new(&[], vec![value])
    }

    pub fn spans(&self, dimension: &str) -> bool {
        self.dimensions.iter().any(|dim| dim == dimension)
    }

    /// Turns packed integer values into physical ones and removes the
    /// packing attributes (`_Unsigned`, `_FillValue`, `scale_factor`,
    /// `add_offset`). `bits` is the width of the stored integer type; `None`
    /// for floating-point storage. Fill values become NaN.
    pub fn unpack(&mut self, bits: Option<u32>) {
        let unsigned = matches!(
            self.attributes.remove("_Unsigned"),
            Some(AttributeValue::Text(flag)) if flag.eq_ignore_ascii_case("true")
        );
        let widen = |raw: f64| match bits {
            Some(bits) if unsigned && raw < 0.0 => raw + 2f64.powi(bits as i32),
            _ => raw,
        };
        let fill = first_number(self.attributes.remove("_FillValue")).map(widen);
        let scale = first_number(self.attributes.remove("scale_factor")).unwrap_or(1.0);
        let offset = first_number(self.attributes.remove("add_offset")).unwrap_or(0.0);

        for value in &mut self.values {
            let raw = widen(*value);
            *value = if fill == Some(raw) {
                f64::NAN
            } else {
                raw * scale + offset
            };
        }
    }
}

fn first_number(value: Option<AttributeValue>) -> Option<f64> {
    match value {
        Some(AttributeValue::Numbers(numbers)) => numbers.first().copied(),
        _ => None,
    }
}

/// Self-describing content of one file: the shape every codec reads and
/// writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub dimensions: BTreeMap<String, usize>,
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Dataset {
    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions.get(name).copied()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Lengths of `variable`'s dimensions, in order.
    pub fn shape_of(&self, variable: &Variable) -> Result<Vec<usize>, String> {
        variable
            .dimensions
            .iter()
            .map(|dim| {
                self.dimension_len(dim)
                    .ok_or_else(|| format!("undeclared dimension {dim}"))
            })
            .collect()
    }

    /// Checks that every variable's value count matches its declared shape.
    pub fn validate(&self) -> Result<(), String> {
        for (name, variable) in &self.variables {
            let shape = self
                .shape_of(variable)
                .map_err(|err| format!("variable {name}: {err}"))?;
            let expected: usize = shape.iter().product();
            if variable.values.len() != expected {
                return Err(format!(
                    "variable {name} holds {} values, shape {:?} needs {expected}",
                    variable.values.len(),
                    shape
                ));
            }
        }
        Ok(())
    }

    pub fn without_dimensions(&self, drop: &[String]) -> Dataset {
        let variables = self
            .variables
            .iter()
            .filter(|(_, variable)| !drop.iter().any(|dim| variable.spans(dim)))
            .map(|(name, variable)| (name.clone(), variable.clone()))
            .collect();
        let dimensions = self
            .dimensions
            .iter()
            .filter(|(name, _)| !drop.contains(*name))
            .map(|(name, len)| (name.clone(), *len))
            .collect();
        Dataset {
            dimensions,
            variables,
            attributes: self.attributes.clone(),
        }
    }
}

/// A decoded GLM file together with the key it was fetched from.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub key: ObjectKey,
    pub dataset: Dataset,
}

impl EventRecord {
    pub fn new(key: ObjectKey, dataset: Dataset) -> Self {
        Self { key, dataset }
    }

    pub fn event_count(&self, layout: &RecordLayout) -> usize {
        self.dataset
            .dimension_len(&layout.event_dimension)
            .or_else(|| {
                self.dataset
                    .variable(&layout.longitude_variable)
                    .map(|var| var.values.len())
            })
            .unwrap_or(0)
    }

    /// Per-event longitudes and latitudes, which must pair up one to one.
    pub fn coordinates(&self, layout: &RecordLayout) -> Result<(&[f64], &[f64]), String> {
        let lon = self
            .dataset
            .variable(&layout.longitude_variable)
            .ok_or_else(|| format!("missing variable {}", layout.longitude_variable))?;
        let lat = self
            .dataset
            .variable(&layout.latitude_variable)
            .ok_or_else(|| format!("missing variable {}", layout.latitude_variable))?;
        if lon.values.len() != lat.values.len() {
            return Err(format!(
                "{} has {} values but {} has {}",
                layout.longitude_variable,
                lon.values.len(),
                layout.latitude_variable,
                lat.values.len()
            ));
        }
        Ok((&lon.values, &lat.values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_catches_short_variable() {
        let mut dataset = Dataset::default();
        dataset.dimensions.insert("number_of_flashes".to_string(), 3);
        dataset.variables.insert(
            "flash_lon".to_string(),
            Variable::new(&["number_of_flashes"], vec![1.0, 2.0]),
        );
        assert!(dataset.validate().is_err());
    }

    #[test]
    fn dropping_dimension_removes_its_variables() {
        let mut dataset = Dataset::default();
        dataset.dimensions.insert("number_of_events".to_string(), 2);
        dataset.dimensions.insert("number_of_flashes".to_string(), 1);
        dataset.variables.insert(
            "event_energy".to_string(),
            Variable::new(&["number_of_events"], vec![1.0, 2.0]),
        );
        dataset.variables.insert(
            "flash_lon".to_string(),
            Variable::new(&["number_of_flashes"], vec![-43.2]),
        );

        let trimmed = dataset.without_dimensions(&["number_of_events".to_string()]);
        assert!(trimmed.variable("event_energy").is_none());
        assert!(trimmed.variable("flash_lon").is_some());
        assert_eq!(trimmed.dimension_len("number_of_events"), None);
    }

    #[test]
    fn unpack_applies_unsigned_scale_and_fill() {
        let mut variable = Variable::new(&["number_of_flashes"], vec![-20000.0, 100.0, -1.0]);
        variable.attributes.insert("_Unsigned".to_string(), "true".into());
        variable.attributes.insert("scale_factor".to_string(), 0.5.into());
        variable.attributes.insert("add_offset".to_string(), 10.0.into());
        variable.attributes.insert("_FillValue".to_string(), (-1.0).into());
        variable.attributes.insert("units".to_string(), "J".into());

        variable.unpack(Some(16));

        assert_eq!(variable.values[0], 45536.0 * 0.5 + 10.0);
        assert_eq!(variable.values[1], 60.0);
        assert!(variable.values[2].is_nan());
        assert_eq!(variable.attributes.len(), 1);
        assert!(variable.attributes.contains_key("units"));
    }

    #[test]
    fn unpack_leaves_plain_floats_alone() {
        let mut variable = Variable::new(&["number_of_flashes"], vec![-43.2, -22.9]);
        variable.attributes.insert("_Unsigned".to_string(), "true".into());
        variable.unpack(None);
        assert_eq!(variable.values, vec![-43.2, -22.9]);
        assert!(variable.attributes.is_empty());
    }
}
