//! # NetCDF Array Store
//!
//! [`NetcdfSource`] keeps only the path and the schema. The file is opened
//! to read metadata when the source is created and again for every
//! hyperslab read; each handle is closed before the call returns, so
//! repeated `resolve` calls in a long-running process never accumulate open
//! files.
//!
//! Values are decoded following the CF conventions: `_FillValue` and
//! `missing_value` become NaN, then `scale_factor` and `add_offset` apply.

use crate::error::{CatalogError, CatalogResult};
use crate::selection::Coordinate;
use crate::source::{ArraySource, DatasetSchema, Dimension, ValueType, VariableInfo};
use log::debug;
use ndarray::{ArrayD, IxDyn};
use netcdf::AttributeValue;
use netcdf::types::{FloatType, IntType, NcVariableType};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Values at or above this magnitude are netCDF default fill values.
const DEFAULT_FILL_THRESHOLD: f64 = 9.9e36;

#[derive(Debug, Clone, Default, PartialEq)]
struct CfDecoding {
    fill_values: Vec<f64>,
    scale_factor: Option<f64>,
    add_offset: Option<f64>,
}

impl CfDecoding {
    fn from_variable(var: &netcdf::Variable) -> Self {
        let number = |name: &str| {
            var.attribute(name)
                .and_then(|attr| attr.value().ok())
                .and_then(|value| attribute_as_f64(&value))
        };
        CfDecoding {
            fill_values: ["_FillValue", "missing_value"]
                .iter()
                .filter_map(|name| number(*name))
                .collect(),
            scale_factor: number("scale_factor"),
            add_offset: number("add_offset"),
        }
    }

    fn decode(&self, raw: f64) -> f64 {
        if raw.abs() >= DEFAULT_FILL_THRESHOLD || self.fill_values.iter().any(|fill| *fill == raw) {
            return f64::NAN;
        }
        raw * self.scale_factor.unwrap_or(1.0) + self.add_offset.unwrap_or(0.0)
    }
}

/// A NetCDF file opened for lazy access
#[derive(Debug)]
pub struct NetcdfSource {
    path: PathBuf,
    schema: DatasetSchema,
    decoding: HashMap<String, CfDecoding>,
    // Keeps a downloaded copy alive for as long as views reference it.
    _staged: Option<NamedTempFile>,
}

impl NetcdfSource {
    /// Reads dimensions, variable headers, attributes and coordinate labels.
    pub fn open<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CatalogError::ResourceNotFound(path.display().to_string()));
        }
        debug!("Opening NetCDF metadata: {}", path.display());
        let file = netcdf::open(&path)?;

        let dimensions: Vec<Dimension> = file
            .dimensions()
            .map(|dim| Dimension {
                name: dim.name().to_string(),
                len: dim.len(),
            })
            .collect();

        let mut variables = Vec::new();
        let mut coordinates = BTreeMap::new();
        let mut decoding = HashMap::new();

        for var in file.variables() {
            let name = var.name().to_string();
            let dims: Vec<String> = var.dimensions().iter().map(|d| d.name().to_string()).collect();
            let attributes = variable_attributes(&var);
            let dtype = value_type(&var.vartype());

            let is_coordinate = dims.len() == 1 && dims[0] == name && dtype.is_numeric();
            if is_coordinate {
                let cf = CfDecoding::from_variable(&var);
                let raw = var.get_values::<f64, _>(..)?;
                let values = raw.into_iter().map(|v| cf.decode(v)).collect();
                let mut coordinate = Coordinate::new(&name, values);
                if let Some(units) = attributes.get("units") {
                    coordinate = coordinate.with_units(units);
                }
                coordinates.insert(name, coordinate);
                continue;
            }

            decoding.insert(name.clone(), CfDecoding::from_variable(&var));
            variables.push(VariableInfo {
                name,
                dimensions: dims,
                dtype,
                attributes,
            });
        }

        let mut global = BTreeMap::new();
        for attr in file.attributes() {
            if let Ok(value) = attr.value() {
                global.insert(attr.name().to_string(), format_attribute_value(&value));
            }
        }

        file.close()?;

        Ok(NetcdfSource {
            path,
            schema: DatasetSchema {
                dimensions,
                variables,
                coordinates,
                attributes: global,
            },
            decoding,
            _staged: None,
        })
    }

    /// Opens a downloaded copy and takes ownership of it.
    pub fn open_staged(staged: NamedTempFile) -> CatalogResult<Self> {
        let mut source = Self::open(staged.path())?;
        source._staged = Some(staged);
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArraySource for NetcdfSource {
    fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    fn read(&self, variable: &str, hyperslab: &[Range<usize>]) -> CatalogResult<ArrayD<f64>> {
        let info = self.schema.variable(variable)?;
        if !info.dtype.is_numeric() {
            return Err(CatalogError::ComputeError(format!(
                "Variable '{}' has non-numeric type {}",
                variable, info.dtype
            )));
        }

        let start: Vec<usize> = hyperslab.iter().map(|r| r.start).collect();
        let count: Vec<usize> = hyperslab.iter().map(|r| r.end - r.start).collect();
        debug!(
            "Reading {} from {} start={:?} count={:?}",
            variable,
            self.path.display(),
            start,
            count
        );

        let file = netcdf::open(&self.path)
            .map_err(|e| CatalogError::compute(&format!("opening {}", self.path.display()), e))?;
        let var = file
            .variable(variable)
            .ok_or_else(|| CatalogError::UnknownVariable(variable.to_string()))?;
        let raw = var.get_values::<f64, _>((start.as_slice(), count.as_slice()))?;
        drop(var);
        file.close()?;

        let cf = self.decoding.get(variable).cloned().unwrap_or_default();
        let values: Vec<f64> = raw.into_iter().map(|v| cf.decode(v)).collect();
        ArrayD::from_shape_vec(IxDyn(&count), values)
            .map_err(|e| CatalogError::compute("reshaping NetCDF values", e))
    }
}

fn variable_attributes(var: &netcdf::Variable) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for attr in var.attributes() {
        if let Ok(value) = attr.value() {
            attributes.insert(attr.name().to_string(), format_attribute_value(&value));
        }
    }
    attributes
}

fn value_type(vartype: &NcVariableType) -> ValueType {
    match vartype {
        NcVariableType::Int(IntType::I8) => ValueType::Int8,
        NcVariableType::Int(IntType::I16) => ValueType::Int16,
        NcVariableType::Int(IntType::I32) => ValueType::Int32,
        NcVariableType::Int(IntType::I64) => ValueType::Int64,
        NcVariableType::Int(IntType::U8) => ValueType::UInt8,
        NcVariableType::Int(IntType::U16) => ValueType::UInt16,
        NcVariableType::Int(IntType::U32) => ValueType::UInt32,
        NcVariableType::Int(IntType::U64) => ValueType::UInt64,
        NcVariableType::Float(FloatType::F32) => ValueType::Float32,
        NcVariableType::Float(FloatType::F64) => ValueType::Float64,
        NcVariableType::String | NcVariableType::Char => ValueType::Text,
        other => ValueType::Other(format!("{:?}", other)),
    }
}

fn attribute_as_f64(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Double(v) => Some(*v),
        AttributeValue::Float(v) => Some(*v as f64),
        AttributeValue::Short(v) => Some(*v as f64),
        AttributeValue::Ushort(v) => Some(*v as f64),
        AttributeValue::Int(v) => Some(*v as f64),
        AttributeValue::Uint(v) => Some(*v as f64),
        AttributeValue::Longlong(v) => Some(*v as f64),
        AttributeValue::Ulonglong(v) => Some(*v as f64),
        AttributeValue::Schar(v) => Some(*v as f64),
        AttributeValue::Uchar(v) => Some(*v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|x| *x as f64),
        AttributeValue::Shorts(v) => v.first().map(|x| *x as f64),
        AttributeValue::Ints(v) => v.first().map(|x| *x as f64),
        _ => None,
    }
}

fn format_attribute_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s.clone(),
        other => attribute_as_f64(other)
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// time(3) x latitude(5, descending) x longitude(4), plus a packed int16 variable.
    fn write_grid(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("grid.nc");
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("time", 3).unwrap();
        file.add_dimension("latitude", 5).unwrap();
        file.add_dimension("longitude", 4).unwrap();
        file.add_attribute("title", "test grid").unwrap();

        {
            let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
            time.put_attribute("units", "hours since 2020-01-01 00:00:00").unwrap();
            time.put_values(&[0.0, 6.0, 12.0], ..).unwrap();
        }
        {
            let mut lat = file.add_variable::<f32>("latitude", &["latitude"]).unwrap();
            lat.put_attribute("units", "degrees_north").unwrap();
            lat.put_values(&[30.0f32, 25.0, 20.0, 15.0, 10.0], ..).unwrap();
        }
        {
            let mut lon = file.add_variable::<f32>("longitude", &["longitude"]).unwrap();
            lon.put_values(&[118.0f32, 119.0, 120.0, 121.0], ..).unwrap();
        }
        {
            let mut t = file
                .add_variable::<f32>("temperature", &["time", "latitude", "longitude"])
                .unwrap();
            t.put_attribute("units", "K").unwrap();
            t.put_attribute("_FillValue", -999.0f32).unwrap();
            let mut values: Vec<f32> = (0..60).map(|i| 270.0 + i as f32).collect();
            values[0] = -999.0;
            t.put_values(&values, ..).unwrap();
        }
        {
            let mut packed = file
                .add_variable::<i16>("packed", &["time", "latitude", "longitude"])
                .unwrap();
            packed.put_attribute("scale_factor", 0.5f64).unwrap();
            packed.put_attribute("add_offset", 100.0f64).unwrap();
            packed.put_values(&[2i16; 60], ..).unwrap();
        }
        path
    }

    #[test]
    fn test_open_reads_schema_and_coordinates() {
        let dir = TempDir::new().unwrap();
        let path = write_grid(&dir);
        let source = NetcdfSource::open(&path).unwrap();
        assert_eq!(source.path(), path.as_path());
        let schema = source.schema();

        assert_eq!(schema.dimensions.len(), 3);
        let names: Vec<&str> = schema.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["temperature", "packed"]);
        assert_eq!(schema.variable("temperature").unwrap().dtype, ValueType::Float32);
        assert_eq!(schema.variable("packed").unwrap().dtype, ValueType::Int16);
        assert_eq!(schema.attributes.get("title").map(String::as_str), Some("test grid"));

        let lat = &schema.coordinates["latitude"];
        assert_eq!(lat.values, vec![30.0, 25.0, 20.0, 15.0, 10.0]);
        assert!(schema.coordinates["time"].time.is_some());
    }

    #[test]
    fn test_read_hyperslab_decodes_fill_values() {
        let dir = TempDir::new().unwrap();
        let source = NetcdfSource::open(write_grid(&dir)).unwrap();

        let slab = source.read("temperature", &[0..1, 0..2, 0..2]).unwrap();
        assert_eq!(slab.shape(), &[1, 2, 2]);
        let values: Vec<f64> = slab.iter().cloned().collect();
        assert!(values[0].is_nan());
        assert_eq!(&values[1..], &[271.0, 274.0, 275.0]);
    }

    #[test]
    fn test_read_applies_scale_and_offset() {
        let dir = TempDir::new().unwrap();
        let source = NetcdfSource::open(write_grid(&dir)).unwrap();
        let slab = source.read("packed", &[1..2, 2..3, 3..4]).unwrap();
        assert_eq!(slab.iter().cloned().collect::<Vec<_>>(), vec![101.0]);
    }

    #[test]
    fn test_open_missing_file() {
        let result = NetcdfSource::open("/nonexistent/grid.nc");
        assert!(matches!(result, Err(CatalogError::ResourceNotFound(_))));
    }
}
