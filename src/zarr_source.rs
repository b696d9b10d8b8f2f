//! # Zarr Array Store
//!
//! A Zarr store is a directory holding one array per variable. Variable
//! dimensions come from the array's `dimension_names` (Zarr v3) or the
//! `_ARRAY_DIMENSIONS` attribute written by xarray (Zarr v2). A
//! one-dimensional numeric array named after its own dimension is a
//! coordinate.
//!
//! Like [`NetcdfSource`](crate::netcdf_source::NetcdfSource), only the path
//! and the schema are kept; every read reopens the store and retrieves just
//! the chunks covering the hyperslab.

use crate::error::{CatalogError, CatalogResult};
use crate::selection::Coordinate;
use crate::source::{ArraySource, DatasetSchema, Dimension, ValueType, VariableInfo};
use log::debug;
use ndarray::{ArrayD, IxDyn};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs_filesystem::FilesystemStore;

/// Attribute xarray uses for dimension names in Zarr v2 stores.
const XARRAY_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";

#[derive(Debug, Clone, Default, PartialEq)]
struct ScaleOffset {
    scale_factor: Option<f64>,
    add_offset: Option<f64>,
}

impl ScaleOffset {
    fn apply(&self, raw: f64) -> f64 {
        raw * self.scale_factor.unwrap_or(1.0) + self.add_offset.unwrap_or(0.0)
    }
}

/// A Zarr directory store opened for lazy access
#[derive(Debug)]
pub struct ZarrSource {
    path: PathBuf,
    schema: DatasetSchema,
    scaling: HashMap<String, ScaleOffset>,
}

impl ZarrSource {
    /// Reads array metadata and coordinate labels from every array in the store root.
    pub fn open<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(CatalogError::ResourceNotFound(path.display().to_string()));
        }
        debug!("Opening Zarr metadata: {}", path.display());
        let store = open_store(&path)?;

        let mut names: Vec<String> = fs::read_dir(&path)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let mut dimensions: Vec<Dimension> = Vec::new();
        let mut variables = Vec::new();
        let mut coordinates = BTreeMap::new();
        let mut scaling = HashMap::new();

        for name in names {
            let array = match Array::open(store.clone(), &format!("/{}", name)) {
                Ok(array) => array,
                Err(e) => {
                    debug!("Skipping {} in {}: {}", name, path.display(), e);
                    continue;
                }
            };

            let dims = dimension_names(&array, &name);
            for (dim, &len) in dims.iter().zip(array.shape()) {
                let len = len as usize;
                match dimensions.iter().find(|d| &d.name == dim) {
                    Some(existing) if existing.len != len => {
                        return Err(CatalogError::ParseError {
                            path: path.clone(),
                            message: format!(
                                "dimension '{}' has length {} in '{}' but {} elsewhere",
                                dim, len, name, existing.len
                            ),
                        });
                    }
                    Some(_) => {}
                    None => dimensions.push(Dimension {
                        name: dim.clone(),
                        len,
                    }),
                }
            }

            let attributes = array_attributes(array.attributes());
            let dtype = value_type(array.data_type());
            let cf = ScaleOffset {
                scale_factor: number_attribute(array.attributes(), "scale_factor"),
                add_offset: number_attribute(array.attributes(), "add_offset"),
            };

            if dims.len() == 1 && dims[0] == name && dtype.is_numeric() {
                let subset = ArraySubset::new_with_shape(array.shape().to_vec());
                let values = retrieve_f64(&array, &subset)?
                    .into_iter()
                    .map(|v| cf.apply(v))
                    .collect();
                let mut coordinate = Coordinate::new(&name, values);
                if let Some(units) = attributes.get("units") {
                    coordinate = coordinate.with_units(units);
                }
                coordinates.insert(name, coordinate);
                continue;
            }

            scaling.insert(name.clone(), cf);
            variables.push(VariableInfo {
                name,
                dimensions: dims,
                dtype,
                attributes,
            });
        }

        let global = Group::open(store, "/")
            .map(|group| array_attributes(group.attributes()))
            .unwrap_or_default();

        Ok(ZarrSource {
            path,
            schema: DatasetSchema {
                dimensions,
                variables,
                coordinates,
                attributes: global,
            },
            scaling,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArraySource for ZarrSource {
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

        let start: Vec<u64> = hyperslab.iter().map(|r| r.start as u64).collect();
        let count: Vec<usize> = hyperslab.iter().map(|r| r.end - r.start).collect();
        debug!(
            "Reading {} from {} start={:?} count={:?}",
            variable,
            self.path.display(),
            start,
            count
        );

        let store = open_store(&self.path)
            .map_err(|e| CatalogError::compute(&format!("opening {}", self.path.display()), e))?;
        let array = Array::open(store, &format!("/{}", variable))
            .map_err(|e| CatalogError::compute(&format!("opening array '{}'", variable), e))?;
        let subset = ArraySubset::new_with_start_shape(start, count.iter().map(|&c| c as u64).collect())
            .map_err(|e| CatalogError::compute("building Zarr subset", e))?;

        let cf = self.scaling.get(variable).cloned().unwrap_or_default();
        let values: Vec<f64> = retrieve_f64(&array, &subset)?
            .into_iter()
            .map(|v| cf.apply(v))
            .collect();
        ArrayD::from_shape_vec(IxDyn(&count), values)
            .map_err(|e| CatalogError::compute("reshaping Zarr values", e))
    }
}

fn open_store(path: &Path) -> CatalogResult<Arc<FilesystemStore>> {
    FilesystemStore::new(path)
        .map(Arc::new)
        .map_err(|e| CatalogError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Dimension names from the array metadata, then the xarray attribute, then positional names.
fn dimension_names(array: &Array<FilesystemStore>, name: &str) -> Vec<String> {
    let rank = array.shape().len();
    if let Some(names) = array.dimension_names() {
        let names: Vec<String> = names
            .iter()
            .filter_map(|d| d.as_str().map(str::to_string))
            .collect();
        if names.len() == rank {
            return names;
        }
    }
    if let Some(JsonValue::Array(items)) = array.attributes().get(XARRAY_DIMENSIONS) {
        let names: Vec<String> = items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if names.len() == rank {
            return names;
        }
    }
    (0..rank).map(|i| format!("{}_dim_{}", name, i)).collect()
}

/// Reads a subset as f64, turning fill values into NaN.
fn retrieve_f64(array: &Array<FilesystemStore>, subset: &ArraySubset) -> CatalogResult<Vec<f64>> {
    let fill = array.fill_value().as_ne_bytes();

    macro_rules! retrieve_as {
        ($ty:ty) => {{
            let fill = fill.try_into().ok().map(<$ty>::from_ne_bytes).map(|v| v as f64);
            array
                .retrieve_array_subset_elements::<$ty>(subset)
                .map_err(|e| CatalogError::compute("reading Zarr chunks", e))?
                .into_iter()
                .map(|v| v as f64)
                .map(|v| if Some(v) == fill { f64::NAN } else { v })
                .collect()
        }};
    }

    Ok(match array.data_type() {
        DataType::Int8 => retrieve_as!(i8),
        DataType::Int16 => retrieve_as!(i16),
        DataType::Int32 => retrieve_as!(i32),
        DataType::Int64 => retrieve_as!(i64),
        DataType::UInt8 => retrieve_as!(u8),
        DataType::UInt16 => retrieve_as!(u16),
        DataType::UInt32 => retrieve_as!(u32),
        DataType::UInt64 => retrieve_as!(u64),
        DataType::Float32 => retrieve_as!(f32),
        DataType::Float64 => retrieve_as!(f64),
        other => {
            return Err(CatalogError::ComputeError(format!(
                "Zarr data type {:?} cannot be read as numbers",
                other
            )));
        }
    })
}

fn value_type(dtype: &DataType) -> ValueType {
    match dtype {
        DataType::Int8 => ValueType::Int8,
        DataType::Int16 => ValueType::Int16,
        DataType::Int32 => ValueType::Int32,
        DataType::Int64 => ValueType::Int64,
        DataType::UInt8 => ValueType::UInt8,
        DataType::UInt16 => ValueType::UInt16,
        DataType::UInt32 => ValueType::UInt32,
        DataType::UInt64 => ValueType::UInt64,
        DataType::Float32 => ValueType::Float32,
        DataType::Float64 => ValueType::Float64,
        DataType::Bool => ValueType::Boolean,
        other => ValueType::Other(format!("{:?}", other).to_lowercase()),
    }
}

fn number_attribute(attributes: &serde_json::Map<String, JsonValue>, name: &str) -> Option<f64> {
    attributes.get(name).and_then(JsonValue::as_f64)
}

fn array_attributes(attributes: &serde_json::Map<String, JsonValue>) -> BTreeMap<String, String> {
    attributes
        .iter()
        .filter(|(key, _)| key.as_str() != XARRAY_DIMENSIONS)
        .map(|(key, value)| {
            let text = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
