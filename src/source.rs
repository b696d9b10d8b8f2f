//! # Array Sources
//!
//! An [`ArraySource`] is the backing store behind a
//! [`LazyDataset`](crate::dataset::LazyDataset). Opening a source reads only
//! metadata: dimensions, variable headers, coordinate labels and attributes.
//! Bulk values are read through [`ArraySource::read`], one hyperslab at a
//! time, when a view is materialized.
//!
//! Implementations:
//! - [`NetcdfSource`](crate::netcdf_source::NetcdfSource): chunked NetCDF/HDF5 array stores
//! - [`ZarrSource`](crate::zarr_source::ZarrSource): Zarr directory stores
//! - [`TabularSource`](crate::tabular::TabularSource): CSV and Parquet files
//! - [`MemorySource`]: arrays already in memory, used for synthetic datasets

use crate::error::{CatalogError, CatalogResult};
use crate::selection::Coordinate;
use ndarray::{ArrayD, Slice};
use polars::prelude::DataFrame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Element type of a variable as stored in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Boolean,
    Text,
    Other(String),
}

impl ValueType {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueType::Boolean | ValueType::Text | ValueType::Other(_))
    }

    /// Stored size of one element, used for size estimates.
    pub fn size_bytes(&self) -> usize {
        match self {
            ValueType::Int8 | ValueType::UInt8 | ValueType::Boolean => 1,
            ValueType::Int16 | ValueType::UInt16 => 2,
            ValueType::Int32 | ValueType::UInt32 | ValueType::Float32 => 4,
            ValueType::Int64 | ValueType::UInt64 | ValueType::Float64 => 8,
            ValueType::Text | ValueType::Other(_) => 8,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Other(name) => write!(f, "{}", name),
            other => write!(f, "{}", format!("{:?}", other).to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub dimensions: Vec<String>,
    pub dtype: ValueType,
    pub attributes: BTreeMap<String, String>,
}

/// Structure of a backing store, known without reading bulk values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSchema {
    pub dimensions: Vec<Dimension>,
    /// Data variables; coordinate variables live in `coordinates`
    pub variables: Vec<VariableInfo>,
    pub coordinates: BTreeMap<String, Coordinate>,
    pub attributes: BTreeMap<String, String>,
}

impl DatasetSchema {
    pub fn variable(&self, name: &str) -> CatalogResult<&VariableInfo> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| CatalogError::UnknownVariable(name.to_string()))
    }

    pub fn dimension(&self, name: &str) -> CatalogResult<&Dimension> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CatalogError::UnknownDimension(name.to_string()))
    }

    /// Coordinate labels for a dimension, positional when the store has no
    /// coordinate variable for it.
    pub fn coordinate(&self, dimension: &str) -> CatalogResult<Coordinate> {
        let dim = self.dimension(dimension)?;
        Ok(self
            .coordinates
            .get(dimension)
            .cloned()
            .unwrap_or_else(|| Coordinate::positional(&dim.name, dim.len)))
    }
}

/// A backing store that lazy views read from.
pub trait ArraySource: Send + Sync + fmt::Debug {
    fn schema(&self) -> &DatasetSchema;

    /// Reads one variable restricted to a hyperslab, one range per variable
    /// dimension in the variable's dimension order.
    fn read(&self, variable: &str, hyperslab: &[Range<usize>]) -> CatalogResult<ArrayD<f64>>;

    /// Reads rows of a table with their native column types. Only tabular
    /// sources implement this; array sources return `None`.
    fn read_table(&self, _columns: &[String], _rows: &[usize]) -> Option<CatalogResult<DataFrame>> {
        None
    }
}

/// Arrays held in memory.
///
/// ```rust
/// use geocat::source::MemorySource;
/// use ndarray::ArrayD;
///
/// let source = MemorySource::builder()
///     .coordinate("time", vec![0.0, 1.0, 2.0])
///     .variable("t2m", &["time"], ArrayD::from_elem(vec![3], 280.0))
///     .build()?;
/// # Ok::<(), geocat::error::CatalogError>(())
/// ```
#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: DatasetSchema,
    arrays: BTreeMap<String, ArrayD<f64>>,
}

impl MemorySource {
    pub fn builder() -> MemorySourceBuilder {
        MemorySourceBuilder::default()
    }
}

impl ArraySource for MemorySource {
    fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    fn read(&self, variable: &str, hyperslab: &[Range<usize>]) -> CatalogResult<ArrayD<f64>> {
        let array = self
            .arrays
            .get(variable)
            .ok_or_else(|| CatalogError::UnknownVariable(variable.to_string()))?;
        if hyperslab.len() != array.ndim() {
            return Err(CatalogError::ComputeError(format!(
                "Hyperslab rank {} does not match variable '{}' rank {}",
                hyperslab.len(),
                variable,
                array.ndim()
            )));
        }
        let view = array.slice_each_axis(|ax| Slice::from(hyperslab[ax.axis.index()].clone()));
        Ok(view.to_owned())
    }
}

#[derive(Debug, Default)]
pub struct MemorySourceBuilder {
    schema: DatasetSchema,
    arrays: BTreeMap<String, ArrayD<f64>>,
}

impl MemorySourceBuilder {
    /// Declares a dimension labelled by the given coordinate values.
    pub fn coordinate(mut self, name: &str, values: Vec<f64>) -> Self {
        self.push_coordinate(Coordinate::new(name, values));
        self
    }

    /// Declares a dimension labelled by CF-encoded times, e.g. `hours since 2020-01-01`.
    pub fn time_coordinate(mut self, name: &str, values: Vec<f64>, units: &str) -> Self {
        self.push_coordinate(Coordinate::new(name, values).with_units(units));
        self
    }

    fn push_coordinate(&mut self, coordinate: Coordinate) {
        self.schema.dimensions.push(Dimension {
            name: coordinate.name.clone(),
            len: coordinate.len(),
        });
        self.schema.coordinates.insert(coordinate.name.clone(), coordinate);
    }

    pub fn variable(mut self, name: &str, dimensions: &[&str], values: ArrayD<f64>) -> Self {
        self.schema.variables.push(VariableInfo {
            name: name.to_string(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            dtype: ValueType::Float64,
            attributes: BTreeMap::new(),
        });
        self.arrays.insert(name.to_string(), values);
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.schema.attributes.insert(name.to_string(), value.to_string());
        self
    }

    /// Checks every variable's shape against its declared dimensions.
    pub fn build(self) -> CatalogResult<MemorySource> {
        for info in &self.schema.variables {
            let array = &self.arrays[&info.name];
            let mut expected = Vec::with_capacity(info.dimensions.len());
            for dim in &info.dimensions {
                expected.push(self.schema.dimension(dim)?.len);
            }
            if array.shape() != expected.as_slice() {
                return Err(CatalogError::ComputeError(format!(
                    "Variable '{}' has shape {:?}, dimensions imply {:?}",
                    info.name,
                    array.shape(),
                    expected
                )));
            }
        }
        Ok(MemorySource {
            schema: self.schema,
            arrays: self.arrays,
        })
    }
}
