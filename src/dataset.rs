//! # Lazy Datasets
//!
//! A [`LazyDataset`] is a view over an [`ArraySource`]: for every dimension
//! the view holds the selected positions, and it holds the set of projected
//! variables. [`select`](LazyDataset::select) and
//! [`project`](LazyDataset::project) only build new views; bulk values are
//! read by [`values`](LazyDataset::values), the reductions and
//! [`to_dataframe`](LazyDataset::to_dataframe).
//!
//! ```rust
//! use geocat::dataset::LazyDataset;
//! use geocat::reduce::Reduction;
//! use geocat::selection::Constraint;
//! use geocat::source::MemorySource;
//! use ndarray::{ArrayD, IxDyn};
//! use std::sync::Arc;
//!
//! let source = MemorySource::builder()
//!     .coordinate("time", vec![0.0, 1.0, 2.0, 3.0])
//!     .coordinate("latitude", vec![30.0, 20.0, 10.0])
//!     .variable("t2m", &["time", "latitude"], ArrayD::from_elem(IxDyn(&[4, 3]), 280.0))
//!     .build()?;
//! let dataset = LazyDataset::from_source("demo", Arc::new(source));
//!
//! let north = dataset.sel("latitude", Constraint::range(30.0, 20.0))?;
//! let mean = north.reduce("t2m", Reduction::Mean, &["time"])?;
//! assert_eq!(mean.values().len(), 2);
//! # Ok::<(), geocat::error::CatalogError>(())
//! ```

use crate::error::{CatalogError, CatalogResult};
use crate::extract;
use crate::reduce::{self, MaterializedResult, Reduction, Threshold};
use crate::selection::{Constraint, Coordinate, Selected};
use crate::source::{ArraySource, Dimension, ValueType};
use log::debug;
use ndarray::{ArrayD, Axis, IxDyn};
use polars::prelude::DataFrame;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct DimView {
    name: String,
    /// Positions into the source dimension, in view order
    indices: Vec<usize>,
    /// Selected by a single label; kept for its coordinate but not a view axis
    squeezed: bool,
}

/// Lazy handle over one dataset
#[derive(Clone)]
pub struct LazyDataset {
    name: String,
    source: Arc<dyn ArraySource>,
    dims: Vec<DimView>,
    variables: Vec<String>,
}

impl fmt::Debug for LazyDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDataset")
            .field("name", &self.name)
            .field("dims", &self.dims())
            .field("variables", &self.variables)
            .finish()
    }
}

/// Structure of a view, computed without reading bulk values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStructure {
    pub name: String,
    pub dims: Vec<Dimension>,
    pub variables: Vec<VariableStructure>,
    pub coords: Vec<CoordinateSummary>,
    pub attributes: BTreeMap<String, String>,
    pub nbytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableStructure {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub dtype: ValueType,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateSummary {
    pub name: String,
    pub len: usize,
    pub first: Option<String>,
    pub last: Option<String>,
    pub units: Option<String>,
}

impl LazyDataset {
    /// Full view over a source: every position of every dimension, every variable.
    pub fn from_source(name: &str, source: Arc<dyn ArraySource>) -> Self {
        let schema = source.schema();
        let dims = schema
            .dimensions
            .iter()
            .map(|d| DimView {
                name: d.name.clone(),
                indices: (0..d.len).collect(),
                squeezed: false,
            })
            .collect();
        let variables = schema.variables.iter().map(|v| v.name.clone()).collect();
        LazyDataset {
            name: name.to_string(),
            source,
            dims,
            variables,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<dyn ArraySource> {
        &self.source
    }

    /// Projected variable names.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Dimensions of the view used by at least one projected variable,
    /// excluding dimensions squeezed out by a single-label selection.
    pub fn dims(&self) -> Vec<Dimension> {
        let schema = self.source.schema();
        self.dims
            .iter()
            .filter(|d| !d.squeezed)
            .filter(|d| {
                self.variables.iter().any(|v| {
                    schema
                        .variable(v)
                        .map(|info| info.dimensions.contains(&d.name))
                        .unwrap_or(false)
                })
            })
            .map(|d| Dimension {
                name: d.name.clone(),
                len: d.indices.len(),
            })
            .collect()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.source.schema().attributes
    }

    fn dim_view(&self, name: &str) -> CatalogResult<&DimView> {
        self.dims
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CatalogError::UnknownDimension(name.to_string()))
    }

    /// Coordinate labels of a dimension restricted to the view.
    pub fn coordinate(&self, dim: &str) -> CatalogResult<Coordinate> {
        let view = self.dim_view(dim)?;
        Ok(self.source.schema().coordinate(dim)?.take(&view.indices))
    }

    /// Selected positions of a dimension in the source.
    pub fn positions(&self, dim: &str) -> CatalogResult<&[usize]> {
        Ok(&self.dim_view(dim)?.indices)
    }

    fn projected(&self, variable: &str) -> CatalogResult<()> {
        if self.variables.iter().any(|v| v == variable) {
            Ok(())
        } else {
            Err(CatalogError::UnknownVariable(variable.to_string()))
        }
    }

    /// Dimensions of a variable's materialized values.
    pub fn value_dims(&self, variable: &str) -> CatalogResult<Vec<String>> {
        self.projected(variable)?;
        let info = self.source.schema().variable(variable)?;
        let mut dims = Vec::with_capacity(info.dimensions.len());
        for name in &info.dimensions {
            if !self.dim_view(name)?.squeezed {
                dims.push(name.clone());
            }
        }
        Ok(dims)
    }

    pub fn shape(&self, variable: &str) -> CatalogResult<Vec<usize>> {
        self.value_dims(variable)?
            .iter()
            .map(|d| self.dim_view(d).map(|v| v.indices.len()))
            .collect()
    }

    /// Estimated in-memory size of the projected variables at their stored types.
    pub fn nbytes(&self) -> usize {
        let schema = self.source.schema();
        self.variables
            .iter()
            .filter_map(|v| {
                let size = schema.variable(v).ok()?.dtype.size_bytes();
                let elements: usize = self.shape(v).ok()?.iter().product();
                Some(size * elements)
            })
            .sum()
    }

    pub fn structure(&self) -> DatasetStructure {
        let schema = self.source.schema();
        let dims = self.dims();

        let variables = self
            .variables
            .iter()
            .filter_map(|v| {
                let info = schema.variable(v).ok()?;
                Some(VariableStructure {
                    name: v.clone(),
                    dims: self.value_dims(v).ok()?,
                    shape: self.shape(v).ok()?,
                    dtype: info.dtype.clone(),
                    attributes: info.attributes.clone(),
                })
            })
            .collect();

        let coords = dims
            .iter()
            .filter(|d| schema.coordinates.contains_key(&d.name))
            .filter_map(|d| {
                let coord = self.coordinate(&d.name).ok()?;
                let last = coord.len().checked_sub(1);
                Some(CoordinateSummary {
                    name: d.name.clone(),
                    len: coord.len(),
                    first: (!coord.is_empty()).then(|| coord.format_label(0)),
                    last: last.map(|p| coord.format_label(p)),
                    units: coord.units.clone(),
                })
            })
            .collect();

        DatasetStructure {
            name: self.name.clone(),
            dims,
            variables,
            coords,
            attributes: schema.attributes.clone(),
            nbytes: self.nbytes(),
        }
    }

    /// Narrows the view by label constraints, one per dimension. Constraints
    /// apply to the current view, so repeated selections compose.
    pub fn select<I, S>(&self, constraints: I) -> CatalogResult<LazyDataset>
    where
        I: IntoIterator<Item = (S, Constraint)>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        for (dim, constraint) in constraints {
            let dim = dim.as_ref();
            let coordinate = next.coordinate(dim)?;
            let view = next
                .dims
                .iter_mut()
                .find(|d| d.name == dim)
                .filter(|d| !d.squeezed)
                .ok_or_else(|| CatalogError::UnknownDimension(dim.to_string()))?;

            match coordinate.select(&constraint)? {
                Selected::Point(p) => {
                    view.indices = vec![view.indices[p]];
                    view.squeezed = true;
                }
                Selected::Positions(positions) => {
                    view.indices = positions.iter().map(|&p| view.indices[p]).collect();
                }
            }
            debug!(
                "Selected {} positions of '{}' in {}",
                view.indices.len(),
                dim,
                self.name
            );
        }
        Ok(next)
    }

    /// Single-dimension [`select`](Self::select).
    pub fn sel(&self, dim: &str, constraint: Constraint) -> CatalogResult<LazyDataset> {
        self.select([(dim, constraint)])
    }

    /// Keeps only the named variables, in the given order.
    pub fn project<I, S>(&self, names: I) -> CatalogResult<LazyDataset>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let schema = self.source.schema();
        let mut variables: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref();
            schema.variable(name)?;
            if !variables.iter().any(|v| v == name) {
                variables.push(name.to_string());
            }
        }
        Ok(LazyDataset {
            variables,
            ..self.clone()
        })
    }

    /// Materializes one variable over the view. Squeezed dimensions are
    /// dropped from the result.
    pub fn values(&self, variable: &str) -> CatalogResult<ArrayD<f64>> {
        self.projected(variable)?;
        let info = self.source.schema().variable(variable)?;
        if !info.dtype.is_numeric() {
            return Err(CatalogError::ComputeError(format!(
                "Variable '{}' has non-numeric type {}",
                variable, info.dtype
            )));
        }

        let views: Vec<&DimView> = info
            .dimensions
            .iter()
            .map(|d| self.dim_view(d))
            .collect::<CatalogResult<_>>()?;

        if views.iter().any(|v| v.indices.is_empty()) {
            let shape: Vec<usize> = views
                .iter()
                .filter(|v| !v.squeezed)
                .map(|v| v.indices.len())
                .collect();
            return Ok(ArrayD::zeros(IxDyn(&shape)));
        }

        let hyperslab: Vec<Range<usize>> = views.iter().map(|v| bounding_range(&v.indices)).collect();
        let mut array = self.source.read(variable, &hyperslab)?;
        let expected: Vec<usize> = hyperslab.iter().map(|r| r.len()).collect();
        if array.shape() != expected.as_slice() {
            return Err(CatalogError::ComputeError(format!(
                "Read of '{}' returned shape {:?}, expected {:?}",
                variable,
                array.shape(),
                expected
            )));
        }

        for (ax, (view, range)) in views.iter().zip(&hyperslab).enumerate() {
            if view.indices.len() == range.len() {
                continue;
            }
            let relative: Vec<usize> = view.indices.iter().map(|&i| i - range.start).collect();
            array = array.select(Axis(ax), &relative);
        }
        for (ax, view) in views.iter().enumerate().rev() {
            if view.squeezed {
                array = array.index_axis_move(Axis(ax), 0);
            }
        }
        Ok(array)
    }

    /// Reduces a variable over `dims`; no dims reduces over everything.
    pub fn reduce<S: AsRef<str>>(
        &self,
        variable: &str,
        op: Reduction,
        dims: &[S],
    ) -> CatalogResult<MaterializedResult> {
        self.reduce_inner(variable, op, dims, None)
    }

    /// Like [`reduce`](Self::reduce), counting only values that pass `threshold`.
    pub fn reduce_where<S: AsRef<str>>(
        &self,
        variable: &str,
        op: Reduction,
        dims: &[S],
        threshold: Threshold,
    ) -> CatalogResult<MaterializedResult> {
        self.reduce_inner(variable, op, dims, Some(threshold))
    }

    fn reduce_inner<S: AsRef<str>>(
        &self,
        variable: &str,
        op: Reduction,
        dims: &[S],
        threshold: Option<Threshold>,
    ) -> CatalogResult<MaterializedResult> {
        let value_dims = self.value_dims(variable)?;
        let mut flags = vec![dims.is_empty(); value_dims.len()];
        for dim in dims {
            let dim = dim.as_ref();
            let ax = value_dims
                .iter()
                .position(|d| d == dim)
                .ok_or_else(|| CatalogError::UnknownDimension(dim.to_string()))?;
            flags[ax] = true;
        }

        let values = self.values(variable)?;
        debug!(
            "Reducing {} {:?} of {} with {} over {:?}",
            variable,
            values.shape(),
            self.name,
            op,
            dims.iter().map(|d| d.as_ref()).collect::<Vec<_>>()
        );
        let reduced = reduce::reduce_axes(&values, &flags, op, threshold);

        if reduced.ndim() == 0 {
            return Ok(MaterializedResult::Scalar(reduced.iter().next().copied().unwrap_or(f64::NAN)));
        }
        let kept: Vec<String> = value_dims
            .into_iter()
            .zip(&flags)
            .filter(|(_, reduced)| !**reduced)
            .map(|(d, _)| d)
            .collect();
        let coords = kept
            .iter()
            .map(|d| self.coordinate(d))
            .collect::<CatalogResult<_>>()?;
        Ok(MaterializedResult::Array {
            dims: kept,
            coords,
            values: reduced,
        })
    }

    /// Reads the whole view into a table; see [`extract::dataset_to_dataframe`].
    pub fn to_dataframe(&self) -> CatalogResult<DataFrame> {
        extract::dataset_to_dataframe(self)
    }
}

fn bounding_range(indices: &[usize]) -> Range<usize> {
    let min = indices.iter().copied().min().unwrap_or(0);
    let max = indices.iter().copied().max().unwrap_or(0);
    min..max + 1
}
