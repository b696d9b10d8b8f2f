//! # Data Extraction
//!
//! Materializes a [`LazyDataset`] view into a Polars DataFrame.
//!
//! - Tabular sources return their projected columns for the selected rows,
//!   with native column types.
//! - Array sources return long format: one column per remaining dimension
//!   holding its coordinate labels, then one column per projected variable.
//!   Rows follow row-major order over the remaining dimensions.

use crate::dataset::LazyDataset;
use crate::error::{CatalogError, CatalogResult};
use crate::selection::Coordinate;
use crate::tabular::INDEX_DIMENSION;
use log::debug;
use polars::prelude::*;

pub fn dataset_to_dataframe(dataset: &LazyDataset) -> CatalogResult<DataFrame> {
    let columns = dataset.variables().to_vec();
    if columns.is_empty() {
        return Err(CatalogError::ComputeError(format!(
            "Dataset '{}' has no projected variables",
            dataset.name()
        )));
    }

    if let Ok(rows) = dataset.positions(INDEX_DIMENSION)
        && let Some(table) = dataset.source().read_table(&columns, rows)
    {
        let df = table?;
        debug!("Materialized table {} with shape {:?}", dataset.name(), df.shape());
        return Ok(df);
    }

    let dims = shared_dims(dataset, &columns)?;
    let coordinates: Vec<Coordinate> = dims
        .iter()
        .map(|d| dataset.coordinate(d))
        .collect::<CatalogResult<_>>()?;
    let shape: Vec<usize> = coordinates.iter().map(Coordinate::len).collect();
    let rows: usize = shape.iter().product();

    let mut frame_columns: Vec<Column> = Vec::with_capacity(dims.len() + columns.len());
    for (ax, coordinate) in coordinates.iter().enumerate() {
        let labels: Vec<f64> = (0..rows)
            .map(|row| coordinate.values[axis_position(row, &shape, ax)])
            .collect();
        frame_columns.push(Series::new(coordinate.name.as_str().into(), labels).into());
    }

    for name in &columns {
        let values = dataset.values(name)?;
        // Standard layout iterates in row-major order, matching the label columns.
        let flat: Vec<f64> = values.iter().copied().collect();
        if flat.len() != rows {
            return Err(CatalogError::ComputeError(format!(
                "Variable '{}' produced {} values for {} rows",
                name,
                flat.len(),
                rows
            )));
        }
        frame_columns.push(Series::new(name.as_str().into(), flat).into());
    }

    let df = DataFrame::new(frame_columns)?;
    debug!("Materialized {} in long format with shape {:?}", dataset.name(), df.shape());
    Ok(df)
}

/// Dimensions shared by every projected variable.
fn shared_dims(dataset: &LazyDataset, columns: &[String]) -> CatalogResult<Vec<String>> {
    let dims = dataset.value_dims(&columns[0])?;
    for name in &columns[1..] {
        let other = dataset.value_dims(name)?;
        if other != dims {
            return Err(CatalogError::ComputeError(format!(
                "Variables '{}' {:?} and '{}' {:?} do not share dimensions; project one of them first",
                columns[0], dims, name, other
            )));
        }
    }
    Ok(dims)
}

/// Position along `axis` of the `row`-th element in row-major order.
fn axis_position(row: usize, shape: &[usize], axis: usize) -> usize {
    let stride: usize = shape[axis + 1..].iter().product();
    (row / stride) % shape[axis]
}
