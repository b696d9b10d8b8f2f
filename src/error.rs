//! # Error Types
//!
//! Every fallible facade operation returns [`CatalogError`]. Structural
//! problems (missing files, malformed descriptions, lookup misses) are
//! reported as soon as they are detected; bulk I/O and type problems that
//! only show up while materializing data are reported as
//! [`CatalogError::ComputeError`].

use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the catalog facade
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("No catalog description matches '{0}'")]
    ResourceNotFound(String),

    #[error("Malformed catalog description {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Dataset '{name}' is declared in both {first} and {second}")]
    DuplicateEntry {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("Label {label} is outside dimension '{dimension}'")]
    OutOfBounds { dimension: String, label: String },

    #[error("Invalid constraint on dimension '{dimension}': {message}")]
    InvalidConstraint { dimension: String, message: String },

    #[error("Compute error: {0}")]
    ComputeError(String),

    #[error("Template for dataset '{dataset}' references '{key}' but no value was provided")]
    MissingTemplateValue { dataset: String, key: String },

    #[error("Invalid parameter for dataset '{dataset}': {message}")]
    InvalidParameter { dataset: String, message: String },

    #[error("Driver '{driver}' of dataset '{dataset}' has no reader")]
    UnsupportedDriver { dataset: String, driver: String },

    #[error("Entry '{name}' is a {found} entry, expected a {expected} entry")]
    DriverMismatch {
        name: String,
        expected: &'static str,
        found: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

impl CatalogError {
    pub(crate) fn compute<E: std::fmt::Display>(context: &str, err: E) -> Self {
        CatalogError::ComputeError(format!("{}: {}", context, err))
    }

    /// Returns `true` for errors raised while materializing data, as opposed
    /// to structural lookup or configuration errors.
    pub fn is_compute(&self) -> bool {
        matches!(self, CatalogError::ComputeError(_))
    }
}

impl From<netcdf::Error> for CatalogError {
    fn from(error: netcdf::Error) -> Self {
        CatalogError::ComputeError(format!("NetCDF error: {}", error))
    }
}

impl From<polars::prelude::PolarsError> for CatalogError {
    fn from(error: polars::prelude::PolarsError) -> Self {
        CatalogError::ComputeError(format!("Polars error: {}", error))
    }
}
