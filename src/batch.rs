//! # Batch Reductions
//!
//! Runs the same reduction over many catalog entries. Each entry is
//! resolved, selected and reduced on its own; a failing entry is recorded in
//! the [`BatchReport`] and the remaining entries still run.

use crate::catalog::Catalog;
use crate::error::{CatalogError, CatalogResult};
use crate::reduce::{MaterializedResult, Reduction, Threshold};
use crate::selection::Constraint;
use log::{info, warn};

/// What to compute for every entry of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceRequest {
    pub variable: String,
    pub op: Reduction,
    /// Dimensions to reduce over; empty reduces everything
    pub dims: Vec<String>,
    pub constraints: Vec<(String, Constraint)>,
    pub threshold: Option<Threshold>,
}

impl ReduceRequest {
    pub fn new(variable: &str, op: Reduction) -> Self {
        ReduceRequest {
            variable: variable.to_string(),
            op,
            dims: Vec::new(),
            constraints: Vec::new(),
            threshold: None,
        }
    }

    pub fn over(mut self, dim: &str) -> Self {
        self.dims.push(dim.to_string());
        self
    }

    pub fn select(mut self, dim: &str, constraint: Constraint) -> Self {
        self.constraints.push((dim.to_string(), constraint));
        self
    }

    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Resolves one entry and computes the request on it.
    pub fn run(&self, catalog: &Catalog, name: &str) -> CatalogResult<MaterializedResult> {
        let dataset = catalog
            .resolve(name)?
            .select(self.constraints.iter().map(|(d, c)| (d.as_str(), c.clone())))?;
        match self.threshold {
            Some(threshold) => dataset.reduce_where(&self.variable, self.op, self.dims.as_slice(), threshold),
            None => dataset.reduce(&self.variable, self.op, self.dims.as_slice()),
        }
    }
}

#[derive(Debug)]
pub struct BatchFailure {
    pub name: String,
    pub error: CatalogError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successful results in input order
    pub results: Vec<(String, MaterializedResult)>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reduces every named entry, calling `on_progress` after each one.
pub fn reduce_entries<F>(
    catalog: &Catalog,
    names: &[String],
    request: &ReduceRequest,
    mut on_progress: F,
) -> BatchReport
where
    F: FnMut(&str, &CatalogResult<MaterializedResult>),
{
    let mut report = BatchReport::default();
    for name in names {
        let outcome = request.run(catalog, name);
        on_progress(name, &outcome);
        match outcome {
            Ok(result) => report.results.push((name.clone(), result)),
            Err(error) => {
                warn!("Reduction of '{}' failed: {}", name, error);
                report.failures.push(BatchFailure {
                    name: name.clone(),
                    error,
                });
            }
        }
    }
    info!(
        "Batch {} of {}: {} succeeded, {} failed",
        request.op,
        request.variable,
        report.results.len(),
        report.failures.len()
    );
    report
}
