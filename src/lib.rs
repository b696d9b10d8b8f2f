//! # geocat
//!
//! A catalog facade over geophysical datasets. YAML catalog descriptions
//! declare named NetCDF, Zarr, CSV and Parquet datasets; geocat opens them lazily,
//! subsets them by coordinate labels and reduces them without reading more
//! than the selected hyperslab.
//!
//! ## Features
//!
//! - **Catalogs**: one description or a glob of them, merged in path order,
//!   with `{{ CATALOG_DIR }}` and user-parameter templates in dataset arguments
//! - **Label selection**: single labels, inclusive ranges in either order,
//!   label lists, dates and datetimes on CF time axes, descending axes
//! - **Reductions**: mean, sum, max, min, std and count, over all or some
//!   dimensions, with optional thresholds
//! - **Export**: any view to Parquet or CSV, locally or on S3
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geocat::{Catalog, Constraint, OpenOptions, Reduction};
//!
//! let catalog = Catalog::open("catalogs/*.yaml", OpenOptions::new())?;
//! for name in catalog.list() {
//!     println!("{}", name);
//! }
//!
//! let t2m = catalog
//!     .resolve("era5_t2m")?
//!     .select([
//!         ("time", "2020-01-01".parse::<Constraint>()?),
//!         ("latitude", Constraint::range(25.0, 20.0)),
//!     ])?
//!     .project(["t2m"])?;
//! let mean = t2m.reduce("t2m", Reduction::Mean, &[] as &[&str])?;
//! println!("mean(t2m) = {:?}", mean.as_scalar());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Catalog Example
//!
//! ```yaml
//! metadata:
//!   version: 1
//! sources:
//!   era5_t2m:
//!     description: ERA5 2m temperature, hourly
//!     driver: netcdf
//!     args:
//!       urlpath: "{{ CATALOG_DIR }}/era5/t2m_{{ year }}.nc"
//!     parameters:
//!       year:
//!         description: Year to open
//!         type: int
//!         default: 2020
//!     metadata:
//!       tags: [reanalysis, temperature]
//! ```

pub mod batch;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod info;
pub mod netcdf_source;
pub mod output;
pub mod reduce;
pub mod selection;
pub mod source;
pub mod storage;
pub mod tabular;
pub mod template;
pub mod zarr_source;

#[cfg(test)]
mod tests;

pub use catalog::{Catalog, DatasetEntry, SearchQuery};
pub use config::{DuplicatePolicy, OpenOptions};
pub use dataset::LazyDataset;
pub use error::{CatalogError, CatalogResult};
pub use reduce::{MaterializedResult, Reduction, Threshold};
pub use selection::{Constraint, Label};
