//! # Tabular Sources
//!
//! CSV and Parquet files exposed through the [`ArraySource`] interface. A
//! table has a single dimension, `index`, labelled by row position, and every
//! column is a variable along it.
//!
//! Opening reads the footer (Parquet), or infers column types from a sample
//! of rows and counts records by parsing a single column (CSV). Bulk reads
//! load only the requested columns.

use crate::error::{CatalogError, CatalogResult};
use crate::source::{ArraySource, DatasetSchema, Dimension, ValueType, VariableInfo};
use log::debug;
use ndarray::{ArrayD, IxDyn};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the row dimension of every table.
pub const INDEX_DIMENSION: &str = "index";

const SCHEMA_SAMPLE_ROWS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// Maps a catalog driver name to a table format.
    pub fn from_driver(driver: &str) -> Option<Self> {
        match driver {
            "csv" => Some(TableFormat::Csv),
            "parquet" => Some(TableFormat::Parquet),
            _ => None,
        }
    }
}

/// A CSV or Parquet file
#[derive(Debug)]
pub struct TabularSource {
    path: PathBuf,
    format: TableFormat,
    schema: DatasetSchema,
    _staged: Option<NamedTempFile>,
}

impl TabularSource {
    pub fn open<P: AsRef<Path>>(path: P, format: TableFormat) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CatalogError::ResourceNotFound(path.display().to_string()));
        }
        debug!("Opening {:?} table metadata: {}", format, path.display());

        let (columns, rows) = match format {
            TableFormat::Csv => csv_metadata(&path)?,
            TableFormat::Parquet => parquet_metadata(&path)?,
        };

        let variables = columns
            .into_iter()
            .map(|(name, dtype)| VariableInfo {
                name,
                dimensions: vec![INDEX_DIMENSION.to_string()],
                dtype: value_type(&dtype),
                attributes: BTreeMap::new(),
            })
            .collect();

        Ok(TabularSource {
            path,
            format,
            schema: DatasetSchema {
                dimensions: vec![Dimension {
                    name: INDEX_DIMENSION.to_string(),
                    len: rows,
                }],
                variables,
                coordinates: BTreeMap::new(),
                attributes: BTreeMap::new(),
            },
            _staged: None,
        })
    }

    /// Opens a downloaded copy and takes ownership of it.
    pub fn open_staged(staged: NamedTempFile, format: TableFormat) -> CatalogResult<Self> {
        let mut source = Self::open(staged.path(), format)?;
        source._staged = Some(staged);
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    /// Loads the given columns for every row.
    fn load_columns(&self, columns: &[String]) -> CatalogResult<DataFrame> {
        for column in columns {
            self.schema.variable(column)?;
        }
        debug!("Loading columns {:?} from {}", columns, self.path.display());

        let df = match self.format {
            TableFormat::Csv => CsvReadOptions::default()
                .with_has_header(true)
                .with_columns(Some(columns.iter().map(|c| c.as_str().into()).collect()))
                .try_into_reader_with_file_path(Some(self.path.clone()))?
                .finish()?,
            TableFormat::Parquet => {
                let file = File::open(&self.path)
                    .map_err(|e| CatalogError::compute(&format!("opening {}", self.path.display()), e))?;
                ParquetReader::new(file)
                    .with_columns(Some(columns.to_vec()))
                    .finish()?
            }
        };
        Ok(df)
    }
}

impl ArraySource for TabularSource {
    fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    fn read(&self, variable: &str, hyperslab: &[Range<usize>]) -> CatalogResult<ArrayD<f64>> {
        let info = self.schema.variable(variable)?;
        if !info.dtype.is_numeric() {
            return Err(CatalogError::ComputeError(format!(
                "Column '{}' has non-numeric type {}",
                variable, info.dtype
            )));
        }
        let [rows] = hyperslab else {
            return Err(CatalogError::ComputeError(format!(
                "Table column '{}' is one-dimensional, got a rank {} hyperslab",
                variable,
                hyperslab.len()
            )));
        };

        let df = self.load_columns(&[variable.to_string()])?;
        let sliced = df.slice(rows.start as i64, rows.end - rows.start);
        if sliced.height() != rows.len() {
            return Err(CatalogError::ComputeError(format!(
                "Table {} has {} rows in {:?}, expected {}",
                self.path.display(),
                sliced.height(),
                rows,
                rows.len()
            )));
        }
        let values = column_as_f64(&sliced, variable)?;
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)
            .map_err(|e| CatalogError::compute("reshaping column values", e))
    }

    fn read_table(&self, columns: &[String], rows: &[usize]) -> Option<CatalogResult<DataFrame>> {
        Some(self.load_columns(columns).and_then(|df| {
            let indices: Vec<IdxSize> = rows.iter().map(|&r| r as IdxSize).collect();
            let idx = IdxCa::from_vec("rows".into(), indices);
            Ok(df.take(&idx)?)
        }))
    }
}

/// Column names with types inferred from a sample, and the row count.
fn csv_metadata(path: &Path) -> CatalogResult<(Vec<(String, DataType)>, usize)> {
    let sample = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(SCHEMA_SAMPLE_ROWS))
        .with_n_rows(Some(SCHEMA_SAMPLE_ROWS))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let columns = sample
        .get_columns()
        .iter()
        .map(|c| (c.name().to_string(), c.dtype().clone()))
        .collect();

    // Quoted fields may span lines, so rows are counted by the CSV parser.
    let rows = match sample.get_column_names().first() {
        Some(first) => CsvReadOptions::default()
            .with_has_header(true)
            .with_columns(Some([(*first).clone()].into_iter().collect()))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?
            .height(),
        None => 0,
    };
    Ok((columns, rows))
}

fn parquet_metadata(path: &Path) -> CatalogResult<(Vec<(String, DataType)>, usize)> {
    let mut reader = ParquetReader::new(File::open(path)?);
    let rows = reader.num_rows()?;
    let arrow_schema = reader.schema()?;
    let schema = Schema::from_arrow_schema(&arrow_schema);
    let columns = schema
        .iter()
        .map(|(name, dtype)| (name.to_string(), dtype.clone()))
        .collect();
    Ok((columns, rows))
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
        DataType::Boolean => ValueType::Boolean,
        DataType::String => ValueType::Text,
        other => ValueType::Other(other.to_string()),
    }
}

/// Casts one column to f64, nulls become NaN.
pub(crate) fn column_as_f64(df: &DataFrame, name: &str) -> CatalogResult<Vec<f64>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}
