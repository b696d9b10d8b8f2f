//! # Output
//!
//! Writes materialized frames to Parquet or CSV, picked by the output
//! extension. `s3://` destinations are written to a temporary file first and
//! uploaded through [`storage`](crate::storage).

use crate::dataset::LazyDataset;
use crate::error::{CatalogError, CatalogResult};
use crate::storage::{StorageBackend, StorageFactory};
use log::debug;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Csv,
}

impl FileFormat {
    pub fn from_path(path: &str) -> CatalogResult<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("parquet") | Some("pq") => Ok(FileFormat::Parquet),
            Some("csv") => Ok(FileFormat::Csv),
            _ => Err(CatalogError::ComputeError(format!(
                "Cannot infer output format of '{}', use .parquet or .csv",
                path
            ))),
        }
    }
}

/// Writes a frame to a local file.
pub fn write_dataframe(df: &DataFrame, path: &Path, format: FileFormat) -> CatalogResult<()> {
    debug!("Writing {:?} with shape {:?} to {}", format, df.shape(), path.display());
    debug!("Schema:\n{:?}", df.schema());

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut df = df.clone();
    match format {
        FileFormat::Parquet => {
            ParquetWriter::new(file).finish(&mut df)?;
        }
        FileFormat::Csv => CsvWriter::new(file).include_header(true).finish(&mut df)?,
    }
    Ok(())
}

/// Writes a frame locally or to S3.
pub async fn write_dataframe_async(df: &DataFrame, output_path: &str) -> CatalogResult<()> {
    let format = FileFormat::from_path(output_path)?;
    if !StorageFactory::is_s3_path(output_path) {
        return write_dataframe(df, Path::new(output_path), format);
    }

    let suffix = match format {
        FileFormat::Parquet => ".parquet",
        FileFormat::Csv => ".csv",
    };
    let temp_file = tempfile::Builder::new().suffix(suffix).tempfile()?;
    write_dataframe(df, temp_file.path(), format)?;

    let storage = StorageFactory::from_path(output_path).await?;
    let data = tokio::fs::read(temp_file.path()).await?;
    storage.write(output_path, &data).await?;
    debug!("Uploaded {} bytes to {}", data.len(), output_path);
    Ok(())
}

/// Materializes a view and writes it to `output_path`.
pub async fn export(dataset: &LazyDataset, output_path: &str) -> CatalogResult<usize> {
    FileFormat::from_path(output_path)?;
    let df = dataset.to_dataframe()?;
    write_dataframe_async(&df, output_path).await?;
    Ok(df.height())
}
