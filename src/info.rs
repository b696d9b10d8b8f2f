//! # Catalog and Dataset Information
//!
//! Serializable summaries of catalog entries, dataset structures and
//! reduction results, printed as human-readable text, JSON, YAML or CSV.

use crate::batch::BatchReport;
use crate::catalog::{Catalog, DatasetEntry};
use crate::cli::OutputFormat;
use crate::dataset::DatasetStructure;
use crate::reduce::{MaterializedResult, Reduction};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Listing-level view of a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub name: String,
    pub driver: String,
    pub description: String,
    pub tags: Vec<String>,
    pub data_types: Vec<String>,
}

impl From<&DatasetEntry> for EntrySummary {
    fn from(entry: &DatasetEntry) -> Self {
        EntrySummary {
            name: entry.name.clone(),
            driver: entry.driver.clone(),
            description: entry.description.clone(),
            tags: entry.metadata.tags(),
            data_types: entry.metadata.data_types(),
        }
    }
}

/// Full view of a catalog entry, with rendered arguments when they render
#[derive(Debug, Clone, Serialize)]
pub struct EntryDetails<'a> {
    #[serde(flatten)]
    pub entry: &'a DatasetEntry,
    pub location: Option<String>,
}

/// One labelled value of a reduction result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub labels: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReductionSummary {
    pub dataset: String,
    pub variable: String,
    pub op: Reduction,
    pub dims: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ReductionSummary {
    pub fn new(dataset: &str, variable: &str, op: Reduction, result: &MaterializedResult) -> Self {
        let (dims, rows) = match result {
            MaterializedResult::Scalar(value) => (
                Vec::new(),
                vec![ResultRow {
                    labels: Vec::new(),
                    value: *value,
                }],
            ),
            MaterializedResult::Array { dims, coords, values } => {
                let rows = values
                    .indexed_iter()
                    .map(|(idx, &value)| ResultRow {
                        labels: coords
                            .iter()
                            .enumerate()
                            .map(|(ax, c)| c.format_label(idx[ax]))
                            .collect(),
                        value,
                    })
                    .collect();
                (dims.clone(), rows)
            }
        };
        ReductionSummary {
            dataset: dataset.to_string(),
            variable: variable.to_string(),
            op,
            dims,
            rows,
        }
    }
}

fn print_serialized<T: Serialize>(value: &T, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        _ => print!(
            "{}",
            serde_yaml::to_string(value).context("Failed to serialize to YAML")?
        ),
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn print_entries(catalog: &Catalog, entries: &[&DatasetEntry], format: &OutputFormat) -> Result<()> {
    let summaries: Vec<EntrySummary> = entries.iter().map(|e| EntrySummary::from(*e)).collect();
    match format {
        OutputFormat::Human => {
            println!("Catalog '{}' ({} of {} datasets)", catalog.id(), summaries.len(), catalog.len());
            for summary in &summaries {
                println!("  {} [{}]", summary.name, summary.driver);
                if !summary.description.is_empty() {
                    println!("      {}", summary.description);
                }
                if !summary.tags.is_empty() {
                    println!("      tags: {}", summary.tags.join(", "));
                }
            }
        }
        OutputFormat::Csv => {
            println!("name,driver,description,tags,data_types");
            for s in &summaries {
                println!(
                    "{},{},{},{},{}",
                    csv_field(&s.name),
                    csv_field(&s.driver),
                    csv_field(&s.description),
                    csv_field(&s.tags.join(";")),
                    csv_field(&s.data_types.join(";"))
                );
            }
        }
        other => print_serialized(&summaries, other)?,
    }
    Ok(())
}

pub fn print_entry(details: &EntryDetails<'_>, format: &OutputFormat) -> Result<()> {
    let entry = details.entry;
    match format {
        OutputFormat::Human => {
            println!("Dataset: {}", entry.name);
            println!("  Driver: {} ({})", entry.driver, entry.kind);
            if !entry.description.is_empty() {
                println!("  Description: {}", entry.description);
            }
            println!("  Declared in: {}", entry.declared_in.display());
            if let Some(location) = &details.location {
                println!("  Location: {}", location);
            }
            for (key, value) in &entry.args {
                println!("  @{}: {}", key, format_value(value));
            }
            for (name, parameter) in &entry.parameters {
                let default = parameter.default.as_ref().map(format_value).unwrap_or_default();
                println!("  parameter {} (default: {})", name, default);
            }
            for (key, value) in &entry.metadata.0 {
                println!("  metadata.{}: {}", key, format_value(value));
            }
        }
        OutputFormat::Csv => {
            println!("key,value");
            println!("name,{}", csv_field(&entry.name));
            println!("driver,{}", csv_field(&entry.driver));
            println!("description,{}", csv_field(&entry.description));
            if let Some(location) = &details.location {
                println!("location,{}", csv_field(location));
            }
        }
        other => print_serialized(details, other)?,
    }
    Ok(())
}

pub fn print_structure(structure: &DatasetStructure, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => {
            println!("Dataset: {}", structure.name);
            println!("  Estimated size: {:.2} MB", structure.nbytes as f64 / 1_048_576.0);
            println!("  Dimensions:");
            for dim in &structure.dims {
                println!("    {} ({})", dim.name, dim.len);
            }
            println!("  Coordinates:");
            for coord in &structure.coords {
                let span = match (&coord.first, &coord.last) {
                    (Some(first), Some(last)) => format!("{} .. {}", first, last),
                    _ => "empty".to_string(),
                };
                let units = coord.units.as_deref().map(|u| format!(" [{}]", u)).unwrap_or_default();
                println!("    {}: {}{}", coord.name, span, units);
            }
            println!("  Variables:");
            for var in &structure.variables {
                println!("    {} ({}) - dimensions: [{}]", var.name, var.dtype, var.dims.join(", "));
                for (name, value) in &var.attributes {
                    println!("      @{}: {}", name, value);
                }
            }
            if !structure.attributes.is_empty() {
                println!("  Global Attributes:");
                for (name, value) in &structure.attributes {
                    println!("    @{}: {}", name, value);
                }
            }
        }
        OutputFormat::Csv => {
            println!("variable_name,data_type,dimensions,shape,attributes_count");
            for var in &structure.variables {
                let shape: Vec<String> = var.shape.iter().map(|s| s.to_string()).collect();
                println!(
                    "{},{},\"{}\",\"{}\",{}",
                    var.name,
                    var.dtype,
                    var.dims.join(";"),
                    shape.join(";"),
                    var.attributes.len()
                );
            }
        }
        other => print_serialized(structure, other)?,
    }
    Ok(())
}

pub fn print_reduction(summary: &ReductionSummary, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => {
            if summary.dims.is_empty() {
                let value = summary.rows.first().map(|r| r.value).unwrap_or(f64::NAN);
                println!("{}({}) of {} = {}", summary.op, summary.variable, summary.dataset, value);
            } else {
                println!(
                    "{}({}) of {} by [{}]",
                    summary.op,
                    summary.variable,
                    summary.dataset,
                    summary.dims.join(", ")
                );
                for row in &summary.rows {
                    println!("  {} => {}", row.labels.join(", "), row.value);
                }
            }
        }
        OutputFormat::Csv => {
            let mut header = summary.dims.clone();
            header.push(summary.op.to_string());
            println!("{}", header.join(","));
            for row in &summary.rows {
                let mut fields: Vec<String> = row.labels.iter().map(|l| csv_field(l)).collect();
                fields.push(row.value.to_string());
                println!("{}", fields.join(","));
            }
        }
        other => print_serialized(summary, other)?,
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    results: Vec<ReductionSummary>,
    failures: BTreeMap<String, String>,
}

pub fn print_batch(
    report: &BatchReport,
    variable: &str,
    op: Reduction,
    format: &OutputFormat,
) -> Result<()> {
    let summary = BatchSummary {
        results: report
            .results
            .iter()
            .map(|(name, result)| ReductionSummary::new(name, variable, op, result))
            .collect(),
        failures: report
            .failures
            .iter()
            .map(|f| (f.name.clone(), f.error.to_string()))
            .collect(),
    };
    match format {
        OutputFormat::Human | OutputFormat::Csv => {
            for result in &summary.results {
                print_reduction(result, format)?;
            }
            if !summary.failures.is_empty() {
                eprintln!("{} dataset(s) failed:", summary.failures.len());
                for (name, error) in &summary.failures {
                    eprintln!("  {}: {}", name, error);
                }
            }
        }
        other => print_serialized(&summary, other)?,
    }
    Ok(())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Coordinate;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_reduction_summary_labels() {
        let result = MaterializedResult::Array {
            dims: vec!["time".to_string()],
            coords: vec![Coordinate::new("time", vec![0.0, 24.0]).with_units("hours since 2020-01-01")],
            values: ArrayD::from_shape_vec(IxDyn(&[2]), vec![280.0, 281.5]).unwrap(),
        };
        let summary = ReductionSummary::new("era5", "t2m", Reduction::Mean, &result);
        assert_eq!(summary.rows.len(), 2);
        assert_eq!(summary.rows[1].labels, vec!["2020-01-02T00:00:00"]);
        assert_eq!(summary.rows[1].value, 281.5);
    }

    #[test]
    fn test_scalar_summary() {
        let summary = ReductionSummary::new("obs", "y", Reduction::Sum, &MaterializedResult::Scalar(15.0));
        assert!(summary.dims.is_empty());
        assert_eq!(summary.rows, vec![ResultRow { labels: vec![], value: 15.0 }]);
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a, b"), "\"a, b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
