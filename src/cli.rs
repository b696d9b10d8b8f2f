//! # CLI Module
//!
//! Command-line interface of geocat:
//! - Argument parsing with clap
//! - Catalog options from flags, environment variables and an options file
//! - Selection DSL parsing (`dim=constraint`) for arguments and `GEOCAT_SELECT`

use crate::config::DuplicatePolicy;
use crate::reduce::{Reduction, Threshold};
use crate::selection::Constraint;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Catalog-driven access to gridded and tabular geophysical datasets
#[derive(Parser, Debug)]
#[command(name = "geocat")]
#[command(about = "Discover, subset and reduce datasets declared in YAML catalogs")]
#[command(version)]
#[command(long_about = "
geocat opens YAML catalog descriptions and gives uniform, lazy access to the
NetCDF, CSV and Parquet datasets they declare. Datasets are subset by
coordinate labels and reduced without loading more than the selected
hyperslab.

FEATURES:
  • Catalogs from one file or a glob of files, merged in path order
  • Label-based selection: single values, ranges, lists, dates and datetimes
  • Reductions: mean, sum, max, min, std and thresholded counts
  • Export of any view to Parquet or CSV, locally or on S3
  • Shell completions: Auto-completion for bash, zsh, fish, and PowerShell

EXAMPLES:
  # List datasets
  geocat --catalog 'catalogs/*.yaml' list

  # Describe one entry
  geocat --catalog era5.yaml describe era5_t2m

  # Mean 2m temperature over a day and a latitude band
  geocat --catalog era5.yaml reduce era5_t2m -n t2m --op mean \\
    --sel time=2020-01-01 --sel latitude=25:20

  # Count hours with CAPE above 2000 J/kg, per grid point
  geocat --catalog era5.yaml reduce era5_cape -n cape --op count \\
    --over time --where '>2000'

  # Export a subset
  geocat --catalog era5.yaml export era5_t2m subset.parquet --sel level=500

  # Generate completions
  geocat completions bash > ~/.bash_completion.d/geocat
")]
pub struct Cli {
    /// Catalog description path or glob pattern (local or S3)
    #[arg(long, global = true, env = "GEOCAT_CATALOG")]
    pub catalog: Option<String>,

    /// Directory substituted for {{ CATALOG_DIR }} in dataset arguments
    #[arg(long, global = true, env = "CATALOG_DIR")]
    pub catalog_dir: Option<PathBuf>,

    /// How to treat datasets declared in more than one merged file
    #[arg(long, global = true, value_enum)]
    pub on_duplicate: Option<DuplicateArg>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Options file path (JSON or YAML)
    #[arg(short, long, global = true, env = "GEOCAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the datasets of a catalog
    List,

    /// Show the declaration of one dataset
    #[command(long_about = "
Show everything a catalog declares about one dataset: driver, description,
arguments, user parameters and metadata, plus the rendered data location.

EXAMPLES:
  geocat --catalog era5.yaml describe era5_t2m
  geocat --catalog era5.yaml describe era5_t2m -p year=2021 --output-format json
")]
    Describe {
        /// Dataset name
        name: String,

        /// User parameter override: key=value (can be used multiple times)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Search datasets by description text, tag or data type
    #[command(long_about = "
Search catalog entries. Every given criterion must match; text matches the
description case-insensitively, tags and data types match exactly.

EXAMPLES:
  geocat --catalog 'catalogs/*.yaml' search --tag reanalysis
  geocat --catalog 'catalogs/*.yaml' search --text temperature --data-type gridded
")]
    Search {
        /// Text contained in the description
        #[arg(long)]
        text: Option<String>,

        /// Metadata tag
        #[arg(long)]
        tag: Option<String>,

        /// Metadata data type
        #[arg(long)]
        data_type: Option<String>,
    },

    /// Show dimensions, coordinates and variables of a dataset view
    #[command(long_about = "
Open a dataset lazily and print its structure. Selections and projections
are applied first, so the output shows the view they produce.

EXAMPLES:
  geocat --catalog era5.yaml info era5_t2m
  geocat --catalog era5.yaml info era5_t2m --sel latitude=30:10 --vars t2m
  geocat --catalog era5.yaml info era5_t2m --output-format json
")]
    Info {
        /// Dataset name
        name: String,

        /// Selection: dimension=constraint (can be used multiple times)
        #[arg(long = "sel", value_parser = parse_selection)]
        selections: Vec<SelectionArg>,

        /// Variables to keep
        #[arg(long = "vars", value_delimiter = ',')]
        variables: Vec<String>,

        /// User parameter override: key=value (can be used multiple times)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Reduce one variable of a dataset
    #[command(long_about = "
Compute a reduction over a selected view. Without --over every dimension is
reduced and a scalar is printed; with --over only those dimensions are
reduced and one value per remaining label is printed.

Selection constraints:
  • dimension=value        single label, the dimension is dropped
  • dimension=start:end    inclusive range, in either order
  • dimension=v1,v2,v3     explicit labels
  • dimension=2020-01-01   a whole day on a time axis

EXAMPLES:
  geocat --catalog era5.yaml reduce era5_t2m -n t2m --op mean
  geocat --catalog era5.yaml reduce era5_t2m -n t2m --op max --over time \\
    --sel time=2020-01-01:2020-01-31
  geocat --catalog era5.yaml reduce era5_cape -n cape --op count --where '>2000'
")]
    Reduce {
        /// Dataset name
        name: String,

        /// Variable to reduce
        #[arg(short = 'n', long)]
        variable: String,

        /// Reduction: mean, sum, max, min, std or count
        #[arg(long, default_value = "mean")]
        op: Reduction,

        /// Dimension to reduce over (can be used multiple times)
        #[arg(long = "over")]
        over: Vec<String>,

        /// Selection: dimension=constraint (can be used multiple times)
        #[arg(long = "sel", value_parser = parse_selection)]
        selections: Vec<SelectionArg>,

        /// Keep only values passing a threshold, e.g. '>2000' or '<=0'
        #[arg(long = "where")]
        threshold: Option<Threshold>,

        /// User parameter override: key=value (can be used multiple times)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Run the same reduction over many datasets
    #[command(long_about = "
Run one reduction over several catalog entries. Entries that fail are
reported at the end and do not stop the others.

EXAMPLES:
  # Every dataset in the catalog
  geocat --catalog 'catalogs/*.yaml' batch -n t2m --op mean

  # Selected datasets, per time step
  geocat --catalog era5.yaml batch era5_2020 era5_2021 -n t2m --op max \\
    --over latitude --over longitude
")]
    Batch {
        /// Dataset names (default: every entry)
        names: Vec<String>,

        /// Variable to reduce
        #[arg(short = 'n', long)]
        variable: String,

        /// Reduction: mean, sum, max, min, std or count
        #[arg(long, default_value = "mean")]
        op: Reduction,

        /// Dimension to reduce over (can be used multiple times)
        #[arg(long = "over")]
        over: Vec<String>,

        /// Selection: dimension=constraint (can be used multiple times)
        #[arg(long = "sel", value_parser = parse_selection)]
        selections: Vec<SelectionArg>,

        /// Keep only values passing a threshold
        #[arg(long = "where")]
        threshold: Option<Threshold>,
    },

    /// Write a dataset view to Parquet or CSV
    #[command(long_about = "
Materialize a dataset view in long format (one row per coordinate
combination, one column per variable) and write it to Parquet or CSV.
The format follows the output extension; s3:// outputs are uploaded.

EXAMPLES:
  geocat --catalog era5.yaml export era5_t2m t2m.parquet --sel latitude=30:10
  geocat --catalog obs.yaml export stations s3://bucket/stations.csv --vars x,y
")]
    Export {
        /// Dataset name
        name: String,

        /// Output path (.parquet or .csv, local or S3)
        output: String,

        /// Selection: dimension=constraint (can be used multiple times)
        #[arg(long = "sel", value_parser = parse_selection)]
        selections: Vec<SelectionArg>,

        /// Variables to keep
        #[arg(long = "vars", value_delimiter = ',')]
        variables: Vec<String>,

        /// Force overwrite existing output files
        #[arg(long)]
        force: bool,

        /// User parameter override: key=value (can be used multiple times)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for bash, zsh, fish, and PowerShell.

INSTALLATION:
  # Bash
  geocat completions bash > ~/.bash_completion.d/geocat

  # Zsh
  geocat completions zsh > ~/.zsh/completions/_geocat

  # Fish
  geocat completions fish > ~/.config/fish/completions/geocat.fish
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateArg {
    /// Fail when a dataset is declared twice
    Error,
    /// Keep the declaration from the last file
    LastWins,
}

impl From<DuplicateArg> for DuplicatePolicy {
    fn from(arg: DuplicateArg) -> Self {
        match arg {
            DuplicateArg::Error => DuplicatePolicy::Error,
            DuplicateArg::LastWins => DuplicatePolicy::LastWins,
        }
    }
}

/// Selection argument from command line
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionArg {
    pub dimension: String,
    pub constraint: Constraint,
}

/// Parse a selection from command line argument
/// Format: dimension=constraint
pub fn parse_selection(s: &str) -> Result<SelectionArg, String> {
    let (dimension, constraint) = s
        .split_once('=')
        .ok_or("Selection must be in format 'dimension=constraint'")?;
    let dimension = dimension.trim();
    if dimension.is_empty() {
        return Err("Selection dimension cannot be empty".to_string());
    }
    if constraint.trim().is_empty() {
        return Err(format!("Selection on '{}' has no constraint", dimension));
    }

    Ok(SelectionArg {
        dimension: dimension.to_string(),
        constraint: constraint.trim().parse()?,
    })
}

/// Parse a user parameter override
/// Format: key=value
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or("Parameter must be in format 'key=value'")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("Parameter name cannot be empty".to_string());
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Environment variable format:
/// - GEOCAT_SELECT: "time=2020-01-01;latitude=30:10;level=1000,850"
pub fn parse_selections_from_env() -> Result<Vec<SelectionArg>, String> {
    let mut selections = Vec::new();
    if let Ok(select_env) = env::var("GEOCAT_SELECT")
        && !select_env.trim().is_empty()
    {
        for selection in select_env.split(';') {
            let selection = selection.trim();
            if !selection.is_empty() {
                selections.push(
                    parse_selection(selection)
                        .map_err(|e| format!("Invalid selection in GEOCAT_SELECT: {}", e))?,
                );
            }
        }
    }
    Ok(selections)
}

/// Merge CLI selections with environment variable selections
/// Priority: CLI arguments > Environment variables
pub fn merge_selections(cli: Vec<SelectionArg>) -> Result<Vec<SelectionArg>, String> {
    if cli.is_empty() {
        parse_selections_from_env()
    } else {
        Ok(cli)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Label;
    use std::sync::Mutex;

    // Global mutex to ensure environment variable tests run sequentially
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_selection() {
        let result = parse_selection("latitude=30:10").unwrap();
        assert_eq!(result.dimension, "latitude");
        assert_eq!(result.constraint, Constraint::range(30.0, 10.0));

        let result = parse_selection("level=1000,850").unwrap();
        assert_eq!(result.constraint, Constraint::list([1000.0, 850.0]));

        let result = parse_selection("time=2020-01-01T06:00:00").unwrap();
        assert!(matches!(result.constraint, Constraint::Label(Label::DateTime(_))));

        // Test invalid formats
        assert!(parse_selection("latitude").is_err());
        assert!(parse_selection("=30").is_err());
        assert!(parse_selection("latitude=").is_err());
        assert!(parse_selection("latitude=north").is_err());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("year = 2021").unwrap(),
            ("year".to_string(), "2021".to_string())
        );
        assert!(parse_key_value("year").is_err());
        assert!(parse_key_value("=2021").is_err());
    }

    #[test]
    fn test_duplicate_arg_conversion() {
        assert_eq!(DuplicatePolicy::from(DuplicateArg::Error), DuplicatePolicy::Error);
        assert_eq!(DuplicatePolicy::from(DuplicateArg::LastWins), DuplicatePolicy::LastWins);
    }

    #[test]
    fn test_selections_from_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let original = env::var("GEOCAT_SELECT").ok();

        unsafe {
            env::set_var("GEOCAT_SELECT", "time=2020-01-01; latitude=30:10 ;");
        }
        let result = parse_selections_from_env().unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].dimension, "time");
        assert_eq!(result[1].constraint, Constraint::range(30.0, 10.0));

        unsafe {
            env::set_var("GEOCAT_SELECT", "latitude");
        }
        assert!(parse_selections_from_env().is_err());

        unsafe {
            match original {
                Some(value) => env::set_var("GEOCAT_SELECT", value),
                None => env::remove_var("GEOCAT_SELECT"),
            }
        }
    }

    #[test]
    fn test_cli_selections_take_priority() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let original = env::var("GEOCAT_SELECT").ok();

        unsafe {
            env::set_var("GEOCAT_SELECT", "level=500");
        }
        let cli = vec![parse_selection("latitude=25").unwrap()];
        let merged = merge_selections(cli).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].dimension, "latitude");

        let merged = merge_selections(Vec::new()).unwrap();
        assert_eq!(merged[0].dimension, "level");

        unsafe {
            match original {
                Some(value) => env::set_var("GEOCAT_SELECT", value),
                None => env::remove_var("GEOCAT_SELECT"),
            }
        }
    }
}
