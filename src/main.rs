use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use geocat::batch::{ReduceRequest, reduce_entries};
use geocat::catalog::{Catalog, SearchQuery};
use geocat::cli::{Cli, Commands, SelectionArg, merge_selections};
use geocat::config::OpenOptions;
use geocat::dataset::LazyDataset;
use geocat::info::{self, EntryDetails, ReductionSummary};
use geocat::output;
use geocat::storage::StorageFactory;
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, debug};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Warn
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp(None);
    if !cli.verbose && !cli.quiet {
        builder.parse_env("RUST_LOG");
    }
    builder.init();
}

async fn run(cli: Cli) -> Result<()> {
    let start_time = Instant::now();

    if let Commands::Completions { shell, output } = &cli.command {
        let mut command = Cli::command();
        match output {
            Some(path) => {
                let mut file = std::fs::File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                clap_complete::generate(*shell, &mut command, "geocat", &mut file);
            }
            None => clap_complete::generate(*shell, &mut command, "geocat", &mut std::io::stdout()),
        }
        return Ok(());
    }

    let catalog = open_catalog(&cli).await?;
    let format = &cli.output_format;

    match cli.command {
        Commands::List => {
            let entries: Vec<_> = catalog.entries().collect();
            info::print_entries(&catalog, &entries, format)?;
        }
        Commands::Describe { name, params } => {
            let entry = catalog.describe(&name)?;
            let location = catalog.location(&name, &to_params(params)).ok();
            info::print_entry(&EntryDetails { entry, location }, format)?;
        }
        Commands::Search { text, tag, data_type } => {
            let mut query = SearchQuery::new();
            if let Some(text) = &text {
                query = query.text(text);
            }
            if let Some(tag) = &tag {
                query = query.tag(tag);
            }
            if let Some(data_type) = &data_type {
                query = query.data_type(data_type);
            }
            let entries = catalog.search(&query);
            info::print_entries(&catalog, &entries, format)?;
        }
        Commands::Info {
            name,
            selections,
            variables,
            params,
        } => {
            let dataset = open_view(&catalog, &name, params, selections, &variables).await?;
            info::print_structure(&dataset.structure(), format)?;
        }
        Commands::Reduce {
            name,
            variable,
            op,
            over,
            selections,
            threshold,
            params,
        } => {
            let dataset = open_view(&catalog, &name, params, selections, &[]).await?;
            let result = match threshold {
                Some(threshold) => dataset.reduce_where(&variable, op, over.as_slice(), threshold)?,
                None => dataset.reduce(&variable, op, over.as_slice())?,
            };
            info::print_reduction(&ReductionSummary::new(&name, &variable, op, &result), format)?;
        }
        Commands::Batch {
            names,
            variable,
            op,
            over,
            selections,
            threshold,
        } => {
            let names = if names.is_empty() { catalog.list() } else { names };
            let mut request = ReduceRequest::new(&variable, op);
            request.dims = over;
            request.threshold = threshold;
            for selection in merge_selections(selections).map_err(anyhow::Error::msg)? {
                request = request.select(&selection.dimension, selection.constraint);
            }

            let progress = progress_bar(names.len() as u64, cli.quiet);
            let report = reduce_entries(&catalog, &names, &request, |name, _| {
                progress.set_message(name.to_string());
                progress.inc(1);
            });
            progress.finish_and_clear();

            info::print_batch(&report, &variable, op, format)?;
            if !report.is_complete() {
                bail!("{} of {} dataset(s) failed", report.failures.len(), names.len());
            }
        }
        Commands::Export {
            name,
            output,
            selections,
            variables,
            force,
            params,
        } => {
            if !force && StorageFactory::is_local_path(&output) && Path::new(&output).exists() {
                bail!("Output file {} already exists, use --force to overwrite", output);
            }
            let dataset = open_view(&catalog, &name, params, selections, &variables).await?;
            let rows = output::export(&dataset, &output)
                .await
                .with_context(|| format!("Failed to export '{}' to {}", name, output))?;
            if !cli.quiet {
                println!("Wrote {} rows to {}", rows, output);
            }
        }
        Commands::Completions { .. } => {}
    }

    debug!("Finished in {:.2?}", start_time.elapsed());
    Ok(())
}

async fn open_catalog(cli: &Cli) -> Result<Catalog> {
    let Some(locator) = &cli.catalog else {
        bail!("No catalog given, use --catalog or set GEOCAT_CATALOG");
    };

    let mut options = match &cli.config {
        Some(path) => OpenOptions::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load options from {}: {}", path.display(), e))?,
        None => OpenOptions::new(),
    };
    if let Some(dir) = &cli.catalog_dir {
        options.catalog_dir = Some(dir.clone());
    }
    if let Some(policy) = cli.on_duplicate {
        options.on_duplicate = policy.into();
    }

    let mut catalog = Catalog::open_remote(locator, options)
        .await
        .with_context(|| format!("Failed to open catalog {}", locator))?;

    // Without an explicit directory, templates resolve next to the first description.
    if catalog.options().catalog_dir.is_none()
        && let Some(dir) = catalog.files().first().and_then(|f| f.parent()).map(Path::to_path_buf)
    {
        catalog = catalog.with_catalog_dir(dir);
    }
    Ok(catalog)
}

async fn open_view(
    catalog: &Catalog,
    name: &str,
    params: Vec<(String, String)>,
    selections: Vec<SelectionArg>,
    variables: &[String],
) -> Result<LazyDataset> {
    let params = to_params(params);
    let dataset = catalog.resolve_remote_with(name, &params).await?;

    let selections = merge_selections(selections).map_err(anyhow::Error::msg)?;
    let mut dataset = dataset.select(selections.into_iter().map(|s| (s.dimension, s.constraint)))?;
    if !variables.is_empty() {
        dataset = dataset.project(variables)?;
    }
    Ok(dataset)
}

fn to_params(params: Vec<(String, String)>) -> BTreeMap<String, String> {
    params.into_iter().collect()
}

fn progress_bar(len: u64, hidden: bool) -> ProgressBar {
    if hidden || len < 2 {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}") {
        progress.set_style(style.progress_chars("=> "));
    }
    progress
}
