//! # Catalogs
//!
//! A [`Catalog`] is the merged content of one or more YAML description files
//! in the intake v1 layout:
//!
//! ```yaml
//! name: era5
//! metadata:
//!   version: 1
//! sources:
//!   era5_hourly_global:
//!     driver: netcdf
//!     description: ERA5 hourly single levels
//!     args:
//!       urlpath: "{{ CATALOG_DIR }}/era5_hourly.nc"
//!     metadata:
//!       tags: [global, reanalysis]
//!       data_types: [temperature, pressure]
//!   station_temperature:
//!     driver: csv
//!     args:
//!       urlpath: stations/temperature.csv
//! ```
//!
//! Opening a catalog parses descriptions only. Datasets are opened by
//! [`Catalog::resolve`], which reads store metadata and returns a
//! [`LazyDataset`].
//!
//! Relative data paths are taken relative to the description file that
//! declares the entry.

use crate::config::{DuplicatePolicy, OpenOptions};
use crate::dataset::LazyDataset;
use crate::error::{CatalogError, CatalogResult};
use crate::netcdf_source::NetcdfSource;
use crate::source::ArraySource;
use crate::storage::{self, StorageBackend, StorageFactory};
use crate::tabular::{TableFormat, TabularSource};
use crate::template::{self, UserParameter};
use crate::zarr_source::ZarrSource;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Family of a catalog entry's driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Chunked multidimensional arrays: `netcdf`, `zarr`, `opendap`
    ArrayStore,
    /// `csv`, `parquet`
    Tabular,
    /// A reference to another catalog
    Catalog,
    Other(String),
}

impl DriverKind {
    pub fn from_driver(driver: &str) -> Self {
        match driver {
            "netcdf" | "zarr" | "opendap" => DriverKind::ArrayStore,
            "csv" | "parquet" => DriverKind::Tabular,
            "intake_catalog" | "yaml_file_cat" | "catalog" => DriverKind::Catalog,
            other => DriverKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::ArrayStore => write!(f, "array store"),
            DriverKind::Tabular => write!(f, "tabular"),
            DriverKind::Catalog => write!(f, "catalog"),
            DriverKind::Other(driver) => write!(f, "{}", driver),
        }
    }
}

/// Free-form metadata attached to a catalog or an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, Value>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String values under `key`; a single scalar counts as a one-element list.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Sequence(items)) => items.iter().map(template::scalar_to_string).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![template::scalar_to_string(other)],
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.strings("tags")
    }

    pub fn data_types(&self) -> Vec<String> {
        self.strings("data_types")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One named dataset declared in a catalog description
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetEntry {
    pub name: String,
    pub description: String,
    /// Driver name as written in the description
    pub driver: String,
    pub kind: DriverKind,
    /// Argument template, rendered at resolve time
    pub args: BTreeMap<String, Value>,
    pub metadata: Metadata,
    pub parameters: BTreeMap<String, UserParameter>,
    /// Description file that declared the entry
    pub declared_in: PathBuf,
}

impl DatasetEntry {
    /// The raw `urlpath` (or `path`) argument, before template rendering.
    pub fn urlpath(&self) -> Option<&str> {
        self.args
            .get("urlpath")
            .or_else(|| self.args.get("path"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    sources: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    driver: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    args: BTreeMap<String, Value>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    parameters: BTreeMap<String, UserParameter>,
}

/// Entry filter for [`Catalog::search`]. Every criterion that is set must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Case-insensitive substring of the description
    pub text: Option<String>,
    pub tag: Option<String>,
    pub data_type: Option<String>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn data_type(mut self, data_type: &str) -> Self {
        self.data_type = Some(data_type.to_string());
        self
    }

    pub fn matches(&self, entry: &DatasetEntry) -> bool {
        let text_ok = self.text.as_ref().is_none_or(|text| {
            entry
                .description
                .to_lowercase()
                .contains(&text.to_lowercase())
        });
        let tag_ok = self
            .tag
            .as_ref()
            .is_none_or(|tag| entry.metadata.tags().iter().any(|t| t == tag));
        let type_ok = self
            .data_type
            .as_ref()
            .is_none_or(|dt| entry.metadata.data_types().iter().any(|t| t == dt));
        text_ok && tag_ok && type_ok
    }
}

/// Parsed catalog descriptions
#[derive(Debug, Clone)]
pub struct Catalog {
    id: String,
    locator: String,
    description: Option<String>,
    files: Vec<PathBuf>,
    entries: Vec<DatasetEntry>,
    index: HashMap<String, usize>,
    metadata: Metadata,
    options: OpenOptions,
}

impl Catalog {
    /// Opens every description matching `locator`, a path or a glob pattern.
    ///
    /// Entries keep declaration order within a file; files are merged in
    /// sorted path order.
    pub fn open(locator: &str, options: OpenOptions) -> CatalogResult<Catalog> {
        let files = match_locator(locator)?;
        debug!("Catalog locator {} matched {} file(s)", locator, files.len());

        let mut catalog = Catalog::empty(locator, options);
        for path in &files {
            let content = fs::read_to_string(path)?;
            catalog.merge_description(path, &content)?;
        }
        catalog.finish(&files);
        Ok(catalog)
    }

    /// Parses one description held in memory. `origin` stands in for its
    /// file path: it anchors relative data paths and names the file in errors.
    pub fn from_yaml(content: &str, origin: &Path, options: OpenOptions) -> CatalogResult<Catalog> {
        let locator = origin.display().to_string();
        let mut catalog = Catalog::empty(&locator, options);
        catalog.merge_description(origin, content)?;
        catalog.finish(&[origin.to_path_buf()]);
        Ok(catalog)
    }

    /// Opens a single description from local storage or S3.
    pub async fn open_remote(locator: &str, options: OpenOptions) -> CatalogResult<Catalog> {
        if StorageFactory::is_local_path(locator) {
            return Catalog::open(locator, options);
        }
        let storage = StorageFactory::from_path(locator).await?;
        let bytes = storage.read(locator).await?;
        let content = String::from_utf8(bytes).map_err(|e| CatalogError::ParseError {
            path: PathBuf::from(locator),
            message: format!("description is not UTF-8: {}", e),
        })?;
        Catalog::from_yaml(&content, Path::new(locator), options)
    }

    fn empty(locator: &str, options: OpenOptions) -> Catalog {
        Catalog {
            id: String::new(),
            locator: locator.to_string(),
            description: None,
            files: Vec::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            metadata: Metadata::default(),
            options,
        }
    }

    fn finish(&mut self, files: &[PathBuf]) {
        if self.id.is_empty() {
            self.id = files
                .first()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| self.locator.clone());
        }
        self.files = files.to_vec();
        info!(
            "Opened catalog '{}' with {} dataset(s) from {} file(s)",
            self.id,
            self.entries.len(),
            self.files.len()
        );
    }

    fn merge_description(&mut self, path: &Path, content: &str) -> CatalogResult<()> {
        let raw: RawCatalog = serde_yaml::from_str(content).map_err(|e| parse_error(path, e))?;

        if self.id.is_empty()
            && let Some(name) = raw.name
        {
            self.id = name;
        }
        if self.description.is_none() {
            self.description = raw.description;
        }
        for (key, value) in raw.metadata.0 {
            self.metadata.0.entry(key).or_insert(value);
        }

        let sources = match raw.sources {
            Some(Value::Mapping(sources)) => sources,
            Some(Value::Null) => serde_yaml::Mapping::new(),
            Some(_) => return Err(parse_error(path, "'sources' must be a mapping")),
            None => return Err(parse_error(path, "missing 'sources' section")),
        };

        for (key, value) in sources {
            let name = match key {
                Value::String(name) => name,
                other => {
                    return Err(parse_error(path, format!("dataset name {:?} is not a string", other)));
                }
            };
            if !value.is_mapping() {
                return Err(parse_error(path, format!("entry '{}' is not a mapping", name)));
            }
            let raw: RawEntry = serde_yaml::from_value(value)
                .map_err(|e| parse_error(path, format!("entry '{}': {}", name, e)))?;

            let entry = DatasetEntry {
                kind: DriverKind::from_driver(&raw.driver),
                name: name.clone(),
                description: raw.description.unwrap_or_default(),
                driver: raw.driver,
                args: raw.args,
                metadata: raw.metadata,
                parameters: raw.parameters,
                declared_in: path.to_path_buf(),
            };
            self.insert(entry)?;
        }
        Ok(())
    }

    fn insert(&mut self, entry: DatasetEntry) -> CatalogResult<()> {
        match self.index.get(&entry.name) {
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
            Some(&position) => match self.options.on_duplicate {
                DuplicatePolicy::Error => {
                    return Err(CatalogError::DuplicateEntry {
                        name: entry.name,
                        first: self.entries[position].declared_in.clone(),
                        second: entry.declared_in,
                    });
                }
                DuplicatePolicy::LastWins => {
                    warn!(
                        "Dataset '{}' from {} replaces the one from {}",
                        entry.name,
                        entry.declared_in.display(),
                        self.entries[position].declared_in.display()
                    );
                    self.entries[position] = entry;
                }
            },
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Description files that were merged, in merge order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Sets the `{{ CATALOG_DIR }}` value used by later resolutions.
    pub fn with_catalog_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.options.catalog_dir = Some(dir.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Dataset names in discovery order.
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DatasetEntry> {
        self.entries.iter()
    }

    pub fn describe(&self, name: &str) -> CatalogResult<&DatasetEntry> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| CatalogError::UnknownDataset(name.to_string()))
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<&DatasetEntry> {
        self.entries.iter().filter(|e| query.matches(e)).collect()
    }

    /// Entry arguments with every template rendered.
    pub fn rendered_args(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> CatalogResult<BTreeMap<String, Value>> {
        let entry = self.describe(name)?;
        let catalog_dir = self
            .options
            .catalog_dir
            .as_ref()
            .map(|d| d.display().to_string());
        let values =
            template::parameter_values(name, &entry.parameters, params, catalog_dir.as_deref())?;

        let mut rendered = BTreeMap::new();
        for (key, value) in &entry.args {
            rendered.insert(key.clone(), template::render_value(name, value, &values)?);
        }
        Ok(rendered)
    }

    /// Rendered data location of an entry, anchored at its description file.
    pub fn location(&self, name: &str, params: &BTreeMap<String, String>) -> CatalogResult<String> {
        let entry = self.describe(name)?;
        let args = self.rendered_args(name, params)?;
        let urlpath = match args.get("urlpath").or_else(|| args.get("path")) {
            Some(Value::String(urlpath)) => urlpath.clone(),
            Some(Value::Sequence(_)) => {
                return Err(CatalogError::InvalidParameter {
                    dataset: name.to_string(),
                    message: "multi-file urlpath lists are not supported".to_string(),
                });
            }
            _ => {
                return Err(parse_error(
                    &entry.declared_in,
                    format!("entry '{}' has no urlpath argument", name),
                ));
            }
        };
        Ok(anchor_location(&entry.declared_in, &urlpath))
    }

    /// Opens a dataset's backing store and returns the full lazy view.
    pub fn resolve(&self, name: &str) -> CatalogResult<LazyDataset> {
        self.resolve_with(name, &BTreeMap::new())
    }

    /// Like [`resolve`](Self::resolve), overriding declared user parameters.
    pub fn resolve_with(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> CatalogResult<LazyDataset> {
        let entry = self.describe(name)?;
        check_dataset_driver(entry)?;
        let location = self.location(name, params)?;

        if StorageFactory::is_s3_path(&location) {
            return Err(CatalogError::UnsupportedDriver {
                dataset: name.to_string(),
                driver: format!("{} (remote urlpath {}, use resolve_remote)", entry.driver, location),
            });
        }
        let path = location.strip_prefix("file://").unwrap_or(&location);
        debug!("Resolving '{}' ({}) at {}", name, entry.driver, path);

        let source: Arc<dyn ArraySource> = match TableFormat::from_driver(&entry.driver) {
            Some(format) => Arc::new(TabularSource::open(path, format)?),
            None if entry.driver == "zarr" => Arc::new(ZarrSource::open(path)?),
            None => Arc::new(NetcdfSource::open(path)?),
        };
        Ok(LazyDataset::from_source(name, source))
    }

    /// Like [`resolve`](Self::resolve), downloading `s3://` data into a
    /// temporary file first. Local entries resolve as usual.
    pub async fn resolve_remote(&self, name: &str) -> CatalogResult<LazyDataset> {
        self.resolve_remote_with(name, &BTreeMap::new()).await
    }

    /// Like [`resolve_remote`](Self::resolve_remote), overriding declared user parameters.
    pub async fn resolve_remote_with(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> CatalogResult<LazyDataset> {
        let entry = self.describe(name)?;
        check_dataset_driver(entry)?;
        let location = self.location(name, params)?;
        if !StorageFactory::is_s3_path(&location) {
            return self.resolve_with(name, params);
        }
        if entry.driver == "zarr" {
            return Err(CatalogError::UnsupportedDriver {
                dataset: name.to_string(),
                driver: format!("zarr (remote store {})", location),
            });
        }

        info!("Downloading {} for dataset '{}'", location, name);
        let staged = storage::stage_to_tempfile(&location).await?;
        let source: Arc<dyn ArraySource> = match TableFormat::from_driver(&entry.driver) {
            Some(format) => Arc::new(TabularSource::open_staged(staged, format)?),
            None => Arc::new(NetcdfSource::open_staged(staged)?),
        };
        Ok(LazyDataset::from_source(name, source))
    }

    /// Opens a nested catalog entry with this catalog's options.
    pub fn subcatalog(&self, name: &str) -> CatalogResult<Catalog> {
        let entry = self.describe(name)?;
        if entry.kind != DriverKind::Catalog {
            return Err(CatalogError::DriverMismatch {
                name: name.to_string(),
                expected: "catalog",
                found: entry.driver.clone(),
            });
        }
        let location = self.location(name, &BTreeMap::new())?;
        Catalog::open(&location, self.options.clone())
    }
}

fn check_dataset_driver(entry: &DatasetEntry) -> CatalogResult<()> {
    match &entry.kind {
        DriverKind::Catalog => Err(CatalogError::DriverMismatch {
            name: entry.name.clone(),
            expected: "dataset",
            found: entry.driver.clone(),
        }),
        DriverKind::ArrayStore if matches!(entry.driver.as_str(), "netcdf" | "zarr") => Ok(()),
        DriverKind::Tabular => Ok(()),
        _ => Err(CatalogError::UnsupportedDriver {
            dataset: entry.name.clone(),
            driver: entry.driver.clone(),
        }),
    }
}

fn parse_error<E: fmt::Display>(path: &Path, message: E) -> CatalogError {
    CatalogError::ParseError {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn is_glob_pattern(locator: &str) -> bool {
    locator.contains(['*', '?', '['])
}

/// Description files for a locator, sorted when it is a glob pattern.
fn match_locator(locator: &str) -> CatalogResult<Vec<PathBuf>> {
    if !is_glob_pattern(locator) {
        let path = PathBuf::from(locator);
        if !path.is_file() {
            return Err(CatalogError::ResourceNotFound(locator.to_string()));
        }
        return Ok(vec![path]);
    }

    let mut files: Vec<PathBuf> = glob::glob(locator)
        .map_err(|e| parse_error(Path::new(locator), e))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(CatalogError::ResourceNotFound(locator.to_string()));
    }
    Ok(files)
}

/// Joins a relative location onto the directory of the declaring description.
fn anchor_location(declared_in: &Path, location: &str) -> String {
    if location.contains("://") || Path::new(location).is_absolute() {
        return location.to_string();
    }
    let base = declared_in.parent().unwrap_or_else(|| Path::new(""));
    let base_str = base.to_string_lossy();
    if StorageFactory::is_s3_path(&base_str) {
        return format!("{}/{}", base_str.trim_end_matches('/'), location);
    }
    base.join(location).display().to_string()
}
