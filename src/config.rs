//! # Open Options
//!
//! Explicit configuration handed to [`Catalog::open`](crate::catalog::Catalog::open).
//! Nothing in the library reads the process environment; the binary reads
//! `CATALOG_DIR` and friends and builds an [`OpenOptions`] from them.
//!
//! Options can also be kept in a JSON or YAML file:
//!
//! ```yaml
//! catalog_dir: /mnt/nas/era5
//! on_duplicate: last_wins
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What to do when two merged description files declare the same dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateEntry`
    #[default]
    Error,
    /// The later declaration replaces the earlier one, keeping its position
    LastWins,
}

/// Options controlling how catalog descriptions are opened and resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Value substituted for `{{ CATALOG_DIR }}` in argument templates.
    #[serde(default)]
    pub catalog_dir: Option<PathBuf>,

    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.catalog_dir = Some(dir.into());
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.on_duplicate = policy;
        self
    }

    /// Loads options from a JSON or YAML file, picked by extension
    /// (`.yaml`/`.yml` are YAML, anything else is JSON).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let options = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_options_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "catalog_dir: /data/era5\non_duplicate: last_wins").unwrap();

        let options = OpenOptions::from_file(file.path()).unwrap();
        assert_eq!(options.catalog_dir, Some(PathBuf::from("/data/era5")));
        assert_eq!(options.on_duplicate, DuplicatePolicy::LastWins);
    }

    #[test]
    fn test_options_from_json_file_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, "{{}}").unwrap();

        let options = OpenOptions::from_file(file.path()).unwrap();
        assert_eq!(options, OpenOptions::default());
        assert_eq!(options.on_duplicate, DuplicatePolicy::Error);
    }

    #[test]
    fn test_builder_methods() {
        let options = OpenOptions::new()
            .with_catalog_dir("/tmp/catalogs")
            .with_duplicate_policy(DuplicatePolicy::LastWins);
        assert_eq!(options.catalog_dir, Some(PathBuf::from("/tmp/catalogs")));
        assert_eq!(options.on_duplicate, DuplicatePolicy::LastWins);
    }
}
