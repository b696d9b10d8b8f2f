//! # Argument Templates
//!
//! Entry arguments may reference `{{ KEY }}` placeholders. Keys are either
//! `CATALOG_DIR`, supplied through [`OpenOptions`](crate::config::OpenOptions),
//! or a user parameter declared by the entry:
//!
//! ```yaml
//! sources:
//!   era5_monthly:
//!     driver: netcdf
//!     parameters:
//!       year: {description: Year of the file, type: int, default: 2020}
//!     args:
//!       urlpath: "{{ CATALOG_DIR }}/era5_{{ year }}.nc"
//! ```

use crate::error::{CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Template key for the catalog root directory.
pub const CATALOG_DIR: &str = "CATALOG_DIR";

/// A user parameter declared by a catalog entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserParameter {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
}

/// Values available to placeholders while rendering one entry.
pub type TemplateValues = BTreeMap<String, String>;

/// Builds the placeholder values for an entry: declared defaults first,
/// then explicit overrides, then `CATALOG_DIR`.
pub fn parameter_values(
    dataset: &str,
    declared: &BTreeMap<String, UserParameter>,
    overrides: &BTreeMap<String, String>,
    catalog_dir: Option<&str>,
) -> CatalogResult<TemplateValues> {
    let mut values = TemplateValues::new();
    for (name, parameter) in declared {
        if let Some(default) = &parameter.default {
            values.insert(name.clone(), scalar_to_string(default));
        }
    }

    for (name, value) in overrides {
        let Some(parameter) = declared.get(name) else {
            return Err(CatalogError::InvalidParameter {
                dataset: dataset.to_string(),
                message: format!("'{}' is not a declared parameter", name),
            });
        };
        if let Some(allowed) = &parameter.allowed
            && !allowed.iter().any(|a| scalar_to_string(a) == *value)
        {
            let choices: Vec<String> = allowed.iter().map(scalar_to_string).collect();
            return Err(CatalogError::InvalidParameter {
                dataset: dataset.to_string(),
                message: format!("'{}' must be one of [{}], got '{}'", name, choices.join(", "), value),
            });
        }
        values.insert(name.clone(), value.clone());
    }

    if let Some(dir) = catalog_dir {
        values.insert(CATALOG_DIR.to_string(), dir.to_string());
    }
    Ok(values)
}

/// Substitutes every `{{ KEY }}` in `template`.
pub fn render_str(dataset: &str, template: &str, values: &TemplateValues) -> CatalogResult<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let key = rest[open + 2..open + 2 + close].trim();
        let value = values.get(key).ok_or_else(|| CatalogError::MissingTemplateValue {
            dataset: dataset.to_string(),
            key: key.to_string(),
        })?;
        rendered.push_str(&rest[..open]);
        rendered.push_str(value);
        rest = &rest[open + 2 + close + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Renders every string inside a YAML value, recursing into sequences and mappings.
pub fn render_value(dataset: &str, value: &Value, values: &TemplateValues) -> CatalogResult<Value> {
    Ok(match value {
        Value::String(s) => Value::String(render_str(dataset, s, values)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|item| render_value(dataset, item, values))
                .collect::<CatalogResult<_>>()?,
        ),
        Value::Mapping(mapping) => {
            let mut rendered = serde_yaml::Mapping::new();
            for (k, v) in mapping {
                rendered.insert(k.clone(), render_value(dataset, v, values)?);
            }
            Value::Mapping(rendered)
        }
        other => other.clone(),
    })
}

pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
