//! Parameter specifications.
//!
//! Each component version ships a catalog of recognized configuration
//! keys: their type, default, bounds, and what remediation a change to
//! them requires. Catalogs are loaded once per component version and
//! shared read-only between every store that needs them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};
use flotilla_core::{ComponentName, ConfigMap, ConfigStatus};

/// Declared type of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
}

/// Remediation required when a key's value changes on a running cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    #[default]
    None,
    Reload,
    Restart,
    Redeploy,
}

impl MutationPolicy {
    pub fn remediation(&self) -> ConfigStatus {
        match self {
            MutationPolicy::None => ConfigStatus::Unchanged,
            MutationPolicy::Reload => ConfigStatus::NeedsReload,
            MutationPolicy::Restart => ConfigStatus::NeedsRestart,
            MutationPolicy::Redeploy => ConfigStatus::NeedsRedeploy,
        }
    }
}

/// How a live parameter's value may move once the component runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModifyLimit {
    #[default]
    None,
    Fixed,
    IncreaseOnly,
    DecreaseOnly,
}

impl fmt::Display for ModifyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModifyLimit::None => "unrestricted",
            ModifyLimit::Fixed => "fixed",
            ModifyLimit::IncreaseOnly => "increase-only",
            ModifyLimit::DecreaseOnly => "decrease-only",
        };
        f.write_str(s)
    }
}

/// Specification of one configuration key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub mutation_policy: MutationPolicy,
    #[serde(default)]
    pub modify_limit: ModifyLimit,
}

impl ParameterSpec {
    /// Coerce a raw declared value to this spec's type and check bounds.
    ///
    /// Returns the reason on failure; the caller attaches component and
    /// server context.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        let coerced = match self.param_type {
            ParamType::Bool => match value {
                Value::Bool(_) => value.clone(),
                Value::String(s) => match s.as_str() {
                    "true" | "True" => Value::Bool(true),
                    "false" | "False" => Value::Bool(false),
                    _ => return Err(format!("expected bool, got {s:?}")),
                },
                other => return Err(format!("expected bool, got {}", kind(other))),
            },
            ParamType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("expected integer, got {s:?}"))?,
                other => return Err(format!("expected integer, got {}", kind(other))),
            },
            ParamType::Float => match value {
                Value::Number(_) => value.clone(),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| format!("expected float, got {s:?}"))?,
                other => return Err(format!("expected float, got {}", kind(other))),
            },
            ParamType::String => match value {
                Value::String(_) => value.clone(),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                other => return Err(format!("expected string, got {}", kind(other))),
            },
            ParamType::List => match value {
                Value::Sequence(_) => value.clone(),
                other => return Err(format!("expected list, got {}", kind(other))),
            },
            ParamType::Map => match value {
                Value::Mapping(_) => value.clone(),
                other => return Err(format!("expected map, got {}", kind(other))),
            },
        };

        if let Some(n) = numeric(&coerced) {
            if let Some(min) = self.min {
                if n < min {
                    return Err(format!("value {n} below minimum {min}"));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(format!("value {n} above maximum {max}"));
                }
            }
        }
        Ok(coerced)
    }
}

/// Numeric view of a value, for bounds and modify-limit comparisons.
pub fn numeric(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged",
    }
}

/// Per-component-version catalog of parameter specs.
///
/// Loaded from a capability descriptor shipped alongside the plugin tree;
/// immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParamCatalog {
    #[serde(default)]
    pub component: ComponentName,
    #[serde(default)]
    pub params: Vec<ParameterSpec>,
    #[serde(skip)]
    by_name: BTreeMap<String, usize>,
}

impl ParamCatalog {
    pub fn new(component: impl Into<ComponentName>, params: Vec<ParameterSpec>) -> Self {
        let mut catalog = Self {
            component: component.into(),
            params,
            by_name: BTreeMap::new(),
        };
        catalog.reindex();
        catalog
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.display().to_string(),
            source,
        })?;
        let mut catalog: ParamCatalog =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::CatalogParse {
                path: path.display().to_string(),
                source,
            })?;
        catalog.reindex();
        Ok(catalog)
    }

    fn reindex(&mut self) {
        self.by_name = self
            .params
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();
    }

    pub fn get(&self, key: &str) -> Option<&ParameterSpec> {
        self.by_name.get(key).map(|&i| &self.params[i])
    }

    /// Lowest-precedence layer: every spec's declared default.
    pub fn defaults(&self) -> ConfigMap {
        self.params
            .iter()
            .filter_map(|spec| spec.default.clone().map(|v| (spec.name.clone(), v)))
            .collect()
    }

    /// Keys marked required that have neither a default nor a value in
    /// `merged`.
    pub fn missing_required(&self, merged: &ConfigMap) -> Vec<&str> {
        self.params
            .iter()
            .filter(|spec| {
                spec.required && spec.default.is_none() && !merged.contains_key(&spec.name)
            })
            .map(|spec| spec.name.as_str())
            .collect()
    }
}
