//! Frozen schema and parameter facts that generators read from.
//!
//! A [`CatalogSnapshot`] is fetched once (see [`postgres::PgCatalog`]) or
//! loaded from a YAML/JSON file, and is never refreshed while generators run.

pub mod postgres;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum FactsError {
    #[snafu(display("Unknown parameter: {}", name))]
    UnknownParameter { name: String },

    #[snafu(display("Failed to read catalog snapshot {}: {}", path, source))]
    SnapshotRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse catalog snapshot {}: {}", path, source))]
    SnapshotParse {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Failed to serialize catalog snapshot: {}", source))]
    SnapshotWrite { source: serde_yaml::Error },
}

type Result<T, E = FactsError> = std::result::Result<T, E>;

/// Read-only view over schema and parameter metadata.
pub trait CatalogFacts: std::fmt::Debug + Send + Sync {
    /// Table name to its columns in declaration order.
    fn table_columns(&self) -> &BTreeMap<String, Vec<String>>;

    fn indexes(&self) -> &[ExistingIndex];

    fn parameter_info(&self, name: &str) -> Result<&ParameterInfo>;
}

pub type FactsHandle = Arc<dyn CatalogFacts>;

/// An index that already exists in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_method: Option<String>,
}

/// Declared type of a runtime parameter, as reported by `pg_settings.vartype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Bool,
    Integer,
    Real,
    String,
    Enum,
}

impl ParamType {
    pub fn from_vartype(vartype: &str) -> Option<Self> {
        match vartype {
            "bool" => Some(ParamType::Bool),
            "integer" => Some(ParamType::Integer),
            "real" => Some(ParamType::Real),
            "string" => Some(ParamType::String),
            "enum" => Some(ParamType::Enum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Bool => "bool",
            ParamType::Integer => "integer",
            ParamType::Real => "real",
            ParamType::String => "string",
            ParamType::Enum => "enum",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ParamType::Integer | ParamType::Real)
    }
}

/// Represents a PostgreSQL configuration parameter with its current value and legal domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    pub vartype: ParamType,
    pub current_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_val: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_val: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enumvals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub context: String,
}

impl ParameterInfo {
    pub fn current_numeric(&self) -> Option<f64> {
        match self.current_value.trim() {
            "on" | "true" => Some(1.0),
            "off" | "false" => Some(0.0),
            value => value.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub indexes: Vec<ExistingIndex>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterInfo>,
}

impl CatalogSnapshot {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = fs::read_to_string(path).context(SnapshotReadSnafu {
            path: display.clone(),
        })?;
        // JSON is a subset of YAML, so one parser covers both formats.
        serde_yaml::from_str(&content).context(SnapshotParseSnafu { path: display })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(SnapshotWriteSnafu)
    }

    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_index(mut self, name: &str, table: &str, columns: &[&str]) -> Self {
        self.indexes.push(ExistingIndex {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            access_method: None,
        });
        self
    }

    pub fn with_parameter(mut self, info: ParameterInfo) -> Self {
        self.parameters.insert(info.name.clone(), info);
        self
    }

    pub fn into_handle(self) -> FactsHandle {
        Arc::new(self)
    }
}

impl CatalogFacts for CatalogSnapshot {
    fn table_columns(&self) -> &BTreeMap<String, Vec<String>> {
        &self.tables
    }

    fn indexes(&self) -> &[ExistingIndex] {
        &self.indexes
    }

    fn parameter_info(&self, name: &str) -> Result<&ParameterInfo> {
        self.parameters
            .get(name)
            .ok_or_else(|| FactsError::UnknownParameter {
                name: name.to_string(),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parameter_is_an_error() {
        let snapshot = fixtures::shop();
        let err = snapshot.parameter_info("enable_seq").unwrap_err();
        assert!(matches!(err, FactsError::UnknownParameter { .. }));
    }

    #[test]
    fn snapshot_round_trips_through_yaml_file() {
        let snapshot = fixtures::shop();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), snapshot.to_yaml().unwrap()).unwrap();

        let loaded = CatalogSnapshot::from_file(file.path()).unwrap();
        assert_eq!(loaded.tables, snapshot.tables);
        assert_eq!(loaded.indexes, snapshot.indexes);
        assert_eq!(
            loaded.parameter_info("wal_level").unwrap().enumvals,
            vec!["minimal", "replica", "logical"]
        );
    }

    #[test]
    fn parses_hand_written_snapshot() {
        let yaml = r#"
tables:
  orders: [id, status]
indexes:
  - { name: orders_pkey, table: orders, columns: [id] }
parameters:
  enable_seqscan: { name: enable_seqscan, vartype: bool, current_value: "on" }
"#;
        let snapshot: CatalogSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(snapshot.table_columns()["orders"], vec!["id", "status"]);
        assert_eq!(
            snapshot.parameter_info("enable_seqscan").unwrap().vartype,
            ParamType::Bool
        );
    }
}
