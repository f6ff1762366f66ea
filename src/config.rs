use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read config file {}: {}", path, source))]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse YAML config {}: {}", path, source))]
    YamlParse {
        path: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Workload coverage must be in (0, 1], got {}", coverage))]
    InvalidCoverage { coverage: f64 },
}

type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_connection_params(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// What the engine does when a generator fails while producing actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the whole run with the generator's error.
    #[default]
    Abort,
    /// Log the error, keep what was collected and continue with the next generator.
    Skip,
}

/// One entry of the `generators` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorDecl {
    pub name: String,
    pub generator: String,
    #[serde(default)]
    pub args: Option<serde_yaml::Mapping>,
}

/// Declarative description of a generator pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, alias = "Connector")]
    pub connector: Option<DbConfig>,
    #[serde(alias = "Generators")]
    pub generators: Vec<GeneratorDecl>,
    /// Fraction of the workload (by query count) kept when building templates.
    #[serde(default = "default_coverage")]
    pub workload_coverage: f64,
    #[serde(default)]
    pub on_generator_error: FailurePolicy,
    /// Directory that relative workload paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_coverage() -> f64 {
    1.0
}

impl PipelineConfig {
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = fs::read_to_string(path).context(FileReadSnafu {
            path: display.clone(),
        })?;
        let mut config = Self::from_yaml(&content).context(YamlParseSnafu { path: display })?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.workload_coverage > 0.0 && self.workload_coverage <= 1.0,
            InvalidCoverageSnafu {
                coverage: self.workload_coverage
            }
        );
        Ok(())
    }

    /// Resolves a workload path from the pipeline against its base directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
