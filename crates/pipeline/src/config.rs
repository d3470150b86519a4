//! Configuration file handling.
//!
//! The configuration lives in `finsight.toml` (usually inside the data directory). Every
//! section is optional; relative paths are resolved against the directory holding the file.
//!
//! ```toml
//! data_dir = "."
//!
//! [storage]
//! io_timeout_secs = 10
//!
//! [categorizer]
//! endpoint = "http://localhost:8080/categorize"
//! api_key_env = "FINSIGHT_CATEGORIZER_KEY"
//! timeout_secs = 30
//! batch_size = 50
//!
//! [credit]
//! uploads_dir = "credit_uploads"
//! exclude_descriptions = ["PAYMENT"]
//! ```

use finsight_categorize::{
    Categorizer, HttpCategorizer, UnavailableCategorizer, DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT,
};
use finsight_core::{StatementClass, Vocabulary};
use finsight_import::{ColumnMapping, ExtractOptions, StatementExtractor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const CONFIG_FILE: &str = "finsight.toml";
const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("The {what} directory {path} does not exist")]
    MissingDir { what: String, path: PathBuf },
    #[error("Invalid {class} extraction settings: {source}")]
    Extraction {
        class: StatementClass,
        #[source]
        source: finsight_import::FormatError,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    categorizer: CategorizerSection,
    #[serde(default)]
    credit: ClassSection,
    #[serde(default)]
    debit: ClassSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageSection {
    io_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategorizerSection {
    endpoint: Option<String>,
    api_key_env: Option<String>,
    timeout_secs: Option<u64>,
    batch_size: Option<usize>,
    categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassSection {
    uploads_dir: Option<PathBuf>,
    exclude_descriptions: Option<Vec<String>>,
    exclude_types: Option<Vec<String>>,
    invert_amounts: Option<bool>,
    delimiter: Option<char>,
    mapping: Option<ColumnMapping>,
}

impl ClassSection {
    fn extract_options(&self, class: StatementClass) -> ExtractOptions {
        let mut options = ExtractOptions::for_class(class);
        if let Some(d) = &self.exclude_descriptions {
            options.exclude_descriptions = d.clone();
        }
        if let Some(t) = &self.exclude_types {
            options.exclude_types = t.clone();
        }
        if let Some(invert) = self.invert_amounts {
            options.invert_amounts = invert;
        }
        if let Some(delimiter) = self.delimiter {
            options.delimiter = delimiter;
        }
        options.mapping = self.mapping.clone();
        options
    }
}

/// Settings for the categorization collaborator.
#[derive(Debug, Clone)]
pub struct CategorizerSettings {
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
    pub vocabulary: Vocabulary,
}

impl Default for CategorizerSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl CategorizerSettings {
    /// The configured backend, or one that is always unavailable when no endpoint is set.
    pub fn backend(&self) -> Result<Arc<dyn Categorizer>, ConfigError> {
        let Some(endpoint) = &self.endpoint else {
            warn!("No categorizer endpoint configured; new rows will be Uncategorized");
            return Ok(Arc::new(UnavailableCategorizer));
        };
        let api_key = self
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        let backend = HttpCategorizer::new(endpoint.as_str(), api_key.as_deref(), self.timeout)
            .map_err(|e| ConfigError::Invalid(format!("categorizer client: {e}")))?;
        Ok(Arc::new(backend))
    }
}

/// Per-class settings.
#[derive(Debug, Clone)]
pub struct ClassConfig {
    pub uploads_dir: PathBuf,
    pub extract: ExtractOptions,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub io_timeout: Duration,
    pub categorizer: CategorizerSettings,
    pub classes: BTreeMap<StatementClass, ClassConfig>,
}

impl Config {
    /// Default settings rooted at `data_dir`, with uploads in `<data_dir>/<class>_uploads`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let classes = StatementClass::ALL
            .into_iter()
            .map(|class| {
                (
                    class,
                    ClassConfig {
                        uploads_dir: data_dir.join(format!("{class}_uploads")),
                        extract: ExtractOptions::for_class(class),
                    },
                )
            })
            .collect();
        Self {
            data_dir,
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            categorizer: CategorizerSettings::default(),
            classes,
        }
    }

    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let config = Self::from_toml_str(&text, base)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses config text, resolving relative paths against `base`. Does not touch the disk.
    pub fn from_toml_str(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        let data_dir = file
            .data_dir
            .as_deref()
            .map(resolve)
            .unwrap_or_else(|| base.to_path_buf());

        let mut config = Self::for_data_dir(&data_dir);
        if let Some(secs) = file.storage.io_timeout_secs {
            config.io_timeout = Duration::from_secs(secs);
        }

        let section = &file.categorizer;
        let settings = &mut config.categorizer;
        settings.endpoint = section.endpoint.clone().filter(|e| !e.trim().is_empty());
        settings.api_key_env = section.api_key_env.clone();
        if let Some(secs) = section.timeout_secs {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(size) = section.batch_size {
            settings.batch_size = size;
        }
        if let Some(categories) = &section.categories {
            settings.vocabulary = Vocabulary::new(categories);
        }

        for (class, section) in [
            (StatementClass::Credit, &file.credit),
            (StatementClass::Debit, &file.debit),
        ] {
            let uploads_dir = section
                .uploads_dir
                .as_deref()
                .map(resolve)
                .unwrap_or_else(|| data_dir.join(format!("{class}_uploads")));
            config.classes.insert(
                class,
                ClassConfig {
                    uploads_dir,
                    extract: section.extract_options(class),
                },
            );
        }
        Ok(config)
    }

    /// Startup checks: directories exist, numbers are sane and exclude patterns compile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.data_dir.is_dir() {
            return Err(ConfigError::MissingDir {
                what: "data".to_string(),
                path: self.data_dir.clone(),
            });
        }
        if self.categorizer.batch_size == 0 {
            return Err(ConfigError::Invalid("categorizer.batch_size must be at least 1".into()));
        }
        if self.categorizer.timeout.is_zero() {
            return Err(ConfigError::Invalid("categorizer.timeout_secs must be at least 1".into()));
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::Invalid("storage.io_timeout_secs must be at least 1".into()));
        }
        for (class, settings) in &self.classes {
            if !settings.uploads_dir.is_dir() {
                return Err(ConfigError::MissingDir {
                    what: format!("{class} uploads"),
                    path: settings.uploads_dir.clone(),
                });
            }
            StatementExtractor::new(settings.extract.clone()).map_err(|source| {
                ConfigError::Extraction {
                    class: *class,
                    source,
                }
            })?;
        }
        Ok(())
    }

    pub fn class(&self, class: StatementClass) -> Option<&ClassConfig> {
        self.classes.get(&class)
    }
}
