//! Layered configuration for the unpacker.
//!
//! Sources are merged in increasing order of precedence:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. an optional configuration file (TOML, YAML or JSON, chosen by
//!    extension),
//! 3. `CDC_`-prefixed environment variables, with `__` separating nested
//!    keys (`CDC_SOURCE__ROOT=/srv/source`),
//! 4. command-line [`Overrides`].
//!
//! The merged result is validated before it is returned.

pub mod error;

use crate::error::{ErrorKind, Result};
use cdc_metadata::{DEFAULT_SITE_VISIT_DATE, DEFAULT_SUPPLIER_KEY};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use time::Date;
use time::macros::format_description;

const ENV_PREFIX: &str = "CDC_";
const DEFAULT_PARALLELISM: u8 = 5;

/// Location of a file share: `share` is a directory inside `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareConfig {
    pub root: PathBuf,
    pub share: String,
}
impl ShareConfig {
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.share)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file, created if missing.
    pub database: PathBuf,
    pub supplier_key: String,
    /// `YYYY-MM-DD`
    pub site_visit_date: String,
}
impl MetadataConfig {
    pub fn site_visit_date(&self) -> Result<Date> {
        Date::parse(&self.site_visit_date, format_description!("[year]-[month]-[day]"))
            .or_raise(|| ErrorKind::Invalid("metadata.site_visit_date", self.site_visit_date.clone()))
    }
}

/// One top-level directory of the source share, processed as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassConfig {
    pub directory: String,
    #[serde(default = "default_true")]
    pub filter_by_category: bool,
    #[serde(default)]
    pub append_only_if_missing: bool,
    /// Earlier passes whose allocated names are visible to this one.
    #[serde(default)]
    pub carry_from: Vec<String>,
}
impl PassConfig {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            filter_by_category: true,
            append_only_if_missing: false,
            carry_from: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: ShareConfig,
    pub destination: ShareConfig,
    pub metadata: MetadataConfig,
    /// CSV of evidence identifiers and their display names.
    pub evidence: PathBuf,
    pub degree_of_parallelism: u8,
    /// Accepted for compatibility; nothing is ever deleted.
    pub delete_from_target: bool,
    pub logs_directory: PathBuf,
    pub dry_run: bool,
    pub passes: Vec<PassConfig>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            source: ShareConfig {
                root: PathBuf::new(),
                share: "accruent".to_string(),
            },
            destination: ShareConfig {
                root: PathBuf::new(),
                share: "establishments".to_string(),
            },
            metadata: MetadataConfig {
                database: PathBuf::from("metadata.sqlite"),
                supplier_key: DEFAULT_SUPPLIER_KEY.to_string(),
                site_visit_date: DEFAULT_SITE_VISIT_DATE.to_string(),
            },
            evidence: PathBuf::from("evidence.csv"),
            degree_of_parallelism: DEFAULT_PARALLELISM,
            delete_from_target: false,
            logs_directory: PathBuf::from("logs"),
            dry_run: false,
            passes: vec![PassConfig::new("CDC"), PassConfig::new("CDCFE")],
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_root: Option<PathBuf>,
    pub source_share: Option<String>,
    pub destination_root: Option<PathBuf>,
    pub destination_share: Option<String>,
    pub database: Option<PathBuf>,
    pub evidence: Option<PathBuf>,
    pub degree_of_parallelism: Option<u8>,
    pub logs_directory: Option<PathBuf>,
    pub dry_run: Option<bool>,
}
impl Overrides {
    fn merge_into(self, figment: Figment) -> Figment {
        fn set<T: Serialize>(figment: Figment, key: &str, value: Option<T>) -> Figment {
            match value {
                Some(value) => figment.merge(Serialized::default(key, value)),
                None => figment,
            }
        }
        let figment = set(figment, "source.root", self.source_root);
        let figment = set(figment, "source.share", self.source_share);
        let figment = set(figment, "destination.root", self.destination_root);
        let figment = set(figment, "destination.share", self.destination_share);
        let figment = set(figment, "metadata.database", self.database);
        let figment = set(figment, "evidence", self.evidence);
        let figment = set(figment, "degree_of_parallelism", self.degree_of_parallelism);
        let figment = set(figment, "logs_directory", self.logs_directory);
        set(figment, "dry_run", self.dry_run)
    }
}

impl Config {
    /// Default configuration file location for the current user, if the
    /// platform has one.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("uk.gov", "DfE", "cdc-unpacker").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Merge every source and validate the result.
    ///
    /// An explicitly given `file` must exist. Without one, the
    /// [default path](Self::default_path) is used only if it exists.
    pub fn load(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Invalid("config", format!("{} is not a file", path.display())));
                }
                figment = Self::merge_file(figment, path)?;
            },
            None => {
                if let Some(path) = Self::default_path().filter(|path| path.is_file()) {
                    tracing::debug!(path = %path.display(), "Using default configuration file");
                    figment = Self::merge_file(figment, &path)?;
                }
            },
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        figment = overrides.merge_into(figment);
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file_exact(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
            Some("json") => figment.merge(Json::file_exact(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// Check the merged configuration for values no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.source.root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Required("source.root"));
        }
        if self.destination.root.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Required("destination.root"));
        }
        if self.degree_of_parallelism == 0 {
            exn::bail!(ErrorKind::Invalid("degree_of_parallelism", "must be at least 1".to_string()));
        }
        if self.passes.is_empty() {
            exn::bail!(ErrorKind::Required("passes"));
        }
        self.metadata.site_visit_date()?;

        let mut seen = HashSet::new();
        for pass in &self.passes {
            if pass.directory.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid("passes", "directory must not be empty".to_string()));
            }
            for earlier in &pass.carry_from {
                if !seen.contains(earlier.as_str()) {
                    exn::bail!(ErrorKind::Invalid(
                        "passes",
                        format!("{} carries from {earlier}, which is not an earlier pass", pass.directory)
                    ));
                }
            }
            if !seen.insert(pass.directory.as_str()) {
                exn::bail!(ErrorKind::Invalid("passes", format!("{} is listed more than once", pass.directory)));
            }
        }
        Ok(())
    }
}
