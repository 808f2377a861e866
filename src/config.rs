use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_WORKERS;
use crate::domain::{Allele, DEFAULT_DATABASE, Dataset};
use crate::error::HarvestError;
use crate::eutils::{DEFAULT_BASE_URL, EutilsSettings};
use crate::harvest::BackoffPolicy;

pub const CONFIG_FILE: &str = "kira-snp.json";
pub const DEFAULT_PAGE_SIZE: u64 = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_ALLELE: &str = "Y";
pub const DEFAULT_OUTPUT_DIR: &str = "resources";

/// On-disk configuration; every field is optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub allele: Option<String>,
    #[serde(default)]
    pub omim: Option<bool>,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub backoff_base_ms: Option<u64>,
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub eutils_base_url: Option<String>,
}

impl Config {
    /// Fields set in `other` win.
    pub fn overlay(self, other: Config) -> Config {
        Config {
            schema_version: other.schema_version.or(self.schema_version),
            database: other.database.or(self.database),
            allele: other.allele.or(self.allele),
            omim: other.omim.or(self.omim),
            term: other.term.or(self.term),
            email: other.email.or(self.email),
            api_key: other.api_key.or(self.api_key),
            page_size: other.page_size.or(self.page_size),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            backoff_base_ms: other.backoff_base_ms.or(self.backoff_base_ms),
            backoff_max_ms: other.backoff_max_ms.or(self.backoff_max_ms),
            output_dir: other.output_dir.or(self.output_dir),
            workers: other.workers.or(self.workers),
            eutils_base_url: other.eutils_base_url.or(self.eutils_base_url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub dataset: Dataset,
    pub term: String,
    pub page_size: u64,
    pub backoff: BackoffPolicy,
    pub output_dir: Utf8PathBuf,
    pub workers: usize,
    pub eutils: EutilsSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config file: an explicit path must exist; otherwise
    /// `kira-snp.json` in the working directory, then the user config dir,
    /// and finally built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Config, HarvestError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            return Ok(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        Self::resolve_with(path, Config::default())
    }

    /// Layers file < environment < `overrides`, then validates.
    pub fn resolve_with(
        path: Option<&str>,
        overrides: Config,
    ) -> Result<ResolvedConfig, HarvestError> {
        let config = Self::load(path)?
            .overlay(Self::from_env()?)
            .overlay(overrides);
        Self::resolve_config(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "kira-snp")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|path| path.exists())
    }

    /// Config values taken from `KIRA_SNP_*`, `NCBI_EMAIL` and `NCBI_API_KEY`.
    pub fn from_env() -> Result<Config, HarvestError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Config, HarvestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let number = |name: &str| -> Result<Option<u64>, HarvestError> {
            text(name)
                .map(|value| {
                    value.trim().parse::<u64>().map_err(|_| {
                        HarvestError::InvalidConfig(format!("{name} must be a number, got {value}"))
                    })
                })
                .transpose()
        };
        let flag = |name: &str| -> Result<Option<bool>, HarvestError> {
            text(name)
                .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "y" => Ok(true),
                    "0" | "false" | "no" | "n" => Ok(false),
                    _ => Err(HarvestError::InvalidConfig(format!(
                        "{name} must be a boolean, got {value}"
                    ))),
                })
                .transpose()
        };

        Ok(Config {
            schema_version: None,
            database: text("KIRA_SNP_DATABASE"),
            allele: text("KIRA_SNP_ALLELE"),
            omim: flag("KIRA_SNP_OMIM")?,
            term: text("KIRA_SNP_TERM"),
            email: text("NCBI_EMAIL"),
            api_key: text("NCBI_API_KEY").map(|key| key.trim().to_string()),
            page_size: number("KIRA_SNP_PAGE_SIZE")?,
            timeout_secs: number("KIRA_SNP_TIMEOUT_SECS")?,
            backoff_base_ms: number("KIRA_SNP_BACKOFF_BASE_MS")?,
            backoff_max_ms: number("KIRA_SNP_BACKOFF_MAX_MS")?,
            output_dir: text("KIRA_SNP_OUTPUT_DIR"),
            workers: number("KIRA_SNP_WORKERS")?.map(|workers| workers as usize),
            eutils_base_url: text("KIRA_SNP_EUTILS_URL"),
        })
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let database = config
            .database
            .map(|db| db.trim().to_string())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        // "OMIM" is a filter on dbSNP, not a database of its own.
        let (database, omim) = if database.eq_ignore_ascii_case("omim") {
            (DEFAULT_DATABASE.to_string(), true)
        } else {
            (database.to_lowercase(), config.omim.unwrap_or(false))
        };
        if database.is_empty() {
            return Err(HarvestError::InvalidConfig("database is empty".to_string()));
        }

        let allele: Allele = config
            .allele
            .as_deref()
            .unwrap_or(DEFAULT_ALLELE)
            .parse()?;
        let dataset = Dataset::new(database, omim, allele);
        let term = config
            .term
            .filter(|term| !term.trim().is_empty())
            .unwrap_or_else(|| dataset.default_term());

        let page_size = config.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > 10_000 {
            return Err(HarvestError::InvalidConfig(format!(
                "page_size must be between 1 and 10000, got {page_size}"
            )));
        }
        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "timeout_secs must be positive".to_string(),
            ));
        }

        let defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy {
            base: config
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base),
            max: config
                .backoff_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max),
        };

        let email = config.email.map(|email| email.trim().to_string());
        if let Some(email) = &email {
            if email.split('@').count() != 2 {
                return Err(HarvestError::InvalidConfig(format!(
                    "email does not look like an address: {email}"
                )));
            }
        }

        let workers = config.workers.unwrap_or(DEFAULT_WORKERS).max(1);

        Ok(ResolvedConfig {
            schema_version,
            dataset,
            term,
            page_size,
            backoff,
            output_dir: Utf8PathBuf::from(
                config
                    .output_dir
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            ),
            workers,
            eutils: EutilsSettings {
                base_url: config
                    .eutils_base_url
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                email,
                api_key: config.api_key,
                timeout: Duration::from_secs(timeout_secs),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_resolve() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.dataset.label(), "SNP");
        assert_eq!(resolved.dataset.allele.as_str(), DEFAULT_ALLELE);
        assert_eq!(resolved.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(resolved.eutils.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(resolved.workers, DEFAULT_WORKERS);
        assert!(resolved.term.contains("Y[ALLELE]"));
    }

    #[test]
    fn omim_database_becomes_filtered_snp() {
        let config = Config {
            database: Some("OMIM".to_string()),
            allele: Some("r".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.dataset.database, "snp");
        assert!(resolved.dataset.omim);
        assert_eq!(resolved.dataset.label(), "OMIM");
        assert!(resolved.term.contains("snp_omim[Filter]"));
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("KIRA_SNP_PAGE_SIZE", "250"),
            ("KIRA_SNP_OMIM", "yes"),
            ("NCBI_EMAIL", "me@example.org"),
        ]
        .into_iter()
        .collect();
        let env = ConfigLoader::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        let file = Config {
            page_size: Some(100),
            timeout_secs: Some(5),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(file.overlay(env)).unwrap();
        assert_eq!(resolved.page_size, 250);
        assert_eq!(resolved.eutils.timeout, Duration::from_secs(5));
        assert!(resolved.dataset.omim);
        assert_eq!(resolved.eutils.email.as_deref(), Some("me@example.org"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ConfigLoader::from_vars(|name| {
            (name == "KIRA_SNP_TIMEOUT_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert_matches!(err, HarvestError::InvalidConfig(_));

        let zero_page = Config {
            page_size: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(zero_page),
            Err(HarvestError::InvalidConfig(_))
        );

        let bad_email = Config {
            email: Some("nobody".to_string()),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(bad_email),
            Err(HarvestError::InvalidConfig(_))
        );
    }

    #[test]
    fn load_reads_explicit_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("custom.json");
        std::fs::write(&path, r#"{"allele":"K","page_size":42,"output_dir":"out"}"#).unwrap();

        let config = ConfigLoader::load(path.to_str()).unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.dataset.allele.as_str(), "K");
        assert_eq!(resolved.page_size, 42);
        assert_eq!(resolved.output_dir.as_str(), "out");
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing.json");
        assert_matches!(
            ConfigLoader::load(missing.to_str()),
            Err(HarvestError::ConfigRead(_))
        );

        let malformed = temp.path().join("bad.json");
        std::fs::write(&malformed, r#"{"page_size": "many"}"#).unwrap();
        assert_matches!(
            ConfigLoader::load(malformed.to_str()),
            Err(HarvestError::ConfigParse(_))
        );
    }
}
