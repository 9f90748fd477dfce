//! Job configuration
//!
//! A [`JobConfig`] is read once at startup and shared read-only (behind an
//! `Arc`) by every component of the job. Sources are layered, later ones
//! winning:
//!
//! 1. Built-in defaults
//! 2. Optional TOML file (`--config`)
//! 3. `.env` file, loaded into the process environment
//! 4. `HOMSEARCH_*` environment variables, `__` separating nested keys
//!    (e.g. `HOMSEARCH_ENGINES__HHBLITS__DATABASE=/db/uniclust30`)

use crate::error::ConfigError;
use crate::pipeline::retry::RetryPolicy;
use homsearch_common::Method;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default CPU budget for a job.
pub const DEFAULT_CPUS: usize = 4;

/// Query count up to which a single worker gets the whole CPU budget.
pub const DEFAULT_MULTICORE_THRESHOLD: usize = 1;

/// Default maximum number of queries accepted from one batch.
pub const DEFAULT_MAX_QUERIES: usize = 100;

/// Default ceiling on query length for covariance construction.
pub const DEFAULT_MAX_COVARIANCE_LENGTH: usize = 1000;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "HOMSEARCH";

/// External sequence-search engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Hhblits,
    Hmmer,
}

impl SearchEngine {
    pub fn all() -> [SearchEngine; 2] {
        [SearchEngine::Hhblits, SearchEngine::Hmmer]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEngine::Hhblits => "hhblits",
            SearchEngine::Hmmer => "hmmer",
        }
    }

    /// Tag embedded in the engine's result file names (`_result<tag>`)
    pub fn result_tag(&self) -> &'static str {
        match self {
            SearchEngine::Hhblits => "hhs",
            SearchEngine::Hmmer => "hmmer",
        }
    }
}

impl std::fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings of one search engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Whether the engine runs for this job
    #[serde(default)]
    pub enabled: bool,
    /// Sequence database searched by the engine
    #[serde(default)]
    pub database: PathBuf,
    /// Number of search iterations
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Inclusion E-value threshold
    #[serde(default = "default_evalue")]
    pub evalue: f64,
    /// Maximum number of sequences kept in the engine's result
    #[serde(default = "default_max_sequences")]
    pub max_sequences: usize,
}

fn default_iterations() -> u32 {
    2
}

fn default_evalue() -> f64 {
    1e-3
}

fn default_max_sequences() -> usize {
    20_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database: PathBuf::new(),
            iterations: default_iterations(),
            evalue: default_evalue(),
            max_sequences: default_max_sequences(),
        }
    }
}

/// Both engines; absent sections leave the engine disabled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineSettings {
    #[serde(default)]
    pub hhblits: EngineConfig,
    #[serde(default)]
    pub hmmer: EngineConfig,
}

impl EngineSettings {
    pub fn get(&self, engine: SearchEngine) -> &EngineConfig {
        match engine {
            SearchEngine::Hhblits => &self.hhblits,
            SearchEngine::Hmmer => &self.hmmer,
        }
    }

    pub fn get_mut(&mut self, engine: SearchEngine) -> &mut EngineConfig {
        match engine {
            SearchEngine::Hhblits => &mut self.hhblits,
            SearchEngine::Hmmer => &mut self.hmmer,
        }
    }

    /// Enabled engines in invocation order
    pub fn enabled(&self) -> Vec<SearchEngine> {
        SearchEngine::all()
            .into_iter()
            .filter(|engine| self.get(*engine).enabled)
            .collect()
    }
}

/// Executables of the external tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPaths {
    pub hhblits: PathBuf,
    pub jackhmmer: PathBuf,
    pub merge: PathBuf,
    pub neff: PathBuf,
    pub makepro: PathBuf,
    pub makecother: PathBuf,
    pub makecov: PathBuf,
    pub comer: PathBuf,
    pub cother: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            hhblits: PathBuf::from("hhblits"),
            jackhmmer: PathBuf::from("jackhmmer"),
            merge: PathBuf::from("msamerge"),
            neff: PathBuf::from("msaneff"),
            makepro: PathBuf::from("makepro"),
            makecother: PathBuf::from("makecother"),
            makecov: PathBuf::from("makecov"),
            comer: PathBuf::from("comer"),
            cother: PathBuf::from("cother"),
        }
    }
}

impl ToolPaths {
    fn entries(&self) -> [(&'static str, &Path); 9] {
        [
            ("hhblits", &self.hhblits),
            ("jackhmmer", &self.jackhmmer),
            ("merge", &self.merge),
            ("neff", &self.neff),
            ("makepro", &self.makepro),
            ("makecother", &self.makecother),
            ("makecov", &self.makecov),
            ("comer", &self.comer),
            ("cother", &self.cother),
        ]
    }
}

/// Profile-database search run after profile construction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileSearchConfig {
    /// Profile database; no search runs when unset
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// E-value threshold for reported hits
    #[serde(default = "default_profile_evalue")]
    pub evalue: f64,
}

fn default_profile_evalue() -> f64 {
    10.0
}

impl Default for ProfileSearchConfig {
    fn default() -> Self {
        Self {
            database: None,
            evalue: default_profile_evalue(),
        }
    }
}

/// Read-only configuration of one job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    /// Global CPU budget shared by all workers
    pub cpus: usize,
    /// Query count up to which one worker uses the whole budget
    pub multicore_threshold: usize,
    /// Maximum number of queries accepted from the batch
    pub max_queries: usize,
    /// Profile-construction method
    pub method: Method,
    /// Ceiling on query length for covariance construction
    pub max_covariance_length: usize,
    #[serde(default)]
    pub engines: EngineSettings,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub profile_search: ProfileSearchConfig,
    /// Retry policy around profile-database searches
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            cpus: DEFAULT_CPUS,
            multicore_threshold: DEFAULT_MULTICORE_THRESHOLD,
            max_queries: DEFAULT_MAX_QUERIES,
            method: Method::default(),
            max_covariance_length: DEFAULT_MAX_COVARIANCE_LENGTH,
            engines: EngineSettings::default(),
            tools: ToolPaths::default(),
            profile_search: ProfileSearchConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl JobConfig {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&JobConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: JobConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpus == 0 {
            return Err(ConfigError::invalid("cpus must be greater than 0"));
        }
        if self.max_queries == 0 {
            return Err(ConfigError::invalid("max_queries must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts must be greater than 0"));
        }

        for (name, path) in self.tools.entries() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::invalid(format!("tools.{} cannot be empty", name)));
            }
        }

        for engine in self.engines.enabled() {
            let settings = self.engines.get(engine);
            if settings.database.as_os_str().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "engines.{}.database must be set when the engine is enabled",
                    engine
                )));
            }
            if settings.iterations == 0 {
                return Err(ConfigError::invalid(format!(
                    "engines.{}.iterations must be greater than 0",
                    engine
                )));
            }
            if settings.evalue.is_nan() || settings.evalue <= 0.0 {
                return Err(ConfigError::invalid(format!(
                    "engines.{}.evalue must be positive",
                    engine
                )));
            }
        }

        if let Some(ref db) = self.profile_search.database {
            if db.as_os_str().is_empty() {
                return Err(ConfigError::invalid(
                    "profile_search.database cannot be empty when set",
                ));
            }
        }

        Ok(())
    }

    /// Significance threshold used when merging two engines' alignments
    ///
    /// The larger E-value of the two engines is used.
    pub fn merge_evalue(&self) -> f64 {
        self.engines
            .enabled()
            .into_iter()
            .map(|engine| self.engines.get(engine).evalue)
            .fold(0.0, f64::max)
    }

    /// Sequence cap applied by the merge tool
    pub fn merge_max_sequences(&self) -> usize {
        self.engines
            .enabled()
            .into_iter()
            .map(|engine| self.engines.get(engine).max_sequences)
            .max()
            .unwrap_or_else(default_max_sequences)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_job_config_default_is_valid() {
        let config = JobConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cpus, DEFAULT_CPUS);
        assert!(config.engines.enabled().is_empty());
    }

    #[test]
    fn test_validation_zero_cpus() {
        let config = JobConfig {
            cpus: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_enabled_engine_without_database() {
        let mut config = JobConfig::default();
        config.engines.hmmer.enabled = true;
        assert!(config.validate().is_err());

        config.engines.hmmer.database = PathBuf::from("/db/uniref50");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_retry_attempts() {
        let mut config = JobConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_evalue_takes_larger_threshold() {
        let mut config = JobConfig::default();
        config.engines.hhblits = EngineConfig {
            enabled: true,
            database: PathBuf::from("/db/uc30"),
            evalue: 1e-3,
            ..Default::default()
        };
        config.engines.hmmer = EngineConfig {
            enabled: true,
            database: PathBuf::from("/db/ur50"),
            evalue: 1e-2,
            ..Default::default()
        };
        assert_eq!(config.merge_evalue(), 1e-2);
        assert_eq!(
            config.engines.enabled(),
            vec![SearchEngine::Hhblits, SearchEngine::Hmmer]
        );
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
cpus = 8
max_queries = 5
method = "cother"

[engines.hhblits]
enabled = true
database = "/db/uniclust30"
iterations = 3

[profile_search]
database = "/db/pdb70"
"#
        )
        .unwrap();

        let config = JobConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.cpus, 8);
        assert_eq!(config.max_queries, 5);
        assert_eq!(config.method, Method::Cother);
        assert!(config.engines.hhblits.enabled);
        assert_eq!(config.engines.hhblits.iterations, 3);
        assert_eq!(config.engines.hhblits.evalue, 1e-3);
        assert!(!config.engines.hmmer.enabled);
        assert_eq!(config.profile_search.database, Some(PathBuf::from("/db/pdb70")));
        assert_eq!(config.tools.makepro, PathBuf::from("makepro"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = JobConfig::load(Some(Path::new("/nonexistent/homsearch.toml")));
        assert!(result.is_err());
    }
}
