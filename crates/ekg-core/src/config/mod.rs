//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::database::UriScheme;

/// Password used by a fresh local database when no environment variable is set
pub const DEFAULT_LOCAL_PASSWORD: &str = "12345678";

/// ekg configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub semantic_header_path: PathBuf,
    pub dataset_description_path: PathBuf,
    /// Directory the database reads `file:///` CSV files from
    pub import_directory: PathBuf,
    /// Directory `file_directory` entries are relative to
    pub data_directory: PathBuf,
    pub performance_path: PathBuf,
    pub export_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub uri: String,
    pub db_name: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub use_sample: bool,
    pub use_preprocessed_files: bool,
    pub store_preprocessed_files: bool,
    pub verbose: bool,
    pub seed: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            semantic_header_path: PathBuf::from("json_files/semantic_header.json"),
            dataset_description_path: PathBuf::from("json_files/dataset_description.json"),
            import_directory: PathBuf::from("import"),
            data_directory: PathBuf::from("."),
            performance_path: PathBuf::from("perf/performance.csv"),
            export_directory: PathBuf::from("export"),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            db_name: "neo4j".to_string(),
            user: "neo4j".to_string(),
            password: None,
            timeout_secs: 300,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            use_sample: false,
            use_preprocessed_files: false,
            store_preprocessed_files: true,
            verbose: false,
            seed: 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            database: DatabaseConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Password from `EKG_DB_PASSWORD` or `NEO4J_PASSWORD`, else the local default
    pub fn resolved_password(&self) -> anyhow::Result<String> {
        self.enforce_env_only()?;

        Ok(env::var("EKG_DB_PASSWORD")
            .or_else(|_| env::var("NEO4J_PASSWORD"))
            .unwrap_or_else(|_| DEFAULT_LOCAL_PASSWORD.to_string()))
    }

    pub fn password_source(&self) -> &'static str {
        if env::var("EKG_DB_PASSWORD").is_ok() {
            "EKG_DB_PASSWORD"
        } else if env::var("NEO4J_PASSWORD").is_ok() {
            "NEO4J_PASSWORD"
        } else {
            "default local password"
        }
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.password.is_some() {
            return Err(anyhow!(
                "Database passwords must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("EKG_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("ekg")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, or the defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.enforce_env_only()?;
        if self.import.batch_size == 0 {
            return Err(anyhow!("import.batch_size must be at least 1"));
        }
        if UriScheme::of(&self.database.uri).is_none() {
            return Err(anyhow!(
                "database.uri must be a bolt://, neo4j:// or http(s):// URI, got: {}",
                self.database.uri
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let path = |p: &PathBuf| p.display().to_string();
        match key {
            "paths.semantic_header_path" => Ok(path(&self.paths.semantic_header_path)),
            "paths.dataset_description_path" => Ok(path(&self.paths.dataset_description_path)),
            "paths.import_directory" => Ok(path(&self.paths.import_directory)),
            "paths.data_directory" => Ok(path(&self.paths.data_directory)),
            "paths.performance_path" => Ok(path(&self.paths.performance_path)),
            "paths.export_directory" => Ok(path(&self.paths.export_directory)),

            "database.uri" => Ok(self.database.uri.clone()),
            "database.db_name" => Ok(self.database.db_name.clone()),
            "database.user" => Ok(self.database.user.clone()),
            "database.timeout_secs" => Ok(self.database.timeout_secs.to_string()),

            "import.batch_size" => Ok(self.import.batch_size.to_string()),
            "import.use_sample" => Ok(self.import.use_sample.to_string()),
            "import.use_preprocessed_files" => Ok(self.import.use_preprocessed_files.to_string()),
            "import.store_preprocessed_files" => Ok(self.import.store_preprocessed_files.to_string()),
            "import.verbose" => Ok(self.import.verbose.to_string()),
            "import.seed" => Ok(self.import.seed.to_string()),

            // Never shown, only where it comes from
            "database.password" | "password" => Ok(format!("(from {})", self.database.password_source())),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `ekg config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let flag = |value: &str| -> anyhow::Result<bool> {
            value
                .parse()
                .with_context(|| format!("Invalid value for {}: {} (expected true or false)", key, value))
        };

        match key {
            "paths.semantic_header_path" => self.paths.semantic_header_path = PathBuf::from(value),
            "paths.dataset_description_path" => self.paths.dataset_description_path = PathBuf::from(value),
            "paths.import_directory" => self.paths.import_directory = PathBuf::from(value),
            "paths.data_directory" => self.paths.data_directory = PathBuf::from(value),
            "paths.performance_path" => self.paths.performance_path = PathBuf::from(value),
            "paths.export_directory" => self.paths.export_directory = PathBuf::from(value),

            "database.uri" => {
                if UriScheme::of(value).is_none() {
                    return Err(anyhow!("database.uri must start with bolt://, neo4j://, http:// or https://"));
                }
                self.database.uri = value.trim_end_matches('/').to_string();
            }
            "database.db_name" => {
                if value.is_empty() {
                    return Err(anyhow!("database.db_name must not be empty"));
                }
                self.database.db_name = value.to_string();
            }
            "database.user" => self.database.user = value.to_string(),
            "database.timeout_secs" => {
                let timeout: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
                if timeout == 0 {
                    return Err(anyhow!("Timeout must be at least 1 second"));
                }
                self.database.timeout_secs = timeout;
            }

            "import.batch_size" => {
                let size: usize = value
                    .parse()
                    .with_context(|| format!("Invalid batch_size value: {}", value))?;
                if !(1..=1_000_000).contains(&size) {
                    return Err(anyhow!("Batch size must be between 1 and 1000000"));
                }
                self.import.batch_size = size;
            }
            "import.use_sample" => self.import.use_sample = flag(value)?,
            "import.use_preprocessed_files" => self.import.use_preprocessed_files = flag(value)?,
            "import.store_preprocessed_files" => self.import.store_preprocessed_files = flag(value)?,
            "import.verbose" => self.import.verbose = flag(value)?,
            "import.seed" => {
                self.import.seed = value
                    .parse()
                    .with_context(|| format!("Invalid seed value: {}", value))?;
            }

            // Passwords cannot be set via config
            "database.password" | "password" => {
                return Err(anyhow!(
                    "Passwords cannot be stored in configuration. \
                     Set the EKG_DB_PASSWORD or NEO4J_PASSWORD environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `ekg config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "paths.semantic_header_path",
            "paths.dataset_description_path",
            "paths.import_directory",
            "paths.data_directory",
            "paths.performance_path",
            "paths.export_directory",
            "database.uri",
            "database.db_name",
            "database.user",
            "database.password",
            "database.timeout_secs",
            "import.batch_size",
            "import.use_sample",
            "import.use_preprocessed_files",
            "import.store_preprocessed_files",
            "import.verbose",
            "import.seed",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        Self::reset_at(&Self::config_path()?)
    }

    pub fn reset_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
