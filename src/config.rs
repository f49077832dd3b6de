use crate::sentinel::ChainConfig;
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Env var {0} is not set")]
    MissingEnv(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    /// Separate JSON file in `log_dir` for audit records only
    #[serde(default)]
    pub audit_log_file: Option<String>,
    pub use_json: bool,
    pub rotation: String,
    pub database: DatabaseConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Env var holding the PostgreSQL URL
    #[serde(default = "default_database_url_env")]
    pub url_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    /// Env var holding the 32-byte hex master key
    pub master_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    /// Upper bound for one sweep, funding wait included
    pub timeout_secs: u64,
    pub retry_interval_secs: u64,
    /// Failed attempts after which only a manual sweep retries a deposit
    pub max_attempts: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 180,
            retry_interval_secs: 300,
            max_attempts: 5,
        }
    }
}

impl SweepConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::Invalid("no chains configured".to_string()));
        }
        for chain in &self.chains {
            chain
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        for (i, chain) in self.chains.iter().enumerate() {
            if self.chains[..i].iter().any(|c| c.chain_id().ok() == chain.chain_id().ok()) {
                return Err(ConfigError::Invalid(format!(
                    "{}: chain configured twice",
                    chain.name
                )));
            }
        }
        if self.sweep.enabled && self.sweep.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<String, ConfigError> {
        std::env::var(&self.database.url_env)
            .map_err(|_| ConfigError::MissingEnv(self.database.url_env.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "sentinel.log"
use_json: false
rotation: "daily"
database:
  max_connections: 4
vault:
  master_key_env: "VAULT_MASTER_KEY"
chains:
  - name: "solana"
    family: solana
    rpc:
      url: "https://api.mainnet-beta.solana.com"
    sweep:
      treasury_address: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"
      sponsor_key_env: "SOLANA_SPONSOR_KEY"
    assets:
      - symbol: "USDC"
        contract: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        decimals: 6
        sweep_threshold: "10"
"#;

    #[test]
    fn test_load_with_defaults() {
        let config = AppConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.database.url_env, "DATABASE_URL");
        assert_eq!(config.database.max_connections, 4);
        assert!(config.sweep.enabled);
        assert_eq!(config.sweep.max_attempts, 5);
        assert_eq!(config.chains.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_chain() {
        let mut config = AppConfig::from_yaml(YAML).unwrap();
        config.chains.push(config.chains[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_invalid_chain() {
        // Token asset without a mint
        let yaml = YAML.replace(
            "        contract: \"EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v\"\n",
            "",
        );
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            AppConfig::load("does-not-exist"),
            Err(ConfigError::Read { .. })
        ));
    }
}
