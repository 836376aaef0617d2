use crate::consensus::validation::{BlockValidator, DEFAULT_MAX_BLOCK_TRANSACTIONS, DEFAULT_SUBSIDY};
use crate::mining::{ProofOfWork, DEFAULT_MAX_NONCE, DEFAULT_TARGET_BITS};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub storage: StorageConfig,
    pub mining: MiningConfig,
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub db_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiningConfig {
    pub target_bits: u32,
    pub max_nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    pub subsidy: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: Self::default_data_dir(),
                db_name: "blockchain.db".to_string(),
            },
            mining: MiningConfig {
                target_bits: DEFAULT_TARGET_BITS,
                max_nonce: DEFAULT_MAX_NONCE,
            },
            consensus: ConsensusConfig {
                subsidy: DEFAULT_SUBSIDY,
            },
        }
    }
}

impl Config {
    /// Reads the config at `path`, or at `~/.hashledger/config.json` when no
    /// path is given. A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str::<Config>(&content)
                .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", config_path.display(), e))?
        } else {
            let config = Self::default();
            config.save(&config_path)?;
            log::debug!("Wrote default config to {}", config_path.display());
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=255).contains(&self.mining.target_bits) {
            anyhow::bail!("mining.target_bits must be between 1 and 255, got {}", self.mining.target_bits);
        }
        if self.mining.max_nonce == 0 {
            anyhow::bail!("mining.max_nonce must be greater than zero");
        }
        if self.consensus.subsidy == 0 {
            anyhow::bail!("consensus.subsidy must be greater than zero");
        }
        if self.storage.db_name.is_empty() {
            anyhow::bail!("storage.db_name must not be empty");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.db_name)
    }

    pub fn proof_of_work(&self) -> crate::Result<ProofOfWork> {
        ProofOfWork::with_max_nonce(self.mining.target_bits, self.mining.max_nonce)
    }

    /// Admission rules with the configured coinbase subsidy.
    pub fn block_validator(&self) -> BlockValidator {
        BlockValidator::with_params(DEFAULT_MAX_BLOCK_TRANSACTIONS, self.consensus.subsidy)
    }

    fn default_data_dir() -> PathBuf {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home_dir).join(".hashledger")
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.mining.target_bits, 24);
        assert_eq!(config.consensus.subsidy, 10);
        assert_eq!(Config::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_saved_overrides_are_loaded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut config = Config::default();
        config.mining.target_bits = 12;
        config.storage.data_dir = temp_dir.path().to_path_buf();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.mining.target_bits, 12);
        assert_eq!(loaded.db_path(), temp_dir.path().join("blockchain.db"));
        assert_eq!(loaded.proof_of_work().unwrap().target_bits(), 12);
        assert_eq!(loaded.block_validator().subsidy(), DEFAULT_SUBSIDY);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.mining.target_bits = 0;
        assert!(config.validate().is_err());

        config.mining.target_bits = 256;
        assert!(config.validate().is_err());

        config.mining.target_bits = 24;
        config.mining.max_nonce = 0;
        assert!(config.validate().is_err());

        config.mining.max_nonce = 1;
        config.consensus.subsidy = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }
}
