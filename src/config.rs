use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageSettings,
    pub thresholds: PriorityThresholds,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory override; defaults to ~/.equity-tax
    pub data_dir: Option<String>,
}

/// Dollar cut-offs used when ranking strategy recommendations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityThresholds {
    pub high_savings: Decimal,
    pub medium_savings: Decimal,
    /// Safe-harbor shortfall above which underpayment is flagged CRITICAL
    pub critical_underpayment: Decimal,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageSettings { data_dir: None },
            thresholds: PriorityThresholds::default(),
        }
    }
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        PriorityThresholds {
            high_savings: dec!(5000),
            medium_savings: dec!(1000),
            critical_underpayment: dec!(1000),
        }
    }
}

impl Config {
    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("equity-tax");
        Ok(dir)
    }

    /// Get the configuration file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file or fall back to defaults
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;
        if config_file.exists() {
            let contents = fs::read_to_string(&config_file)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)?;
        let contents = toml::to_string_pretty(self)?;
        fs::write(Self::config_file()?, contents)?;
        Ok(())
    }

    /// Resolve the data directory: environment variable first, then the
    /// config file, then ~/.equity-tax
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("EQUITY_TAX_DATA_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.storage.data_dir {
            return Ok(PathBuf::from(dir));
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(home.join(".equity-tax"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = Config::default();
        assert_eq!(config.thresholds.high_savings, dec!(5000));
        assert_eq!(config.thresholds.medium_savings, dec!(1000));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.thresholds.high_savings, config.thresholds.high_savings);
    }
}
