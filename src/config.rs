use std::env;

use thiserror::Error;

use crate::blockchain::MAX_DIFFICULTY;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DIFFICULTY: u8 = 4;
const DEFAULT_MINING_REWARD: f64 = 50.0;

const HOST_KEY: &str = "AURELIA_HOST";
const PORT_KEY: &str = "AURELIA_PORT";
const DIFFICULTY_KEY: &str = "AURELIA_DIFFICULTY";
const MINING_REWARD_KEY: &str = "AURELIA_MINING_REWARD";

/// Errors that can occur while loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Parameters of the chain itself
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    /// Mining difficulty (number of leading zeros required in hash)
    pub difficulty: u8,

    /// Fixed reward paid to the miner of each block, before fees
    pub mining_reward: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
        }
    }
}

/// Node settings, read from `AURELIA_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub chain: ChainConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            chain: ChainConfig::default(),
        }
    }
}

impl Settings {
    /// Loads settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads settings from any key lookup, falling back to defaults for
    /// missing keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(host) = lookup(HOST_KEY) {
            settings.host = host;
        }

        if let Some(value) = lookup(PORT_KEY) {
            settings.port = parse(PORT_KEY, &value)?;
        }

        if let Some(value) = lookup(DIFFICULTY_KEY) {
            let difficulty: u8 = parse(DIFFICULTY_KEY, &value)?;
            if difficulty > MAX_DIFFICULTY {
                return Err(invalid(DIFFICULTY_KEY, &value));
            }
            settings.chain.difficulty = difficulty;
        }

        if let Some(value) = lookup(MINING_REWARD_KEY) {
            let reward: f64 = parse(MINING_REWARD_KEY, &value)?;
            if !reward.is_finite() || reward < 0.0 {
                return Err(invalid(MINING_REWARD_KEY, &value));
            }
            settings.chain.mining_reward = reward;
        }

        Ok(settings)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.chain.difficulty, 4);
        assert_eq!(settings.chain.mining_reward, 50.0);
        assert_eq!(settings.port, 8080);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("AURELIA_HOST", "0.0.0.0"),
            ("AURELIA_PORT", "9000"),
            ("AURELIA_DIFFICULTY", "2"),
            ("AURELIA_MINING_REWARD", "12.5"),
        ]))
        .unwrap();

        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.chain.difficulty, 2);
        assert_eq!(settings.chain.mining_reward, 12.5);
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("AURELIA_PORT", "eighty"),
            ("AURELIA_DIFFICULTY", "65"),
            ("AURELIA_MINING_REWARD", "-1"),
        ] {
            let result = Settings::from_lookup(lookup(&[(key, value)]));
            assert!(matches!(result, Err(ConfigError::InvalidValue { .. })), "{}", key);
        }
    }
}
