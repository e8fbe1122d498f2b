//! Server settings read from the environment.

use crate::chain::accessor::AccessorConfig;
use crate::chain::gateway::GatewayConfig;
use crate::chain::types::Address;
use crate::roles::resolver::EmergencyKeys;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Which ledger the accessor may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPreference {
    /// Live contract when reachable, mock where allowed.
    Auto,
    /// Always the mock ledger.
    Mock,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub rpc_url: String,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub connection_timeout: Duration,
    pub health_check_interval: Duration,
    pub mode_poll_interval: Duration,
    pub contract_address: Option<Address>,
    pub signer_address: Option<Address>,
    pub development: bool,
    pub backend: BackendPreference,
    pub allow_mock_fallback: bool,
    pub emergency_keys: EmergencyKeys,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = EmergencyKeys::default();

        let backend = match var("ATTENDANCE_BACKEND").as_deref() {
            None | Some("auto") => BackendPreference::Auto,
            Some("mock") => BackendPreference::Mock,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "ATTENDANCE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        Ok(Settings {
            port: parse_var(&var, "PORT", 3001)?,
            rpc_url: var("ETHEREUM_RPC_URL")
                .unwrap_or_else(|| "http://ethereum-node:8545".to_string()),
            retry_count: parse_var(&var, "ETH_CONNECTION_RETRIES", 3)?,
            retry_delay: Duration::from_millis(parse_var(&var, "ETH_CONNECTION_RETRY_DELAY", 2000)?),
            connection_timeout: Duration::from_millis(parse_var(
                &var,
                "ETH_CONNECTION_TIMEOUT",
                10_000,
            )?),
            health_check_interval: Duration::from_millis(parse_var(
                &var,
                "HEALTH_CHECK_INTERVAL",
                30_000,
            )?),
            mode_poll_interval: Duration::from_millis(parse_var(&var, "MODE_POLL_INTERVAL", 5000)?),
            contract_address: address_var(&var, "CONTRACT_ADDRESS")?,
            signer_address: address_var(&var, "SIGNER_ADDRESS")?,
            development: var("NODE_ENV").as_deref() == Some("development"),
            backend,
            allow_mock_fallback: parse_var(&var, "ALLOW_MOCK_FALLBACK", false)?,
            emergency_keys: EmergencyKeys {
                admin: var("EMERGENCY_ADMIN_KEY").unwrap_or(defaults.admin),
                system: var("EMERGENCY_SYSTEM_KEY").unwrap_or(defaults.system),
            },
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.rpc_url.clone(),
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            timeout: self.connection_timeout,
        }
    }

    pub fn accessor_config(&self) -> AccessorConfig {
        AccessorConfig {
            contract_address: self.contract_address,
            signer: self.signer_address,
            development: self.development,
            force_mock: self.backend == BackendPreference::Mock,
            allow_mock_fallback: self.allow_mock_fallback,
        }
    }
}

fn parse_var<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn address_var<F>(var: &F, name: &'static str) -> Result<Option<Address>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.port, 3001);
        assert_eq!(s.rpc_url, "http://ethereum-node:8545");
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.retry_delay, Duration::from_millis(2000));
        assert_eq!(s.connection_timeout, Duration::from_millis(10_000));
        assert_eq!(s.health_check_interval, Duration::from_secs(30));
        assert_eq!(s.contract_address, None);
        assert!(!s.development);
        assert_eq!(s.backend, BackendPreference::Auto);
        assert!(!s.allow_mock_fallback);
        assert_eq!(s.emergency_keys.admin, "admin");
        assert_eq!(s.emergency_keys.system, "xjtuse");
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("PORT", "8080"),
            ("NODE_ENV", "development"),
            ("ATTENDANCE_BACKEND", "mock"),
            ("CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("ALLOW_MOCK_FALLBACK", "true"),
            ("EMERGENCY_SYSTEM_KEY", "rotated"),
        ])
        .unwrap();

        assert_eq!(s.port, 8080);
        assert!(s.development);
        assert_eq!(
            s.contract_address.map(|a| a.to_string()),
            Some("0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string())
        );
        assert_eq!(s.emergency_keys.system, "rotated");

        let accessor = s.accessor_config();
        assert!(accessor.force_mock);
        assert!(accessor.allow_mock_fallback);
        assert!(accessor.development);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            settings(&[("PORT", "abc")]).unwrap_err(),
            ConfigError::InvalidValue {
                name: "PORT",
                value: "abc".to_string()
            }
        );
        assert!(settings(&[("CONTRACT_ADDRESS", "0x1234")]).is_err());
        assert!(settings(&[("ATTENDANCE_BACKEND", "hybrid")]).is_err());
    }

    #[test]
    fn test_empty_value_is_unset() {
        let s = settings(&[("SIGNER_ADDRESS", ""), ("PORT", " ")]).unwrap();
        assert_eq!(s.signer_address, None);
        assert_eq!(s.port, 3001);
    }
}
