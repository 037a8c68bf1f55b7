use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::gateway::GatewaySettings;
use crate::models::Address;

pub const DEFAULT_IPFS_GATEWAY: &str = "https://gateway.pinata.cloud/ipfs";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub bind_port: u16,
    pub ipfs_api_url: String,
    pub ipfs_gateway_url: String,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub admin_address: Address,
    pub appointment_fee: u128,
}

impl GatewayConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &'static str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let admin = lookup("LEDGER_ADMIN_ADDRESS")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("LEDGER_ADMIN_ADDRESS"))?;

        Ok(GatewayConfig {
            bind_addr: text("BIND_ADDR", "127.0.0.1"),
            bind_port: parsed(&lookup, "BIND_PORT", 8080)?,
            ipfs_api_url: text("IPFS_API_URL", "http://127.0.0.1:5001"),
            ipfs_gateway_url: text("IPFS_GATEWAY_URL", DEFAULT_IPFS_GATEWAY),
            confirmation_timeout: Duration::from_secs(parsed(&lookup, "CONFIRMATION_TIMEOUT_SECS", 60)?),
            poll_interval: Duration::from_millis(parsed(&lookup, "CONFIRMATION_POLL_MS", 500)?),
            admin_address: Address::new(admin),
            appointment_fee: parsed(&lookup, "APPOINTMENT_FEE", 0)?,
        })
    }

    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            metadata_base: self.ipfs_gateway_url.clone(),
            confirmation_timeout: self.confirmation_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
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
    fn defaults_apply() {
        let cfg = GatewayConfig::from_lookup(lookup(&[(
            "LEDGER_ADMIN_ADDRESS",
            "0x00000000000000000000000000000000000000ad",
        )]))
        .unwrap();
        assert_eq!(cfg.bind_port, 8080);
        assert_eq!(cfg.confirmation_timeout, Duration::from_secs(60));
        assert_eq!(cfg.settings().metadata_base, DEFAULT_IPFS_GATEWAY);
    }

    #[test]
    fn admin_is_required() {
        let err = GatewayConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("LEDGER_ADMIN_ADDRESS")));
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = GatewayConfig::from_lookup(lookup(&[
            ("LEDGER_ADMIN_ADDRESS", "0xad"),
            ("CONFIRMATION_POLL_MS", "soon"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::Invalid { key, value } => {
                assert_eq!(key, "CONFIRMATION_POLL_MS");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
