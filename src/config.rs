//! Process configuration, read from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::invite::{DEFAULT_CODE_LENGTH, DEFAULT_MAX_ATTEMPTS};
use crate::referral::ReferralRewards;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5001";
pub const DEFAULT_DATA_DIR: &str = "./invite_ledger_data";

const CODE_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 4..=16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InviteConfig {
    pub code_length: usize,
    pub max_attempts: u32,
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub auth: AuthConfig,
    pub rewards: ReferralRewards,
    pub invite: InviteConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_or("BIND_ADDR", get("BIND_ADDR"), DEFAULT_BIND_ADDR.parse().ok())?;
        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let auth = AuthConfig {
            jwt_secret: get("AUTH_JWT_SECRET").ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?,
            issuer: get("AUTH_JWT_ISSUER"),
            audience: get("AUTH_JWT_AUDIENCE"),
        };

        let rewards = ReferralRewards {
            referrer_bonus: bonus("REFERRAL_BONUS_REFERRER", get("REFERRAL_BONUS_REFERRER"))?,
            referee_bonus: bonus("REFERRAL_BONUS_REFEREE", get("REFERRAL_BONUS_REFEREE"))?,
        };

        let code_length: usize = parse_or("INVITE_CODE_LENGTH", get("INVITE_CODE_LENGTH"), Some(DEFAULT_CODE_LENGTH))?;
        if !CODE_LENGTH_RANGE.contains(&code_length) {
            return Err(ConfigError::Invalid {
                key: "INVITE_CODE_LENGTH",
                value: code_length.to_string(),
            });
        }
        let max_attempts: u32 = parse_or("INVITE_CODE_ATTEMPTS", get("INVITE_CODE_ATTEMPTS"), Some(DEFAULT_MAX_ATTEMPTS))?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "INVITE_CODE_ATTEMPTS",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind_addr,
            data_dir,
            auth,
            rewards,
            invite: InviteConfig { code_length, max_attempts },
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: Option<T>) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}

fn bonus(key: &'static str, raw: Option<String>) -> Result<f64, ConfigError> {
    let amount: f64 = parse_or(key, raw, Some(0.0))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(ConfigError::Invalid { key, value: amount.to_string() });
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("AUTH_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 5001);
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.rewards, ReferralRewards::default());
        assert_eq!(cfg.invite, InviteConfig::default());
        assert!(cfg.auth.issuer.is_none());
    }

    #[test]
    fn test_secret_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("AUTH_JWT_SECRET"));
        assert_eq!(config(&[("AUTH_JWT_SECRET", "  ")]).unwrap_err(), ConfigError::Missing("AUTH_JWT_SECRET"));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("AUTH_JWT_SECRET", "s"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("REFERRAL_BONUS_REFERRER", "50"),
            ("REFERRAL_BONUS_REFEREE", "12.5"),
            ("INVITE_CODE_LENGTH", "8"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.rewards.referrer_bonus, 50.0);
        assert_eq!(cfg.rewards.referee_bonus, 12.5);
        assert_eq!(cfg.invite.code_length, 8);
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("REFERRAL_BONUS_REFERRER", "-1"),
            ("REFERRAL_BONUS_REFEREE", "NaN"),
            ("INVITE_CODE_LENGTH", "2"),
            ("INVITE_CODE_ATTEMPTS", "0"),
            ("BIND_ADDR", "not-an-addr"),
        ] {
            let err = config(&[("AUTH_JWT_SECRET", "s"), (key, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: k, .. } if k == key), "{} accepted", key);
        }
    }
}
