//! Server configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;
use vidtube_core::session::SessionConfig;

/// Secrets shipped in sample `.env` files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub session: SessionConfig,
    /// Single browser origin allowed to send credentials.
    pub cors_origin: String,
    pub cookie_secure: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: &'static str, hint: &'static str },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("VIDTUBE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "VIDTUBE_PORT", 8000)?;
        let bind: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                var: "VIDTUBE_HOST",
                reason: format!("{:?} is not a valid address", host),
            })?;

        let db_path = lookup("VIDTUBE_DB_PATH")
            .unwrap_or_else(|| "vidtube.db".into())
            .into();

        let access_secret = secret(&lookup, "VIDTUBE_ACCESS_TOKEN_SECRET")?;
        let refresh_secret = secret(&lookup, "VIDTUBE_REFRESH_TOKEN_SECRET")?;
        if access_secret == refresh_secret {
            return Err(ConfigError::Invalid {
                var: "VIDTUBE_REFRESH_TOKEN_SECRET",
                reason: "must differ from VIDTUBE_ACCESS_TOKEN_SECRET".into(),
            });
        }

        let access_minutes: i64 = parse_or(&lookup, "VIDTUBE_ACCESS_TOKEN_TTL_MINUTES", 15)?;
        let refresh_days: i64 = parse_or(&lookup, "VIDTUBE_REFRESH_TOKEN_TTL_DAYS", 10)?;
        if access_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "VIDTUBE_ACCESS_TOKEN_TTL_MINUTES",
                reason: "must be greater than 0".into(),
            });
        }
        if refresh_days <= 0 {
            return Err(ConfigError::Invalid {
                var: "VIDTUBE_REFRESH_TOKEN_TTL_DAYS",
                reason: "must be greater than 0".into(),
            });
        }

        let session = SessionConfig::new(access_secret, refresh_secret)
            .with_ttls(Duration::minutes(access_minutes), Duration::days(refresh_days));

        Ok(Config {
            bind,
            db_path,
            session,
            cors_origin: lookup("VIDTUBE_CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".into()),
            cookie_secure: parse_or(&lookup, "VIDTUBE_COOKIE_SECURE", true)?,
        })
    }
}

fn secret<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(var)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingRequired {
            var,
            hint: "Generate with: openssl rand -hex 32",
        })?;

    if PLACEHOLDER_SECRETS.contains(&value.as_str()) {
        return Err(ConfigError::Invalid {
            var,
            reason: "still set to a placeholder value".into(),
        });
    }
    if value.len() < MIN_SECRET_LEN {
        return Err(ConfigError::Invalid {
            var,
            reason: format!("must be at least {} characters", MIN_SECRET_LEN),
        });
    }
    Ok(value)
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("{:?} could not be parsed", raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn secrets() -> Vec<(&'static str, &'static str)> {
        vec![
            ("VIDTUBE_ACCESS_TOKEN_SECRET", "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6"),
            ("VIDTUBE_REFRESH_TOKEN_SECRET", "f6e5d4c3b2a1f6e5d4c3b2a1f6e5d4c3"),
        ]
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(env(&secrets())).unwrap();
        assert_eq!(config.bind.port(), 8000);
        assert_eq!(config.db_path, PathBuf::from("vidtube.db"));
        assert_eq!(config.session.access_ttl, Duration::minutes(15));
        assert_eq!(config.session.refresh_ttl, Duration::days(10));
        assert!(config.cookie_secure);
    }

    #[test]
    fn overrides_apply() {
        let mut pairs = secrets();
        pairs.extend([
            ("VIDTUBE_HOST", "127.0.0.1"),
            ("VIDTUBE_PORT", "9100"),
            ("VIDTUBE_ACCESS_TOKEN_TTL_MINUTES", "5"),
            ("VIDTUBE_COOKIE_SECURE", "false"),
        ]);
        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9100".parse::<SocketAddr>().unwrap());
        assert_eq!(config.session.access_ttl, Duration::minutes(5));
        assert!(!config.cookie_secure);
    }

    #[test]
    fn missing_secret_is_reported() {
        let err = Config::from_lookup(env(&[])).unwrap_err();
        assert!(err.to_string().contains("VIDTUBE_ACCESS_TOKEN_SECRET"));
    }

    #[test]
    fn rejects_weak_secrets() {
        let placeholder = [
            ("VIDTUBE_ACCESS_TOKEN_SECRET", "dev-secret-change-me"),
            ("VIDTUBE_REFRESH_TOKEN_SECRET", "f6e5d4c3b2a1f6e5d4c3b2a1f6e5d4c3"),
        ];
        assert!(matches!(
            Config::from_lookup(env(&placeholder)),
            Err(ConfigError::Invalid { var: "VIDTUBE_ACCESS_TOKEN_SECRET", .. })
        ));

        let same = [
            ("VIDTUBE_ACCESS_TOKEN_SECRET", "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6"),
            ("VIDTUBE_REFRESH_TOKEN_SECRET", "a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6"),
        ];
        assert!(matches!(
            Config::from_lookup(env(&same)),
            Err(ConfigError::Invalid { var: "VIDTUBE_REFRESH_TOKEN_SECRET", .. })
        ));
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut pairs = secrets();
        pairs.push(("VIDTUBE_PORT", "eighty"));
        assert!(matches!(
            Config::from_lookup(env(&pairs)),
            Err(ConfigError::Invalid { var: "VIDTUBE_PORT", .. })
        ));
    }
}
