use std::time::Duration;

use thiserror::Error;

use crate::language::{is_valid_language_tag, DEFAULT_CHAIN};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be true or false, got '{value}'")]
    InvalidFlag { name: &'static str, value: String },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("DEFAULT_LANGUAGES contains an invalid language tag '{0}'")]
    InvalidLanguage(String),
}

/// Which origins may call the service from a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

/// Service settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Empty means no API key is required.
    pub api_key: Option<String>,
    pub cors_origins: CorsOrigins,
    pub cache_ttl: Duration,
    pub cache_max_size: usize,
    pub default_languages: Vec<String>,
    pub accept_any_language: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            api_key: None,
            cors_origins: CorsOrigins::Any,
            cache_ttl: Duration::from_secs(3600),
            cache_max_size: 256,
            default_languages: DEFAULT_CHAIN.iter().map(|lang| lang.to_string()).collect(),
            accept_any_language: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Unset and blank variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Config::default();

        if let Some(port) = var("PORT") {
            config.port = parse_number("PORT", &port)?;
        }
        config.api_key = var("API_KEY");
        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = parse_origins(&origins);
        }
        if let Some(ttl) = var("CACHE_TTL_SECONDS") {
            let secs: u64 = parse_number("CACHE_TTL_SECONDS", &ttl)?;
            if secs == 0 {
                return Err(ConfigError::Zero {
                    name: "CACHE_TTL_SECONDS",
                });
            }
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(size) = var("CACHE_MAX_SIZE") {
            config.cache_max_size = parse_number("CACHE_MAX_SIZE", &size)?;
            if config.cache_max_size == 0 {
                return Err(ConfigError::Zero {
                    name: "CACHE_MAX_SIZE",
                });
            }
        }
        if let Some(languages) = var("DEFAULT_LANGUAGES") {
            config.default_languages = split_list(&languages);
            if let Some(bad) = config
                .default_languages
                .iter()
                .find(|lang| !is_valid_language_tag(lang))
            {
                return Err(ConfigError::InvalidLanguage(bad.clone()));
            }
        }
        if let Some(flag) = var("ACCEPT_ANY_LANGUAGE") {
            config.accept_any_language = parse_flag("ACCEPT_ANY_LANGUAGE", &flag)?;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_origins(value: &str) -> CorsOrigins {
    if value == "*" {
        return CorsOrigins::Any;
    }
    CorsOrigins::List(split_list(value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
