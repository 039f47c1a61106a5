//! Runtime configuration, built from environment variables.

use std::fmt::Display;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_KEYWORDS: [&str; 5] = ["urgent", "help", "asap", "emergency", "important"];

/// Responder configuration. Loaded once at startup, passed explicitly into
/// the cycle, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Account address, used for both IMAP login and the reply From header.
    pub address: String,
    /// Account password (app-specific password for Gmail).
    pub password: SecretString,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Lowercase trigger words that classify a message as urgent.
    pub keywords: Vec<String>,
    pub poll_interval_secs: u64,
}

impl Config {
    /// Build config from environment variables.
    ///
    /// `EMAIL_ADDRESS` and `EMAIL_PASSWORD` are required; everything else
    /// falls back to Gmail defaults. A present but unparseable value is an
    /// error rather than a silent default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = require_var("EMAIL_ADDRESS")?;
        let password = SecretString::from(require_var("EMAIL_PASSWORD")?);

        let imap_host = std::env::var("EMAIL_IMAP_HOST")
            .unwrap_or_else(|_| DEFAULT_IMAP_HOST.to_string());
        let imap_port: u16 = parse_var("EMAIL_IMAP_PORT", 993)?;

        let smtp_host = std::env::var("EMAIL_SMTP_HOST")
            .unwrap_or_else(|_| DEFAULT_SMTP_HOST.to_string());
        let smtp_port: u16 = parse_var("EMAIL_SMTP_PORT", 587)?;

        let keywords = match std::env::var("EMAIL_URGENT_KEYWORDS") {
            Ok(raw) => parse_keywords(&raw),
            Err(_) => default_keywords(),
        };

        let poll_interval_secs: u64 = parse_var("EMAIL_POLL_INTERVAL_SECS", 600)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_POLL_INTERVAL_SECS".to_string(),
                message: "interval must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            address,
            password,
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            keywords,
            poll_interval_secs,
        })
    }
}

/// The built-in trigger list used when `EMAIL_URGENT_KEYWORDS` is not set.
pub fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| (*k).to_string()).collect()
}

/// Split a comma-separated trigger list, trimming and lowercasing each entry.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn require_var(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
    }
}
