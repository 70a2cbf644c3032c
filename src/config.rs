// src/config.rs
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ndef;
use crate::types::{DEFAULT_MODES, TagTechnology};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3500";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Settings the session controller consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Language tag written into Text records.
    pub language: String,
    pub modes: Vec<TagTechnology>,
    /// Stop the session after a reported write success instead of staying armed.
    pub auto_stop_after_write: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            modes: DEFAULT_MODES.to_vec(),
            auto_stop_after_write: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub poll_interval: Duration,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup("NFC_SERVICE_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = addr.parse().map_err(|_| ConfigError::InvalidValue {
            key: "NFC_SERVICE_ADDR",
            value: addr.clone(),
        })?;

        let poll_interval = match lookup("NFC_POLL_INTERVAL_MS") {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "NFC_POLL_INTERVAL_MS",
                    value: raw.clone(),
                })?;
                Duration::from_millis(ms)
            }
            None => Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        };

        let language = match lookup("NFC_LANGUAGE") {
            Some(tag) if !tag.trim().is_empty() => tag.trim().to_string(),
            _ => ["LC_ALL", "LC_MESSAGES", "LANG"]
                .into_iter()
                .filter_map(|key| lookup(key))
                .find_map(|locale| language_from_locale(&locale))
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        };
        ndef::validate_language(&language)?;

        let auto_stop_after_write = match lookup("NFC_AUTO_STOP_AFTER_WRITE") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                key: "NFC_AUTO_STOP_AFTER_WRITE",
                value: raw.clone(),
            })?,
            None => false,
        };

        Ok(Config {
            listen_addr,
            poll_interval,
            session: SessionConfig {
                language,
                modes: DEFAULT_MODES.to_vec(),
                auto_stop_after_write,
            },
        })
    }
}

/// `de_DE.UTF-8` -> `de`. The C/POSIX locales carry no language.
pub fn language_from_locale(locale: &str) -> Option<String> {
    let lang = locale
        .split(['_', '.', '@', '-'])
        .next()
        .unwrap_or_default()
        .trim();
    if lang.is_empty() || lang.eq_ignore_ascii_case("C") || lang.eq_ignore_ascii_case("POSIX") {
        return None;
    }
    Some(lang.to_ascii_lowercase())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
