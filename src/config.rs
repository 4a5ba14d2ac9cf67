//! Bridge configuration loaded from the environment
//!
//! `.env` files are honoured through `dotenvy` in the binary. Every setting has
//! a default; values that are present but unparseable are rejected.

use crate::bridge::DEFAULT_COMMAND_TIMEOUT;
use crate::framer::{FrameMode, WireFramer, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_READ_TIMEOUT};

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the EA listener and the HTTP API
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub tcp_host: String,
    pub tcp_port: u16,
    pub http_host: String,
    pub http_port: u16,
    pub command_timeout: Duration,
    pub read_timeout: Duration,
    pub max_payload_bytes: usize,
    pub frame_mode: FrameMode,
    pub tag_requests: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tcp_host: "127.0.0.1".to_string(),
            tcp_port: 5555,
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            frame_mode: FrameMode::Structural,
            tag_requests: false,
        }
    }
}

fn parse_var<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: value.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_secs(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_var(key, raw.clone(), default.as_secs_f64())?;
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.unwrap_or_default(),
            reason: "must be a positive number of seconds".to_string(),
        }),
    }
}

fn parse_flag(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: v,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}

impl BridgeConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            tcp_host: lookup("BRIDGE_TCP_HOST").unwrap_or(defaults.tcp_host),
            tcp_port: parse_var("BRIDGE_TCP_PORT", lookup("BRIDGE_TCP_PORT"), defaults.tcp_port)?,
            http_host: lookup("HTTP_HOST").unwrap_or(defaults.http_host),
            http_port: parse_var("HTTP_PORT", lookup("HTTP_PORT"), defaults.http_port)?,
            command_timeout: parse_secs(
                "BRIDGE_COMMAND_TIMEOUT_SECS",
                lookup("BRIDGE_COMMAND_TIMEOUT_SECS"),
                defaults.command_timeout,
            )?,
            read_timeout: parse_secs(
                "BRIDGE_READ_TIMEOUT_SECS",
                lookup("BRIDGE_READ_TIMEOUT_SECS"),
                defaults.read_timeout,
            )?,
            max_payload_bytes: parse_var(
                "BRIDGE_MAX_PAYLOAD_BYTES",
                lookup("BRIDGE_MAX_PAYLOAD_BYTES"),
                defaults.max_payload_bytes,
            )?,
            frame_mode: parse_var("BRIDGE_FRAMING", lookup("BRIDGE_FRAMING"), defaults.frame_mode)?,
            tag_requests: parse_flag(
                "BRIDGE_TAG_REQUESTS",
                lookup("BRIDGE_TAG_REQUESTS"),
                defaults.tag_requests,
            )?,
        };

        if config.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "BRIDGE_MAX_PAYLOAD_BYTES",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }

    pub fn framer(&self) -> WireFramer {
        WireFramer::new(self.frame_mode, self.max_payload_bytes, self.read_timeout)
    }

    pub fn log_summary(&self) {
        info!(
            "Config loaded - TCP Server will listen on {}:{}, HTTP on {}:{}",
            self.tcp_host, self.tcp_port, self.http_host, self.http_port
        );
        info!(
            "Command timeout {:?}, read timeout {:?}, max reply {} bytes, {:?} framing, request tags {}",
            self.command_timeout,
            self.read_timeout,
            self.max_payload_bytes,
            self.frame_mode,
            if self.tag_requests { "on" } else { "off" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<BridgeConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.tcp_port, 5555);
        assert_eq!(config.command_timeout, Duration::from_secs(10));
        assert_eq!(config.http_host, "0.0.0.0");
        assert_eq!(config.frame_mode, FrameMode::Structural);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BRIDGE_TCP_PORT", "9090"),
            ("BRIDGE_COMMAND_TIMEOUT_SECS", "2.5"),
            ("BRIDGE_FRAMING", "line"),
            ("BRIDGE_TAG_REQUESTS", "yes"),
            ("HTTP_PORT", "8000"),
        ])
        .unwrap();
        assert_eq!(config.tcp_port, 9090);
        assert_eq!(config.command_timeout, Duration::from_millis(2500));
        assert_eq!(config.frame_mode, FrameMode::LineDelimited);
        assert!(config.tag_requests);
        assert_eq!(config.http_port, 8000);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("BRIDGE_TCP_PORT", "70000")]),
            Err(ConfigError::Invalid { key: "BRIDGE_TCP_PORT", .. })
        ));
        assert!(matches!(
            load(&[("BRIDGE_COMMAND_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Invalid { key: "BRIDGE_COMMAND_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            load(&[("BRIDGE_FRAMING", "xml")]),
            Err(ConfigError::Invalid { key: "BRIDGE_FRAMING", .. })
        ));
        assert!(matches!(
            load(&[("BRIDGE_TAG_REQUESTS", "maybe")]),
            Err(ConfigError::Invalid { key: "BRIDGE_TAG_REQUESTS", .. })
        ));
        assert!(matches!(
            load(&[("BRIDGE_READ_TIMEOUT_SECS", "-1")]),
            Err(ConfigError::Invalid { key: "BRIDGE_READ_TIMEOUT_SECS", .. })
        ));
    }
}
