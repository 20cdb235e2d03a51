//! Configuration file management for certmatch.
//!
//! This module handles loading, parsing, and merging configuration from TOML files
//! and command-line arguments.
//!
//! # Configuration Precedence
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (certmatch.toml or specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! hosts = ["cert.ist", "urip.io"]
//! output = "summary"
//! exit_code = 1
//! mode = "full-chain"
//! strategy = "sha256"
//! port = 443
//! api_url = "https://api.cert.ist"
//! tls_timeout_secs = 10
//! api_timeout_secs = 15
//! workers = 16
//!
//! [prometheus]
//! enabled = true
//! address = "http://localhost:9091"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::attested::{DEFAULT_API_TIMEOUT, DEFAULT_API_URL};
use crate::chain::ComparisonMode;
use crate::fingerprint::FingerprintStrategy;
use crate::live::{DEFAULT_TLS_PORT, DEFAULT_TLS_TIMEOUT};
use crate::validator::{CheckOptions, DEFAULT_MAX_WORKERS};

/// Configuration file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "certmatch.toml";

/// Main configuration structure.
///
/// All fields are optional to support partial configuration and merging.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    /// List of domains to check
    pub hosts: Option<Vec<String>>,
    /// Output format: json, text, summary
    pub output: Option<String>,
    /// Exit code to use when any domain mismatched or failed
    pub exit_code: Option<i32>,
    /// Comparison mode: leaf-only, full-chain
    pub mode: Option<String>,
    /// Fingerprint strategy: sha256, pem
    pub strategy: Option<String>,
    /// Port for the live TLS handshake
    pub port: Option<u16>,
    /// Attestation service base URL
    pub api_url: Option<String>,
    /// Live dial and handshake timeout
    pub tls_timeout_secs: Option<u64>,
    /// Attestation request timeout
    pub api_timeout_secs: Option<u64>,
    /// Maximum number of domains checked at once
    pub workers: Option<usize>,
    /// Prometheus configuration
    pub prometheus: Option<PrometheusConfig>,
}

/// Prometheus integration configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Json,
    Text,
    Summary,
}

/// Fully resolved settings, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub hosts: Vec<String>,
    pub output: OutputFormat,
    pub exit_code: i32,
    pub options: CheckOptions,
    /// Push gateway address when Prometheus export is enabled
    pub prometheus: Option<String>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Configuration with every default filled in.
    ///
    /// # Default Values
    ///
    /// - `hosts`: None (must be provided)
    /// - `output`: "summary"
    /// - `exit_code`: 0
    /// - `mode`: "full-chain"
    /// - `strategy`: "sha256"
    /// - `port`: 443
    /// - `api_url`: "https://api.cert.ist"
    /// - `tls_timeout_secs`: 10
    /// - `api_timeout_secs`: 15
    /// - `workers`: 16
    /// - `prometheus.enabled`: false
    /// - `prometheus.address`: "http://localhost:9091"
    pub fn defaults() -> Self {
        Config {
            hosts: None,
            output: Some(OutputFormat::Summary.to_string()),
            exit_code: Some(0),
            mode: Some(ComparisonMode::default().to_string()),
            strategy: Some(FingerprintStrategy::default().to_string()),
            port: Some(DEFAULT_TLS_PORT),
            api_url: Some(DEFAULT_API_URL.to_string()),
            tls_timeout_secs: Some(DEFAULT_TLS_TIMEOUT.as_secs()),
            api_timeout_secs: Some(DEFAULT_API_TIMEOUT.as_secs()),
            workers: Some(DEFAULT_MAX_WORKERS),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. If the `other` value is None, keeps the current value.
    pub fn merge_with(mut self, other: Config) -> Self {
        if other.hosts.is_some() {
            self.hosts = other.hosts;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.exit_code.is_some() {
            self.exit_code = other.exit_code;
        }
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.strategy.is_some() {
            self.strategy = other.strategy;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.api_url.is_some() {
            self.api_url = other.api_url;
        }
        if other.tls_timeout_secs.is_some() {
            self.tls_timeout_secs = other.tls_timeout_secs;
        }
        if other.api_timeout_secs.is_some() {
            self.api_timeout_secs = other.api_timeout_secs;
        }
        if other.workers.is_some() {
            self.workers = other.workers;
        }
        if let Some(other_prom) = other.prometheus {
            if let Some(ref mut self_prom) = self.prometheus {
                if other_prom.enabled.is_some() {
                    self_prom.enabled = other_prom.enabled;
                }
                if other_prom.address.is_some() {
                    self_prom.address = other_prom.address;
                }
            } else {
                self.prometheus = Some(other_prom);
            }
        }
        self
    }

    /// Checks every value and resolves the configuration into [`Settings`].
    /// Missing values fall back to [`Config::defaults`].
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let merged = Config::defaults().merge_with(self);

        let hosts = merged.hosts.unwrap_or_default();
        if hosts.is_empty() {
            return Err(ConfigError::Validation(
                "at least one host is required".to_string(),
            ));
        }
        let output = parse_field::<OutputFormat>("output", merged.output)?;
        let mode = parse_field::<ComparisonMode>("mode", merged.mode)?;
        let strategy = parse_field::<FingerprintStrategy>("strategy", merged.strategy)?;
        let port = match merged.port {
            Some(0) => return Err(ConfigError::Validation("port cannot be 0".to_string())),
            Some(port) => port,
            None => DEFAULT_TLS_PORT,
        };
        let tls_timeout =
            timeout("tls_timeout_secs", merged.tls_timeout_secs, DEFAULT_TLS_TIMEOUT)?;
        let api_timeout =
            timeout("api_timeout_secs", merged.api_timeout_secs, DEFAULT_API_TIMEOUT)?;
        let max_workers = match merged.workers {
            Some(0) => {
                return Err(ConfigError::Validation(
                    "workers must be positive".to_string(),
                ))
            }
            Some(workers) => workers,
            None => DEFAULT_MAX_WORKERS,
        };
        let api_url = merged.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        url::Url::parse(&api_url)
            .map_err(|e| ConfigError::Validation(format!("api_url '{}': {}", api_url, e)))?;

        let prometheus = match merged.prometheus {
            Some(PrometheusConfig {
                enabled: Some(true),
                address,
            }) => Some(address.ok_or_else(|| {
                ConfigError::Validation("prometheus.address is required when enabled".to_string())
            })?),
            _ => None,
        };

        Ok(Settings {
            hosts,
            output,
            exit_code: merged.exit_code.unwrap_or(0),
            options: CheckOptions {
                mode,
                strategy,
                port,
                tls_timeout,
                api_url,
                api_timeout,
                max_workers,
            },
            prometheus,
        })
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            hosts: Some(vec![
                "cert.ist".to_string(),
                "urip.io".to_string(),
                "https://asciirange.com/".to_string(),
            ]),
            exit_code: Some(1),
            ..Config::defaults()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

fn parse_field<T: FromStr>(name: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::Validation(format!("{} is required", name)))?;
    T::from_str(&value)
        .map_err(|_| ConfigError::Validation(format!("invalid {} '{}'", name, value)))
}

fn timeout(name: &str, secs: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match secs {
        Some(0) => Err(ConfigError::Validation(format!("{} must be positive", name))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_toml() {
        let toml_content = r#"
            hosts = ["cert.ist", "urip.io"]
            output = "json"
            exit_code = 1
            mode = "leaf-only"
            strategy = "pem"
            api_url = "http://127.0.0.1:8080/"

            [prometheus]
            enabled = true
            address = "http://localhost:9092"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(
            config.hosts,
            Some(vec!["cert.ist".to_string(), "urip.io".to_string()])
        );
        assert_eq!(config.output, Some("json".to_string()));
        assert_eq!(config.exit_code, Some(1));
        assert_eq!(config.mode, Some("leaf-only".to_string()));
        assert_eq!(config.strategy, Some("pem".to_string()));
        assert_eq!(config.port, None);

        let prometheus = config.prometheus.unwrap();
        assert_eq!(prometheus.enabled, Some(true));
        assert_eq!(
            prometheus.address,
            Some("http://localhost:9092".to_string())
        );
    }

    #[test]
    fn test_config_merge() {
        let base_config = Config {
            hosts: Some(vec!["base.test".to_string()]),
            output: Some("text".to_string()),
            exit_code: Some(0),
            mode: Some("full-chain".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://base:9091".to_string()),
            }),
            ..Config::default()
        };

        let override_config = Config {
            hosts: Some(vec!["override.test".to_string()]),
            exit_code: Some(1),
            mode: Some("leaf-only".to_string()),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: None,
            }),
            ..Config::default()
        };

        let merged = base_config.merge_with(override_config);

        assert_eq!(merged.hosts, Some(vec!["override.test".to_string()]));
        assert_eq!(merged.output, Some("text".to_string())); // not overridden
        assert_eq!(merged.exit_code, Some(1));
        assert_eq!(merged.mode, Some("leaf-only".to_string()));

        let prometheus = merged.prometheus.unwrap();
        assert_eq!(prometheus.enabled, Some(true));
        assert_eq!(prometheus.address, Some("http://base:9091".to_string()));
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = Config {
            hosts: Some(vec!["cert.ist".to_string()]),
            ..Config::default()
        }
        .resolve()
        .unwrap();

        assert_eq!(settings.hosts, vec!["cert.ist".to_string()]);
        assert_eq!(settings.output, OutputFormat::Summary);
        assert_eq!(settings.exit_code, 0);
        assert_eq!(settings.options, CheckOptions::default());
        assert_eq!(settings.prometheus, None);
    }

    #[test]
    fn test_resolve_custom_values() {
        let settings = Config {
            hosts: Some(vec!["cert.ist".to_string()]),
            output: Some("JSON".to_string()),
            mode: Some("leaf-only".to_string()),
            strategy: Some("pem".to_string()),
            port: Some(8443),
            tls_timeout_secs: Some(3),
            workers: Some(4),
            prometheus: Some(PrometheusConfig {
                enabled: Some(true),
                address: None,
            }),
            ..Config::default()
        }
        .resolve()
        .unwrap();

        assert_eq!(settings.output, OutputFormat::Json);
        assert_eq!(settings.options.mode, ComparisonMode::LeafOnly);
        assert_eq!(settings.options.strategy, FingerprintStrategy::Pem);
        assert_eq!(settings.options.port, 8443);
        assert_eq!(settings.options.tls_timeout, Duration::from_secs(3));
        assert_eq!(settings.options.max_workers, 4);
        assert_eq!(settings.prometheus, Some("http://localhost:9091".to_string()));
    }

    #[test]
    fn test_resolve_rejects_bad_values() {
        let with = |config: Config| {
            Config {
                hosts: Some(vec!["cert.ist".to_string()]),
                ..Config::default()
            }
            .merge_with(config)
            .resolve()
        };

        let cases = vec![
            Config {
                hosts: Some(vec![]),
                ..Config::default()
            },
            Config {
                mode: Some("partial".to_string()),
                ..Config::default()
            },
            Config {
                strategy: Some("md5".to_string()),
                ..Config::default()
            },
            Config {
                output: Some("xml".to_string()),
                ..Config::default()
            },
            Config {
                port: Some(0),
                ..Config::default()
            },
            Config {
                api_timeout_secs: Some(0),
                ..Config::default()
            },
            Config {
                workers: Some(0),
                ..Config::default()
            },
            Config {
                api_url: Some("not a url".to_string()),
                ..Config::default()
            },
        ];
        for case in cases {
            let result = with(case.clone());
            assert!(
                matches!(result, Err(ConfigError::Validation(_))),
                "{:?} should be rejected",
                case
            );
        }
    }

    #[test]
    fn test_invalid_toml() {
        let invalid_toml = "hosts = [invalid toml";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::from_file(temp_file.path());
        assert!(result.is_err());

        match result.unwrap_err() {
            ConfigError::Parse(_) => {} // Expected
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_example_toml_generation() {
        let example = Config::example_toml();

        let parsed: Config = toml::from_str(&example).unwrap();

        assert!(parsed.hosts.is_some());
        assert_eq!(parsed.mode, Some("full-chain".to_string()));
        assert!(parsed.prometheus.is_some());
        assert!(parsed.resolve().is_ok());
    }
}
