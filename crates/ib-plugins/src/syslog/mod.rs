//! Syslog plugin.
//!
//! Forwards indicators to a syslog collector as CEF events over UDP, TCP or
//! TLS.

pub mod cef;
pub mod constants;
pub mod transport;

use crate::traits::{
    Action, Indicator, IndicatorSink, Plugin, PluginError, PluginResult, PushResult,
    ValidationResult,
};
use crate::validators::{is_valid_fqdn, is_valid_hostname, is_valid_ip};
use async_trait::async_trait;
use cef::{frame, CefFormatter};
use chrono::Utc;
use constants::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

pub use transport::SyslogTransport;

/// Syslog plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogConfig {
    #[serde(default)]
    pub syslog_server: String,
    #[serde(default)]
    pub syslog_port: Option<i64>,
    #[serde(default = "default_protocol")]
    pub syslog_protocol: String,
    #[serde(default = "default_format")]
    pub syslog_format: String,
    #[serde(default = "default_identifier")]
    pub log_source_identifier: String,
    /// PEM encoded CA certificate(s), TLS only.
    #[serde(default)]
    pub ca_certificate: Option<String>,
}

fn default_protocol() -> String {
    "UDP".to_string()
}

fn default_format() -> String {
    "CEF".to_string()
}

fn default_identifier() -> String {
    DEFAULT_LOG_SOURCE_IDENTIFIER.to_string()
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            syslog_server: String::new(),
            syslog_port: None,
            syslog_protocol: default_protocol(),
            syslog_format: default_format(),
            log_source_identifier: default_identifier(),
            ca_certificate: None,
        }
    }
}

impl SyslogConfig {
    pub fn from_value(value: &Value) -> PluginResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            PluginError::Configuration(format!("Invalid Syslog configuration provided. Error: {}", e))
        })
    }

    pub fn server(&self) -> &str {
        self.syslog_server.trim()
    }

    /// The port, once validated.
    pub fn port(&self) -> PluginResult<u16> {
        self.syslog_port
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                PluginError::Validation(
                    "Invalid Syslog Port provided. Port must be between 1 and 65535.".to_string(),
                )
            })
    }

    pub fn protocol(&self) -> String {
        self.syslog_protocol.trim().to_uppercase()
    }

    fn ca_certificate(&self) -> Option<&str> {
        self.ca_certificate
            .as_deref()
            .map(str::trim)
            .filter(|pem| !pem.is_empty())
    }

    pub fn validate_static(&self) -> PluginResult<()> {
        let server = self.server();
        if server.is_empty() {
            return Err(PluginError::Validation(
                "Syslog Server is a required configuration parameter.".to_string(),
            ));
        }
        if !(is_valid_ip(server) || is_valid_fqdn(server) || is_valid_hostname(server)) {
            return Err(PluginError::Validation(
                "Invalid Syslog Server provided in the configuration parameters.".to_string(),
            ));
        }
        if self.syslog_port.is_none() {
            return Err(PluginError::Validation(
                "Syslog Port is a required configuration parameter.".to_string(),
            ));
        }
        self.port()?;
        if !SYSLOG_PROTOCOLS.contains(&self.protocol().as_str()) {
            return Err(PluginError::Validation(format!(
                "Invalid Syslog Protocol selected. Allowed values are {}.",
                SYSLOG_PROTOCOLS.join(", ")
            )));
        }
        if !SYSLOG_FORMATS.contains(&self.syslog_format.trim().to_uppercase().as_str()) {
            return Err(PluginError::Validation(format!(
                "Invalid Syslog Format selected. Allowed value is {}.",
                SYSLOG_FORMATS.join(", ")
            )));
        }
        if self.protocol() == "TLS" && self.ca_certificate().is_some() {
            transport::tls_client_config(self.ca_certificate()).map_err(|e| {
                PluginError::Validation(format!(
                    "Invalid CA Certificate provided in the configuration parameters. {}",
                    e
                ))
            })?;
        }
        Ok(())
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// The Syslog plugin.
pub struct SyslogPlugin {
    name: String,
    config: SyslogConfig,
    log_prefix: String,
    formatter: CefFormatter,
    host: String,
}

impl SyslogPlugin {
    pub fn new(name: impl Into<String>, config: SyslogConfig) -> Self {
        let name = name.into();
        let log_prefix = format!("{} {} [{}]", MODULE_NAME, PLUGIN_NAME, name);
        info!("Syslog plugin initialized");
        Self {
            name,
            config,
            log_prefix,
            formatter: CefFormatter::new(CEF_VENDOR, CEF_PRODUCT, PLUGIN_VERSION),
            host: local_hostname(),
        }
    }

    pub fn config(&self) -> &SyslogConfig {
        &self.config
    }

    /// Formats and frames one indicator for the given transport.
    pub fn render(&self, indicator: &Indicator, line_delimited: bool) -> PluginResult<String> {
        let message = self.formatter.format(indicator)?;
        Ok(frame(
            &message,
            CefFormatter::severity_of(indicator),
            &self.host,
            self.config.log_source_identifier.trim(),
            Utc::now(),
            line_delimited,
        ))
    }
}

#[async_trait]
impl Plugin for SyslogPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &str {
        PLATFORM_NAME
    }

    fn module(&self) -> &str {
        MODULE_NAME
    }

    async fn validate(&self) -> ValidationResult {
        match self.config.validate_static() {
            Ok(()) => ValidationResult::ok("Validation successful."),
            Err(e) => {
                error!("{}: Validation error occurred. {}", self.log_prefix, e);
                ValidationResult::fail(e.to_string())
            }
        }
    }

    fn get_actions(&self) -> Vec<Action> {
        vec![Action::new("Send to Syslog", SYSLOG_ACTION)]
    }

    fn validate_action(&self, action: &Action) -> ValidationResult {
        if action.value == SYSLOG_ACTION {
            ValidationResult::ok("Validation successful.")
        } else {
            ValidationResult::fail("Unsupported action provided.")
        }
    }
}

#[async_trait]
impl IndicatorSink for SyslogPlugin {
    async fn push(
        &self,
        indicators: &[Indicator],
        action: &Action,
        _source_label: Option<&str>,
    ) -> PluginResult<PushResult> {
        if action.value != SYSLOG_ACTION {
            return Err(PluginError::Validation(
                "Unsupported action provided.".to_string(),
            ));
        }
        let port = self.config.port()?;
        let protocol = self.config.protocol();
        let mut transport = transport::connect(
            &protocol,
            self.config.server(),
            port,
            self.config.ca_certificate(),
        )
        .await
        .map_err(|e| {
            error!(
                details = %e,
                "{}: Unable to connect to syslog server {}:{} over {}.",
                self.log_prefix,
                self.config.server(),
                port,
                protocol
            );
            e
        })?;

        let (mut sent, mut failed) = (0usize, 0usize);
        for indicator in indicators {
            let outcome = match self.render(indicator, transport.line_delimited()) {
                Ok(message) => transport.send(&message).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        details = %e,
                        "{}: Unable to send indicator '{}' to {}.",
                        self.log_prefix,
                        indicator.value,
                        PLATFORM_NAME
                    );
                }
            }
        }
        if let Err(e) = transport.close().await {
            warn!(
                details = %e,
                "{}: Unable to close the connection to syslog server {}:{}.",
                self.log_prefix,
                self.config.server(),
                port
            );
        }

        let message = format!(
            "Successfully sent {} indicator(s) to {} and failed to send {} indicator(s).",
            sent, PLATFORM_NAME, failed
        );
        info!("{}: {}", self.log_prefix, message);
        Ok(PushResult {
            success: true,
            message,
            pushed: sent,
            failed,
        })
    }
}
