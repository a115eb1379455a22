//! CEF message formatting and syslog framing.

use super::constants::{
    severity_label, CEF_EVENT_NAME, FACILITY_USER, SEVERITY_HIGH, SEVERITY_LOW, SEVERITY_MEDIUM,
    SEVERITY_VERY_HIGH,
};
use crate::traits::{Indicator, IndicatorType, PluginError, PluginResult};
use chrono::{DateTime, Utc};

/// Escapes a CEF header field.
pub fn escape_header(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

/// Escapes a CEF extension value.
pub fn escape_extension(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('=', "\\=")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// CEF severity (0-10) for a severity label.
pub fn cef_severity(label: &str) -> u8 {
    match label {
        SEVERITY_LOW => 3,
        SEVERITY_MEDIUM => 5,
        SEVERITY_HIGH => 8,
        SEVERITY_VERY_HIGH => 10,
        _ => 0,
    }
}

/// Syslog severity (RFC 5424 numeric) for a severity label.
pub fn syslog_severity(label: &str) -> u8 {
    match label {
        SEVERITY_VERY_HIGH => 2,
        SEVERITY_HIGH => 3,
        SEVERITY_MEDIUM => 4,
        SEVERITY_LOW => 5,
        _ => 6,
    }
}

/// Extension key carrying the indicator value.
pub fn value_key(ioc_type: IndicatorType) -> &'static str {
    match ioc_type {
        IndicatorType::Sha256 | IndicatorType::Md5 => "fileHash",
        IndicatorType::Url => "request",
        IndicatorType::Ipv4 | IndicatorType::Ipv6 => "dst",
        IndicatorType::Domain | IndicatorType::Hostname | IndicatorType::Fqdn => "dhost",
    }
}

/// Formats indicators as CEF events.
#[derive(Debug, Clone)]
pub struct CefFormatter {
    vendor: String,
    product: String,
    version: String,
}

impl CefFormatter {
    pub fn new(
        vendor: impl Into<String>,
        product: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            product: product.into(),
            version: version.into(),
        }
    }

    /// Severity label of an indicator.
    pub fn severity_of(indicator: &Indicator) -> &'static str {
        severity_label(indicator.severity.as_str())
    }

    pub fn format(&self, indicator: &Indicator) -> PluginResult<String> {
        let value = indicator.value.trim();
        if value.is_empty() {
            return Err(PluginError::Validation(
                "Indicator value is empty.".to_string(),
            ));
        }
        let label = Self::severity_of(indicator);

        let mut extension = vec![
            format!(
                "{}={}",
                value_key(indicator.ioc_type),
                escape_extension(value)
            ),
            format!("cs1={}", escape_extension(value)),
            "cs1Label=Indicator Value".to_string(),
            format!("cs2={}", indicator.ioc_type),
            "cs2Label=Indicator Type".to_string(),
        ];
        if !indicator.tags.is_empty() {
            extension.push(format!("cs3={}", escape_extension(&indicator.tags.join(","))));
            extension.push("cs3Label=Tags".to_string());
        }
        extension.push(format!("cn1={}", indicator.reputation));
        extension.push("cn1Label=Reputation".to_string());
        if !indicator.comments.trim().is_empty() {
            extension.push(format!("msg={}", escape_extension(indicator.comments.trim())));
        }
        if let Some(last_seen) = indicator.last_seen {
            extension.push(format!("rt={}", last_seen.timestamp_millis()));
        }

        Ok(format!(
            "CEF:0|{}|{}|{}|{}|{}|{}|{}",
            escape_header(&self.vendor),
            escape_header(&self.product),
            escape_header(&self.version),
            escape_header(indicator.ioc_type.as_str()),
            escape_header(CEF_EVENT_NAME),
            cef_severity(label),
            extension.join(" ")
        ))
    }
}

/// Wraps a message in a syslog frame: `<PRI>TIMESTAMP HOST IDENT: MSG`.
pub fn frame(
    message: &str,
    severity: &str,
    host: &str,
    ident: &str,
    timestamp: DateTime<Utc>,
    line_delimited: bool,
) -> String {
    let pri = u16::from(FACILITY_USER) * 8 + u16::from(syslog_severity(severity));
    let mut framed = format!(
        "<{}>{} {} {}: {}",
        pri,
        timestamp.format("%b %e %H:%M:%S"),
        host,
        ident,
        message
    );
    if line_delimited {
        framed.push('\n');
    }
    framed
}
