//! Syslog plugin constants.

pub const PLATFORM_NAME: &str = "Syslog";
pub const PLUGIN_NAME: &str = "Syslog";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MODULE_NAME: &str = "CTE";

pub const SYSLOG_FORMATS: [&str; 1] = ["CEF"];
pub const SYSLOG_PROTOCOLS: [&str; 3] = ["UDP", "TCP", "TLS"];

pub const SYSLOG_ACTION: &str = "syslog";
pub const DEFAULT_LOG_SOURCE_IDENTIFIER: &str = "ioc-bridge";

pub const CEF_VENDOR: &str = "ioc-bridge";
pub const CEF_PRODUCT: &str = "ioc-bridge";
pub const CEF_EVENT_NAME: &str = "Threat Indicator";

/// Syslog facility "user-level messages".
pub const FACILITY_USER: u8 = 1;

pub const SEVERITY_LOW: &str = "Low";
pub const SEVERITY_MEDIUM: &str = "Medium";
pub const SEVERITY_HIGH: &str = "High";
pub const SEVERITY_VERY_HIGH: &str = "Very-High";
pub const SEVERITY_UNKNOWN: &str = "Unknown";

/// Raw severity values (names or 0-10 scores) and their labels.
pub const SEVERITY_MAP: [(&str, &str); 17] = [
    ("low", SEVERITY_LOW),
    ("med", SEVERITY_MEDIUM),
    ("medium", SEVERITY_MEDIUM),
    ("high", SEVERITY_HIGH),
    ("very-high", SEVERITY_VERY_HIGH),
    ("critical", SEVERITY_VERY_HIGH),
    ("0", SEVERITY_LOW),
    ("1", SEVERITY_LOW),
    ("2", SEVERITY_LOW),
    ("3", SEVERITY_LOW),
    ("4", SEVERITY_MEDIUM),
    ("5", SEVERITY_MEDIUM),
    ("6", SEVERITY_MEDIUM),
    ("7", SEVERITY_HIGH),
    ("8", SEVERITY_HIGH),
    ("9", SEVERITY_VERY_HIGH),
    ("10", SEVERITY_VERY_HIGH),
];

/// Looks up the label for a raw severity, case-insensitively.
pub fn severity_label(raw: &str) -> &'static str {
    let raw = raw.trim().to_lowercase();
    SEVERITY_MAP
        .iter()
        .find(|(key, _)| *key == raw)
        .map(|(_, label)| *label)
        .unwrap_or(SEVERITY_UNKNOWN)
}
