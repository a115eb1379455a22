//! Plugin trait definitions for ioc-bridge.
//!
//! This module defines the seams between the plugins and the host platform:
//! the record types exchanged with vendors, the results handed back to the
//! host, and the traits every plugin implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur in plugins.
///
/// The display form is the message surfaced to the user; full details are
/// logged (with credentials redacted) where the error is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("{0}")]
    Proxy(String),

    #[error("{0}")]
    Connection(String),

    #[error("{message}")]
    Http { status: Option<u16>, message: String },

    #[error("{message}")]
    RetriesExhausted { status: u16, message: String },

    #[error("{0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Tag(String),

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Unexpected(String),
}

impl PluginError {
    /// Returns the HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            PluginError::Http { status, .. } => *status,
            PluginError::RetriesExhausted { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Type of threat indicator, as understood by the host platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Sha256,
    Md5,
    Url,
    Ipv4,
    Ipv6,
    Domain,
    Hostname,
    Fqdn,
}

impl IndicatorType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Sha256 => "sha256",
            IndicatorType::Md5 => "md5",
            IndicatorType::Url => "url",
            IndicatorType::Ipv4 => "ipv4",
            IndicatorType::Ipv6 => "ipv6",
            IndicatorType::Domain => "domain",
            IndicatorType::Hostname => "hostname",
            IndicatorType::Fqdn => "fqdn",
        }
    }
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator severity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// An indicator of compromise as held by the host platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Indicator {
    /// The indicator value (hash, URL, domain, IP).
    pub value: String,
    /// Indicator type.
    #[serde(rename = "type")]
    pub ioc_type: IndicatorType,
    /// First seen timestamp.
    #[serde(default, rename = "firstSeen")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Last seen timestamp.
    #[serde(default, rename = "lastSeen")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Free-form comments.
    #[serde(default)]
    pub comments: String,
    /// Tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Deep link back to the vendor record.
    #[serde(default, rename = "extendedInformation")]
    pub extended_information: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// Reputation on a 1-10 scale.
    #[serde(default = "default_reputation")]
    pub reputation: u8,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_reputation() -> u8 {
    5
}

fn default_active() -> bool {
    true
}

impl Indicator {
    /// Creates an indicator with default metadata.
    pub fn new(value: impl Into<String>, ioc_type: IndicatorType) -> Self {
        Self {
            value: value.into(),
            ioc_type,
            first_seen: None,
            last_seen: None,
            comments: String::new(),
            tags: Vec::new(),
            extended_information: None,
            severity: Severity::Unknown,
            reputation: default_reputation(),
            active: default_active(),
        }
    }
}

/// A device (host) record pulled from a network access control platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    /// Vendor host identifier.
    pub id: String,
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub online: Option<bool>,
    /// Remaining vendor properties, flattened to strings.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// An application (third-party vendor relationship) record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationRecord {
    /// Vendor identifier; empty for records not yet created on the vendor side.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub business_owner: Option<String>,
}

/// Outcome of a configuration or action validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub success: bool,
    pub message: String,
    /// Set when the feature is not configured and the host should skip it.
    #[serde(default)]
    pub disabled: bool,
}

impl ValidationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            disabled: false,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            disabled: false,
        }
    }

    pub fn disabled(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            disabled: true,
        }
    }
}

/// Outcome of a push to a vendor platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushResult {
    pub success: bool,
    pub message: String,
    /// Number of records accepted by the vendor.
    pub pushed: usize,
    /// Number of records that could not be sent.
    pub failed: usize,
}

/// A sharing action configured on the host (business rule target).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl Action {
    /// Creates an action without parameters.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            parameters: serde_json::Map::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Returns a string parameter. `None` when absent, null, or not a string.
    pub fn string_parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// A choice offered by a `choice` action field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldChoice {
    pub key: String,
    pub value: String,
}

/// Describes an input field the host renders for an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionField {
    pub label: String,
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mandatory: bool,
    pub default: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<FieldChoice>,
    pub description: String,
}

/// Pull state persisted by the host between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PullCheckpoint {
    /// When the last complete pull finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Opaque plugin state for resuming a partially completed pull.
    pub sub_checkpoint: Option<serde_json::Value>,
}

impl PullCheckpoint {
    /// Checkpoint for a pull that resumes from the given plugin state.
    pub fn resume(&self, sub_checkpoint: serde_json::Value) -> Self {
        Self {
            last_run_at: self.last_run_at,
            sub_checkpoint: Some(sub_checkpoint),
        }
    }
}

/// One page of records and the state needed to fetch the next page.
#[derive(Debug, Clone, PartialEq)]
pub struct PullPage<T> {
    pub records: Vec<T>,
    /// `None` when this was the last page.
    pub next: Option<serde_json::Value>,
}

/// Retraction status for one batch of source indicators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifiedIndicators {
    /// Values no longer present on the vendor side.
    pub values: Vec<String>,
    /// Set when retraction is not configured.
    pub disabled: bool,
}

/// Base trait for all plugins.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Returns the configuration name.
    fn name(&self) -> &str;

    /// Returns the vendor platform name (e.g., "MISP").
    fn platform(&self) -> &str;

    /// Returns the host module the plugin belongs to (e.g., "CTE").
    fn module(&self) -> &str;

    /// Validates the plugin configuration, including remote checks.
    async fn validate(&self) -> ValidationResult;

    /// Returns the sharing actions this plugin supports.
    fn get_actions(&self) -> Vec<Action> {
        Vec::new()
    }

    /// Validates an action configuration.
    fn validate_action(&self, action: &Action) -> ValidationResult {
        ValidationResult::fail(format!("Unsupported action '{}' provided.", action.value))
    }

    /// Returns the fields required to configure an action.
    fn get_action_fields(&self, _action: &Action) -> Vec<ActionField> {
        Vec::new()
    }
}

/// A plugin that pulls records from a vendor platform page by page.
#[async_trait]
pub trait RecordSource: Plugin {
    type Record: Send;

    /// Fetches a single page.
    async fn pull_page(&self, checkpoint: &PullCheckpoint)
        -> PluginResult<PullPage<Self::Record>>;

    /// Fetches every page, starting from the checkpoint.
    async fn pull(&self, checkpoint: &PullCheckpoint) -> PluginResult<Vec<Self::Record>> {
        let mut records = Vec::new();
        let mut current = checkpoint.clone();
        loop {
            let page = self.pull_page(&current).await?;
            records.extend(page.records);
            match page.next {
                Some(next) => current = current.resume(next),
                None => break,
            }
        }
        Ok(records)
    }
}

/// A plugin that shares indicators to a vendor platform.
#[async_trait]
pub trait IndicatorSink: Plugin {
    /// Pushes indicators using the given action.
    ///
    /// `source_label` names the plugin configuration the indicators came from.
    async fn push(
        &self,
        indicators: &[Indicator],
        action: &Action,
        source_label: Option<&str>,
    ) -> PluginResult<PushResult>;
}

/// A plugin that can detect and remove indicators no longer active.
#[async_trait]
pub trait Retractable: Plugin {
    /// Reports, per batch, which source indicators no longer exist on the vendor side.
    async fn get_modified_indicators(
        &self,
        batches: &[Vec<Indicator>],
    ) -> PluginResult<Vec<ModifiedIndicators>>;

    /// Removes previously shared indicators from the vendor platform.
    async fn retract_indicators(
        &self,
        batches: &[Vec<Indicator>],
        actions: &[Action],
    ) -> PluginResult<Vec<ValidationResult>>;
}
