//! Forescout plugin.
//!
//! Authenticates with a session token from `POST /api/login` and pulls the
//! managed hosts as [`DeviceRecord`]s.

use crate::http::{ApiHelper, ApiRequest, HelperConfig, HostSettings, StatusMessages};
use crate::secure_string::SecureString;
use crate::traits::{
    DeviceRecord, Plugin, PluginError, PluginResult, PullCheckpoint, PullPage, RecordSource,
    ValidationResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub const PLATFORM_NAME: &str = "Forescout";
pub const PLUGIN_NAME: &str = "Forescout";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MODULE_NAME: &str = "CRE";

/// Forescout plugin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForescoutConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: SecureString,
}

impl ForescoutConfig {
    pub fn from_value(value: &Value) -> PluginResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            PluginError::Configuration(format!(
                "Invalid Forescout configuration provided. Error: {}",
                e
            ))
        })
    }

    /// Returns the base URL, username and password, trimmed.
    pub fn credentials(&self) -> (String, String, SecureString) {
        (
            self.base_url.trim().trim_end_matches('/').to_string(),
            self.username.trim().to_string(),
            self.password.clone(),
        )
    }

    pub fn validate_static(&self) -> PluginResult<()> {
        let (base_url, username, password) = self.credentials();
        let fail = |msg: &str| Err(PluginError::Validation(msg.to_string()));

        if base_url.is_empty() {
            return fail("Base URL is a required configuration parameter.");
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return fail("Invalid Base URL provided in the configuration parameters.");
        }
        if username.is_empty() {
            return fail("Username is a required configuration parameter.");
        }
        if password.is_empty() {
            return fail("Password is a required configuration parameter.");
        }
        Ok(())
    }
}

/// Flattens a Forescout host field to a string.
///
/// Fields are either `{"value": ..}` objects or arrays of them.
fn field_value(field: &Value) -> Option<String> {
    match field {
        Value::Object(map) => map.get("value").and_then(field_value),
        Value::Array(items) => {
            let values: Vec<String> = items.iter().filter_map(field_value).collect();
            (!values.is_empty()).then(|| values.join(","))
        }
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Builds a device from a `/api/hosts` entry and its host details.
pub fn device_from_details(summary: &Value, details: &Value) -> DeviceRecord {
    let host = details.get("host").unwrap_or(details);
    let mut fields: HashMap<String, String> = host
        .get("fields")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| field_value(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    let text = |key: &str| {
        host.get(key)
            .or_else(|| summary.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let hostname = fields
        .remove("nbthost")
        .or_else(|| fields.remove("dhcp_hostname"));
    let os = fields
        .remove("os_classification")
        .or_else(|| fields.remove("va_os"));
    let online = fields
        .remove("online")
        .and_then(|v| v.to_lowercase().parse::<bool>().ok());

    DeviceRecord {
        id: id_string(host.get("id"))
            .or_else(|| id_string(summary.get("hostId")))
            .unwrap_or_default(),
        ip: text("ip"),
        mac: text("mac"),
        hostname,
        os,
        online,
        properties: fields,
    }
}

/// The Forescout plugin.
pub struct ForescoutPlugin {
    name: String,
    config: ForescoutConfig,
    helper: ApiHelper,
    token: RwLock<Option<SecureString>>,
}

impl ForescoutPlugin {
    pub fn new(
        name: impl Into<String>,
        config: ForescoutConfig,
        settings: HostSettings,
    ) -> PluginResult<Self> {
        let name = name.into();
        let log_prefix = format!("{} {} [{}]", MODULE_NAME, PLUGIN_NAME, name);
        let helper = ApiHelper::new(HelperConfig {
            platform_name: PLATFORM_NAME.to_string(),
            plugin_name: PLUGIN_NAME.to_string(),
            plugin_version: PLUGIN_VERSION.to_string(),
            module: MODULE_NAME.to_string(),
            log_prefix,
            settings,
            messages: StatusMessages::new(
                "Verify the Base URL, Username and Password provided in the \
                 configuration parameters.",
                "Verify Base URL provided in the configuration parameters.",
            ),
        })?;

        info!("Forescout plugin initialized");

        Ok(Self {
            name,
            config,
            helper,
            token: RwLock::new(None),
        })
    }

    fn prefix(&self) -> &str {
        self.helper.log_prefix()
    }

    fn base_url(&self) -> String {
        self.config.credentials().0
    }

    /// Logs in and returns the session token.
    pub async fn get_auth_header(&self, is_validation: bool) -> PluginResult<SecureString> {
        let (base_url, username, password) = self.config.credentials();
        let request = ApiRequest::post(
            format!("{}/api/login", base_url),
            format!("getting auth token from {}", PLUGIN_NAME),
        )
        .header("Content-Type", "application/x-www-form-urlencoded")
        .query("username", username)
        .query("password", password.expose_secret())
        .hide_params()
        .validation(is_validation);

        let raw = self.helper.execute(&request).await?;
        let token = raw.body.trim();
        if matches!(raw.status, 200 | 201) && !token.is_empty() {
            return Ok(SecureString::from(token));
        }

        if !raw.is_success() {
            self.helper
                .handle_response(&raw, "getting auth token", true)?;
        }

        let mut message = format!("Invalid authentication token received from {}.", PLATFORM_NAME);
        if is_validation {
            message.push_str(
                " Verify the Base URL, Username and Password provided in the \
                 configuration parameters.",
            );
        }
        error!(
            details = %format!("API response status: {}", raw.status),
            "{}: {}",
            self.prefix(),
            message
        );
        Err(PluginError::Http {
            status: Some(raw.status),
            message,
        })
    }

    async fn cached_token(&self) -> PluginResult<SecureString> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> PluginResult<SecureString> {
        let token = self.get_auth_header(false).await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    /// Sends a request with the session token. A 401 logs in again once.
    pub async fn authorized_send(&self, mut request: ApiRequest) -> PluginResult<Value> {
        let token = self.cached_token().await?;
        request.set_header("Authorization", token.expose_secret());
        let raw = self.helper.execute(&request).await?;

        if raw.status == 401 && !request.is_validation {
            info!(
                "{}: Received exit code 401 while {}. Regenerating the auth token.",
                self.prefix(),
                request.logger_msg
            );
            let token = self.refresh_token().await?;
            request.set_header("Authorization", token.expose_secret());
            let retried = self.helper.execute(&request).await?;
            return self
                .helper
                .handle_response(&retried, &request.logger_msg, false);
        }

        self.helper
            .handle_response(&raw, &request.logger_msg, request.is_validation)
    }

    /// Fetches every host with its details. Hosts whose details fail are skipped.
    pub async fn fetch_devices(&self) -> PluginResult<Vec<DeviceRecord>> {
        let base_url = self.base_url();
        let hosts = self
            .authorized_send(ApiRequest::get(
                format!("{}/api/hosts", base_url),
                format!("fetching hosts from {}", PLATFORM_NAME),
            ))
            .await?;
        let summaries = hosts
            .get("hosts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        info!(
            "{}: Found {} host(s) on {}.",
            self.prefix(),
            summaries.len(),
            PLATFORM_NAME
        );

        let mut devices = Vec::with_capacity(summaries.len());
        let mut skipped = 0usize;
        for summary in &summaries {
            let Some(host_id) = id_string(summary.get("hostId")) else {
                skipped += 1;
                continue;
            };
            let request = ApiRequest::get(
                format!("{}/api/hosts/hostid/{}", base_url, host_id),
                format!("fetching details of host {} from {}", host_id, PLATFORM_NAME),
            );
            match self.authorized_send(request).await {
                Ok(details) => devices.push(device_from_details(summary, &details)),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        details = %e,
                        "{}: Unable to fetch details of host {}. This host will be skipped.",
                        self.prefix(),
                        host_id
                    );
                }
            }
        }

        info!(
            "{}: Successfully fetched {} host(s) and skipped {} host(s) from {}.",
            self.prefix(),
            devices.len(),
            skipped,
            PLATFORM_NAME
        );
        Ok(devices)
    }
}

#[async_trait]
impl Plugin for ForescoutPlugin {
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
        if let Err(e) = self.config.validate_static() {
            error!("{}: Validation error occurred. {}", self.prefix(), e);
            return ValidationResult::fail(e.to_string());
        }
        match self.get_auth_header(true).await {
            Ok(_) => ValidationResult::ok("Validation successful."),
            Err(e) => ValidationResult::fail(e.to_string()),
        }
    }
}

#[async_trait]
impl RecordSource for ForescoutPlugin {
    type Record = DeviceRecord;

    async fn pull_page(&self, _checkpoint: &PullCheckpoint) -> PluginResult<PullPage<DeviceRecord>> {
        Ok(PullPage {
            records: self.fetch_devices().await?,
            next: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_are_trimmed() {
        let config = ForescoutConfig::from_value(&json!({
            "base_url": " https://fs.example.com/ ",
            "username": " admin ",
            "password": "pw",
        }))
        .unwrap();
        let (base_url, username, password) = config.credentials();
        assert_eq!(base_url, "https://fs.example.com");
        assert_eq!(username, "admin");
        assert_eq!(password.expose_secret(), "pw");
        assert!(config.validate_static().is_ok());
    }

    #[test]
    fn test_required_fields() {
        let config = ForescoutConfig::default();
        assert_eq!(
            config.validate_static().unwrap_err().to_string(),
            "Base URL is a required configuration parameter."
        );

        let config = ForescoutConfig {
            base_url: "fs.example.com".to_string(),
            ..Default::default()
        };
        assert!(config
            .validate_static()
            .unwrap_err()
            .to_string()
            .starts_with("Invalid Base URL"));

        let config = ForescoutConfig {
            base_url: "https://fs.example.com".to_string(),
            username: "admin".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.validate_static().unwrap_err().to_string(),
            "Password is a required configuration parameter."
        );
    }

    #[test]
    fn test_device_from_details() {
        let summary = json!({"hostId": 4242, "ip": "10.1.2.3", "mac": "005056aa0001"});
        let details = json!({
            "host": {
                "ip": "10.1.2.3",
                "mac": "005056aa0001",
                "id": 4242,
                "fields": {
                    "dhcp_hostname": {"timestamp": 1, "value": "ws-042"},
                    "va_os": {"value": "Windows 10"},
                    "online": {"value": "true"},
                    "segment_path": {"value": "/Corp/HQ"},
                    "open_ports": [{"value": "443/TCP"}, {"value": "22/TCP"}],
                }
            }
        });

        let device = device_from_details(&summary, &details);
        assert_eq!(device.id, "4242");
        assert_eq!(device.ip.as_deref(), Some("10.1.2.3"));
        assert_eq!(device.hostname.as_deref(), Some("ws-042"));
        assert_eq!(device.os.as_deref(), Some("Windows 10"));
        assert_eq!(device.online, Some(true));
        assert_eq!(device.properties.get("segment_path").map(String::as_str), Some("/Corp/HQ"));
        assert_eq!(
            device.properties.get("open_ports").map(String::as_str),
            Some("443/TCP,22/TCP")
        );
        assert!(!device.properties.contains_key("va_os"));
    }

    #[test]
    fn test_device_prefers_nbthost() {
        let details = json!({"host": {"fields": {
            "nbthost": {"value": "NB-HOST"},
            "dhcp_hostname": {"value": "dhcp-host"},
        }}});
        let device = device_from_details(&json!({"hostId": "7", "ip": "10.0.0.7"}), &details);
        assert_eq!(device.hostname.as_deref(), Some("NB-HOST"));
        assert_eq!(device.id, "7");
        assert_eq!(device.ip.as_deref(), Some("10.0.0.7"));
        assert!(device.properties.contains_key("dhcp_hostname"));
    }
}
