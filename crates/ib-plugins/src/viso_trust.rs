//! VISO TRUST plugin.
//!
//! Reads third-party relationships as [`ApplicationRecord`]s and creates
//! relationships for applications that do not exist yet.

use crate::http::{ApiHelper, ApiRequest, HelperConfig, HostSettings, StatusMessages};
use crate::secure_string::SecureString;
use crate::traits::{
    Action, ActionField, ApplicationRecord, Plugin, PluginError, PluginResult, PullCheckpoint,
    PullPage, PushResult, RecordSource, ValidationResult,
};
use crate::validators::is_valid_email;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{error, info, warn};

pub const PLATFORM_NAME: &str = "VISO TRUST";
pub const PLUGIN_NAME: &str = "VISO TRUST";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MODULE_NAME: &str = "ARE";

pub const DEFAULT_BASE_URL: &str = "https://app.visotrust.com";
pub const CREATE_RELATIONSHIP: &str = "create_relationship";

/// VISO TRUST plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisoTrustConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: SecureString,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for VisoTrustConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: SecureString::default(),
        }
    }
}

impl VisoTrustConfig {
    pub fn from_value(value: &Value) -> PluginResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            PluginError::Configuration(format!(
                "Invalid VISO TRUST configuration provided. Error: {}",
                e
            ))
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }

    pub fn validate_static(&self) -> PluginResult<()> {
        let base_url = self.base_url();
        if base_url.is_empty() {
            return Err(PluginError::Validation(
                "Base URL is a required configuration parameter.".to_string(),
            ));
        }
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(PluginError::Validation(
                "Invalid Base URL provided in the configuration parameters.".to_string(),
            ));
        }
        if self.api_token.is_empty() {
            return Err(PluginError::Validation(
                "API Token is a required configuration parameter.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Removes zero-width spaces from every string in a JSON document.
pub fn clean_strings(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace('\u{200b}', "")),
        Value::Array(items) => Value::Array(items.into_iter().map(clean_strings).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, clean_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Maps a relationship returned by the API to an application record.
pub fn application_from_relationship(value: &Value) -> Option<ApplicationRecord> {
    let name = string_field(value, &["name"])?;
    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| match t {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => string_field(t, &["name"]),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let business_owner = string_field(value, &["businessOwnerEmail"]).or_else(|| {
        value
            .get("businessOwner")
            .and_then(|owner| string_field(owner, &["email"]))
    });

    Some(ApplicationRecord {
        id: string_field(value, &["id"]).unwrap_or_default(),
        name,
        homepage: string_field(value, &["homepage", "domain"]),
        vendor: string_field(value, &["vendorName", "vendor"]),
        tags,
        risk_level: string_field(value, &["residualRisk", "riskLevel", "inherentRisk"]),
        business_owner,
    })
}

/// Request body for `POST /api/v1/relationships/create`.
pub fn relationship_body(app: &ApplicationRecord, owner_email: Option<&str>) -> Value {
    let mut body = json!({"name": app.name});
    if let Some(map) = body.as_object_mut() {
        if let Some(homepage) = &app.homepage {
            map.insert("homepage".into(), json!(homepage));
        }
        if !app.tags.is_empty() {
            map.insert("tags".into(), json!(app.tags));
        }
        if let Some(email) = owner_email.or(app.business_owner.as_deref()) {
            map.insert("businessOwnerEmail".into(), json!(email));
        }
    }
    body
}

/// The VISO TRUST plugin.
pub struct VisoTrustPlugin {
    name: String,
    config: VisoTrustConfig,
    helper: ApiHelper,
}

impl VisoTrustPlugin {
    pub fn new(
        name: impl Into<String>,
        config: VisoTrustConfig,
        settings: HostSettings,
    ) -> PluginResult<Self> {
        let name = name.into();
        let helper = ApiHelper::new(HelperConfig {
            platform_name: PLATFORM_NAME.to_string(),
            plugin_name: PLUGIN_NAME.to_string(),
            plugin_version: PLUGIN_VERSION.to_string(),
            module: MODULE_NAME.to_string(),
            log_prefix: format!("{} {} [{}]", MODULE_NAME, PLUGIN_NAME, name),
            settings,
            messages: StatusMessages::new(
                "Verify API Token provided in the configuration parameters.",
                "Verify Base URL provided in the configuration parameters.",
            ),
        })?;

        info!("VISO TRUST plugin initialized");

        Ok(Self {
            name,
            config,
            helper,
        })
    }

    fn prefix(&self) -> &str {
        self.helper.log_prefix()
    }

    fn request(&self, request: ApiRequest) -> ApiRequest {
        let mut request = request
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_token.trimmed().expose_secret()),
            )
            .header("Accept", "application/json");
        if let Some(body) = request.json.take() {
            request.json = Some(clean_strings(body));
        }
        request
    }

    async fn relationships(&self, is_validation: bool) -> PluginResult<Vec<Value>> {
        let request = self.request(
            ApiRequest::get(
                format!("{}/api/v1/relationships", self.config.base_url()),
                format!("fetching relationships from {}", PLATFORM_NAME),
            )
            .validation(is_validation),
        );
        let response = self.helper.send(&request).await?;
        Ok(match response {
            Value::Array(items) => items,
            other => other
                .get("relationships")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Fetches all relationships as application records.
    pub async fn fetch_applications(&self) -> PluginResult<Vec<ApplicationRecord>> {
        let raw = self.relationships(false).await?;
        let total = raw.len();
        let apps: Vec<ApplicationRecord> =
            raw.iter().filter_map(application_from_relationship).collect();
        info!(
            "{}: Successfully fetched {} application(s) and skipped {} from {}.",
            self.prefix(),
            apps.len(),
            total - apps.len(),
            PLATFORM_NAME
        );
        Ok(apps)
    }

    /// Creates a relationship for every application not yet on VISO TRUST.
    pub async fn push_applications(
        &self,
        apps: &[ApplicationRecord],
        action: &Action,
    ) -> PluginResult<PushResult> {
        if action.value != CREATE_RELATIONSHIP {
            let message = "Invalid action parameter selected. Allowed value is Create Relationship.";
            error!("{}: {}", self.prefix(), message);
            return Err(PluginError::Validation(message.to_string()));
        }
        let owner_email = action
            .string_parameter("business_owner_email")
            .map(str::trim)
            .filter(|e| !e.is_empty());

        let mut existing: HashSet<String> = self
            .fetch_applications()
            .await?
            .into_iter()
            .map(|app| app.name.to_lowercase())
            .collect();

        let (mut created, mut skipped, mut failed) = (0usize, 0usize, 0usize);
        for app in apps {
            let key = app.name.to_lowercase();
            if app.name.trim().is_empty() || existing.contains(&key) {
                skipped += 1;
                continue;
            }
            let request = self.request(
                ApiRequest::post(
                    format!("{}/api/v1/relationships/create", self.config.base_url()),
                    format!("creating relationship '{}' on {}", app.name, PLATFORM_NAME),
                )
                .json(relationship_body(app, owner_email)),
            );
            match self.helper.send(&request).await {
                Ok(_) => {
                    created += 1;
                    existing.insert(key);
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        details = %e,
                        "{}: Unable to create relationship '{}' on {}.",
                        self.prefix(),
                        app.name,
                        PLATFORM_NAME
                    );
                }
            }
        }

        let message = format!(
            "Successfully created {} relationship(s), skipped {} existing relationship(s) \
             and failed to create {} relationship(s) on {}.",
            created, skipped, failed, PLATFORM_NAME
        );
        info!("{}: {}", self.prefix(), message);
        Ok(PushResult {
            success: true,
            message,
            pushed: created,
            failed,
        })
    }
}

#[async_trait]
impl Plugin for VisoTrustPlugin {
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
        match self.relationships(true).await {
            Ok(_) => ValidationResult::ok("Validation successful."),
            Err(e) => ValidationResult::fail(e.to_string()),
        }
    }

    fn get_actions(&self) -> Vec<Action> {
        vec![Action::new("Create Relationship", CREATE_RELATIONSHIP)]
    }

    fn validate_action(&self, action: &Action) -> ValidationResult {
        if action.value != CREATE_RELATIONSHIP {
            return ValidationResult::fail("Unsupported action provided.");
        }
        match action.parameters.get("business_owner_email") {
            None | Some(Value::Null) => {}
            Some(Value::String(email)) if email.trim().is_empty() => {}
            Some(Value::String(email)) if is_valid_email(email.trim()) => {}
            Some(_) => {
                let message = "Invalid Business Owner Email provided in action parameters.";
                error!("{}: {}", self.prefix(), message);
                return ValidationResult::fail(message);
            }
        }
        ValidationResult::ok("Validation successful.")
    }

    fn get_action_fields(&self, action: &Action) -> Vec<ActionField> {
        if action.value != CREATE_RELATIONSHIP {
            return Vec::new();
        }
        vec![ActionField {
            label: "Business Owner Email".to_string(),
            key: "business_owner_email".to_string(),
            field_type: "text".to_string(),
            mandatory: false,
            default: json!(""),
            choices: Vec::new(),
            description: "Email address of the business owner of the created relationships."
                .to_string(),
        }]
    }
}

#[async_trait]
impl RecordSource for VisoTrustPlugin {
    type Record = ApplicationRecord;

    async fn pull_page(
        &self,
        _checkpoint: &PullCheckpoint,
    ) -> PluginResult<PullPage<ApplicationRecord>> {
        Ok(PullPage {
            records: self.fetch_applications().await?,
            next: None,
        })
    }
}
