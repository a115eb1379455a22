//! MISP REST client.

use super::constants::PLATFORM_NAME;
use super::types::MispAttribute;
use crate::http::{ApiHelper, ApiRequest};
use crate::secure_string::SecureString;
use crate::traits::{PluginError, PluginResult};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::{debug, error, info};

fn deleted_count_regex() -> Option<&'static Regex> {
    static DELETED: OnceLock<Option<Regex>> = OnceLock::new();
    DELETED
        .get_or_init(|| Regex::new(r"(\d+) attributes deleted").ok())
        .as_ref()
}

/// Number of deleted attributes reported in a partial-failure message.
pub fn parse_deleted_count(errors: &str) -> usize {
    deleted_count_regex()
        .and_then(|re| re.captures(errors))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Thin wrapper over [`ApiHelper`] for the MISP endpoints.
#[derive(Debug, Clone)]
pub struct MispClient {
    helper: ApiHelper,
    base_url: String,
    api_key: SecureString,
}

impl MispClient {
    pub fn new(helper: ApiHelper, base_url: impl Into<String>, api_key: SecureString) -> Self {
        Self {
            helper,
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn helper(&self) -> &ApiHelper {
        &self.helper
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a client logging under a different prefix.
    pub fn with_log_prefix(&self, log_prefix: impl Into<String>) -> Self {
        Self {
            helper: self.helper.with_log_prefix(log_prefix),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
        }
    }

    fn prefix(&self) -> &str {
        self.helper.log_prefix()
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                self.api_key.expose_secret().to_string(),
            ),
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    fn post(&self, path: &str, logger_msg: impl Into<String>) -> ApiRequest {
        ApiRequest::post(format!("{}/{}", self.base_url, path), logger_msg).headers(self.headers())
    }

    /// Runs `attributes/restSearch` and returns the raw attribute objects.
    pub async fn search_attributes(
        &self,
        body: &Value,
        logger_msg: &str,
        is_validation: bool,
    ) -> PluginResult<Vec<Value>> {
        let request = self
            .post("attributes/restSearch", logger_msg)
            .json(body.clone())
            .validation(is_validation);
        let response = self.helper.send(&request).await?;

        Ok(response
            .get("response")
            .and_then(|r| r.get("Attribute"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Decodes raw attributes, logging and dropping the ones that do not parse.
    pub fn decode_attributes(&self, raw: Vec<Value>) -> Vec<MispAttribute> {
        raw.into_iter()
            .filter_map(|value| match serde_json::from_value::<MispAttribute>(value) {
                Ok(attr) => Some(attr),
                Err(e) => {
                    error!(
                        details = %e,
                        "{}: Unable to parse attribute received from {}. \
                         This record will be skipped.",
                        self.prefix(),
                        PLATFORM_NAME
                    );
                    None
                }
            })
            .collect()
    }

    /// Looks up an event by name and returns its id.
    pub async fn event_exists(
        &self,
        event_name: &str,
        is_validation: bool,
    ) -> PluginResult<Option<String>> {
        let request = self
            .post(
                "events/restSearch",
                format!("checking existence of {} on {}", event_name, PLATFORM_NAME),
            )
            .json(json!({
                "returnFormat": "json",
                "limit": 1,
                "page": 1,
                "eventinfo": event_name,
                "metadata": true,
            }))
            .validation(is_validation);
        let response = self.helper.send(&request).await?;

        let id = response
            .get("response")
            .and_then(Value::as_array)
            .and_then(|events| events.first())
            .and_then(|event| event.get("Event"))
            .and_then(|event| event.get("id"))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Ok(id)
    }

    /// Creates an event holding the given attributes.
    pub async fn create_event(&self, event_name: &str, attributes: &[Value]) -> PluginResult<()> {
        let request = self
            .post(
                "events/add",
                format!(
                    "pushing {} indicator(s) to {}",
                    attributes.len(),
                    PLATFORM_NAME
                ),
            )
            .json(json!({"info": event_name, "Attribute": attributes}))
            .hide_data();
        self.helper.send(&request).await.map(|_| ())
    }

    /// Adds attributes to an existing event.
    pub async fn update_event(&self, event_id: &str, attributes: &[Value]) -> PluginResult<()> {
        let request = self
            .post(
                &format!("events/edit/{}", event_id),
                format!(
                    "updating {} indicator(s) to {}",
                    attributes.len(),
                    PLATFORM_NAME
                ),
            )
            .json(json!({"Attribute": attributes}))
            .hide_data();
        self.helper.send(&request).await.map(|_| ())
    }

    pub async fn tag_exists(&self, tag_name: &str) -> PluginResult<bool> {
        let request = self
            .post(
                &format!("tags/search/{}", tag_name),
                format!(
                    "checking existence of '{}' tag on {}",
                    tag_name, PLATFORM_NAME
                ),
            )
            .json(json!([]));
        let response = self.helper.send(&request).await?;

        let exists = response
            .as_array()
            .and_then(|tags| tags.first())
            .and_then(|t| t.get("Tag"))
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            == Some(tag_name);
        if exists {
            debug!(
                "{}: '{}' tag exists on {}.",
                self.prefix(),
                tag_name,
                PLATFORM_NAME
            );
        }
        Ok(exists)
    }

    pub async fn create_tag(&self, tag_name: &str, colour: &str) -> PluginResult<()> {
        let request = self
            .post(
                "tags/add",
                format!("creating '{}' tag on {}", tag_name, PLATFORM_NAME),
            )
            .json(json!({"name": tag_name, "colour": colour}));
        let response = self.helper.send(&request).await?;

        let created = response
            .get("Tag")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            == Some(tag_name);
        if created {
            info!(
                "{}: Successfully created '{}' tag on {}.",
                self.prefix(),
                tag_name,
                PLATFORM_NAME
            );
            Ok(())
        } else {
            let message = format!("Unable to create '{}' tag on {}.", tag_name, PLATFORM_NAME);
            error!(details = %response, "{}: {}", self.prefix(), message);
            Err(PluginError::Tag(message))
        }
    }

    /// Deletes attributes from an event and returns how many were deleted.
    pub async fn delete_attributes(
        &self,
        event_id: &str,
        attribute_ids: &[String],
    ) -> PluginResult<usize> {
        let event_log = format!("event with Event ID '{}'", event_id);
        let request = self
            .post(
                &format!("attributes/deleteSelected/{}", event_id),
                format!(
                    "retracting {} indicator(s) from {} from {}",
                    attribute_ids.len(),
                    event_log,
                    PLATFORM_NAME
                ),
            )
            .json(json!({"id": attribute_ids, "event_id": event_id}));
        let response = self.helper.send(&request).await?;

        if response.get("success").and_then(Value::as_bool) == Some(true) {
            info!(
                "{}: Successfully retracted {} indicator(s) from {}.",
                self.prefix(),
                attribute_ids.len(),
                event_log
            );
            return Ok(attribute_ids.len());
        }

        match response.get("errors").and_then(Value::as_str) {
            Some(errors) => {
                error!(
                    details = %format!("API response: {}", response),
                    "{}: Unable to retract all indicators from {}. API Error: {}",
                    self.prefix(),
                    event_log,
                    errors
                );
                Ok(parse_deleted_count(errors))
            }
            None => {
                error!(
                    details = %format!("API response: {}", response),
                    "{}: Unable to retract {} indicator(s) from {}.",
                    self.prefix(),
                    attribute_ids.len(),
                    event_log
                );
                Ok(0)
            }
        }
    }
}
