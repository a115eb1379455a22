//! MISP plugin configuration.

use super::constants::{
    ATTRIBUTE_CATEGORIES, ATTRIBUTE_TYPES, DEFAULT_IOC_TAG, INTEGER_THRESHOLD, MAX_LOOK_BACK,
    PULLING_MECHANISMS,
};
use crate::secure_string::SecureString;
use crate::traits::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};

/// MISP plugin configuration, as stored by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MispConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: SecureString,
    /// Attribute types to pull.
    #[serde(default)]
    pub attr_type: Vec<String>,
    /// Attribute categories to pull.
    #[serde(default)]
    pub attr_category: Vec<String>,
    /// Comma-separated MISP tags to filter on.
    #[serde(default)]
    pub tags: String,
    /// Comma-separated event names to pull from.
    #[serde(default)]
    pub include_event_name: String,
    /// Comma-separated event names or ids to exclude.
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub published: Vec<String>,
    #[serde(default)]
    pub to_ids: Vec<String>,
    #[serde(default = "default_enforce_warning_list")]
    pub enforce_warning_list: String,
    /// Minimum decay score, 0-100.
    #[serde(default)]
    pub score_threshold: Option<f64>,
    /// Comma-separated decaying model ids.
    #[serde(default)]
    pub decaying_models: String,
    /// Retraction window in days. Retraction is disabled when unset.
    #[serde(default)]
    pub retraction_interval: Option<i64>,
    #[serde(default = "default_enable_tagging")]
    pub enable_tagging: String,
    #[serde(default = "default_pulling_mechanism")]
    pub pulling_mechanism: String,
    /// Look-back window in hours.
    #[serde(default = "default_look_back")]
    pub look_back: Option<i64>,
    /// Initial range in days for the first incremental pull.
    #[serde(default = "default_days")]
    pub days: Option<i64>,
}

fn default_enforce_warning_list() -> String {
    "no".to_string()
}

fn default_enable_tagging() -> String {
    "yes".to_string()
}

fn default_pulling_mechanism() -> String {
    "incremental".to_string()
}

fn default_look_back() -> Option<i64> {
    Some(24)
}

fn default_days() -> Option<i64> {
    Some(7)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

impl MispConfig {
    /// Parses a configuration map.
    pub fn from_value(value: &serde_json::Value) -> PluginResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            PluginError::Configuration(format!(
                "Invalid MISP configuration provided. Error: {}",
                e
            ))
        })
    }

    /// Base URL without surrounding whitespace and slashes.
    pub fn base_url(&self) -> String {
        self.base_url.trim().trim_matches('/').to_string()
    }

    pub fn include_events(&self) -> Vec<String> {
        split_list(&self.include_event_name)
    }

    pub fn exclude_events(&self) -> Vec<String> {
        split_list(&self.event_name)
    }

    /// Tag filter for `attributes/restSearch`. Attributes shared by this
    /// bridge are always excluded.
    pub fn search_tags(&self) -> Vec<String> {
        let mut tags = vec![format!("!{}", DEFAULT_IOC_TAG)];
        tags.extend(split_list(&self.tags));
        tags
    }

    pub fn decaying_model_ids(&self) -> Vec<i64> {
        split_list(&self.decaying_models)
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    pub fn tagging_enabled(&self) -> bool {
        self.enable_tagging.trim() == "yes"
    }

    pub fn is_look_back(&self) -> bool {
        self.pulling_mechanism == "look_back"
    }

    /// Retraction window in days, when retraction is configured.
    pub fn retraction_interval(&self) -> Option<i64> {
        self.retraction_interval.filter(|days| *days > 0)
    }

    /// Look-back window in hours, checked against its bounds.
    pub fn look_back_hours(&self) -> PluginResult<i64> {
        match self.look_back {
            None => Err(PluginError::Validation(
                "Look Back is a required configuration parameter when \
                 \"Look Back\" is selected as Pulling Mechanism."
                    .to_string(),
            )),
            Some(hours) if hours <= 0 || hours > MAX_LOOK_BACK => {
                Err(PluginError::Validation(
                    "Invalid value for Look Back provided in configuration parameters. \
                     Valid value should be an integer in range 1-8760 i.e. 1 year."
                        .to_string(),
                ))
            }
            Some(hours) => Ok(hours),
        }
    }

    /// Checks every rule that does not need the MISP server.
    pub fn validate_static(&self) -> PluginResult<()> {
        let fail = |msg: &str| Err(PluginError::Validation(msg.to_string()));

        let base_url = self.base_url();
        if base_url.is_empty() {
            return fail("MISP Base URL is a required configuration parameter.");
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return fail("Invalid MISP Base URL provided in configuration parameters.");
        }

        if self.api_key.is_empty() {
            return fail("Authentication Key is a required configuration parameter.");
        }

        if !self
            .attr_type
            .iter()
            .all(|t| ATTRIBUTE_TYPES.contains(&t.as_str()))
        {
            return fail("Invalid MISP Attribute Type provided in configuration parameters.");
        }

        if !self
            .attr_category
            .iter()
            .all(|c| ATTRIBUTE_CATEGORIES.contains(&c.as_str()))
        {
            return fail("Invalid MISP Attribute Category provided in configuration parameters.");
        }

        let include = self.include_event_name.trim();
        if !include.is_empty() {
            let excluded = self.exclude_events();
            for event in include.split(',').map(str::trim) {
                if event.is_empty() {
                    return fail("Invalid Event Name provided in configuration parameters");
                }
                if excluded.iter().any(|e| e == event) {
                    return Err(PluginError::Validation(format!(
                        "{} is present in Event Names and Exclude IoCs from Event. \
                         Event Names and Exclude IoCs from Event can't contain same value.",
                        event
                    )));
                }
            }
        }

        if !self
            .published
            .iter()
            .all(|p| p == "published" || p == "unpublished")
        {
            return fail(
                "Invalid IoC Event Type selected in configuration parameters. \
                 Allowed values are Published and Unpublished.",
            );
        }

        if let Some(threshold) = self.score_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return fail(
                    "Invalid Decaying Score Threshold provided in configuration parameters. \
                     Valid value should be an integer/float in range 0-100.",
                );
            }
        }

        let models = self.decaying_models.trim();
        if !models.is_empty() {
            for model_id in models.split(',').map(str::trim) {
                match model_id.parse::<i64>() {
                    Ok(0) => {
                        return fail(
                            "Invalid Decaying Model IDs provided in configuration parameters. \
                             Valid values should be a string containing integers separated \
                             by commas.",
                        )
                    }
                    Ok(_) => {}
                    Err(_) => {
                        return fail("Invalid Decaying Model IDs found in configuration parameters.")
                    }
                }
            }
        }

        if !self
            .to_ids
            .iter()
            .all(|t| t == "enabled" || t == "disabled")
        {
            return fail(
                "Invalid Filter on IDS flag selected in configuration parameters. \
                 Allowed values are Enabled and Disabled.",
            );
        }

        let warning_list = self.enforce_warning_list.trim();
        if !warning_list.is_empty() && warning_list != "yes" && warning_list != "no" {
            return fail(
                "Invalid Enforce Warning List IoCs selected in configuration parameters. \
                 Allowed values are Yes and No.",
            );
        }

        if let Some(days) = self.retraction_interval {
            if days != 0 && (days < 0 || days > INTEGER_THRESHOLD) {
                return fail(
                    "Invalid Retraction Interval provided in configuration parameters. \
                     Valid value should be in range 1 to 2^62.",
                );
            }
        }

        let tagging = self.enable_tagging.trim();
        if tagging.is_empty() {
            return fail("Enable Tagging is a required configuration parameter.");
        }
        if tagging != "yes" && tagging != "no" {
            return fail(
                "Invalid value provided in Enable Tagging configuration parameter. \
                 Allowed values are Yes and No.",
            );
        }

        let mechanism = self.pulling_mechanism.trim();
        if mechanism.is_empty() {
            return fail("Pulling Mechanism is a required configuration parameter.");
        }
        if !PULLING_MECHANISMS.contains(&mechanism) {
            return fail(
                "Invalid value for Pulling Mechanism provided in configuration parameter. \
                 Allowed values are Incremental and Look Back.",
            );
        }
        if mechanism == "look_back" {
            self.look_back_hours()?;
        }

        match self.days {
            None if mechanism == "incremental" => fail(
                "Initial Range is a required configuration parameter. \
                 When \"Incremental\" is selected as Pulling Mechanism.",
            ),
            Some(days) if !(0..=INTEGER_THRESHOLD).contains(&days) => fail(
                "Invalid Initial Range provided in configuration parameters. \
                 Valid value should be in range 0 to 2^62.",
            ),
            _ => Ok(()),
        }
    }
}
