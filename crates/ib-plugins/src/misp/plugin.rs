//! MISP plugin: attribute pull, event push and retraction.

use super::client::MispClient;
use super::config::MispConfig;
use super::constants::{
    ATTRIBUTE_TYPES, BATCH_SIZE, CATEGORY_TAG_PREFIX, DEFAULT_IOC_TAG, IP_IOC_TYPES,
    MISP_MAX_TAG_LENGTH, MISP_TAG_COLOUR, MODULE_NAME, PLATFORM_NAME, PLUGIN_NAME,
    PLUGIN_VERSION, PULL_PAGE_SIZE, RETRACTION, SHARING_TAG_CONSTANT,
};
use super::types::{decaying_comment, MispAttribute};
use crate::http::{ApiHelper, HelperConfig, HostSettings, StatusMessages};
use crate::tags::{TagError, TagStore, DEFAULT_TAG_COLOUR};
use crate::traits::{
    Action, ActionField, FieldChoice, Indicator, IndicatorSink, IndicatorType,
    ModifiedIndicators, Plugin, PluginError, PluginResult, PullCheckpoint, PullPage,
    PushResult, RecordSource, Retractable, ValidationResult,
};
use crate::validators::{ioc_type_from_value, is_valid_ip};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builds the `attributes/restSearch` body for a time window.
pub fn build_search_query(
    config: &MispConfig,
    start: i64,
    end: i64,
    event_ids: &[String],
) -> Value {
    let mut body = json!({
        "returnFormat": "json",
        "limit": PULL_PAGE_SIZE,
        "page": 1,
        "attribute_timestamp": [start.to_string(), end.to_string()],
        "category": config.attr_category,
        "type": config.attr_type,
        "tags": config.search_tags(),
        "includeDecayScore": 1,
    });

    let Some(map) = body.as_object_mut() else {
        return body;
    };

    match config.published.as_slice() {
        [only] if only == "published" => {
            map.insert("published".into(), json!(1));
        }
        [only] if only == "unpublished" => {
            map.insert("published".into(), json!(0));
        }
        _ => {}
    }

    match config.to_ids.as_slice() {
        [only] if only == "enabled" => {
            map.insert("to_ids".into(), json!(1));
        }
        [only] if only == "disabled" => {
            map.insert("to_ids".into(), json!(0));
        }
        _ => {}
    }

    match config.enforce_warning_list.trim() {
        "yes" => {
            map.insert("enforceWarninglist".into(), json!(1));
        }
        "no" => {
            map.insert("enforceWarninglist".into(), json!(0));
        }
        _ => {}
    }

    if !event_ids.is_empty() {
        map.insert("eventid".into(), json!(event_ids));
    }

    if let Some(threshold) = config.score_threshold {
        map.insert("excludeDecayed".into(), json!(1));
        map.insert("decayingModel".into(), json!(config.decaying_model_ids()));
        map.insert("modelOverrides".into(), json!({"threshold": threshold}));
    }

    body
}

/// Maps a MISP attribute type to a host indicator type.
///
/// `ip-src` and `ip-dst` are typed by value. `domain|ip` is split by the caller.
pub fn indicator_type_for(attr_type: &str, value: &str) -> Option<IndicatorType> {
    match attr_type {
        "ip-src" | "ip-dst" => Some(ioc_type_from_value(value)),
        "md5" => Some(IndicatorType::Md5),
        "sha256" => Some(IndicatorType::Sha256),
        "domain" => Some(IndicatorType::Domain),
        "hostname" => Some(IndicatorType::Hostname),
        "url" | "ip-src|port" | "ip-dst|port" | "hostname|port" => Some(IndicatorType::Url),
        _ => None,
    }
}

/// Maps a host indicator to a MISP attribute.
pub fn indicator_to_attribute(indicator: &Indicator, ip_ioc_type: &str, tags: &[String]) -> Value {
    let attr_type = match indicator.ioc_type {
        IndicatorType::Hostname => "hostname",
        IndicatorType::Domain | IndicatorType::Fqdn => "domain",
        IndicatorType::Url | IndicatorType::Ipv4 | IndicatorType::Ipv6 => {
            if is_valid_ip(&indicator.value) {
                ip_ioc_type
            } else {
                "url"
            }
        }
        IndicatorType::Sha256 => "sha256",
        IndicatorType::Md5 => "md5",
    };
    let timestamp = |dt: &Option<DateTime<Utc>>| {
        dt.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, false))
    };

    json!({
        "type": attr_type,
        "value": indicator.value,
        "comment": indicator.comments,
        "first_seen": timestamp(&indicator.first_seen),
        "last_seen": timestamp(&indicator.last_seen),
        "Tag": tags.iter().map(|t| json!({"name": t})).collect::<Vec<_>>(),
    })
}

fn parse_seen(value: Option<&str>) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => DateTime::parse_from_rfc3339(v).map(|dt| Some(dt.with_timezone(&Utc))),
        None => Ok(None),
    }
}

fn page_of(body: &Value) -> u64 {
    body.get("page").and_then(Value::as_u64).unwrap_or(1)
}

fn limit_of(body: &Value) -> usize {
    body.get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(PULL_PAGE_SIZE) as usize
}

fn set_page(body: &mut Value, page: u64) {
    if let Some(map) = body.as_object_mut() {
        map.insert("page".into(), json!(page));
    }
}

/// Per-type counters for pull logging.
#[derive(Debug, Default)]
struct TypeCounts(HashMap<IndicatorType, usize>);

impl TypeCounts {
    fn add(&mut self, ioc_type: IndicatorType) {
        *self.0.entry(ioc_type).or_default() += 1;
    }

    fn get(&self, ioc_type: IndicatorType) -> usize {
        self.0.get(&ioc_type).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.0.values().sum()
    }

    fn summary(&self) -> String {
        format!(
            "SHA256: {}, MD5: {}, URLs: {}, Domain: {}, Hostname: {}, IPv4: {} and IPv6: {}",
            self.get(IndicatorType::Sha256),
            self.get(IndicatorType::Md5),
            self.get(IndicatorType::Url),
            self.get(IndicatorType::Domain),
            self.get(IndicatorType::Hostname),
            self.get(IndicatorType::Ipv4),
            self.get(IndicatorType::Ipv6),
        )
    }
}

/// The MISP plugin.
pub struct MispPlugin {
    name: String,
    config: MispConfig,
    client: MispClient,
    tags: Arc<dyn TagStore>,
}

impl MispPlugin {
    pub fn new(
        name: impl Into<String>,
        config: MispConfig,
        settings: HostSettings,
        tags: Arc<dyn TagStore>,
    ) -> PluginResult<Self> {
        let name = name.into();
        let log_prefix = if name.is_empty() {
            format!("{} {}", MODULE_NAME, PLUGIN_NAME)
        } else {
            format!("{} {} [{}]", MODULE_NAME, PLUGIN_NAME, name)
        };

        let helper = ApiHelper::new(HelperConfig {
            platform_name: PLATFORM_NAME.to_string(),
            plugin_name: PLUGIN_NAME.to_string(),
            plugin_version: PLUGIN_VERSION.to_string(),
            module: MODULE_NAME.to_string(),
            log_prefix,
            settings,
            messages: StatusMessages::new(
                "Verify MISP Base URL and Authentication Key provided in the \
                 configuration parameters.",
                "Verify MISP Base URL provided in the configuration parameters.",
            ),
        })?;
        let client = MispClient::new(helper, config.base_url(), config.api_key.trimmed());

        info!("MISP plugin initialized");

        Ok(Self {
            name,
            config,
            client,
            tags,
        })
    }

    pub fn config(&self) -> &MispConfig {
        &self.config
    }

    fn prefix(&self) -> &str {
        self.client.helper().log_prefix()
    }

    fn retraction_client(&self) -> MispClient {
        self.client
            .with_log_prefix(format!("{} [{}]", self.prefix(), RETRACTION))
    }

    /// Resolves the configured event names to ids, skipping unknown events.
    async fn include_event_ids(&self, client: &MispClient) -> Vec<String> {
        let mut ids = Vec::new();
        for event in self.config.include_events() {
            match client.event_exists(&event, false).await {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => warn!(
                    "{}: Event \"{}\" does not exist on {}. It will be skipped.",
                    client.helper().log_prefix(),
                    event,
                    PLATFORM_NAME
                ),
                Err(e) => warn!(
                    details = %e,
                    "{}: Unable to check the existence of {} event on {}. It will be skipped.",
                    client.helper().log_prefix(),
                    event,
                    PLATFORM_NAME
                ),
            }
        }
        ids
    }

    /// Start of the pull window for a fresh (non-resumed) pull.
    fn pull_start(
        &self,
        checkpoint: &PullCheckpoint,
        now: DateTime<Utc>,
    ) -> PluginResult<DateTime<Utc>> {
        if self.config.is_look_back() {
            let hours = self.config.look_back_hours().inspect_err(|e| {
                error!("{}: {}", self.prefix(), e);
            })?;
            let start = now - Duration::hours(hours);
            return Ok(match checkpoint.last_run_at {
                Some(last_run) if last_run < start => last_run,
                _ => start,
            });
        }

        if let Some(last_run) = checkpoint.last_run_at {
            return Ok(last_run);
        }
        let days = self.config.days.ok_or_else(|| {
            PluginError::Validation(
                "Initial Range is a required configuration parameter. \
                 When \"Incremental\" is selected as Pulling Mechanism."
                    .to_string(),
            )
        })?;
        info!(
            "{}: This is initial data fetch since checkpoint is empty. \
             Querying indicators for last {} days.",
            self.prefix(),
            days
        );
        Ok(now - Duration::days(days))
    }

    fn latest_tag(&self) -> String {
        format!("{} Latest", self.name)
    }

    /// Creates a host tag for look-back pulls when it does not exist yet.
    async fn create_marking_tag(&self, tag_name: &str) -> PluginResult<String> {
        let result = match self.tags.exists(tag_name).await {
            Ok(true) => Ok(()),
            Ok(false) => self.tags.create_tag(tag_name, DEFAULT_TAG_COLOUR).await,
            Err(e) => Err(e),
        };
        result.map(|_| tag_name.to_string()).map_err(|e| {
            let message = format!(
                "Error occurred while creating an internal tag. Error: {}",
                e
            );
            error!("{}: {}", self.prefix(), message);
            PluginError::Tag(message)
        })
    }

    /// Creates host tags for an attribute. Returns (created, skipped).
    async fn create_tags(&self, attr: &MispAttribute) -> PluginResult<(Vec<String>, Vec<String>)> {
        if !self.config.tagging_enabled() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut candidates: Vec<(String, Option<&str>)> = attr
            .tags
            .iter()
            .map(|t| (t.name.trim().to_string(), t.colour.as_deref()))
            .collect();
        if let Some(category) = attr.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            candidates.push((format!("{}{}", CATEGORY_TAG_PREFIX, category), None));
        }

        let mut created = Vec::new();
        let mut skipped = Vec::new();
        for (name, colour) in candidates {
            let result = match self.tags.exists(&name).await {
                Ok(true) => Ok(()),
                Ok(false) => {
                    self.tags
                        .create_tag(&name, colour.unwrap_or(DEFAULT_TAG_COLOUR))
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => created.push(name),
                Err(TagError::TooLong(_)) | Err(TagError::Empty) => skipped.push(name),
                Err(e @ TagError::Store(_)) => return Err(PluginError::Tag(e.to_string())),
            }
        }
        Ok((created, skipped))
    }

    /// Converts one attribute into indicators.
    fn to_indicators(
        &self,
        attr: &MispAttribute,
        tags: &[String],
    ) -> Result<Vec<Indicator>, chrono::ParseError> {
        let comment = decaying_comment(&attr.decay_score, attr.comment.as_deref().unwrap_or(""));
        let first_seen = parse_seen(attr.first_seen.as_deref())?;
        let last_seen = parse_seen(attr.last_seen.as_deref())?;
        let deep_link = attr
            .event_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("{}/events/view/{}", self.client.base_url(), id));

        let typed: Vec<(String, IndicatorType)> = if attr.attr_type() == "domain|ip" {
            attr.values()
                .into_iter()
                .map(|v| (v.to_string(), ioc_type_from_value(v)))
                .collect()
        } else {
            indicator_type_for(attr.attr_type(), attr.value())
                .map(|t| vec![(attr.value().to_string(), t)])
                .unwrap_or_default()
        };

        Ok(typed
            .into_iter()
            .map(|(value, ioc_type)| Indicator {
                first_seen,
                last_seen,
                comments: comment.clone(),
                tags: tags.to_vec(),
                extended_information: deep_link.clone(),
                ..Indicator::new(value, ioc_type)
            })
            .collect())
    }

    /// Values present on MISP for one page, for the modified-indicators check.
    fn page_values(&self, attributes: &[MispAttribute], excluded: &[String]) -> HashSet<String> {
        attributes
            .iter()
            .filter(|attr| !attr.in_events(excluded))
            .filter(|attr| ATTRIBUTE_TYPES.contains(&attr.attr_type()))
            .flat_map(|attr| attr.values().into_iter().map(str::to_string))
            .collect()
    }

    /// Makes sure the sharing tags exist on MISP and returns their names.
    async fn ensure_sharing_tags(&self, source_label: Option<&str>) -> PluginResult<Vec<String>> {
        let mut tags = vec![DEFAULT_IOC_TAG.to_string()];
        if let Some(source) = source_label {
            let source_tag = format!("{} | {}", SHARING_TAG_CONSTANT, source);
            if source_tag.chars().count() <= MISP_MAX_TAG_LENGTH {
                tags.push(source_tag);
            } else {
                info!(
                    "{}: Skipped adding source label tag {} to IoCs as it exceeds \
                     MISP's {} character tag limit.",
                    self.prefix(),
                    source_tag,
                    MISP_MAX_TAG_LENGTH
                );
            }
        }

        for tag in &tags {
            if !self.client.tag_exists(tag).await? {
                self.client.create_tag(tag, MISP_TAG_COLOUR).await?;
            }
        }
        Ok(tags)
    }
}

#[async_trait]
impl Plugin for MispPlugin {
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

        let probe = json!({"returnFormat": "json", "limit": 1, "page": 1});
        if let Err(e) = self
            .client
            .search_attributes(
                &probe,
                &format!("validating authentication with {}", PLATFORM_NAME),
                true,
            )
            .await
        {
            return ValidationResult::fail(e.to_string());
        }

        let excluded = self.config.exclude_events();
        for event in self.config.include_events() {
            match self.client.event_exists(&event, true).await {
                Ok(Some(id)) if excluded.contains(&id) => {
                    let message = format!(
                        "{} is present in Event Names and Exclude IoCs from Event. \
                         Event Names and Exclude IoCs from Event can't contain same \
                         value of event.",
                        event
                    );
                    error!("{}: Validation error occurred. {}", self.prefix(), message);
                    return ValidationResult::fail(message);
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    let message = format!("Event \"{}\" does not exist on {}", event, PLATFORM_NAME);
                    error!("{}: Validation error occurred. {}.", self.prefix(), message);
                    return ValidationResult::fail(message);
                }
                Err(e) => {
                    let message = format!(
                        "Unable to check the existence of {} event on {}",
                        event, PLATFORM_NAME
                    );
                    error!(
                        details = %e,
                        "{}: Validation error occurred. {}",
                        self.prefix(),
                        message
                    );
                    return ValidationResult::fail(format!(
                        "{}. Check logs for more details.",
                        message
                    ));
                }
            }
        }

        ValidationResult::ok("Validation successful.")
    }

    fn get_actions(&self) -> Vec<Action> {
        vec![Action::new("Add to event", "event")]
    }

    fn validate_action(&self, action: &Action) -> ValidationResult {
        if action.value != "event" {
            return ValidationResult::fail("Unsupported action provided.");
        }

        match action.parameters.get("event_name") {
            None | Some(Value::Null) => {
                let message = "Event Name is a required action parameter.";
                error!("{}: {}", self.prefix(), message);
                return ValidationResult::fail(message);
            }
            Some(Value::String(_)) => {}
            Some(_) => {
                let message = "Invalid Event Name provided in action parameters.";
                error!("{}: {}", self.prefix(), message);
                return ValidationResult::fail(message);
            }
        }

        match action.parameters.get("ip_ioc_type") {
            None => {}
            Some(Value::String(s)) if IP_IOC_TYPES.contains(&s.as_str()) => {}
            Some(Value::String(s)) if s.is_empty() => {
                let message = "Invalid Type of IoC provided in action parameters.";
                error!("{}: {}", self.prefix(), message);
                return ValidationResult::fail(message);
            }
            Some(_) => {
                let message = "Invalid Type of IoC provided in action parameters. Valid values \
                               are Source IP (ip-src) and Destination IP (ip-dst).";
                error!("{}: {}", self.prefix(), message);
                return ValidationResult::fail(message);
            }
        }

        debug!("{}: Successfully saved Action configuration.", self.prefix());
        ValidationResult::ok("Successfully saved Action configuration.")
    }

    fn get_action_fields(&self, action: &Action) -> Vec<ActionField> {
        if action.value != "event" {
            return Vec::new();
        }
        vec![
            ActionField {
                label: "Event Name".to_string(),
                key: "event_name".to_string(),
                field_type: "text".to_string(),
                mandatory: true,
                default: json!(""),
                choices: Vec::new(),
                description: "Name of the MISP Event in which the attributes/indicators \
                              are to be pushed."
                    .to_string(),
            },
            ActionField {
                label: "Type of IPv4 or IPv6 IoC to be shared".to_string(),
                key: "ip_ioc_type".to_string(),
                field_type: "choice".to_string(),
                mandatory: true,
                default: json!("ip-src"),
                choices: vec![
                    FieldChoice {
                        key: "Source IP (ip-src)".to_string(),
                        value: "ip-src".to_string(),
                    },
                    FieldChoice {
                        key: "Destination IP (ip-dst)".to_string(),
                        value: "ip-dst".to_string(),
                    },
                ],
                description: "Select the IoC type to which IPv4 or IPv6 addresses \
                              should be shared."
                    .to_string(),
            },
        ]
    }
}

#[async_trait]
impl RecordSource for MispPlugin {
    type Record = Indicator;

    async fn pull_page(&self, checkpoint: &PullCheckpoint) -> PluginResult<PullPage<Indicator>> {
        let prefix = self.prefix();
        let latest_tag = self.latest_tag();
        let look_back = self.config.is_look_back();

        let mut body = match &checkpoint.sub_checkpoint {
            Some(saved) => {
                info!(
                    "{}: Resuming the pull from page {}.",
                    prefix,
                    page_of(saved)
                );
                saved.clone()
            }
            None => {
                let now = Utc::now();
                let start = self.pull_start(checkpoint, now)?;
                info!("{}: Pulling indicators from checkpoint: {}", prefix, start);

                if look_back {
                    self.tags
                        .remove_from_source(&self.name, &latest_tag)
                        .await
                        .map_err(|e| PluginError::Tag(e.to_string()))?;
                }

                let event_ids = self.include_event_ids(&self.client).await;
                if !self.config.include_events().is_empty() && event_ids.is_empty() {
                    warn!(
                        "{}: None of the configured events exist on {}. Skipping the pull.",
                        prefix, PLATFORM_NAME
                    );
                    return Ok(PullPage {
                        records: Vec::new(),
                        next: None,
                    });
                }
                build_search_query(&self.config, start.timestamp(), now.timestamp(), &event_ids)
            }
        };

        let marking_tag = if look_back {
            Some(self.create_marking_tag(&latest_tag).await?)
        } else {
            None
        };

        let page = page_of(&body);
        let limit = limit_of(&body);
        let raw = self
            .client
            .search_attributes(
                &body,
                &format!("pulling indicators for page {} from {}", page, PLATFORM_NAME),
                false,
            )
            .await?;
        let raw_count = raw.len();
        let attributes = self.client.decode_attributes(raw);

        let excluded = self.config.exclude_events();
        let mut indicators = Vec::new();
        let mut counts = TypeCounts::default();
        let mut skipped_count = 0usize;
        let mut skipped_tags = Vec::new();

        for attr in &attributes {
            if attr.in_events(&excluded) || !ATTRIBUTE_TYPES.contains(&attr.attr_type()) {
                continue;
            }
            if attr.values().is_empty() {
                skipped_count += 1;
                continue;
            }

            let (mut tags, skipped) = self.create_tags(attr).await?;
            skipped_tags.extend(skipped);
            if let Some(tag) = &marking_tag {
                tags.push(tag.clone());
            }

            match self.to_indicators(attr, &tags) {
                Ok(converted) => {
                    for indicator in converted {
                        counts.add(indicator.ioc_type);
                        indicators.push(indicator);
                    }
                }
                Err(e) => {
                    skipped_count += 1;
                    error!(
                        details = %e,
                        "{}: Validation error occurred while creating indicator from \
                         attribute having ID {} for page {}. This record will be skipped.",
                        prefix,
                        attr.id.as_deref().unwrap_or("Unknown"),
                        page
                    );
                }
            }
        }

        if !skipped_tags.is_empty() {
            info!(
                "{}: Skipping following tag(s) in page {} because they are too long: {}",
                prefix,
                page,
                skipped_tags.join(", ")
            );
        }
        debug!(
            "{}: Successfully fetched {} indicator(s) and skipped {} indicator(s) in \
             page {} from {}. Pull Stats: {}",
            prefix,
            counts.total(),
            skipped_count,
            page,
            PLATFORM_NAME,
            counts.summary()
        );
        info!(
            "{}: Successfully fetched {} indicator(s) in page {} from {}.",
            prefix,
            counts.total(),
            page,
            PLATFORM_NAME
        );

        let next = if raw_count < limit {
            None
        } else {
            set_page(&mut body, page + 1);
            Some(body)
        };

        Ok(PullPage {
            records: indicators,
            next,
        })
    }
}

#[async_trait]
impl IndicatorSink for MispPlugin {
    async fn push(
        &self,
        indicators: &[Indicator],
        action: &Action,
        source_label: Option<&str>,
    ) -> PluginResult<PushResult> {
        let prefix = self.prefix();
        info!(
            "{}: Executing push method for \"{}\" target action.",
            prefix, action.label
        );
        if action.value != "event" {
            let message = "Invalid action parameter selected. Allowed value is Add to event.";
            error!("{}: {}", prefix, message);
            return Err(PluginError::Validation(message.to_string()));
        }
        let event_name = match action.string_parameter("event_name") {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                let message = "Event Name is a required action parameter.";
                error!("{}: {}", prefix, message);
                return Err(PluginError::Validation(message.to_string()));
            }
        };
        let ip_ioc_type = action.string_parameter("ip_ioc_type").unwrap_or("ip-src");

        let tags = self.ensure_sharing_tags(source_label).await?;
        let mut event_id = self.client.event_exists(&event_name, false).await?;

        let attributes: Vec<Value> = indicators
            .iter()
            .map(|indicator| indicator_to_attribute(indicator, ip_ioc_type, &tags))
            .collect();
        info!(
            "{}: {} indicators will be sent in batch of {} to {}.",
            prefix,
            attributes.len(),
            BATCH_SIZE,
            PLATFORM_NAME
        );

        let mut pushed = 0usize;
        let mut failed = 0usize;
        for batch in attributes.chunks(BATCH_SIZE) {
            let (result, verb, done) = match &event_id {
                Some(id) => (
                    self.client.update_event(id, batch).await,
                    "update",
                    "updated",
                ),
                None => (
                    self.client.create_event(&event_name, batch).await,
                    "push",
                    "pushed",
                ),
            };
            match result {
                Ok(()) => {
                    pushed += batch.len();
                    info!(
                        "{}: Successfully {} {} indicator(s) to {}. Total indicator(s) sent: {}",
                        prefix,
                        done,
                        batch.len(),
                        PLATFORM_NAME,
                        pushed
                    );
                }
                Err(e) => {
                    failed += batch.len();
                    error!(
                        details = %e,
                        "{}: Unable to {} {} indicator(s) to {}. Hence skipping this batch.",
                        prefix,
                        verb,
                        batch.len(),
                        PLATFORM_NAME
                    );
                }
            }
            if event_id.is_none() {
                match self.client.event_exists(&event_name, false).await {
                    Ok(id) => event_id = id,
                    Err(e) => warn!(
                        details = %e,
                        "{}: Unable to look up the \"{}\" event on {} after pushing a batch. \
                         The next batch will create the event again.",
                        prefix,
                        event_name,
                        PLATFORM_NAME
                    ),
                }
            }
        }

        let message = format!(
            "Successfully pushed/update {} indicator(s) and failed to push/update {} \
             indicator(s) to {} event.",
            pushed, failed, event_name
        );
        info!("{}: {}", prefix, message);
        Ok(PushResult {
            success: true,
            message,
            pushed,
            failed,
        })
    }
}

#[async_trait]
impl Retractable for MispPlugin {
    async fn get_modified_indicators(
        &self,
        batches: &[Vec<Indicator>],
    ) -> PluginResult<Vec<ModifiedIndicators>> {
        let client = self.retraction_client();
        let prefix = client.helper().log_prefix().to_string();

        let Some(interval) = self.config.retraction_interval() else {
            info!(
                "{}: Retraction Interval is not available for the configuration \"{}\". \
                 Skipping retraction of IoC(s) from {}.",
                prefix, self.name, PLATFORM_NAME
            );
            return Ok(vec![ModifiedIndicators {
                values: Vec::new(),
                disabled: true,
            }]);
        };

        let end = Utc::now();
        let start = if self.config.is_look_back() {
            let hours = self.config.look_back_hours().inspect_err(|e| {
                error!("{}: {}", prefix, e);
            })?;
            end - Duration::hours(hours)
        } else {
            end - Duration::days(interval)
        };
        let excluded = self.config.exclude_events();
        let event_ids = self.include_event_ids(&client).await;
        if !self.config.include_events().is_empty() && event_ids.is_empty() {
            warn!(
                "{}: None of the configured events exist on {}. No indicator will be \
                 reported as modified.",
                prefix, PLATFORM_NAME
            );
            return Ok(batches
                .iter()
                .map(|_| ModifiedIndicators::default())
                .collect());
        }

        let mut results = Vec::with_capacity(batches.len());
        for batch in batches {
            let mut remaining: HashSet<String> = batch.iter().map(|i| i.value.clone()).collect();
            info!(
                "{}: Getting modified indicators status for {} indicator(s) from {}.",
                prefix,
                remaining.len(),
                PLATFORM_NAME
            );

            let mut body =
                build_search_query(&self.config, start.timestamp(), end.timestamp(), &event_ids);
            loop {
                let page = page_of(&body);
                let raw = client
                    .search_attributes(
                        &body,
                        &format!(
                            "pulling indicators for page {} to check their existence on {}",
                            page, PLATFORM_NAME
                        ),
                        false,
                    )
                    .await?;
                let last_page = raw.len() < limit_of(&body);
                let found = self.page_values(&client.decode_attributes(raw), &excluded);
                remaining.retain(|value| !found.contains(value));
                info!(
                    "{}: Successfully fetched {} indicator(s) in page {}.",
                    prefix,
                    found.len(),
                    page
                );
                if last_page || remaining.is_empty() {
                    break;
                }
                set_page(&mut body, page + 1);
            }

            let mut values: Vec<String> = remaining.into_iter().collect();
            values.sort();
            results.push(ModifiedIndicators {
                values,
                disabled: false,
            });
        }
        Ok(results)
    }

    async fn retract_indicators(
        &self,
        batches: &[Vec<Indicator>],
        actions: &[Action],
    ) -> PluginResult<Vec<ValidationResult>> {
        let client = self.retraction_client();
        let prefix = client.helper().log_prefix().to_string();

        let Some(interval) = self.config.retraction_interval() else {
            let message = format!(
                "Retraction Interval is not available for the configuration \"{}\". \
                 Skipping retraction of IoC(s) from {}.",
                self.name, PLATFORM_NAME
            );
            info!("{}: {}", prefix, message);
            return Ok(vec![ValidationResult::disabled(message)]);
        };

        let end = Utc::now();
        let start = end - Duration::days(interval);
        info!(
            "{}: Start time for this retract indicators cycle: {}",
            prefix,
            start.timestamp()
        );

        let mut event_ids = Vec::new();
        for action in actions {
            let Some(event_name) = action.string_parameter("event_name") else {
                continue;
            };
            match client.event_exists(event_name, false).await {
                Ok(Some(id)) => event_ids.push(id),
                Ok(None) => warn!(
                    "{}: Event \"{}\" does not exist on {}. It will be skipped.",
                    prefix, event_name, PLATFORM_NAME
                ),
                Err(e) => warn!(
                    details = %e,
                    "{}: Unable to check the existence of {} event on {}. It will be skipped.",
                    prefix,
                    event_name,
                    PLATFORM_NAME
                ),
            }
        }
        if event_ids.is_empty() {
            let message = "Error occurred while getting event ids for events which are \
                           provided in sharing configurations.";
            error!("{}: {}", prefix, message);
            return Err(PluginError::Configuration(message.to_string()));
        }
        let log_event_ids = event_ids.join(", ");

        let mut results = Vec::with_capacity(batches.len());
        for batch in batches {
            let values: HashSet<&str> = batch.iter().map(|i| i.value.as_str()).collect();
            let mut by_event: BTreeMap<String, Vec<String>> = BTreeMap::new();
            let mut body = json!({
                "returnFormat": "json",
                "limit": PULL_PAGE_SIZE,
                "page": 1,
                "attribute_timestamp": [start.timestamp().to_string(), end.timestamp().to_string()],
                "eventid": event_ids,
            });

            loop {
                let page = page_of(&body);
                let raw = client
                    .search_attributes(
                        &body,
                        &format!("pulling indicators for page {} from {}", page, PLATFORM_NAME),
                        false,
                    )
                    .await?;
                let last_page = raw.len() < limit_of(&body);

                let mut page_count = 0usize;
                for attr in client.decode_attributes(raw) {
                    if !values.contains(attr.value()) {
                        continue;
                    }
                    if let (Some(event_id), Some(id)) = (attr.event_id, attr.id) {
                        by_event.entry(event_id).or_default().push(id);
                        page_count += 1;
                    }
                }
                let total: usize = by_event.values().map(Vec::len).sum();
                info!(
                    "{}: Successfully pulled {} IoC(s) from {} for page {} from Event ID(s) \
                     '{}'. Total IoCs: {}",
                    prefix, page_count, PLATFORM_NAME, page, log_event_ids, total
                );
                if last_page {
                    break;
                }
                set_page(&mut body, page + 1);
            }

            for (event_id, attribute_ids) in &by_event {
                match client.delete_attributes(event_id, attribute_ids).await {
                    Ok(count) => info!(
                        "{}: Successfully retracted {} indicator(s) for event with Event ID '{}'.",
                        prefix, count, event_id
                    ),
                    Err(e) => error!(
                        details = %e,
                        "{}: Unable to retract {} indicator(s) from event with Event ID '{}'.",
                        prefix,
                        attribute_ids.len(),
                        event_id
                    ),
                }
            }
            results.push(ValidationResult::ok("Completed execution for one batch."));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::InMemoryTagStore;
    use chrono::TimeZone;

    fn config() -> MispConfig {
        MispConfig::from_value(&json!({
            "base_url": "https://misp.example.com",
            "api_key": "misp-auth-key",
            "attr_type": ["md5", "ip-src"],
            "attr_category": ["Network activity"],
            "tags": "tlp:white",
        }))
        .unwrap()
    }

    fn plugin(config: MispConfig) -> MispPlugin {
        MispPlugin::new(
            "misp-prod",
            config,
            HostSettings::default(),
            Arc::new(InMemoryTagStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_build_search_query_defaults() {
        let body = build_search_query(&config(), 100, 200, &[]);
        assert_eq!(body["returnFormat"], "json");
        assert_eq!(body["limit"], PULL_PAGE_SIZE);
        assert_eq!(body["page"], 1);
        assert_eq!(body["attribute_timestamp"], json!(["100", "200"]));
        assert_eq!(body["tags"], json!(["!ioc-bridge", "tlp:white"]));
        assert_eq!(body["type"], json!(["md5", "ip-src"]));
        assert_eq!(body["includeDecayScore"], 1);
        assert_eq!(body["enforceWarninglist"], 0);
        assert!(body.get("published").is_none());
        assert!(body.get("eventid").is_none());
        assert!(body.get("excludeDecayed").is_none());
    }

    #[test]
    fn test_build_search_query_filters() {
        let mut config = config();
        config.published = vec!["unpublished".to_string()];
        config.to_ids = vec!["enabled".to_string(), "disabled".to_string()];
        config.score_threshold = Some(40.0);
        config.decaying_models = "2,5".to_string();

        let body = build_search_query(&config, 1, 2, &["12".to_string()]);
        assert_eq!(body["published"], 0);
        assert!(body.get("to_ids").is_none());
        assert_eq!(body["eventid"], json!(["12"]));
        assert_eq!(body["excludeDecayed"], 1);
        assert_eq!(body["decayingModel"], json!([2, 5]));
        assert_eq!(body["modelOverrides"]["threshold"], 40.0);
    }

    #[test]
    fn test_indicator_type_for() {
        assert_eq!(indicator_type_for("ip-dst", "2001:db8::1"), Some(IndicatorType::Ipv6));
        assert_eq!(indicator_type_for("ip-src", "10.0.0.1"), Some(IndicatorType::Ipv4));
        assert_eq!(
            indicator_type_for("hostname|port", "host:443"),
            Some(IndicatorType::Url)
        );
        assert_eq!(indicator_type_for("hostname", "web01"), Some(IndicatorType::Hostname));
        assert_eq!(indicator_type_for("domain|ip", "a|b"), None);
        assert_eq!(indicator_type_for("sha1", "abc"), None);
    }

    #[test]
    fn test_indicator_to_attribute() {
        let tags = vec!["ioc-bridge".to_string()];
        let mut ip = Indicator::new("203.0.113.7", IndicatorType::Url);
        ip.first_seen = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let attr = indicator_to_attribute(&ip, "ip-dst", &tags);
        assert_eq!(attr["type"], "ip-dst");
        assert_eq!(attr["first_seen"], "2024-03-01T12:00:00.000000+00:00");
        assert!(attr["last_seen"].is_null());
        assert_eq!(attr["Tag"], json!([{"name": "ioc-bridge"}]));

        let url = Indicator::new("https://evil.example.com/x", IndicatorType::Url);
        assert_eq!(indicator_to_attribute(&url, "ip-src", &tags)["type"], "url");

        let fqdn = Indicator::new("evil.example.com", IndicatorType::Fqdn);
        assert_eq!(indicator_to_attribute(&fqdn, "ip-src", &tags)["type"], "domain");

        let hash = Indicator::new("d41d8cd98f00b204e9800998ecf8427e", IndicatorType::Md5);
        assert_eq!(indicator_to_attribute(&hash, "ip-src", &tags)["type"], "md5");
    }

    #[tokio::test]
    async fn test_to_indicators_splits_domain_ip() {
        let plugin = plugin(config());
        let attr: MispAttribute = serde_json::from_value(json!({
            "id": "9",
            "event_id": "4",
            "type": "domain|ip",
            "value": "evil.example.com|198.51.100.2",
            "comment": "c2",
            "first_seen": "2024-01-02T03:04:05.000000+00:00",
        }))
        .unwrap();

        let indicators = plugin.to_indicators(&attr, &["t".to_string()]).unwrap();
        assert_eq!(indicators.len(), 2);
        assert_eq!(indicators[0].ioc_type, IndicatorType::Domain);
        assert_eq!(indicators[1].ioc_type, IndicatorType::Ipv4);
        assert_eq!(
            indicators[0].extended_information.as_deref(),
            Some("https://misp.example.com/events/view/4")
        );
        assert_eq!(indicators[1].tags, vec!["t".to_string()]);
        assert!(indicators[0].first_seen.is_some());
    }

    #[tokio::test]
    async fn test_to_indicators_rejects_bad_timestamp() {
        let plugin = plugin(config());
        let attr: MispAttribute = serde_json::from_value(json!({
            "type": "md5",
            "value": "d41d8cd98f00b204e9800998ecf8427e",
            "last_seen": "yesterday",
        }))
        .unwrap();
        assert!(plugin.to_indicators(&attr, &[]).is_err());
    }

    #[tokio::test]
    async fn test_create_tags_includes_category() {
        let store = Arc::new(InMemoryTagStore::new());
        let plugin = MispPlugin::new("misp-prod", config(), HostSettings::default(), store.clone())
            .unwrap();
        let attr: MispAttribute = serde_json::from_value(json!({
            "type": "md5",
            "value": "x",
            "category": "Payload delivery",
            "Tag": [
                {"name": "tlp:amber", "colour": "#FFC000"},
                {"name": "x".repeat(60)},
            ],
        }))
        .unwrap();

        let (created, skipped) = plugin.create_tags(&attr).await.unwrap();
        assert_eq!(
            created,
            vec!["tlp:amber".to_string(), "MISPCATEGORY-Payload delivery".to_string()]
        );
        assert_eq!(skipped.len(), 1);
        assert_eq!(store.colour_of("tlp:amber").await.as_deref(), Some("#FFC000"));
        assert_eq!(
            store.colour_of("MISPCATEGORY-Payload delivery").await.as_deref(),
            Some(DEFAULT_TAG_COLOUR)
        );
    }

    #[tokio::test]
    async fn test_create_tags_disabled() {
        let mut config = config();
        config.enable_tagging = "no".to_string();
        let plugin = plugin(config);
        let attr: MispAttribute =
            serde_json::from_value(json!({"type": "md5", "value": "x", "category": "Other"}))
                .unwrap();
        let (created, skipped) = plugin.create_tags(&attr).await.unwrap();
        assert!(created.is_empty() && skipped.is_empty());
    }

    #[tokio::test]
    async fn test_page_values_is_idempotent() {
        let plugin = plugin(config());
        let attributes: Vec<MispAttribute> = serde_json::from_value(json!([
            {"type": "md5", "value": "aaa", "Event": {"id": "1", "info": "Keep"}},
            {"type": "domain|ip", "value": "evil.example.com|10.0.0.1"},
            {"type": "md5", "value": "bbb", "Event": {"id": "2", "info": "Noise"}},
            {"type": "sha1", "value": "ccc"},
        ]))
        .unwrap();
        let excluded = vec!["Noise".to_string()];

        let source: HashSet<String> = ["aaa", "bbb", "ccc", "10.0.0.1", "gone"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let found = plugin.page_values(&attributes, &excluded);
        let first: HashSet<String> = source.difference(&found).cloned().collect();
        let second: HashSet<String> = first.difference(&found).cloned().collect();

        let mut expected = vec!["bbb", "ccc", "gone"];
        expected.sort();
        let mut first_sorted: Vec<&str> = first.iter().map(String::as_str).collect();
        first_sorted.sort();
        assert_eq!(first_sorted, expected);
        assert_eq!(first, second);
    }

    #[test]
    fn test_validate_action() {
        let plugin = plugin(config());
        let ok = Action::new("Add to event", "event")
            .with_parameter("event_name", json!("Shared"))
            .with_parameter("ip_ioc_type", json!("ip-dst"));
        assert!(plugin.validate_action(&ok).success);

        let unsupported = Action::new("Other", "tag");
        assert_eq!(
            plugin.validate_action(&unsupported).message,
            "Unsupported action provided."
        );

        let missing = Action::new("Add to event", "event");
        assert_eq!(
            plugin.validate_action(&missing).message,
            "Event Name is a required action parameter."
        );

        let bad_ip = Action::new("Add to event", "event")
            .with_parameter("event_name", json!("Shared"))
            .with_parameter("ip_ioc_type", json!("ip-any"));
        assert!(plugin
            .validate_action(&bad_ip)
            .message
            .contains("Source IP (ip-src)"));
    }

    #[test]
    fn test_action_fields() {
        let plugin = plugin(config());
        let fields = plugin.get_action_fields(&Action::new("Add to event", "event"));
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "event_name");
        assert_eq!(fields[1].choices.len(), 2);
        assert!(plugin.get_action_fields(&Action::new("x", "y")).is_empty());
        assert_eq!(plugin.get_actions()[0].value, "event");
    }
}
