//! Testing harness for plugin implementations.
//!
//! Provides fixtures shared by the unit tests and the wiremock integration
//! tests under `tests/`.

use crate::http::{HostSettings, RetryPolicy};
use crate::traits::{Indicator, IndicatorType, Severity};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Host settings for tests: retries do not sleep.
pub fn test_host_settings(max_attempts: u32) -> HostSettings {
    HostSettings {
        verify_tls: true,
        proxy: None,
        timeout_secs: 5,
        retry: RetryPolicy::immediate(max_attempts),
    }
}

/// Creates a sample indicator with a few tags.
pub fn sample_indicator(value: &str, ioc_type: IndicatorType) -> Indicator {
    Indicator {
        comments: format!("Sample indicator {}", value),
        tags: vec!["sample".to_string()],
        severity: Severity::High,
        ..Indicator::new(value, ioc_type)
    }
}

/// Creates a sample indicator with a specific last-seen time.
pub fn sample_indicator_at(
    value: &str,
    ioc_type: IndicatorType,
    last_seen: DateTime<Utc>,
) -> Indicator {
    Indicator {
        last_seen: Some(last_seen),
        ..sample_indicator(value, ioc_type)
    }
}

/// A mixed batch of indicators covering every shared attribute type.
pub fn sample_indicators() -> Vec<Indicator> {
    vec![
        sample_indicator("d41d8cd98f00b204e9800998ecf8427e", IndicatorType::Md5),
        sample_indicator(
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            IndicatorType::Sha256,
        ),
        sample_indicator("https://evil.example.com/payload", IndicatorType::Url),
        sample_indicator("203.0.113.7", IndicatorType::Ipv4),
        sample_indicator("evil.example.com", IndicatorType::Domain),
    ]
}

/// A raw MISP attribute as returned by `attributes/restSearch`.
pub fn misp_attribute(id: u64, event_id: u64, attr_type: &str, value: &str) -> Value {
    json!({
        "id": id.to_string(),
        "event_id": event_id.to_string(),
        "type": attr_type,
        "category": "Network activity",
        "value": value,
        "comment": "",
        "Event": {"id": event_id.to_string(), "info": format!("Event {}", event_id)},
        "Tag": [{"name": "tlp:green", "colour": "#33FF00"}],
    })
}

/// Wraps attributes in a `restSearch` response envelope.
pub fn misp_search_response(attributes: Vec<Value>) -> Value {
    json!({"response": {"Attribute": attributes}})
}

/// A `events/restSearch` response holding one event, or none.
pub fn misp_event_response(event_id: Option<&str>, name: &str) -> Value {
    match event_id {
        Some(id) => json!({"response": [{"Event": {"id": id, "info": name}}]}),
        None => json!({"response": []}),
    }
}
