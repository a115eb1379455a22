//! MISP wire types.

use serde::{Deserialize, Deserializer};

/// Accepts a JSON string or number, since MISP returns ids as either.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Treats a JSON `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// An attribute returned by `attributes/restSearch`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MispAttribute {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub event_id: Option<String>,
    #[serde(default, rename = "type")]
    pub attr_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default, rename = "Tag", deserialize_with = "null_as_default")]
    pub tags: Vec<MispTag>,
    #[serde(default, rename = "Event")]
    pub event: Option<MispEventRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub decay_score: Vec<DecayScore>,
}

impl MispAttribute {
    pub fn value(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }

    pub fn attr_type(&self) -> &str {
        self.attr_type.as_deref().unwrap_or_default()
    }

    /// True when the attribute belongs to an event listed by name or id.
    pub fn in_events(&self, events: &[String]) -> bool {
        let Some(event) = &self.event else {
            return false;
        };
        events.iter().any(|e| {
            event.info.as_deref() == Some(e.as_str()) || event.id.as_deref() == Some(e.as_str())
        })
    }

    /// Values carried by the attribute. `domain|ip` carries two.
    pub fn values(&self) -> Vec<&str> {
        if self.attr_type() == "domain|ip" {
            self.value().split('|').filter(|v| !v.is_empty()).collect()
        } else if self.value().is_empty() {
            Vec::new()
        } else {
            vec![self.value()]
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MispTag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub colour: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MispEventRef {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecayScore {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, rename = "DecayingModel")]
    pub decaying_model: Option<DecayingModel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecayingModel {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Appends decay scores to an attribute comment.
///
/// Zero and missing scores are left out.
pub fn decaying_comment(scores: &[DecayScore], comment: &str) -> String {
    let entries: Vec<String> = scores
        .iter()
        .filter_map(|decay| {
            let score = decay.score.filter(|s| *s != 0.0)?;
            let model = decay.decaying_model.clone().unwrap_or_default();
            Some(format!(
                "Decaying Score: {:.2}, Decaying Model ID: {}, Decaying Model Name: {}",
                score,
                model.id.as_deref().unwrap_or("Unknown"),
                model.name.as_deref().unwrap_or("Unknown"),
            ))
        })
        .collect();

    match (entries.is_empty(), comment.is_empty()) {
        (true, _) => comment.to_string(),
        (false, true) => entries.join(" | "),
        (false, false) => format!("{} | {}", comment, entries.join(" | ")),
    }
}
