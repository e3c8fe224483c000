//! Machine roster sources for whitelist refresh.
//!
//! The roster API answers `GET {api_base}/machines` with either a list of
//! names or a list of machine objects. Inactive machines are left out.

use crate::config::RosterConfig;
use async_trait::async_trait;
use enms_shared::error::{VoiceError, VoiceResult};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Where the current machine list comes from
#[async_trait]
pub trait RosterSupplier: Send + Sync {
    async fn fetch_machine_names(&self) -> VoiceResult<Vec<String>>;
}

/// Roster served by the EnMS analytics API
pub struct HttpRosterSupplier {
    client: reqwest::Client,
    url: String,
}

impl HttpRosterSupplier {
    pub fn new(config: &RosterConfig) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("{}/machines", config.api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl RosterSupplier for HttpRosterSupplier {
    async fn fetch_machine_names(&self) -> VoiceResult<Vec<String>> {
        debug!("Fetching roster from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VoiceError::Roster(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::Roster(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| VoiceError::Roster(format!("unreadable roster: {}", e)))?;
        parse_roster(&body)
    }
}

/// Fixed roster, for tests and for hosts that push the list themselves
pub struct StaticRosterSupplier(pub Vec<String>);

#[async_trait]
impl RosterSupplier for StaticRosterSupplier {
    async fn fetch_machine_names(&self) -> VoiceResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Names from a roster body.
///
/// Accepts a bare array or `{"machines": [...]}`. Entries are strings or
/// objects with a `name` and an optional `is_active`.
pub fn parse_roster(body: &Value) -> VoiceResult<Vec<String>> {
    let entries = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("machines") {
            Some(Value::Array(items)) => items,
            _ => return Err(VoiceError::Roster("no machines array in roster".to_string())),
        },
        _ => return Err(VoiceError::Roster("roster is not a list".to_string())),
    };

    let names = entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name.as_str()),
            Value::Object(machine) => {
                let active = machine
                    .get("is_active")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if active {
                    machine.get("name").and_then(Value::as_str)
                } else {
                    None
                }
            }
            _ => None,
        })
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_name_list() {
        let names = parse_roster(&json!(["Boiler-1", " HVAC-Main ", ""])).unwrap();
        assert_eq!(names, vec!["Boiler-1", "HVAC-Main"]);
    }

    #[test]
    fn test_objects_skip_inactive() {
        let body = json!({
            "machines": [
                {"id": "m1", "name": "Compressor-1", "is_active": true},
                {"id": "m2", "name": "Compressor-EU-1"},
                {"id": "m3", "name": "Old-Press", "is_active": false},
                {"id": "m4"}
            ]
        });
        assert_eq!(
            parse_roster(&body).unwrap(),
            vec!["Compressor-1", "Compressor-EU-1"]
        );
    }

    #[test]
    fn test_unexpected_shape_is_error() {
        assert!(parse_roster(&json!({"data": []})).is_err());
        assert!(parse_roster(&json!("Boiler-1")).is_err());
    }
}
