use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Timewindow;

/// Per-placement widget configuration, as stored by the dashboard.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub datasources: Vec<Datasource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timewindow: Option<Timewindow>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Action source id -> descriptors. Only the first descriptor of a source is dispatched.
    #[serde(default)]
    pub actions: BTreeMap<String, Vec<ActionDescriptor>>,
}

impl WidgetConfig {
    /// Fill settings missing from this configuration with `defaults`.
    pub fn with_default_settings(mut self, defaults: &Map<String, Value>) -> Self {
        for (key, value) in defaults {
            self.settings
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(rename = "type", default = "default_datasource_type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub entity_alias_id: String,
    #[serde(default)]
    pub data_keys: Vec<DataKey>,
    /// The concrete entity the alias resolved to, when the dashboard layer provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
}

fn default_datasource_type() -> String {
    "entity".to_string()
}

impl Datasource {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            kind: default_datasource_type(),
            name: name.into(),
            entity_alias_id: String::new(),
            data_keys: Vec::new(),
            entity: None,
        }
    }

    pub fn with_key(mut self, key: DataKey) -> Self {
        self.data_keys.push(key);
        self
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Comma-separated data key names, as telemetry queries expect them.
    pub fn key_list(&self) -> String {
        self.data_keys
            .iter()
            .map(|key| key.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataKey {
    pub name: String,
    #[serde(rename = "type", default = "default_key_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

fn default_key_type() -> String {
    "timeseries".to_string()
}

impl DataKey {
    pub fn timeseries(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_key_type(),
            label: None,
            color: None,
            settings: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: String,
    pub id: String,
}

/// Declarative description of what happens when an action source fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub open_in_new_tab: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_state_id: Option<String>,
    /// Type-specific fields this runtime passes through untouched (rpc method, params, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            icon: None,
            action_type: Some(action_type),
            url: None,
            open_in_new_tab: false,
            dashboard_id: None,
            dashboard_state_id: None,
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "openLink")]
    OpenLink,
    #[serde(rename = "navigate")]
    Navigate,
    #[serde(rename = "rpc")]
    Rpc,
    #[serde(rename = "updateDashboardState")]
    UpdateDashboardState,
    #[serde(rename = "custom")]
    Custom,
    #[serde(untagged)]
    Other(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn widget_config_parses_actions_and_datasources() {
        let config: WidgetConfig = serde_json::from_value(json!({
            "title": "Temperature",
            "datasources": [{
                "type": "entity",
                "name": "d1",
                "entityAliasId": "alias-1",
                "dataKeys": [{ "name": "temperature", "type": "timeseries" }]
            }],
            "timewindow": { "realtime": { "timewindowMs": 60000 } },
            "settings": { "units": "C" },
            "actions": {
                "click": [
                    { "name": "go", "actionType": "navigate", "dashboardId": "d-7" },
                    { "name": "later", "actionType": "bogus" }
                ]
            }
        }))
        .unwrap();

        assert_eq!(config.datasources[0].key_list(), "temperature");
        assert!(config.timewindow.as_ref().unwrap().is_realtime());
        let click = &config.actions["click"];
        assert_eq!(click[0].action_type, Some(ActionType::Navigate));
        assert_eq!(click[0].dashboard_id.as_deref(), Some("d-7"));
        assert_eq!(
            click[1].action_type,
            Some(ActionType::Other("bogus".to_string()))
        );
    }

    #[test]
    fn default_settings_do_not_override_explicit_values() {
        let config = WidgetConfig {
            settings: json!({ "units": "F" }).as_object().unwrap().clone(),
            ..WidgetConfig::default()
        };
        let defaults = json!({ "units": "C", "decimals": 1 });
        let merged = config.with_default_settings(defaults.as_object().unwrap());
        assert_eq!(
            Value::Object(merged.settings),
            json!({ "units": "F", "decimals": 1 })
        );
    }

    #[test]
    fn action_extra_fields_are_preserved() {
        let action: ActionDescriptor = serde_json::from_value(json!({
            "name": "reboot",
            "actionType": "rpc",
            "method": "reboot",
            "params": { "delay": 5 }
        }))
        .unwrap();
        assert_eq!(action.action_type, Some(ActionType::Rpc));
        assert_eq!(action.extra["method"], json!("reboot"));
    }
}
