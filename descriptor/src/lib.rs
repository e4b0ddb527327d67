//! Widget type descriptors and the configuration a placed widget is rendered with.
//!
//! Everything in here is plain data deserialized from the backend (widget types) or
//! from the dashboard persistence layer (widget configuration). Documents use the
//! backend's camelCase field names.

mod config;
mod error;
mod names;
mod timewindow;

use std::{collections::BTreeMap, sync::Arc};

pub use config::{
    ActionDescriptor, ActionType, DataKey, Datasource, EntityRef, WidgetConfig,
};
pub use error::Error;
pub use names::{Fqn, InstanceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
pub use timewindow::{Aggregation, HistoryWindow, RealtimeWindow, Timewindow};

pub const DEFAULT_SIZE_X: u32 = 8;
pub const DEFAULT_SIZE_Y: u32 = 6;

/// A widget type as served by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetType {
    pub fqn: Fqn,
    pub name: String,
    pub descriptor: Descriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl WidgetType {
    /// Parse a widget type document, reporting the JSON path of the first mismatch.
    pub fn parse(source: &str) -> Result<Self, Error> {
        let mut deserializer = serde_json::Deserializer::from_str(source);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|err| Error::Parse {
            path: path_or_root(err.path().to_string()),
            message: err.into_inner().to_string(),
        })
    }

    /// Parse a document holding either a single widget type or an array of them.
    pub fn parse_many(source: &str) -> Result<Vec<Self>, Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<WidgetType>),
            One(Box<WidgetType>),
        }

        let mut deserializer = serde_json::Deserializer::from_str(source);
        let parsed: OneOrMany = serde_path_to_error::deserialize(&mut deserializer).map_err(
            |err| Error::Parse {
                path: path_or_root(err.path().to_string()),
                message: err.into_inner().to_string(),
            },
        )?;
        Ok(match parsed {
            OneOrMany::Many(types) => types,
            OneOrMany::One(one) => vec![*one],
        })
    }

    /// The `defaultConfig` string decoded into a JSON object.
    pub fn default_config(&self) -> Result<Map<String, Value>, Error> {
        let raw = self.descriptor.default_config.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::InvalidDefaultConfig {
                fqn: self.fqn.to_string(),
                message: format!("expected an object, found {}", json_kind(&other)),
            }),
            Err(err) => Err(Error::InvalidDefaultConfig {
                fqn: self.fqn.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

fn path_or_root(path: String) -> String {
    if path.is_empty() || path == "." {
        "<root>".to_string()
    } else {
        path
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(rename = "type", default)]
    pub kind: SemanticType,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub template_html: String,
    #[serde(default)]
    pub template_css: String,
    #[serde(default)]
    pub controller_script: ControllerScript,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings_form: Vec<FormProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_key_settings_form: Vec<FormProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub latest_data_key_settings_form: Vec<FormProperty>,
    #[serde(default = "default_config_text")]
    pub default_config: String,
    #[serde(default = "default_size_x")]
    pub size_x: u32,
    #[serde(default = "default_size_y")]
    pub size_y: u32,
}

fn default_config_text() -> String {
    "{}".to_string()
}

fn default_size_x() -> u32 {
    DEFAULT_SIZE_X
}

fn default_size_y() -> u32 {
    DEFAULT_SIZE_Y
}

/// What kind of data a widget consumes; decides the subscription's fetch path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    #[default]
    Timeseries,
    Latest,
    Rpc,
    Alarm,
    Static,
}

impl SemanticType {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::Timeseries => "timeseries",
            SemanticType::Latest => "latest",
            SemanticType::Rpc => "rpc",
            SemanticType::Alarm => "alarm",
            SemanticType::Static => "static",
        }
    }

    /// Whether placing a widget of this type should open a data subscription.
    pub fn consumes_data(self) -> bool {
        matches!(
            self,
            SemanticType::Timeseries | SemanticType::Latest | SemanticType::Alarm
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub url: String,
    #[serde(default)]
    pub is_module: bool,
}

impl Resource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_module: false,
        }
    }

    pub fn module(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_module: true,
        }
    }

    pub fn is_stylesheet(&self) -> bool {
        !self.is_module && self.url.ends_with(".css")
    }
}

/// Controller source: either plain script text or a body with named module imports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControllerScript {
    Text(String),
    Structured {
        #[serde(default)]
        body: String,
        /// Alias bound in the controller scope -> module resource URL.
        #[serde(default)]
        modules: BTreeMap<String, String>,
    },
}

impl Default for ControllerScript {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ControllerScript {
    pub fn body(&self) -> &str {
        match self {
            Self::Text(body) | Self::Structured { body, .. } => body,
        }
    }

    pub fn modules(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Text(_) => None,
            Self::Structured { modules, .. } => Some(modules),
        }
    }
}

/// One entry of a settings-form schema. Only the fields the runtime reads are
/// typed; editor-only fields are preserved in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormProperty {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<FormProperty>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Collect the `default` value of every form property (fieldsets nest under their id).
pub fn form_defaults(form: &[FormProperty]) -> Map<String, Value> {
    let mut out = Map::new();
    for property in form {
        if !property.properties.is_empty() {
            out.insert(
                property.id.clone(),
                Value::Object(form_defaults(&property.properties)),
            );
        } else if let Some(default) = &property.default {
            out.insert(property.id.clone(), default.clone());
        }
    }
    out
}

pub type SharedWidgetType = Arc<WidgetType>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_applies_descriptor_defaults() {
        let wt = WidgetType::parse(
            r#"{ "fqn": "cards.value", "name": "Value", "descriptor": {} }"#,
        )
        .unwrap();
        assert_eq!(wt.descriptor.kind, SemanticType::Timeseries);
        assert_eq!(wt.descriptor.size_x, DEFAULT_SIZE_X);
        assert_eq!(wt.descriptor.size_y, DEFAULT_SIZE_Y);
        assert_eq!(wt.descriptor.controller_script.body(), "");
        assert!(wt.default_config().unwrap().is_empty());
    }

    #[test]
    fn parse_reports_failing_path() {
        let err = WidgetType::parse(
            r#"{ "fqn": "cards.value", "name": "Value", "descriptor": { "sizeX": "wide" } }"#,
        )
        .unwrap_err();
        let Error::Parse { path, .. } = err else {
            panic!("expected parse error");
        };
        assert_eq!(path, "descriptor.sizeX");
    }

    #[test]
    fn structured_controller_script_keeps_modules() {
        let wt = WidgetType::parse(
            r#"{
              "fqn": "charts.line",
              "name": "Line",
              "descriptor": {
                "type": "latest",
                "controllerScript": { "body": "self.x = fmt.x;", "modules": { "fmt": "/m/fmt.js" } }
              }
            }"#,
        )
        .unwrap();
        let script = &wt.descriptor.controller_script;
        assert_eq!(script.body(), "self.x = fmt.x;");
        assert_eq!(
            script.modules().unwrap().get("fmt").map(String::as_str),
            Some("/m/fmt.js")
        );
        assert_eq!(wt.descriptor.kind, SemanticType::Latest);
    }

    #[test]
    fn default_config_must_be_an_object() {
        let mut wt = WidgetType::parse(
            r#"{ "fqn": "a.b", "name": "B", "descriptor": { "defaultConfig": "[1]" } }"#,
        )
        .unwrap();
        assert!(matches!(
            wt.default_config(),
            Err(Error::InvalidDefaultConfig { .. })
        ));
        wt.descriptor.default_config = r#"{"settings":{"title":"x"}}"#.to_string();
        assert_eq!(
            Value::Object(wt.default_config().unwrap()),
            json!({ "settings": { "title": "x" } })
        );
    }

    #[test]
    fn parse_many_accepts_single_document() {
        let one = WidgetType::parse_many(r#"{ "fqn": "a.b", "name": "B", "descriptor": {} }"#)
            .unwrap();
        assert_eq!(one.len(), 1);
        let many = WidgetType::parse_many(
            r#"[{ "fqn": "a.b", "name": "B", "descriptor": {} },
                { "fqn": "a.c", "name": "C", "descriptor": {} }]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
    }

    #[test]
    fn form_defaults_nest_fieldsets() {
        let form: Vec<FormProperty> = serde_json::from_value(json!([
            { "id": "title", "name": "Title", "type": "text", "default": "Temp" },
            { "id": "font", "name": "Font", "type": "fieldset", "properties": [
                { "id": "size", "name": "Size", "type": "number", "default": 12 }
            ] },
            { "id": "units", "name": "Units", "type": "units" }
        ]))
        .unwrap();
        assert_eq!(
            Value::Object(form_defaults(&form)),
            json!({ "title": "Temp", "font": { "size": 12 } })
        );
    }
}
