//! Runtime options: a JSON document overlaid with `VITRINE_*` environment variables.
//!
//! An option path such as `libraries.tinycolor` maps to the variable
//! `VITRINE_LIBRARIES__TINYCOLOR`: each camelCase segment is written in
//! SCREAMING_SNAKE case and segments are joined with `__`. Values are read as JSON
//! literals when they parse as one and as plain strings otherwise, so
//! `VITRINE_SCRIPT_FUEL=5000` is a number and `VITRINE_BACKEND_URL=http://x` a string.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use vitrine_resolver::HttpBackendOptions;
use vitrine_resources::HttpFetcherOptions;
use vitrine_script::{CompileOptions, Libraries, Limits};
use vitrine_subscription::HttpTelemetryOptions;

use crate::error::Error;

pub const ENV_PREFIX: &str = "VITRINE_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RuntimeOptions {
    /// Polling period of realtime subscriptions.
    pub refresh_interval_ms: u64,
    /// Platform base URL serving widget types, telemetry and alarms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<Url>,
    /// Directory of `<fqn>.json` widget type documents. Consulted before the
    /// backend when both are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor_dir: Option<PathBuf>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub script_fuel: u64,
    pub max_call_depth: usize,
    /// Longest array a controller may build.
    pub max_array_len: usize,
    /// Longest string a controller may build, in bytes.
    pub max_string_len: usize,
    pub libraries: Libraries,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            refresh_interval_ms: 1_000,
            backend_url: None,
            descriptor_dir: None,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_body_bytes: 8 * 1024 * 1024,
            script_fuel: limits.fuel,
            max_call_depth: limits.max_call_depth,
            max_array_len: limits.max_array_len,
            max_string_len: limits.max_string_len,
            libraries: Libraries::default(),
        }
    }
}

impl RuntimeOptions {
    /// Read options from `path` (when given) and apply the `VITRINE_*` entries of `env`.
    pub fn load<I>(path: Option<&Path>, env: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut root = match path {
            Some(path) => read_document(path)?,
            None => Map::new(),
        };
        apply_env(&mut root, env)?;
        Self::from_value(Value::Object(root))
    }

    /// [`RuntimeOptions::load`] against the process environment.
    pub fn from_env(path: Option<&Path>) -> Result<Self, Error> {
        Self::load(path, std::env::vars())
    }

    pub fn from_value(value: Value) -> Result<Self, Error> {
        serde_path_to_error::deserialize(value).map_err(|err| Error::Options {
            path: err.path().to_string(),
            message: err.into_inner().to_string(),
        })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            limits: Limits {
                fuel: self.script_fuel,
                max_call_depth: self.max_call_depth,
                max_array_len: self.max_array_len,
                max_string_len: self.max_string_len,
                ..Limits::default()
            },
            libraries: self.libraries.clone(),
        }
    }

    pub fn backend_options(&self) -> HttpBackendOptions {
        HttpBackendOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn fetcher_options(&self) -> HttpFetcherOptions {
        HttpFetcherOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn telemetry_options(&self) -> HttpTelemetryOptions {
        HttpTelemetryOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_body_bytes: self.max_body_bytes,
            token: None,
        }
    }
}

fn read_document(path: &Path) -> Result<Map<String, Value>, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Options {
            path: path.display().to_string(),
            message: "options must be a JSON object".to_string(),
        }),
        Err(err) => Err(Error::Options {
            path: path.display().to_string(),
            message: err.to_string(),
        }),
    }
}

fn apply_env<I>(root: &mut Map<String, Value>, env: I) -> Result<(), Error>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut overrides: Vec<(String, String)> = env
        .into_iter()
        .filter(|(name, _)| name.starts_with(ENV_PREFIX))
        .collect();
    // Deterministic order: a parent object set by one variable is then refined by
    // the variables naming its children.
    overrides.sort();
    for (name, raw) in overrides {
        if raw.is_empty() {
            continue;
        }
        let path = env_var_to_path(&name)?;
        tracing::debug!(var = %name, %path, "runtime option from environment");
        insert_path(root, &path, parse_env_value(&raw))?;
    }
    Ok(())
}

/// `refreshIntervalMs` -> `VITRINE_REFRESH_INTERVAL_MS`.
pub fn env_var_for_path(path: &str) -> String {
    let segments: Vec<String> = path.split('.').map(screaming_snake).collect();
    format!("{ENV_PREFIX}{}", segments.join("__"))
}

/// `VITRINE_LIBRARIES__TINYCOLOR` -> `libraries.tinycolor`.
pub fn env_var_to_path(var: &str) -> Result<String, Error> {
    let rest = var.strip_prefix(ENV_PREFIX).unwrap_or_default();
    if rest.is_empty() {
        return Err(Error::Options {
            path: var.to_string(),
            message: "missing option path after the prefix".to_string(),
        });
    }
    let mut segments = Vec::new();
    for segment in rest.split("__") {
        if segment.is_empty() {
            return Err(Error::Options {
                path: var.to_string(),
                message: "empty path segment".to_string(),
            });
        }
        segments.push(camel_case(segment));
    }
    Ok(segments.join("."))
}

pub fn parse_env_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), Error> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for (idx, segment) in segments.iter().enumerate() {
        if idx == segments.len() - 1 {
            current.insert(segment.to_string(), value);
            return Ok(());
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(map) = entry else {
            return Err(Error::Options {
                path: path.to_string(),
                message: format!("parent `{segment}` is not an object"),
            });
        };
        current = map;
    }
    Ok(())
}

fn screaming_snake(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for (idx, c) in segment.chars().enumerate() {
        if c.is_ascii_uppercase() && idx > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (idx, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
        let lower = word.to_ascii_lowercase();
        if idx == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_names_round_trip_option_paths() {
        assert_eq!(
            env_var_for_path("refreshIntervalMs"),
            "VITRINE_REFRESH_INTERVAL_MS"
        );
        assert_eq!(
            env_var_for_path("libraries.tinycolor"),
            "VITRINE_LIBRARIES__TINYCOLOR"
        );
        assert_eq!(
            env_var_to_path("VITRINE_MAX_CALL_DEPTH").unwrap(),
            "maxCallDepth"
        );
        assert_eq!(
            env_var_to_path("VITRINE_LIBRARIES__JQUERY").unwrap(),
            "libraries.jquery"
        );
        assert!(env_var_to_path("VITRINE_").is_err());
        assert!(env_var_to_path("VITRINE_LIBRARIES____X").is_err());
    }

    #[test]
    fn values_are_json_literals_or_strings() {
        assert_eq!(parse_env_value("250"), json!(250));
        assert_eq!(parse_env_value("false"), json!(false));
        assert_eq!(parse_env_value("\"250\""), json!("250"));
        assert_eq!(
            parse_env_value("http://localhost:8080/"),
            json!("http://localhost:8080/")
        );
    }

    #[test]
    fn environment_overrides_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitrine.json");
        std::fs::write(
            &path,
            json!({ "refreshIntervalMs": 5000, "scriptFuel": 10, "libraries": { "moment": false } })
                .to_string(),
        )
        .unwrap();

        let options = RuntimeOptions::load(
            Some(&path),
            env(&[
                ("VITRINE_SCRIPT_FUEL", "20000"),
                ("VITRINE_LIBRARIES__JQUERY", "true"),
                ("VITRINE_BACKEND_URL", "http://localhost:8080/"),
                ("VITRINE_MAX_CALL_DEPTH", ""),
                ("VITRINE_MAX_STRING_LEN", "4096"),
                ("HOME", "/root"),
            ]),
        )
        .unwrap();

        assert_eq!(options.refresh_interval(), Duration::from_secs(5));
        assert_eq!(options.script_fuel, 20_000);
        assert_eq!(options.max_call_depth, Limits::default().max_call_depth);
        assert!(options.libraries.jquery);
        assert!(!options.libraries.moment);
        assert!(options.libraries.tinycolor);
        assert_eq!(
            options.backend_url.as_ref().map(Url::as_str),
            Some("http://localhost:8080/")
        );
        let limits = options.compile_options().limits;
        assert_eq!(limits.fuel, 20_000);
        assert_eq!(limits.max_string_len, 4_096);
        assert_eq!(limits.max_array_len, Limits::default().max_array_len);
    }

    #[test]
    fn bad_values_name_the_option() {
        let err = RuntimeOptions::load(None, env(&[("VITRINE_SCRIPT_FUEL", "lots")])).unwrap_err();
        match err {
            Error::Options { path, .. } => assert_eq!(path, "scriptFuel"),
            other => panic!("unexpected error: {other}"),
        }

        let err = RuntimeOptions::load(None, env(&[("VITRINE_NO_SUCH_OPTION", "1")])).unwrap_err();
        assert!(matches!(err, Error::Options { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeOptions::load(Some(&dir.path().join("nope.json")), env(&[])).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
