//! Declarative widget actions: a widget fires an action source, the first
//! descriptor configured for that source decides what the dashboard does.

mod host;

use std::{collections::BTreeMap, sync::Arc};

pub use host::{DashboardHost, HostError, LoggingHost, RpcRequest, StateUpdate};
use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;
use vitrine_descriptor::{ActionDescriptor, ActionType};

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ActionDispatchError {
    #[error("no action is configured for source `{source_id}`")]
    #[diagnostic(code(actions::unknown_source))]
    UnknownSource { source_id: String },
    #[error("action `{action}` of source `{source_id}` has no action type")]
    #[diagnostic(code(actions::missing_type))]
    MissingType { source_id: String, action: String },
    #[error("action type `{action_type}` is not supported")]
    #[diagnostic(code(actions::unsupported))]
    Unsupported { action_type: String },
    #[error("action `{action}` is missing `{field}`")]
    #[diagnostic(code(actions::missing_field))]
    MissingField {
        action: String,
        field: &'static str,
    },
    #[error("dashboard rejected action `{action}`: {source}")]
    #[diagnostic(code(actions::host))]
    Host {
        action: String,
        #[source]
        source: HostError,
    },
}

impl ActionDispatchError {
    /// Configuration gaps, as opposed to a host that failed to carry out the action.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ActionDispatchError::Host { .. })
    }
}

/// What a dispatched action asked the host to do.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatched {
    OpenLink { url: String, new_tab: bool },
    Navigate { path: String },
    Rpc(RpcRequest),
    UpdateDashboardState(StateUpdate),
}

/// The `ctx.actionsApi` of one widget instance.
#[derive(Clone)]
pub struct ActionsApi {
    descriptors: Arc<BTreeMap<String, Vec<ActionDescriptor>>>,
    host: Arc<dyn DashboardHost>,
}

/// Bind a widget's configured actions to the dashboard host.
pub fn bind(
    descriptors: BTreeMap<String, Vec<ActionDescriptor>>,
    host: Arc<dyn DashboardHost>,
) -> ActionsApi {
    ActionsApi {
        descriptors: Arc::new(descriptors),
        host,
    }
}

impl ActionsApi {
    pub fn descriptors(&self) -> &BTreeMap<String, Vec<ActionDescriptor>> {
        &self.descriptors
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn host(&self) -> &Arc<dyn DashboardHost> {
        &self.host
    }

    /// Fire `source_id`. Failures are logged and swallowed; the return value says
    /// what, if anything, was handed to the host.
    pub fn invoke(&self, source_id: &str, event: &Value, args: &[Value]) -> Option<Dispatched> {
        match self.try_invoke(source_id, event, args) {
            Ok(dispatched) => Some(dispatched),
            Err(err) if err.is_configuration() => {
                tracing::warn!(source = source_id, error = %err, "action not dispatched");
                None
            }
            Err(err) => {
                tracing::error!(source = source_id, error = %err, "action dispatch failed");
                None
            }
        }
    }

    pub fn try_invoke(
        &self,
        source_id: &str,
        event: &Value,
        args: &[Value],
    ) -> Result<Dispatched, ActionDispatchError> {
        let action = self
            .descriptors
            .get(source_id)
            .and_then(|descriptors| descriptors.first())
            .ok_or_else(|| ActionDispatchError::UnknownSource {
                source_id: source_id.to_string(),
            })?;
        let Some(action_type) = &action.action_type else {
            return Err(ActionDispatchError::MissingType {
                source_id: source_id.to_string(),
                action: action.name.clone(),
            });
        };
        let vars = action_vars(event, args);
        tracing::debug!(source = source_id, action = %action.name, "dispatching action");

        let host_error = |source| ActionDispatchError::Host {
            action: action.name.clone(),
            source,
        };
        let missing = |field| ActionDispatchError::MissingField {
            action: action.name.clone(),
            field,
        };

        match action_type {
            ActionType::OpenLink => {
                let url = action.url.as_deref().ok_or_else(|| missing("url"))?;
                let url = vitrine_template::interpolate(url, &vars);
                self.host
                    .open_link(&url, action.open_in_new_tab)
                    .map_err(host_error)?;
                Ok(Dispatched::OpenLink {
                    url,
                    new_tab: action.open_in_new_tab,
                })
            }
            ActionType::Navigate => {
                let dashboard_id = action
                    .dashboard_id
                    .as_deref()
                    .ok_or_else(|| missing("dashboardId"))?;
                let path = match &action.dashboard_state_id {
                    Some(state_id) => format!("/dashboard/{dashboard_id}?state={state_id}"),
                    None => format!("/dashboard/{dashboard_id}"),
                };
                self.host.navigate(&path).map_err(host_error)?;
                Ok(Dispatched::Navigate { path })
            }
            ActionType::Rpc => {
                let request = rpc_request(action, &vars).ok_or_else(|| missing("method"))?;
                self.host.send_rpc(&request).map_err(host_error)?;
                Ok(Dispatched::Rpc(request))
            }
            ActionType::UpdateDashboardState => {
                let update = StateUpdate {
                    state_id: action.dashboard_state_id.clone(),
                    params: vars,
                };
                self.host
                    .update_dashboard_state(&update)
                    .map_err(host_error)?;
                Ok(Dispatched::UpdateDashboardState(update))
            }
            ActionType::Custom => Err(ActionDispatchError::Unsupported {
                action_type: "custom".to_string(),
            }),
            ActionType::Other(other) => Err(ActionDispatchError::Unsupported {
                action_type: other.clone(),
            }),
        }
    }
}

/// Variables available to `${...}` placeholders. Positional arguments follow the
/// widget convention `(entityId, entityName, additionalParams, entityLabel)`; the
/// event's own fields and the additional params are merged in at the top level.
fn action_vars(event: &Value, args: &[Value]) -> Value {
    let mut vars = Map::new();
    if let Value::Object(fields) = event {
        vars.extend(fields.clone());
    }
    match args.first() {
        Some(Value::Object(entity)) => {
            if let Some(id) = entity.get("id") {
                vars.insert("entityId".to_string(), id.clone());
            }
            if let Some(kind) = entity.get("entityType") {
                vars.insert("entityType".to_string(), kind.clone());
            }
        }
        Some(id @ Value::String(_)) => {
            vars.insert("entityId".to_string(), id.clone());
        }
        _ => {}
    }
    if let Some(name) = args.get(1).filter(|v| !v.is_null()) {
        vars.insert("entityName".to_string(), name.clone());
    }
    if let Some(Value::Object(additional)) = args.get(2) {
        vars.extend(additional.clone());
    }
    if let Some(label) = args.get(3).filter(|v| !v.is_null()) {
        vars.insert("entityLabel".to_string(), label.clone());
    }
    vars.insert("event".to_string(), event.clone());
    Value::Object(vars)
}

fn rpc_request(action: &ActionDescriptor, vars: &Value) -> Option<RpcRequest> {
    let method = action.extra.get("method").and_then(Value::as_str)?;
    Some(RpcRequest {
        method: method.to_string(),
        params: action.extra.get("params").cloned().unwrap_or(Value::Null),
        one_way: action
            .extra
            .get("oneWay")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        timeout_ms: action.extra.get("timeout").and_then(Value::as_u64),
        entity_id: vars
            .get("entityId")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use parking_lot::Mutex;
    use serde_json::json;
    use vitrine_descriptor::{ActionDescriptor, ActionType};

    use super::*;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingHost {
        fn record(&self, call: String) -> Result<(), HostError> {
            self.calls.lock().push(call);
            if self.fail {
                return Err(HostError::new("dashboard is read-only"));
            }
            Ok(())
        }
    }

    impl DashboardHost for RecordingHost {
        fn open_link(&self, url: &str, new_tab: bool) -> Result<(), HostError> {
            self.record(format!("open {url} {new_tab}"))
        }

        fn navigate(&self, path: &str) -> Result<(), HostError> {
            self.record(format!("navigate {path}"))
        }

        fn send_rpc(&self, request: &RpcRequest) -> Result<(), HostError> {
            self.record(format!("rpc {}", request.method))
        }

        fn update_dashboard_state(&self, update: &StateUpdate) -> Result<(), HostError> {
            self.record(format!("state {:?}", update.state_id))
        }
    }

    fn api(
        actions: impl IntoIterator<Item = (&'static str, Vec<ActionDescriptor>)>,
        host: Arc<RecordingHost>,
    ) -> ActionsApi {
        let descriptors: BTreeMap<_, _> = actions
            .into_iter()
            .map(|(id, list)| (id.to_string(), list))
            .collect();
        bind(descriptors, host)
    }

    #[test]
    fn open_link_interpolates_entity_variables() {
        let mut action = ActionDescriptor::new("details", ActionType::OpenLink);
        action.url = Some("https://example.com/devices/${entityId}?name=${entityName}".to_string());
        action.open_in_new_tab = true;
        let host = Arc::new(RecordingHost::default());
        let api = api([("rowClick", vec![action])], Arc::clone(&host));

        let dispatched = api.invoke(
            "rowClick",
            &json!({}),
            &[json!({ "id": "dev-1", "entityType": "DEVICE" }), json!("Boiler")],
        );
        assert_eq!(
            dispatched,
            Some(Dispatched::OpenLink {
                url: "https://example.com/devices/dev-1?name=Boiler".to_string(),
                new_tab: true,
            })
        );
        assert_eq!(
            *host.calls.lock(),
            vec!["open https://example.com/devices/dev-1?name=Boiler true"]
        );
    }

    #[test]
    fn navigate_builds_dashboard_paths() {
        let mut plain = ActionDescriptor::new("go", ActionType::Navigate);
        plain.dashboard_id = Some("d-7".to_string());
        let mut stateful = plain.clone();
        stateful.dashboard_state_id = Some("details".to_string());
        let host = Arc::new(RecordingHost::default());
        let api = api(
            [("plain", vec![plain]), ("stateful", vec![stateful])],
            Arc::clone(&host),
        );

        api.invoke("plain", &Value::Null, &[]);
        api.invoke("stateful", &Value::Null, &[]);
        assert_eq!(
            *host.calls.lock(),
            vec!["navigate /dashboard/d-7", "navigate /dashboard/d-7?state=details"]
        );
    }

    #[test]
    fn first_descriptor_wins() {
        let mut first = ActionDescriptor::new("first", ActionType::Navigate);
        first.dashboard_id = Some("one".to_string());
        let mut second = ActionDescriptor::new("second", ActionType::Navigate);
        second.dashboard_id = Some("two".to_string());
        let host = Arc::new(RecordingHost::default());
        let api = api([("click", vec![first, second])], Arc::clone(&host));

        api.invoke("click", &Value::Null, &[]);
        assert_eq!(*host.calls.lock(), vec!["navigate /dashboard/one"]);
    }

    #[test]
    fn rpc_reads_method_and_params_from_extra_fields() {
        let mut action = ActionDescriptor::new("reboot", ActionType::Rpc);
        action.extra.insert("method".to_string(), json!("reboot"));
        action.extra.insert("params".to_string(), json!({ "delay": 5 }));
        action.extra.insert("oneWay".to_string(), json!(true));
        let host = Arc::new(RecordingHost::default());
        let api = api([("button", vec![action])], Arc::clone(&host));

        let Some(Dispatched::Rpc(request)) = api.invoke("button", &Value::Null, &[json!("dev-9")])
        else {
            panic!("expected an rpc dispatch");
        };
        assert_eq!(request.method, "reboot");
        assert_eq!(request.params, json!({ "delay": 5 }));
        assert!(request.one_way);
        assert_eq!(request.entity_id.as_deref(), Some("dev-9"));
    }

    #[test]
    fn unknown_and_incomplete_actions_are_no_ops() {
        let host = Arc::new(RecordingHost::default());
        let no_url = ActionDescriptor::new("broken", ActionType::OpenLink);
        let custom = ActionDescriptor::new("mine", ActionType::Custom);
        let api = api(
            [("broken", vec![no_url]), ("custom", vec![custom]), ("empty", vec![])],
            Arc::clone(&host),
        );

        assert_eq!(api.invoke("missing", &Value::Null, &[]), None);
        assert_eq!(api.invoke("empty", &Value::Null, &[]), None);
        assert_eq!(api.invoke("broken", &Value::Null, &[]), None);
        assert!(matches!(
            api.try_invoke("broken", &Value::Null, &[]),
            Err(ActionDispatchError::MissingField { field: "url", .. })
        ));
        assert!(matches!(
            api.try_invoke("custom", &Value::Null, &[]),
            Err(ActionDispatchError::Unsupported { .. })
        ));
        assert!(host.calls.lock().is_empty());
    }

    #[test]
    fn host_errors_are_swallowed() {
        let mut action = ActionDescriptor::new("state", ActionType::UpdateDashboardState);
        action.dashboard_state_id = Some("main".to_string());
        let host = Arc::new(RecordingHost {
            fail: true,
            ..RecordingHost::default()
        });
        let api = api([("click", vec![action])], Arc::clone(&host));

        assert_eq!(api.invoke("click", &Value::Null, &[]), None);
        let err = api.try_invoke("click", &Value::Null, &[]).unwrap_err();
        assert!(!err.is_configuration());
        assert_eq!(host.calls.lock().len(), 2);
    }
}
