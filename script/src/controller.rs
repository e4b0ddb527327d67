use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Map;
use vitrine_descriptor::{Fqn, FormProperty};

use crate::{
    error::Error,
    interp::Interpreter,
    libraries::{Libraries, inject_utilities},
    scope::Env,
    value::Value,
};

/// An action source a controller declares through `self.actionSources()`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSource {
    pub name: String,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub has_show_condition: bool,
}

/// The capability set of a compiled widget controller.
///
/// Every hook is optional: a controller that does not define one succeeds with no
/// effect. Metadata accessors never fail; a broken accessor is logged and reads as
/// empty.
pub trait Controller {
    /// Install host libraries onto `ctx` before it is attached.
    fn inject_utilities(&mut self, ctx: &Value);

    /// Expose `ctx` to the controller as `self.ctx`.
    fn attach_context(&mut self, ctx: Value);

    fn on_init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn on_data_updated(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn on_latest_data_updated(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn on_resize(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn on_edit_mode_changed(&mut self, _is_edit: bool) -> Result<(), Error> {
        Ok(())
    }

    fn on_mobile_mode_changed(&mut self, _is_mobile: bool) -> Result<(), Error> {
        Ok(())
    }

    fn on_destroy(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn action_sources(&mut self) -> BTreeMap<String, ActionSource> {
        BTreeMap::new()
    }

    fn type_parameters(&mut self) -> Map<String, serde_json::Value> {
        Map::new()
    }

    fn settings_form(&mut self) -> Vec<FormProperty> {
        Vec::new()
    }

    fn data_key_settings_form(&mut self) -> Vec<FormProperty> {
        Vec::new()
    }

    fn latest_data_key_settings_form(&mut self) -> Vec<FormProperty> {
        Vec::new()
    }

    fn use_custom_datasources(&mut self) -> bool {
        false
    }

    /// JSON view of the controller property at a dot separated `path`, used to
    /// fill markup placeholders.
    fn property(&self, _path: &str) -> Option<serde_json::Value> {
        None
    }

    /// Whether this controller is the no-op stand-in for a failed compile.
    fn is_inert(&self) -> bool {
        false
    }
}

/// Stand-in for a controller that failed to compile or run its top level.
#[derive(Debug, Default, Clone, Copy)]
pub struct InertController;

impl Controller for InertController {
    fn inject_utilities(&mut self, _ctx: &Value) {}

    fn attach_context(&mut self, _ctx: Value) {}

    fn is_inert(&self) -> bool {
        true
    }
}

/// A controller backed by a compiled script.
pub struct ScriptController {
    interp: Interpreter,
    /// The receiver the script populated (`self` / `this`).
    receiver: Value,
    /// Scopes created at compile time; closures stored in them keep them alive.
    scopes: Vec<Env>,
    fqn: Fqn,
    libraries: Libraries,
}

impl ScriptController {
    pub(crate) fn new(
        interp: Interpreter,
        receiver: Value,
        scopes: Vec<Env>,
        fqn: Fqn,
        libraries: Libraries,
    ) -> Self {
        Self {
            interp,
            receiver,
            scopes,
            fqn,
            libraries,
        }
    }

    pub fn fqn(&self) -> &Fqn {
        &self.fqn
    }

    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// Call the function stored under `name` on the receiver, if there is one.
    pub fn call_hook(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, Error> {
        let Some(hook) = self.receiver.get_own(name).filter(|v| v.as_function().is_some())
        else {
            return Ok(None);
        };
        self.interp.refuel();
        self.interp
            .call(&hook, self.receiver.clone(), args)
            .map(Some)
            .map_err(|exception| Error::from_exception(self.fqn.as_str(), exception))
    }

    /// Read a metadata member: call it when it is a function, take it as is otherwise.
    fn metadata<T: DeserializeOwned>(&mut self, name: &str) -> Option<T> {
        let value = match self.receiver.get_own(name) {
            Some(Value::Function(_)) => match self.call_hook(name, &[]) {
                Ok(value) => value?,
                Err(err) => {
                    tracing::warn!(widget = %self.fqn, member = name, error = %err, "controller metadata failed");
                    return None;
                }
            },
            Some(value) => value,
            None => return None,
        };
        let json = match value.to_json() {
            Ok(json) => json?,
            Err(err) => {
                tracing::warn!(widget = %self.fqn, member = name, error = %err, "controller metadata is not serializable");
                return None;
            }
        };
        match serde_json::from_value(json) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(widget = %self.fqn, member = name, error = %err, "controller metadata has an unexpected shape");
                None
            }
        }
    }

    fn hook(&mut self, name: &str, args: &[Value]) -> Result<(), Error> {
        self.call_hook(name, args).map(drop)
    }
}

impl Controller for ScriptController {
    fn inject_utilities(&mut self, ctx: &Value) {
        inject_utilities(&mut self.interp, ctx, &self.libraries);
    }

    fn attach_context(&mut self, ctx: Value) {
        if let Some(entry) = self.scopes.last() {
            entry.assign("ctx", ctx.clone());
        }
        self.receiver.insert("ctx", ctx);
    }

    fn on_init(&mut self) -> Result<(), Error> {
        self.hook("onInit", &[])
    }

    fn on_data_updated(&mut self) -> Result<(), Error> {
        self.hook("onDataUpdated", &[])
    }

    fn on_latest_data_updated(&mut self) -> Result<(), Error> {
        self.hook("onLatestDataUpdated", &[])
    }

    fn on_resize(&mut self) -> Result<(), Error> {
        self.hook("onResize", &[])
    }

    fn on_edit_mode_changed(&mut self, is_edit: bool) -> Result<(), Error> {
        self.hook("onEditModeChanged", &[Value::Bool(is_edit)])
    }

    fn on_mobile_mode_changed(&mut self, is_mobile: bool) -> Result<(), Error> {
        self.hook("onMobileModeChanged", &[Value::Bool(is_mobile)])
    }

    fn on_destroy(&mut self) -> Result<(), Error> {
        self.hook("onDestroy", &[])
    }

    fn action_sources(&mut self) -> BTreeMap<String, ActionSource> {
        self.metadata("actionSources").unwrap_or_default()
    }

    fn type_parameters(&mut self) -> Map<String, serde_json::Value> {
        self.metadata("typeParameters").unwrap_or_default()
    }

    fn settings_form(&mut self) -> Vec<FormProperty> {
        self.metadata("getSettingsForm").unwrap_or_default()
    }

    fn data_key_settings_form(&mut self) -> Vec<FormProperty> {
        self.metadata("getDataKeySettingsForm").unwrap_or_default()
    }

    fn latest_data_key_settings_form(&mut self) -> Vec<FormProperty> {
        self.metadata("getLatestDataKeySettingsForm")
            .unwrap_or_default()
    }

    fn use_custom_datasources(&mut self) -> bool {
        self.metadata("useCustomDatasources").unwrap_or(false)
    }

    fn property(&self, path: &str) -> Option<serde_json::Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let mut current = self.receiver.clone();
        for segment in path.split('.') {
            current = current.get_own(segment)?;
        }
        current.to_json().ok().flatten()
    }
}

impl Drop for ScriptController {
    fn drop(&mut self) {
        // Hooks capture the scope that holds `self`; break the cycle.
        if let Value::Object(obj) = &self.receiver {
            let props = std::mem::take(&mut obj.borrow_mut().props);
            drop(props);
        }
        for scope in &self.scopes {
            scope.clear();
        }
    }
}
