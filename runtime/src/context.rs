//! The `ctx` object a controller sees.
//!
//! Plain fields are copied in as script values. The API objects (`utils`,
//! `subscriptionApi`, `actionsApi`, `controlApi`) are native functions closing over
//! the shared services, so the script reaches the host only through them.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use serde::Serialize;
use vitrine_actions::{ActionsApi, RpcRequest};
use vitrine_descriptor::{InstanceId, Timewindow, WidgetConfig};
use vitrine_script::{
    Exception, Interpreter, Value,
    value::{PropertyMap, number_to_string},
};
use vitrine_subscription::{
    DatasourceData, SubscriptionId, SubscriptionManager, SubscriptionOptions,
};

/// The subscriptions one instance's `ctx.subscriptionApi` may reach: those its script
/// opened, which it may also remove, and the instance's data subscription, which it
/// may only read. Ids of other instances look like unknown ids.
#[derive(Clone, Default)]
pub(crate) struct ScriptSubscriptions {
    created: Rc<RefCell<Vec<SubscriptionId>>>,
    data: Rc<RefCell<Option<SubscriptionId>>>,
}

impl ScriptSubscriptions {
    pub(crate) fn created(&self) -> Vec<SubscriptionId> {
        self.created.borrow().clone()
    }

    pub(crate) fn take_created(&self) -> Vec<SubscriptionId> {
        std::mem::take(&mut *self.created.borrow_mut())
    }

    pub(crate) fn set_data(&self, id: Option<SubscriptionId>) {
        *self.data.borrow_mut() = id;
    }

    fn add(&self, id: SubscriptionId) {
        self.created.borrow_mut().push(id);
    }

    /// Forget `id` if the script opened it; returns whether it did.
    fn release(&self, id: &SubscriptionId) -> bool {
        let mut created = self.created.borrow_mut();
        let before = created.len();
        created.retain(|created| created != id);
        created.len() != before
    }

    fn readable(&self, id: &SubscriptionId) -> bool {
        self.data.borrow().as_ref() == Some(id) || self.created.borrow().contains(id)
    }
}

pub(crate) struct ContextFields<'a> {
    pub widget_id: &'a InstanceId,
    pub namespace: &'a str,
    pub config: &'a WidgetConfig,
    pub width: u32,
    pub height: u32,
    pub is_edit: bool,
    pub is_preview: bool,
    pub is_mobile: bool,
}

pub(crate) fn build(
    fields: &ContextFields<'_>,
    subscriptions: &SubscriptionManager,
    actions: &ActionsApi,
    created: &ScriptSubscriptions,
) -> Value {
    let config = fields.config;
    let mut ctx = PropertyMap::new();
    ctx.insert("widgetId".into(), Value::string(fields.widget_id.as_str()));
    ctx.insert("widgetNamespace".into(), Value::string(fields.namespace));
    ctx.insert("settings".into(), from_serde(&config.settings));
    ctx.insert("datasources".into(), from_serde(&config.datasources));
    ctx.insert("data".into(), Value::array(Vec::new()));
    ctx.insert("latestData".into(), Value::array(Vec::new()));
    ctx.insert("width".into(), Value::Number(f64::from(fields.width)));
    ctx.insert("height".into(), Value::Number(f64::from(fields.height)));
    ctx.insert("isEdit".into(), Value::Bool(fields.is_edit));
    ctx.insert("isPreview".into(), Value::Bool(fields.is_preview));
    ctx.insert("isMobile".into(), Value::Bool(fields.is_mobile));
    let time_window = config
        .timewindow
        .as_ref()
        .map_or_else(Value::new_object, from_serde);
    ctx.insert("timeWindow".into(), time_window);
    ctx.insert("utils".into(), utils());
    ctx.insert(
        "subscriptionApi".into(),
        subscription_api(subscriptions, created),
    );
    ctx.insert("actionsApi".into(), actions_api(actions));
    ctx.insert("controlApi".into(), control_api(actions, config));
    Value::object(ctx)
}

pub(crate) fn set_time_window(ctx: &Value, timewindow: &Timewindow) {
    ctx.insert("timeWindow", from_serde(timewindow));
}

/// Replace `ctx.data` or `ctx.latestData` with a fresh snapshot.
pub(crate) fn set_data(ctx: &Value, key: &str, data: &[DatasourceData]) {
    ctx.insert(key, from_serde(data));
}

fn from_serde<T: Serialize + ?Sized>(value: &T) -> Value {
    Value::from_json(&serde_json::to_value(value).unwrap_or_default())
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn to_json(value: &Value) -> serde_json::Value {
    value.to_json().ok().flatten().unwrap_or_default()
}

fn method(
    props: &mut PropertyMap,
    name: &str,
    f: impl Fn(&mut Interpreter, &[Value]) -> Result<Value, Exception> + 'static,
) {
    props.insert(name.into(), Value::native(name, move |interp, _, args| f(interp, args)));
}

fn utils() -> Value {
    let mut utils = PropertyMap::new();
    method(&mut utils, "formatValue", format_value);
    method(&mut utils, "getEntityDetailsPageURL", |_, args| {
        let id = arg(args, 0).to_display();
        let entity_type = arg(args, 1).to_display();
        Ok(Value::string(format!("/{entity_type}/{id}")))
    });
    method(&mut utils, "customTranslation", |_, args| {
        let fallback = arg(args, 1);
        Ok(if fallback.is_nullish() { arg(args, 0) } else { fallback })
    });
    Value::object(utils)
}

/// `formatValue(value, units?, decimals?)`: `-` for nothing, the value as given when
/// it is not numeric, otherwise the number (fixed to `decimals` when given) followed
/// by the units.
fn format_value(interp: &mut Interpreter, args: &[Value]) -> Result<Value, Exception> {
    let value = arg(args, 0);
    if value.is_nullish() {
        return Ok(Value::string("-"));
    }
    let number = match &value {
        Value::Number(n) => *n,
        other => {
            let parse_float = interp.globals().lookup("parseFloat").unwrap_or_default();
            interp
                .call(&parse_float, Value::Undefined, &[other.clone()])?
                .to_number()
        }
    };
    if number.is_nan() {
        return Ok(Value::string(value.to_display()));
    }
    let formatted = match arg(args, 2) {
        Value::Undefined => number_to_string(number),
        decimals => {
            let digits = decimals.to_number();
            if !(0.0..=100.0).contains(&digits) {
                return Err(interp.throw(
                    "RangeError",
                    "toFixed() digits argument must be between 0 and 100",
                ));
            }
            if number.is_finite() {
                format!("{:.*}", digits as usize, number)
            } else {
                number_to_string(number)
            }
        }
    };
    let units = arg(args, 1);
    Ok(Value::string(if units.truthy() {
        format!("{formatted} {}", units.to_display())
    } else {
        formatted
    }))
}

fn subscription_api(subscriptions: &SubscriptionManager, created: &ScriptSubscriptions) -> Value {
    let mut api = PropertyMap::new();
    for name in ["createSubscription", "createSubscriptionFromInfo"] {
        let subscriptions = subscriptions.clone();
        let created = created.clone();
        method(&mut api, name, move |interp, args| {
            let options: SubscriptionOptions = serde_json::from_value(to_json(&arg(args, 0)))
                .map_err(|err| interp.type_error(format!("invalid subscription options: {err}")))?;
            let id = subscriptions.create(options);
            created.add(id.clone());
            Ok(Value::string(id.as_str()))
        });
    }

    let manager = subscriptions.clone();
    let owned = created.clone();
    method(&mut api, "removeSubscription", move |_, args| {
        let Some(id) = subscription_id(&arg(args, 0)) else {
            return Ok(Value::Bool(false));
        };
        Ok(Value::Bool(owned.release(&id) && manager.remove(&id)))
    });

    let manager = subscriptions.clone();
    let owned = created.clone();
    method(&mut api, "getData", move |_, args| {
        Ok(match subscription_id(&arg(args, 0)) {
            Some(id) if owned.readable(&id) => snapshot_value(manager.data(&id)),
            _ => Value::Undefined,
        })
    });
    let manager = subscriptions.clone();
    let owned = created.clone();
    method(&mut api, "getLatestData", move |_, args| {
        Ok(match subscription_id(&arg(args, 0)) {
            Some(id) if owned.readable(&id) => snapshot_value(manager.latest_data(&id)),
            _ => Value::Undefined,
        })
    });
    Value::object(api)
}

/// Ids handed out to scripts are strings; anything else names no subscription.
fn subscription_id(value: &Value) -> Option<SubscriptionId> {
    match value {
        Value::String(id) => Some(SubscriptionId::from(&**id)),
        _ => None,
    }
}

fn snapshot_value(data: Option<Vec<DatasourceData>>) -> Value {
    match data {
        Some(data) => from_serde(&data),
        None => Value::Undefined,
    }
}

fn actions_api(actions: &ActionsApi) -> Value {
    let mut api = PropertyMap::new();
    api.insert(
        "actionDescriptorsBySourceId".into(),
        from_serde(actions.descriptors()),
    );
    for source_id in actions.source_ids() {
        let actions = actions.clone();
        let source = source_id.to_string();
        method(&mut api, source_id, move |_, args| {
            let event = to_json(&arg(args, 0));
            let rest: Vec<serde_json::Value> = args.iter().skip(1).map(to_json).collect();
            Ok(Value::Bool(actions.invoke(&source, &event, &rest).is_some()))
        });
    }
    Value::object(api)
}

/// Remote commands go to the entity of the first datasource that names one.
fn control_api(actions: &ActionsApi, config: &WidgetConfig) -> Value {
    let entity_id = config
        .datasources
        .iter()
        .find_map(|ds| ds.entity.as_ref().map(|entity| entity.id.clone()));
    let mut api = PropertyMap::new();
    for (name, one_way) in [("sendOneWayCommand", true), ("sendTwoWayCommand", false)] {
        let host = Arc::clone(actions.host());
        let entity_id = entity_id.clone();
        method(&mut api, name, move |interp, args| {
            let command = arg(args, 0);
            if command.is_nullish() {
                return Err(interp.type_error("command method is required"));
            }
            let timeout = arg(args, 2);
            let request = RpcRequest {
                method: command.to_display(),
                params: to_json(&arg(args, 1)),
                one_way,
                timeout_ms: (!timeout.is_nullish()).then(|| timeout.to_number().max(0.0) as u64),
                entity_id: entity_id.clone(),
            };
            host.send_rpc(&request)
                .map_err(|err| interp.throw("Error", err.to_string()))?;
            Ok(Value::Bool(true))
        });
    }
    method(&mut api, "completedCommand", |_, _| Ok(Value::Undefined));
    Value::object(api)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use vitrine_actions::LoggingHost;
    use vitrine_script::Limits;
    use vitrine_subscription::StaticTelemetrySource;

    use super::*;

    fn call(interp: &mut Interpreter, ctx: &Value, path: &[&str], args: &[Value]) -> Value {
        let mut target = ctx.clone();
        let (name, parents) = path.split_last().unwrap();
        for segment in parents {
            target = target.get_own(segment).unwrap();
        }
        let f = target.get_own(name).unwrap();
        interp.call(&f, target, args).unwrap()
    }

    fn context(config: &WidgetConfig) -> (Value, SubscriptionManager, ScriptSubscriptions) {
        let manager = SubscriptionManager::new(Arc::new(StaticTelemetrySource::new()));
        let actions = vitrine_actions::bind(config.actions.clone(), Arc::new(LoggingHost));
        let created = ScriptSubscriptions::default();
        let id = InstanceId::new("w1").unwrap();
        let ctx = build(
            &ContextFields {
                widget_id: &id,
                namespace: "widget-x-1",
                config,
                width: 320,
                height: 200,
                is_edit: false,
                is_preview: false,
                is_mobile: true,
            },
            &manager,
            &actions,
            &created,
        );
        (ctx, manager, created)
    }

    #[test]
    fn plain_fields_are_copied_in() {
        let config: WidgetConfig = serde_json::from_value(json!({
            "settings": { "units": "C" },
            "datasources": [{ "name": "d1" }],
            "actions": { "click": [{ "name": "go", "actionType": "navigate", "dashboardId": "7" }] }
        }))
        .unwrap();
        let (ctx, _, _) = context(&config);
        let json = to_json(&ctx);
        assert_eq!(json["widgetId"], "w1");
        assert_eq!(json["widgetNamespace"], "widget-x-1");
        assert_eq!(json["settings"], json!({ "units": "C" }));
        assert_eq!(json["datasources"][0]["name"], "d1");
        assert_eq!(json["width"], 320);
        assert_eq!(json["isMobile"], true);
        assert_eq!(json["timeWindow"], json!({}));
        assert_eq!(
            json["actionsApi"]["actionDescriptorsBySourceId"]["click"][0]["dashboardId"],
            "7"
        );
    }

    #[test]
    fn format_value_follows_widget_conventions() {
        let (ctx, _, _) = context(&WidgetConfig::default());
        let mut interp = Interpreter::new("test", Limits::default());
        let mut format = |args: &[Value]| {
            call(&mut interp, &ctx, &["utils", "formatValue"], args).to_display()
        };
        assert_eq!(format(&[Value::Null]), "-");
        assert_eq!(format(&[Value::Number(21.456)]), "21.456");
        assert_eq!(
            format(&[Value::Number(21.456), Value::string("C"), Value::Number(1.0)]),
            "21.5 C"
        );
        assert_eq!(format(&[Value::string("7.25kg"), Value::Undefined, Value::Number(0.0)]), "7");
        assert_eq!(format(&[Value::string("on")]), "on");
    }

    #[test]
    fn entity_urls_and_translations() {
        let (ctx, _, _) = context(&WidgetConfig::default());
        let mut interp = Interpreter::new("test", Limits::default());
        let url = call(
            &mut interp,
            &ctx,
            &["utils", "getEntityDetailsPageURL"],
            &[Value::string("abc"), Value::string("device")],
        );
        assert_eq!(url.to_display(), "/device/abc");
        let text = call(
            &mut interp,
            &ctx,
            &["utils", "customTranslation"],
            &[Value::string("k"), Value::string("Temperature")],
        );
        assert_eq!(text.to_display(), "Temperature");
    }

    #[test]
    fn script_subscriptions_are_tracked() {
        let (ctx, manager, created) = context(&WidgetConfig::default());
        let mut interp = Interpreter::new("test", Limits::default());
        let options = Value::from_json(&json!({ "type": "static" }));
        let id = call(&mut interp, &ctx, &["subscriptionApi", "createSubscription"], &[options]);
        let id = SubscriptionId::from(id.to_display().as_str());
        assert!(manager.contains(&id));
        assert_eq!(created.created(), vec![id.clone()]);

        let removed = call(
            &mut interp,
            &ctx,
            &["subscriptionApi", "removeSubscription"],
            &[Value::string(id.as_str())],
        );
        assert!(removed.truthy());
        assert!(created.created().is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn foreign_subscriptions_are_out_of_reach() {
        let (ctx, manager, created) = context(&WidgetConfig::default());
        let mut interp = Interpreter::new("test", Limits::default());
        let foreign = manager.create(serde_json::from_value(json!({ "type": "static" })).unwrap());
        let own_data = manager.create(serde_json::from_value(json!({ "type": "static" })).unwrap());
        created.set_data(Some(own_data.clone()));

        let foreign_arg = [Value::string(foreign.as_str())];
        for api in ["getData", "getLatestData"] {
            let read = call(&mut interp, &ctx, &["subscriptionApi", api], &foreign_arg);
            assert!(matches!(read, Value::Undefined), "{api}");
        }
        let removed = call(&mut interp, &ctx, &["subscriptionApi", "removeSubscription"], &foreign_arg);
        assert!(!removed.truthy());
        assert!(manager.contains(&foreign));

        let own_arg = [Value::string(own_data.as_str())];
        let read = call(&mut interp, &ctx, &["subscriptionApi", "getData"], &own_arg);
        assert!(matches!(read, Value::Array(_)));
        // The data subscription belongs to the instance, not the script.
        let removed = call(&mut interp, &ctx, &["subscriptionApi", "removeSubscription"], &own_arg);
        assert!(!removed.truthy());
        assert!(manager.contains(&own_data));
    }

    #[test]
    fn action_sources_become_functions() {
        let config = WidgetConfig {
            actions: BTreeMap::from([(
                "click".to_string(),
                vec![vitrine_descriptor::ActionDescriptor::new(
                    "open",
                    vitrine_descriptor::ActionType::OpenLink,
                )],
            )]),
            ..WidgetConfig::default()
        };
        let (ctx, _, _) = context(&config);
        let mut interp = Interpreter::new("test", Limits::default());
        // The descriptor has no url, so nothing is dispatched.
        let dispatched = call(&mut interp, &ctx, &["actionsApi", "click"], &[Value::new_object()]);
        assert!(!dispatched.truthy());
    }
}
