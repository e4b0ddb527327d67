use std::{fmt, sync::Arc};

use tokio::sync::watch;
use vitrine_css::Head;
use vitrine_descriptor::{Fqn, InstanceId, SharedWidgetType, Timewindow, WidgetConfig};
use vitrine_script::{Controller, Error as ScriptError, InertController, Value};
use vitrine_subscription::{Snapshot, SubscriptionId, SubscriptionManager, SubscriptionOptions};
use vitrine_template::{Markup, MarkupPart};

use crate::{
    Error, Placement, Prepared, Runtime,
    context::{self, ContextFields, ScriptSubscriptions},
};

#[derive(Debug)]
pub enum InstanceState {
    Loading,
    Ready,
    /// The widget type or one of its resources could not be loaded. The instance
    /// renders nothing and ignores lifecycle signals.
    Failed(Error),
}

/// Which data hooks one delivery fired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivered {
    pub data: bool,
    pub latest: bool,
}

impl Delivered {
    pub fn any(self) -> bool {
        self.data || self.latest
    }
}

/// Output of [`WidgetInstance::render`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub namespace: String,
    pub html: String,
}

impl Rendered {
    /// The markup wrapped in an element carrying the namespace class.
    pub fn to_html(&self) -> String {
        format!("<div class=\"{}\">{}</div>", self.namespace, self.html)
    }
}

struct DataSubscription {
    id: SubscriptionId,
    updates: watch::Receiver<Snapshot>,
    data_revision: u64,
    latest_revision: u64,
}

/// One placed widget and its live controller.
///
/// Holds script values, so an instance stays on the task that placed it. Dropping
/// it tears it down like [`WidgetInstance::destroy`].
pub struct WidgetInstance {
    id: InstanceId,
    fqn: Fqn,
    namespace: String,
    state: InstanceState,
    widget_type: Option<SharedWidgetType>,
    config: WidgetConfig,
    controller: Box<dyn Controller>,
    ctx: Value,
    markup: Markup,
    stylesheet: Option<String>,
    head: Head,
    subscriptions: SubscriptionManager,
    data: Option<DataSubscription>,
    script_subscriptions: ScriptSubscriptions,
    width: u32,
    height: u32,
    is_edit: bool,
    is_preview: bool,
    is_mobile: bool,
    destroyed: bool,
}

impl fmt::Debug for WidgetInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetInstance")
            .field("id", &self.id)
            .field("fqn", &self.fqn)
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl WidgetInstance {
    pub(crate) fn loading(runtime: &Runtime, placement: Placement, namespace: String) -> Self {
        Self {
            id: placement.instance_id,
            fqn: placement.fqn,
            namespace,
            state: InstanceState::Loading,
            widget_type: None,
            config: placement.config,
            controller: Box::new(InertController),
            ctx: Value::Undefined,
            markup: Markup::default(),
            stylesheet: None,
            head: runtime.head().clone(),
            subscriptions: runtime.subscriptions().clone(),
            data: None,
            script_subscriptions: ScriptSubscriptions::default(),
            width: placement.width,
            height: placement.height,
            is_edit: placement.is_edit,
            is_preview: placement.is_preview,
            is_mobile: placement.is_mobile,
            destroyed: false,
        }
    }

    pub(crate) async fn load(&mut self, runtime: &Runtime) {
        match runtime.prepare(&self.fqn, &self.config).await {
            Ok(prepared) => self.start(runtime, prepared),
            Err(err) => {
                tracing::error!(widget = %self.fqn, instance = %self.id, error = %err, "widget failed to load");
                self.state = InstanceState::Failed(err);
            }
        }
    }

    fn start(&mut self, runtime: &Runtime, prepared: Prepared) {
        let Prepared {
            widget_type,
            config,
            modules,
        } = prepared;
        let descriptor = &widget_type.descriptor;

        self.markup = parse_markup(&descriptor.template_html, &self.fqn);
        self.controller = vitrine_script::compile(
            descriptor.controller_script.body(),
            &self.fqn,
            &modules,
            runtime.compile_options(),
        );
        self.set_stylesheet(&descriptor.template_css);

        let actions = vitrine_actions::bind(config.actions.clone(), Arc::clone(runtime.host()));
        self.ctx = context::build(
            &ContextFields {
                widget_id: &self.id,
                namespace: &self.namespace,
                config: &config,
                width: self.width,
                height: self.height,
                is_edit: self.is_edit,
                is_preview: self.is_preview,
                is_mobile: self.is_mobile,
            },
            &self.subscriptions,
            &actions,
            &self.script_subscriptions,
        );
        self.controller.inject_utilities(&self.ctx);
        self.controller.attach_context(self.ctx.clone());

        self.config = config;
        self.widget_type = Some(widget_type);
        self.state = InstanceState::Ready;
        tracing::debug!(widget = %self.fqn, instance = %self.id, namespace = %self.namespace, "widget ready");

        self.hook("onInit", |c| c.on_init());
        self.subscribe();
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn fqn(&self) -> &Fqn {
        &self.fqn
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, InstanceState::Ready) && !self.destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn widget_type(&self) -> Option<&SharedWidgetType> {
        self.widget_type.as_ref()
    }

    /// The configuration with descriptor defaults applied, once ready.
    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    pub fn controller_mut(&mut self) -> &mut dyn Controller {
        self.controller.as_mut()
    }

    /// The `ctx` object handed to the controller; `undefined` until ready.
    pub fn context(&self) -> &Value {
        &self.ctx
    }

    pub fn data_subscription(&self) -> Option<&SubscriptionId> {
        self.data.as_ref().map(|sub| &sub.id)
    }

    /// Subscriptions the script opened itself and has not removed.
    pub fn script_subscriptions(&self) -> Vec<SubscriptionId> {
        self.script_subscriptions.created()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_edit(&self) -> bool {
        self.is_edit
    }

    pub fn is_mobile(&self) -> bool {
        self.is_mobile
    }

    /// Deliver a pending snapshot of the data subscription, if one arrived since the
    /// last delivery.
    pub fn refresh(&mut self) -> Delivered {
        let changed = self
            .data
            .as_ref()
            .is_some_and(|sub| sub.updates.has_changed().unwrap_or(false));
        if changed {
            self.deliver()
        } else {
            Delivered::default()
        }
    }

    /// Wait for the data subscription to publish new data and deliver it. Returns
    /// `None` when there is no subscription or it was removed.
    pub async fn next_update(&mut self) -> Option<Delivered> {
        loop {
            let sub = self.data.as_mut()?;
            if sub.updates.changed().await.is_err() {
                return None;
            }
            let delivered = self.deliver();
            if delivered.any() {
                return Some(delivered);
            }
        }
    }

    fn deliver(&mut self) -> Delivered {
        let Some(sub) = self.data.as_mut() else {
            return Delivered::default();
        };
        let snapshot = sub.updates.borrow_and_update().clone();
        let delivered = Delivered {
            data: snapshot.data_revision != sub.data_revision,
            latest: snapshot.latest_revision != sub.latest_revision,
        };
        sub.data_revision = snapshot.data_revision;
        sub.latest_revision = snapshot.latest_revision;
        if let Some(error) = &snapshot.error {
            tracing::warn!(widget = %self.fqn, instance = %self.id, %error, "data subscription failed");
        }

        if delivered.data {
            context::set_data(&self.ctx, "data", &snapshot.data);
            self.hook("onDataUpdated", |c| c.on_data_updated());
        }
        if delivered.latest {
            context::set_data(&self.ctx, "latestData", &snapshot.latest_data);
            self.hook("onLatestDataUpdated", |c| c.on_latest_data_updated());
        }
        delivered
    }

    /// Returns whether the size changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == (self.width, self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        if self.is_ready() {
            self.ctx.insert("width", Value::Number(f64::from(width)));
            self.ctx.insert("height", Value::Number(f64::from(height)));
            self.hook("onResize", |c| c.on_resize());
        }
        true
    }

    /// Entering edit mode removes the data subscription; leaving it opens a new one.
    pub fn set_edit_mode(&mut self, is_edit: bool) -> bool {
        if is_edit == self.is_edit {
            return false;
        }
        self.is_edit = is_edit;
        if self.is_ready() {
            if is_edit {
                self.unsubscribe();
            } else {
                self.subscribe();
            }
            self.ctx.insert("isEdit", Value::Bool(is_edit));
            self.hook("onEditModeChanged", |c| c.on_edit_mode_changed(is_edit));
        }
        true
    }

    pub fn set_mobile_mode(&mut self, is_mobile: bool) -> bool {
        if is_mobile == self.is_mobile {
            return false;
        }
        self.is_mobile = is_mobile;
        if self.is_ready() {
            self.ctx.insert("isMobile", Value::Bool(is_mobile));
            self.hook("onMobileModeChanged", |c| c.on_mobile_mode_changed(is_mobile));
        }
        true
    }

    /// Move the widget to another time window. The data subscription keeps its id
    /// and starts over under the new window; the next delivery brings its data.
    pub fn update_timewindow(&mut self, timewindow: Timewindow) {
        if self.destroyed {
            return;
        }
        if let Some(sub) = &self.data {
            self.subscriptions.update_timewindow(&sub.id, timewindow.clone());
        }
        if self.is_ready() {
            context::set_time_window(&self.ctx, &timewindow);
        }
        self.config.timewindow = Some(timewindow);
    }

    /// Inject `css` under this instance's namespace unless it is what is already
    /// injected. Returns whether the head changed.
    pub fn set_stylesheet(&mut self, css: &str) -> bool {
        if self.destroyed || self.stylesheet.as_deref() == Some(css) {
            return false;
        }
        self.head.inject(css, &self.namespace);
        self.stylesheet = Some(css.to_string());
        true
    }

    /// The markup with `{{ path }}` filled from the controller's properties. Empty
    /// unless the instance is ready.
    pub fn render(&self) -> Rendered {
        let html = if self.is_ready() {
            self.markup
                .render_with(|path| self.controller.property(path))
        } else {
            String::new()
        };
        Rendered {
            namespace: self.namespace.clone(),
            html,
        }
    }

    /// Run `onDestroy`, remove every subscription the instance or its script opened
    /// and detach the style. Later calls do nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if matches!(self.state, InstanceState::Ready) {
            self.hook("onDestroy", |c| c.on_destroy());
        }
        self.destroyed = true;

        self.unsubscribe();
        for id in self.script_subscriptions.take_created() {
            self.subscriptions.remove(&id);
        }
        if self.stylesheet.take().is_some() {
            self.head.remove(&self.namespace);
        }

        self.controller = Box::new(InertController);
        if let Value::Object(ctx) = &self.ctx {
            ctx.borrow_mut().props.clear();
        }
        self.ctx = Value::Undefined;
        tracing::debug!(widget = %self.fqn, instance = %self.id, "widget destroyed");
    }

    fn subscribe(&mut self) {
        if self.data.is_some() || self.is_edit {
            return;
        }
        let Some(widget_type) = &self.widget_type else {
            return;
        };
        let kind = widget_type.descriptor.kind;
        if !kind.consumes_data() || self.config.datasources.is_empty() {
            return;
        }
        let id = self.subscriptions.create(SubscriptionOptions {
            kind,
            datasources: self.config.datasources.clone(),
            timewindow: self.config.timewindow.clone(),
        });
        match self.subscriptions.watch(&id) {
            Some(updates) => {
                self.script_subscriptions.set_data(Some(id.clone()));
                self.data = Some(DataSubscription {
                    id,
                    updates,
                    data_revision: 0,
                    latest_revision: 0,
                });
            }
            None => {
                self.subscriptions.remove(&id);
            }
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(sub) = self.data.take() {
            self.script_subscriptions.set_data(None);
            self.subscriptions.remove(&sub.id);
        }
    }

    fn hook(
        &mut self,
        name: &'static str,
        call: impl FnOnce(&mut dyn Controller) -> Result<(), ScriptError>,
    ) {
        if let Err(err) = call(self.controller.as_mut()) {
            tracing::error!(widget = %self.fqn, instance = %self.id, hook = name, error = %err, "controller hook failed");
        }
    }
}

impl Drop for WidgetInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn parse_markup(html: &str, fqn: &Fqn) -> Markup {
    html.parse().unwrap_or_else(|err| {
        tracing::warn!(widget = %fqn, error = %err, "markup template is malformed; rendering it verbatim");
        Markup {
            parts: vec![MarkupPart::Literal(html.to_string())],
        }
    })
}
