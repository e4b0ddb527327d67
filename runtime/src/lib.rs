//! Widget placement.
//!
//! A [`Runtime`] owns the shared services: descriptor resolver, resource loader,
//! subscription manager, the page head and the dashboard host. [`Runtime::place`]
//! resolves a widget type, loads its resources, compiles its controller, hands the
//! controller its `ctx` and returns the live [`WidgetInstance`].

mod context;
mod error;
mod instance;
pub mod options;

use std::{collections::BTreeMap, fmt, sync::Arc};

pub use error::Error;
pub use instance::{Delivered, InstanceState, Rendered, WidgetInstance};
pub use options::RuntimeOptions;
use serde_json::Value;
use url::Url;
use vitrine_actions::DashboardHost;
use vitrine_css::{Head, create_namespace};
use vitrine_descriptor::{
    Fqn, InstanceId, Resource, SharedWidgetType, WidgetConfig, WidgetType, form_defaults,
};
use vitrine_resolver::{Backend, DescriptorResolver, FallbackBackend, FileBackend, HttpBackend};
use vitrine_resources::{HttpFetcher, ResourceLoader};
use vitrine_script::CompileOptions;
use vitrine_subscription::{
    HttpTelemetrySource, StaticTelemetrySource, SubscriptionManager, TelemetrySource,
};

/// Where and how to place one widget.
#[derive(Clone, Debug)]
pub struct Placement {
    pub fqn: Fqn,
    pub instance_id: InstanceId,
    pub config: WidgetConfig,
    pub width: u32,
    pub height: u32,
    pub is_edit: bool,
    pub is_preview: bool,
    pub is_mobile: bool,
}

impl Placement {
    pub fn new(fqn: Fqn, instance_id: InstanceId) -> Self {
        Self {
            fqn,
            instance_id,
            config: WidgetConfig::default(),
            width: 0,
            height: 0,
            is_edit: false,
            is_preview: false,
            is_mobile: false,
        }
    }

    pub fn with_config(mut self, config: WidgetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn edit(mut self, is_edit: bool) -> Self {
        self.is_edit = is_edit;
        self
    }

    pub fn preview(mut self, is_preview: bool) -> Self {
        self.is_preview = is_preview;
        self
    }

    pub fn mobile(mut self, is_mobile: bool) -> Self {
        self.is_mobile = is_mobile;
        self
    }
}

pub(crate) struct Prepared {
    pub(crate) widget_type: SharedWidgetType,
    pub(crate) config: WidgetConfig,
    /// Module alias -> source.
    pub(crate) modules: BTreeMap<String, Arc<str>>,
}

#[derive(Clone)]
pub struct Runtime {
    resolver: DescriptorResolver,
    loader: ResourceLoader,
    subscriptions: SubscriptionManager,
    host: Arc<dyn DashboardHost>,
    compile: CompileOptions,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("resolver", &self.resolver)
            .field("loader", &self.loader)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Widget styles go into the loader's head.
    pub fn new(
        resolver: DescriptorResolver,
        loader: ResourceLoader,
        subscriptions: SubscriptionManager,
        host: Arc<dyn DashboardHost>,
    ) -> Self {
        Self {
            resolver,
            loader,
            subscriptions,
            host,
            compile: CompileOptions::default(),
        }
    }

    /// Assemble the services `options` describe. Widget types come from
    /// `descriptorDir`, then `backendUrl`; telemetry comes from `backendUrl` and is
    /// empty without one.
    pub fn from_options(
        options: &RuntimeOptions,
        host: Arc<dyn DashboardHost>,
    ) -> Result<Self, Error> {
        let http_backend = match &options.backend_url {
            Some(url) => Some(Arc::new(HttpBackend::with_options(
                url.clone(),
                options.backend_options(),
            )?) as Arc<dyn Backend>),
            None => None,
        };
        let file_backend = options
            .descriptor_dir
            .as_ref()
            .map(|dir| Arc::new(FileBackend::new(dir.clone())) as Arc<dyn Backend>);
        let backend: Arc<dyn Backend> = match (file_backend, http_backend) {
            (Some(file), Some(http)) => Arc::new(FallbackBackend::new(file, http)),
            (Some(file), None) => file,
            (None, Some(http)) => http,
            (None, None) => return Err(Error::NoBackend),
        };

        let mut loader = ResourceLoader::new(Head::new())
            .with_http(HttpFetcher::with_options(options.fetcher_options()));
        if let Some(base) = resource_base(options) {
            loader = loader.with_base(base);
        }

        let source: Arc<dyn TelemetrySource> = match &options.backend_url {
            Some(url) => Arc::new(HttpTelemetrySource::with_options(
                url.clone(),
                options.telemetry_options(),
            )?),
            None => Arc::new(StaticTelemetrySource::new()),
        };
        let subscriptions =
            SubscriptionManager::with_refresh_interval(source, options.refresh_interval());

        Ok(Self::new(
            DescriptorResolver::new(backend),
            loader,
            subscriptions,
            host,
        )
        .with_compile_options(options.compile_options()))
    }

    pub fn with_compile_options(mut self, compile: CompileOptions) -> Self {
        self.compile = compile;
        self
    }

    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    pub fn loader(&self) -> &ResourceLoader {
        &self.loader
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn head(&self) -> &Head {
        self.loader.head()
    }

    pub fn host(&self) -> &Arc<dyn DashboardHost> {
        &self.host
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.compile
    }

    /// Place a widget. Descriptor and resource failures leave the instance in
    /// [`InstanceState::Failed`]; a controller that fails to compile is replaced by an
    /// inert one and the instance is still ready.
    ///
    /// The style is injected and the data subscription opened only after the last
    /// suspension point, so dropping the future early leaves neither behind.
    pub async fn place(&self, placement: Placement) -> WidgetInstance {
        let namespace = create_namespace(&placement.fqn, &placement.instance_id);
        tracing::debug!(widget = %placement.fqn, instance = %placement.instance_id, %namespace, "placing widget");
        let mut instance = WidgetInstance::loading(self, placement, namespace);
        instance.load(self).await;
        instance
    }

    pub(crate) async fn prepare(
        &self,
        fqn: &Fqn,
        config: &WidgetConfig,
    ) -> Result<Prepared, Error> {
        let widget_type = self.resolver.resolve(fqn).await?;
        let config = resolve_config(&widget_type, config.clone())?;
        self.loader
            .load_all(&widget_type.descriptor.resources)
            .await?;

        let mut modules = BTreeMap::new();
        if let Some(imports) = widget_type.descriptor.controller_script.modules() {
            for (alias, url) in imports {
                let loaded = self.loader.load(&Resource::module(url.clone())).await?;
                modules.insert(alias.clone(), Arc::clone(&loaded.source));
            }
        }
        Ok(Prepared {
            widget_type,
            config,
            modules,
        })
    }
}

/// Fill what the placement leaves open from the widget type: settings from the
/// default configuration, then from the settings form; the time window from the
/// default configuration.
fn resolve_config(widget_type: &WidgetType, config: WidgetConfig) -> Result<WidgetConfig, Error> {
    let defaults = widget_type.default_config()?;
    let mut config = config;
    if let Some(Value::Object(settings)) = defaults.get("settings") {
        config = config.with_default_settings(settings);
    }
    config = config.with_default_settings(&form_defaults(&widget_type.descriptor.settings_form));
    if config.timewindow.is_none()
        && let Some(timewindow) = defaults.get("timewindow")
    {
        config.timewindow = serde_json::from_value(timewindow.clone()).ok();
    }
    Ok(config)
}

fn resource_base(options: &RuntimeOptions) -> Option<Url> {
    if let Some(url) = &options.backend_url {
        return Some(url.clone());
    }
    let dir = std::path::absolute(options.descriptor_dir.as_ref()?).ok()?;
    Url::from_directory_path(dir).ok()
}
