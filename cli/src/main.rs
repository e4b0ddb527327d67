use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{ArgAction, Args, Parser, Subcommand};
use miette::{Context as _, Diagnostic, GraphicalReportHandler, IntoDiagnostic as _, Result};
use serde_json::Value;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};
use url::Url;
use vitrine_actions::LoggingHost;
use vitrine_css::{Head, create_namespace};
use vitrine_descriptor::{Fqn, InstanceId, Resource, WidgetConfig, WidgetType};
use vitrine_resolver::{BundleBackend, DescriptorResolver};
use vitrine_resources::ResourceLoader;
use vitrine_runtime::{InstanceState, Placement, Runtime, RuntimeOptions};
use vitrine_script::{CompileOptions, Controller as _};
use vitrine_subscription::{StaticTelemetrySource, SubscriptionManager};
use vitrine_template::Markup;

#[derive(Parser)]
#[command(name = "vitrine")]
#[command(version)]
#[command(about = "Vitrine widget runtime")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv, -vvvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Runtime options file (JSON); `VITRINE_*` environment variables override it.
    #[arg(long = "options", value_name = "FILE", global = true)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse widget types and compile their controllers.
    Check(CheckArgs),
    /// Place one widget against static telemetry and print its head and markup.
    Render(RenderArgs),
    /// Print the CSS namespace of a widget instance.
    Namespace(NamespaceArgs),
}

#[derive(Args)]
struct CheckArgs {
    /// Widget type document: one widget type or an array of them.
    #[arg(value_name = "DESCRIPTOR")]
    descriptor: PathBuf,
}

#[derive(Args)]
struct RenderArgs {
    /// Widget type document: one widget type or an array of them.
    #[arg(value_name = "DESCRIPTOR")]
    descriptor: PathBuf,

    /// Widget type to place when the document holds several (default: the first).
    #[arg(long = "fqn")]
    fqn: Option<String>,

    /// Widget configuration (JSON).
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Static telemetry keyed by datasource name (JSON).
    #[arg(long = "data", value_name = "FILE")]
    data: Option<PathBuf>,

    #[arg(long = "id", default_value = "preview")]
    id: String,

    #[arg(long = "width", default_value_t = 400)]
    width: u32,

    #[arg(long = "height", default_value_t = 300)]
    height: u32,

    #[arg(long = "edit")]
    edit: bool,

    #[arg(long = "mobile")]
    mobile: bool,
}

#[derive(Args)]
struct NamespaceArgs {
    #[arg(value_name = "FQN")]
    fqn: String,

    #[arg(value_name = "INSTANCE_ID")]
    instance_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let options = RuntimeOptions::from_env(cli.options.as_deref())?;
    match cli.command {
        Command::Check(args) => check(args, &options).await,
        Command::Render(args) => render(args, &options).await,
        Command::Namespace(args) => namespace(args),
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().into_diagnostic()?
    } else {
        let level = match verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("error,vitrine={level},vitrine_={level}"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

async fn check(args: CheckArgs, options: &RuntimeOptions) -> Result<()> {
    let types = read_types(&args.descriptor)?;
    let loader = ResourceLoader::new(Head::new()).with_base(base_url(&args.descriptor)?);
    let compile = options.compile_options();
    let handler = GraphicalReportHandler::new();

    let mut failed = false;
    for widget_type in &types {
        let problems = check_one(widget_type, &loader, &compile).await;
        if problems.is_empty() {
            println!("{}: ok", widget_type.fqn);
            continue;
        }
        failed = true;
        for problem in &problems {
            render_report(&handler, problem.as_ref())?;
        }
    }

    if failed {
        Err(miette::miette!("check failed"))
    } else {
        Ok(())
    }
}

async fn check_one(
    widget_type: &WidgetType,
    loader: &ResourceLoader,
    compile: &CompileOptions,
) -> Vec<Box<dyn Diagnostic + Send + Sync>> {
    let mut problems: Vec<Box<dyn Diagnostic + Send + Sync>> = Vec::new();
    let descriptor = &widget_type.descriptor;

    if let Err(err) = widget_type.default_config() {
        problems.push(Box::new(err));
    }
    if let Err(err) = descriptor.template_html.parse::<Markup>() {
        problems.push(Box::new(err));
    }

    let mut modules = BTreeMap::new();
    if let Some(imports) = descriptor.controller_script.modules() {
        for (alias, url) in imports {
            match loader.load(&Resource::module(url.clone())).await {
                Ok(loaded) => {
                    modules.insert(alias.clone(), Arc::clone(&loaded.source));
                }
                Err(err) => problems.push(Box::new(err)),
            }
        }
    }
    if !problems.is_empty() {
        return problems;
    }

    match vitrine_script::try_compile(
        descriptor.controller_script.body(),
        &widget_type.fqn,
        &modules,
        compile,
    ) {
        Ok(mut controller) => {
            let sources = controller.action_sources();
            tracing::info!(widget = %widget_type.fqn, action_sources = sources.len(), "controller compiled");
        }
        Err(err) => problems.push(Box::new(err)),
    }
    problems
}

async fn render(args: RenderArgs, options: &RuntimeOptions) -> Result<()> {
    let types = read_types(&args.descriptor)?;
    let fqn = match &args.fqn {
        Some(fqn) => Fqn::new(fqn)?,
        None => types
            .first()
            .map(|widget_type| widget_type.fqn.clone())
            .ok_or_else(|| miette::miette!("`{}` holds no widget types", args.descriptor.display()))?,
    };
    // Without a configuration file the widget starts from its type's default
    // configuration, as it does when first added to a dashboard.
    let config: WidgetConfig = match &args.config {
        Some(path) => serde_json::from_str(&read(path)?)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid widget configuration `{}`", path.display()))?,
        None => match types.iter().find(|widget_type| widget_type.fqn == fqn) {
            Some(widget_type) => serde_json::from_value(Value::Object(widget_type.default_config()?))
                .into_diagnostic()
                .wrap_err_with(|| format!("invalid default configuration of `{fqn}`"))?,
            None => WidgetConfig::default(),
        },
    };
    let source = match &args.data {
        Some(path) => StaticTelemetrySource::from_json(&read(path)?)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid telemetry `{}`", path.display()))?,
        None => StaticTelemetrySource::new(),
    };

    let runtime = Runtime::new(
        DescriptorResolver::new(Arc::new(BundleBackend::new(types))),
        ResourceLoader::new(Head::new()).with_base(base_url(&args.descriptor)?),
        SubscriptionManager::with_refresh_interval(Arc::new(source), options.refresh_interval()),
        Arc::new(LoggingHost),
    )
    .with_compile_options(options.compile_options());

    let placement = Placement::new(fqn, InstanceId::new(&args.id)?)
        .with_config(config)
        .with_size(args.width, args.height)
        .edit(args.edit)
        .mobile(args.mobile);
    let mut instance = runtime.place(placement).await;
    if let InstanceState::Failed(err) = instance.state() {
        render_report(&GraphicalReportHandler::new(), err)?;
        return Err(miette::miette!("render failed"));
    }

    if instance.data_subscription().is_some() {
        let wait = Duration::from_millis(options.request_timeout_ms);
        if tokio::time::timeout(wait, instance.next_update()).await.is_err() {
            tracing::warn!(widget = %instance.fqn(), "no data arrived before the timeout");
        }
    }

    print!("{}", runtime.head().to_html());
    println!("{}", instance.render().to_html());
    Ok(())
}

fn namespace(args: NamespaceArgs) -> Result<()> {
    let fqn = Fqn::new(&args.fqn)?;
    let instance_id = InstanceId::new(&args.instance_id)?;
    println!("{}", create_namespace(&fqn, &instance_id));
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read `{}`", path.display()))
}

fn read_types(path: &Path) -> Result<Vec<WidgetType>> {
    Ok(WidgetType::parse_many(&read(path)?)?)
}

/// Relative resource URLs in a document resolve against the document's directory.
fn base_url(document: &Path) -> Result<Url> {
    let abs = document
        .canonicalize()
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to resolve `{}`", document.display()))?;
    let dir = abs.parent().unwrap_or(&abs);
    Url::from_directory_path(dir)
        .map_err(|()| miette::miette!("could not convert `{}` into a file URL", dir.display()))
}

fn render_report(handler: &GraphicalReportHandler, diagnostic: &dyn Diagnostic) -> Result<()> {
    let mut out = String::new();
    handler
        .render_report(&mut out, diagnostic)
        .map_err(|_| miette::miette!("failed to render diagnostics"))?;
    eprint!("{out}");
    Ok(())
}
