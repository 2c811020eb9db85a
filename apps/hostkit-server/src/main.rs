use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use hostkit::{
    handler_fn, AuthClientFactory, AuthRegistry, FacadeScope, LifecycleObserver, Request,
    ResponseWriter, ServiceExit, ServiceHost, ServiceOwner, W3cTracer,
};
use hostkit_bootstrap::{AppConfig, AppConfigProvider, CliArgs, HTTP_MODULE};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_module::HttpModule;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hostkit Server - runs a service with a single HTTP module
#[derive(Parser)]
#[command(name = "hostkit-server")]
#[command(about = "Hostkit Server - service bootstrap with an HTTP front door")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Role served by this instance (repeatable)
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        port: cli.port,
        roles: cli.roles.clone(),
        verbose: cli.verbose,
    };

    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    // Relative log files live next to the config file.
    let base_dir = cli
        .config
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let logging_config = config.logging.clone().unwrap_or_default();
    hostkit_bootstrap::init_logging(&logging_config, &base_dir);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(&config),
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!(service = %config.server.name, roles = ?config.server.roles, "Hostkit Server starting");

    let server = config.server.clone();
    let owner = ServiceOwner::builder(server.name.clone())
        .description(server.description)
        .owner(server.owner)
        .roles(server.roles)
        .config(Arc::new(AppConfigProvider::new(config)))
        .metrics(Arc::new(FacadeScope::new(server.name)))
        .tracer(Arc::new(W3cTracer::new()))
        .auth_registry(Arc::new(AuthRegistry::new()))
        .observer(Arc::new(ServerObserver))
        .build();

    let http = HttpModule::builder(HTTP_MODULE)
        .handler(|_| Arc::new(handler_fn(echo)))
        .build();
    owner.add_module(Arc::new(http)).await?;

    tokio::spawn(hostkit_bootstrap::stop_on_signal(owner.clone()));

    // Blocks until shutdown, then exits the process with the exit code.
    owner.start(true).await?;
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let http: http_module::HttpConfig = hostkit::module_config(
        &AppConfigProvider::new(config.clone()),
        HTTP_MODULE,
    )?;
    println!("Configuration is valid (HTTP port {})", http.port);
    println!("{}", config.to_yaml()?);
    Ok(())
}

/// Demo handler: describes the request it received.
fn echo(req: &Request, resp: &mut ResponseWriter) {
    let ctx = req.context();
    let body = serde_json::json!({
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "request_id": ctx.request_id(),
        "trace_id": ctx.span_context().map(|sc| sc.trace_id().to_string()),
    });
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp.write(body.to_string());
}

struct ServerObserver;

#[async_trait]
impl LifecycleObserver for ServerObserver {
    async fn on_init(&self, host: &ServiceHost) -> Result<()> {
        host.auth_registry().register(Some(AuthClientFactory::noop()));
        tracing::info!(service = host.name(), "registered no-op auth backend");
        Ok(())
    }

    fn on_shutdown(&self, exit: &ServiceExit) {
        tracing::info!(%exit, "Hostkit Server stopped");
    }
}
