use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use api_ingress::middleware::IpRateLimiter;
use api_ingress::{build_router, AppState, Cache, DatabaseProbe, Probe, Unavailable};
use apikit_db::{ConnectOpts, Database};
use clap::{Parser, Subcommand};
use jobs::email::{EmailClient, TemplateStore};
use jobs::{register_email_handlers, JobService};
use mimalloc::MiMalloc;
use runtime::{AppConfig, CliArgs, DatabaseConfig, StartupPolicy};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How often idle rate-limit buckets are dropped.
const LIMITER_CLEANUP_EVERY: Duration = Duration::from_secs(60);

/// Boilerplate Server - REST API with background jobs
#[derive(Parser)]
#[command(name = "boilerplate-server")]
#[command(about = "Boilerplate Server - REST API with background jobs")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print current configuration and exit
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
    /// Check configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    runtime::logging::init_logging(&config.observability.logging, &base_dir);
    tracing::info!(
        service = %config.observability.service_name,
        environment = %config.observability.environment,
        "Boilerplate Server starting"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

fn connect_opts(db: &DatabaseConfig, config: &AppConfig) -> ConnectOpts {
    ConnectOpts {
        host: db.host.clone(),
        port: db.port,
        user: db.user.clone(),
        password: db.password.clone(),
        database: db.name.clone(),
        ssl_mode: db.ssl_mode.clone(),
        max_conns: db.max_open_conns,
        min_conns: db.max_idle_conns.min(db.max_open_conns),
        max_lifetime: Some(db.conn_max_lifetime),
        idle_timeout: Some(db.conn_max_idle_time),
        log_statements: config.is_local(),
        slow_statement_threshold: Some(config.observability.logging.slow_query_threshold),
        ..Default::default()
    }
}

/// Apply the startup policy to a failed dependency: abort when required,
/// otherwise report it through `/status`.
fn degrade(name: &str, policy: StartupPolicy, err: anyhow::Error) -> Result<Arc<dyn Probe>> {
    if policy == StartupPolicy::Required {
        return Err(err.context(format!("{name} is required but unavailable")));
    }
    let reason = format!("{err:#}");
    tracing::warn!(dependency = name, error = %reason, "optional dependency unavailable, continuing");
    Ok(Arc::new(Unavailable::new(name, reason)))
}

async fn run_server(config: AppConfig) -> Result<()> {
    if config.is_production() && config.auth.secret_key.trim().is_empty() {
        bail!("auth.secret_key must be set in production");
    }
    let probe_timeout = config.observability.health_checks.timeout;

    let mut probes: Vec<Arc<dyn Probe>> = Vec::new();
    let db = match &config.database {
        Some(db_cfg) => match Database::connect(&connect_opts(db_cfg, &config)).await {
            Ok(db) => {
                probes.push(Arc::new(DatabaseProbe::new(db.clone())));
                Some(db)
            }
            Err(e) => {
                probes.push(degrade("database", db_cfg.startup, e.into())?);
                None
            }
        },
        None => {
            tracing::warn!("no database configured, running without a pool");
            None
        }
    };

    if let Some(cache_cfg) = &config.cache {
        match Cache::connect(cache_cfg, probe_timeout).await {
            Ok(cache) => probes.push(Arc::new(cache)),
            Err(e) => probes.push(degrade("cache", cache_cfg.startup, e)?),
        }
    }

    if config.email.api_key.is_empty() {
        tracing::warn!("email.api_key is empty, outgoing email will be rejected");
    }
    let email = EmailClient::from_config(&config.email).context("failed to build email client")?;
    let jobs = register_email_handlers(JobService::new(&config.jobs), Arc::new(email));
    jobs.start();

    let limiter = if config.rate_limit.enabled {
        Some(IpRateLimiter::new(&config.rate_limit)?)
    } else {
        None
    };

    let server_cfg = config.server.clone();
    let mut state = AppState::new(config.clone())
        .with_jobs(jobs.client())
        .with_templates(TemplateStore::new(&config.email.templates_dir));
    if let Some(db) = &db {
        state = state.with_db(db.clone());
    }
    for probe in probes {
        state = state.with_probe(probe);
    }

    let cancel = CancellationToken::new();
    if let Some(limiter) = &limiter {
        api_ingress::spawn_limiter_cleanup(limiter.clone(), LIMITER_CLEANUP_EVERY, cancel.clone());
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = api_ingress::wait_for_shutdown().await {
            tracing::error!(error = %e, "signal handler failed");
        }
        shutdown.cancel();
    });

    let router = build_router(state, limiter);
    let result = api_ingress::serve(router, &server_cfg, cancel.clone()).await;

    cancel.cancel();
    jobs.stop().await;
    if let Some(db) = db {
        db.close().await;
    }
    tracing::info!("server stopped");
    result
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");

    config.validate()?;
    if config.rate_limit.enabled {
        IpRateLimiter::new(&config.rate_limit)?;
    }
    let templates = TemplateStore::new(&config.email.templates_dir);
    for template in jobs::email::Template::ALL {
        let path = templates.path(template);
        if !path.exists() {
            tracing::warn!(template = %template, path = %path.display(), "email template missing");
        }
    }

    tracing::info!("Configuration is valid");
    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}
