use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use env_cleaner::api::{self, AppState};
use env_cleaner::cli::{self, Commands, EnvCommands};
use env_cleaner::client::{self, EnvClient, NewEnvironment};
use env_cleaner::config::{self, Config, StorageBackend};
use env_cleaner::connector::helm::{HelmConnector, ProcessRunner};
use env_cleaner::connector::ConnectorSet;
use env_cleaner::jobs::{self, crawler::Crawler, deleter::Deleter, stale::StaleNotifier};
use env_cleaner::metrics::Metrics;
use env_cleaner::notification::slack::SlackNotifier;
use env_cleaner::notification::{ChannelNotifier, Notifier};
use env_cleaner::store::postgres::PgRegistry;
use env_cleaner::store::sqlite::SqliteRegistry;
use env_cleaner::store::Registry;

/// How long in-flight HTTP requests may take to drain after a shutdown signal.
const HTTP_GRACE_PERIOD: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.log_json)?;

    let result = match config::load(&args.config) {
        Ok(cfg) => match args.command.unwrap_or(Commands::Server) {
            Commands::Server => run_server(cfg).await,
            Commands::Env { command } => handle_env_command(&cfg, command).await,
        },
        Err(e) => Err(e.into()),
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(log_json: bool) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "env-cleaner"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (plain, json) = if log_json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "env_cleaner=info,tower_http=info".into()),
        ))
        .with(plain)
        .with(json)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config) -> anyhow::Result<()> {
    let settings = cfg.validate()?;
    let metrics = Metrics::new()?;

    let registry: Arc<dyn Registry> = match &settings.storage {
        StorageBackend::Sqlite(path) => {
            info!(path = %path.display(), "Opening SQLite registry...");
            Arc::new(SqliteRegistry::open(path).await?)
        }
        StorageBackend::Postgres(options) => {
            info!("Connecting to PostgreSQL registry...");
            let pg = PgRegistry::connect_with(options.clone()).await?;
            info!("Running migrations...");
            pg.migrate().await?;
            Arc::new(pg)
        }
    };

    let slack = settings
        .slack_webhook_url
        .clone()
        .map(SlackNotifier::new)
        .transpose()?;
    let notifier: Arc<dyn Notifier> =
        Arc::new(ChannelNotifier::new(settings.notifier.clone(), slack));

    let mut connectors = ConnectorSet::new();
    if let Some(helm) = &settings.helm {
        let conn = HelmConnector::new(helm.clone(), Arc::new(ProcessRunner), notifier.clone())?;
        connectors.insert(Arc::new(conn));
    }
    info!(connectors = ?connectors.kinds(), "connectors enabled");

    if settings.dry_run {
        warn!("Dry run mode is enabled: outdated environments will not be deleted");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    for connector in connectors.iter() {
        let crawler = Crawler::new(connector.clone(), registry.clone(), metrics.clone());
        handles.push(jobs::spawn(
            Arc::new(crawler),
            settings.crawl_interval,
            metrics.clone(),
            shutdown_rx.clone(),
        ));
    }

    let deleter = Deleter::new(
        registry.clone(),
        connectors.clone(),
        notifier.clone(),
        settings.dry_run,
        metrics.clone(),
    );
    handles.push(jobs::spawn(
        Arc::new(deleter),
        settings.delete_interval,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let stale = StaleNotifier::new(
        registry.clone(),
        notifier.clone(),
        settings.stale_threshold,
        metrics.clone(),
    );
    handles.push(jobs::spawn(
        Arc::new(stale),
        settings.stale_check_interval,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let state = Arc::new(AppState {
        registry,
        connectors,
        metrics,
        admin_api_key: settings.admin_api_key.clone(),
        max_extend: settings.max_extend,
        default_ttl: settings.default_ttl,
    });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    info!("env-cleaner listening on {}", settings.listen_addr);

    let mut http_shutdown = shutdown_rx.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let served = tokio::select! {
        res = &mut server => {
            error!("API server stopped unexpectedly");
            Some(res)
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, shutting down");
            None
        }
    };

    let _ = shutdown_tx.send(true);

    let served = match served {
        Some(res) => res,
        None => match tokio::time::timeout(HTTP_GRACE_PERIOD, &mut server).await {
            Ok(res) => res,
            Err(_) => {
                warn!("API did not drain within {:?}, closing", HTTP_GRACE_PERIOD);
                server.abort();
                Ok(Ok(()))
            }
        },
    };

    // Jobs finish their in-flight run (bounded by the run timeout) first.
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "job task panicked");
        }
    }

    served
        .context("API server task failed")?
        .context("API server error")?;
    info!("env-cleaner shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn handle_env_command(cfg: &Config, cmd: EnvCommands) -> anyhow::Result<()> {
    let client = EnvClient::new(&cfg.client()?)?;

    match cmd {
        EnvCommands::List => {
            let envs = client.list().await?;
            if envs.is_empty() {
                println!("No environments found.");
            } else {
                print!("{}", client::render_table(&envs));
            }
        }
        EnvCommands::Add {
            name,
            owner,
            kind,
            ttl,
            namespace,
        } => {
            let env = client
                .add(&NewEnvironment {
                    name,
                    namespace,
                    owner,
                    kind,
                    ttl,
                })
                .await?;
            println!(
                "Environment {} added, id: {}, delete at: {}",
                env.display_name(),
                env.id,
                env.deadline
            );
        }
    }
    Ok(())
}
