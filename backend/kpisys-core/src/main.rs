// src/main.rs
use anyhow::{bail, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kpisys_core::{
    import::ImportService,
    kpi::{KpiEngine, StoreKpiData},
    seed::seed_empty_store,
    web::{router, AppState},
    Clock, Config, Store,
};

#[derive(Parser, Debug)]
#[command(name = "kpisys", version, about = "Departmental KPI, timesheet and staffing admin server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the web server (the default). Optionally imports spreadsheets first.
    Serve {
        #[arg(long, value_name = "PATH")]
        import_orgs: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        import_employees: Option<PathBuf>,
    },
    /// Import organizations and/or employees, then exit.
    Import {
        #[arg(long, value_name = "PATH")]
        orgs: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        employees: Option<PathBuf>,
    },
    /// Recompute the KPI scores of one month, then exit.
    RecalcKpi {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to read KPISYS_* configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let clock = Clock::system();
    let store = open_store(&config, &clock)?;

    match cli.command.unwrap_or(Command::Serve {
        import_orgs: None,
        import_employees: None,
    }) {
        Command::Serve {
            import_orgs,
            import_employees,
        } => {
            if import_orgs.is_some() || import_employees.is_some() {
                run_import(&store, &clock, import_orgs, import_employees).await?;
            }
            serve(config, store, clock).await
        }
        Command::Import { orgs, employees } => {
            if orgs.is_none() && employees.is_none() {
                bail!("Nothing to import: pass --orgs and/or --employees");
            }
            run_import(&store, &clock, orgs, employees).await
        }
        Command::RecalcKpi { year, month } => {
            let data = Arc::new(StoreKpiData::new(store, clock));
            let engine = KpiEngine::new(data.clone(), data);
            let cancel = cancel_on_ctrl_c();
            let summary = engine
                .recalculate_monthly(year, month, &cancel)
                .await
                .with_context(|| format!("KPI recalculation for {}-{:02} failed", year, month))?;
            println!(
                "KPI {}-{:02}: {} rows written, {} cleared ({} projects, {} employees)",
                summary.year,
                summary.month,
                summary.rows_written,
                summary.rows_cleared,
                summary.projects_scored,
                summary.employees_scored
            );
            Ok(())
        }
    }
}

fn open_store(config: &Config, clock: &Clock) -> Result<Store> {
    let store = match &config.data_file {
        Some(path) => Store::open(path).with_context(|| format!("Failed to open data file {:?}", path))?,
        None => {
            warn!("KPISYS_DATA_FILE not set; data is kept in memory only");
            Store::in_memory()
        }
    };
    if seed_empty_store(&store, clock, config).context("Failed to seed the empty store")? {
        info!("Seeded an empty store (demo data: {})", config.seed_demo_data);
    }
    Ok(store)
}

async fn run_import(
    store: &Store,
    clock: &Clock,
    orgs: Option<PathBuf>,
    employees: Option<PathBuf>,
) -> Result<()> {
    let service = ImportService::new(store.clone(), clock.clone());
    let cancel = cancel_on_ctrl_c();
    let result = tokio::task::spawn_blocking(move || {
        service.import(orgs.as_deref(), employees.as_deref(), &cancel)
    })
    .await
    .context("Import task panicked")?
    .context("Import failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// A token that is cancelled on Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, cancelling");
            trigger.cancel();
        }
    });
    token
}

async fn serve(config: Config, store: Store, clock: Clock) -> Result<()> {
    let state = AppState::new(store, clock, config.session_ttl_minutes);
    let shutdown = state.shutdown.clone();
    let app = router(state);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .with_context(|| format!("Failed to load TLS cert/key from {:?} and {:?}", cert_path, key_path))?;
            info!("TLS configuration loaded from {:?} and {:?}", cert_path, key_path);

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(10)));
                }
            });

            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("Listening on http://{}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("HTTP server failed")?;
        }
    }

    info!("Server stopped");
    Ok(())
}
