use clap::Parser;
use juggler_rs::clock::StdTimeSync;
use juggler_rs::config;
use juggler_rs::device_signal::DeviceSignal;
use juggler_rs::feeder::SerialFeederLauncher;
use juggler_rs::logging;
use juggler_rs::orchestrator::{JobOrchestrator, OrchestratorSettings};
use juggler_rs::remote::{InternClient, RemoteQueue};
use juggler_rs::web;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pulls print jobs from the intern queue and feeds them to the printer")]
struct Args {
    /// Main config
    #[arg(short, long, default_value = "juggler.toml")]
    config: String,

    /// Where to log (stdout when omitted)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Use verbose log output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    logging::init(args.verbose, args.log.as_deref())?;

    tracing::info!("Starting juggler print host");
    tracing::info!("Loading configuration from: {}", args.config);
    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    tracing::info!(
        "Printer: {} ({}) via {}",
        config.intern.printer_name,
        config.intern.office_name,
        config.intern.api_uri
    );
    tracing::info!("Feeder: {} @ {} baud", config.feeder.device, config.feeder.baud);

    let remote = Arc::new(InternClient::new(&config.intern, config.timing.request_timeout())?);
    if let Err(e) = remote.reschedule_printer().await {
        tracing::error!("reschedule failed: {}", e);
    }

    let orchestrator = JobOrchestrator::new(
        remote,
        Arc::new(SerialFeederLauncher::new(&config.feeder)),
        DeviceSignal::new(config.paths.device_signal_file.clone(), config.paths.button_file.clone()),
        Arc::new(StdTimeSync),
        OrchestratorSettings::from_config(&config),
    );

    // Channel between Axum handlers and the orchestrator task.
    let (printer_tx, printer_rx) = mpsc::channel::<web::printer_channel::PrinterRequest>(16);
    let state = Arc::new(web::api::AppStateInner {
        printer_tx,
        snapshot: orchestrator.subscribe(),
        printer_name: config.intern.printer_name.clone(),
        office_name: config.intern.office_name.clone(),
    });
    let app = web::api::create_router(state);

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
            shutdown.cancel();
        });
    }

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!("Web server failed: {}", e);
                shutdown.cancel();
            }
        })
    };

    orchestrator
        .run(config.timing.polling_interval(), printer_rx, shutdown.clone())
        .await;
    shutdown.cancel();
    server.await?;
    tracing::info!("Shutting down.");
    Ok(())
}
