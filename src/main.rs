use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use webpage_snapshot::capture::CaptureService;
use webpage_snapshot::config::Config;
use webpage_snapshot::scroll::StopReason;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if tracing::dispatcher::has_been_set() {
            error!("Fatal error: {e:#}");
        } else {
            // Failed before logging was up.
            eprintln!("Fatal error: {e:#}");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        url = %config.webpage_url,
        format = config.output_format.extension(),
        output = %config.output_path.display(),
        strategy = config.scroll.strategy.as_str(),
        scroll_enabled = config.scroll_enabled,
        "Configuration loaded"
    );

    let service = CaptureService::new(config.browser_options());
    let job = config.capture_job();

    // The browser is shut down on every path, including Ctrl+C.
    let result = tokio::select! {
        result = service.capture(&job) => result,
        () = shutdown_signal() => Err(anyhow::anyhow!("Interrupted before the capture finished")),
    };
    service.shutdown().await;
    let report = result?;

    match &report.scroll {
        Some(outcome) if outcome.reason == StopReason::MaxIterationsReached => warn!(
            iterations = outcome.iterations_performed,
            cancelled = outcome.cancelled,
            "Snapshot may be incomplete: scrolling hit its limit"
        ),
        Some(outcome) => info!(
            iterations = outcome.iterations_performed,
            reason = %outcome.reason,
            "Scrolling finished"
        ),
        None => info!("Scrolling disabled"),
    }

    info!(
        path = %report.output_path.display(),
        size = report.size_bytes,
        "Capture complete"
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webpage_snapshot=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
