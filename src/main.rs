use std::sync::Arc;

use portfolio_poll::api::session_routes;
use portfolio_poll::config::{PollerConfig, SourceConfig};
use portfolio_poll::poller::SessionManager;
use portfolio_poll::source::{HttpResultSource, ResultSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let source_config = SourceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export PORTFOLIO_API_URL=https://analysis.example.com");
        std::process::exit(1);
    });
    let poller_config = PollerConfig::from_env()?;

    let port: u16 = std::env::var("PORTFOLIO_POLL_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("📈 Portfolio Poll v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Analysis API: {}", source_config.base_url);
    eprintln!("   Session WS: ws://0.0.0.0:{}/ws", port);
    eprintln!("   Session API: http://0.0.0.0:{}/api/session", port);
    eprintln!(
        "   Backoff: base {:?}, x{}, max {:?}\n",
        poller_config.base_delay, poller_config.growth_factor, poller_config.max_delay
    );

    let source: Arc<dyn ResultSource> = Arc::new(HttpResultSource::new(&source_config)?);
    let sessions = SessionManager::new(source, poller_config);

    // Optional job id on the command line starts polling right away
    if let Some(job_id) = std::env::args().nth(1) {
        let run_id = sessions.start(job_id.clone()).await?;
        tracing::info!(job_id = %job_id, run_id = %run_id, "Polling job from command line");
    }

    let app = session_routes(Arc::clone(&sessions));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Session server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    sessions.stop().await;
    Ok(())
}
