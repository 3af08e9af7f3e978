use anyhow::Result;
use std::sync::Arc;

use aidbox_mcp_server::config::{self, LogFormat};
use aidbox_mcp_server::fhir_client::FhirClient;
use aidbox_mcp_server::routes::{self, AppState};
use aidbox_mcp_server::server::{McpServer, VERSION};
use aidbox_mcp_server::tools::ToolRegistry;
use aidbox_mcp_server::transport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = config::Config::load()?;
    let warnings = config.validate()?;

    init_logging(&config);
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    tracing::info!("🚀 Aidbox MCP Server starting...");
    tracing::info!(
        aidbox_url = %config.aidbox_url,
        auth = config.auth.kind(),
        path_style = ?config.path_style,
        probe = ?config.probe_endpoint,
        timeout_secs = config.request_timeout,
        "Aidbox client configured"
    );

    let client = Arc::new(FhirClient::new(config.fhir_client_config())?);

    // Probe Aidbox unless told not to; failure leaves the server in degraded mode
    if config.skip_connection {
        tracing::info!("Skipping Aidbox connection test (SKIP_AIDBOX_CONNECTION)");
    } else {
        tracing::info!("Testing connection to Aidbox...");
        match client.test_connection().await {
            Ok(()) => tracing::info!("✅ Connected to Aidbox at {}", client.base_url()),
            Err(e) => {
                tracing::error!("❌ {}", e);
                tracing::warn!("Server will start but tool calls will fail until Aidbox is reachable");
            }
        }
    }

    let server = McpServer::new(ToolRegistry::new(Arc::clone(&client)));
    tracing::info!(
        tools = server.tools().list_tools().len(),
        "✅ Tool registry initialized"
    );

    print_startup_banner(&config);

    let outcome = if config.http_mode {
        run_http(&config, server).await
    } else {
        tokio::select! {
            result = transport::run_stdio(server) => result,
            _ = shutdown_signal() => Ok(()),
        }
    };

    client.disconnect().await;
    tracing::info!("👋 Server shutdown complete");
    outcome
}

/// Initialize logging on stderr so stdout stays reserved for the stdio transport
fn init_logging(config: &config::Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_ansi(false).init(),
    }
}

async fn run_http(config: &config::Config, server: McpServer) -> Result<()> {
    let app = routes::router(AppState::new(server));

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 HTTP server listening on http://{}", addr);
    tracing::info!("🌐 Health check: http://{}/health", addr);
    tracing::info!("🔗 MCP endpoint: http://{}/mcp", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Print startup banner to stderr
fn print_startup_banner(config: &config::Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║                  🏥 Aidbox MCP Server                     ║
║                                                           ║
║        FHIR tools over the Model Context Protocol         ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    eprintln!("{}", banner);
    eprintln!("  Version:     {}", VERSION);
    eprintln!("  Aidbox:      {}", config.aidbox_url);
    eprintln!("  Auth:        {}", config.auth.kind());
    if config.http_mode {
        eprintln!(
            "  Transport:   http://{}:{}",
            config.http_host, config.http_port
        );
    } else {
        eprintln!("  Transport:   stdio");
    }
    eprintln!();
}

/// Resolve when Ctrl+C or SIGTERM arrives
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
