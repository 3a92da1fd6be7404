use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yank_server::{manager::Manager, AppState, Cli, Config};

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls before any TLS use.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yank_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Payloads and key material must come out owner-only.
    yank_security::set_restrictive_umask();

    let cli = Cli::parse();
    let config = Config::from_cli(cli).unwrap_or_else(|err| {
        eprintln!("configuration error: {err}");
        std::process::exit(1);
    });

    let server_host = yank_server::config::split_host_port(&config.server_addr)
        .0
        .to_string();

    if let Err(err) = yank_server::tls::ensure_cert_files(
        &config.cert_file,
        &config.key_file,
        &server_host,
    ) {
        eprintln!("TLS setup failed: {err}");
        std::process::exit(1);
    }

    let rustls_config = yank_server::tls::rustls_config(&config.cert_file, &config.key_file)
        .await
        .unwrap_or_else(|err| {
            eprintln!("failed to configure TLS: {err}");
            std::process::exit(1);
        });

    tracing::info!("clipboard dir: {}", config.clipboard_dir.display());
    tracing::info!("public address: {}", config.server_addr);
    tracing::info!(
        "authentication: {}",
        if config.key.is_some() { "on" } else { "off (open instance)" }
    );

    let listen_https = config.listen_https;
    let listen_http = config.listen_http;

    let state = AppState::new(config).unwrap_or_else(|err| {
        eprintln!("failed to initialize server state: {err}");
        std::process::exit(1);
    });

    let manager = Manager::start(state.clone());

    if let Some(http_addr) = listen_http {
        tokio::spawn(run_redirect_server(
            http_addr,
            state.config.server_addr.clone(),
        ));
    }

    let app = yank_server::app(state);

    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, draining connections");
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });
    }

    tracing::info!("HTTPS server listening on {}", listen_https);
    axum_server::bind_rustls(listen_https, rustls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("HTTPS server failed");

    manager.stop().await;
}

/// Plain HTTP listener that redirects every request to the HTTPS endpoint,
/// keeping the requested hostname and rewriting scheme and port.
async fn run_redirect_server(addr: SocketAddr, server_addr: String) {
    let https_port = yank_server::config::split_host_port(&server_addr)
        .1
        .unwrap_or(443);
    let app = yank_server::redirect_app(server_addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::warn!("failed to bind HTTP redirect listener on {}: {}", addr, err);
            return;
        }
    };

    tracing::info!(
        "HTTP redirect listener on {} (rewriting requests to https, port {})",
        addr,
        https_port
    );
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("HTTP redirect listener error: {}", err);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
