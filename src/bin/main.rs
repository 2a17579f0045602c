//! ICP-Brasil mTLS identity server binary

use anyhow::{Context, Result};
use clap::Parser;
use icp_mtls::config::{init_tracing, Args, Settings};
use icp_mtls::{redirect, IdentityServer, MtlsConfig, ServerIdentity, TrustPool};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let settings = Settings::from(args);
    info!("Starting ICP-Brasil mTLS server");

    let trust_pool = TrustPool::load(&settings.ca_dir, &settings.ca_pattern)
        .with_context(|| format!("Failed to load trust pool from {}", settings.ca_dir.display()))?;
    if !trust_pool.skipped().is_empty() {
        warn!("{} trust file(s) skipped", trust_pool.skipped().len());
    }

    let identity = ServerIdentity::from_pem_files(&settings.server_cert, &settings.server_key)
        .context("Failed to load server certificate and key")?;

    let config = MtlsConfig::new(&identity, &trust_pool, settings.handshake)
        .context("Failed to build TLS configuration")?;

    let tcp = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen))?;

    if let Some(addr) = settings.redirect_listen {
        let https_port = settings.listen.port();
        tokio::spawn(async move {
            let result = match TcpListener::bind(addr).await {
                Ok(tcp) => redirect::run(tcp, https_port).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                error!(addr = %addr, error = %e, "HTTP redirect listener stopped");
            }
        });
    }

    let server = IdentityServer::new(config).with_handshake_timeout(settings.handshake_timeout);

    tokio::select! {
        result = server.run(tcp) => {
            result.context("mTLS server failed")?;
        }
        () = shutdown_signal() => {}
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
