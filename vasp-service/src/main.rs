//! Bilateral off-chain VASP payment protocol node.
//!
//! # Usage
//!
//! ```bash
//! LOCAL_ADDRESS=tlb1... PEERS=tlb1other...=https://peer.example.com \
//!   cargo run -p vasp-service --release
//!
//! RUST_LOG=info cargo run -p vasp-service
//! ```
//!
//! # Environment Variables
//!
//! See [`vasp_service::config::ServiceConfig`] for the full list; all are
//! also available as `--flag` CLI arguments.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use vasp_core::address::Address;
use vasp_core::storage::Storage;
use vasp_core::transport::Transport;
use vasp_core::vasp::OffChainVasp;
use vasp_http::client::ReqwestTransport;
use vasp_service::business::LocalBusinessContext;
use vasp_service::config::ServiceConfig;
use vasp_service::util::SigDown;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    #[cfg(feature = "telemetry")]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        tracing::error!("vasp-service failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ServiceConfig::load();
    let local = Address::decode(&config.local_address)
        .map_err(vasp_service::error::ServiceError::from)?;
    tracing::info!(address = %local, host = %config.host, port = config.port, "loaded configuration");

    let business = Arc::new(LocalBusinessContext::new(config.local_address.clone()));
    let storage = Arc::new(Storage::open(std::path::Path::new(&config.core.storage_path))?);
    let vasp = Arc::new(OffChainVasp::with_storage(local, business, storage)?);

    let transport = Arc::new(ReqwestTransport::new(config.local_address.clone()));
    for (peer, base_url) in config.parse_peers()? {
        tracing::info!(peer = %peer, base_url = %base_url, "registered peer");
        transport.register_peer(&Address::decode(&peer)?, base_url);
    }

    resume_obligations(&vasp, &transport).await;

    let sig_down = SigDown::try_new().map_err(vasp_service::error::ServiceError::Bind)?;
    let shutdown_token = sig_down.cancellation_token();

    let retransmit_vasp = Arc::clone(&vasp);
    let retransmit_transport = Arc::clone(&transport);
    let retransmit_interval = Duration::from_secs(config.core.retransmit_interval_secs);
    let retransmit_token = sig_down.cancellation_token();
    tokio::spawn(async move {
        retransmit_ticker(retransmit_vasp, retransmit_transport, retransmit_interval, retransmit_token).await;
    });

    let app = vasp_http::server::router(vasp);
    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("vasp-service listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    sig_down.recv().await;
    tracing::info!("vasp-service shut down gracefully");
    Ok(())
}

/// Resumes any payment progression left incomplete by a prior crash:
/// re-runs each restored channel's open obligations, proposes whatever
/// follow-up commands they produce, and sends them to the relevant peer.
async fn resume_obligations(vasp: &Arc<OffChainVasp>, transport: &Arc<ReqwestTransport>) {
    let followups = match vasp.retry_open_obligations().await {
        Ok(followups) => followups,
        Err(err) => {
            tracing::warn!("failed to resume open obligations: {err}");
            return;
        }
    };
    for (peer, command) in followups {
        let request = match vasp.sequence_command_local(&peer, command) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(peer = %peer, "failed to sequence resumed follow-up: {err}");
                continue;
            }
        };
        match transport.send_request(&peer, &request).await {
            Ok(response) => {
                if let Err(err) = vasp.handle_response(&peer, response) {
                    tracing::warn!(peer = %peer, "resumed follow-up response rejected: {err}");
                }
            }
            Err(err) => {
                tracing::debug!(peer = %peer, "resumed follow-up send failed: {err}");
            }
        }
    }
}

/// Periodically resends each open channel's oldest unacknowledged request.
///
/// A crashed or unreachable counterparty otherwise leaves a channel stalled
/// forever on a dropped request; this mirrors the reference
/// implementation's retransmission loop without requiring the caller to
/// drive it by hand.
async fn retransmit_ticker(
    vasp: Arc<OffChainVasp>,
    transport: Arc<ReqwestTransport>,
    interval: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for other_encoded in vasp.counterparty_addresses() {
            let Some(channel) = vasp.existing_channel(&other_encoded) else {
                continue;
            };
            let request = {
                let mut channel = channel.lock().expect("channel mutex poisoned");
                channel.retransmit_tick()
            };
            let Some(request) = request else {
                continue;
            };
            let Ok(other) = Address::decode(&other_encoded) else {
                continue;
            };
            match transport.send_request(&other, &request).await {
                Ok(response) => {
                    let result = {
                        let mut channel = channel.lock().expect("channel mutex poisoned");
                        channel.handle_response(response)
                    };
                    match result {
                        Ok(()) => {
                            if let Err(err) = vasp.persist_channel(&other_encoded) {
                                tracing::warn!(peer = %other_encoded, "failed to persist channel state: {err}");
                            }
                        }
                        Err(err) => {
                            tracing::warn!(peer = %other_encoded, "retransmit response rejected: {err}");
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(peer = %other_encoded, "retransmit send failed: {err}");
                }
            }
        }
    }
}
