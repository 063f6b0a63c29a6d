use clap::Parser;
use panel_core::sim::{serve_websocket, SimBackend};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Websocket backend serving an in-memory Steam Deck.
#[derive(Parser, Debug)]
#[command(name = "mock_backend")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:44443")]
    addr: String,

    /// Write the bound address here once listening.
    #[arg(long, value_name = "PATH")]
    addr_file: Option<std::path::PathBuf>,

    /// Exit after this many milliseconds.
    #[arg(long)]
    run_for_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind(&args.addr).await?;
    let local = listener.local_addr()?;
    if let Some(path) = &args.addr_file {
        std::fs::write(path, local.to_string())?;
    }
    println!("mock_backend listening on ws://{local}");

    let sim = Arc::new(Mutex::new(SimBackend::steam_deck()));
    let serve = async {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            let session_token: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            info!("client {peer} connected");
            let sim = Arc::clone(&sim);
            tokio::spawn(async move {
                match serve_websocket(stream, sim, session_token).await {
                    Ok(()) => info!("client {peer} disconnected"),
                    Err(e) => warn!("client {peer} dropped: {e}"),
                }
            });
        }
    };

    match args.run_for_ms {
        Some(ms) => {
            let _ = tokio::time::timeout(Duration::from_millis(ms), serve).await;
        }
        None => serve.await,
    }
    Ok(())
}
