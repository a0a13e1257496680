use std::time::Duration;

use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod error;
mod handler;
mod manager;
mod media;
mod playlist;
mod reconcile;
mod store;

/// Total budget for stopping every channel on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let cfg = config::config();
    cfg.ensure_dirs().unwrap_or_else(|e| {
        eprintln!("Error creating data directories: {}", e);
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();

    api::start_api_server(cancel.clone());
    reconcile::spawn(cancel.clone());

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
            _ = sigterm.recv() => {
                cancel.cancel();
            },
        }
    }

    // every channel down, every pusher signaled, every pipe removed
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager::stop_all())
        .await
        .is_err()
    {
        log::warn!(
            "shutdown incomplete after {}s, exiting anyway",
            SHUTDOWN_TIMEOUT.as_secs(),
        );
    }

    std::process::exit(0);
}
