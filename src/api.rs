use axum::{extract::DefaultBodyLimit, routing::post, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config;

const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

pub(crate) fn start_api_server(cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = Router::new()
            .nest("/api/channels", crate::handler::channel::channel_router())
            .nest("/api/videos", crate::handler::video::video_router())
            .route("/api/upload", post(crate::handler::video::upload_video))
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

        let addr = config::config().bind_addr();
        let listener = TcpListener::bind(addr).await.unwrap();
        log::info!("api server started on {}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("api server error: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down api server");
}
