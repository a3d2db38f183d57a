//! Bootstrap [axum] servers for the visualization surface

use crate::{logs::BroadcastHandle, shutdown::Shutdown};
use axum::{
    body::Body,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::StreamExt;
use std::{io, net::SocketAddr, path::PathBuf};
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;

/// Serves the visualization bundle plus the `/logs` event stream.
pub async fn serve(
    addr: SocketAddr,
    assets: PathBuf,
    logs: BroadcastHandle,
    on_shutdown: Shutdown,
) -> io::Result<()> {
    let svc = Router::new()
        .route("/logs", get(stream_logs))
        .fallback_service(ServeDir::new(assets))
        .layer(TraceLayer::new_for_http())
        .with_state(logs);

    let listener = TcpListener::bind(addr).await?;
    info!(target: "server", %addr, "viz server listening");
    axum::serve(listener, svc).with_graceful_shutdown(on_shutdown).await
}

/// Serves the explorer asset bundle.
pub async fn serve_explorer(
    addr: SocketAddr,
    assets: PathBuf,
    on_shutdown: Shutdown,
) -> io::Result<()> {
    let svc = Router::new()
        .fallback_service(ServeDir::new(assets))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!(target: "server", %addr, "explorer server listening");
    axum::serve(listener, svc).with_graceful_shutdown(on_shutdown).await
}

/// Streams merged visualization events: buffered history first, then live,
/// flushed chunk by chunk until the viewer disconnects or the simulator
/// stops.
async fn stream_logs(State(logs): State<BroadcastHandle>) -> impl IntoResponse {
    let chunks = UnboundedReceiverStream::new(logs.subscribe()).map(Ok::<_, io::Error>);
    ([(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(chunks))
}
