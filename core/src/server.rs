// HTTP and SSE glue over the station
//
//   GET  /api/disks             current disks and the protected set
//   POST /api/wipe/:name?level= admit a wipe (level defaults to low)
//   GET  /api/jobs              every job
//   GET  /events                disk feed (SSE)
//   GET  /events/jobs           job feed (SSE)

use crate::events::Event;
use crate::station::{Feed, WipeStation};
use crate::StationError;
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const DEFAULT_LEVEL: &str = "low";

#[derive(Debug, Deserialize)]
pub struct WipeQuery {
    level: Option<String>,
}

/// Handler state: the station plus the token that ends open event streams
#[derive(Clone)]
struct AppState {
    station: Arc<WipeStation>,
    shutdown: CancellationToken,
}

/// Event streams served by this router end once `shutdown` is cancelled
pub fn router(station: Arc<WipeStation>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/api/disks", get(list_disks))
        .route("/api/wipe/:name", post(request_wipe))
        .route("/api/jobs", get(list_jobs))
        .route("/events", get(disk_events))
        .route("/events/jobs", get(job_events))
        .with_state(AppState { station, shutdown })
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(station: Arc<WipeStation>, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "wipe station listening");

    serve_on(listener, station, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// Open SSE streams end when `shutdown` fires.
pub async fn serve_on<F>(listener: TcpListener, station: Arc<WipeStation>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let streams = CancellationToken::new();
    let app = router(station, streams.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            streams.cancel();
        })
        .await
        .context("http server failed")?;

    tracing::info!("http server stopped");
    Ok(())
}

async fn list_disks(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "disks": state.station.disks(),
        "protected": state.station.protected(),
    }))
}

async fn list_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "jobs": state.station.jobs() }))
}

async fn request_wipe(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WipeQuery>,
) -> Response {
    let station = &state.station;
    let level = query.level.as_deref().unwrap_or(DEFAULT_LEVEL);

    match station.request_wipe(&name, level).await {
        // the job task keeps running after its handle is dropped
        Ok(admitted) => Json(json!({ "job": admitted.job })).into_response(),
        Err(e @ StationError::AlreadyRunning { .. }) => {
            let job = match &e {
                StationError::AlreadyRunning { job_id, .. } => station.job(*job_id),
                _ => None,
            };
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": e.to_string(), "job": job })),
            )
                .into_response()
        }
        Err(e) if e.is_admission() => {
            tracing::info!(disk = %name, error = %e, "wipe request rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => {
            tracing::error!(disk = %name, error = %e, "wipe admission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn disk_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    feed_stream(state.station.subscribe_disks(), state.shutdown)
}

async fn job_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    feed_stream(state.station.subscribe_jobs(), state.shutdown)
}

/// The feed, and with it the subscription, is dropped when the client goes
/// or the server shuts down
fn feed_stream(feed: Feed, shutdown: CancellationToken) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let events = stream::unfold((feed, shutdown), |(mut feed, shutdown)| async move {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            event = feed.next() => event,
        }?;
        Some((Ok::<_, Infallible>(to_sse(&event)), (feed, shutdown)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse(event: &Event) -> SseEvent {
    match serde_json::to_string(event) {
        Ok(data) => SseEvent::default().data(data),
        Err(e) => {
            tracing::error!(error = %e, kind = event.payload.kind(), "event not serializable");
            SseEvent::default().comment("unserializable event")
        }
    }
}
