mod lookup;
mod preview;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use labellens_common::config::Config;
use labellens_pipeline::session::StatsSnapshot;
use labellens_pipeline::{
    source, CaptureSession, ChannelSink, DecodeOutcome, DecoderChain, SessionError, SessionOptions,
    SessionState,
};
use lookup::{MetadataLookup, MockLookup};
use parking_lot::Mutex;
use preview::PreviewSlot;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    session: Arc<Mutex<CaptureSession>>,
    preview: Arc<PreviewSlot>,
    lookup: Arc<dyn MetadataLookup>,
    jpeg_quality: u8,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ScanResponse {
    outcome: DecodeOutcome,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_info: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    state: SessionState,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: &SessionError) -> Response {
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers (session calls block, so they run in spawn_blocking)
// ---------------------------------------------------------------------------

/// POST /camera/start
async fn start_camera(State(state): State<Arc<AppState>>) -> Response {
    let session = Arc::clone(&state.session);
    let result = tokio::task::spawn_blocking(move || session.lock().start()).await;

    match result {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e @ SessionError::AlreadyRunning)) => error_response(StatusCode::CONFLICT, &e),
        Ok(Err(e @ SessionError::DeviceUnavailable(_))) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e)
        }
        Ok(Err(e)) => {
            error!(error = %e, "camera start failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /camera/stop — no-op when idle
async fn stop_camera(State(state): State<Arc<AppState>>) -> Response {
    let session = Arc::clone(&state.session);
    match tokio::task::spawn_blocking(move || session.lock().stop()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /scan — decode one frame, look up metadata for a decoded code
async fn scan(State(state): State<Arc<AppState>>) -> Response {
    let session = Arc::clone(&state.session);
    let result = tokio::task::spawn_blocking(move || session.lock().scan_once()).await;

    match result {
        Ok(Ok(outcome)) => {
            let product_info = outcome.text().map(|code| state.lookup.lookup(code));
            Json(ScanResponse {
                message: outcome.user_message(),
                product_info,
                outcome,
            })
            .into_response()
        }
        Ok(Err(e @ SessionError::NotRunning)) => error_response(StatusCode::CONFLICT, &e),
        Ok(Err(e)) => {
            error!(error = %e, "scan failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /status
async fn status(State(state): State<Arc<AppState>>) -> Response {
    let session = Arc::clone(&state.session);
    let result = tokio::task::spawn_blocking(move || {
        let session = session.lock();
        StatusResponse {
            state: session.state(),
            stats: session.stats(),
        }
    })
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /preview.jpg — latest display image, 404 when nothing is showing
async fn preview_jpeg(State(state): State<Arc<AppState>>) -> Response {
    let Some(image) = state.preview.latest() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let quality = state.jpeg_quality;

    match tokio::task::spawn_blocking(move || image.encode_jpeg(quality)).await {
        Ok(Ok(jpeg)) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "preview JPEG encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/camera/start", post(start_camera))
        .route("/camera/stop", post(stop_camera))
        .route("/scan", post(scan))
        .route("/status", get(status))
        .route("/preview.jpg", get(preview_jpeg))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received, shutting down");
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        backend = ?config.camera.backend,
        device_index = config.camera.device_index,
        width = config.camera.width,
        height = config.camera.height,
        fps = config.camera.fps,
        "starting labellens"
    );

    let frame_source = match source::from_config(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to set up frame source");
            std::process::exit(1);
        }
    };

    let (sink, rx) = ChannelSink::bounded(config.preview.queue_depth);
    let preview = Arc::new(PreviewSlot::default());
    if let Err(e) = preview::spawn_drain(rx, Arc::clone(&preview)) {
        error!(error = %e, "failed to start preview thread");
        std::process::exit(1);
    }

    let session = Arc::new(Mutex::new(CaptureSession::new(
        frame_source,
        Box::new(DecoderChain::standard()),
        Arc::new(sink),
        SessionOptions::from_config(&config.camera),
    )));

    let state = Arc::new(AppState {
        session: Arc::clone(&session),
        preview,
        lookup: Arc::new(MockLookup),
        jpeg_quality: config.preview.jpeg_quality,
    });

    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.api.bind, config.api.port);
    info!(addr, "labellens control API starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // Release the camera before exit. `shutdown` never waits on the capture thread.
    if let Err(e) = tokio::task::spawn_blocking(move || session.lock().shutdown()).await {
        error!(error = %e, "session shutdown failed");
    }
    info!("labellens stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use labellens_pipeline::source::SyntheticSource;
    use labellens_pipeline::test_support::{ean13_image, qr_image};
    use std::time::Duration;
    use tower::ServiceExt;

    // Each test uses its own device index: synthetic claims are process-wide.
    fn app_with(source: SyntheticSource, device_index: u32) -> (Router, Arc<PreviewSlot>) {
        let (sink, rx) = ChannelSink::bounded(2);
        let preview = Arc::new(PreviewSlot::default());
        preview::spawn_drain(rx, Arc::clone(&preview)).unwrap();
        let session = CaptureSession::new(
            Box::new(source),
            Box::new(DecoderChain::standard()),
            Arc::new(sink),
            SessionOptions {
                device_index,
                idle_backoff: Duration::from_millis(2),
            },
        );
        let state = Arc::new(AppState {
            session: Arc::new(Mutex::new(session)),
            preview: Arc::clone(&preview),
            lookup: Arc::new(MockLookup),
            jpeg_quality: 80,
        });
        (router(state), preview)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn json(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = call(app, method, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn scan_while_idle_is_conflict() {
        let (app, _) = app_with(SyntheticSource::gradient(32, 32, Duration::ZERO), 301);
        let (status, body) = json(&app, "POST", "/scan").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("not running"));
    }

    #[tokio::test]
    async fn start_twice_is_conflict_and_stop_is_idempotent() {
        let (app, _) = app_with(SyntheticSource::gradient(32, 32, Duration::ZERO), 302);
        assert_eq!(call(&app, "POST", "/camera/start").await.0, StatusCode::NO_CONTENT);
        assert_eq!(call(&app, "POST", "/camera/start").await.0, StatusCode::CONFLICT);

        let (_, body) = json(&app, "GET", "/status").await;
        assert_eq!(body["state"], "running");

        assert_eq!(call(&app, "POST", "/camera/stop").await.0, StatusCode::NO_CONTENT);
        assert_eq!(call(&app, "POST", "/camera/stop").await.0, StatusCode::NO_CONTENT);
        let (_, body) = json(&app, "GET", "/status").await;
        assert_eq!(body["state"], "idle");
    }

    #[tokio::test]
    async fn busy_device_is_service_unavailable() {
        let mut holder = SyntheticSource::gradient(8, 8, Duration::ZERO);
        labellens_pipeline::FrameSource::open(&mut holder, 303).unwrap();

        let (app, _) = app_with(SyntheticSource::gradient(32, 32, Duration::ZERO), 303);
        let (status, _) = call(&app, "POST", "/camera/start").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (_, body) = json(&app, "GET", "/status").await;
        assert_eq!(body["state"], "idle");
    }

    #[tokio::test]
    async fn scan_reads_retail_barcode_and_attaches_product_info() {
        let source = SyntheticSource::still(ean13_image("5449000000996"), Duration::from_millis(5));
        let (app, _) = app_with(source, 304);
        call(&app, "POST", "/camera/start").await;

        let (status, body) = json(&app, "POST", "/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], "decoded");
        assert_eq!(body["outcome"]["text"], "5449000000996");
        assert_eq!(body["message"], "Scanned code: 5449000000996");
        assert!(body["product_info"]
            .as_str()
            .unwrap()
            .contains("(Barcode: 5449000000996)"));

        call(&app, "POST", "/camera/stop").await;
    }

    #[tokio::test]
    async fn scan_reads_qr_code() {
        let source = SyntheticSource::still(qr_image("LABELLENS-PANTRY-7"), Duration::from_millis(5));
        let (app, _) = app_with(source, 307);
        call(&app, "POST", "/camera/start").await;

        let (status, body) = json(&app, "POST", "/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["text"], "LABELLENS-PANTRY-7");

        call(&app, "POST", "/camera/stop").await;
    }

    #[tokio::test]
    async fn scan_without_code_reports_not_found() {
        let (app, _) = app_with(SyntheticSource::gradient(160, 120, Duration::ZERO), 305);
        call(&app, "POST", "/camera/start").await;

        let (status, body) = json(&app, "POST", "/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], "not_found");
        assert_eq!(body["message"], "No code detected in this frame.");
        assert!(body.get("product_info").is_none());

        call(&app, "POST", "/camera/stop").await;
    }

    #[tokio::test]
    async fn preview_follows_session() {
        let (app, preview) =
            app_with(SyntheticSource::gradient(64, 48, Duration::from_millis(5)), 306);
        assert_eq!(call(&app, "GET", "/preview.jpg").await.0, StatusCode::NOT_FOUND);

        call(&app, "POST", "/camera/start").await;
        let mut waited = Duration::ZERO;
        while preview.latest().is_none() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        let (status, jpeg) = call(&app, "GET", "/preview.jpg").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        call(&app, "POST", "/camera/stop").await;
        let mut waited = Duration::ZERO;
        while preview.latest().is_some() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert_eq!(call(&app, "GET", "/preview.jpg").await.0, StatusCode::NOT_FOUND);
    }
}
