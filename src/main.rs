//! Guided capture preview server
//!
//! Hosts one capture session and serves readiness, an MJPEG preview with the
//! exposure hint applied, and capture controls to a local operator screen.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use clap::Parser;
use futures::StreamExt;
use guided_capture::capture::encode_jpeg;
use guided_capture::device::synthetic::SyntheticProvider;
use guided_capture::device::v4l2::{V4l2Config, V4l2Provider};
use guided_capture::device::{DeviceProvider, FrameSlot};
use guided_capture::presence::region_of_interest;
use guided_capture::{CameraError, CaptureEngine, EngineConfig, Facing, SessionHandle};
use image::{Rgb, RgbImage};
use parking_lot::RwLock;
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::time::interval;
use tokio_stream::wrappers::IntervalStream;
use tower_http::cors::CorsLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const PREVIEW_INTERVAL_MS: u64 = 100;
const PREVIEW_JPEG_QUALITY: u8 = 80;

#[derive(Parser, Debug)]
#[command(name = "guided_capture")]
#[command(about = "Guided clinical photo capture with live quality scoring")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "GUIDED_CAPTURE_PORT")]
    port: u16,

    /// Pose to open the first session with
    #[arg(long, default_value = "glabellar")]
    pose: String,

    /// Start on the back camera
    #[arg(long)]
    back: bool,

    #[arg(long, default_value = "/dev/video0")]
    front_device: String,

    #[arg(long, default_value = "/dev/video2")]
    back_device: String,

    /// Use a generated scene instead of a V4L2 camera
    #[arg(long)]
    synthetic: bool,

    /// TOML file overriding engine thresholds
    #[arg(short, long, env = "GUIDED_CAPTURE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
struct AppState {
    engine: CaptureEngine,
    session: RwLock<Option<SessionHandle>>,
    /// Camera the next session opens on; follows facing switches
    facing: RwLock<Facing>,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Guided capture starting...");

    let config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };

    let provider: Arc<dyn DeviceProvider> = if args.synthetic {
        let provider = SyntheticProvider::new();
        tokio::spawn(synthetic_feed(provider.frame_slot()));
        info!("Using synthetic camera");
        Arc::new(provider)
    } else {
        Arc::new(V4l2Provider::new(V4l2Config {
            front_device: args.front_device.clone(),
            back_device: args.back_device.clone(),
            ..V4l2Config::default()
        }))
    };

    let facing = if args.back { Facing::Back } else { Facing::Front };
    let engine = CaptureEngine::new(provider, config);

    // A failed first open is not fatal; the operator can retry from the page
    let session = match engine.open_session(&args.pose, facing) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Could not open session for {}: {}", args.pose, e);
            None
        }
    };

    let state = Arc::new(AppState {
        engine,
        session: RwLock::new(session),
        facing: RwLock::new(facing),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/poses", get(poses_handler))
        .route("/readiness", get(readiness_handler))
        .route("/stream", get(mjpeg_stream_handler))
        .route("/session/:pose", post(open_handler))
        .route("/zoom/:value", post(zoom_handler))
        .route("/exposure/:value", post(exposure_handler))
        .route("/facing/switch", post(switch_facing_handler))
        .route("/capture", post(capture_handler))
        .route("/close", post(close_handler))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!("0.0.0.0:{}", args.port);
    info!("Starting web server on http://{}", addr);
    info!("  - Operator page: http://<ip>:{}/", args.port);
    info!("  - Readiness:     http://<ip>:{}/readiness", args.port);
    info!("  - Preview:       http://<ip>:{}/stream", args.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release the camera on every exit path
    if let Some(handle) = state.session.write().take() {
        handle.close();
    }
    info!("Guided capture stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}

/// Mid-gray textured scene with a skin-toned disc drifting around the face
/// region, fed to the synthetic camera at preview rate
async fn synthetic_feed(slot: FrameSlot) {
    let (width, height) = (480u32, 640u32);
    let (cx, cy, radius) = region_of_interest(width, height, &Default::default());
    let mut ticker = interval(Duration::from_millis(PREVIEW_INTERVAL_MS));
    let mut t = 0f32;

    loop {
        ticker.tick().await;
        t += 0.1;
        let ox = cx + (t.sin() * radius * 0.3);
        let disc_r = radius * 0.7;
        let frame = RgbImage::from_fn(width, height, |x, y| {
            let dx = x as f32 - ox;
            let dy = y as f32 - cy;
            if dx * dx + dy * dy < disc_r * disc_r {
                Rgb([205, 150, 120])
            } else if (x / 8 + y / 8) % 2 == 0 {
                Rgb([150, 150, 150])
            } else {
                Rgb([120, 120, 120])
            }
        });
        slot.feed(frame);
    }
}

fn error_response(err: CameraError) -> Response {
    let status = match err {
        CameraError::PermissionDenied => StatusCode::FORBIDDEN,
        CameraError::DeviceNotFound | CameraError::UnknownPose(_) => StatusCode::NOT_FOUND,
        CameraError::SessionNotLive => StatusCode::CONFLICT,
        CameraError::FrameUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        CameraError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn no_session() -> Response {
    error_response(CameraError::SessionNotLive)
}

async fn poses_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.engine.poses())
}

async fn readiness_handler(State(state): State<SharedState>) -> Response {
    let guard = state.session.read();
    let Some(handle) = guard.as_ref() else {
        return no_session();
    };
    let body = serde_json::json!({
        "session_id": handle.id(),
        "pose": handle.pose(),
        "state": handle.state(),
        "settings": handle.settings(),
        "preview_gain": handle.preview_gain(),
        "readiness": handle.readiness(),
    });
    Json(body).into_response()
}

/// Close the current session, remembering which camera it was on
fn release_session(state: &AppState, session: &mut Option<SessionHandle>) {
    if let Some(old) = session.take() {
        *state.facing.write() = old.settings().facing;
        old.close();
    }
}

async fn open_handler(State(state): State<SharedState>, Path(pose): Path<String>) -> Response {
    let mut guard = state.session.write();
    // Release the old device before asking for a new one
    release_session(&state, &mut guard);
    let facing = *state.facing.read();
    match state.engine.open_session(&pose, facing) {
        Ok(handle) => {
            let body = serde_json::json!({ "session_id": handle.id(), "pose": handle.pose() });
            *guard = Some(handle);
            Json(body).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn zoom_handler(State(state): State<SharedState>, Path(value): Path<f32>) -> Response {
    match state.session.read().as_ref() {
        Some(handle) => {
            handle.set_zoom(value);
            Json(handle.settings()).into_response()
        }
        None => no_session(),
    }
}

async fn exposure_handler(State(state): State<SharedState>, Path(value): Path<f32>) -> Response {
    match state.session.read().as_ref() {
        Some(handle) => {
            handle.set_exposure(value);
            Json(handle.settings()).into_response()
        }
        None => no_session(),
    }
}

async fn switch_facing_handler(State(state): State<SharedState>) -> Response {
    match state.session.read().as_ref() {
        Some(handle) => match handle.switch_facing() {
            Ok(()) => Json(handle.settings()).into_response(),
            Err(e) => error_response(e),
        },
        None => no_session(),
    }
}

#[derive(Debug, Deserialize)]
struct CaptureParams {
    #[serde(default)]
    force: bool,
}

async fn capture_handler(
    State(state): State<SharedState>,
    Query(params): Query<CaptureParams>,
) -> Response {
    let result = match state.session.read().as_ref() {
        Some(handle) => handle.capture(params.force),
        None => return no_session(),
    };
    match result {
        Ok(artifact) => (
            [
                (header::CONTENT_TYPE, artifact.mime_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", artifact.file_name()),
                ),
            ],
            artifact.image_bytes,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn close_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let mut guard = state.session.write();
    release_session(&state, &mut guard);
    Json(serde_json::json!({ "closed": true }))
}

async fn mjpeg_stream_handler(State(state): State<SharedState>) -> Response {
    let boundary = "frame";

    let stream = IntervalStream::new(interval(Duration::from_millis(PREVIEW_INTERVAL_MS)))
        .map(move |_| {
            let preview = state
                .session
                .read()
                .as_ref()
                .and_then(|handle| handle.preview_frame());
            let jpeg = preview.and_then(|frame| encode_jpeg(&frame, PREVIEW_JPEG_QUALITY).ok());
            match jpeg {
                Some(jpeg_data) => {
                    let header = format!(
                        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        boundary,
                        jpeg_data.len()
                    );
                    let mut data = header.into_bytes();
                    data.extend_from_slice(&jpeg_data);
                    data.extend_from_slice(b"\r\n");
                    Ok::<_, std::convert::Infallible>(Bytes::from(data))
                }
                None => Ok(Bytes::new()),
            }
        });

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", boundary),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn index_handler(State(state): State<SharedState>) -> Html<String> {
    let options: String = state
        .engine
        .poses()
        .iter()
        .map(|p| format!(r#"<option value="{0}">{0}</option>"#, p.pose_id))
        .collect();

    Html(format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Guided Capture</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               background: #111; color: #ddd; display: flex; flex-direction: column;
               align-items: center; padding: 16px; }}
        #stream {{ max-height: 70vh; border-radius: 12px; background: #000; }}
        .controls {{ display: flex; gap: 12px; margin: 16px 0; flex-wrap: wrap; }}
        button {{ padding: 10px 20px; border: none; border-radius: 20px; background: #3b82f6;
                  color: white; cursor: pointer; }}
        .good {{ color: #22c55e; }} .warning {{ color: #eab308; }} .error {{ color: #ef4444; }}
    </style>
</head>
<body>
    <h1>Guided Capture</h1>
    <div class="controls">
        <select id="pose">{options}</select>
        <button onclick="openSession()">Open</button>
        <button onclick="post('/facing/switch')">Switch camera</button>
        <button onclick="post('/close')">Close</button>
    </div>
    <img id="stream" src="/stream" alt="Live preview">
    <div class="controls">
        <label>Zoom <input type="range" min="1" max="3" step="0.1" value="1"
               onchange="post('/zoom/' + this.value)"></label>
        <label>Exposure <input type="range" min="-2" max="2" step="0.1" value="0"
               onchange="post('/exposure/' + this.value)"></label>
        <button onclick="capture()">Capture</button>
    </div>
    <div id="status">analyzing...</div>
    <script>
        async function post(path) {{ return fetch(path, {{ method: 'POST' }}); }}
        async function openSession() {{
            await post('/session/' + document.getElementById('pose').value);
            document.getElementById('stream').src = '/stream?' + Date.now();
        }}
        async function capture() {{
            const res = await post('/capture?force=true');
            if (!res.ok) return;
            const name = (res.headers.get('Content-Disposition') || '').split('"')[1] || 'capture.jpg';
            const link = document.createElement('a');
            link.href = URL.createObjectURL(await res.blob());
            link.download = name;
            link.click();
        }}
        setInterval(async () => {{
            try {{
                const res = await fetch('/readiness');
                if (!res.ok) {{ document.getElementById('status').textContent = 'no live session'; return; }}
                const data = await res.json();
                const r = data.readiness;
                document.getElementById('status').innerHTML =
                    `<b>${{data.pose.instruction_text}}</b><br>` +
                    `score ${{r.score}} ${{r.may_capture ? '(ready)' : ''}} &middot; ` +
                    `brightness <span class="${{r.brightness_status}}">${{r.brightness_status}}</span> &middot; ` +
                    `sharpness <span class="${{r.sharpness_status}}">${{r.sharpness_status}}</span> &middot; ` +
                    `framing <span class="${{r.framing_status}}">${{r.framing_status}}</span> &middot; ` +
                    `subject ${{r.subject_present ? 'yes' : 'no'}}<br>${{r.messages.join(', ')}}`;
            }} catch (e) {{}}
        }}, 500);
    </script>
</body>
</html>"##,
        options = options
    ))
}
