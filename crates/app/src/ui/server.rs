//! Actix Web preview server exposing the live feed and calibration status.
//!
//! The server runs on a dedicated thread with its own actix system so the
//! vision loop and UI thread never touch the async runtime.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use renderer_link::{CommandSink, TrackingAngles};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    calibration::{CalibrationStage, SessionHandle},
    telemetry,
    ui::preview::{FramePacket, SharedPacket},
};

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) latest: SharedPacket,
    pub(crate) session: SessionHandle,
    pub(crate) link: Arc<dyn CommandSink>,
}

/// Handle for the preview server thread.
#[derive(Default)]
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

#[derive(Serialize)]
struct AnglesSummary {
    left_horizontal: f64,
    left_vertical: f64,
    right_horizontal: f64,
    right_vertical: f64,
}

impl From<TrackingAngles> for AnglesSummary {
    fn from(angles: TrackingAngles) -> Self {
        Self {
            left_horizontal: angles.left_horizontal,
            left_vertical: angles.left_vertical,
            right_horizontal: angles.right_horizontal,
            right_vertical: angles.right_vertical,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    stage: CalibrationStage,
    detector: &'static str,
    renderer_connected: bool,
    tracking_enabled: bool,
    fov_deg: f64,
    angles: Option<AnglesSummary>,
    frame: Option<u64>,
}

impl StatusResponse {
    pub(crate) fn collect(state: &ServerState) -> Self {
        let frame = latest_frame(&state.latest).map(|packet| packet.sequence);
        Self {
            stage: state.session.stage(),
            detector: state.session.detector_kind().label(),
            renderer_connected: state.link.is_active(),
            tracking_enabled: state.session.tracking_enabled(),
            fov_deg: state.session.fov_deg(),
            angles: state.session.latest_angles().map(AnglesSummary::from),
            frame,
        }
    }
}

/// Spawn the preview server thread and return a handle that can stop it.
pub(crate) fn spawn_preview_server(
    addr: SocketAddr,
    latest: SharedPacket,
    session: SessionHandle,
    link: Arc<dyn CommandSink>,
) -> Result<PreviewServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("preview-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let state = web::Data::new(ServerState {
                latest,
                session,
                link,
            });
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .route("/frame.jpg", web::get().to(frame_handler))
                    .route("/stream.mjpg", web::get().to(stream_handler))
                    .route("/status", web::get().to(status_handler))
                    .route("/metrics", web::get().to(metrics_handler))
            })
            .workers(1)
            .bind(addr)?
            .run();

            info!("HTTP preview available at http://{addr}/frame.jpg and /stream.mjpg");

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

fn latest_frame(shared: &SharedPacket) -> Option<FramePacket> {
    match shared.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

/// Return the latest JPEG frame.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    match latest_frame(&state.latest) {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header(("X-Sequence", packet.sequence.to_string()))
            .append_header(("X-Detector", packet.detector))
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream the MJPEG feed over a multipart response.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(33));
        let mut last_sent = None;
        loop {
            interval.tick().await;
            let Some(packet) = latest_frame(&state.latest) else {
                continue;
            };
            if last_sent == Some(packet.sequence) {
                continue;
            }
            last_sent = Some(packet.sequence);
            let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
            payload.extend_from_slice(b"--frame\r\n");
            payload.extend_from_slice(format!("X-Sequence: {}\r\n", packet.sequence).as_bytes());
            payload.extend_from_slice(
                format!("X-Timestamp: {}\r\n", packet.timestamp_ms).as_bytes(),
            );
            payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            payload.extend_from_slice(&packet.jpeg);
            payload.extend_from_slice(b"\r\n");
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Calibration stage, link state and the latest tracking angles as JSON.
async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse::collect(&state))
}

/// Prometheus text exposition of the process metrics.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test_support::RecordingSink;

    #[test]
    fn status_reflects_session_and_link() {
        let session = SessionHandle::new();
        session.set_stage(CalibrationStage::FovCapture);
        session.set_fov_deg(55.0);
        let latest: SharedPacket = Arc::new(Mutex::new(Some(FramePacket {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            sequence: 7,
            timestamp_ms: 0,
            detector: "marker",
        })));
        let state = ServerState {
            latest,
            session,
            link: Arc::new(RecordingSink::connected()),
        };

        let json = serde_json::to_value(StatusResponse::collect(&state)).unwrap();
        assert_eq!(json["stage"], "fov_capture");
        assert_eq!(json["detector"], "marker");
        assert_eq!(json["renderer_connected"], true);
        assert_eq!(json["fov_deg"], 55.0);
        assert_eq!(json["frame"], 7);
        assert!(json["angles"].is_null());
    }
}
