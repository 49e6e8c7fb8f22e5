//! HTTP stream server.
//!
//! Hand-rolled on `TcpListener`: a nonblocking accept loop owned by one
//! thread, one worker thread per connection. Video feeds are long-lived
//! multipart responses, so connections cannot share the accept thread.
//!
//! Routes:
//! - `GET /health` liveness probe
//! - `GET /video_feed/<cam_id>` annotated MJPEG stream for the viewer
//!   identified by the `X-User-Id` header
//! - `GET /alerts` recent alerts for the viewer, newest first
//! - `DELETE /alerts/<id>` dismiss one of the viewer's alerts

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::dispatch::AlertDispatcher;
use crate::ingest::FrameSource;
use crate::overlay::OverlayFont;
use crate::pipeline::{DetectorSet, StreamPipeline, MULTIPART_BOUNDARY};
use crate::storage::{AlertStore, CameraRecord, CameraStore};
use crate::validate_camera_id;

const MAX_REQUEST_BYTES: usize = 8192;
const ALERT_LISTING_LIMIT: usize = 20;

/// Builds the detector set for one viewer connection from the stored
/// camera flags. Each connection gets fresh detector state.
pub type DetectorFactory = dyn Fn(&CameraRecord) -> Result<DetectorSet> + Send + Sync;

/// Maps a camera identifier to a frame source. Swappable so tests can
/// serve scripted frames.
pub type SourceFactory = dyn Fn(&str, u32) -> Result<Box<dyn FrameSource>> + Send + Sync;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8650".to_string(),
            frame_width: crate::frame::DEFAULT_WIDTH,
            frame_height: crate::frame::DEFAULT_HEIGHT,
            target_fps: 10,
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("server thread panicked"))?;
        }
        Ok(())
    }
}

struct ServerContext {
    cfg: ServerConfig,
    cameras: Arc<Mutex<dyn CameraStore>>,
    alerts: Arc<Mutex<dyn AlertStore>>,
    dispatcher: Arc<AlertDispatcher>,
    detector_factory: Box<DetectorFactory>,
    source_factory: Box<SourceFactory>,
    font: Option<Arc<OverlayFont>>,
}

pub struct StreamServer {
    ctx: ServerContext,
}

impl StreamServer {
    pub fn new(
        cfg: ServerConfig,
        cameras: Arc<Mutex<dyn CameraStore>>,
        alerts: Arc<Mutex<dyn AlertStore>>,
        dispatcher: Arc<AlertDispatcher>,
        detector_factory: Box<DetectorFactory>,
        font: Option<Arc<OverlayFont>>,
    ) -> Self {
        Self {
            ctx: ServerContext {
                cfg,
                cameras,
                alerts,
                dispatcher,
                detector_factory,
                source_factory: Box::new(|identifier, fps| {
                    crate::ingest::resolve_source(identifier, fps)
                }),
                font,
            },
        }
    }

    /// Replace the camera-to-source mapping. Used by tests to stream
    /// scripted frames without a network camera.
    pub fn with_source_factory(mut self, factory: Box<SourceFactory>) -> Self {
        self.ctx.source_factory = factory;
        self
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self.ctx.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = Arc::new(self.ctx);
        let join = std::thread::spawn(move || {
            if let Err(err) = accept_loop(listener, ctx, shutdown_thread) {
                log::error!("stream server stopped: {:#}", err);
            }
        });

        log::info!("stream server listening on {}", addr);
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::warn!("request rejected: {:#}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct AlertSummary {
    id: i64,
    alert_type: String,
    created_at: u64,
    snapshot_bytes: usize,
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method == "DELETE" {
        if let Some(alert_id) = request.path.strip_prefix("/alerts/") {
            let alert_id = alert_id.to_string();
            return handle_alert_delete(&mut stream, ctx, &request, &alert_id);
        }
        write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
        return Ok(());
    }
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match request.path.as_str() {
        "/health" => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
            Ok(())
        }
        "/alerts" => handle_alerts(&mut stream, ctx, &request),
        path => {
            if let Some(cam_id) = path.strip_prefix("/video_feed/") {
                let cam_id = cam_id.to_string();
                handle_video_feed(&mut stream, ctx, &request, &cam_id)
            } else {
                write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
                Ok(())
            }
        }
    }
}

fn handle_alerts(stream: &mut TcpStream, ctx: &ServerContext, request: &HttpRequest) -> Result<()> {
    let user_id = match request.user_id() {
        Some(user_id) => user_id,
        None => {
            write_json_response(stream, 401, r#"{"error":"missing_user"}"#)?;
            return Ok(());
        }
    };
    let records = {
        let mut alerts = ctx
            .alerts
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        alerts.recent(user_id, ALERT_LISTING_LIMIT)?
    };
    let summaries: Vec<AlertSummary> = records
        .into_iter()
        .map(|record| AlertSummary {
            id: record.id,
            alert_type: record.alert_type,
            created_at: record.created_at,
            snapshot_bytes: record.snapshot.len(),
        })
        .collect();
    let payload = serde_json::to_vec(&summaries)?;
    write_response(stream, 200, "application/json", &payload)?;
    Ok(())
}

fn handle_alert_delete(
    stream: &mut TcpStream,
    ctx: &ServerContext,
    request: &HttpRequest,
    alert_id: &str,
) -> Result<()> {
    let alert_id: i64 = match alert_id.parse() {
        Ok(id) => id,
        Err(_) => {
            write_json_response(stream, 400, r#"{"error":"invalid_alert_id"}"#)?;
            return Ok(());
        }
    };
    let user_id = match request.user_id() {
        Some(user_id) => user_id,
        None => {
            write_json_response(stream, 401, r#"{"error":"missing_user"}"#)?;
            return Ok(());
        }
    };
    let removed = {
        let mut alerts = ctx
            .alerts
            .lock()
            .map_err(|_| anyhow!("alert store lock poisoned"))?;
        alerts.remove(alert_id, user_id)?
    };
    if removed {
        write_json_response(stream, 200, r#"{"removed":true}"#)?;
    } else {
        write_json_response(stream, 404, r#"{"error":"not_found"}"#)?;
    }
    Ok(())
}

fn handle_video_feed(
    stream: &mut TcpStream,
    ctx: &ServerContext,
    request: &HttpRequest,
    cam_id: &str,
) -> Result<()> {
    if validate_camera_id(cam_id).is_err() {
        write_json_response(stream, 400, r#"{"error":"invalid_camera_id"}"#)?;
        return Ok(());
    }
    let user_id = match request.user_id() {
        Some(user_id) => user_id,
        None => {
            write_json_response(stream, 401, r#"{"error":"missing_user"}"#)?;
            return Ok(());
        }
    };

    // Camera settings are read once per connection; reconfiguration
    // applies to the next stream.
    let camera = {
        let mut cameras = ctx
            .cameras
            .lock()
            .map_err(|_| anyhow!("camera store lock poisoned"))?;
        cameras.get(cam_id, user_id)?
    };
    let camera = match camera {
        Some(camera) => camera,
        None => {
            write_response(stream, 404, "text/plain", b"Camera details not found.")?;
            return Ok(());
        }
    };

    let detectors = (ctx.detector_factory)(&camera)?;
    let source = (ctx.source_factory)(cam_id, ctx.cfg.target_fps)?;
    let mut pipeline = StreamPipeline::new(
        source,
        detectors,
        Arc::clone(&ctx.dispatcher),
        user_id,
        ctx.cfg.frame_width,
        ctx.cfg.frame_height,
        ctx.font.clone(),
    );

    if let Err(err) = pipeline.connect() {
        log::warn!("camera {} unreachable: {:#}", cam_id, err);
        write_json_response(stream, 502, r#"{"error":"source_unavailable"}"#)?;
        return Ok(());
    }

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        MULTIPART_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    // Streams run far longer than the request read timeout.
    stream.set_read_timeout(None)?;

    log::info!("streaming camera {} for user {}", cam_id, user_id);
    pipeline.stream(stream)
}

struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    fn user_id(&self) -> Option<i64> {
        self.headers
            .get("x-user-id")
            .and_then(|value| value.parse().ok())
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        502 => "HTTP/1.1 502 Bad Gateway",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status_line,
        content_type,
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_header_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("x-user-id".to_string(), "7".to_string());
        let request = HttpRequest {
            method: "GET".to_string(),
            path: "/alerts".to_string(),
            headers,
        };
        assert_eq!(request.user_id(), Some(7));
    }

    #[test]
    fn malformed_user_id_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("x-user-id".to_string(), "not-a-number".to_string());
        let request = HttpRequest {
            method: "GET".to_string(),
            path: "/alerts".to_string(),
            headers,
        };
        assert_eq!(request.user_id(), None);
    }
}
