//! sitewatch - multi-hazard video monitoring pipeline
//!
//! This crate ingests live or file-based video streams, runs a configurable
//! set of independent hazard detectors over each frame, overlays the results
//! on the outgoing video, and raises deduplicated alerts with asynchronous
//! side effects (snapshot persistence, SMS, audible alarm).
//!
//! # Module Structure
//!
//! - `frame`: working-resolution RGB frames, JPEG encode/decode
//! - `ingest`: frame sources (HTTP MJPEG, V4L2 devices, stubs)
//! - `detect`: hazard detector adapters (restricted zone, fire, gear, pose)
//! - `tracker`: sticky per-hazard box persistence across non-firing frames
//! - `overlay`: pure overlay planning + rasterization
//! - `storage`: alert and camera stores (SQLite + in-memory)
//! - `dispatch`/`effects`/`notify`: alert deduplication and side effects
//! - `pipeline`: per-stream capture -> process -> emit orchestrator
//! - `server`: multipart/x-mixed-replace viewer surface

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod effects;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod overlay;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod tracker;

pub use detect::{Detection, HazardDetector};
pub use dispatch::AlertDispatcher;
pub use effects::EffectRunner;
pub use frame::{BBox, Frame};
pub use ingest::{resolve_source, FrameSource, HttpMjpegSource, StubSource};
pub use overlay::{overlay_plan, render_plan, DrawOp, OverlayState};
pub use pipeline::{DetectorSet, StreamPipeline};
pub use server::{ServerConfig, ServerHandle, StreamServer};
pub use storage::{
    AlertRecord, AlertStore, CameraRecord, CameraStore, InMemoryAlertStore, InMemoryCameraStore,
    SqliteAlertStore, SqliteCameraStore,
};
pub use tracker::PersistentBoxes;

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Hazard kinds --------------------

/// One of the independent hazard checks a stream can run.
///
/// The declaration order here is the fixed processing and overlay-layering
/// order: restricted zone, fire, gear, pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HazardKind {
    RestrictedZone,
    Fire,
    SafetyGear,
    Pose,
}

impl HazardKind {
    /// All kinds in processing order.
    pub const ALL: [HazardKind; 4] = [
        HazardKind::RestrictedZone,
        HazardKind::Fire,
        HazardKind::SafetyGear,
        HazardKind::Pose,
    ];

    /// Stable identifier used as the alert store's `alert_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            HazardKind::RestrictedZone => "restricted_zone",
            HazardKind::Fire => "fire",
            HazardKind::SafetyGear => "safety_gear",
            HazardKind::Pose => "pose",
        }
    }

    /// Human-readable name shown in the active-process banner.
    pub fn display_name(&self) -> &'static str {
        match self {
            HazardKind::RestrictedZone => "Restricted Zone Detection",
            HazardKind::Fire => "Fire Detection",
            HazardKind::SafetyGear => "Safety Gear Detection",
            HazardKind::Pose => "Pose Alert",
        }
    }
}

// -------------------- Region configuration --------------------

/// Restricted-zone region. The legacy camera schema stored a boolean here;
/// `Full` keeps that meaning (the whole frame is restricted) while
/// `Polygon` restricts violations to detections whose box center falls
/// inside the polygon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionConfig {
    Full,
    Polygon { points: Vec<[i32; 2]> },
}

impl RegionConfig {
    /// Whether pixel coordinates `(x, y)` fall inside the region.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        match self {
            RegionConfig::Full => true,
            RegionConfig::Polygon { points } => point_in_polygon(x, y, points),
        }
    }
}

/// Ray-casting point-in-polygon test on integer pixel coordinates.
fn point_in_polygon(x: i32, y: i32, points: &[[i32; 2]]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = (points[i][0] as f64, points[i][1] as f64);
        let (xj, yj) = (points[j][0] as f64, points[j][1] as f64);
        let (px, py) = (x as f64, y as f64);
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

// -------------------- Camera identifiers --------------------

/// Validates a camera identifier.
///
/// Identifiers are either a single-digit device index or a host[:port]
/// fragment used to build the stream URL. `stub://` identifiers are
/// accepted for tests and synthetic deployments.
pub fn validate_camera_id(cam_id: &str) -> Result<()> {
    if cam_id.is_empty() {
        return Err(anyhow!("camera id must not be empty"));
    }
    if cam_id.starts_with("stub://") {
        return Ok(());
    }
    static CAM_ID_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = CAM_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]*$").unwrap());
    if !re.is_match(cam_id) {
        return Err(anyhow!(
            "camera id '{}' contains invalid characters",
            cam_id
        ));
    }
    Ok(())
}
