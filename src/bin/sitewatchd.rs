//! sitewatchd - multi-hazard video monitoring daemon
//!
//! Serves annotated MJPEG streams over HTTP, one processing pipeline per
//! viewer connection. Camera registrations live in SQLite; alerts are
//! debounced, persisted with a snapshot, and fanned out to the alarm
//! player and the SMS gateway in the background.

use std::sync::{mpsc, Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use sitewatch::config::{DetectSettings, SitewatchConfig};
use sitewatch::detect::{
    FireDetector, GearDetector, ObjectModel, PoseAlert, RestrictedZoneDetector, StubPoseEstimator,
};
use sitewatch::notify::{
    AlarmSink, CommandAlarmSink, HttpSmsSender, NoopAlarmSink, NoopSmsSender, SmsSender,
};
use sitewatch::overlay::OverlayFont;
use sitewatch::storage::{
    AlertStore, CameraRecord, CameraStore, SqliteAlertStore, SqliteCameraStore,
};
use sitewatch::{
    AlertDispatcher, DetectorSet, EffectRunner, RegionConfig, ServerConfig, StreamServer,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring daemon (default).
    Run,
    /// Register or update a camera for a user.
    AddCamera {
        /// Camera identifier: a device digit, stub://..., or a stream host.
        #[arg(long)]
        cam_id: String,
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        fire: bool,
        #[arg(long)]
        pose: bool,
        #[arg(long)]
        restricted_zone: bool,
        #[arg(long)]
        safety_gear: bool,
        /// Restricted-zone region as JSON, e.g.
        /// {"kind":"polygon","points":[[0,0],[500,0],[500,400]]}
        #[arg(long)]
        region: Option<String>,
    },
    /// Remove a camera registration.
    RemoveCamera {
        #[arg(long)]
        cam_id: String,
        #[arg(long)]
        user_id: i64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = SitewatchConfig::load()?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(cfg),
        Command::AddCamera {
            cam_id,
            user_id,
            fire,
            pose,
            restricted_zone,
            safety_gear,
            region,
        } => add_camera(
            &cfg,
            cam_id,
            user_id,
            fire,
            pose,
            restricted_zone,
            safety_gear,
            region,
        ),
        Command::RemoveCamera { cam_id, user_id } => remove_camera(&cfg, &cam_id, user_id),
    }
}

fn run(cfg: SitewatchConfig) -> Result<()> {
    let alerts: Arc<Mutex<dyn AlertStore>> =
        Arc::new(Mutex::new(SqliteAlertStore::open(&cfg.db_path)?));
    let cameras: Arc<Mutex<dyn CameraStore>> =
        Arc::new(Mutex::new(SqliteCameraStore::open(&cfg.db_path)?));

    let sms: Arc<dyn SmsSender> = match cfg.sms.clone() {
        Some(settings) => Arc::new(HttpSmsSender::new(settings)),
        None => {
            log::warn!("no sms credentials configured, fire sms disabled");
            Arc::new(NoopSmsSender)
        }
    };
    let alarm: Arc<dyn AlarmSink> = match &cfg.alerts.sound_path {
        Some(path) => Arc::new(CommandAlarmSink::new(&cfg.alerts.sound_player, path)),
        None => {
            log::warn!("no alarm sound configured, alarm playback disabled");
            Arc::new(NoopAlarmSink)
        }
    };
    let dispatcher = Arc::new(AlertDispatcher::new(
        Arc::clone(&alerts),
        Arc::new(EffectRunner::spawn()),
        sms,
        alarm,
        cfg.alerts.debounce,
        cfg.alerts.sound_repeats,
    ));

    let font = match &cfg.font_path {
        Some(path) => match OverlayFont::load(path, 24.0) {
            Ok(font) => Some(Arc::new(font)),
            Err(err) => {
                log::warn!("overlay font unavailable, labels disabled: {:#}", err);
                None
            }
        },
        None => None,
    };

    let server_cfg = ServerConfig {
        addr: cfg.listen_addr.clone(),
        frame_width: cfg.video.width,
        frame_height: cfg.video.height,
        target_fps: cfg.video.target_fps,
    };
    let detect = cfg.detect.clone();
    let (model_width, model_height) = (cfg.video.width, cfg.video.height);
    let server = StreamServer::new(
        server_cfg,
        cameras,
        alerts,
        dispatcher,
        Box::new(move |camera| build_detectors(camera, &detect, model_width, model_height)),
        font,
    );
    let handle = server.spawn()?;
    log::info!("sitewatchd serving {} on {}", cfg.db_path, handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    log::info!("sitewatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping stream server...");
    handle.stop()?;
    Ok(())
}

fn build_detectors(
    camera: &CameraRecord,
    detect: &DetectSettings,
    model_width: u32,
    model_height: u32,
) -> Result<DetectorSet> {
    let mut set = DetectorSet::new();
    if camera.restricted_zone {
        let model = load_model(
            detect.person_model.as_deref(),
            "detect.person_model",
            model_width,
            model_height,
        )?;
        set.restricted_zone = Some(RestrictedZoneDetector::new(
            model,
            true,
            camera.region.clone(),
        ));
    }
    if camera.fire_detection {
        set.fire = Some(match detect.fire_model.as_deref() {
            Some(path) => FireDetector::with_model_confidence(
                load_model(Some(path), "detect.fire_model", model_width, model_height)?,
                true,
                detect.fire_confidence,
            ),
            None => FireDetector::with_segmentation(true, detect.fire_confirm),
        });
    }
    if camera.safety_gear_detection {
        let model = load_model(
            detect.gear_model.as_deref(),
            "detect.gear_model",
            model_width,
            model_height,
        )?;
        set.safety_gear = Some(
            GearDetector::new(model, true, detect.gear_class_ids.clone())
                .with_confidence(detect.gear_confidence),
        );
    }
    if camera.pose_alert {
        // No landmark backend is wired in yet; the state machine runs but
        // never sees raised hands.
        log::warn!("camera {} has pose alerts enabled, but this build has no pose estimator", camera.cam_id);
        set.pose = Some(
            PoseAlert::new(Box::new(StubPoseEstimator::new()), true)
                .with_hold(detect.pose_hold),
        );
    }
    Ok(set)
}

#[cfg(feature = "backend-tract")]
fn load_model(
    path: Option<&std::path::Path>,
    key: &str,
    width: u32,
    height: u32,
) -> Result<Box<dyn ObjectModel>> {
    let path = path.ok_or_else(|| anyhow!("{} must be set in the config file", key))?;
    Ok(Box::new(sitewatch::detect::TractModel::new(
        path, width, height,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(
    _path: Option<&std::path::Path>,
    key: &str,
    _width: u32,
    _height: u32,
) -> Result<Box<dyn ObjectModel>> {
    Err(anyhow!(
        "{} needs model inference, which requires the backend-tract feature",
        key
    ))
}

#[allow(clippy::too_many_arguments)]
fn add_camera(
    cfg: &SitewatchConfig,
    cam_id: String,
    user_id: i64,
    fire: bool,
    pose: bool,
    restricted_zone: bool,
    safety_gear: bool,
    region: Option<String>,
) -> Result<()> {
    sitewatch::validate_camera_id(&cam_id)?;
    let region: Option<RegionConfig> = region
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("parse --region json")?;
    let mut store = SqliteCameraStore::open(&cfg.db_path)?;
    store.upsert(&CameraRecord {
        cam_id: cam_id.clone(),
        user_id,
        fire_detection: fire,
        pose_alert: pose,
        restricted_zone,
        safety_gear_detection: safety_gear,
        region,
    })?;
    println!("camera {} registered for user {}", cam_id, user_id);
    Ok(())
}

fn remove_camera(cfg: &SitewatchConfig, cam_id: &str, user_id: i64) -> Result<()> {
    let mut store = SqliteCameraStore::open(&cfg.db_path)?;
    if store.remove(cam_id, user_id)? {
        println!("camera {} removed for user {}", cam_id, user_id);
    } else {
        println!("camera {} not found for user {}", cam_id, user_id);
    }
    Ok(())
}
