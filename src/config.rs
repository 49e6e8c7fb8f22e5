use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "sitewatch.db";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8650";
const DEFAULT_FRAME_WIDTH: u32 = crate::frame::DEFAULT_WIDTH;
const DEFAULT_FRAME_HEIGHT: u32 = crate::frame::DEFAULT_HEIGHT;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_DEBOUNCE_SECS: u64 = crate::storage::DEFAULT_DEBOUNCE_S;
const DEFAULT_ALARM_REPEATS: u32 = 3;
const DEFAULT_ALARM_PLAYER: &str = "aplay";
const DEFAULT_FIRE_CONFIDENCE: f32 = crate::detect::fire::DEFAULT_MODEL_CONFIDENCE;
const DEFAULT_FIRE_CONFIRM_SECS: u64 = 1;
const DEFAULT_GEAR_CONFIDENCE: f32 = crate::detect::gear::DEFAULT_CONFIDENCE;
const DEFAULT_POSE_HOLD_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct SitewatchConfigFile {
    db_path: Option<String>,
    listen_addr: Option<String>,
    video: Option<VideoConfigFile>,
    alerts: Option<AlertConfigFile>,
    detect: Option<DetectConfigFile>,
    sms: Option<SmsConfigFile>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    debounce_secs: Option<u64>,
    sound_path: Option<PathBuf>,
    sound_repeats: Option<u32>,
    sound_player: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectConfigFile {
    fire_confidence: Option<f32>,
    fire_confirm_secs: Option<u64>,
    gear_confidence: Option<f32>,
    gear_class_ids: Option<Vec<u32>>,
    pose_hold_secs: Option<u64>,
    person_model: Option<PathBuf>,
    gear_model: Option<PathBuf>,
    fire_model: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SmsConfigFile {
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    to_number: Option<String>,
    api_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SitewatchConfig {
    pub db_path: String,
    pub listen_addr: String,
    pub video: VideoSettings,
    pub alerts: AlertSettings,
    pub detect: DetectSettings,
    pub sms: Option<SmsSettings>,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub debounce: Duration,
    pub sound_path: Option<PathBuf>,
    pub sound_repeats: u32,
    pub sound_player: String,
}

#[derive(Debug, Clone)]
pub struct DetectSettings {
    pub fire_confidence: f32,
    pub fire_confirm: Duration,
    pub gear_confidence: f32,
    pub gear_class_ids: Vec<u32>,
    pub pose_hold: Duration,
    pub person_model: Option<PathBuf>,
    pub gear_model: Option<PathBuf>,
    pub fire_model: Option<PathBuf>,
}

/// Twilio-compatible SMS credentials. Absent means SMS is disabled.
#[derive(Debug, Clone)]
pub struct SmsSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
    pub api_base: Option<String>,
}

impl SitewatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SITEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SitewatchConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let listen_addr = file
            .listen_addr
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let video = VideoSettings {
            width: file
                .video
                .as_ref()
                .and_then(|video| video.width)
                .unwrap_or(DEFAULT_FRAME_WIDTH),
            height: file
                .video
                .as_ref()
                .and_then(|video| video.height)
                .unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: file
                .video
                .as_ref()
                .and_then(|video| video.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
        };
        let alerts = AlertSettings {
            debounce: Duration::from_secs(
                file.alerts
                    .as_ref()
                    .and_then(|alerts| alerts.debounce_secs)
                    .unwrap_or(DEFAULT_DEBOUNCE_SECS),
            ),
            sound_path: file.alerts.as_ref().and_then(|alerts| alerts.sound_path.clone()),
            sound_repeats: file
                .alerts
                .as_ref()
                .and_then(|alerts| alerts.sound_repeats)
                .unwrap_or(DEFAULT_ALARM_REPEATS),
            sound_player: file
                .alerts
                .and_then(|alerts| alerts.sound_player)
                .unwrap_or_else(|| DEFAULT_ALARM_PLAYER.to_string()),
        };
        let detect = DetectSettings {
            fire_confidence: file
                .detect
                .as_ref()
                .and_then(|detect| detect.fire_confidence)
                .unwrap_or(DEFAULT_FIRE_CONFIDENCE),
            fire_confirm: Duration::from_secs(
                file.detect
                    .as_ref()
                    .and_then(|detect| detect.fire_confirm_secs)
                    .unwrap_or(DEFAULT_FIRE_CONFIRM_SECS),
            ),
            gear_confidence: file
                .detect
                .as_ref()
                .and_then(|detect| detect.gear_confidence)
                .unwrap_or(DEFAULT_GEAR_CONFIDENCE),
            gear_class_ids: file
                .detect
                .as_ref()
                .and_then(|detect| detect.gear_class_ids.clone())
                .unwrap_or_default(),
            pose_hold: Duration::from_secs(
                file.detect
                    .as_ref()
                    .and_then(|detect| detect.pose_hold_secs)
                    .unwrap_or(DEFAULT_POSE_HOLD_SECS),
            ),
            person_model: file.detect.as_ref().and_then(|detect| detect.person_model.clone()),
            gear_model: file.detect.as_ref().and_then(|detect| detect.gear_model.clone()),
            fire_model: file.detect.and_then(|detect| detect.fire_model),
        };
        let sms = file.sms.and_then(sms_from_file);
        Self {
            db_path,
            listen_addr,
            video,
            alerts,
            detect,
            sms,
            font_path: file.font_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SITEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("SITEWATCH_LISTEN_ADDR") {
            if !addr.trim().is_empty() {
                self.listen_addr = addr;
            }
        }
        if let Ok(debounce) = std::env::var("SITEWATCH_DEBOUNCE_SECS") {
            let seconds: u64 = debounce.parse().map_err(|_| {
                anyhow!("SITEWATCH_DEBOUNCE_SECS must be an integer number of seconds")
            })?;
            self.alerts.debounce = Duration::from_secs(seconds);
        }
        if let Ok(path) = std::env::var("SITEWATCH_SOUND_PATH") {
            if !path.trim().is_empty() {
                self.alerts.sound_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SITEWATCH_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        // Credentials usually arrive through the environment, not the file.
        let sid = std::env::var("SITEWATCH_SMS_ACCOUNT_SID").ok();
        let token = std::env::var("SITEWATCH_SMS_AUTH_TOKEN").ok();
        let from = std::env::var("SITEWATCH_SMS_FROM").ok();
        let to = std::env::var("SITEWATCH_SMS_TO").ok();
        if let (Some(sid), Some(token), Some(from), Some(to)) = (sid, token, from, to) {
            self.sms = Some(SmsSettings {
                account_sid: sid,
                auth_token: token,
                from_number: from,
                to_number: to,
                api_base: self.sms.take().and_then(|sms| sms.api_base),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(anyhow!("video resolution must be non-zero"));
        }
        if self.video.target_fps == 0 {
            return Err(anyhow!("video target_fps must be greater than zero"));
        }
        if self.alerts.debounce.as_secs() == 0 {
            return Err(anyhow!("alert debounce must be greater than zero"));
        }
        for (name, value) in [
            ("fire_confidence", self.detect.fire_confidence),
            ("gear_confidence", self.detect.gear_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0.0, 1.0]", name));
            }
        }
        Ok(())
    }
}

fn sms_from_file(file: SmsConfigFile) -> Option<SmsSettings> {
    match (file.account_sid, file.auth_token, file.from_number, file.to_number) {
        (Some(account_sid), Some(auth_token), Some(from_number), Some(to_number)) => {
            Some(SmsSettings {
                account_sid,
                auth_token,
                from_number,
                to_number,
                api_base: file.api_base,
            })
        }
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<SitewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
