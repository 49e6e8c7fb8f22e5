//! Outbound notification channels.
//!
//! SMS delivery and alarm playback sit behind traits so the dispatcher can
//! be exercised without network access or audio hardware. The recording
//! doubles exist for the same reason the in-memory stores do.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;

use crate::config::SmsSettings;

const DEFAULT_SMS_API_BASE: &str = "https://api.twilio.com";

/// Message body sent when a fire alert is recorded.
pub const FIRE_SMS_BODY: &str = "Fire detected! Please take immediate action.";

// -------------------- SMS --------------------

pub trait SmsSender: Send + Sync {
    /// Deliver one message. Returns the provider's message id.
    fn send(&self, body: &str) -> Result<String>;
}

/// Twilio-compatible sender: form-encoded POST to
/// `<api_base>/2010-04-01/Accounts/<sid>/Messages.json` with basic auth.
pub struct HttpSmsSender {
    settings: SmsSettings,
    agent: ureq::Agent,
}

impl HttpSmsSender {
    pub fn new(settings: SmsSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(10))
            .build();
        Self { settings, agent }
    }

    fn endpoint(&self) -> String {
        let base = self
            .settings
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_SMS_API_BASE);
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            base.trim_end_matches('/'),
            self.settings.account_sid
        )
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.settings.account_sid, self.settings.auth_token);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl SmsSender for HttpSmsSender {
    fn send(&self, body: &str) -> Result<String> {
        let response = self
            .agent
            .post(&self.endpoint())
            .set("Authorization", &self.auth_header())
            .send_form(&[
                ("From", self.settings.from_number.as_str()),
                ("To", self.settings.to_number.as_str()),
                ("Body", body),
            ])
            .context("sms request failed")?;

        let payload: serde_json::Value = response
            .into_json()
            .context("sms response was not valid json")?;
        payload
            .get("sid")
            .and_then(|sid| sid.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("sms response missing message sid"))
    }
}

/// Used when no SMS credentials are configured.
pub struct NoopSmsSender;

impl SmsSender for NoopSmsSender {
    fn send(&self, body: &str) -> Result<String> {
        log::info!("sms disabled, dropping message: {}", body);
        Ok("noop".to_string())
    }
}

/// Test double that records every body it was asked to send.
#[derive(Default)]
pub struct RecordingSmsSender {
    sent: Mutex<Vec<String>>,
}

impl RecordingSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl SmsSender for RecordingSmsSender {
    fn send(&self, body: &str) -> Result<String> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(body.to_string());
        }
        Ok("recorded".to_string())
    }
}

// -------------------- Alarm --------------------

pub trait AlarmSink: Send + Sync {
    /// Play the alarm asset `repeats` times, back to back.
    fn play(&self, repeats: u32) -> Result<()>;
}

/// Plays a sound file by shelling out to a player binary.
pub struct CommandAlarmSink {
    player: String,
    asset: PathBuf,
}

impl CommandAlarmSink {
    pub fn new(player: &str, asset: &Path) -> Self {
        Self {
            player: player.to_string(),
            asset: asset.to_path_buf(),
        }
    }
}

impl AlarmSink for CommandAlarmSink {
    fn play(&self, repeats: u32) -> Result<()> {
        for _ in 0..repeats {
            let status = Command::new(&self.player)
                .arg(&self.asset)
                .status()
                .with_context(|| format!("spawn alarm player {}", self.player))?;
            if !status.success() {
                return Err(anyhow!(
                    "alarm player {} exited with {}",
                    self.player,
                    status
                ));
            }
        }
        Ok(())
    }
}

/// Used when no alarm asset is configured.
pub struct NoopAlarmSink;

impl AlarmSink for NoopAlarmSink {
    fn play(&self, _repeats: u32) -> Result<()> {
        Ok(())
    }
}

/// Test double that records requested repeat counts.
#[derive(Default)]
pub struct RecordingAlarmSink {
    plays: Mutex<Vec<u32>>,
}

impl RecordingAlarmSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plays(&self) -> Vec<u32> {
        self.plays
            .lock()
            .map(|plays| plays.clone())
            .unwrap_or_default()
    }
}

impl AlarmSink for RecordingAlarmSink {
    fn play(&self, repeats: u32) -> Result<()> {
        if let Ok(mut plays) = self.plays.lock() {
            plays.push(repeats);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uses_custom_api_base() {
        let sender = HttpSmsSender::new(SmsSettings {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15550001".to_string(),
            to_number: "+15550002".to_string(),
            api_base: Some("http://127.0.0.1:9/".to_string()),
        });
        assert_eq!(
            sender.endpoint(),
            "http://127.0.0.1:9/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn auth_header_is_basic() {
        let sender = HttpSmsSender::new(SmsSettings {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15550001".to_string(),
            to_number: "+15550002".to_string(),
            api_base: None,
        });
        // "AC123:secret" in base64.
        assert_eq!(sender.auth_header(), "Basic QUMxMjM6c2VjcmV0");
    }

    #[test]
    fn recording_double_captures_bodies() {
        let sender = RecordingSmsSender::new();
        sender.send(FIRE_SMS_BODY).unwrap();
        assert_eq!(sender.sent(), vec![FIRE_SMS_BODY.to_string()]);
    }
}
