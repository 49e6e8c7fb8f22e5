//! Alert dispatch.
//!
//! The dispatcher is the single funnel between detectors and the outside
//! world. It snapshots the annotated frame, lets the store make the
//! debounce decision, and queues side effects on the background runner so
//! the frame loop never waits on audio or the network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::effects::EffectRunner;
use crate::frame::Frame;
use crate::notify::{AlarmSink, SmsSender, FIRE_SMS_BODY};
use crate::storage::AlertStore;
use crate::{now_s, HazardKind};

pub struct AlertDispatcher {
    store: Arc<Mutex<dyn AlertStore>>,
    effects: Arc<EffectRunner>,
    sms: Arc<dyn SmsSender>,
    alarm: Arc<dyn AlarmSink>,
    window: Duration,
    sound_repeats: u32,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<Mutex<dyn AlertStore>>,
        effects: Arc<EffectRunner>,
        sms: Arc<dyn SmsSender>,
        alarm: Arc<dyn AlarmSink>,
        window: Duration,
        sound_repeats: u32,
    ) -> Self {
        Self {
            store,
            effects,
            sms,
            alarm,
            window,
            sound_repeats,
        }
    }

    /// Report a hazard sighting. Returns whether a new alert was recorded;
    /// `false` means a recent alert of the same type already covers it.
    pub fn report(&self, kind: HazardKind, user_id: i64, frame: &Frame) -> Result<bool> {
        self.report_at(kind, user_id, frame, now_s()?)
    }

    pub fn report_at(
        &self,
        kind: HazardKind,
        user_id: i64,
        frame: &Frame,
        now_s: u64,
    ) -> Result<bool> {
        let snapshot = frame.to_jpeg()?;
        let inserted = {
            let mut store = self
                .store
                .lock()
                .map_err(|_| anyhow!("alert store lock poisoned"))?;
            store.try_record(kind.as_str(), user_id, now_s, self.window.as_secs(), &snapshot)?
        };
        if !inserted {
            log::debug!("alert {} for user {} debounced", kind.as_str(), user_id);
            return Ok(false);
        }

        log::info!("alert recorded: {} for user {}", kind.as_str(), user_id);

        let alarm = Arc::clone(&self.alarm);
        let repeats = self.sound_repeats;
        self.effects.submit(move || {
            if let Err(err) = alarm.play(repeats) {
                log::error!("alarm playback failed: {:#}", err);
            }
        });

        if kind == HazardKind::Fire {
            let sms = Arc::clone(&self.sms);
            self.effects.submit(move || match sms.send(FIRE_SMS_BODY) {
                Ok(sid) => log::info!("fire sms delivered, sid {}", sid),
                Err(err) => log::error!("fire sms failed: {:#}", err),
            });
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{RecordingAlarmSink, RecordingSmsSender};
    use crate::storage::InMemoryAlertStore;

    fn dispatcher(
        sms: Arc<RecordingSmsSender>,
        alarm: Arc<RecordingAlarmSink>,
    ) -> (AlertDispatcher, Arc<Mutex<dyn AlertStore>>) {
        let store: Arc<Mutex<dyn AlertStore>> = Arc::new(Mutex::new(InMemoryAlertStore::new()));
        let dispatcher = AlertDispatcher::new(
            Arc::clone(&store),
            Arc::new(EffectRunner::spawn()),
            sms,
            alarm,
            Duration::from_secs(60),
            3,
        );
        (dispatcher, store)
    }

    #[test]
    fn fire_alert_plays_alarm_and_sends_sms() {
        let sms = Arc::new(RecordingSmsSender::new());
        let alarm = Arc::new(RecordingAlarmSink::new());
        let (dispatcher, _store) = dispatcher(Arc::clone(&sms), Arc::clone(&alarm));

        let frame = Frame::solid(64, 48, [0, 0, 0]);
        assert!(dispatcher
            .report_at(HazardKind::Fire, 1, &frame, 1000)
            .unwrap());
        drop(dispatcher); // joins the effect worker

        assert_eq!(alarm.plays(), vec![3]);
        assert_eq!(sms.sent(), vec![FIRE_SMS_BODY.to_string()]);
    }

    #[test]
    fn non_fire_alert_skips_sms() {
        let sms = Arc::new(RecordingSmsSender::new());
        let alarm = Arc::new(RecordingAlarmSink::new());
        let (dispatcher, _store) = dispatcher(Arc::clone(&sms), Arc::clone(&alarm));

        let frame = Frame::solid(64, 48, [0, 0, 0]);
        assert!(dispatcher
            .report_at(HazardKind::SafetyGear, 1, &frame, 1000)
            .unwrap());
        drop(dispatcher);

        assert_eq!(alarm.plays(), vec![3]);
        assert!(sms.sent().is_empty());
    }

    #[test]
    fn debounced_report_triggers_no_side_effects() {
        let sms = Arc::new(RecordingSmsSender::new());
        let alarm = Arc::new(RecordingAlarmSink::new());
        let (dispatcher, store) = dispatcher(Arc::clone(&sms), Arc::clone(&alarm));

        let frame = Frame::solid(64, 48, [0, 0, 0]);
        assert!(dispatcher
            .report_at(HazardKind::Fire, 1, &frame, 1000)
            .unwrap());
        assert!(!dispatcher
            .report_at(HazardKind::Fire, 1, &frame, 1010)
            .unwrap());
        drop(dispatcher);

        assert_eq!(alarm.plays().len(), 1);
        assert_eq!(sms.sent().len(), 1);
        assert_eq!(
            store.lock().unwrap().latest_at("fire", 1).unwrap(),
            Some(1000)
        );
    }
}
