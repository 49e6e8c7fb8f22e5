//! Alert and camera stores.
//!
//! Each store is a trait with a SQLite implementation for production and
//! an in-memory implementation for tests. The alert store owns the
//! debounce decision: `try_record` performs the latest-alert lookup and
//! the conditional insert inside one immediate transaction, so two streams
//! racing on the same `(alert_type, user_id)` produce at most one row per
//! debounce window.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::RegionConfig;

/// Debounce window: at most one alert per `(alert_type, user_id)` per minute.
pub const DEFAULT_DEBOUNCE_S: u64 = 60;

// -------------------- Alert store --------------------

/// A persisted alert with its annotated-frame snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertRecord {
    pub id: i64,
    pub user_id: i64,
    pub alert_type: String,
    pub created_at: u64,
    pub snapshot: Vec<u8>,
}

pub trait AlertStore: Send {
    /// Timestamp of the most recent alert of this type for this user.
    fn latest_at(&mut self, alert_type: &str, user_id: i64) -> Result<Option<u64>>;

    /// Record an alert unless one of the same `(alert_type, user_id)` exists
    /// within the last `window_s` seconds. Returns whether a row was
    /// inserted. The check and insert are one atomic unit.
    fn try_record(
        &mut self,
        alert_type: &str,
        user_id: i64,
        now_s: u64,
        window_s: u64,
        snapshot: &[u8],
    ) -> Result<bool>;

    /// Most recent alerts for a user, newest first.
    fn recent(&mut self, user_id: i64, limit: usize) -> Result<Vec<AlertRecord>>;

    /// Delete one alert owned by the user. Returns whether a row existed.
    fn remove(&mut self, id: i64, user_id: i64) -> Result<bool>;
}

pub struct SqliteAlertStore {
    conn: Connection,
}

impl SqliteAlertStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open alert store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER NOT NULL,
              alert_type TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              snapshot BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_type_user_time
              ON alerts(alert_type, user_id, created_at);
            "#,
        )?;
        Ok(())
    }
}

impl AlertStore for SqliteAlertStore {
    fn latest_at(&mut self, alert_type: &str, user_id: i64) -> Result<Option<u64>> {
        let latest: Option<i64> = self
            .conn
            .query_row(
                "SELECT created_at FROM alerts
                 WHERE alert_type = ?1 AND user_id = ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![alert_type, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(latest.map(|t| t as u64))
    }

    fn try_record(
        &mut self,
        alert_type: &str,
        user_id: i64,
        now_s: u64,
        window_s: u64,
        snapshot: &[u8],
    ) -> Result<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest: Option<i64> = tx
            .query_row(
                "SELECT created_at FROM alerts
                 WHERE alert_type = ?1 AND user_id = ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![alert_type, user_id],
                |row| row.get(0),
            )
            .optional()?;

        let within_window = latest
            .map(|t| now_s.saturating_sub(t as u64) <= window_s)
            .unwrap_or(false);
        if within_window {
            tx.commit()?;
            return Ok(false);
        }

        let created_at = i64::try_from(now_s).map_err(|_| anyhow!("timestamp exceeds i64"))?;
        tx.execute(
            "INSERT INTO alerts(user_id, alert_type, created_at, snapshot)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, alert_type, created_at, snapshot],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn recent(&mut self, user_id: i64, limit: usize) -> Result<Vec<AlertRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, alert_type, created_at, snapshot FROM alerts
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![user_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: i64 = row.get(3)?;
            out.push(AlertRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                alert_type: row.get(2)?,
                created_at: created_at as u64,
                snapshot: row.get(4)?,
            });
        }
        Ok(out)
    }

    fn remove(&mut self, id: i64, user_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM alerts WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }
}

/// In-memory alert store for tests.
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: Vec<AlertRecord>,
    next_id: i64,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl AlertStore for InMemoryAlertStore {
    fn latest_at(&mut self, alert_type: &str, user_id: i64) -> Result<Option<u64>> {
        Ok(self
            .alerts
            .iter()
            .filter(|a| a.alert_type == alert_type && a.user_id == user_id)
            .map(|a| a.created_at)
            .max())
    }

    fn try_record(
        &mut self,
        alert_type: &str,
        user_id: i64,
        now_s: u64,
        window_s: u64,
        snapshot: &[u8],
    ) -> Result<bool> {
        let latest = self.latest_at(alert_type, user_id)?;
        let within_window = latest
            .map(|t| now_s.saturating_sub(t) <= window_s)
            .unwrap_or(false);
        if within_window {
            return Ok(false);
        }
        self.next_id += 1;
        self.alerts.push(AlertRecord {
            id: self.next_id,
            user_id,
            alert_type: alert_type.to_string(),
            created_at: now_s,
            snapshot: snapshot.to_vec(),
        });
        Ok(true)
    }

    fn recent(&mut self, user_id: i64, limit: usize) -> Result<Vec<AlertRecord>> {
        let mut out: Vec<_> = self
            .alerts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        out.truncate(limit);
        Ok(out)
    }

    fn remove(&mut self, id: i64, user_id: i64) -> Result<bool> {
        let before = self.alerts.len();
        self.alerts.retain(|a| !(a.id == id && a.user_id == user_id));
        Ok(self.alerts.len() < before)
    }
}

// -------------------- Camera store --------------------

/// Per-camera detector configuration, read once per viewer connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub cam_id: String,
    pub user_id: i64,
    pub fire_detection: bool,
    pub pose_alert: bool,
    pub restricted_zone: bool,
    pub safety_gear_detection: bool,
    pub region: Option<RegionConfig>,
}

pub trait CameraStore: Send {
    fn get(&mut self, cam_id: &str, user_id: i64) -> Result<Option<CameraRecord>>;

    fn upsert(&mut self, camera: &CameraRecord) -> Result<()>;

    fn remove(&mut self, cam_id: &str, user_id: i64) -> Result<bool>;

    fn list(&mut self, user_id: i64) -> Result<Vec<CameraRecord>>;
}

pub struct SqliteCameraStore {
    conn: Connection,
}

impl SqliteCameraStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open camera store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS cameras (
              cam_id TEXT NOT NULL,
              user_id INTEGER NOT NULL,
              fire_detection INTEGER NOT NULL DEFAULT 0,
              pose_alert INTEGER NOT NULL DEFAULT 0,
              restricted_zone INTEGER NOT NULL DEFAULT 0,
              safety_gear_detection INTEGER NOT NULL DEFAULT 0,
              region_json TEXT,
              PRIMARY KEY (cam_id, user_id)
            );
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(CameraRecord, Option<String>)> {
        Ok((
            CameraRecord {
                cam_id: row.get(0)?,
                user_id: row.get(1)?,
                fire_detection: row.get::<_, i64>(2)? != 0,
                pose_alert: row.get::<_, i64>(3)? != 0,
                restricted_zone: row.get::<_, i64>(4)? != 0,
                safety_gear_detection: row.get::<_, i64>(5)? != 0,
                region: None,
            },
            row.get(6)?,
        ))
    }

    fn attach_region(pair: (CameraRecord, Option<String>)) -> Result<CameraRecord> {
        let (mut record, region_json) = pair;
        if let Some(json) = region_json {
            record.region =
                Some(serde_json::from_str(&json).context("parse camera region json")?);
        }
        Ok(record)
    }
}

impl CameraStore for SqliteCameraStore {
    fn get(&mut self, cam_id: &str, user_id: i64) -> Result<Option<CameraRecord>> {
        let pair = self
            .conn
            .query_row(
                "SELECT cam_id, user_id, fire_detection, pose_alert, restricted_zone,
                        safety_gear_detection, region_json
                 FROM cameras WHERE cam_id = ?1 AND user_id = ?2",
                params![cam_id, user_id],
                Self::row_to_record,
            )
            .optional()?;
        pair.map(Self::attach_region).transpose()
    }

    fn upsert(&mut self, camera: &CameraRecord) -> Result<()> {
        let region_json = camera
            .region
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("serialize camera region")?;
        self.conn.execute(
            "INSERT INTO cameras(cam_id, user_id, fire_detection, pose_alert,
                                 restricted_zone, safety_gear_detection, region_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(cam_id, user_id) DO UPDATE SET
               fire_detection = excluded.fire_detection,
               pose_alert = excluded.pose_alert,
               restricted_zone = excluded.restricted_zone,
               safety_gear_detection = excluded.safety_gear_detection,
               region_json = excluded.region_json",
            params![
                camera.cam_id,
                camera.user_id,
                camera.fire_detection as i64,
                camera.pose_alert as i64,
                camera.restricted_zone as i64,
                camera.safety_gear_detection as i64,
                region_json,
            ],
        )?;
        Ok(())
    }

    fn remove(&mut self, cam_id: &str, user_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM cameras WHERE cam_id = ?1 AND user_id = ?2",
            params![cam_id, user_id],
        )?;
        Ok(changed > 0)
    }

    fn list(&mut self, user_id: i64) -> Result<Vec<CameraRecord>> {
        let pairs = {
            let mut stmt = self.conn.prepare(
                "SELECT cam_id, user_id, fire_detection, pose_alert, restricted_zone,
                        safety_gear_detection, region_json
                 FROM cameras WHERE user_id = ?1 ORDER BY cam_id",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut pairs = Vec::new();
            while let Some(row) = rows.next()? {
                pairs.push(Self::row_to_record(row)?);
            }
            pairs
        };
        pairs.into_iter().map(Self::attach_region).collect()
    }
}

/// In-memory camera store for tests.
#[derive(Debug, Default)]
pub struct InMemoryCameraStore {
    cameras: Vec<CameraRecord>,
}

impl InMemoryCameraStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CameraStore for InMemoryCameraStore {
    fn get(&mut self, cam_id: &str, user_id: i64) -> Result<Option<CameraRecord>> {
        Ok(self
            .cameras
            .iter()
            .find(|c| c.cam_id == cam_id && c.user_id == user_id)
            .cloned())
    }

    fn upsert(&mut self, camera: &CameraRecord) -> Result<()> {
        if let Some(existing) = self
            .cameras
            .iter_mut()
            .find(|c| c.cam_id == camera.cam_id && c.user_id == camera.user_id)
        {
            *existing = camera.clone();
        } else {
            self.cameras.push(camera.clone());
        }
        Ok(())
    }

    fn remove(&mut self, cam_id: &str, user_id: i64) -> Result<bool> {
        let before = self.cameras.len();
        self.cameras
            .retain(|c| !(c.cam_id == cam_id && c.user_id == user_id));
        Ok(self.cameras.len() < before)
    }

    fn list(&mut self, user_id: i64) -> Result<Vec<CameraRecord>> {
        let mut out: Vec<_> = self
            .cameras
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.cam_id.cmp(&b.cam_id));
        Ok(out)
    }
}
