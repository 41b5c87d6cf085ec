use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::model::{Alert, AlertKind, Decision, OverrideState, Session, SessionEvent, Snapshot};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AreaConfig {
    pub area_id: String,
    pub name: String,
    pub relay_gpio_pin: Option<i64>,
}

/// A persisted irrigation session row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: i64,
    pub area_id: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
    pub duration_sec: Option<i64>,
    pub mode: String, // "automatic" | "manual"
}

impl SessionRecord {
    pub fn session(&self) -> Session {
        Session {
            start_timestamp: self.start_ts,
            end_timestamp: self.end_ts,
            duration_secs: self.duration_sec,
        }
    }
}

/// A persisted snapshot with the decision taken for it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReadingRecord {
    pub id: i64,
    pub area_id: String,
    pub ts: i64,
    pub moisture_pct: f64,
    pub ph: f64,
    pub phosphorus_ok: bool,
    pub potassium_ok: bool,
    pub needs_irrigation: bool,
    pub critical: bool,
    pub irrigation_active: bool,
    pub manual: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRecord {
    pub id: i64,
    pub area_id: String,
    pub ts: i64,
    pub kind: String,
    pub message: String,
    pub resolved: bool,
}

#[derive(sqlx::FromRow)]
struct DecisionRow {
    id: i64,
    ts: i64,
    needs_irrigation: bool,
    critical: bool,
    irrigation_active: bool,
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    kind: String,
    message: String,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/soil-monitor/soil.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // An in-memory database exists per connection, so tests need a
        // single shared one.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Areas
    // ----------------------------

    pub async fn upsert_area(&self, a: &AreaConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO areas (area_id, name, relay_gpio_pin)
            VALUES (?, ?, ?)
            ON CONFLICT(area_id) DO UPDATE SET
              name=excluded.name,
              relay_gpio_pin=excluded.relay_gpio_pin
            "#,
        )
        .bind(a.area_id.as_str())
        .bind(a.name.as_str())
        .bind(a.relay_gpio_pin)
        .execute(&self.pool)
        .await
        .context("upsert_area failed")?;
        Ok(())
    }

    pub async fn load_areas(&self) -> Result<Vec<AreaConfig>> {
        sqlx::query_as::<_, AreaConfig>(
            "SELECT area_id, name, relay_gpio_pin FROM areas ORDER BY area_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("load_areas failed")
    }

    // ----------------------------
    // Readings + decisions
    // ----------------------------

    /// Store a snapshot, its decision, the decision's alerts and the session
    /// edge it produced in one transaction. Returns the reading id.
    ///
    /// An opened session is recorded under `over`'s mode. A closed session
    /// must match the area's open row.
    pub async fn append(
        &self,
        area_id: &str,
        snapshot: &Snapshot,
        decision: &Decision,
        over: OverrideState,
        event: Option<&SessionEvent>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.context("append: begin failed")?;

        let reading_id = sqlx::query(
            r#"
            INSERT INTO readings (
              area_id, ts, moisture_pct, ph, phosphorus_ok, potassium_ok,
              needs_irrigation, critical, irrigation_active, manual
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(area_id)
        .bind(snapshot.timestamp)
        .bind(snapshot.moisture_pct)
        .bind(snapshot.ph)
        .bind(snapshot.phosphorus_ok)
        .bind(snapshot.potassium_ok)
        .bind(decision.needs_irrigation)
        .bind(decision.critical)
        .bind(decision.irrigation_active)
        .bind(over.is_manual)
        .execute(&mut *tx)
        .await
        .context("append: insert reading failed")?
        .last_insert_rowid();

        for alert in &decision.alerts {
            sqlx::query(
                r#"
                INSERT INTO alerts (reading_id, area_id, ts, kind, message)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(reading_id)
            .bind(area_id)
            .bind(decision.source_timestamp)
            .bind(alert.kind.as_str())
            .bind(alert.message.as_str())
            .execute(&mut *tx)
            .await
            .context("append: insert alert failed")?;
        }

        match event {
            Some(SessionEvent::Opened(session)) => {
                sqlx::query(
                    r#"
                    INSERT INTO irrigation_sessions (area_id, start_ts, mode)
                    VALUES (?, ?, ?)
                    "#,
                )
                .bind(area_id)
                .bind(session.start_timestamp)
                .bind(over.mode())
                .execute(&mut *tx)
                .await
                .context("append: open session failed")?;
            }
            Some(SessionEvent::Closed(Session {
                start_timestamp,
                end_timestamp: Some(end),
                duration_secs: Some(duration),
            })) => {
                let done = sqlx::query(
                    r#"
                    UPDATE irrigation_sessions
                    SET end_ts = ?, duration_sec = ?
                    WHERE area_id = ? AND start_ts = ? AND end_ts IS NULL
                    "#,
                )
                .bind(end)
                .bind(duration)
                .bind(area_id)
                .bind(start_timestamp)
                .execute(&mut *tx)
                .await
                .context("append: close session failed")?;

                if done.rows_affected() != 1 {
                    bail!("append: no open session for area '{area_id}' started at {start_timestamp}");
                }
            }
            Some(SessionEvent::Closed(session)) => {
                bail!("append: closed session has no end: {session:?}");
            }
            None => {}
        }

        tx.commit().await.context("append: commit failed")?;
        Ok(reading_id)
    }

    /// Most recent readings first.
    pub async fn list_readings(&self, area_id: &str, limit: i64) -> Result<Vec<ReadingRecord>> {
        sqlx::query_as::<_, ReadingRecord>(
            r#"
            SELECT id, area_id, ts, moisture_pct, ph, phosphorus_ok, potassium_ok,
                   needs_irrigation, critical, irrigation_active, manual
            FROM readings
            WHERE area_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(area_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_readings failed")
    }

    /// The most recent decision stored for an area, alerts included.
    pub async fn last_decision(&self, area_id: &str) -> Result<Option<Decision>> {
        let row = sqlx::query_as::<_, DecisionRow>(
            r#"
            SELECT id, ts, needs_irrigation, critical, irrigation_active
            FROM readings
            WHERE area_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(area_id)
        .fetch_optional(&self.pool)
        .await
        .context("last_decision failed")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let alert_rows = sqlx::query_as::<_, AlertRow>(
            "SELECT kind, message FROM alerts WHERE reading_id = ? ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .context("last_decision: load alerts failed")?;

        let mut alerts = Vec::with_capacity(alert_rows.len());
        for a in alert_rows {
            let Some(kind) = AlertKind::parse(&a.kind) else {
                bail!("reading {} has unknown alert kind '{}'", row.id, a.kind);
            };
            alerts.push(Alert {
                kind,
                message: a.message,
            });
        }

        Ok(Some(Decision {
            needs_irrigation: row.needs_irrigation,
            critical: row.critical,
            irrigation_active: row.irrigation_active,
            alerts,
            source_timestamp: row.ts,
        }))
    }

    // ----------------------------
    // Alerts
    // ----------------------------

    pub async fn list_alerts(
        &self,
        area_id: &str,
        unresolved_only: bool,
        limit: i64,
    ) -> Result<Vec<AlertRecord>> {
        sqlx::query_as::<_, AlertRecord>(
            r#"
            SELECT id, area_id, ts, kind, message, resolved
            FROM alerts
            WHERE area_id = ? AND (? = 0 OR resolved = 0)
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(area_id)
        .bind(unresolved_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_alerts failed")
    }

    /// Mark an alert resolved. Returns false if no unresolved alert has this id.
    pub async fn resolve_alert(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("UPDATE alerts SET resolved = 1 WHERE id = ? AND resolved = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("resolve_alert failed")?;
        Ok(done.rows_affected() > 0)
    }

    // ----------------------------
    // Irrigation sessions
    // ----------------------------

    pub async fn open_session(&self, area_id: &str) -> Result<Option<SessionRecord>> {
        sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT id, area_id, start_ts, end_ts, duration_sec, mode
            FROM irrigation_sessions
            WHERE area_id = ? AND end_ts IS NULL
            "#,
        )
        .bind(area_id)
        .fetch_optional(&self.pool)
        .await
        .context("open_session failed")
    }

    /// Most recent sessions first, open one included.
    pub async fn list_sessions(&self, area_id: &str, limit: i64) -> Result<Vec<SessionRecord>> {
        sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT id, area_id, start_ts, end_ts, duration_sec, mode
            FROM irrigation_sessions
            WHERE area_id = ?
            ORDER BY start_ts DESC
            LIMIT ?
            "#,
        )
        .bind(area_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_sessions failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
