//! Per-snapshot glue between the core and its collaborators: reads the
//! area's override, runs the area monitor, persists the result and updates
//! the shared UI state.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::db::Db;
use crate::model::{OverrideState, SessionEvent, Snapshot};
use crate::monitor::{Monitors, Outcome};
use crate::state::SharedState;

/// What happened to one delivered snapshot.
#[derive(Debug)]
pub enum Ingested {
    /// Evaluated, persisted and published to shared state. `over` is the
    /// override the snapshot was evaluated under.
    Accepted { outcome: Outcome, over: OverrideState },
    /// Rejected by the core (sequence or invariant error); nothing stored.
    Skipped,
}

/// Process one snapshot for `area_id`. Core rejections are logged and the
/// snapshot is skipped. Storage failures are returned and the area's tracker
/// is rolled back, so memory never runs ahead of the database.
pub async fn handle_snapshot(
    db: &Db,
    shared: &SharedState,
    monitors: &mut Monitors,
    area_id: &str,
    snapshot: Snapshot,
) -> Result<Ingested> {
    let Some(monitor) = monitors.get_mut(area_id) else {
        warn!(area = %area_id, "snapshot for unknown area, skipping");
        shared
            .write()
            .await
            .record_error(format!("snapshot for unknown area '{area_id}'"));
        return Ok(Ingested::Skipped);
    };

    // One copy per evaluation: the command handler may replace the override
    // at any time, but never mid-evaluation.
    let over = shared
        .read()
        .await
        .override_for(area_id)
        .unwrap_or_default();

    let saved = monitor.tracker().clone();
    let outcome = match monitor.process(&snapshot, over) {
        Ok(o) => o,
        Err(e) => {
            warn!(area = %monitor.area_id(), ts = snapshot.timestamp, kind = ?e.kind(), "snapshot rejected: {e}");
            shared
                .write()
                .await
                .record_error(format!("{area_id}: snapshot rejected: {e}"));
            return Ok(Ingested::Skipped);
        }
    };

    let decision = &outcome.decision;
    debug!(
        area = %area_id,
        ts = decision.source_timestamp,
        irrigation_active = decision.irrigation_active,
        critical = decision.critical,
        alerts = decision.alerts.len(),
        "decision"
    );

    if let Err(e) = db
        .append(area_id, &snapshot, decision, over, outcome.event.as_ref())
        .await
    {
        monitor.restore_tracker(saved);
        return Err(e.context(format!("failed to store reading for area '{area_id}'")));
    }

    match &outcome.event {
        Some(SessionEvent::Opened(session)) => {
            info!(area = %area_id, start = session.start_timestamp, mode = over.mode(), "irrigation session opened");
        }
        Some(SessionEvent::Closed(session)) => {
            info!(
                area = %area_id,
                start = session.start_timestamp,
                end = ?session.end_timestamp,
                duration_sec = ?session.duration_secs,
                "irrigation session closed"
            );
        }
        None => {}
    }

    {
        let mut st = shared.write().await;
        st.record_decision(area_id, decision);
        if let Some(ev) = &outcome.event {
            st.record_session(area_id, ev);
        }
    }

    Ok(Ingested::Accepted { outcome, over })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AreaConfig;
    use crate::evaluator::{Evaluator, Thresholds};
    use crate::model::OverrideState;
    use crate::monitor::AreaMonitor;
    use crate::state::SystemState;
    use crate::tracker::SessionTracker;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn setup() -> (Db, SharedState, Monitors) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.upsert_area(&AreaConfig {
            area_id: "a1".into(),
            name: "North field".into(),
            relay_gpio_pin: None,
        })
        .await
        .unwrap();

        let shared: SharedState = Arc::new(RwLock::new(SystemState::new(&[(
            "a1".to_string(),
            "North field".to_string(),
        )])));

        let mut monitors = Monitors::new();
        monitors.insert(
            "a1".to_string(),
            AreaMonitor::with_tracker(
                "a1",
                Evaluator::new(Thresholds::default()).unwrap(),
                SessionTracker::new(),
            ),
        );

        (db, shared, monitors)
    }

    fn snap(ts: i64, moisture_pct: f64) -> Snapshot {
        Snapshot {
            timestamp: ts,
            moisture_pct,
            ph: 6.5,
            phosphorus_ok: true,
            potassium_ok: true,
        }
    }

    async fn ingest(
        db: &Db,
        shared: &SharedState,
        monitors: &mut Monitors,
        s: Snapshot,
    ) -> Ingested {
        handle_snapshot(db, shared, monitors, "a1", s).await.unwrap()
    }

    #[tokio::test]
    async fn session_persisted_across_edges() {
        let (db, shared, mut monitors) = setup().await;

        ingest(&db, &shared, &mut monitors, snap(100, 50.0)).await;
        ingest(&db, &shared, &mut monitors, snap(200, 20.0)).await;

        let open = db.open_session("a1").await.unwrap().unwrap();
        assert_eq!(open.start_ts, 200);
        assert_eq!(open.mode, "automatic");
        assert_eq!(shared.read().await.areas["a1"].open_since, Some(200));

        ingest(&db, &shared, &mut monitors, snap(260, 25.0)).await;
        ingest(&db, &shared, &mut monitors, snap(500, 55.0)).await;

        assert!(db.open_session("a1").await.unwrap().is_none());
        let sessions = db.list_sessions("a1", 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].end_ts, Some(500));
        assert_eq!(sessions[0].duration_sec, Some(300));
        assert_eq!(shared.read().await.areas["a1"].open_since, None);
    }

    #[tokio::test]
    async fn alerts_persisted_with_reading() {
        let (db, shared, mut monitors) = setup().await;
        ingest(&db, &shared, &mut monitors, snap(100, 80.0)).await;

        let alerts = db.list_alerts("a1", true, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "moisture_high");

        let last = db.last_decision("a1").await.unwrap().unwrap();
        assert!(last.critical);
        assert_eq!(last.source_timestamp, 100);
    }

    #[tokio::test]
    async fn manual_override_read_from_shared_state() {
        let (db, shared, mut monitors) = setup().await;
        shared
            .write()
            .await
            .set_override("a1", OverrideState::manual(true));

        let res = ingest(&db, &shared, &mut monitors, snap(100, 90.0)).await;
        match res {
            Ingested::Accepted { outcome, over } => {
                assert!(outcome.decision.irrigation_active);
                assert_eq!(over, OverrideState::manual(true));
            }
            Ingested::Skipped => panic!("expected accepted snapshot"),
        }
        let open = db.open_session("a1").await.unwrap().unwrap();
        assert_eq!(open.mode, "manual");
    }

    #[tokio::test]
    async fn out_of_order_snapshot_skipped_and_not_stored() {
        let (db, shared, mut monitors) = setup().await;
        ingest(&db, &shared, &mut monitors, snap(100, 20.0)).await;

        let res = ingest(&db, &shared, &mut monitors, snap(99, 50.0)).await;
        assert!(matches!(res, Ingested::Skipped));

        let last = db.last_decision("a1").await.unwrap().unwrap();
        assert_eq!(last.source_timestamp, 100);
        assert!(db.open_session("a1").await.unwrap().is_some());

        let st = shared.read().await;
        assert!(st.events.back().unwrap().detail.contains("out-of-order"));
    }

    #[tokio::test]
    async fn accepted_reports_override_used_for_evaluation() {
        let (db, shared, mut monitors) = setup().await;
        let res = ingest(&db, &shared, &mut monitors, snap(100, 50.0)).await;
        shared
            .write()
            .await
            .set_override("a1", OverrideState::manual(false));

        match res {
            Ingested::Accepted { over, .. } => assert_eq!(over, OverrideState::automatic()),
            Ingested::Skipped => panic!("expected accepted snapshot"),
        }
    }

    #[tokio::test]
    async fn failed_session_write_rolls_back_reading_and_tracker() {
        let (db, shared, mut monitors) = setup().await;
        sqlx::query(
            "CREATE TRIGGER fail_sessions BEFORE INSERT ON irrigation_sessions \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = handle_snapshot(&db, &shared, &mut monitors, "a1", snap(100, 20.0))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("disk full"), "got: {err:#}");

        let last = db.last_decision("a1").await.unwrap();
        let open = db.open_session("a1").await.unwrap();
        assert!(last.is_none());
        assert!(open.is_none());
        assert!(SessionTracker::resume(last, open.map(|r| r.session())).is_ok());
        assert!(monitors["a1"].tracker().last_decision().is_none());
        assert!(shared.read().await.areas["a1"].last_decision.is_none());

        sqlx::query("DROP TRIGGER fail_sessions")
            .execute(db.pool())
            .await
            .unwrap();

        let res = ingest(&db, &shared, &mut monitors, snap(200, 20.0)).await;
        match res {
            Ingested::Accepted { outcome, .. } => {
                assert!(matches!(outcome.event, Some(SessionEvent::Opened(_))))
            }
            Ingested::Skipped => panic!("expected accepted snapshot"),
        }

        let last = db.last_decision("a1").await.unwrap();
        let open = db.open_session("a1").await.unwrap().map(|r| r.session());
        let resumed = SessionTracker::resume(last, open).unwrap();
        assert_eq!(resumed.open_session().map(|s| s.start_timestamp), Some(200));
    }

    #[tokio::test]
    async fn unknown_area_skipped() {
        let (db, shared, mut monitors) = setup().await;
        let res = handle_snapshot(&db, &shared, &mut monitors, "zz", snap(1, 20.0))
            .await
            .unwrap();
        assert!(matches!(res, Ingested::Skipped));
    }
}
