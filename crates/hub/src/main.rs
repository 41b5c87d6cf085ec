mod config;
mod db;
mod error;
mod evaluator;
mod ingest;
mod model;
mod monitor;
mod mqtt;
mod pump;
mod state;
mod tracker;
mod web;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use ingest::Ingested;
use monitor::{AreaMonitor, Monitors};
use mqtt::{
    extract_command_area, extract_snapshot_area, parse_override_command, publish_status,
    SnapshotMsg, COMMAND_FILTER, SNAPSHOT_FILTER,
};
use pump::PumpBoard;
use state::SystemState;
use tracker::SessionTracker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:soil.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (areas + thresholds) ────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    config::apply(&cfg, &db).await?;

    let areas = db.load_areas().await?;
    if areas.is_empty() {
        warn!("no areas configured in the database");
    }

    // ── Area monitors, resumed from persisted history ───────────────
    let mut monitors = Monitors::new();
    let mut area_names: Vec<(String, String)> = Vec::new();
    let mut area_to_gpio: Vec<(String, u8)> = Vec::new();

    for area in &areas {
        let Some(entry) = cfg.areas.iter().find(|a| a.area_id == area.area_id) else {
            warn!(area = %area.area_id, "area in database but not in config, not monitored");
            continue;
        };

        let last = db.last_decision(&area.area_id).await?;
        let open = db.open_session(&area.area_id).await?.map(|r| r.session());
        let tracker = SessionTracker::resume(last, open)
            .with_context(|| format!("area '{}': cannot resume from stored history", area.area_id))?;

        if let Some(s) = tracker.open_session() {
            info!(area = %area.area_id, start = s.start_timestamp, "resuming open irrigation session");
        }

        let evaluator = cfg.evaluator_for(entry)?;
        let t = evaluator.thresholds();
        info!(
            area = %area.area_id,
            moisture_low = t.moisture_low,
            moisture_high = t.moisture_high,
            ph_min = t.ph_min,
            ph_max = t.ph_max,
            "area monitored"
        );

        monitors.insert(
            area.area_id.clone(),
            AreaMonitor::with_tracker(area.area_id.clone(), evaluator, tracker),
        );
        area_names.push((area.area_id.clone(), area.name.clone()));

        if let Some(pin) = area.relay_gpio_pin {
            let pin = u8::try_from(pin)
                .with_context(|| format!("area '{}': invalid relay pin {pin}", area.area_id))?;
            area_to_gpio.push((area.area_id.clone(), pin));
        }
    }

    info!(areas = monitors.len(), pumps = area_to_gpio.len(), "db ready");

    // ── Pump relays ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let mut pumps = PumpBoard::new(&area_to_gpio, active_low)?;
    pumps.all_off();

    // ── Shared state (ephemeral, for the web API) ───────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&area_names)));
    {
        let mut st = shared.write().await;
        for (area_id, monitor) in &monitors {
            if let Some(area) = st.areas.get_mut(area_id) {
                area.last_decision = monitor.tracker().last_decision().cloned();
                area.open_since = monitor.tracker().open_session().map(|s| s.start_timestamp);
            }
        }
        st.record_system("hub started".to_string());
    }

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("soil-monitor-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    let web_db = db.clone();
    let web_mqtt = client.clone();
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_db, web_mqtt).await {
            error!("web server stopped: {e:#}");
        }
    });

    client.subscribe(SNAPSHOT_FILTER, QoS::AtLeastOnce).await?;
    client.subscribe(COMMAND_FILTER, QoS::AtLeastOnce).await?;
    info!("hub subscribed to {SNAPSHOT_FILTER} and {COMMAND_FILTER}");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let topic = p.topic.clone();

                if let Some(area_id) = extract_snapshot_area(&topic) {
                    let snapshot = match serde_json::from_slice::<SnapshotMsg>(&p.payload)
                        .map_err(|e| format!("bad snapshot json: {e}"))
                        .and_then(SnapshotMsg::into_snapshot)
                    {
                        Ok(s) => s,
                        Err(msg) => {
                            warn!(%topic, "{msg}");
                            shared.write().await.record_error(format!("{area_id}: {msg}"));
                            continue;
                        }
                    };

                    let (outcome, over) = match ingest::handle_snapshot(
                        &db,
                        &shared,
                        &mut monitors,
                        area_id,
                        snapshot,
                    )
                    .await
                    {
                        Ok(Ingested::Accepted { outcome, over }) => (outcome, over),
                        Ok(Ingested::Skipped) => continue,
                        Err(e) => {
                            error!(area = %area_id, "ingest failed: {e:#}");
                            shared
                                .write()
                                .await
                                .record_error(format!("{area_id}: ingest failed: {e}"));
                            continue;
                        }
                    };

                    let on = outcome.decision.irrigation_active;
                    if pumps.set(area_id, on) {
                        shared.write().await.record_pump(area_id, on);
                    }

                    publish_status(&client, area_id, &outcome.decision, over);
                } else if let Some(area_id) = extract_command_area(&topic) {
                    match parse_override_command(&p.payload) {
                        Ok(cmd) => {
                            let over = cmd.to_override();
                            let mut st = shared.write().await;
                            if st.set_override(area_id, over) {
                                info!(area = %area_id, mode = over.mode(), forced_active = ?over.forced_active, "override set via mqtt");
                                // The decision itself changes on the next snapshot.
                                if let Some((decision, current)) = st.status_of(area_id) {
                                    publish_status(&client, area_id, &decision, current);
                                }
                            } else {
                                warn!(area = %area_id, "override for unknown area ignored");
                            }
                        }
                        Err(msg) => {
                            warn!(%topic, "{msg} (use ON/OFF/AUTO)");
                            shared.write().await.record_error(msg);
                        }
                    }
                } else {
                    warn!(%topic, "unhandled topic");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                // Best-effort fail-safe: turn everything off on comms error
                pumps.all_off();

                let mut st = shared.write().await;
                st.mqtt_connected = false;
                for area in st.areas.values_mut() {
                    area.pump_on = false;
                }
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
