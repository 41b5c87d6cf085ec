mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{Scenario, SoilSim};

/// The part of the hub's retained `status/<area_id>` message the node uses.
#[derive(Debug, Deserialize)]
struct HubStatus {
    irrigation_active: bool,
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn snapshot_topic(area_id: &str) -> String {
    format!("tele/{area_id}/snapshot")
}

fn status_topic(area_id: &str) -> String {
    format!("status/{area_id}")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let area_id = env::var("AREA_ID").unwrap_or_else(|_| "area-1".to_string());

    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    info!(area = %area_id, %scenario, sample_every_s, "soil simulator starting");

    let mut mqttoptions = MqttOptions::new(format!("soil-monitor-node-{area_id}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let status = status_topic(&area_id);
    client.subscribe(&status, QoS::AtLeastOnce).await?;

    // The hub's decisions drive the simulated pump.
    let irrigating = Arc::new(AtomicBool::new(false));
    let irrigating_rx = Arc::clone(&irrigating);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == status => {
                    match serde_json::from_slice::<HubStatus>(&p.payload) {
                        Ok(s) => {
                            let was = irrigating_rx.swap(s.irrigation_active, Ordering::Relaxed);
                            if was != s.irrigation_active {
                                info!(irrigation_active = s.irrigation_active, "hub status changed");
                            }
                        }
                        Err(e) => warn!("bad status json: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = snapshot_topic(&area_id);
    info!("publishing to topic: {topic}");

    let mut soil = SoilSim::new(scenario);

    loop {
        soil.set_irrigating(irrigating.load(Ordering::Relaxed));
        let msg = soil.sample(now_unix());
        let payload = serde_json::to_vec(&msg)?;

        if let Err(e) = client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            warn!("publish error: {e}");
        } else {
            debug!(
                ts = msg.ts,
                moisture_pct = msg.moisture_pct,
                ph = msg.ph,
                phosphorus_ok = msg.phosphorus_ok,
                potassium_ok = msg.potassium_ok,
                irrigating = soil.irrigating(),
                "published snapshot"
            );
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
