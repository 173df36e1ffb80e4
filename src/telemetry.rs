//! Telemetry-side aggregation over the MQTT bus.
//!
//! One bounded collection pass: subscribe to the `coprocstatus/+` and
//! `deviceinfo/+` patterns, patch per-device records as messages arrive,
//! stop on whichever of {interrupt signal, collection window} comes first.
//! The device id is the last topic segment and the second-to-last segment
//! selects the message schema.

use crate::config::MqttConfig;
use crate::firmware;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Firmware/configuration state accumulated for one device over the pass.
/// Fields stay empty until a message populates them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    pub laf_firmware: String,
    pub can_firmware: String,
    pub hw_version: String,
    pub sim: String,
    pub iot_settings_signed: String,
    pub coproc_setting: String,
    pub pl_sign: String,
}

/// Guarded per-device record map. The session loop only sees `apply`; the
/// map is exposed once, after the pass, via `into_records`.
#[derive(Debug, Default)]
pub struct Collector {
    records: Mutex<HashMap<String, TelemetryRecord>>,
}

impl Collector {
    /// Applies one message to the record keyed by the topic's device id.
    /// Malformed payloads are logged and dropped without touching the rest
    /// of the record.
    pub fn apply(&self, topic: &str, payload: &[u8]) {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() < 2 {
            warn!(topic, "topic too short, dropping message");
            return;
        }
        let device_id = segments[segments.len() - 1];
        let schema = segments[segments.len() - 2];

        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(device_id, schema, error = %e, "malformed payload, dropping message");
                return;
            }
        };

        let mut records = self.records.lock();
        let record = records.entry(device_id.to_string()).or_default();
        match schema {
            "coprocstatus" => apply_coproc_status(device_id, &value, record),
            "deviceinfo" => apply_device_info(&value, record),
            other => debug!(device_id, schema = other, "ignoring unknown schema"),
        }
    }

    pub fn into_records(self) -> HashMap<String, TelemetryRecord> {
        self.records.into_inner()
    }
}

/// `coprocstatus` schema: keys `"4"` (hex coproc firmware) and `"5"`
/// (payload signature) inside the nested `coprocStatusInfo` object.
fn apply_coproc_status(device_id: &str, value: &serde_json::Value, record: &mut TelemetryRecord) {
    let Some(info) = value.get("coprocStatusInfo").and_then(|v| v.as_object()) else {
        warn!(device_id, "coprocStatusInfo not available");
        return;
    };
    match info.get("4").and_then(|v| v.as_str()) {
        Some(hex_value) => record.can_firmware = firmware::decode_coproc_status(hex_value),
        None => warn!(device_id, "coproc status key '4' not found"),
    }
    if let Some(pl_sign) = info.get("5").and_then(|v| v.as_str()) {
        record.pl_sign = pl_sign.to_string();
    }
}

/// `deviceinfo` schema: `"15"` and `"9"` are signed settings (68-char
/// values carry a 4-char checksum suffix that is stripped); `"2"` is the
/// main firmware identifier and also derives the hardware version and,
/// first writer only, the SIM tag.
fn apply_device_info(value: &serde_json::Value, record: &mut TelemetryRecord) {
    if let Some(signed) = value.get("15").and_then(|v| v.as_str()) {
        record.iot_settings_signed = strip_checksum_suffix(signed);
    }
    if let Some(setting) = value.get("9").and_then(|v| v.as_str()) {
        record.coproc_setting = strip_checksum_suffix(setting);
    }
    if let Some(laf_firmware) = value.get("2").and_then(|v| v.as_str()) {
        record.laf_firmware = laf_firmware.to_string();
        let (hw_version, sim) = firmware::classify(laf_firmware);
        record.hw_version = hw_version;
        if record.sim.is_empty() {
            record.sim = sim;
        }
    }
}

/// Drops the fixed-width checksum suffix from 68-char signed settings;
/// every other length passes through unchanged.
fn strip_checksum_suffix(value: &str) -> String {
    if value.len() == 68 {
        value.get(..64).unwrap_or(value).to_string()
    } else {
        value.to_string()
    }
}

/// Runs one collection pass and returns the accumulated record map.
pub async fn collect(cfg: &MqttConfig) -> Result<HashMap<String, TelemetryRecord>> {
    let collector = Collector::default();

    let mut opts = MqttOptions::new("fleetpack-collector", &cfg.broker_host, cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(15));
    opts.set_clean_session(true);
    let (client, mut eventloop) = AsyncClient::new(opts, 64);

    let prefix = cfg.topic_prefix.trim_end_matches('/');
    for pattern in [
        format!("{prefix}/coprocstatus/+"),
        format!("{prefix}/deviceinfo/+"),
    ] {
        client
            .subscribe(&pattern, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribing to {pattern}"))?;
        info!(topic = %pattern, "subscribed");
    }

    let window = Duration::from_secs(cfg.collect_window_secs);
    info!(window_secs = cfg.collect_window_secs, "collecting telemetry");

    // First of {window, interrupt} ends the pass; the break guarantees the
    // stop fires once.
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("collection window elapsed, stopping");
                break;
            }
            _ = &mut interrupt => {
                info!("interrupt received, stopping collection");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    collector.apply(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }

    let records = collector.into_records();
    info!(devices = records.len(), "telemetry collection complete");
    Ok(records)
}
