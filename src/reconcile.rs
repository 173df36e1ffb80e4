//! Joins the directory index with the telemetry map and deduplicates the
//! result down to one canonical package per configuration class.

use crate::inventory::DeviceInfo;
use crate::telemetry::TelemetryRecord;
use std::collections::HashMap;
use tracing::info;

/// Canonical device ids are exactly this long after trimming.
const DEVICE_ID_LEN: usize = 16;

/// Signed settings of a fully provisioned device are exactly this long.
const SIGNED_FIELD_LEN: usize = 64;

/// One reconciled device configuration record, ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub device_no: String,
    pub group_id: i64,
    pub model_id: i64,
    pub group_names: String,
    pub model: String,
    pub sim: String,
    pub hw_version: String,
    pub laf_firmware: String,
    pub can_firmware: String,
    pub pl_sign: String,
    pub iot_settings_signed: String,
    pub coproc_setting: String,
}

impl Package {
    /// Composite identity used for deduplication: same group path, model,
    /// SIM and hardware version means the same configuration class.
    pub fn canonical_key(&self) -> String {
        format!(
            "{} / {} / {} / {}",
            self.group_names, self.model, self.sim, self.hw_version
        )
    }

    /// A record is complete when the coprocessor firmware name is a real
    /// value and all three signed fields have their full length.
    pub fn is_complete(&self) -> bool {
        self.can_firmware.len() > 10
            && self.iot_settings_signed.len() == SIGNED_FIELD_LEN
            && self.coproc_setting.len() == SIGNED_FIELD_LEN
            && self.pl_sign.len() == SIGNED_FIELD_LEN
    }
}

/// Joins devices with telemetry records on device id.
///
/// A device only produces a candidate when its trimmed id is exactly 16
/// characters and the telemetry map has an entry under the untrimmed id
/// (the map is keyed by the raw topic segment). The returned list is
/// sorted by lowercased canonical key for deterministic output.
pub fn build_candidates(
    devices: Vec<DeviceInfo>,
    records: &HashMap<String, TelemetryRecord>,
) -> Vec<Package> {
    let total = devices.len();
    let mut candidates = Vec::new();
    for device in devices {
        let trimmed = device.device_no.trim();
        if trimmed.len() != DEVICE_ID_LEN {
            continue;
        }
        let Some(record) = records.get(&device.device_no) else {
            continue;
        };
        candidates.push(Package {
            device_no: trimmed.to_string(),
            group_id: device.group_id,
            model_id: device.model_id,
            group_names: device.group_names.join(" / "),
            model: device.model,
            sim: record.sim.clone(),
            hw_version: record.hw_version.clone(),
            laf_firmware: record.laf_firmware.clone(),
            can_firmware: record.can_firmware.clone(),
            pl_sign: record.pl_sign.clone(),
            iot_settings_signed: record.iot_settings_signed.clone(),
            coproc_setting: record.coproc_setting.clone(),
        });
    }
    candidates.sort_by_key(|p| p.canonical_key().to_lowercase());
    info!(devices = total, candidates = candidates.len(), "join complete");
    candidates
}

/// Collapses candidates to one canonical package per key.
///
/// Selection starts at the first member of each group and is overwritten by
/// every complete member encountered, so the last complete record wins.
/// Groups whose selection has no group path or no coprocessor firmware are
/// dropped entirely.
pub fn dedup(candidates: Vec<Package>) -> Vec<Package> {
    let mut grouped: HashMap<String, Vec<Package>> = HashMap::new();
    for package in candidates {
        grouped
            .entry(package.canonical_key())
            .or_default()
            .push(package);
    }
    let groups = grouped.len();

    let mut canonical = Vec::new();
    for members in grouped.into_values() {
        let mut selected = &members[0];
        for member in &members {
            if member.is_complete() {
                selected = member;
            }
        }
        if selected.group_names.is_empty() || selected.can_firmware.is_empty() {
            continue;
        }
        canonical.push(selected.clone());
    }
    canonical.sort_by_key(|p| p.canonical_key().to_lowercase());
    info!(groups, canonical = canonical.len(), "dedup complete");
    canonical
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            device_no: id.to_string(),
            group_id: 7,
            group_names: vec!["depot-east".to_string()],
            model: "car_Acme_Zip".to_string(),
            model_id: 3,
        }
    }

    fn record() -> TelemetryRecord {
        TelemetryRecord {
            laf_firmware: "LAF_V1_X1".to_string(),
            can_firmware: "LAFCAN_V2".to_string(),
            hw_version: "V1X1".to_string(),
            sim: "AIRTEL".to_string(),
            iot_settings_signed: "i".repeat(64),
            coproc_setting: "c".repeat(64),
            pl_sign: "p".repeat(64),
        }
    }

    fn package(can_firmware: &str, signed_len: usize) -> Package {
        Package {
            device_no: "8618092350123456".to_string(),
            group_id: 7,
            model_id: 3,
            group_names: "depot-east".to_string(),
            model: "car_Acme_Zip".to_string(),
            sim: "AIRTEL".to_string(),
            hw_version: "V1X1".to_string(),
            laf_firmware: "LAF_V1_X1".to_string(),
            can_firmware: can_firmware.to_string(),
            pl_sign: "p".repeat(signed_len),
            iot_settings_signed: "i".repeat(signed_len),
            coproc_setting: "c".repeat(signed_len),
        }
    }

    #[test]
    fn join_requires_both_sides() {
        let mut records = HashMap::new();
        records.insert("8618092350123456".to_string(), record());

        let devices = vec![device("8618092350123456"), device("8618092350999999")];
        let candidates = build_candidates(devices, &records);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].device_no, "8618092350123456");

        // A record with no directory entry is never a candidate either.
        let candidates = build_candidates(vec![], &records);
        assert!(candidates.is_empty());
    }

    #[test]
    fn join_rejects_ids_that_are_not_sixteen_chars_trimmed() {
        let mut records = HashMap::new();
        records.insert("86180923501234".to_string(), record());
        records.insert("8618092350123456 ".to_string(), record());

        // Too short.
        assert!(build_candidates(vec![device("86180923501234")], &records).is_empty());
        // Sixteen after trimming qualifies; the lookup uses the raw id and
        // the package carries the trimmed one.
        let candidates = build_candidates(vec![device("8618092350123456 ")], &records);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].device_no, "8618092350123456");
    }

    #[test]
    fn join_looks_up_by_untrimmed_id() {
        // The record is keyed by the trimmed id but the device carries a
        // trailing space, so the lookup misses.
        let mut records = HashMap::new();
        records.insert("8618092350123456".to_string(), record());
        assert!(build_candidates(vec![device("8618092350123456 ")], &records).is_empty());
    }

    #[test]
    fn candidates_are_sorted_by_lowercased_key() {
        let mut records = HashMap::new();
        records.insert("8618092350123456".to_string(), record());
        records.insert("8618092350111111".to_string(), record());

        let mut upper = device("8618092350123456");
        upper.group_names = vec!["ZDepot".to_string()];
        let mut lower = device("8618092350111111");
        lower.group_names = vec!["adepot".to_string()];

        let candidates = build_candidates(vec![upper, lower], &records);
        assert_eq!(candidates[0].group_names, "adepot");
        assert_eq!(candidates[1].group_names, "ZDepot");
    }

    #[test]
    fn dedup_keeps_one_per_key() {
        let canonical = dedup(vec![package("LAFCAN_V2_LONG", 64); 3]);
        assert_eq!(canonical.len(), 1);
    }

    #[test]
    fn dedup_is_idempotent() {
        let canonical = dedup(vec![
            package("LAFCAN_V2_LONG", 64),
            package("LAFCAN_V2_LONG", 64),
        ]);
        let again = dedup(canonical.clone());
        assert_eq!(canonical, again);
    }

    #[test]
    fn complete_record_beats_partial_and_last_complete_wins() {
        let mut first_complete = package("LAFCAN_V2_LONG", 64);
        first_complete.laf_firmware = "first".to_string();
        let partial = package("LAFCAN_V2_LONG", 60);
        let mut last_complete = package("LAFCAN_V2_LONG", 64);
        last_complete.laf_firmware = "last".to_string();

        let canonical = dedup(vec![partial.clone(), first_complete, last_complete]);
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].laf_firmware, "last");

        // With only partials the first member stands.
        let canonical = dedup(vec![partial.clone(), partial]);
        assert_eq!(canonical[0].iot_settings_signed.len(), 60);
    }

    #[test]
    fn completeness_needs_long_firmware_and_full_signatures() {
        assert!(package("LAFCAN_V2_LONG", 64).is_complete());
        // Firmware name of exactly 10 chars is not enough.
        assert!(!package("ABCDEFGHIJ", 64).is_complete());
        assert!(!package("LAFCAN_V2_LONG", 63).is_complete());
    }

    #[test]
    fn degenerate_selections_are_dropped() {
        let mut no_firmware = package("", 64);
        no_firmware.laf_firmware = String::new();
        assert!(dedup(vec![no_firmware]).is_empty());

        let mut no_groups = package("LAFCAN_V2_LONG", 64);
        no_groups.group_names = String::new();
        assert!(dedup(vec![no_groups]).is_empty());
    }
}
