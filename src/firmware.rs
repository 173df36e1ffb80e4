//! Firmware identifier decoding.
//!
//! The identifiers reported by devices encode the hardware revision and the
//! provisioned SIM/carrier, but there is no grammar behind them: the tables
//! below enumerate real SKU families and must be extended SKU by SKU.
//! Precedence between branches is load-bearing and must not be reordered.

use serde::Deserialize;
use tracing::warn;

/// Carrier assumed when the identifier carries no SIM marker at all.
const DEFAULT_SIM: &str = "AIRTEL";

/// Decodes a raw firmware identifier into `(hardware_version, sim_tag)`.
///
/// Identifiers come in two shapes: hyphen-delimited (modem SKUs, where the
/// second token names the modem family) and underscore-delimited (board
/// SKUs in the `LAF`/`LAFM`/`LA5` families). Anything that matches no known
/// shape yields `("NA", "NA")`.
pub fn classify(raw: &str) -> (String, String) {
    let parts: Vec<&str> = raw.split('-').collect();

    let mut sim = DEFAULT_SIM.to_string();
    if parts.len() > 6 {
        if parts[6] == "JIO2" {
            sim = "JIO2".to_string();
        } else if parts[6] != "BETA" {
            sim = parts[6].to_string();
        }
    }
    // Embedded carrier markers override the positional token. AUG is a
    // firmware build tag, not Australia.
    if raw.contains("S_MY") || raw.contains("S-MY") {
        sim = "S_MY".to_string();
    } else if raw.contains("_AU") && !raw.contains("AUG") {
        sim = "AU".to_string();
    }

    // Two SKUs are only recognizable by a literal marker.
    if raw.contains("PCB_IOT_NRF_SM") {
        return ("PCB-IOT-NRF-SM-30".to_string(), sim);
    }
    if raw.contains("LAFM_MINI_LG_V1_2") {
        return ("MINI-LG-V12".to_string(), sim);
    }

    let hardware = if parts.len() < 2 {
        board_family_version(raw)
    } else {
        modem_family_version(&parts)
    };

    match hardware {
        Some(hw) => (hw, sim),
        None => {
            warn!(identifier = raw, "unrecognized firmware identifier");
            ("NA".to_string(), "NA".to_string())
        }
    }
}

/// Underscore-delimited board SKUs (`LAF`, `LAFM`, `LA5` families).
fn board_family_version(raw: &str) -> Option<String> {
    let part: Vec<&str> = raw.split('_').collect();
    let at = |i: usize| part.get(i).copied();
    let is_numeric = |s: &str| s.parse::<i64>().is_ok();

    match at(0)? {
        "LAF" => match at(1)? {
            "V1" => Some(format!("{}{}", at(1)?, at(2)?)),
            "V2" => {
                // A short fourth token is a board sub-revision and is kept;
                // anything longer is a build qualifier and is dropped.
                if at(3)?.len() >= 2 {
                    Some(format!("{}{}", at(1)?, at(2)?))
                } else {
                    Some(format!("{}{}{}", at(1)?, at(2)?, at(3)?))
                }
            }
            "SFF" => Some("SFF-V1".to_string()),
            _ => Some(at(2)?.to_string()),
        },
        "LAFM" => match at(1)? {
            "4G" => {
                if is_numeric(at(3)?) {
                    Some(format!("{}{}", at(2)?, at(3)?))
                } else {
                    Some(at(2)?.to_string())
                }
            }
            "MINI" => {
                if is_numeric(at(3)?) {
                    Some(format!("MINI-{}{}", at(2)?, at(3)?))
                } else {
                    Some(format!("MINI{}", at(2)?))
                }
            }
            "2G" => Some("SFF-V2".to_string()),
            _ => {
                if is_numeric(at(3)?) {
                    Some(format!("{}{}", at(2)?, at(3)?))
                } else if at(3)? == "SFF" {
                    Some("SFF".to_string())
                } else {
                    Some(at(2)?.to_string())
                }
            }
        },
        "LA5" => Some("BASE-V20-LAYER2-V20".to_string()),
        _ => None,
    }
}

/// Hyphen-delimited modem SKUs, keyed by the second token. Checked in this
/// order; the `LAFMV2_4G` prefix case splits its second token again.
fn modem_family_version(parts: &[&str]) -> Option<String> {
    let second = *parts.get(1)?;
    if second == "4G_EC200UCN" || second == "4G_EG21G" {
        Some(parts.get(2)?.to_string())
    } else if second == "2G_MC60" {
        Some(format!("{}-V2", parts.get(2)?))
    } else if second == "4G_EC200UEU" {
        Some(parts.get(2)?.to_string())
    } else if second == "2G_MC60_SFF" {
        Some("SFF-V2".to_string())
    } else if parts[0] == "LAFMV2_4G" {
        let sub: Vec<&str> = second.split('_').collect();
        Some(sub.get(1)?.to_string())
    } else if second == "4G_EG21GL" {
        Some(parts.get(2)?.to_string())
    } else {
        None
    }
}

/// Decodes a coprocessor status payload into the coprocessor firmware name.
///
/// The payload is normally the hex encoding of an ASCII string; payloads
/// that fail hex decoding are used verbatim. Trailing NUL padding is
/// stripped and only the part before the first comma is kept.
pub fn decode_coproc_status(payload: &str) -> String {
    let ascii = match hex::decode(payload) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => payload.to_string(),
    };
    let trimmed = ascii.trim_end_matches('\0');
    trimmed.split(',').next().unwrap_or_default().to_string()
}

/// Vehicle model metadata carried in the directory's preference blob.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub modelid: i64,
    pub vehicletype: String,
    pub oem: String,
    pub model: String,
    pub variant: String,
    pub year: i64,
    pub fueltype: String,
    pub transmission: String,
}

/// Decodes a vehicle preference blob into `(model_string, model_id)`.
///
/// The model string joins the seven descriptive fields with `_`; fields
/// containing a comma are wrapped in quotes so the result stays splittable
/// downstream. An unparseable blob degrades to the zero-value model.
pub fn decode_vehicle_pref(blob: &str) -> (String, i64) {
    let info: ModelInfo = match serde_json::from_str(blob) {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "unparseable vehicle preference blob");
            ModelInfo::default()
        }
    };

    let quote_if_needed = |s: &str| {
        let s = s.trim();
        if s.contains(',') {
            format!("\"{}\"", s)
        } else {
            s.to_string()
        }
    };

    let fields = [
        quote_if_needed(&info.vehicletype),
        quote_if_needed(&info.oem),
        quote_if_needed(&info.model),
        quote_if_needed(&info.variant),
        info.year.to_string(),
        quote_if_needed(&info.fueltype),
        quote_if_needed(&info.transmission),
    ];

    (fields.join("_"), info.modelid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_laf_v1_concatenates_revision() {
        assert_eq!(
            classify("LAF_V1_X1"),
            ("V1X1".to_string(), "AIRTEL".to_string())
        );
    }

    #[test]
    fn classify_laf_v2_keeps_short_sub_revision() {
        // Fourth token of length 1 is a sub-revision and is appended.
        assert_eq!(classify("LAF_V2_X2_3").0, "V2X23");
        // Longer fourth token is a build qualifier and is dropped.
        assert_eq!(classify("LAF_V2_X2_B1").0, "V2X2");
    }

    #[test]
    fn classify_laf_sff_is_fixed() {
        assert_eq!(classify("LAF_SFF_10_2").0, "SFF-V1");
    }

    #[test]
    fn classify_laf_generic_takes_third_token() {
        assert_eq!(classify("LAF_X3_V4").0, "V4");
    }

    #[test]
    fn classify_lafm_4g_appends_numeric_tail() {
        assert_eq!(classify("LAFM_4G_V3_2").0, "V32");
        assert_eq!(classify("LAFM_4G_V3_B").0, "V3");
    }

    #[test]
    fn classify_lafm_mini_variants() {
        assert_eq!(classify("LAFM_MINI_LG_2").0, "MINI-LG2");
        assert_eq!(classify("LAFM_MINI_LG_B").0, "MINILG");
    }

    #[test]
    fn classify_lafm_2g_is_small_form_factor() {
        assert_eq!(classify("LAFM_2G_V1_0").0, "SFF-V2");
    }

    #[test]
    fn classify_lafm_generic_tail_rules() {
        assert_eq!(classify("LAFM_X_V5_7").0, "V57");
        assert_eq!(classify("LAFM_X_V5_SFF").0, "SFF");
        assert_eq!(classify("LAFM_X_V5_B").0, "V5");
    }

    #[test]
    fn classify_la5_is_fixed() {
        assert_eq!(classify("LA5_ANY_THING").0, "BASE-V20-LAYER2-V20");
    }

    #[test]
    fn classify_modem_families() {
        assert_eq!(classify("LAF-4G_EC200UCN-V25").0, "V25");
        assert_eq!(classify("LAF-4G_EG21G-V30").0, "V30");
        assert_eq!(classify("LAF-4G_EC200UEU-V31").0, "V31");
        assert_eq!(classify("LAF-4G_EG21GL-V33").0, "V33");
        assert_eq!(classify("LAF-2G_MC60-V12").0, "V12-V2");
        assert_eq!(classify("LAF-2G_MC60_SFF-V12").0, "SFF-V2");
    }

    #[test]
    fn classify_lafmv2_compound_splits_second_token() {
        assert_eq!(classify("LAFMV2_4G-MOD_EG25G").0, "EG25G");
    }

    #[test]
    fn classify_literal_sku_markers_short_circuit() {
        assert_eq!(classify("X_PCB_IOT_NRF_SM_Y").0, "PCB-IOT-NRF-SM-30");
        assert_eq!(classify("LAFM_MINI_LG_V1_2").0, "MINI-LG-V12");
    }

    #[test]
    fn classify_positional_sim_token() {
        let raw = "LAF-4G_EC200UCN-V25-A-B-C-JIO2";
        assert_eq!(classify(raw), ("V25".to_string(), "JIO2".to_string()));
        // BETA in position six is a build channel, not a carrier.
        let beta = "LAF-4G_EC200UCN-V25-A-B-C-BETA";
        assert_eq!(classify(beta).1, "AIRTEL");
        let named = "LAF-4G_EC200UCN-V25-A-B-C-VODAFONE";
        assert_eq!(classify(named).1, "VODAFONE");
    }

    #[test]
    fn classify_substring_sim_markers_win_over_positional() {
        assert_eq!(classify("LAF-4G_EC200UCN-V25_S_MY-A-B-C-JIO2").1, "S_MY");
        assert_eq!(classify("LAF-2G_MC60-V12_S-MY").1, "S_MY");
        assert_eq!(classify("LAF-4G_EC200UCN-V25_AU").1, "AU");
        // AUG marks an August build, which must not read as Australia.
        assert_eq!(classify("LAF-4G_EC200UCN-V25_AUG").1, "AIRTEL");
    }

    #[test]
    fn classify_unknown_is_na_pair() {
        assert_eq!(classify(""), ("NA".to_string(), "NA".to_string()));
        assert_eq!(classify("XYZ_1_2"), ("NA".to_string(), "NA".to_string()));
        assert_eq!(
            classify("LAF-UNKNOWN-V1"),
            ("NA".to_string(), "NA".to_string())
        );
        // Truncated board identifiers must not panic.
        assert_eq!(classify("LAF"), ("NA".to_string(), "NA".to_string()));
        assert_eq!(classify("LAFM_4G"), ("NA".to_string(), "NA".to_string()));
    }

    #[test]
    fn classify_is_deterministic() {
        let first = classify("LAF_V1_X1");
        for _ in 0..3 {
            assert_eq!(classify("LAF_V1_X1"), first);
        }
    }

    #[test]
    fn decode_coproc_status_hex_and_comma_split() {
        // "LAFCAN_V2,extra" hex encoded.
        let encoded = hex::encode("LAFCAN_V2,extra");
        assert_eq!(decode_coproc_status(&encoded), "LAFCAN_V2");
    }

    #[test]
    fn decode_coproc_status_strips_nul_padding() {
        let encoded = hex::encode("CAN1\0\0\0");
        assert_eq!(decode_coproc_status(&encoded), "CAN1");
    }

    #[test]
    fn decode_coproc_status_non_hex_used_verbatim() {
        assert_eq!(decode_coproc_status("not-hex,tail"), "not-hex");
    }

    #[test]
    fn decode_vehicle_pref_joins_fields() {
        let blob = r#"{"modelid":42,"vehicletype":"car","oem":"Acme","model":"Zip","variant":"LX","year":2021,"fueltype":"petrol","transmission":"manual"}"#;
        let (model, id) = decode_vehicle_pref(blob);
        assert_eq!(model, "car_Acme_Zip_LX_2021_petrol_manual");
        assert_eq!(id, 42);
    }

    #[test]
    fn decode_vehicle_pref_quotes_commas_and_trims() {
        let blob = r#"{"modelid":7,"vehicletype":" car ","oem":"Acme, Inc","model":"Zip","variant":"","year":2020,"fueltype":"","transmission":""}"#;
        let (model, _) = decode_vehicle_pref(blob);
        assert_eq!(model, "car_\"Acme, Inc\"_Zip__2020__");
    }

    #[test]
    fn decode_vehicle_pref_bad_blob_degrades_to_zero_model() {
        let (model, id) = decode_vehicle_pref("not json");
        assert_eq!(model, "____0__");
        assert_eq!(id, 0);
    }
}
