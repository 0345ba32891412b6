use base64::{engine::general_purpose::STANDARD, Engine};
use common::domain::{TelemetryRecord, UplinkMessage};
use serde_json::Value;

/// Map one uplink to the flat telemetry record published downstream.
///
/// Base fields come from the first normalized payload entry when present
/// (`{property: {measurement: value}}` flattened to `propertyMeasurement`),
/// otherwise from the decoded payload verbatim when it is a JSON object (any
/// other shape contributes nothing). Frame and radio metadata are then added
/// on top and overwrite same-named base keys.
pub fn normalize(uplink: &UplinkMessage) -> TelemetryRecord {
    let frame = &uplink.uplink_message;

    let mut telemetry = match (&frame.normalized_payload, &frame.decoded_payload) {
        (Some(normalized), _) => normalized
            .first()
            .map(flatten_normalized_entry)
            .unwrap_or_default(),
        (None, Some(Value::Object(decoded))) => decoded.clone(),
        (None, _) => TelemetryRecord::new(),
    };

    telemetry.insert("framePort".to_string(), Value::from(frame.f_port.unwrap_or(0)));

    if let Some(raw) = frame.frm_payload.as_deref().and_then(raw_payload_hex) {
        telemetry.insert("rawPayload".to_string(), Value::String(raw));
    }

    telemetry.insert("frameCount".to_string(), Value::from(frame.f_cnt));
    if let Some(rx) = frame.rx_metadata.first() {
        telemetry.insert("rssi".to_string(), Value::Number(rx.rssi.clone()));
        telemetry.insert("snr".to_string(), Value::Number(rx.snr.clone()));
    }
    telemetry.insert(
        "spreadingFactor".to_string(),
        Value::from(frame.settings.data_rate.lora.spreading_factor),
    );

    telemetry
}

fn flatten_normalized_entry(entry: &serde_json::Map<String, Value>) -> TelemetryRecord {
    let mut telemetry = TelemetryRecord::new();
    for (property, measurements) in entry {
        let Value::Object(measurements) = measurements else {
            continue;
        };
        let property = property.to_lowercase();
        for (measurement, value) in measurements {
            telemetry.insert(
                format!("{}{}", property, title_case(measurement)),
                value.clone(),
            );
        }
    }
    telemetry
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut previous_cased = false;
    for c in word.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

/// Base64 frame payload as upper-case hex, `None` when it does not decode.
fn raw_payload_hex(frm_payload: &str) -> Option<String> {
    STANDARD.decode(frm_payload).ok().map(hex::encode_upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uplink(frame: serde_json::Value) -> UplinkMessage {
        let mut uplink_message = json!({
            "f_cnt": 10,
            "rx_metadata": [{ "rssi": -80, "snr": 7 }],
            "settings": { "data_rate": { "lora": { "spreading_factor": 7 } } }
        });
        for (key, value) in frame.as_object().unwrap() {
            uplink_message[key] = value.clone();
        }

        let document = json!({
            "end_device_ids": {
                "device_id": "eui-0011223344556677",
                "dev_eui": "0011223344556677",
                "application_ids": { "application_id": "weather-stations" }
            },
            "uplink_message": uplink_message
        });
        UplinkMessage::from_slice(&serde_json::to_vec(&document).unwrap()).unwrap()
    }

    #[test]
    fn test_normalized_payload_scenario() {
        let message = uplink(json!({
            "normalized_payload": [{ "temperature": { "value": 21.5 } }],
            "f_port": 2,
            "frm_payload": "Cg=="
        }));

        let telemetry = normalize(&message);

        let expected = json!({
            "temperatureValue": 21.5,
            "framePort": 2,
            "rawPayload": "0A",
            "frameCount": 10,
            "rssi": -80,
            "snr": 7,
            "spreadingFactor": 7
        });
        assert_eq!(serde_json::Value::Object(telemetry), expected);
    }

    #[test]
    fn test_normalized_payload_takes_precedence_over_decoded() {
        let message = uplink(json!({
            "normalized_payload": [{ "Air": { "relativeHumidity": 40, "temperature": 20.0 } }],
            "decoded_payload": { "battery": 3.6, "temperature": 99 }
        }));

        let telemetry = normalize(&message);

        assert_eq!(telemetry["airRelativehumidity"], json!(40));
        assert_eq!(telemetry["airTemperature"], json!(20.0));
        assert!(!telemetry.contains_key("battery"));
        assert!(!telemetry.contains_key("temperature"));
    }

    #[test]
    fn test_only_first_normalized_entry_is_used() {
        let message = uplink(json!({
            "normalized_payload": [
                { "temperature": { "value": 1 } },
                { "temperature": { "value": 2 }, "wind": { "speed": 3 } }
            ]
        }));

        let telemetry = normalize(&message);

        assert_eq!(telemetry["temperatureValue"], json!(1));
        assert!(!telemetry.contains_key("windSpeed"));
    }

    #[test]
    fn test_empty_normalized_payload_yields_metadata_only() {
        let message = uplink(json!({ "normalized_payload": [] }));

        let telemetry = normalize(&message);

        let mut keys: Vec<&str> = telemetry.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["frameCount", "framePort", "rssi", "snr", "spreadingFactor"]
        );
    }

    #[test]
    fn test_non_object_properties_are_skipped() {
        let message = uplink(json!({
            "normalized_payload": [{ "label": "outdoor", "wind": { "speed": 3.2 } }]
        }));

        let telemetry = normalize(&message);

        assert_eq!(telemetry["windSpeed"], json!(3.2));
        assert!(telemetry.keys().all(|key| !key.starts_with("label")));
    }

    #[test]
    fn test_decoded_payload_used_verbatim() {
        let message = uplink(json!({
            "decoded_payload": { "battery": 3.6, "status": { "door": "open" } },
            "f_port": 5
        }));

        let telemetry = normalize(&message);

        assert_eq!(telemetry["battery"], json!(3.6));
        assert_eq!(telemetry["status"], json!({ "door": "open" }));
        assert_eq!(telemetry["framePort"], json!(5));
    }

    #[test]
    fn test_non_object_decoded_payload_yields_metadata_only() {
        for decoded in [json!([1, 2, 3]), json!(42), json!("open")] {
            let message = uplink(json!({ "decoded_payload": decoded, "f_port": 3 }));

            let telemetry = normalize(&message);

            let mut keys: Vec<&str> = telemetry.keys().map(String::as_str).collect();
            keys.sort_unstable();
            assert_eq!(
                keys,
                vec!["frameCount", "framePort", "rssi", "snr", "spreadingFactor"]
            );
            assert_eq!(telemetry["framePort"], json!(3));
        }
    }

    #[test]
    fn test_metadata_overwrites_decoded_keys() {
        let message = uplink(json!({
            "decoded_payload": { "rssi": 0, "framePort": 99 },
            "f_port": 1
        }));

        let telemetry = normalize(&message);

        assert_eq!(telemetry["rssi"], json!(-80));
        assert_eq!(telemetry["framePort"], json!(1));
    }

    #[test]
    fn test_frame_port_defaults_to_zero() {
        let message = uplink(json!({}));

        let telemetry = normalize(&message);

        assert_eq!(telemetry["framePort"], json!(0));
        assert!(!telemetry.contains_key("rawPayload"));
    }

    #[test]
    fn test_raw_payload_round_trips() {
        for encoded in ["Cg==", "AQIDBA==", "3q2+7w==", "////", ""] {
            let message = uplink(json!({ "frm_payload": encoded }));

            let telemetry = normalize(&message);
            let raw = telemetry["rawPayload"].as_str().unwrap();

            assert_eq!(raw, raw.to_uppercase());
            let bytes = hex::decode(raw).unwrap();
            assert_eq!(STANDARD.encode(bytes), encoded);
        }
    }

    #[test]
    fn test_invalid_base64_omits_raw_payload() {
        let message = uplink(json!({ "frm_payload": "not base64!" }));

        let telemetry = normalize(&message);

        assert!(!telemetry.contains_key("rawPayload"));
        assert_eq!(telemetry["frameCount"], json!(10));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("value"), "Value");
        assert_eq!(title_case("relativeHumidity"), "Relativehumidity");
        assert_eq!(title_case("wind_speed"), "Wind_Speed");
        assert_eq!(title_case("pm2p5"), "Pm2P5");
        assert_eq!(title_case(""), "");
    }
}
