// Provider payload -> canonical readings. Explicit table; nothing is derived from key spelling.

use serde_json::Value;
use std::collections::HashSet;

use crate::models::{Field, Readings};

/// Raw realtime payload as pushed by a meter: provider keys to numbers or numeric strings.
pub type RawEvent = serde_json::Map<String, Value>;

/// Power arrives in kW; readings are in W.
const KW_TO_W: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldMapping {
    pub provider_key: &'static str,
    pub field: Field,
    pub scale: f64,
}

pub const FIELD_MAP: [FieldMapping; 8] = [
    FieldMapping {
        provider_key: "V1",
        field: Field::Voltage,
        scale: 1.0,
    },
    FieldMapping {
        provider_key: "A1",
        field: Field::Current,
        scale: 1.0,
    },
    FieldMapping {
        provider_key: "P_SUM",
        field: Field::Power,
        scale: KW_TO_W,
    },
    FieldMapping {
        provider_key: "FREQ",
        field: Field::Frequency,
        scale: 1.0,
    },
    FieldMapping {
        provider_key: "S_SUM",
        field: Field::Apparent,
        scale: 1.0,
    },
    FieldMapping {
        provider_key: "Q_SUM",
        field: Field::Reactive,
        scale: 1.0,
    },
    FieldMapping {
        provider_key: "WH",
        field: Field::Energy,
        scale: 1.0,
    },
    FieldMapping {
        provider_key: "PF_SUM",
        field: Field::PowerFactor,
        scale: 1.0,
    },
];

/// Checks that `table` maps every canonical field exactly once with unique provider keys.
pub fn validate_mapping(table: &[FieldMapping]) -> anyhow::Result<()> {
    let mut keys = HashSet::new();
    let mut fields = HashSet::new();
    for m in table {
        anyhow::ensure!(
            keys.insert(m.provider_key),
            "provider key {} mapped more than once",
            m.provider_key
        );
        anyhow::ensure!(
            fields.insert(m.field),
            "field {} mapped more than once",
            m.field
        );
        anyhow::ensure!(
            m.scale.is_finite() && m.scale != 0.0,
            "provider key {} has invalid scale {}",
            m.provider_key,
            m.scale
        );
    }
    for field in Field::ALL {
        anyhow::ensure!(fields.contains(&field), "field {} is not mapped", field);
    }
    Ok(())
}

/// Numbers pass through; numeric strings are parsed; anything else is 0.
pub fn parse_numeric(value: &Value) -> f64 {
    let v = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if v.is_finite() { v } else { 0.0 }
}

/// Maps a raw event through [`FIELD_MAP`]. Missing or malformed values become 0.
pub fn normalize(raw: &RawEvent) -> Readings {
    let mut out = Readings::default();
    for m in &FIELD_MAP {
        let v = raw.get(m.provider_key).map(parse_numeric).unwrap_or(0.0) * m.scale;
        *out.get_mut(m.field) = if v.is_finite() { v } else { 0.0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(v: Value) -> RawEvent {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn shipped_table_is_exhaustive() {
        validate_mapping(&FIELD_MAP).unwrap();
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut table = FIELD_MAP;
        table[1].field = Field::Voltage;
        let err = validate_mapping(&table).unwrap_err().to_string();
        assert!(err.contains("voltage"), "{err}");
    }

    #[test]
    fn missing_field_is_rejected() {
        let err = validate_mapping(&FIELD_MAP[..7]).unwrap_err().to_string();
        assert!(err.contains("powerFactor"), "{err}");
    }

    #[test]
    fn every_provider_key_lands_on_its_field() {
        for (i, m) in FIELD_MAP.iter().enumerate() {
            let mut raw = RawEvent::new();
            raw.insert(m.provider_key.to_string(), json!(i as f64 + 1.0));
            let r = normalize(&raw);
            for field in Field::ALL {
                let expected = if field == m.field {
                    (i as f64 + 1.0) * m.scale
                } else {
                    0.0
                };
                assert_eq!(r.get(field), expected, "{} -> {}", m.provider_key, field);
            }
        }
    }

    #[test]
    fn power_is_scaled_from_kilowatts() {
        let r = normalize(&event(json!({ "P_SUM": 1.25 })));
        assert_eq!(r.power, 1250.0);
    }

    #[test]
    fn numeric_strings_parse_and_garbage_is_zero() {
        let r = normalize(&event(json!({
            "V1": " 229.8 ",
            "A1": "abc",
            "FREQ": null,
            "S_SUM": [1, 2],
            "Q_SUM": true,
            "PF_SUM": "0.97",
            "Unrelated": 42
        })));
        assert_eq!(r.voltage, 229.8);
        assert_eq!(r.current, 0.0);
        assert_eq!(r.frequency, 0.0);
        assert_eq!(r.apparent, 0.0);
        assert_eq!(r.reactive, 0.0);
        assert_eq!(r.energy, 0.0);
        assert_eq!(r.power_factor, 0.97);
    }

    #[test]
    fn non_finite_strings_are_zero() {
        assert_eq!(parse_numeric(&json!("inf")), 0.0);
        assert_eq!(parse_numeric(&json!("NaN")), 0.0);
    }
}
