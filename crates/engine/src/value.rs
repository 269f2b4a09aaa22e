//! Conversions from store values to the JSON carried in previews.
//!
//! Temporal values use the store's own text forms (`2024-01-01`,
//! `2024-01-01 08:30:00`, `12:34:56.250000`, `1 year 2 days 03:00:00`), nested
//! values become JSON arrays and objects, and binary data is `\x`-prefixed hex.

use chrono::{DateTime, NaiveTime};
use duckdb::types::{TimeUnit, Value};
use serde_json::json;

const MICROS_PER_SEC: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SEC;

/// Render a store value as self-describing JSON. SQL NULL becomes `null`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => json!(b),
        Value::TinyInt(v) => json!(v),
        Value::SmallInt(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::BigInt(v) => json!(v),
        Value::HugeInt(v) => match i64::try_from(*v) {
            Ok(small) => json!(small),
            Err(_) => json!(v.to_string()),
        },
        Value::UHugeInt(v) => match u64::try_from(*v) {
            Ok(small) => json!(small),
            Err(_) => json!(v.to_string()),
        },
        Value::UTinyInt(v) => json!(v),
        Value::USmallInt(v) => json!(v),
        Value::UInt(v) => json!(v),
        Value::UBigInt(v) => json!(v),
        Value::Float(v) => {
            // Through the shortest f32 text, so 0.1f32 stays 0.1.
            let rendered = v.to_string();
            float_to_json(rendered.parse().unwrap_or(f64::NAN), &rendered)
        }
        Value::Double(v) => float_to_json(*v, &v.to_string()),
        Value::Decimal(d) => decimal_to_json(&d.to_string()),
        Value::Text(s) | Value::Enum(s) => json!(s),
        Value::Blob(bytes) | Value::Geometry(bytes) => json!(blob_to_hex(bytes)),
        Value::Date32(days) => json!(format_date(*days)),
        Value::Timestamp(unit, raw) => json!(format_timestamp(*unit, *raw)),
        Value::Time64(unit, raw) => json!(format_time(unit.to_micros(*raw))),
        Value::Interval {
            months,
            days,
            nanos,
        } => json!(format_interval(*months, *days, nanos / 1_000)),
        Value::List(items) | Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Struct(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (map_key(k), value_to_json(v)))
                .collect(),
        ),
        Value::Union(inner) => value_to_json(inner),
        other => {
            tracing::warn!(value = ?other, "no JSON rendering for store value; using null");
            serde_json::Value::Null
        }
    }
}

/// JSON object keys must be strings; scalars keep their JSON text.
fn map_key(key: &Value) -> String {
    match value_to_json(key) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn float_to_json(f: f64, rendered: &str) -> serde_json::Value {
    if f.is_finite() {
        json!(f)
    } else {
        json!(rendered)
    }
}

// Decimals become numbers when f64 reproduces them exactly, otherwise strings.
fn decimal_to_json(rendered: &str) -> serde_json::Value {
    let normalized = if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.')
    } else {
        rendered
    };
    match normalized.parse::<f64>() {
        Ok(f) if f.is_finite() && f.to_string() == normalized => json!(f),
        _ => json!(rendered),
    }
}

fn blob_to_hex(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

fn format_date(days: i32) -> String {
    match DateTime::from_timestamp(i64::from(days) * 86_400, 0) {
        Some(dt) => dt.date_naive().format("%Y-%m-%d").to_string(),
        None => days.to_string(),
    }
}

fn format_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = unit.to_micros(raw);
    match DateTime::from_timestamp_micros(micros) {
        Some(dt) => {
            let naive = dt.naive_utc();
            if micros.rem_euclid(MICROS_PER_SEC) == 0 {
                naive.format("%Y-%m-%d %H:%M:%S").to_string()
            } else {
                naive.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
            }
        }
        None => micros.to_string(),
    }
}

/// Time of day; `24:00:00` is valid in the store but not in chrono.
fn format_time(micros: i64) -> String {
    if micros == MICROS_PER_DAY {
        return "24:00:00".to_string();
    }
    let secs = micros.div_euclid(MICROS_PER_SEC);
    let frac = micros.rem_euclid(MICROS_PER_SEC);
    let time = u32::try_from(secs)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, (frac * 1_000) as u32));
    match time {
        Some(t) if frac == 0 => t.format("%H:%M:%S").to_string(),
        Some(t) => t.format("%H:%M:%S%.6f").to_string(),
        None => micros.to_string(),
    }
}

/// Interval text: calendar parts by name, then a clock part when non-zero.
fn format_interval(months: i32, days: i32, micros: i64) -> String {
    fn part(out: &mut Vec<String>, n: i64, unit: &str) {
        if n != 0 {
            let plural = if n.abs() == 1 { "" } else { "s" };
            out.push(format!("{} {}{}", n, unit, plural));
        }
    }

    let mut parts = Vec::new();
    part(&mut parts, i64::from(months / 12), "year");
    part(&mut parts, i64::from(months % 12), "month");
    part(&mut parts, i64::from(days), "day");
    if micros != 0 {
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        let secs = abs / MICROS_PER_SEC as u64;
        let frac = abs % MICROS_PER_SEC as u64;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3_600,
            (secs % 3_600) / 60,
            secs % 60
        );
        if frac != 0 {
            clock.push_str(&format!(".{:06}", frac));
        }
        parts.push(clock);
    }
    if parts.is_empty() {
        return "00:00:00".to_string();
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::types::OrderedMap;

    #[test]
    fn test_scalars() {
        assert_eq!(value_to_json(&Value::Null), serde_json::Value::Null);
        assert_eq!(value_to_json(&Value::Int(42)), json!(42));
        assert_eq!(value_to_json(&Value::Double(3.14)), json!(3.14));
        assert_eq!(value_to_json(&Value::Float(0.1)), json!(0.1));
        assert_eq!(value_to_json(&Value::Text("hi".into())), json!("hi"));
        assert_eq!(value_to_json(&Value::Boolean(true)), json!(true));
        assert_eq!(value_to_json(&Value::Double(f64::NAN)), json!("NaN"));
        assert_eq!(value_to_json(&Value::HugeInt(i128::MAX)), json!(i128::MAX.to_string()));
        assert_eq!(value_to_json(&Value::UHugeInt(7)), json!(7));
        assert_eq!(value_to_json(&Value::Enum("happy".into())), json!("happy"));
        assert_eq!(value_to_json(&Value::Blob(vec![0xde, 0xad])), json!("\\xdead"));
    }

    #[test]
    fn test_decimal_rendering() {
        assert_eq!(decimal_to_json("3.14"), json!(3.14));
        assert_eq!(decimal_to_json("42.50"), json!(42.5));
        assert_eq!(decimal_to_json("7"), json!(7.0));
        assert_eq!(
            decimal_to_json("12345678901234567890.123456789"),
            json!("12345678901234567890.123456789")
        );
    }

    #[test]
    fn test_dates_and_timestamps() {
        assert_eq!(format_date(0), "1970-01-01");
        assert_eq!(format_date(19_723), "2024-01-01");
        assert_eq!(format_date(-1), "1969-12-31");
        assert_eq!(
            format_timestamp(TimeUnit::Microsecond, 1_704_067_200_000_000),
            "2024-01-01 00:00:00"
        );
        assert_eq!(
            format_timestamp(TimeUnit::Millisecond, 1_704_067_261_500),
            "2024-01-01 00:01:01.500000"
        );
        assert_eq!(
            format_timestamp(TimeUnit::Microsecond, -1),
            "1969-12-31 23:59:59.999999"
        );
    }

    #[test]
    fn test_time_of_day() {
        assert_eq!(
            value_to_json(&Value::Time64(TimeUnit::Microsecond, 45_296_000_000)),
            json!("12:34:56")
        );
        assert_eq!(format_time(45_296_250_000), "12:34:56.250000");
        assert_eq!(format_time(0), "00:00:00");
        assert_eq!(format_time(MICROS_PER_DAY), "24:00:00");
    }

    #[test]
    fn test_intervals() {
        assert_eq!(
            value_to_json(&Value::Interval { months: 0, days: 2, nanos: 0 }),
            json!("2 days")
        );
        assert_eq!(format_interval(14, 1, 3 * 3_600 * MICROS_PER_SEC), "1 year 2 months 1 day 03:00:00");
        assert_eq!(format_interval(0, 0, -1_500_000), "-00:00:01.500000");
        assert_eq!(format_interval(0, 0, 0), "00:00:00");
    }

    #[test]
    fn test_nested_values() {
        let st = Value::Struct(OrderedMap::from(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::List(vec![Value::Text("x".into()), Value::Null])),
        ]));
        assert_eq!(value_to_json(&st), json!({"a": 1, "b": ["x", null]}));

        let map = Value::Map(OrderedMap::from(vec![
            (Value::Int(1), Value::Text("one".into())),
            (Value::Text("k".into()), Value::Boolean(false)),
        ]));
        assert_eq!(value_to_json(&map), json!({"1": "one", "k": false}));

        let union = Value::Union(Box::new(Value::Double(2.5)));
        assert_eq!(value_to_json(&union), json!(2.5));
        assert_eq!(
            value_to_json(&Value::Array(vec![Value::Int(1), Value::Int(2)])),
            json!([1, 2])
        );
    }
}
