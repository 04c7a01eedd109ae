//! Column type inference for text-born values.
//!
//! Works by elimination over a sample: every candidate type starts possible
//! and each value discards the candidates it cannot be. The most specific
//! surviving candidate wins; `String` always survives as the fallback.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use trellis_frame::Scalar;
use trellis_protocol::DataType;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M:%S%.f"];

fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>().ok()
}

fn parse_float(s: &str) -> Option<f64> {
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

/// Infer the most specific type every sampled value can carry. Nulls and
/// empty strings carry no evidence.
pub fn infer_column_type<'a>(samples: impl Iterator<Item = &'a str>) -> DataType {
    let mut possible = [
        true, // Integer
        true, // Float
        true, // Boolean
        true, // Date
        true, // Datetime
        true, // Time
    ];
    let mut saw_value = false;

    for raw in samples {
        let s = raw.trim();
        if s.is_empty() {
            continue;
        }
        saw_value = true;
        if possible[0] && parse_int(s).is_none() {
            possible[0] = false;
        }
        if possible[1] && parse_float(s).is_none() {
            possible[1] = false;
        }
        if possible[2] && parse_bool(s).is_none() {
            possible[2] = false;
        }
        if possible[3] && parse_date(s).is_none() {
            possible[3] = false;
        }
        if possible[4] && parse_datetime(s).is_none() {
            possible[4] = false;
        }
        if possible[5] && parse_time(s).is_none() {
            possible[5] = false;
        }
        if !possible.iter().any(|p| *p) {
            return DataType::String;
        }
    }

    if !saw_value {
        return DataType::Null;
    }
    if possible[0] {
        return DataType::Integer;
    }
    if possible[1] {
        return DataType::Float;
    }
    if possible[2] {
        return DataType::Boolean;
    }
    if possible[3] {
        return DataType::Date;
    }
    if possible[4] {
        return DataType::Datetime;
    }
    if possible[5] {
        return DataType::Time;
    }
    DataType::String
}

/// Convert a raw text cell into a scalar of the inferred column type. Values
/// that fail to parse become null (non-strict semantics), matching how
/// tolerant CSV readers behave with `ignore_errors`.
pub fn cast_raw(raw: &str, dtype: DataType) -> Scalar {
    let s = raw.trim();
    if s.is_empty() {
        return Scalar::Null;
    }
    match dtype {
        DataType::Integer => parse_int(s).map(Scalar::Int).unwrap_or(Scalar::Null),
        DataType::Float => parse_float(s).map(Scalar::Float).unwrap_or(Scalar::Null),
        DataType::Boolean => parse_bool(s).map(Scalar::Bool).unwrap_or(Scalar::Null),
        DataType::Date => parse_date(s).map(Scalar::Date).unwrap_or(Scalar::Null),
        DataType::Datetime => parse_datetime(s)
            .map(Scalar::Datetime)
            .unwrap_or(Scalar::Null),
        DataType::Time => parse_time(s).map(Scalar::Time).unwrap_or(Scalar::Null),
        _ => Scalar::Str(raw.to_string()),
    }
}

/// Turn a whole number into the tightest scalar: Int when exactly integral
/// and representable, Float otherwise. OOXML stores all numbers as doubles.
pub fn number_to_scalar(value: f64) -> Scalar {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Scalar::Int(value as i64)
    } else {
        Scalar::Float(value)
    }
}
