use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::SqlEngineError;
use crate::types::{RowValues, parse_timestamp};

use super::{AttributeConverter, SemanticType, ValueType, unsupported};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Integers and floats.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericConverter;

impl AttributeConverter for NumericConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Numeric
    }

    fn supports(&self, target: ValueType) -> bool {
        matches!(
            target,
            ValueType::Integer
                | ValueType::Float
                | ValueType::Text
                | ValueType::Boolean
                | ValueType::Timestamp
        )
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        match (value, target) {
            (RowValues::Int(i), ValueType::Integer) => Ok(RowValues::Int(*i)),
            (RowValues::Int(i), ValueType::Float) => Ok(RowValues::Float(*i as f64)),
            (RowValues::Int(i), ValueType::Text) => Ok(RowValues::Text(i.to_string())),
            (RowValues::Int(i), ValueType::Boolean) => Ok(RowValues::Bool(*i != 0)),
            (RowValues::Int(millis), ValueType::Timestamp) => {
                DateTime::<Utc>::from_timestamp_millis(*millis)
                    .map(|dt| RowValues::Timestamp(dt.naive_utc()))
                    .ok_or_else(|| unsupported(value, target))
            }
            (RowValues::Float(f), ValueType::Float) => Ok(RowValues::Float(*f)),
            (RowValues::Float(f), ValueType::Integer)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 =>
            {
                Ok(RowValues::Int(*f as i64))
            }
            (RowValues::Float(f), ValueType::Text) => Ok(RowValues::Text(f.to_string())),
            (RowValues::Float(f), ValueType::Boolean) => Ok(RowValues::Bool(*f != 0.0)),
            _ => Err(unsupported(value, target)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanConverter;

impl AttributeConverter for BooleanConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Boolean
    }

    fn supports(&self, target: ValueType) -> bool {
        matches!(
            target,
            ValueType::Boolean | ValueType::Integer | ValueType::Text
        )
    }

    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        let RowValues::Bool(b) = value else {
            return Err(unsupported(value, target));
        };
        match target {
            ValueType::Boolean => Ok(RowValues::Bool(*b)),
            ValueType::Integer => Ok(RowValues::Int(i64::from(*b))),
            ValueType::Text => Ok(RowValues::Text(b.to_string())),
            _ => Err(unsupported(value, target)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextConverter;

impl AttributeConverter for TextConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Text
    }

    fn supports(&self, _target: ValueType) -> bool {
        true
    }

    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        let RowValues::Text(s) = value else {
            return Err(unsupported(value, target));
        };
        let trimmed = s.trim();
        let converted = match target {
            ValueType::Text => Some(RowValues::Text(s.clone())),
            ValueType::Integer => trimmed.parse().ok().map(RowValues::Int),
            ValueType::Float => trimmed.parse().ok().map(RowValues::Float),
            ValueType::Boolean => parse_bool(trimmed).map(RowValues::Bool),
            ValueType::Bytes => Some(RowValues::Blob(s.as_bytes().to_vec())),
            ValueType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                .ok()
                .map(RowValues::Date),
            ValueType::Timestamp => parse_timestamp(trimmed).map(RowValues::Timestamp),
            ValueType::Json => serde_json::from_str(s).ok().map(RowValues::JSON),
        };
        converted.ok_or_else(|| unsupported(value, target))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "y" | "yes" => Some(true),
        "false" | "f" | "0" | "n" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesConverter;

impl AttributeConverter for BytesConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Bytes
    }

    fn supports(&self, target: ValueType) -> bool {
        matches!(target, ValueType::Bytes | ValueType::Text)
    }

    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        let RowValues::Blob(bytes) = value else {
            return Err(unsupported(value, target));
        };
        match target {
            ValueType::Bytes => Ok(RowValues::Blob(bytes.clone())),
            ValueType::Text => String::from_utf8(bytes.clone())
                .map(RowValues::Text)
                .map_err(|_| unsupported(value, target)),
            _ => Err(unsupported(value, target)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateConverter;

impl AttributeConverter for DateConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Date
    }

    fn supports(&self, target: ValueType) -> bool {
        matches!(
            target,
            ValueType::Date | ValueType::Timestamp | ValueType::Text
        )
    }

    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        let RowValues::Date(date) = value else {
            return Err(unsupported(value, target));
        };
        match target {
            ValueType::Date => Ok(RowValues::Date(*date)),
            ValueType::Timestamp => Ok(RowValues::Timestamp(date.and_time(NaiveTime::MIN))),
            ValueType::Text => Ok(RowValues::Text(date.format(DATE_FORMAT).to_string())),
            _ => Err(unsupported(value, target)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampConverter;

impl AttributeConverter for TimestampConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Timestamp
    }

    fn supports(&self, target: ValueType) -> bool {
        matches!(
            target,
            ValueType::Timestamp | ValueType::Date | ValueType::Text | ValueType::Integer
        )
    }

    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        let RowValues::Timestamp(ts) = value else {
            return Err(unsupported(value, target));
        };
        match target {
            ValueType::Timestamp => Ok(RowValues::Timestamp(*ts)),
            ValueType::Date => Ok(RowValues::Date(ts.date())),
            ValueType::Text => Ok(RowValues::Text(ts.format(TIMESTAMP_FORMAT).to_string())),
            ValueType::Integer => Ok(RowValues::Int(ts.and_utc().timestamp_millis())),
            _ => Err(unsupported(value, target)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl AttributeConverter for JsonConverter {
    fn semantic_type(&self) -> SemanticType {
        SemanticType::Json
    }

    fn supports(&self, target: ValueType) -> bool {
        matches!(target, ValueType::Json | ValueType::Text)
    }

    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError> {
        let RowValues::JSON(json) = value else {
            return Err(unsupported(value, target));
        };
        match target {
            ValueType::Json => Ok(RowValues::JSON(json.clone())),
            ValueType::Text => Ok(RowValues::Text(json.to_string())),
            _ => Err(unsupported(value, target)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn float_to_integer_only_when_exact() {
        let c = NumericConverter;
        assert_eq!(
            c.convert(&RowValues::Float(3.0), ValueType::Integer).unwrap(),
            RowValues::Int(3)
        );
        assert!(c.convert(&RowValues::Float(3.5), ValueType::Integer).is_err());
    }

    #[test]
    fn timestamp_round_trips_through_epoch_millis() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_milli_opt(7, 8, 9, 10)
            .unwrap();
        let millis = TimestampConverter
            .convert(&RowValues::Timestamp(ts), ValueType::Integer)
            .unwrap();
        assert_eq!(
            NumericConverter.convert(&millis, ValueType::Timestamp).unwrap(),
            RowValues::Timestamp(ts)
        );
    }

    #[test]
    fn text_booleans() {
        let c = TextConverter;
        assert_eq!(
            c.convert(&RowValues::Text("Yes".into()), ValueType::Boolean).unwrap(),
            RowValues::Bool(true)
        );
        assert!(c.convert(&RowValues::Text("maybe".into()), ValueType::Boolean).is_err());
    }

    #[test]
    fn invalid_utf8_bytes_are_not_text() {
        assert!(
            BytesConverter
                .convert(&RowValues::Blob(vec![0xff, 0xfe]), ValueType::Text)
                .is_err()
        );
    }
}
