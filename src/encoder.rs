//! Row encoding.
//!
//! Each DataRow column is rendered under an effective format resolved from
//! the portal's result-format vector: text in PostgreSQL's canonical form,
//! text exactly as the downstream service rendered it, or the binary form
//! of the type. The choice is made per column per row, never session-wide.

use bytes::{BufMut, BytesMut};
use chrono::{NaiveDate, NaiveDateTime};

use crate::errors::Error;
use crate::executor::Value;
use crate::messages::backend;

/// Effective format of one result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    PgText,
    PgBinary,
    NativeText,
}

/// Session-wide default for text results (`-f POSTGRESQL|SPANNER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    PostgreSql,
    Native,
}

impl TextFormat {
    pub fn data_format(&self) -> DataFormat {
        match self {
            TextFormat::PostgreSql => DataFormat::PgText,
            TextFormat::Native => DataFormat::NativeText,
        }
    }
}

/// Resolve the per-column formats for a result set of `columns` columns.
///
/// An empty vector means all-text (or all-binary under the force-binary
/// flag); a single code applies to every column; otherwise the vector must
/// name one code per column.
pub fn resolve_formats(
    result_formats: &[i16],
    columns: usize,
    text_default: TextFormat,
    force_binary: bool,
) -> Result<Vec<DataFormat>, Error> {
    let text = text_default.data_format();

    match result_formats.len() {
        0 => {
            let format = if force_binary {
                DataFormat::PgBinary
            } else {
                text
            };
            Ok(vec![format; columns])
        }
        1 => {
            let format = format_from_code(result_formats[0], text)?;
            Ok(vec![format; columns])
        }
        n if n == columns => {
            let mut formats = Vec::with_capacity(columns);
            for code in result_formats {
                formats.push(format_from_code(*code, text)?);
            }
            Ok(formats)
        }
        n => Err(Error::Protocol(format!(
            "result format vector has {n} entries for {columns} columns"
        ))),
    }
}

fn format_from_code(code: i16, text: DataFormat) -> Result<DataFormat, Error> {
    match code {
        0 => Ok(text),
        1 => Ok(DataFormat::PgBinary),
        other => Err(Error::Protocol(format!("invalid format code {other}"))),
    }
}

/// The wire format code (0 text / 1 binary) reported in RowDescription.
pub fn wire_code(format: DataFormat) -> i16 {
    match format {
        DataFormat::PgBinary => 1,
        _ => 0,
    }
}

/// Encode one row into a framed DataRow message.
pub fn data_row(values: &[Value], formats: &[DataFormat]) -> Result<BytesMut, Error> {
    let mut cells = Vec::with_capacity(values.len());
    for (value, format) in values.iter().zip(formats.iter()) {
        cells.push(encode_value(value, *format)?);
    }
    Ok(backend::data_row_nullable(&cells))
}

/// Encode one cell. `None` is a NULL (wire length -1).
pub fn encode_value(value: &Value, format: DataFormat) -> Result<Option<BytesMut>, Error> {
    if matches!(value, Value::Null) {
        return Ok(None);
    }
    let bytes = match format {
        DataFormat::PgText => BytesMut::from(pg_text(value).as_str()),
        DataFormat::NativeText => BytesMut::from(native_text(value).as_str()),
        DataFormat::PgBinary => pg_binary(value)?,
    };
    Ok(Some(bytes))
}

/// PostgreSQL's canonical text form.
fn pg_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "t".to_string(),
        Value::Bool(false) => "f".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(v) => v.clone(),
        Value::Bytes(v) => {
            let mut out = String::with_capacity(2 + v.len() * 2);
            out.push_str("\\x");
            for byte in v {
                out.push_str(&format!("{byte:02x}"));
            }
            out
        }
        Value::Date(v) => v.format("%Y-%m-%d").to_string(),
        Value::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        Value::Numeric(v) => v.clone(),
        Value::Array(elements) => {
            let mut out = String::from("{");
            for (index, element) in elements.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                match element {
                    Value::Null => out.push_str("NULL"),
                    other => {
                        let text = pg_text(other);
                        if needs_array_quoting(&text) {
                            out.push('"');
                            for c in text.chars() {
                                if c == '"' || c == '\\' {
                                    out.push('\\');
                                }
                                out.push(c);
                            }
                            out.push('"');
                        } else {
                            out.push_str(&text);
                        }
                    }
                }
            }
            out.push('}');
            out
        }
    }
}

fn needs_array_quoting(text: &str) -> bool {
    text.is_empty()
        || text.eq_ignore_ascii_case("null")
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '{' | '}' | '"' | '\\'))
}

/// The downstream service's own rendering, forwarded byte-for-byte. Values
/// that arrived as text pass through untouched; typed values render the way
/// the service would have.
fn native_text(value: &Value) -> String {
    match value {
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Timestamp(v) => v.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string(),
        Value::Array(elements) => {
            let mut out = String::from("[");
            for (index, element) in elements.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                match element {
                    Value::Null => out.push_str("NULL"),
                    other => out.push_str(&native_text(other)),
                }
            }
            out.push(']');
            out
        }
        other => pg_text(other),
    }
}

// Binary epoch: 2000-01-01, per the binary formats of date and timestamp.
fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

fn pg_epoch_timestamp() -> NaiveDateTime {
    pg_epoch_date().and_hms_opt(0, 0, 0).unwrap()
}

/// The binary representation of the type, or `Unsupported` for types the
/// gateway has no binary encoding for.
fn pg_binary(value: &Value) -> Result<BytesMut, Error> {
    let mut bytes = BytesMut::new();
    match value {
        Value::Null => {}
        Value::Bool(v) => bytes.put_u8(*v as u8),
        Value::Int(v) => bytes.put_i64(*v),
        Value::Float(v) => bytes.put_f64(*v),
        Value::Text(v) => bytes.put_slice(v.as_bytes()),
        Value::Bytes(v) => bytes.put_slice(v),
        Value::Date(v) => {
            let days = v.signed_duration_since(pg_epoch_date()).num_days();
            bytes.put_i32(days as i32);
        }
        Value::Timestamp(v) => {
            let micros = v
                .signed_duration_since(pg_epoch_timestamp())
                .num_microseconds()
                .ok_or_else(|| Error::Unsupported("timestamp out of range".into()))?;
            bytes.put_i64(micros);
        }
        Value::Numeric(_) | Value::Array(_) => {
            return Err(Error::Unsupported(format!(
                "unsupported data type for binary transfer: {:?}",
                value.data_type()
            )))
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_vector_is_all_text() {
        let formats = resolve_formats(&[], 3, TextFormat::PostgreSql, false).unwrap();
        assert_eq!(formats, vec![DataFormat::PgText; 3]);
    }

    #[test]
    fn test_empty_vector_native_default() {
        let formats = resolve_formats(&[], 2, TextFormat::Native, false).unwrap();
        assert_eq!(formats, vec![DataFormat::NativeText; 2]);
    }

    #[test]
    fn test_empty_vector_force_binary() {
        let formats = resolve_formats(&[], 2, TextFormat::PostgreSql, true).unwrap();
        assert_eq!(formats, vec![DataFormat::PgBinary; 2]);
    }

    #[test]
    fn test_single_code_broadcasts_to_every_column() {
        // A length-1 vector applies to all columns, not just the first.
        let formats = resolve_formats(&[1], 3, TextFormat::PostgreSql, false).unwrap();
        assert_eq!(formats, vec![DataFormat::PgBinary; 3]);
    }

    #[test]
    fn test_per_column_codes() {
        let formats = resolve_formats(&[0, 1], 2, TextFormat::PostgreSql, false).unwrap();
        assert_eq!(formats, vec![DataFormat::PgText, DataFormat::PgBinary]);
    }

    #[test]
    fn test_wrong_vector_length_is_protocol_error() {
        let result = resolve_formats(&[0, 1], 3, TextFormat::PostgreSql, false);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_invalid_format_code() {
        let result = resolve_formats(&[7], 1, TextFormat::PostgreSql, false);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bool_text_forms() {
        let pg = encode_value(&Value::Bool(true), DataFormat::PgText)
            .unwrap()
            .unwrap();
        assert_eq!(&pg[..], b"t");
        let native = encode_value(&Value::Bool(true), DataFormat::NativeText)
            .unwrap()
            .unwrap();
        assert_eq!(&native[..], b"true");
    }

    #[test]
    fn test_timestamp_text_has_microseconds() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(12, 30, 45, 123456)
            .unwrap();
        let encoded = encode_value(&Value::Timestamp(ts), DataFormat::PgText)
            .unwrap()
            .unwrap();
        assert_eq!(&encoded[..], b"2024-03-01 12:30:45.123456");
    }

    #[test]
    fn test_array_text_quoting() {
        let array = Value::Array(vec![
            Value::Text("plain".into()),
            Value::Text("needs quoting".into()),
            Value::Null,
        ]);
        let encoded = encode_value(&array, DataFormat::PgText).unwrap().unwrap();
        assert_eq!(&encoded[..], br#"{plain,"needs quoting",NULL}"#);
    }

    #[test]
    fn test_null_is_none() {
        assert!(encode_value(&Value::Null, DataFormat::PgText)
            .unwrap()
            .is_none());
        assert!(encode_value(&Value::Null, DataFormat::PgBinary)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_int_binary_is_big_endian_int8() {
        let encoded = encode_value(&Value::Int(513), DataFormat::PgBinary)
            .unwrap()
            .unwrap();
        assert_eq!(&encoded[..], &[0, 0, 0, 0, 0, 0, 2, 1]);
    }

    #[test]
    fn test_binary_date_epoch() {
        let date = NaiveDate::from_ymd_opt(2000, 1, 2).unwrap();
        let encoded = encode_value(&Value::Date(date), DataFormat::PgBinary)
            .unwrap()
            .unwrap();
        assert_eq!(&encoded[..], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_binary_numeric_unsupported() {
        let result = encode_value(&Value::Numeric("1.5".into()), DataFormat::PgBinary);
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_data_row_framing() {
        let row = data_row(
            &[Value::Text("1".into()), Value::Null],
            &[DataFormat::PgText, DataFormat::PgText],
        )
        .unwrap();
        // 'D' + len + 2 columns + "1" + NULL
        assert_eq!(
            &row[..],
            &[b'D', 0, 0, 0, 15, 0, 2, 0, 0, 0, 1, b'1', 0xff, 0xff, 0xff, 0xff]
        );
    }
}
