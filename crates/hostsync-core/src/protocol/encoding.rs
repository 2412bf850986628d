//! Payload shape detection and normalization.
//!
//! Transports hand us payloads in whatever form they carry them:
//! - **Object**: JSON text of the envelope itself
//! - **Quoted**: a JSON string containing the envelope text (double-encoded)
//!
//! Anything else cannot be an envelope. [`normalize`] reduces both accepted
//! shapes to a single `serde_json::Value` object.

use super::DecodeError;
use serde_json::Value;

/// Shape of a raw payload based on its first significant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// JSON object text
    Object,
    /// JSON string (possibly wrapping object text)
    Quoted,
    /// Anything else
    Unknown,
    /// Empty or whitespace only
    Empty,
}

/// Detect the payload shape from raw bytes, ignoring leading whitespace.
pub fn detect_payload_shape(data: &[u8]) -> PayloadShape {
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => PayloadShape::Object,
        Some(b'"') => PayloadShape::Quoted,
        Some(_) => PayloadShape::Unknown,
        None => PayloadShape::Empty,
    }
}

/// Parse raw bytes into a JSON object value.
pub fn normalize(data: &[u8]) -> Result<Value, DecodeError> {
    match detect_payload_shape(data) {
        PayloadShape::Empty => Err(DecodeError::Empty),
        PayloadShape::Unknown => Err(DecodeError::NotAnObject),
        PayloadShape::Object | PayloadShape::Quoted => {
            let value: Value = serde_json::from_slice(data)?;
            normalize_value(value)
        }
    }
}

/// Accept an already-structured value, unwrapping one level of string encoding.
pub fn normalize_value(value: Value) -> Result<Value, DecodeError> {
    match value {
        Value::Object(_) => Ok(value),
        Value::String(text) => match detect_payload_shape(text.as_bytes()) {
            PayloadShape::Object => {
                let inner: Value = serde_json::from_str(&text)?;
                if inner.is_object() {
                    Ok(inner)
                } else {
                    Err(DecodeError::NotAnObject)
                }
            }
            PayloadShape::Empty => Err(DecodeError::Empty),
            _ => Err(DecodeError::NotAnObject),
        },
        _ => Err(DecodeError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_object() {
        assert_eq!(detect_payload_shape(br#"{"subType":"X"}"#), PayloadShape::Object);
        assert_eq!(detect_payload_shape(b"  \n{}"), PayloadShape::Object);
    }

    #[test]
    fn test_detect_quoted() {
        assert_eq!(detect_payload_shape(br#""{\"a\":1}""#), PayloadShape::Quoted);
    }

    #[test]
    fn test_detect_unknown_and_empty() {
        assert_eq!(detect_payload_shape(&[0x00, 0x01]), PayloadShape::Unknown);
        assert_eq!(detect_payload_shape(b"[1,2]"), PayloadShape::Unknown);
        assert_eq!(detect_payload_shape(b""), PayloadShape::Empty);
        assert_eq!(detect_payload_shape(b"   "), PayloadShape::Empty);
    }

    #[test]
    fn test_normalize_object_text() {
        let value = normalize(br#"{"a":1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_normalize_double_encoded_text() {
        let value = normalize(br#""{\"a\":1}""#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_normalize_structured_value() {
        assert_eq!(normalize_value(json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert_eq!(
            normalize_value(Value::String(r#"{"a":1}"#.into())).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_normalize_rejects_non_objects() {
        assert!(matches!(normalize(b"[1]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(normalize(b""), Err(DecodeError::Empty)));
        assert!(matches!(normalize(b"{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            normalize_value(json!(42)),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            normalize_value(Value::String("hello".into())),
            Err(DecodeError::NotAnObject)
        ));
    }
}
