//! # JSON Serialization Module
//!
//! Request bodies are parsed with simd-json, responses are rendered with
//! serde_json.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parse a JSON string to a typed value using simd-json
///
/// # Errors
///
/// Returns `Error::Json` if parsing fails
pub fn parse_json<T: DeserializeOwned>(json_str: &str) -> Result<T> {
    let mut bytes = json_str.as_bytes().to_vec();
    parse_json_bytes(&mut bytes)
}

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the buffer is clobbered.
///
/// # Errors
///
/// Returns `Error::Json` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(|e| Error::Json {
        reason: format!("Parse error: {e}"),
    })
}

/// Serialize a value to JSON string
///
/// # Errors
///
/// Returns `Error::Json` if `value` cannot be represented as JSON
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Json {
        reason: format!("Serialize error: {e}"),
    })
}

/// Serialize a value to pretty-printed JSON string
///
/// # Errors
///
/// Returns `Error::Json` if `value` cannot be represented as JSON
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Json {
        reason: format!("Serialize error: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        age: i32,
    }

    #[test]
    fn test_parse_json_object() {
        let json = r#"{"name": "John", "age": 30}"#;
        let data: TestData = parse_json(json).unwrap();
        assert_eq!(data.name, "John");
        assert_eq!(data.age, 30);
    }

    #[test]
    fn test_parse_json_map() {
        let json = r#"{"a": 1, "b": 2}"#;
        let map: HashMap<String, i64> = parse_json(json).unwrap();
        assert_eq!(map.values().sum::<i64>(), 3);
    }

    #[test]
    fn test_parse_json_bytes() {
        let mut bytes = r#"{"name": "Jane", "age": 25}"#.as_bytes().to_vec();
        let data: TestData = parse_json_bytes(&mut bytes).unwrap();
        assert_eq!(data.name, "Jane");
    }

    #[test]
    fn test_to_json() {
        let data = TestData {
            name: "Bob".to_string(),
            age: 40,
        };
        let json = to_json(&data).unwrap();
        assert_eq!(json, r#"{"name":"Bob","age":40}"#);
        assert!(to_json_pretty(&data).unwrap().contains('\n'));
    }

    #[test]
    fn test_invalid_json() {
        let result: Result<TestData> = parse_json("not valid json");
        assert!(matches!(result, Err(Error::Json { .. })));
    }
}
