use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::store::Row;

pub fn get_required_str(params: &Value, key: &str) -> AppResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadParams(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Raw string field, untrimmed. Passwords keep their whitespace.
pub fn get_secret(params: &Value, key: &str) -> AppResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::BadParams(format!("missing {}", key)))
}

pub fn get_object(params: &Value, key: &str) -> AppResult<Row> {
    match params.get(key) {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(AppError::BadParams(format!("{} must be an object", key))),
        None => Err(AppError::BadParams(format!("missing {}", key))),
    }
}

pub fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_strings_are_trimmed_and_non_empty() {
        let p = json!({ "a": "  x ", "b": "   ", "c": 3 });
        assert_eq!(get_required_str(&p, "a").unwrap(), "x");
        assert_eq!(get_required_str(&p, "b").unwrap_err().code(), "bad_params");
        assert!(get_required_str(&p, "c").is_err());
        assert!(get_required_str(&p, "d").is_err());
        assert_eq!(get_optional_str(&p, "b"), None);
        assert_eq!(get_secret(&json!({ "pw": " s " }), "pw").unwrap(), " s ");
    }

    #[test]
    fn objects_must_be_objects() {
        let p = json!({ "values": { "k": 1 }, "patch": [1] });
        assert_eq!(get_object(&p, "values").unwrap().len(), 1);
        assert!(get_object(&p, "patch").is_err());
        assert!(get_object(&p, "missing").is_err());
    }
}
