use super::error::err;
use super::types::AppState;
use rusqlite::Connection;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "no workspace selected"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Cohort filter: absent, null, or "all" (any case) means the whole cohort.
pub fn parse_class(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    match params.get("class") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "class must be a string or null",
                ));
            };
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("all") {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

/// Result-set cap. Absent or null means no truncation; anything else must be
/// a positive integer.
pub fn parse_limit(params: &serde_json::Value) -> Result<Option<usize>, HandlerErr> {
    match params.get("limit") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(n) = v.as_u64().filter(|n| *n >= 1) else {
                return Err(HandlerErr::new(
                    "bad_params",
                    "limit must be a positive integer",
                ));
            };
            Ok(Some(n as usize))
        }
    }
}
