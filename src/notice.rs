//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `emit`.
//! Role: Diagnostics channel for conditions the append path must not fail on.
//! Invariants: Notices are non-fatal and never alter API return values.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time_ms: u64,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            time_ms: epoch_ms(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// A claim handle was dropped without commit or abort; readers will stall
    /// at this slot until it is published by some other means.
    pub fn claim_leak(term_id: i32, term_offset: i32, frame_length: usize) -> Self {
        Notice::new("claim-leak", "buffer claim dropped without commit or abort")
            .with_detail("term_id", json!(term_id))
            .with_detail("term_offset", json!(term_offset))
            .with_detail("frame_length", json!(frame_length))
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time_ms".to_string(), json!(notice.time_ms));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

/// Write a notice line to stderr; failures to write are swallowed.
pub fn emit(notice: &Notice) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", notice_json(notice));
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
