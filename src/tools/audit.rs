use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;

/// At most this many invocations are retained; older entries are evicted.
pub const LOG_CAPACITY: usize = 50;

/// Results and argument strings longer than this are redacted.
const REDACT_THRESHOLD: usize = 500;

const IMAGE_SENTINEL: &str = "<image_jpeg_base64 omitted>";
const ELLIPSIS: &str = "…";

/// One recorded tool invocation, newest entries last.
#[derive(Debug, Clone, Serialize)]
pub struct ToolLogEntry {
    pub time: String,
    pub tool: String,
    pub args: Value,
    pub result: String,
}

/// Bounded in-memory ring of tool invocations. Calls tagged as coming from
/// the web client are observers, not agent actions, and are never recorded.
pub struct AuditLog {
    entries: Mutex<VecDeque<ToolLogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
        }
    }

    pub fn record(&self, tool: &str, args: &Value, result: &str) {
        if args.get("calling_client").and_then(Value::as_str) == Some("web_client") {
            return;
        }
        let entry = ToolLogEntry {
            time: Local::now().to_rfc3339(),
            tool: tool.to_string(),
            args: redact_args(args),
            result: redact_result(result),
        };
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry);
        while entries.len() > LOG_CAPACITY {
            entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ToolLogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(text: &str) -> String {
    let mut shortened: String = text.chars().take(REDACT_THRESHOLD).collect();
    shortened.push_str(ELLIPSIS);
    shortened
}

/// Oversized results are either structurally redacted (a JSON object with an
/// embedded image keeps everything but the image payload) or truncated.
fn redact_result(result: &str) -> String {
    if result.chars().count() <= REDACT_THRESHOLD {
        return result.to_string();
    }
    if let Ok(mut value) = serde_json::from_str::<Value>(result) {
        if let Some(object) = value.as_object_mut() {
            if object.contains_key("image_jpeg_base64") {
                object.insert(
                    "image_jpeg_base64".to_string(),
                    Value::String(IMAGE_SENTINEL.to_string()),
                );
                return value.to_string();
            }
        }
    }
    truncate(result)
}

/// Arguments are kept structurally, with any oversized string value cut down.
fn redact_args(args: &Value) -> Value {
    let mut redacted = args.clone();
    if let Some(object) = redacted.as_object_mut() {
        for value in object.values_mut() {
            if let Value::String(text) = value {
                if text.chars().count() > REDACT_THRESHOLD {
                    *value = Value::String(truncate(text));
                }
            }
        }
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capacity_is_bounded() {
        let log = AuditLog::new();
        for i in 0..60 {
            log.record("get_robot_status", &json!({}), &format!("reply {}", i));
        }
        let entries = log.snapshot();
        assert_eq!(entries.len(), LOG_CAPACITY);
        // the ten oldest entries were evicted; order stays newest-last
        assert_eq!(entries[0].result, "reply 10");
        assert_eq!(entries[49].result, "reply 59");
    }

    #[test]
    fn test_image_payload_is_redacted() {
        let log = AuditLog::new();
        let huge = "A".repeat(2000);
        let result = json!({"image_jpeg_base64": huge, "detections": []}).to_string();
        log.record("get_live_image", &json!({"return_image": true}), &result);

        let recorded = &log.snapshot()[0].result;
        assert!(recorded.contains("<image_jpeg_base64 omitted>"));
        assert!(recorded.contains("detections"));
        assert!(!recorded.contains("AAAA"));
    }

    #[test]
    fn test_long_plain_result_is_truncated() {
        let log = AuditLog::new();
        let long = "x".repeat(800);
        log.record("get_robot_status", &json!({}), &long);

        let recorded = &log.snapshot()[0].result;
        assert_eq!(recorded.chars().count(), 501);
        assert!(recorded.ends_with('…'));
    }

    #[test]
    fn test_short_result_kept_verbatim() {
        let log = AuditLog::new();
        log.record("execute_sequence", &json!({"commands": "grip open"}), "Success");
        assert_eq!(log.snapshot()[0].result, "Success");
    }

    #[test]
    fn test_web_client_calls_are_not_recorded() {
        let log = AuditLog::new();
        log.record(
            "get_live_image",
            &json!({"calling_client": "web_client"}),
            "{}",
        );
        assert!(log.is_empty());
    }

    #[test]
    fn test_oversized_argument_is_truncated() {
        let log = AuditLog::new();
        let args = json!({"commands": "y".repeat(900), "description": "stack"});
        log.record("execute_sequence", &args, "Success");

        let recorded = &log.snapshot()[0].args;
        assert_eq!(
            recorded["commands"].as_str().unwrap().chars().count(),
            501
        );
        assert_eq!(recorded["description"], "stack");
    }
}
