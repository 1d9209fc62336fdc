use serde_json::Value;

/// Fixed rename table from pre-envelope event names to the canonical
/// `component.verb` scheme. Not exhaustive — the spec itself says "etc." —
/// new legacy names are added here as they're discovered in the wild.
const LEGACY_RENAMES: &[(&str, &str)] = &[
    ("execution_started", "run.started"),
    ("execution_completed", "run.completed"),
    ("execution_failed", "run.failed"),
    ("tool_called", "tool.requested"),
    ("tool_completed", "tool.completed"),
    ("task_started", "task.started"),
    ("task_completed", "task.completed"),
    ("memory_written", "memory.recorded"),
];

pub fn normalize_legacy_type(event_type: &str) -> &str {
    LEGACY_RENAMES
        .iter()
        .find(|(old, _)| *old == event_type)
        .map(|(_, new)| *new)
        .unwrap_or(event_type)
}

/// Inserts `fallback` at `key` only if the key is absent or explicitly
/// `null` — a present `0`/`false`/`""` is left untouched. This is the
/// nullish-coalescing merge spec §4.10 requires, as opposed to a truthiness
/// check that would clobber legitimate falsy values.
pub fn nullish_coalesce_default(payload: &mut Value, key: &str, fallback: Value) {
    if let Value::Object(map) = payload {
        let should_default = match map.get(key) {
            None => true,
            Some(Value::Null) => true,
            Some(_) => false,
        };
        if should_default {
            map.insert(key.to_string(), fallback);
        }
    }
}

/// Renames a legacy event type to its canonical form and backfills any
/// fields the canonical shape expects but the legacy payload may not carry,
/// without disturbing falsy values the legacy payload already set.
pub fn normalize_legacy_event(event_type: &str, mut payload: Value) -> (String, Value) {
    let new_type = normalize_legacy_type(event_type).to_string();
    if new_type != event_type {
        nullish_coalesce_default(&mut payload, "retryCount", Value::from(0));
    }
    (new_type, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renames_known_legacy_type() {
        assert_eq!(normalize_legacy_type("execution_started"), "run.started");
        assert_eq!(normalize_legacy_type("tool_called"), "tool.requested");
    }

    #[test]
    fn unknown_type_passes_through_unchanged() {
        assert_eq!(normalize_legacy_type("run.started"), "run.started");
    }

    #[test]
    fn nullish_default_fills_missing_key() {
        let mut payload = json!({"a": 1});
        nullish_coalesce_default(&mut payload, "retryCount", json!(0));
        assert_eq!(payload["retryCount"], json!(0));
    }

    #[test]
    fn nullish_default_preserves_falsy_present_values() {
        let mut payload = json!({"retryCount": false, "count": 0, "label": ""});
        nullish_coalesce_default(&mut payload, "retryCount", json!(99));
        nullish_coalesce_default(&mut payload, "count", json!(99));
        nullish_coalesce_default(&mut payload, "label", json!("fallback"));
        assert_eq!(payload["retryCount"], json!(false));
        assert_eq!(payload["count"], json!(0));
        assert_eq!(payload["label"], json!(""));
    }

    #[test]
    fn normalize_legacy_event_renames_and_backfills() {
        let (new_type, payload) = normalize_legacy_event("tool_called", json!({"toolName": "grep"}));
        assert_eq!(new_type, "tool.requested");
        assert_eq!(payload["retryCount"], json!(0));
    }
}
