use serde::Serialize;

/// Indented JSON for a debug log field, or `None` when debug logging is off.
pub(crate) fn debug_json<T: Serialize>(value: &T) -> Option<String> {
    tracing::enabled!(tracing::Level::DEBUG).then(|| {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    })
}
