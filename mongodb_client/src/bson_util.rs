use std::time::Duration;

use bson::{Bson, Document};

/// Reads a numeric field regardless of whether the server encoded it as an int32, int64 or
/// double.
pub(crate) fn get_int(document: &Document, key: &str) -> Option<i64> {
    match document.get(key)? {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) if value.fract() == 0.0 => Some(*value as i64),
        _ => None,
    }
}

/// Server replies use `ok: 1`, `ok: 1.0` and `ok: true` interchangeably.
pub(crate) fn is_ok(document: &Document) -> bool {
    match document.get("ok") {
        Some(Bson::Boolean(value)) => *value,
        Some(_) => get_int(document, "ok") == Some(1),
        None => false,
    }
}

pub(crate) fn get_bool(document: &Document, key: &str) -> bool {
    document.get_bool(key).unwrap_or(false)
}

pub(crate) fn get_string_list(document: &Document, key: &str) -> Vec<String> {
    document
        .get_array(key)
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// The name of a command is always its first key.
pub(crate) fn command_name(command: &Document) -> String {
    command.keys().next().cloned().unwrap_or_default()
}

pub(crate) fn duration_as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
