//! Decoding of collaborator response bodies.
//!
//! Errors are plain messages; the HTTP layer wraps them in
//! [`UpstreamError::Contract`](crate::UpstreamError::Contract) with the
//! collaborator name.

use pw_schemas::{id_text, EventIdentity, EventKind, KindCounts};
use serde_json::{Map, Value};

/// `GET /statistics`.
///
/// Accepts both `{ race_events, telemetry }` at the top level and the
/// processing service's native `{ stat_type_counts: { ... } }`. Telemetry may
/// be keyed `telemetry` or `telemetry_data`. Missing kinds count as 0.
pub fn parse_stats(body: &Value) -> Result<KindCounts, String> {
    let root = body
        .as_object()
        .ok_or_else(|| "statistics body is not an object".to_string())?;
    let counts = match root.get("stat_type_counts") {
        Some(Value::Object(inner)) => inner,
        Some(Value::Null) | None => root,
        Some(other) => return Err(format!("stat_type_counts is not an object: {other}")),
    };
    Ok(KindCounts::new(
        count_field(counts, &["race_events"])?,
        count_field(counts, &["telemetry", "telemetry_data"])?,
    ))
}

/// `GET /record_count`: `{ race_events, telemetry_data }`.
pub fn parse_record_counts(body: &Value) -> Result<KindCounts, String> {
    let root = body
        .as_object()
        .ok_or_else(|| "record_count body is not an object".to_string())?;
    Ok(KindCounts::new(
        count_field(root, &["race_events"])?,
        count_field(root, &["telemetry_data", "telemetry"])?,
    ))
}

/// `GET /event_ids` or `GET /telemetry_ids`.
///
/// Strict: every entry must carry both the kind's id field and `trace_id` as
/// strings. Numeric ids are accepted and rendered as strings.
pub fn parse_identities(kind: EventKind, body: &Value) -> Result<Vec<EventIdentity>, String> {
    let entries = body
        .as_array()
        .ok_or_else(|| format!("{} id list is not an array", kind.as_str()))?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let id = id_string(entry.get(kind.id_field()))
                .ok_or_else(|| format!("entry {i} lacks {}", kind.id_field()))?;
            let trace_id = id_string(entry.get("trace_id"))
                .ok_or_else(|| format!("entry {i} lacks trace_id"))?;
            Ok(EventIdentity::new(id, trace_id, kind))
        })
        .collect()
}

// Same normalisation as the topic side, so both halves of the diff agree.
fn id_string(v: Option<&Value>) -> Option<String> {
    v.and_then(id_text)
}

fn count_field(obj: &Map<String, Value>, keys: &[&str]) -> Result<i64, String> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(v) => {
                return v
                    .as_i64()
                    .ok_or_else(|| format!("count {key} is not an integer: {v}"))
            }
        }
    }
    Ok(0)
}
