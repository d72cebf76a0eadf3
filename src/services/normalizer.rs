//! Maps the server's loosely structured payloads onto [`RouletteEntity`].
//!
//! Entity payloads come in a few shapes that carry the same information. They are
//! resolved by an ordered list of structural matchers; the first match wins.

use crate::error::{AppError, Result};
use crate::types::{normalize_name, RouletteEntity, SpinColor, SpinResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

const ID_FIELDS: &[&str] = &["id", "roulette_id", "rouletteId", "table_id", "tableId"];
const NAME_FIELDS: &[&str] = &[
    "name",
    "roulette_name",
    "rouletteName",
    "display_name",
    "displayName",
    "title",
];
const ACTIVE_FIELDS: &[&str] = &["isActive", "is_active", "active", "online"];
const HISTORY_FIELDS: &[&str] = &[
    "history",
    "numbers",
    "spins",
    "results",
    "last_numbers",
    "lastNumbers",
    "recent",
];
const NESTED_FIELDS: &[&str] = &["data", "stats", "payload", "roulette"];
const BATCH_FIELDS: &[&str] = &["data", "roulettes", "tables", "items"];
const SPIN_NUMBER_FIELDS: &[&str] = &["number", "num", "value", "result"];
const SPIN_COLOR_FIELDS: &[&str] = &["color", "colour"];
const SPIN_TIME_FIELDS: &[&str] = &["timestamp", "time", "created_at", "createdAt", "date"];

/// Frame types that carry roulette data.
const DATA_FRAME_TYPES: &[&str] = &["update", "all_roulettes_update", "snapshot"];

/// Entity payloads extracted from one frame or snapshot response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    /// The whole batch was withheld pending access.
    pub encrypted: bool,
    pub payloads: Vec<Value>,
}

/// Recognized layouts of an entity's spin history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// A list of spin objects under a history field.
    SpinObjects,
    /// A list of bare numbers under a history field.
    BareNumbers,
    /// One of the above, wrapped in a nested object.
    NestedList,
}

enum ResolvedHistory<'a> {
    Objects(&'a [Value]),
    Numbers(&'a [Value]),
}

type ShapeMatcher = for<'a> fn(&'a Value) -> Option<ResolvedHistory<'a>>;

/// Matchers in priority order.
const SHAPE_MATCHERS: &[(PayloadShape, ShapeMatcher)] = &[
    (PayloadShape::SpinObjects, match_spin_objects),
    (PayloadShape::BareNumbers, match_bare_numbers),
    (PayloadShape::NestedList, match_nested_list),
];

impl RawBatch {
    /// A batch withheld as a whole, with nothing readable in it.
    pub fn withheld() -> Self {
        Self {
            encrypted: true,
            payloads: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Parse one raw stream frame.
pub fn parse_frame(text: &str) -> Result<RawBatch> {
    let value: Value = serde_json::from_str(text)?;
    extract_batch(value)
}

/// Split a frame or snapshot body into entity payloads.
pub fn extract_batch(value: Value) -> Result<RawBatch> {
    match value {
        Value::Array(payloads) => Ok(RawBatch {
            encrypted: false,
            payloads,
        }),
        Value::Object(_) => extract_object(value),
        other => Err(AppError::MalformedPayload(format!(
            "frame is {}",
            type_name(&other)
        ))),
    }
}

fn extract_object(value: Value) -> Result<RawBatch> {
    let encrypted = value.get("encrypted").map(is_truthy).unwrap_or(false);

    let header = FrameHeader::deserialize(&value).unwrap_or(FrameHeader { kind: None });
    if let Some(kind) = header.kind.as_deref() {
        if !DATA_FRAME_TYPES.contains(&kind) && !encrypted {
            debug!("Ignoring '{}' frame", kind);
            return Ok(RawBatch::default());
        }
    }

    // An untyped object with an identity is one entity, even if it nests its
    // history under `data`.
    let has_identity = identity(&value).is_some();
    if header.kind.is_none() && has_identity {
        return Ok(RawBatch {
            encrypted,
            payloads: vec![value],
        });
    }

    if let Some(data) = BATCH_FIELDS.iter().find_map(|f| value.get(*f)) {
        let payloads = match data {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![data.clone()],
            Value::Null => Vec::new(),
            other => {
                return Err(AppError::MalformedPayload(format!(
                    "batch data is {}",
                    type_name(other)
                )))
            }
        };
        return Ok(RawBatch { encrypted, payloads });
    }

    if encrypted {
        return Ok(RawBatch::withheld());
    }

    Err(AppError::MalformedPayload(
        "frame carries no roulette data".to_string(),
    ))
}

/// Identity of an entity payload: `(id, display_name)`.
///
/// Payloads with only a name use the normalized name as id.
pub fn identity(payload: &Value) -> Option<(String, String)> {
    let id = ID_FIELDS
        .iter()
        .find_map(|f| payload.get(*f).and_then(scalar_to_string));
    let name = NAME_FIELDS
        .iter()
        .find_map(|f| payload.get(*f).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match (id, name) {
        (Some(id), Some(name)) => Some((id, name)),
        (Some(id), None) => Some((id.clone(), id)),
        (None, Some(name)) => Some((normalize_name(&name), name)),
        (None, None) => None,
    }
}

/// Whether a single payload is marked as withheld.
pub fn is_withheld(payload: &Value) -> bool {
    payload.get("encrypted").map(is_truthy).unwrap_or(false)
}

/// First shape in priority order that structurally matches `payload`.
pub fn detect_shape(payload: &Value) -> Option<PayloadShape> {
    SHAPE_MATCHERS
        .iter()
        .find(|(_, matcher)| matcher(payload).is_some())
        .map(|(shape, _)| *shape)
}

/// Convert one entity payload into canonical form.
pub fn normalize_entity(payload: &Value) -> Result<RouletteEntity> {
    let (id, display_name) = identity(payload)
        .ok_or_else(|| AppError::MalformedPayload("payload has no id or name".to_string()))?;

    let resolved = SHAPE_MATCHERS
        .iter()
        .find_map(|(_, matcher)| matcher(payload))
        .ok_or_else(|| {
            AppError::MalformedPayload(format!("unrecognized history shape for '{}'", id))
        })?;

    let (items, mut history): (&[Value], Vec<SpinResult>) = match resolved {
        ResolvedHistory::Objects(items) => (
            items,
            items.iter().filter_map(|item| spin_from_object(item, &id)).collect(),
        ),
        ResolvedHistory::Numbers(items) => (
            items,
            items
                .iter()
                .filter_map(number_of)
                .filter_map(|n| SpinResult::new(n, None, id.clone()))
                .collect(),
        ),
    };

    if history.len() < items.len() {
        debug!(
            "Dropped {} invalid spins for '{}'",
            items.len() - history.len(),
            id
        );
    }
    if !items.is_empty() && history.is_empty() {
        return Err(AppError::MalformedPayload(format!(
            "no valid spins for '{}'",
            id
        )));
    }

    order_newest_first(&mut history);

    Ok(RouletteEntity {
        id,
        display_name,
        is_active: active_flag(payload),
        history,
    })
}

/// Normalize every payload, skipping (and logging) the ones that do not parse.
pub fn normalize_batch(payloads: &[Value]) -> Vec<RouletteEntity> {
    payloads
        .iter()
        .filter_map(|payload| match normalize_entity(payload) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!("Skipping roulette payload: {}", e);
                None
            }
        })
        .collect()
}

fn match_spin_objects(payload: &Value) -> Option<ResolvedHistory<'_>> {
    HISTORY_FIELDS.iter().find_map(|f| match payload.get(*f) {
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => {
            Some(ResolvedHistory::Objects(items.as_slice()))
        }
        _ => None,
    })
}

fn match_bare_numbers(payload: &Value) -> Option<ResolvedHistory<'_>> {
    HISTORY_FIELDS.iter().find_map(|f| match payload.get(*f) {
        Some(Value::Array(items)) if items.iter().all(|v| number_of(v).is_some()) => {
            Some(ResolvedHistory::Numbers(items.as_slice()))
        }
        _ => None,
    })
}

fn match_nested_list(payload: &Value) -> Option<ResolvedHistory<'_>> {
    NESTED_FIELDS.iter().find_map(|f| match payload.get(*f) {
        Some(nested @ Value::Object(_)) => {
            match_spin_objects(nested).or_else(|| match_bare_numbers(nested))
        }
        _ => None,
    })
}

fn spin_from_object(item: &Value, entity_id: &str) -> Option<SpinResult> {
    let number = SPIN_NUMBER_FIELDS
        .iter()
        .find_map(|f| item.get(*f).and_then(number_of))?;
    let timestamp = SPIN_TIME_FIELDS
        .iter()
        .find_map(|f| item.get(*f).and_then(parse_timestamp));
    let spin = SpinResult::new(number, timestamp, entity_id)?;

    let color = SPIN_COLOR_FIELDS
        .iter()
        .find_map(|f| item.get(*f).and_then(Value::as_str))
        .and_then(SpinColor::parse);

    Some(match color {
        Some(color) => spin.with_color(color),
        None => spin,
    })
}

/// Sort by timestamp (newest first) when every spin has one, and drop exact
/// duplicates. Untimed histories keep the server's order.
fn order_newest_first(history: &mut Vec<SpinResult>) {
    if history.is_empty() || history.iter().any(|s| s.timestamp.is_none()) {
        return;
    }
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut seen = HashSet::new();
    history.retain(|s| seen.insert((s.number, s.timestamp)));
}

fn active_flag(payload: &Value) -> bool {
    if let Some(flag) = ACTIVE_FIELDS.iter().find_map(|f| payload.get(*f)) {
        return is_truthy(flag);
    }
    match payload.get("status").and_then(Value::as_str) {
        Some(status) => matches!(
            status.to_lowercase().as_str(),
            "active" | "online" | "open" | "live"
        ),
        None => true,
    }
}

fn number_of(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Values past 1e12 are milliseconds.
            if raw.abs() >= 1_000_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            s.parse::<i64>()
                .ok()
                .and_then(|n| parse_timestamp(&Value::from(n)))
        }
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
