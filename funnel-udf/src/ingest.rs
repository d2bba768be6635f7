//! Loads raw event rows into clean `Event`s.
//!
//! Rows are JSON objects, one per line. The entity, event and timestamp columns are detected
//! from the first row unless they are given explicitly. Rows that are missing a field or carry
//! a timestamp we cannot read are dropped, as are exact repeats of an earlier
//! `(entity, event, timestamp)` row.

use std::collections::HashSet;
use std::io::BufRead;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use funnel_engine::Event;
use serde_json::{Map, Value};
use thiserror::Error;

pub const ENTITY_COLUMNS: &[&str] = &[
    "entity_id",
    "user_id",
    "distinct_id",
    "person_id",
    "customer_id",
    "visitor_id",
    "session_id",
];
pub const EVENT_COLUMNS: &[&str] = &["event_name", "event", "event_type", "action", "step"];
pub const TIMESTAMP_COLUMNS: &[&str] = &[
    "timestamp",
    "event_time",
    "event_timestamp",
    "occurred_at",
    "created_at",
    "time",
    "ts",
];

// Epoch numbers above this are read as milliseconds rather than seconds
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("could not find a {kind} column, tried {tried:?}")]
    MissingColumn {
        kind: &'static str,
        tried: Vec<String>,
    },
    #[error("failed to read events: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ColumnOverrides {
    pub entity: Option<String>,
    pub event: Option<String>,
    pub timestamp: Option<String>,
    pub breakdown: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    pub entity: String,
    pub event: String,
    pub timestamp: String,
    pub breakdown: Option<String>,
}

#[derive(Debug, Default)]
pub struct Ingested {
    pub events: Vec<Event>,
    /// None when there were no rows to detect columns from
    pub columns: Option<Columns>,
    pub dropped_rows: usize,
    pub duplicate_rows: usize,
}

/// Reads JSON-lines rows. Blank lines are skipped, lines that are not JSON objects are dropped.
pub fn read_events<R: BufRead>(
    reader: R,
    overrides: &ColumnOverrides,
) -> Result<Ingested, IngestError> {
    let mut rows = Vec::new();
    let mut unreadable = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Map<String, Value>>(&line) {
            Ok(row) => rows.push(row),
            Err(error) => {
                tracing::debug!(line = index + 1, %error, "dropping unreadable row");
                unreadable += 1;
            }
        }
    }

    let mut ingested = from_rows(rows, overrides)?;
    ingested.dropped_rows += unreadable;
    Ok(ingested)
}

pub fn from_rows(
    rows: Vec<Map<String, Value>>,
    overrides: &ColumnOverrides,
) -> Result<Ingested, IngestError> {
    let Some(first) = rows.first() else {
        return Ok(Ingested::default());
    };
    let columns = detect_columns(first, overrides)?;

    let mut seen = HashSet::new();
    let mut ingested = Ingested::default();

    for row in &rows {
        let Some(event) = to_event(row, &columns) else {
            ingested.dropped_rows += 1;
            continue;
        };

        let key = (event.entity_id.clone(), event.event_name.clone(), event.timestamp);
        if !seen.insert(key) {
            ingested.duplicate_rows += 1;
            continue;
        }

        ingested.events.push(event);
    }

    tracing::info!(
        events = ingested.events.len(),
        dropped = ingested.dropped_rows,
        duplicates = ingested.duplicate_rows,
        entity_column = %columns.entity,
        event_column = %columns.event,
        timestamp_column = %columns.timestamp,
        "ingested events"
    );

    ingested.columns = Some(columns);
    Ok(ingested)
}

/// Picks the entity, event and timestamp columns from a sample row.
/// Candidate names are tried in order and compared case-insensitively.
pub fn detect_columns(
    sample: &Map<String, Value>,
    overrides: &ColumnOverrides,
) -> Result<Columns, IngestError> {
    let pick = |kind: &'static str, explicit: &Option<String>, candidates: &[&str]| {
        if let Some(column) = explicit {
            return Ok(column.clone());
        }

        candidates
            .iter()
            .find_map(|candidate| {
                sample
                    .keys()
                    .find(|key| key.eq_ignore_ascii_case(candidate))
                    .cloned()
            })
            .ok_or_else(|| IngestError::MissingColumn {
                kind,
                tried: candidates.iter().map(|c| c.to_string()).collect(),
            })
    };

    Ok(Columns {
        entity: pick("entity", &overrides.entity, ENTITY_COLUMNS)?,
        event: pick("event", &overrides.event, EVENT_COLUMNS)?,
        timestamp: pick("timestamp", &overrides.timestamp, TIMESTAMP_COLUMNS)?,
        breakdown: overrides.breakdown.clone(),
    })
}

fn to_event(row: &Map<String, Value>, columns: &Columns) -> Option<Event> {
    let entity_id = as_text(row.get(&columns.entity)?)?;
    let event_name = as_text(row.get(&columns.event)?)?;
    let timestamp = parse_timestamp(row.get(&columns.timestamp)?)?;

    let event = Event::new(entity_id, event_name, timestamp);
    match columns
        .breakdown
        .as_ref()
        .and_then(|column| row.get(column))
        .and_then(as_text)
    {
        Some(breakdown) => Some(event.with_breakdown(breakdown)),
        None => Some(event),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 strings, naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` (read as UTC), bare dates, and
/// unix epochs in seconds or milliseconds, either as numbers or numeric strings.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_epoch(n.as_f64()?),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(s) {
        return Some(timestamp.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(s, format) {
            return Some(timestamp.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }

    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }

    if value.abs() >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value.round() as i64)
    } else {
        let seconds = value.floor();
        let nanos = ((value - seconds) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(seconds as i64, nanos)
    }
}
