//! Durable record of warnings and errors, keyed by conversation.
//!
//! Only WARN and ERROR events are kept. Each row carries the conversation key
//! and remote context id when the event, or any span it happened inside,
//! names them, so "what went wrong with this conversation" is one query.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS events (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    at_ms             INTEGER NOT NULL,
    severity          INTEGER NOT NULL,
    target            TEXT NOT NULL,
    message           TEXT NOT NULL,
    conversation_key  TEXT,
    remote_context_id TEXT,
    fields            TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS events_by_conversation ON events(conversation_key, id);
";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error = 1,
    Warn = 2,
}

impl Severity {
    fn of(level: &Level) -> Option<Self> {
        match *level {
            Level::ERROR => Some(Self::Error),
            Level::WARN => Some(Self::Warn),
            _ => None,
        }
    }

    fn from_rank(rank: i64) -> Self {
        if rank <= Self::Error as i64 {
            Self::Error
        } else {
            Self::Warn
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            other => Err(format!("unknown severity '{other}' (expected error or warn)")),
        }
    }
}

/// One persisted event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub id: i64,
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_context_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LogEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let at_ms: i64 = row.get(1)?;
        let fields: String = row.get(7)?;
        Ok(Self {
            id: row.get(0)?,
            at: Utc.timestamp_millis_opt(at_ms).single().unwrap_or_default(),
            severity: Severity::from_rank(row.get(2)?),
            target: row.get(3)?,
            message: row.get(4)?,
            conversation_key: row.get(5)?,
            remote_context_id: row.get(6)?,
            fields: serde_json::from_str(&fields).unwrap_or_default(),
        })
    }
}

/// Narrows [`EventLog::recent`]. The default matches everything.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// Least severe level to include; `Warn` includes errors.
    pub severity: Option<Severity>,
    pub conversation_key: Option<String>,
    pub target_contains: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// An event on its way into the log.
struct PendingEvent<'a> {
    at: DateTime<Utc>,
    severity: Severity,
    target: &'a str,
    message: String,
    tags: Tags,
    fields: Map<String, Value>,
}

pub struct EventLog {
    conn: Mutex<Connection>,
}

impl EventLog {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, event: &PendingEvent<'_>) -> rusqlite::Result<()> {
        let fields = Value::Object(event.fields.clone()).to_string();
        self.conn.lock().execute(
            "INSERT INTO events
                 (at_ms, severity, target, message, conversation_key, remote_context_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.at.timestamp_millis(),
                event.severity as i64,
                event.target,
                event.message,
                event.tags.conversation_key,
                event.tags.remote_context_id,
                fields,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn recent(&self, filter: &EventFilter, limit: usize) -> rusqlite::Result<Vec<LogEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, at_ms, severity, target, message, conversation_key, remote_context_id, fields
             FROM events
             WHERE severity <= ?1
               AND (?2 IS NULL OR conversation_key = ?2)
               AND (?3 IS NULL OR instr(target, ?3) > 0)
               AND at_ms >= ?4
             ORDER BY id DESC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![
                filter.severity.unwrap_or(Severity::Warn) as i64,
                filter.conversation_key,
                filter.target_contains,
                filter.since.map_or(i64::MIN, |t| t.timestamp_millis()),
                i64::try_from(limit).unwrap_or(i64::MAX),
            ],
            LogEvent::from_row,
        )?;
        rows.collect()
    }

    /// Delete everything but the newest `keep` events; returns how many went.
    pub fn prune(&self, keep: usize) -> rusqlite::Result<usize> {
        self.conn.lock().execute(
            "DELETE FROM events
             WHERE id <= (SELECT id FROM events ORDER BY id DESC LIMIT 1 OFFSET ?1)",
            params![i64::try_from(keep).unwrap_or(i64::MAX)],
        )
    }
}

/// Conversation identity carried by an event or inherited from its spans.
#[derive(Clone, Debug, Default, PartialEq)]
struct Tags {
    conversation_key: Option<String>,
    remote_context_id: Option<String>,
}

impl Tags {
    fn take_from(fields: &mut Map<String, Value>) -> Self {
        Self {
            conversation_key: fields.remove("conversation_key").map(into_text),
            remote_context_id: fields.remove("remote_context_id").map(into_text),
        }
    }

    fn is_empty(&self) -> bool {
        self.conversation_key.is_none() && self.remote_context_id.is_none()
    }

    /// Fill gaps from an enclosing span.
    fn inherit(&mut self, outer: &Tags) {
        if self.conversation_key.is_none() {
            self.conversation_key.clone_from(&outer.conversation_key);
        }
        if self.remote_context_id.is_none() {
            self.remote_context_id.clone_from(&outer.remote_context_id);
        }
    }

    /// Values recorded later on the same span win.
    fn update(&mut self, newer: Tags) {
        if newer.conversation_key.is_some() {
            self.conversation_key = newer.conversation_key;
        }
        if newer.remote_context_id.is_some() {
            self.remote_context_id = newer.remote_context_id;
        }
    }
}

fn into_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Every recorded field as JSON.
#[derive(Default)]
struct JsonFields(Map<String, Value>);

impl JsonFields {
    fn put(&mut self, field: &Field, value: impl Into<Value>) {
        self.0.insert(field.name().to_owned(), value.into());
    }
}

impl Visit for JsonFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }
}

/// Writes WARN and ERROR events to an [`EventLog`].
pub struct EventLogLayer {
    log: Arc<EventLog>,
}

impl EventLogLayer {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }
}

impl<S> Layer<S> for EventLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = JsonFields::default();
        attrs.record(&mut fields);
        let tags = Tags::take_from(&mut fields.0);
        if tags.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(tags);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut fields = JsonFields::default();
        values.record(&mut fields);
        let newer = Tags::take_from(&mut fields.0);
        if newer.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            match extensions.get_mut::<Tags>() {
                Some(tags) => tags.update(newer),
                None => extensions.insert(newer),
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(severity) = Severity::of(event.metadata().level()) else {
            return;
        };

        let mut fields = JsonFields::default();
        event.record(&mut fields);
        let mut tags = Tags::take_from(&mut fields.0);
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Tags>() {
                    tags.inherit(outer);
                }
            }
        }
        let message = fields.0.remove("message").map(into_text).unwrap_or_default();

        // Insert failures are dropped.
        let _ = self.log.append(&PendingEvent {
            at: Utc::now(),
            severity,
            target: event.metadata().target(),
            message,
            tags,
            fields: fields.0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    fn open() -> (tempfile::TempDir, Arc<EventLog>) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(&dir.path().join("logs/events.db")).unwrap();
        (dir, Arc::new(log))
    }

    fn event<'a>(severity: Severity, target: &'a str, message: &str, key: Option<&str>) -> PendingEvent<'a> {
        PendingEvent {
            at: Utc::now(),
            severity,
            target,
            message: message.into(),
            tags: Tags {
                conversation_key: key.map(str::to_string),
                remote_context_id: None,
            },
            fields: Map::new(),
        }
    }

    fn messages(events: &[LogEvent]) -> Vec<&str> {
        events.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn severity_filter_is_a_threshold() {
        let (_dir, log) = open();
        log.append(&event(Severity::Warn, "colloquy_remote::http", "slow", None)).unwrap();
        log.append(&event(Severity::Error, "colloquy_store::local", "disk full", None)).unwrap();

        let all = log.recent(&EventFilter::default(), 10).unwrap();
        assert_eq!(messages(&all), vec!["disk full", "slow"]);

        let errors = EventFilter {
            severity: Some(Severity::Error),
            ..EventFilter::default()
        };
        assert_eq!(messages(&log.recent(&errors, 10).unwrap()), vec!["disk full"]);

        let remote = EventFilter {
            target_contains: Some("remote".into()),
            ..EventFilter::default()
        };
        assert_eq!(messages(&log.recent(&remote, 10).unwrap()), vec!["slow"]);
    }

    #[test]
    fn per_conversation_history_is_newest_first() {
        let (_dir, log) = open();
        for i in 0..5 {
            log.append(&event(Severity::Warn, "t", &format!("a{i}"), Some("slack:a"))).unwrap();
        }
        log.append(&event(Severity::Warn, "t", "b", Some("slack:b"))).unwrap();

        let filter = EventFilter {
            conversation_key: Some("slack:a".into()),
            ..EventFilter::default()
        };
        assert_eq!(messages(&log.recent(&filter, 2).unwrap()), vec!["a4", "a3"]);
    }

    #[test]
    fn since_drops_older_events() {
        let (_dir, log) = open();
        let mut old = event(Severity::Warn, "t", "old", None);
        old.at = Utc::now() - Duration::days(3);
        log.append(&old).unwrap();
        log.append(&event(Severity::Warn, "t", "new", None)).unwrap();

        let filter = EventFilter {
            since: Some(Utc::now() - Duration::hours(1)),
            ..EventFilter::default()
        };
        assert_eq!(messages(&log.recent(&filter, 10).unwrap()), vec!["new"]);
    }

    #[test]
    fn prune_keeps_the_newest() {
        let (_dir, log) = open();
        for i in 0..6 {
            log.append(&event(Severity::Warn, "t", &format!("e{i}"), None)).unwrap();
        }
        assert_eq!(log.prune(2).unwrap(), 4);
        assert_eq!(messages(&log.recent(&EventFilter::default(), 10).unwrap()), vec!["e5", "e4"]);
        assert_eq!(log.prune(10).unwrap(), 0);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("ERROR".parse::<Severity>(), Ok(Severity::Error));
        assert_eq!("warning".parse::<Severity>(), Ok(Severity::Warn));
        assert!("info".parse::<Severity>().is_err());
    }

    #[test]
    fn layer_tags_events_from_enclosing_spans() {
        let (_dir, log) = open();
        let subscriber = tracing_subscriber::registry().with(EventLogLayer::new(log.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("not kept");
            let outer = tracing::info_span!("append", conversation_key = "slack:T1:C1");
            let _outer = outer.enter();
            let inner = tracing::info_span!("push", remote_context_id = tracing::field::Empty);
            let _inner = inner.enter();
            inner.record("remote_context_id", "ctx_1");
            tracing::warn!(error_kind = "timeout", attempts = 2u64, "remote write failed");
        });

        let events = log.recent(&EventFilter::default(), 10).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.severity, Severity::Warn);
        assert_eq!(e.message, "remote write failed");
        assert_eq!(e.conversation_key.as_deref(), Some("slack:T1:C1"));
        assert_eq!(e.remote_context_id.as_deref(), Some("ctx_1"));
        assert_eq!(e.fields["error_kind"], "timeout");
        assert_eq!(e.fields["attempts"], 2);
        assert!(!e.fields.contains_key("conversation_key"));
    }
}
