mod logging;

pub use logging::{EventFilter, EventLog, EventLogLayer, LogEvent, Severity};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG.
    pub log_level: Level,
    /// Per-module overrides (e.g. "colloquy_remote" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Whether to persist warn+ events to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
    /// Persisted events kept at startup; older ones are pruned.
    pub max_persisted_events: Option<usize>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
            log_to_sqlite: false,
            log_db_path: PathBuf::from("logs.db"),
            max_persisted_events: None,
        }
    }
}

impl TelemetryConfig {
    fn filter_directives(&self) -> String {
        let mut directives = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        directives
    }
}

/// Keeps the event log reachable for the lifetime of the process.
pub struct TelemetryGuard {
    events: Option<Arc<EventLog>>,
}

impl TelemetryGuard {
    /// The persisted warn/error log, when enabled.
    pub fn events(&self) -> Option<&EventLog> {
        self.events.as_deref()
    }
}

fn open_event_log(config: &TelemetryConfig) -> Option<Arc<EventLog>> {
    let log = match EventLog::open(&config.log_db_path) {
        Ok(log) => log,
        Err(e) => {
            eprintln!(
                "colloquy-telemetry: cannot open event log {}: {e}",
                config.log_db_path.display()
            );
            return None;
        }
    };
    if let Some(keep) = config.max_persisted_events {
        if let Err(e) = log.prune(keep) {
            eprintln!("colloquy-telemetry: event log prune failed: {e}");
        }
    }
    Some(Arc::new(log))
}

/// Initialize the global subscriber. Call once at startup; a second call
/// leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    // Diagnostics go to stderr; stdout belongs to command output.
    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let events = if config.log_to_sqlite {
        open_event_log(&config)
    } else {
        None
    };
    let event_layer = events.clone().map(EventLogLayer::new);

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(event_layer)
        .try_init()
    {
        eprintln!("colloquy-telemetry: subscriber already set: {e}");
    }

    TelemetryGuard { events }
}
