//! Session event log for script execution.
//!
//! Every segment an [`ExecutionModel`](crate::exec::ExecutionModel) executes
//! produces a [`SessionEvent`]. The model keeps them in memory; a host that
//! wants an on-disk trail writes them as NDJSON (one JSON object per line).
//!
//! # Event Format
//!
//! Each event is a JSON object with the following fields:
//! - `ts`: RFC3339 timestamp
//! - `kind`: what happened (state, function_call, run, resume, ...)
//! - `turn`: the agent turn counter when the event occurred
//! - `details`: freeform object with kind-specific details
//!
//! ```no_run
//! use margarita::events::{EventKind, SessionEvent, append_events};
//! use serde_json::json;
//!
//! let event = SessionEvent::new(EventKind::Run, 0).with_details(json!({"tools": ["search"]}));
//! append_events("session.ndjson", &[event])?;
//! # Ok::<(), margarita::error::MargaritaError>(())
//! ```

use crate::error::{MargaritaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Kinds of session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Function names bound into the call table
    Import,
    /// Persistent variable written by `@state`
    State,
    /// Host function invoked
    FunctionCall,
    /// Tools added to the registered set
    ToolRegister,
    /// Output buffer emptied
    ContextClear,
    /// Registered tool set emptied
    ToolClear,
    /// Prose appended to the output buffer
    Prose,
    /// Execution suspended for the agent
    Run,
    /// Agent response received
    Resume,
    /// Tool invoked by the agent while suspended
    ToolCall,
    /// Failed segment re-entered
    Retry,
    Completed,
    Failed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Import => write!(f, "import"),
            EventKind::State => write!(f, "state"),
            EventKind::FunctionCall => write!(f, "function_call"),
            EventKind::ToolRegister => write!(f, "tool_register"),
            EventKind::ContextClear => write!(f, "context_clear"),
            EventKind::ToolClear => write!(f, "tool_clear"),
            EventKind::Prose => write!(f, "prose"),
            EventKind::Run => write!(f, "run"),
            EventKind::Resume => write!(f, "resume"),
            EventKind::ToolCall => write!(f, "tool_call"),
            EventKind::Retry => write!(f, "retry"),
            EventKind::Completed => write!(f, "completed"),
            EventKind::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    pub kind: EventKind,

    /// Agent turn counter at the time of the event.
    pub turn: u32,

    /// Freeform details object with kind-specific information.
    pub details: Value,
}

impl SessionEvent {
    /// Create a new event stamped with the current time.
    pub fn new(kind: EventKind, turn: u32) -> Self {
        Self {
            ts: Utc::now(),
            kind,
            turn,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            MargaritaError::UserError(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// Write events to `writer`, one JSON object per line.
pub fn write_ndjson<W: Write>(writer: &mut W, events: &[SessionEvent]) -> Result<()> {
    for event in events {
        let line = event.to_ndjson_line()?;
        writeln!(writer, "{}", line)
            .map_err(|e| MargaritaError::UserError(format!("failed to write event: {}", e)))?;
    }
    Ok(())
}

/// Append events to the NDJSON file at `path`, creating the file and its
/// parent directory if needed.
pub fn append_events<P: AsRef<Path>>(path: P, events: &[SessionEvent]) -> Result<()> {
    let path = path.as_ref();

    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        fs::create_dir_all(dir).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to create events directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to open events file '{}': {}",
                path.display(),
                e
            ))
        })?;

    write_ndjson(&mut file, events)?;

    file.sync_all().map_err(|e| {
        MargaritaError::UserError(format!(
            "failed to sync events file '{}': {}",
            path.display(),
            e
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_event_creation() {
        let event = SessionEvent::new(EventKind::Run, 2);

        assert_eq!(event.kind, EventKind::Run);
        assert_eq!(event.turn, 2);
        assert_eq!(event.details, json!({}));
        let age = Utc::now().signed_duration_since(event.ts);
        assert!(age.num_minutes() < 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::new(EventKind::FunctionCall, 0)
            .with_details(json!({"name": "add", "target": "result"}));

        let json_line = event.to_ndjson_line().unwrap();
        assert!(!json_line.contains('\n'));
        assert!(json_line.contains("\"function_call\""));

        let parsed: SessionEvent = serde_json::from_str(&json_line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_append_events_creates_file_and_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("session.ndjson");

        append_events(&path, &[SessionEvent::new(EventKind::State, 0)]).unwrap();
        append_events(
            &path,
            &[
                SessionEvent::new(EventKind::Run, 0),
                SessionEvent::new(EventKind::Resume, 1),
            ],
        )
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        let kinds: Vec<EventKind> = content
            .lines()
            .map(|line| serde_json::from_str::<SessionEvent>(line).unwrap().kind)
            .collect();
        assert_eq!(kinds, [EventKind::State, EventKind::Run, EventKind::Resume]);
    }

    #[test]
    fn test_event_kind_display_matches_serialization() {
        for kind in [
            EventKind::Import,
            EventKind::ContextClear,
            EventKind::ToolClear,
            EventKind::ToolCall,
            EventKind::Completed,
        ] {
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, json!(kind.to_string()));
        }
    }
}
