use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::telemetry::contract::{ComponentId, EventData, EventLevel, TelemetryEntry};
use crate::Result;
use coolq_core::TickReport;

/// Appends telemetry entries to a JSON-lines file.
///
/// Every line is `{timestamp_us, component, event}` plus the entry id,
/// level and run id. Write failures are logged and never stop a run.
#[derive(Clone)]
pub struct TelemetryLogger {
    run_id: Uuid,
    writer: Arc<Mutex<File>>,
}

impl TelemetryLogger {
    pub fn with_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            writer: Arc::new(Mutex::new(file)),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log(&self, entry: &TelemetryEntry) {
        let line = json!({
            "timestamp_us": entry.timestamp_us,
            "component": entry.component,
            "event": entry.event,
            "id": entry.id,
            "level": entry.level,
            "run_id": entry.correlation_id,
        });
        match self.writer.lock() {
            Ok(mut writer) => {
                if let Err(err) = writeln!(writer, "{}", line) {
                    log::error!("telemetry write failed: {}", err);
                }
            }
            Err(_) => log::error!("telemetry writer lock poisoned"),
        }
    }

    pub fn event(&self, component: ComponentId, level: EventLevel, event: EventData) {
        self.log(&TelemetryEntry::new(component, level, event, Some(self.run_id)));
    }

    pub fn tick(&self, report: &TickReport) {
        self.log(&TelemetryEntry::tick(report, Some(self.run_id)));
    }
}
