use coolq_core::{ConfigSnapshot, ControllerStatus, ForcedActionResult, TickOutcome, TickReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEntry {
    pub id: Uuid,
    pub timestamp_us: i64,
    pub component: ComponentId,
    pub level: EventLevel,
    pub event: EventData,
    /// Run the entry belongs to
    pub correlation_id: Option<Uuid>,
}

impl TelemetryEntry {
    pub fn new(
        component: ComponentId,
        level: EventLevel,
        event: EventData,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp_us: chrono::Utc::now().timestamp_micros(),
            component,
            level,
            event,
            correlation_id,
        }
    }

    /// Entry for a control tick, leveled by its outcome.
    pub fn tick(report: &TickReport, correlation_id: Option<Uuid>) -> Self {
        let level = if report.error.is_some() {
            EventLevel::Error
        } else {
            match report.outcome {
                TickOutcome::Gated | TickOutcome::Degraded => EventLevel::Warning,
                TickOutcome::Skipped | TickOutcome::Idle => EventLevel::Debug,
                TickOutcome::Acted | TickOutcome::Forced => EventLevel::Info,
            }
        };
        let component = if report.fault.is_some() {
            ComponentId::SafetyGate
        } else {
            ComponentId::ControlLoop
        };
        Self::new(
            component,
            level,
            EventData::Tick {
                report: report.clone(),
            },
            correlation_id,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentId {
    ControlLoop,
    SafetyGate,
    Calibration,
    Simulator,
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventData {
    RunStarted {
        config_digest: String,
        config: ConfigSnapshot,
        seed: u64,
    },
    Tick {
        report: TickReport,
    },
    ForcedAction {
        requested: String,
        result: ForcedActionResult,
    },
    Reset,
    RunFinished {
        ticks: usize,
        status: ControllerStatus,
    },
    Custom {
        payload: serde_json::Value,
    },
}
