//! Inbound signals from the host application

use serde::{Deserialize, Serialize};

use crate::search::{Priority, ReportParams};

/// Something happened elsewhere that may warrant a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineSignal {
    /// Report parameters were edited; searched only when `trigger_on_input` is set
    ParamsUpdated { params: ReportParams },
    /// A report is being generated for these parameters
    ReportGenerationStarted { params: ReportParams },
    /// Another subsystem asked for a lookup
    AutonomousSearchRequest {
        query: String,
        #[serde(default)]
        priority: Priority,
    },
}
