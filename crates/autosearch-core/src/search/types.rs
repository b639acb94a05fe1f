//! Search request and result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Normalize a query into its dedup/cache key
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Declared urgency of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Rank used by the backlog (higher drains first)
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Who raised a search trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    #[default]
    UserInput,
    Autonomous,
    ReportBuilding,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::Autonomous => "autonomous",
            Self::ReportBuilding => "report_building",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A caller's request to run a lookup, before admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub context: String,
    pub priority: Priority,
    pub source: TriggerSource,
}

impl SearchRequest {
    /// Create a user-input request with medium priority
    pub fn new(query: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: context.into(),
            priority: Priority::default(),
            source: TriggerSource::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: TriggerSource) -> Self {
        self.source = source;
        self
    }
}

/// An admitted search request awaiting or undergoing dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTrigger {
    pub id: Uuid,
    /// Trimmed query text
    pub query: String,
    pub context: String,
    pub priority: Priority,
    pub source: TriggerSource,
    pub created_at: DateTime<Utc>,
}

impl SearchTrigger {
    /// Admit a request, assigning its id and admission time
    pub fn admit(request: SearchRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: request.query.trim().to_string(),
            context: request.context,
            priority: request.priority,
            source: request.source,
            created_at: Utc::now(),
        }
    }

    /// Dedup/cache key for this trigger
    pub fn key(&self) -> String {
        normalize_query(&self.query)
    }
}

/// Economic indicators of a location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EconomicData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gdp_local: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_industries: Option<Vec<String>>,
}

/// Demographic indicators of a location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemographicData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_age: Option<f64>,
}

/// Structured profile a provider may attach to its result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationProfile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economics: Option<EconomicData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographics: Option<DemographicData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<serde_json::Value>,
}

impl LocationProfile {
    pub fn has_leaders(&self) -> bool {
        !self.leaders.is_empty()
    }

    pub fn has_economics(&self) -> bool {
        self.economics.as_ref().is_some_and(|e| e.gdp_local.is_some_and(|g| g != 0.0))
    }

    pub fn has_demographics(&self) -> bool {
        self.demographics
            .as_ref()
            .is_some_and(|d| d.population.is_some_and(|p| p > 0))
    }

    pub fn has_infrastructure(&self) -> bool {
        self.infrastructure.as_ref().is_some_and(|v| !v.is_null())
    }
}

/// Provider output after normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<LocationProfile>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality: Option<f64>,
}

impl NormalizedResult {
    /// A result carrying no profile, no sources and no summary counts as a miss
    pub fn is_empty(&self) -> bool {
        self.profile.is_none()
            && self.sources.is_empty()
            && self.summary.as_deref().is_none_or(|s| s.trim().is_empty())
    }
}

/// Outcome of running one trigger through the provider chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    /// `None` when no provider produced anything
    pub payload: Option<NormalizedResult>,
    pub confidence: f64,
    pub latency_ms: u64,
    pub sources: Vec<String>,
    /// Name of the provider that answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }
}
