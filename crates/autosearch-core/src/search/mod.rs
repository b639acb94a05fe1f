//! Search data model
//!
//! Triggers are what callers ask for; results are what the provider chain
//! produced for them. Report parameters feed proactive searches.

mod report;
mod types;

pub use report::{ReportParams, extract_location_queries};
pub use types::{
    DemographicData, EconomicData, LocationProfile, NormalizedResult, Priority, SearchRequest,
    SearchResult, SearchTrigger, TriggerSource, normalize_query,
};
