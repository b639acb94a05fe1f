//! Location query extraction from report parameters
//!
//! Report building asks for searches proactively. The parameters a user fills
//! in (organization, country, region, industries) are scanned for anything
//! that looks like a place worth looking up.

use serde::{Deserialize, Serialize};

/// Report parameters relevant to proactive search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub industry: Vec<String>,
}

/// Extract candidate location queries, de-duplicated in first-seen order
pub fn extract_location_queries(params: &ReportParams) -> Vec<String> {
    let mut queries = Vec::new();

    if let Some(org) = &params.organization_name {
        // Capitalised plain words in an organization name are often cities
        queries.extend(
            org.split_whitespace()
                .filter(|w| w.chars().count() > 3 && is_capitalised_word(w))
                .map(str::to_string),
        );
    }

    for field in [&params.country, &params.region].into_iter().flatten() {
        let trimmed = field.trim();
        if !trimmed.is_empty() {
            queries.push(trimmed.to_string());
        }
    }

    for industry in &params.industry {
        let lower = industry.to_lowercase();
        if lower.contains("regional") || lower.contains("local") {
            queries.push(industry.clone());
        }
    }

    let mut seen = std::collections::HashSet::new();
    queries.retain(|q| seen.insert(q.clone()));
    queries
}

/// `^[A-Z][a-z]+$`
fn is_capitalised_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            let rest: Vec<char> = chars.collect();
            !rest.is_empty() && rest.iter().all(|c| c.is_ascii_lowercase())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_city_like_words_from_organization() {
        let params = ReportParams {
            organization_name: Some("Manila Port Authority of PH and Cebu".into()),
            ..Default::default()
        };
        assert_eq!(
            extract_location_queries(&params),
            vec!["Manila", "Port", "Authority", "Cebu"]
        );
    }

    #[test]
    fn test_skips_short_acronym_and_mixed_case_words() {
        let params = ReportParams {
            organization_name: Some("ACME McDonald Inc Oslo".into()),
            ..Default::default()
        };
        assert_eq!(extract_location_queries(&params), vec!["Oslo"]);
    }

    #[test]
    fn test_country_region_and_local_industries() {
        let params = ReportParams {
            organization_name: None,
            country: Some("Vietnam".into()),
            region: Some("  ".into()),
            industry: vec![
                "Regional logistics".into(),
                "Semiconductors".into(),
                "local agriculture".into(),
            ],
        };
        assert_eq!(
            extract_location_queries(&params),
            vec!["Vietnam", "Regional logistics", "local agriculture"]
        );
    }

    #[test]
    fn test_removes_duplicates_keeping_first() {
        let params = ReportParams {
            organization_name: Some("Kenya Exports".into()),
            country: Some("Kenya".into()),
            region: Some("Kenya".into()),
            industry: vec![],
        };
        assert_eq!(extract_location_queries(&params), vec!["Kenya", "Exports"]);
    }

    #[test]
    fn test_empty_params_yield_nothing() {
        assert!(extract_location_queries(&ReportParams::default()).is_empty());
    }
}
